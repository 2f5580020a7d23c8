// SPDX-License-Identifier: MIT

//! Fatal, replicator-wide errors (spec §7): the handful of conditions that
//! escalate outward instead of being absorbed by suspend/retry.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReplicatorError {
    #[error("UFDS version too old: morayVersion={0} (must be > 0)")]
    VersionTooOld(i64),

    #[error("version mismatch: local={local} < remote {remote_url}={remote}")]
    VersionMismatch { local: i64, remote: i64, remote_url: String },

    #[error("checkpoint init failed for {remote_url}: {reason}")]
    CheckpointInitFailed { remote_url: String, reason: String },

    #[error("multiple checkpoint records found for {remote_url}")]
    DuplicateCheckpoint { remote_url: String },

    #[error("retry exhausted for {remote_url} changenumber={changenumber}: {source}")]
    RetryExhausted { remote_url: String, changenumber: u64, source: Box<ReplicatorError> },

    #[error("illegal state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("directory error: {0}")]
    Directory(String),

    #[error("remote {0} already registered")]
    DuplicateRemote(String),
}
