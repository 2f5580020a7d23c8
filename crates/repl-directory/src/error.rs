// SPDX-License-Identifier: MIT

//! Error dispatch for directory operations (spec §6, §7).

use thiserror::Error;

/// The error categories the applier (C4) dispatches on. `Other` is the
/// catch-all "unknown per-entry" category that counts against the
/// per-entry retry budget.
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("entry already exists: {0}")]
    EntryAlreadyExists(String),
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),
    #[error("no such object: {0}")]
    NoSuchObject(String),
    #[error("not allowed on non-leaf: {0}")]
    NotAllowedOnNonLeaf(String),
    #[error("service unavailable: {0}")]
    Unavailable(String),
    #[error("server busy: {0}")]
    Busy(String),
    #[error("{0}")]
    Other(String),
}

impl DirectoryError {
    /// Permanent per-entry errors (spec §7): logged and treated as
    /// success so the stream advances, rather than retried.
    pub fn is_permanent(&self) -> bool {
        matches!(self, DirectoryError::ConstraintViolation(_) | DirectoryError::NotAllowedOnNonLeaf(_))
    }

    /// Transient connection-level errors that should trigger a controller
    /// suspend rather than a per-entry retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, DirectoryError::Unavailable(_) | DirectoryError::Busy(_))
    }
}
