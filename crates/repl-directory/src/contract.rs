// SPDX-License-Identifier: MIT

//! The external interfaces from spec §6: C1 (local client) and C2
//! (remote directory). Both are out of scope for this crate's own logic —
//! the replicator core only ever depends on these traits — but the
//! traits themselves, and one real and one fake implementation of each,
//! live here because spec §6 defines their contracts precisely.

use crate::control::RequestControl;
use crate::error::DirectoryError;
use crate::filter::FilterMatcher;
use async_trait::async_trait;
use repl_core::{Change, Entry, Modification};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchScope {
    Base,
    Sub,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResultEntry {
    pub dn: String,
    pub attrs: Entry,
}

/// C1: a connected, authenticated handle to the local directory.
#[async_trait]
pub trait LocalClient: Send + Sync {
    async fn connect(&self) -> Result<(), DirectoryError>;
    fn connected(&self) -> bool;
    async fn unbind(&self) -> Result<(), DirectoryError>;

    /// Root-DSE `morayVersion` read, performed as part of the per-reconnect
    /// setup hook (spec §4.2).
    async fn server_version(&self) -> Result<i64, DirectoryError>;

    async fn search(
        &self,
        base: &str,
        scope: SearchScope,
        filter: &str,
    ) -> Result<Vec<SearchResultEntry>, DirectoryError>;

    async fn add(
        &self,
        dn: &str,
        attrs: Entry,
        controls: &[RequestControl],
    ) -> Result<(), DirectoryError>;

    async fn modify(
        &self,
        dn: &str,
        modifications: Vec<Modification>,
        controls: &[RequestControl],
    ) -> Result<(), DirectoryError>;

    async fn delete(&self, dn: &str, controls: &[RequestControl]) -> Result<(), DirectoryError>;
}

/// Identity of a remote: its url, plus an optional stable uuid used for
/// the preferred checkpoint schema and the Changelog-Hint control.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteIdentity {
    pub url: String,
    pub uuid: Option<String>,
}

/// C2: a per-remote connection wrapper.
///
/// `poll` is the Rust rendering of spec §6's `poll(startCN, endCN,
/// onEntry, onDone)`: entries are delivered through the `on_entry`
/// callback as they're found, and the return value is `onDone`'s payload —
/// `None` means a previous poll for this remote was still in flight and
/// this call was dropped (spec §4.4's "at most one poll per remote"
/// invariant, enforced by the implementation), `Some(0)` means the window
/// had no new entries, `Some(n)` with `n > 0` means entries were found up
/// to changenumber `n`.
#[async_trait]
pub trait RemoteDirectory: Send + Sync {
    fn identity(&self) -> &RemoteIdentity;
    fn version(&self) -> i64;
    fn raw_queries(&self) -> &str;
    fn queries(&self) -> &FilterMatcher;
    fn connected(&self) -> bool;

    async fn connect(&self) -> Result<(), DirectoryError>;
    async fn unbind(&self) -> Result<(), DirectoryError>;

    async fn poll(
        &self,
        start: u64,
        end: u64,
        on_entry: &mut (dyn FnMut(Change) + Send),
    ) -> Option<u64>;
}
