// SPDX-License-Identifier: MIT

//! In-memory `LocalClient` and `RemoteDirectory` used by the engine's own
//! test suite. Grounded on the teacher's `adapters::agent::fake`
//! pattern: a recording, deterministic stand-in for a real network
//! backend.

use crate::contract::{LocalClient, RemoteDirectory, RemoteIdentity, SearchResultEntry, SearchScope};
use crate::control::RequestControl;
use crate::error::DirectoryError;
use crate::filter::FilterMatcher;
use async_trait::async_trait;
use parking_lot::Mutex;
use repl_core::{Change, Entry, Modification};
use std::collections::HashMap;

/// An in-memory stand-in for the local directory. Applies the
/// Checkpoint-Update control synchronously with the user-data mutation,
/// the same way a real coupled-commit server would (spec invariant 2).
pub struct FakeLocalClient {
    entries: Mutex<HashMap<String, Entry>>,
    connected: Mutex<bool>,
    server_version: Mutex<i64>,
    fail_next: Mutex<HashMap<String, Vec<DirectoryError>>>,
}

impl FakeLocalClient {
    pub fn new(server_version: i64) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            connected: Mutex::new(false),
            server_version: Mutex::new(server_version),
            fail_next: Mutex::new(HashMap::new()),
        }
    }

    /// Queue an error to be returned on the next operation against `dn`,
    /// instead of the normal in-memory behavior. Used to simulate
    /// transient failures for retry tests (spec §4.7, scenario S6).
    pub fn inject_error(&self, dn: &str, err: DirectoryError) {
        self.fail_next.lock().entry(dn.to_string()).or_default().push(err);
    }

    fn take_injected(&self, dn: &str) -> Option<DirectoryError> {
        let mut guard = self.fail_next.lock();
        let queue = guard.get_mut(dn)?;
        if queue.is_empty() {
            return None;
        }
        Some(queue.remove(0))
    }

    /// Read an entry's attributes directly, for test assertions.
    pub fn get(&self, dn: &str) -> Option<Entry> {
        self.entries.lock().get(dn).cloned()
    }

    /// Read a checkpoint record's `changenumber` attribute, for test
    /// assertions that the coupled commit actually advanced it.
    pub fn checkpoint_changenumber(&self, dn: &str) -> Option<u64> {
        self.get(dn)?.get("changenumber")?.first()?.parse().ok()
    }

    fn apply_checkpoint_controls(&self, controls: &[RequestControl]) {
        let mut entries = self.entries.lock();
        for control in controls {
            if let RequestControl::CheckpointUpdate(v) = control {
                let slot = entries.entry(v.dn.clone()).or_default();
                *slot = slot.apply(&[Modification {
                    op: repl_core::ModificationOp::Replace,
                    attr: "changenumber".to_string(),
                    values: vec![v.changenumber.to_string()],
                }]);
            }
        }
    }

    fn has_children(&self, dn: &str) -> bool {
        let suffix = format!(",{dn}");
        self.entries.lock().keys().any(|k| k.ends_with(&suffix))
    }
}

#[async_trait]
impl LocalClient for FakeLocalClient {
    async fn connect(&self) -> Result<(), DirectoryError> {
        *self.connected.lock() = true;
        Ok(())
    }

    fn connected(&self) -> bool {
        *self.connected.lock()
    }

    async fn unbind(&self) -> Result<(), DirectoryError> {
        *self.connected.lock() = false;
        Ok(())
    }

    async fn server_version(&self) -> Result<i64, DirectoryError> {
        Ok(*self.server_version.lock())
    }

    async fn search(
        &self,
        base: &str,
        scope: SearchScope,
        filter: &str,
    ) -> Result<Vec<SearchResultEntry>, DirectoryError> {
        let matcher = crate::filter::parse(filter).map_err(|e| DirectoryError::Other(e.to_string()))?;
        let entries = self.entries.lock();
        match scope {
            SearchScope::Base => match entries.get(base) {
                Some(attrs) if matcher.matches(attrs) => {
                    Ok(vec![SearchResultEntry { dn: base.to_string(), attrs: attrs.clone() }])
                }
                Some(_) => Ok(vec![]),
                None => Err(DirectoryError::NoSuchObject(base.to_string())),
            },
            SearchScope::Sub => {
                let suffix_lower = base.to_ascii_lowercase();
                let mut out = Vec::new();
                for (dn, attrs) in entries.iter() {
                    let dn_lower = dn.to_ascii_lowercase();
                    let under_base = dn_lower == suffix_lower || dn_lower.ends_with(&format!(",{suffix_lower}"));
                    if under_base && matcher.matches(attrs) {
                        out.push(SearchResultEntry { dn: dn.clone(), attrs: attrs.clone() });
                    }
                }
                Ok(out)
            }
        }
    }

    async fn add(
        &self,
        dn: &str,
        attrs: Entry,
        controls: &[RequestControl],
    ) -> Result<(), DirectoryError> {
        if let Some(err) = self.take_injected(dn) {
            return Err(err);
        }
        {
            let mut entries = self.entries.lock();
            if entries.contains_key(dn) {
                return Err(DirectoryError::EntryAlreadyExists(dn.to_string()));
            }
            entries.insert(dn.to_string(), attrs);
        }
        self.apply_checkpoint_controls(controls);
        Ok(())
    }

    async fn modify(
        &self,
        dn: &str,
        modifications: Vec<Modification>,
        controls: &[RequestControl],
    ) -> Result<(), DirectoryError> {
        if let Some(err) = self.take_injected(dn) {
            return Err(err);
        }
        {
            let mut entries = self.entries.lock();
            let current = entries.get(dn).ok_or_else(|| DirectoryError::NoSuchObject(dn.to_string()))?;
            let updated = current.apply(&modifications);
            entries.insert(dn.to_string(), updated);
        }
        self.apply_checkpoint_controls(controls);
        Ok(())
    }

    async fn delete(&self, dn: &str, controls: &[RequestControl]) -> Result<(), DirectoryError> {
        if let Some(err) = self.take_injected(dn) {
            return Err(err);
        }
        if self.has_children(dn) {
            return Err(DirectoryError::NotAllowedOnNonLeaf(dn.to_string()));
        }
        {
            let mut entries = self.entries.lock();
            if entries.remove(dn).is_none() {
                return Err(DirectoryError::NoSuchObject(dn.to_string()));
            }
        }
        self.apply_checkpoint_controls(controls);
        Ok(())
    }
}

/// An in-memory stand-in for a remote directory's changelog.
pub struct FakeRemoteDirectory {
    identity: RemoteIdentity,
    version: Mutex<i64>,
    raw_queries: String,
    matcher: FilterMatcher,
    changelog: Mutex<Vec<Change>>,
    connected: Mutex<bool>,
    poll_in_flight: Mutex<bool>,
}

impl FakeRemoteDirectory {
    pub fn new(identity: RemoteIdentity, version: i64, raw_queries: &str, matcher: FilterMatcher) -> Self {
        Self {
            identity,
            version: Mutex::new(version),
            raw_queries: raw_queries.to_string(),
            matcher,
            changelog: Mutex::new(Vec::new()),
            connected: Mutex::new(false),
            poll_in_flight: Mutex::new(false),
        }
    }

    pub fn push_change(&self, change: Change) {
        self.changelog.lock().push(change);
    }

    /// Force the "a poll is already in flight" state, for testing the
    /// `onDone(undefined)` dropped-call path (spec §4.4).
    pub fn set_poll_in_flight(&self, value: bool) {
        *self.poll_in_flight.lock() = value;
    }

    /// Simulate the remote advancing past the local server's version
    /// mid-session (spec scenario S5).
    pub fn set_version(&self, version: i64) {
        *self.version.lock() = version;
    }
}

#[async_trait]
impl RemoteDirectory for FakeRemoteDirectory {
    fn identity(&self) -> &RemoteIdentity {
        &self.identity
    }

    fn version(&self) -> i64 {
        *self.version.lock()
    }

    fn raw_queries(&self) -> &str {
        &self.raw_queries
    }

    fn queries(&self) -> &FilterMatcher {
        &self.matcher
    }

    fn connected(&self) -> bool {
        *self.connected.lock()
    }

    async fn connect(&self) -> Result<(), DirectoryError> {
        *self.connected.lock() = true;
        Ok(())
    }

    async fn unbind(&self) -> Result<(), DirectoryError> {
        *self.connected.lock() = false;
        Ok(())
    }

    async fn poll(
        &self,
        start: u64,
        end: u64,
        on_entry: &mut (dyn FnMut(Change) + Send),
    ) -> Option<u64> {
        {
            let mut in_flight = self.poll_in_flight.lock();
            if *in_flight {
                return None;
            }
            *in_flight = true;
        }

        let mut last = 0u64;
        let changelog = self.changelog.lock().clone();
        for change in changelog {
            let cn = change.changenumber();
            if cn >= start && cn < end {
                last = last.max(cn);
                on_entry(change);
            }
        }

        *self.poll_in_flight.lock() = false;
        Some(last)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use repl_core::Entry;

    #[tokio::test]
    async fn add_then_replay_produces_entry_already_exists() {
        let client = FakeLocalClient::new(5);
        client.connect().await.unwrap();
        let attrs = Entry::from_map(HashMap::from([("cn".to_string(), vec!["x".to_string()])]));
        client.add("uid=x,o=smartdc", attrs.clone(), &[]).await.unwrap();
        let err = client.add("uid=x,o=smartdc", attrs, &[]).await.unwrap_err();
        assert!(matches!(err, DirectoryError::EntryAlreadyExists(_)));
    }

    #[tokio::test]
    async fn checkpoint_control_advances_changenumber_with_the_write() {
        let client = FakeLocalClient::new(5);
        let attrs = Entry::new();
        client
            .add(
                "uuid=A, o=smartdc",
                attrs,
                &[RequestControl::CheckpointUpdate(crate::control::CheckpointUpdateValue {
                    dn: "uuid=A, o=smartdc".to_string(),
                    changenumber: 1,
                })],
            )
            .await
            .unwrap();
        assert_eq!(client.checkpoint_changenumber("uuid=A, o=smartdc"), Some(1));
    }

    #[tokio::test]
    async fn delete_with_children_is_not_allowed_on_non_leaf() {
        let client = FakeLocalClient::new(5);
        client.add("ou=users,o=smartdc", Entry::new(), &[]).await.unwrap();
        client.add("uid=x,ou=users,o=smartdc", Entry::new(), &[]).await.unwrap();
        let err = client.delete("ou=users,o=smartdc", &[]).await.unwrap_err();
        assert!(matches!(err, DirectoryError::NotAllowedOnNonLeaf(_)));
    }

    #[tokio::test]
    async fn poll_returns_none_when_already_in_flight() {
        let matcher = FilterMatcher::new(vec![]);
        let remote = FakeRemoteDirectory::new(
            RemoteIdentity { url: "ldaps://r1".to_string(), uuid: None },
            5,
            "(objectclass=*)",
            matcher,
        );
        remote.set_poll_in_flight(true);
        let mut seen = Vec::new();
        let result = remote.poll(1, 51, &mut |c| seen.push(c)).await;
        assert_eq!(result, None);
        assert!(seen.is_empty());
    }
}
