// SPDX-License-Identifier: MIT

//! C6: the `init / wait / poll / process / destroy` state machine (spec
//! §4.1), the poll scheduler (§4.4), and the queue drain loop (§4.5).
//!
//! Rust collapses the distilled spec's callback-driven "connect, then
//! re-invoke resume()" dance into a single `async fn` that awaits the
//! connect future directly — there is no separate `connect` event to
//! wait for, because the await point *is* the wait. The cyclic
//! controller/state coupling spec §9 warns against (never recurse
//! directly on a state change) is instead expressed as a plain
//! sequential `await` chain with no re-entrant call back into `resume`:
//! each gated step either completes and falls through to the next, or
//! returns early and leaves the controller in `Wait` for an external
//! caller (the daemon's timer/backoff loop) to retry.

use crate::applier;
use crate::checkpoint_store::checkpoint_init;
use crate::observer::ReplicatorObserver;
use crate::queue::{Queue, QueueEntry, MAX_RETRIES};
use crate::remote::Remote;
use repl_core::ReplicatorError;
use repl_directory::{LocalClient, RequestControl};
use std::sync::Arc;

/// Per spec §4.4.
pub const PAGE_SIZE: u64 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Init,
    Wait,
    Poll,
    Process,
    Destroy,
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            State::Init => "init",
            State::Wait => "wait",
            State::Poll => "poll",
            State::Process => "process",
            State::Destroy => "destroy",
        })
    }
}

impl State {
    /// The transition table of spec §4.1. `destroy` is reachable from
    /// everywhere; `init` is reachable from nowhere once left.
    fn allows(self, to: State) -> bool {
        use State::*;
        matches!(
            (self, to),
            (Init, Wait)
                | (Init, Destroy)
                | (Wait, Poll)
                | (Wait, Destroy)
                | (Poll, Wait)
                | (Poll, Process)
                | (Poll, Destroy)
                | (Process, Wait)
                | (Process, Poll)
                | (Process, Destroy)
        )
    }
}

/// Initial 1s, doubling to a 60s ceiling (spec §4.1). Armed only on an
/// *init* error (version mismatch, missing version, checkpoint-init
/// failure) — transient suspends never arm it, because the local
/// client's own reconnect machinery drives that recovery instead.
#[derive(Debug, Default)]
pub struct Backoff {
    current_ms: Option<u64>,
}

impl Backoff {
    const INITIAL_MS: u64 = 1_000;
    const MAX_MS: u64 = 60_000;

    fn arm_if_unset(&mut self) {
        self.current_ms.get_or_insert(Self::INITIAL_MS);
    }

    fn clear(&mut self) {
        self.current_ms = None;
    }

    pub fn is_armed(&self) -> bool {
        self.current_ms.is_some()
    }

    pub fn current_ms(&self) -> Option<u64> {
        self.current_ms
    }

    /// Called by the daemon's timer loop after a backed-off `resume()`
    /// attempt fails again, to compute the next wait.
    pub fn advance(&mut self) -> u64 {
        let next = self.current_ms.map_or(Self::INITIAL_MS, |c| (c * 2).min(Self::MAX_MS));
        self.current_ms = Some(next);
        next
    }
}

/// The replicator's control loop (spec §4.1–§4.7). Owns the local client,
/// every registered remote, and the single in-memory queue — no
/// `Arc<Mutex<_>>` needed for this state because, per spec §5, nothing
/// else ever mutates it concurrently: every suspension point is an
/// `await` inside this struct's own methods.
pub struct Controller {
    state: State,
    local: Arc<dyn LocalClient>,
    local_version: i64,
    remotes: Vec<Remote>,
    queue: Queue,
    checkpoint_base: String,
    checkpoint_objectclass: String,
    observer: Arc<dyn ReplicatorObserver>,
    backoff: Backoff,
}

impl Controller {
    pub fn new(
        local: Arc<dyn LocalClient>,
        remotes: Vec<Remote>,
        checkpoint_base: impl Into<String>,
        checkpoint_objectclass: impl Into<String>,
        observer: Arc<dyn ReplicatorObserver>,
    ) -> Result<Self, ReplicatorError> {
        let mut seen = std::collections::HashSet::new();
        for remote in &remotes {
            if !seen.insert(remote.url.clone()) {
                return Err(ReplicatorError::DuplicateRemote(remote.url.clone()));
            }
        }
        Ok(Self {
            state: State::Init,
            local,
            local_version: 0,
            remotes,
            queue: Queue::new(),
            checkpoint_base: checkpoint_base.into(),
            checkpoint_objectclass: checkpoint_objectclass.into(),
            observer,
            backoff: Backoff::default(),
        })
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn remote(&self, url: &str) -> Option<&Remote> {
        self.remotes.iter().find(|r| r.url == url)
    }

    fn transition(&mut self, to: State) -> Result<(), ReplicatorError> {
        if !self.state.allows(to) {
            return Err(ReplicatorError::InvalidTransition {
                from: self.state.to_string(),
                to: to.to_string(),
            });
        }
        self.state = to;
        Ok(())
    }

    /// Allowed only from `init`.
    pub async fn start(&mut self) -> Result<(), ReplicatorError> {
        if self.state != State::Init {
            return Err(ReplicatorError::InvalidTransition {
                from: self.state.to_string(),
                to: State::Wait.to_string(),
            });
        }
        self.transition(State::Wait)?;
        self.resume().await
    }

    /// Permitted only from `wait`; a no-op from any other state (spec
    /// property 5, "resume idempotence").
    pub async fn resume(&mut self) -> Result<(), ReplicatorError> {
        if self.state != State::Wait {
            return Ok(());
        }

        // Step 1: local client connected.
        if !self.local.connected() {
            if let Err(err) = self.local.connect().await {
                tracing::warn!(error = %err, "local connect failed, will retry via client reconnect");
                self.suspend(false).await;
                return Ok(());
            }
            self.observer.on_connect();
        }

        // Step 2: every remote connected.
        for remote in &self.remotes {
            if !remote.connection.connected() {
                if let Err(err) = remote.connection.connect().await {
                    tracing::warn!(url = %remote.url, error = %err, "remote connect failed");
                    self.suspend(false).await;
                    return Ok(());
                }
            }
        }

        // Step 3: version gate.
        let local_version = match self.local.server_version().await {
            Ok(v) => v,
            Err(err) => {
                tracing::error!(error = %err, "failed to read local server version");
                let fatal = ReplicatorError::VersionTooOld(0);
                self.observer.on_error(&fatal);
                self.suspend(true).await;
                return Ok(());
            }
        };
        if local_version <= 0 {
            let fatal = ReplicatorError::VersionTooOld(local_version);
            self.observer.on_error(&fatal);
            self.suspend(true).await;
            return Ok(());
        }
        for remote in &self.remotes {
            let remote_version = remote.connection.version();
            if local_version < remote_version {
                let fatal = ReplicatorError::VersionMismatch {
                    local: local_version,
                    remote: remote_version,
                    remote_url: remote.url.clone(),
                };
                tracing::error!(error = %fatal, "version mismatch");
                self.observer.on_error(&fatal);
                self.suspend(true).await;
                return Ok(());
            }
        }
        self.local_version = local_version;

        // Step 4: checkpoint init, per remote.
        for remote in &mut self.remotes {
            let identity = remote.connection.identity().clone();
            let init = match checkpoint_init(
                self.local.as_ref(),
                &self.checkpoint_base,
                &self.checkpoint_objectclass,
                &identity.url,
                identity.uuid.as_deref(),
                remote.connection.raw_queries(),
            )
            .await
            {
                Ok(init) => init,
                Err(err) => {
                    tracing::error!(url = %identity.url, error = %err, "checkpoint init failed");
                    self.observer.on_error(&err);
                    self.suspend(true).await;
                    return Ok(());
                }
            };
            remote.checkpoint = Some(init.dn);
            remote.searchnumber = init.searchnumber;
        }

        self.backoff.clear();
        self.transition(State::Poll)?;
        Ok(())
    }

    /// No-op once `destroy`ed. Drops the queue and unbinds everything,
    /// then returns to `wait`. Arms the init-backoff timer only when
    /// `fatal` is set and no timer is already armed.
    pub async fn suspend(&mut self, fatal: bool) {
        if self.state == State::Destroy {
            return;
        }
        self.queue.clear();
        if self.local.connected() {
            let _ = self.local.unbind().await;
        }
        for remote in &self.remotes {
            if remote.connection.connected() {
                let _ = remote.connection.unbind().await;
            }
        }
        self.state = State::Wait;
        if fatal {
            self.backoff.arm_if_unset();
        }
    }

    /// Terminal; always succeeds.
    pub async fn destroy(&mut self) {
        if self.state == State::Destroy {
            return;
        }
        self.queue.clear();
        self.backoff.clear();
        if self.local.connected() {
            let _ = self.local.unbind().await;
        }
        for remote in &self.remotes {
            if remote.connection.connected() {
                let _ = remote.connection.unbind().await;
            }
        }
        self.state = State::Destroy;
        self.observer.on_destroy();
    }

    /// Re-invoked by the daemon's backoff timer once it fires.
    pub async fn on_backoff_fire(&mut self) -> Result<(), ReplicatorError> {
        self.resume().await
    }

    /// One polling pass (spec §4.4): named remote, or all of them.
    /// Requires `state == poll`; a no-op otherwise (a pass that arrives
    /// after a suspend mid-flight lands on the floor).
    pub async fn poll_pass(&mut self, only: Option<&str>) -> Result<(), ReplicatorError> {
        if self.state != State::Poll {
            return Ok(());
        }
        self.observer.on_poll();

        let urls: Vec<String> = match only {
            Some(u) => vec![u.to_string()],
            None => self.remotes.iter().map(|r| r.url.clone()).collect(),
        };

        for url in urls {
            if self.state != State::Poll {
                break;
            }
            self.poll_one(&url).await?;
        }
        Ok(())
    }

    /// Drains one remote's window(s): fetches a page, processes whatever
    /// it enqueued, and re-polls immediately while the page came back
    /// full (bias toward draining a busy remote before moving to the
    /// next one), stopping on an empty window or a dropped (`None`)
    /// call. `process()` runs inline, between pages, rather than after
    /// `poll_one` returns — queueing a second page on top of an unprocessed
    /// first would just make `process()`'s own per-entry retry budget
    /// work through a longer backlog for no benefit.
    async fn poll_one(&mut self, url: &str) -> Result<(), ReplicatorError> {
        let Some(idx) = self.remotes.iter().position(|r| r.url == url) else {
            return Ok(());
        };

        let remote_version = self.remotes[idx].connection.version();
        if self.local_version < remote_version {
            let fatal = ReplicatorError::VersionMismatch {
                local: self.local_version,
                remote: remote_version,
                remote_url: url.to_string(),
            };
            self.observer.on_error(&fatal);
            self.suspend(true).await;
            return Ok(());
        }

        loop {
            let start = self.remotes[idx].searchnumber + 1;
            let end = start + PAGE_SIZE;
            let connection = Arc::clone(&self.remotes[idx].connection);

            let mut fetched = Vec::new();
            let last = connection.poll(start, end, &mut |change| fetched.push(change)).await;
            for change in fetched {
                self.enqueue(url, change);
            }

            if self.state == State::Process {
                if let Err(err) = self.process().await {
                    self.suspend(true).await;
                    return Err(err);
                }
            }
            if self.state != State::Poll {
                break;
            }

            match last {
                None => break,
                Some(0) => {
                    let remote = &mut self.remotes[idx];
                    if remote.caughtup != Some(remote.searchnumber) {
                        remote.caughtup = Some(remote.searchnumber);
                        self.observer.on_caughtup(url, remote.searchnumber);
                    }
                    break;
                }
                Some(n) => {
                    self.remotes[idx].searchnumber = n;
                }
            }
        }
        Ok(())
    }

    fn enqueue(&mut self, url: &str, change: repl_core::Change) {
        self.queue.enqueue(QueueEntry::new(url, change));
        if self.state == State::Poll {
            // Entering `process` is an entry-effect the caller (`poll_one`,
            // inline within the same page-fetch loop) fulfils by invoking
            // `process()` right after this returns.
            self.state = State::Process;
        }
    }

    /// Drains the queue one entry at a time (spec §4.5), applying each
    /// through C4. Requires `state == process`. Returns `Err` only on
    /// retry-budget exhaustion (spec §4.7) — the caller is expected to
    /// treat that as fatal. A transient directory error (connection lost,
    /// server busy) does not count against the per-entry retry budget at
    /// all: per spec §7's policy table it gets "suspend → reconnect →
    /// resume" instead of "count retry", so the entry is requeued
    /// untouched and the controller suspends non-fatally, returning `Ok`
    /// so the caller doesn't also treat it as an escalation.
    pub async fn process(&mut self) -> Result<(), ReplicatorError> {
        if self.state != State::Process {
            return Ok(());
        }

        while let Some(mut entry) = self.queue.pop_front() {
            let Some(idx) = self.remotes.iter().position(|r| r.url == entry.remote_url) else {
                continue;
            };
            let identity = self.remotes[idx].connection.identity().clone();
            let checkpoint_dn = self.remotes[idx].checkpoint.clone().unwrap_or_default();
            let controls: Vec<RequestControl> = repl_directory::control::build_controls(
                identity.uuid.as_deref(),
                &checkpoint_dn,
                entry.change.changenumber(),
            );
            entry.controls = controls;

            let matcher = self.remotes[idx].connection.queries().clone();
            let result =
                applier::apply_change(self.local.as_ref(), &matcher, &entry.change, &entry.controls).await;

            match result {
                Ok(()) => {
                    tracing::debug!(
                        remote = %entry.remote_url,
                        changenumber = entry.change.changenumber(),
                        changetype = %entry.change.changetype(),
                        "applied change"
                    );
                }
                Err(err) if err.is_transient() => {
                    tracing::warn!(
                        remote = %entry.remote_url,
                        changenumber = entry.change.changenumber(),
                        error = %err,
                        "transient directory error, suspending to reconnect"
                    );
                    // `suspend()` clears the queue and the checkpoint was
                    // never advanced past this entry, so it's safe to drop
                    // here: the next successful `resume()` re-polls from
                    // the same changenumber and re-fetches it.
                    self.suspend(false).await;
                    return Ok(());
                }
                Err(err) => {
                    entry.retry += 1;
                    if entry.retry >= MAX_RETRIES {
                        let fatal = ReplicatorError::RetryExhausted {
                            remote_url: entry.remote_url.clone(),
                            changenumber: entry.change.changenumber(),
                            source: Box::new(ReplicatorError::Directory(err.to_string())),
                        };
                        tracing::error!(error = %fatal, "retry budget exhausted");
                        self.observer.on_error(&fatal);
                        return Err(fatal);
                    }
                    tracing::warn!(
                        remote = %entry.remote_url,
                        changenumber = entry.change.changenumber(),
                        retry = entry.retry,
                        error = %err,
                        "apply failed, retrying"
                    );
                    self.queue.requeue_at_head(entry);
                }
            }
        }

        self.transition(State::Poll)?;
        Ok(())
    }
}
