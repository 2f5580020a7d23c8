// SPDX-License-Identifier: MIT

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! repl-engine: the replicator's control loop (C3–C6) — checkpoint
//! lookup/creation, per-entry change application, the pending-entry
//! queue, and the `init/wait/poll/process/destroy` state machine that
//! drives them, all built on top of the C1/C2 contracts in
//! `repl-directory`.

pub mod applier;
pub mod checkpoint_store;
pub mod controller;
pub mod observer;
pub mod queue;
pub mod remote;

pub use checkpoint_store::{checkpoint_init, CheckpointInit};
pub use controller::{Backoff, Controller, State, PAGE_SIZE};
pub use observer::{ReplicatorObserver, TracingObserver};
pub use queue::{Queue, QueueEntry, MAX_RETRIES};
pub use remote::Remote;
