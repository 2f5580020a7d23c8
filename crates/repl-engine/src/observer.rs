// SPDX-License-Identifier: MIT

//! The explicit observer interface spec §9 calls for, replacing the
//! distilled spec's ad-hoc `connect` / `poll` / `caughtup` / `error` /
//! `destroy` event listeners.

use repl_core::ReplicatorError;

pub trait ReplicatorObserver: Send + Sync {
    fn on_connect(&self) {}
    fn on_poll(&self) {}
    fn on_caughtup(&self, _url: &str, _changenumber: u64) {}
    fn on_error(&self, _err: &ReplicatorError) {}
    fn on_destroy(&self) {}
}

/// Default observer for the daemon binary: every event becomes a
/// structured `tracing` record at a level matching its severity.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl ReplicatorObserver for TracingObserver {
    fn on_connect(&self) {
        tracing::info!("connected");
    }

    fn on_poll(&self) {
        tracing::debug!("poll pass");
    }

    fn on_caughtup(&self, url: &str, changenumber: u64) {
        tracing::info!(url, changenumber, "caught up");
    }

    fn on_error(&self, err: &ReplicatorError) {
        tracing::error!(error = %err, "replicator error");
    }

    fn on_destroy(&self) {
        tracing::info!("destroyed");
    }
}

#[cfg(any(test, feature = "test-util"))]
pub use test_support::RecordingObserver;

#[cfg(any(test, feature = "test-util"))]
pub mod test_support {
    use super::ReplicatorObserver;
    use parking_lot::Mutex;
    use repl_core::ReplicatorError;

    /// Records every emitted event for assertions in the scenario tests.
    #[derive(Default)]
    pub struct RecordingObserver {
        pub connects: Mutex<u32>,
        pub polls: Mutex<u32>,
        pub caughtups: Mutex<Vec<(String, u64)>>,
        pub errors: Mutex<Vec<String>>,
        pub destroys: Mutex<u32>,
    }

    impl ReplicatorObserver for RecordingObserver {
        fn on_connect(&self) {
            *self.connects.lock() += 1;
        }

        fn on_poll(&self) {
            *self.polls.lock() += 1;
        }

        fn on_caughtup(&self, url: &str, changenumber: u64) {
            self.caughtups.lock().push((url.to_string(), changenumber));
        }

        fn on_error(&self, err: &ReplicatorError) {
            self.errors.lock().push(err.to_string());
        }

        fn on_destroy(&self) {
            *self.destroys.lock() += 1;
        }
    }
}
