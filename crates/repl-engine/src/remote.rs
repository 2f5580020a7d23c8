// SPDX-License-Identifier: MIT

//! A registered remote (spec §3): its connection, its fetch position, and
//! the checkpoint DN it is tracked under.

use repl_directory::RemoteDirectory;
use std::sync::Arc;

pub struct Remote {
    pub url: String,
    pub connection: Arc<dyn RemoteDirectory>,
    /// Highest changenumber known to have been *fetched*. Initialized
    /// from the checkpoint on startup; invariant 3 requires
    /// `searchnumber >= checkpoint.changenumber` always.
    pub searchnumber: u64,
    /// DN of this remote's checkpoint record, once `checkpoint_init` has
    /// run. `None` only before the first successful `resume()`.
    pub checkpoint: Option<String>,
    /// The `searchnumber` at which a `caughtup` event was last emitted,
    /// used to suppress duplicate emissions on repeated empty polls.
    pub caughtup: Option<u64>,
}

impl Remote {
    pub fn new(url: impl Into<String>, connection: Arc<dyn RemoteDirectory>) -> Self {
        Self { url: url.into(), connection, searchnumber: 0, checkpoint: None, caughtup: None }
    }

    pub fn checkpoint_dn(&self) -> Option<&str> {
        self.checkpoint.as_deref()
    }
}
