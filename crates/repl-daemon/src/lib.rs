// SPDX-License-Identifier: MIT

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! repl-daemon: the `ufds-replicator` binary's config schema, wired on
//! top of `repl-engine`'s `Controller` and `repl-directory`'s `ldap3`
//! backend.

pub mod config;

pub use config::{Config, ConfigError, LocalConfig, RemoteConfig};
