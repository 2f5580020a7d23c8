// SPDX-License-Identifier: MIT

//! TOML configuration schema (spec §6) and its loader, grounded on
//! `oj-daemon`'s `lifecycle::Config::load()` pattern: read the file,
//! parse it, and fail loudly and specifically rather than falling back
//! to defaults for anything that changes replication behavior.

use std::path::Path;
use thiserror::Error;

use repl_directory::FilterMatcher;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("config has no [[remotes]] entries; at least one is required")]
    NoRemotes,

    #[error("remote {url} has an invalid acceptance filter: {source}")]
    InvalidFilter {
        url: String,
        #[source]
        source: repl_directory::filter::FilterParseError,
    },
}

fn default_checkpoint_objectclass() -> String {
    "sdcreplcheckpoint".to_string()
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_changelog_base() -> String {
    "cn=changelog".to_string()
}

fn default_queries() -> Vec<String> {
    vec!["(objectclass=*)".to_string()]
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct LocalConfig {
    pub url: String,
    pub bind_dn: String,
    pub bind_credentials: String,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct RemoteConfig {
    pub url: String,
    pub bind_dn: String,
    pub bind_credentials: String,

    /// Stable remote identifier, preferred over `url` for the checkpoint
    /// schema and the Changelog-Hint control (spec §4.3, §6).
    #[serde(default)]
    pub uuid: Option<String>,

    /// Subtree the remote's changelog entries live under.
    #[serde(default = "default_changelog_base")]
    pub changelog_base: String,

    /// Acceptance filter: a conceptual OR of these LDAP filter strings
    /// (spec §4.6). Defaults to "accept everything" when omitted.
    #[serde(default = "default_queries")]
    pub queries: Vec<String>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    pub base_dn: String,

    /// Defaults to `base_dn` (spec §6).
    #[serde(default)]
    pub checkpoint_dn: Option<String>,

    #[serde(default = "default_checkpoint_objectclass")]
    pub checkpoint_objectclass: String,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    pub local: LocalConfig,

    #[serde(rename = "remotes", default)]
    pub remotes: Vec<RemoteConfig>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.display().to_string(), source })?;
        let config: Config = toml::from_str(&raw)
            .map_err(|source| ConfigError::Parse { path: path.display().to_string(), source })?;
        if config.remotes.is_empty() {
            return Err(ConfigError::NoRemotes);
        }
        Ok(config)
    }

    pub fn checkpoint_base(&self) -> &str {
        self.checkpoint_dn.as_deref().unwrap_or(&self.base_dn)
    }
}

impl RemoteConfig {
    /// `queries` parsed into a matcher, plus the verbatim string this
    /// remote's checkpoint record stores as its `query` attribute (spec
    /// §4.3): the single filter unwrapped, or an explicit OR of all of
    /// them when there's more than one.
    pub fn matcher_and_raw(&self) -> Result<(FilterMatcher, String), ConfigError> {
        let matcher = FilterMatcher::parse_all(&self.queries)
            .map_err(|source| ConfigError::InvalidFilter { url: self.url.clone(), source })?;
        let raw = match self.queries.as_slice() {
            [single] => single.clone(),
            many => format!("(|{})", many.join("")),
        };
        Ok((matcher, raw))
    }
}
