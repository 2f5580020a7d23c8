// SPDX-License-Identifier: MIT

//! Checkpoint record model: the durable, per-remote "last applied
//! changenumber" record stored in the local directory (spec §3).

/// The two checkpoint-DN schemes: preferred (remote exposes a stable
/// `uuid`) and legacy (remote has none, so the DN is keyed off an md5
/// hash of its URL). Kept as a sum type per the redesign note in spec §9
/// rather than an `Option<String>` plus a separate "is legacy" flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckpointIdentity {
    Uuid(String),
    LegacyUid(String),
}

impl CheckpointIdentity {
    /// Derive the identity for a remote from its optional uuid and url,
    /// per spec §4.3: prefer `uuid`, fall back to `md5_hex(url)`.
    pub fn derive(uuid: Option<&str>, url: &str) -> Self {
        match uuid {
            Some(uuid) => CheckpointIdentity::Uuid(uuid.to_string()),
            None => CheckpointIdentity::LegacyUid(md5_hex(url)),
        }
    }

    pub fn rdn_attr(&self) -> &'static str {
        match self {
            CheckpointIdentity::Uuid(_) => "uuid",
            CheckpointIdentity::LegacyUid(_) => "uid",
        }
    }

    pub fn rdn_value(&self) -> &str {
        match self {
            CheckpointIdentity::Uuid(v) | CheckpointIdentity::LegacyUid(v) => v,
        }
    }

    /// `uuid=<uuid>, <base>` or `uid=<md5>, <base>`.
    pub fn dn(&self, checkpoint_base: &str) -> String {
        format!("{}={}, {}", self.rdn_attr(), self.rdn_value(), checkpoint_base)
    }
}

/// `md5_hex(remote.url)`, used for the legacy checkpoint schema.
pub fn md5_hex(url: &str) -> String {
    format!("{:x}", md5::compute(url.as_bytes()))
}

/// A checkpoint record as stored in (or about to be written to) the local
/// directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointRecord {
    pub dn: String,
    pub url: String,
    pub changenumber: u64,
    /// The remote's acceptance filter, stored verbatim (`rawQueries`).
    pub query: String,
    pub identity: CheckpointIdentity,
}

impl CheckpointRecord {
    pub fn new(checkpoint_base: &str, url: &str, query: &str, identity: CheckpointIdentity) -> Self {
        let dn = identity.dn(checkpoint_base);
        Self { dn, url: url.to_string(), changenumber: 0, query: query.to_string(), identity }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_prefers_uuid() {
        let id = CheckpointIdentity::derive(Some("A"), "ldaps://r1");
        assert_eq!(id, CheckpointIdentity::Uuid("A".to_string()));
    }

    #[test]
    fn derive_falls_back_to_md5_of_url() {
        let id = CheckpointIdentity::derive(None, "ldaps://r1");
        match id {
            CheckpointIdentity::LegacyUid(hash) => assert_eq!(hash, md5_hex("ldaps://r1")),
            CheckpointIdentity::Uuid(_) => panic!("expected legacy uid"),
        }
    }

    #[test]
    fn dn_format_uuid() {
        let id = CheckpointIdentity::Uuid("A".to_string());
        assert_eq!(id.dn("o=smartdc"), "uuid=A, o=smartdc");
    }

    #[test]
    fn dn_format_legacy_uid() {
        let id = CheckpointIdentity::LegacyUid("deadbeef".to_string());
        assert_eq!(id.dn("o=smartdc"), "uid=deadbeef, o=smartdc");
    }

    #[test]
    fn new_record_starts_at_changenumber_zero() {
        let id = CheckpointIdentity::Uuid("A".to_string());
        let record = CheckpointRecord::new("o=smartdc", "ldaps://r1", "(objectclass=*)", id);
        assert_eq!(record.changenumber, 0);
        assert_eq!(record.dn, "uuid=A, o=smartdc");
    }
}
