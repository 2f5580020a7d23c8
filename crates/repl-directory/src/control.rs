// SPDX-License-Identifier: MIT

//! The two LDAPv3 request controls every user-data write carries (spec §6).
//!
//! The OIDs here are placeholders: spec §6 is explicit that "exact OIDs
//! are defined by the server and are not prescribed here." Likewise the
//! wire encoding of the control value is ours to pick; we use JSON, noted
//! in DESIGN.md.

use serde::{Deserialize, Serialize};

/// Changelog-Hint control OID (server-assigned in a real deployment).
pub const CHANGELOG_HINT_OID: &str = "1.3.6.1.4.1.38678.1.90.1";
/// Checkpoint-Update control OID (server-assigned in a real deployment).
pub const CHECKPOINT_UPDATE_OID: &str = "1.3.6.1.4.1.38678.1.90.2";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangelogHintValue {
    pub uuid: String,
    pub changenumber: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointUpdateValue {
    pub dn: String,
    pub changenumber: u64,
}

/// A request control attached to a write so the local server can, in one
/// transaction, tag the write's provenance (optional) and advance the
/// source remote's checkpoint (mandatory, spec §4.6 step 2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestControl {
    ChangelogHint(ChangelogHintValue),
    CheckpointUpdate(CheckpointUpdateValue),
}

impl RequestControl {
    pub fn oid(&self) -> &'static str {
        match self {
            RequestControl::ChangelogHint(_) => CHANGELOG_HINT_OID,
            RequestControl::CheckpointUpdate(_) => CHECKPOINT_UPDATE_OID,
        }
    }

    /// Serialize the control value to bytes for the wire. Never critical:
    /// a server that doesn't understand the control should still commit
    /// the underlying write (the checkpoint just wouldn't advance, which
    /// would be caught by invariant monitoring rather than failing writes).
    pub fn encode(&self) -> Vec<u8> {
        match self {
            RequestControl::ChangelogHint(v) => {
                serde_json::to_vec(v).unwrap_or_default()
            }
            RequestControl::CheckpointUpdate(v) => {
                serde_json::to_vec(v).unwrap_or_default()
            }
        }
    }
}

/// Build the per-write control list for one queue entry (spec §4.5 step 2):
/// a Changelog-Hint when the remote has a uuid, always a Checkpoint-Update.
pub fn build_controls(
    remote_uuid: Option<&str>,
    checkpoint_dn: &str,
    changenumber: u64,
) -> Vec<RequestControl> {
    let mut controls = Vec::with_capacity(2);
    if let Some(uuid) = remote_uuid {
        controls.push(RequestControl::ChangelogHint(ChangelogHintValue {
            uuid: uuid.to_string(),
            changenumber,
        }));
    }
    controls.push(RequestControl::CheckpointUpdate(CheckpointUpdateValue {
        dn: checkpoint_dn.to_string(),
        changenumber,
    }));
    controls
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hint_included_only_when_uuid_present() {
        let with_uuid = build_controls(Some("A"), "uuid=A, o=smartdc", 5);
        assert_eq!(with_uuid.len(), 2);
        assert!(matches!(with_uuid[0], RequestControl::ChangelogHint(_)));

        let without_uuid = build_controls(None, "uid=deadbeef, o=smartdc", 5);
        assert_eq!(without_uuid.len(), 1);
        assert!(matches!(without_uuid[0], RequestControl::CheckpointUpdate(_)));
    }

    #[test]
    fn checkpoint_update_always_present_and_last() {
        let controls = build_controls(Some("A"), "uuid=A, o=smartdc", 7);
        match controls.last().unwrap() {
            RequestControl::CheckpointUpdate(v) => {
                assert_eq!(v.dn, "uuid=A, o=smartdc");
                assert_eq!(v.changenumber, 7);
            }
            _ => panic!("expected checkpoint update control"),
        }
    }
}
