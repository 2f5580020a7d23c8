// SPDX-License-Identifier: MIT

//! C4: per-entry translation of a remote changelog entry into a local
//! mutation, honoring the remote's acceptance filter (spec §4.6).
//!
//! Every public function here returns `Ok(())` for both "applied" and
//! "permanently unfixable, skip it" outcomes — the caller's retry budget
//! only sees an `Err` for the "unknown, worth retrying" category (spec
//! §4.7). This mirrors the distilled spec's `done(err)` convention
//! without needing a three-way return type.

use repl_core::{Change, Entry, Modification, ModificationOp};
use repl_directory::{DirectoryError, FilterMatcher, LocalClient, RequestControl, SearchScope};

/// Trivial filter used for existence lookups: any attribute map matches
/// `(objectclass=*)` as long as the entry has at least one attribute,
/// which every real directory entry does (it always carries
/// `objectclass`). Used where §4.6 calls for a bare `search(dn, base)`
/// with no filter of its own.
const EXISTENCE_FILTER: &str = "(objectclass=*)";

/// A changelog entry the applier decides not to replay (constraint
/// violation on an add, a filter/existence no-op, a non-leaf delete)
/// still has to move the remote's checkpoint forward — the decision not
/// to write is final, not a transient failure, so the position must not
/// be re-offered on the next poll. Since no real write carries the
/// `controls` list in that case, issue the checkpoint bump directly.
async fn advance_checkpoint_only(local: &dyn LocalClient, controls: &[RequestControl]) -> Result<(), DirectoryError> {
    let Some(RequestControl::CheckpointUpdate(v)) =
        controls.iter().find(|c| matches!(c, RequestControl::CheckpointUpdate(_)))
    else {
        return Ok(());
    };
    local
        .modify(
            &v.dn,
            vec![Modification {
                op: ModificationOp::Replace,
                attr: "changenumber".to_string(),
                values: vec![v.changenumber.to_string()],
            }],
            &[],
        )
        .await
}

/// `controls` is built once by the caller (the queue entry's
/// `controls` field, spec §4.5 step 2) and threaded through unchanged so
/// every mutation this entry causes — including the add-promoted-to-
/// modify rewrite — carries the same Changelog-Hint/Checkpoint-Update
/// pair.
pub async fn apply_change(
    local: &dyn LocalClient,
    matcher: &FilterMatcher,
    change: &Change,
    controls: &[RequestControl],
) -> Result<(), DirectoryError> {
    match change {
        Change::Add { targetdn, attrs, .. } => apply_add(local, targetdn, attrs, controls).await,
        Change::Modify { targetdn, modifications, .. } => {
            apply_modify(local, matcher, targetdn, modifications, controls).await
        }
        Change::Delete { targetdn, .. } => apply_delete(local, matcher, targetdn, controls).await,
    }
}

/// Add, promoted to modify-replace on replay (spec §4.6): a remote that
/// redelivers an earlier add (e.g. after a restart mid-window) converges
/// to its latest values instead of erroring forever.
async fn apply_add(
    local: &dyn LocalClient,
    dn: &str,
    attrs: &Entry,
    controls: &[RequestControl],
) -> Result<(), DirectoryError> {
    match local.add(dn, attrs.clone(), controls).await {
        Ok(()) => Ok(()),
        Err(DirectoryError::EntryAlreadyExists(_)) => {
            let replace_mods: Vec<Modification> = attrs
                .attributes()
                .map(|(attr, values)| Modification {
                    op: ModificationOp::Replace,
                    attr: attr.to_string(),
                    values: values.to_vec(),
                })
                .collect();
            match local.modify(dn, replace_mods, controls).await {
                Ok(()) => Ok(()),
                Err(DirectoryError::ConstraintViolation(e)) => {
                    tracing::error!(dn, error = %e, "constraint violation replaying add as modify, skipping");
                    advance_checkpoint_only(local, controls).await
                }
                Err(err) => Err(err),
            }
        }
        Err(DirectoryError::ConstraintViolation(e)) => {
            tracing::error!(dn, error = %e, "constraint violation on add, skipping");
            advance_checkpoint_only(local, controls).await
        }
        Err(err) => Err(err),
    }
}

/// Five-way filter-membership decision table (spec §4.6). The "present,
/// old doesn't match, new doesn't match" row is the one spec §9 flags as
/// an "impossible row" that should never actually occur — it's kept as
/// an explicit no-op arm rather than an assertion, because the cost of
/// being wrong about "impossible" is a stuck replication stream, not a
/// crash.
async fn apply_modify(
    local: &dyn LocalClient,
    matcher: &FilterMatcher,
    dn: &str,
    modifications: &[Modification],
    controls: &[RequestControl],
) -> Result<(), DirectoryError> {
    let existing = match local.search(dn, SearchScope::Base, EXISTENCE_FILTER).await {
        Ok(entries) => entries.into_iter().next().map(|e| e.attrs),
        Err(DirectoryError::NoSuchObject(_)) => None,
        Err(err) => return Err(err),
    };

    let (old_matches, base_for_new) = match &existing {
        Some(old) => (matcher.matches(old), old.clone()),
        None => (false, Entry::new()),
    };
    let new_entry = base_for_new.apply(modifications);
    let new_matches = matcher.matches(&new_entry);

    match (existing.is_some(), old_matches, new_matches) {
        (true, true, true) | (true, false, true) => {
            local.modify(dn, modifications.to_vec(), controls).await
        }
        (true, true, false) => local.delete(dn, controls).await,
        (true, false, false) => {
            tracing::warn!(dn, "modify hit filter-membership row thought unreachable, no-op");
            advance_checkpoint_only(local, controls).await
        }
        (false, _, true) => local.add(dn, new_entry, controls).await,
        (false, _, false) => advance_checkpoint_only(local, controls).await,
    }
}

/// Delete: both "not found" and "found but no acceptance query matches"
/// collapse into the same no-op-success outcome (spec §9, resolving the
/// duplicate-"2"-scenario open question).
async fn apply_delete(
    local: &dyn LocalClient,
    matcher: &FilterMatcher,
    dn: &str,
    controls: &[RequestControl],
) -> Result<(), DirectoryError> {
    let existing = match local.search(dn, SearchScope::Base, EXISTENCE_FILTER).await {
        Ok(entries) => entries.into_iter().next(),
        Err(DirectoryError::NoSuchObject(_)) => None,
        Err(err) => return Err(err),
    };

    let Some(entry) = existing else {
        return advance_checkpoint_only(local, controls).await;
    };
    if !matcher.matches(&entry.attrs) {
        return advance_checkpoint_only(local, controls).await;
    }

    match local.delete(dn, controls).await {
        Ok(()) => Ok(()),
        Err(DirectoryError::NotAllowedOnNonLeaf(e)) => {
            tracing::warn!(dn, error = %e, "delete of non-leaf entry skipped, orphan children remain");
            advance_checkpoint_only(local, controls).await
        }
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use repl_directory::fake::FakeLocalClient;
    use repl_directory::filter::FilterMatcher;
    use std::collections::HashMap;

    fn sdcperson_matcher() -> FilterMatcher {
        FilterMatcher::parse_all(&["(objectclass=sdcperson)".to_string()]).unwrap()
    }

    fn entry(attrs: &[(&str, &[&str])]) -> Entry {
        let mut map = HashMap::new();
        for (k, vs) in attrs {
            map.insert(k.to_string(), vs.iter().map(|v| v.to_string()).collect());
        }
        Entry::from_map(map)
    }

    fn controls(cn: u64) -> Vec<RequestControl> {
        repl_directory::control::build_controls(None, "uid=deadbeef, o=smartdc", cn)
    }

    /// Seeds the checkpoint record `advance_checkpoint_only` writes
    /// through on skip paths, mirroring the record `checkpoint_init`
    /// would already have created before any change reaches the applier.
    async fn seed_checkpoint(client: &FakeLocalClient) {
        client.add("uid=deadbeef, o=smartdc", Entry::new(), &[]).await.unwrap();
    }

    #[tokio::test]
    async fn add_then_replay_becomes_modify_replace() {
        let client = FakeLocalClient::new(5);
        let matcher = FilterMatcher::new(vec![]);
        let attrs = entry(&[("cn", &["x"])]);
        let add1 = Change::Add { changenumber: 1, targetdn: "uid=x,o=smartdc".to_string(), attrs: attrs.clone() };
        apply_change(&client, &matcher, &add1, &controls(1)).await.unwrap();

        let updated = entry(&[("cn", &["y"])]);
        let add2 = Change::Add { changenumber: 2, targetdn: "uid=x,o=smartdc".to_string(), attrs: updated };
        apply_change(&client, &matcher, &add2, &controls(2)).await.unwrap();

        assert_eq!(client.get("uid=x,o=smartdc").unwrap().get("cn"), Some(&["y".to_string()][..]));
    }

    #[tokio::test]
    async fn modify_drop_out_of_filter_deletes_local_entry() {
        let client = FakeLocalClient::new(5);
        let matcher = sdcperson_matcher();
        client.add("uid=x,o=smartdc", entry(&[("objectclass", &["sdcperson"])]), &[]).await.unwrap();

        let modify = Change::Modify {
            changenumber: 7,
            targetdn: "uid=x,o=smartdc".to_string(),
            modifications: vec![Modification {
                op: ModificationOp::Delete,
                attr: "objectclass".to_string(),
                values: vec![],
            }],
        };
        apply_change(&client, &matcher, &modify, &controls(modify.changenumber())).await.unwrap();
        assert!(client.get("uid=x,o=smartdc").is_none());
    }

    #[tokio::test]
    async fn modify_of_absent_entry_that_would_match_synthesizes_an_add() {
        let client = FakeLocalClient::new(5);
        let matcher = sdcperson_matcher();
        let modify = Change::Modify {
            changenumber: 3,
            targetdn: "uid=new,o=smartdc".to_string(),
            modifications: vec![Modification {
                op: ModificationOp::Add,
                attr: "objectclass".to_string(),
                values: vec!["sdcperson".to_string()],
            }],
        };
        apply_change(&client, &matcher, &modify, &controls(modify.changenumber())).await.unwrap();
        assert!(client.get("uid=new,o=smartdc").is_some());
    }

    #[tokio::test]
    async fn modify_of_absent_entry_that_would_not_match_is_noop() {
        let client = FakeLocalClient::new(5);
        seed_checkpoint(&client).await;
        let matcher = sdcperson_matcher();
        let modify = Change::Modify {
            changenumber: 3,
            targetdn: "uid=new,o=smartdc".to_string(),
            modifications: vec![Modification {
                op: ModificationOp::Add,
                attr: "objectclass".to_string(),
                values: vec!["sdcgroup".to_string()],
            }],
        };
        apply_change(&client, &matcher, &modify, &controls(modify.changenumber())).await.unwrap();
        assert!(client.get("uid=new,o=smartdc").is_none());
    }

    #[tokio::test]
    async fn delete_of_non_leaf_is_logged_and_treated_as_success() {
        let client = FakeLocalClient::new(5);
        seed_checkpoint(&client).await;
        client.add("ou=users,o=smartdc", entry(&[("objectclass", &["organizationalunit"])]), &[]).await.unwrap();
        client.add("uid=x,ou=users,o=smartdc", entry(&[("objectclass", &["sdcperson"])]), &[]).await.unwrap();

        let matcher = FilterMatcher::parse_all(&["(objectclass=organizationalunit)".to_string()]).unwrap();
        let delete = Change::Delete { changenumber: 9, targetdn: "ou=users,o=smartdc".to_string() };
        apply_change(&client, &matcher, &delete, &controls(delete.changenumber())).await.unwrap();
        assert!(client.get("ou=users,o=smartdc").is_some());
        assert_eq!(client.checkpoint_changenumber("uid=deadbeef, o=smartdc"), Some(9));
    }

    #[tokio::test]
    async fn delete_of_missing_entry_is_noop() {
        let client = FakeLocalClient::new(5);
        seed_checkpoint(&client).await;
        let matcher = FilterMatcher::new(vec![]);
        let delete = Change::Delete { changenumber: 9, targetdn: "uid=ghost,o=smartdc".to_string() };
        apply_change(&client, &matcher, &delete, &controls(delete.changenumber())).await.unwrap();
        assert_eq!(client.checkpoint_changenumber("uid=deadbeef, o=smartdc"), Some(9));
    }

    #[tokio::test]
    async fn delete_of_entry_not_matching_filter_is_noop() {
        let client = FakeLocalClient::new(5);
        seed_checkpoint(&client).await;
        client.add("uid=x,o=smartdc", entry(&[("objectclass", &["sdcgroup"])]), &[]).await.unwrap();
        let matcher = FilterMatcher::parse_all(&["(objectclass=sdcperson)".to_string()]).unwrap();
        let delete = Change::Delete { changenumber: 9, targetdn: "uid=x,o=smartdc".to_string() };
        apply_change(&client, &matcher, &delete, &controls(delete.changenumber())).await.unwrap();
        assert!(client.get("uid=x,o=smartdc").is_some());
    }
}
