// SPDX-License-Identifier: MIT

//! Real `ldap3`-backed implementations of [`LocalClient`] and
//! [`RemoteDirectory`] (spec §6). Everything below this module's public
//! surface — wire parsing, BER encoding of the two request controls, TLS
//! setup — is the out-of-scope "underlying LDAP client library" the spec
//! hands off to `ldap3`.

use crate::contract::{LocalClient, RemoteDirectory, RemoteIdentity, SearchResultEntry, SearchScope};
use crate::control::{CHANGELOG_HINT_OID, CHECKPOINT_UPDATE_OID, RequestControl};
use crate::error::DirectoryError;
use crate::filter::FilterMatcher;
use async_trait::async_trait;
use ldap3::controls::RawControl;
use ldap3::{LdapConnAsync, LdapConnSettings, Mod, Scope, SearchEntry};
use parking_lot::Mutex;
use repl_core::{Change, ChangeType, Entry, Modification, ModificationOp};
use std::collections::HashSet;
use std::time::Duration;

/// Per-reconnect attempt cap (spec §4.2): the library reconnects forever,
/// but each individual attempt is bounded.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

fn scope(s: SearchScope) -> Scope {
    match s {
        SearchScope::Base => Scope::Base,
        SearchScope::Sub => Scope::Subtree,
    }
}

fn to_controls(controls: &[RequestControl]) -> Vec<RawControl> {
    controls
        .iter()
        .map(|c| RawControl { ctype: c.oid().to_string(), crit: false, val: Some(c.encode()) })
        .collect()
}

fn to_mods(modifications: Vec<Modification>) -> Vec<Mod<String>> {
    modifications
        .into_iter()
        .map(|m| {
            let values: HashSet<String> = m.values.into_iter().collect();
            match m.op {
                ModificationOp::Add => Mod::Add(m.attr, values),
                ModificationOp::Delete => Mod::Delete(m.attr, values),
                ModificationOp::Replace => Mod::Replace(m.attr, values),
            }
        })
        .collect()
}

fn entry_to_ldap_attrs(entry: Entry) -> Vec<(String, HashSet<String>)> {
    entry.into_map().into_iter().map(|(k, v)| (k, v.into_iter().collect())).collect()
}

/// Map an `ldap3` failure to the error-name dispatch spec §6/§7 requires.
/// Result-code numbers are the RFC 4511 standard values; `ldap3` surfaces
/// them via `LdapError::result`/`LdapError::adapter_init` without its own
/// named variants, so this is the one place that translates numbers into
/// the categories the applier (C4) matches on.
fn classify(err: ldap3::LdapError) -> DirectoryError {
    let msg = err.to_string();
    match err.rc() {
        Some(68) => DirectoryError::EntryAlreadyExists(msg),
        Some(19) => DirectoryError::ConstraintViolation(msg),
        Some(32) => DirectoryError::NoSuchObject(msg),
        Some(66) => DirectoryError::NotAllowedOnNonLeaf(msg),
        Some(52) => DirectoryError::Unavailable(msg),
        Some(51) => DirectoryError::Busy(msg),
        _ => DirectoryError::Other(msg),
    }
}

trait LdapErrorExt {
    fn rc(&self) -> Option<u32>;
}

impl LdapErrorExt for ldap3::LdapError {
    fn rc(&self) -> Option<u32> {
        match self {
            ldap3::LdapError::LdapResult { result } => Some(result.rc as u32),
            _ => None,
        }
    }
}

/// Connection parameters for either the local client or a remote.
#[derive(Debug, Clone)]
pub struct LdapConnParams {
    pub url: String,
    pub bind_dn: String,
    pub bind_credentials: String,
}

struct LdapSession {
    ldap: Mutex<Option<ldap3::Ldap>>,
}

impl LdapSession {
    fn empty() -> Self {
        Self { ldap: Mutex::new(None) }
    }

    async fn connect(&self, params: &LdapConnParams) -> Result<(), DirectoryError> {
        let settings = LdapConnSettings::new().set_conn_timeout(CONNECT_TIMEOUT);
        let (conn, mut ldap) = LdapConnAsync::with_settings(settings, &params.url)
            .await
            .map_err(classify)?;
        ldap3::drive!(conn);
        ldap.simple_bind(&params.bind_dn, &params.bind_credentials)
            .await
            .map_err(classify)?
            .success()
            .map_err(classify)?;
        *self.ldap.lock() = Some(ldap);
        Ok(())
    }

    fn connected(&self) -> bool {
        self.ldap.lock().is_some()
    }

    async fn unbind(&self) -> Result<(), DirectoryError> {
        let taken = self.ldap.lock().take();
        if let Some(mut ldap) = taken {
            ldap.unbind().await.map_err(classify)?;
        }
        Ok(())
    }

    fn handle(&self) -> Result<ldap3::Ldap, DirectoryError> {
        self.ldap
            .lock()
            .clone()
            .ok_or_else(|| DirectoryError::Unavailable("not connected".to_string()))
    }
}

/// Root-DSE `morayVersion` read, shared by the local client (spec §4.2)
/// and a remote's one-time version handshake on connect.
async fn read_server_version(session: &LdapSession) -> Result<i64, DirectoryError> {
    let mut ldap = session.handle()?;
    let (entries, _) = ldap
        .search("", Scope::Base, "(objectclass=*)", vec!["morayVersion"])
        .await
        .map_err(classify)?
        .success()
        .map_err(classify)?;
    let entry = entries
        .into_iter()
        .next()
        .ok_or_else(|| DirectoryError::Other("root DSE search returned no entry".to_string()))?;
    let parsed = SearchEntry::construct(entry);
    let raw = parsed
        .attrs
        .get("morayVersion")
        .and_then(|v| v.first())
        .ok_or_else(|| DirectoryError::Other("root DSE missing morayVersion".to_string()))?;
    raw.parse::<i64>().map_err(|e| DirectoryError::Other(format!("morayVersion not an integer: {e}")))
}

/// `LocalClient` backed by a real LDAPv3 connection (spec §4.2).
pub struct LdapClient {
    params: LdapConnParams,
    session: LdapSession,
}

impl LdapClient {
    pub fn new(params: LdapConnParams) -> Self {
        Self { params, session: LdapSession::empty() }
    }
}

#[async_trait]
impl LocalClient for LdapClient {
    async fn connect(&self) -> Result<(), DirectoryError> {
        self.session.connect(&self.params).await
    }

    fn connected(&self) -> bool {
        self.session.connected()
    }

    async fn unbind(&self) -> Result<(), DirectoryError> {
        self.session.unbind().await
    }

    /// Root-DSE `morayVersion` read, performed per spec §4.2 as part of
    /// setup: require it parse as a positive integer.
    async fn server_version(&self) -> Result<i64, DirectoryError> {
        read_server_version(&self.session).await
    }

    async fn search(
        &self,
        base: &str,
        scope_: SearchScope,
        filter: &str,
    ) -> Result<Vec<SearchResultEntry>, DirectoryError> {
        let mut ldap = self.session.handle()?;
        let (entries, _) = ldap
            .search(base, scope(scope_), filter, vec!["*"])
            .await
            .map_err(classify)?
            .success()
            .map_err(classify)?;
        Ok(entries
            .into_iter()
            .map(|e| {
                let parsed = SearchEntry::construct(e);
                SearchResultEntry { dn: parsed.dn, attrs: Entry::from_map(parsed.attrs) }
            })
            .collect())
    }

    async fn add(
        &self,
        dn: &str,
        attrs: Entry,
        controls: &[RequestControl],
    ) -> Result<(), DirectoryError> {
        let mut ldap = self.session.handle()?;
        ldap.with_controls(to_controls(controls))
            .add(dn, entry_to_ldap_attrs(attrs))
            .await
            .map_err(classify)?
            .success()
            .map_err(classify)?;
        Ok(())
    }

    async fn modify(
        &self,
        dn: &str,
        modifications: Vec<Modification>,
        controls: &[RequestControl],
    ) -> Result<(), DirectoryError> {
        let mut ldap = self.session.handle()?;
        ldap.with_controls(to_controls(controls))
            .modify(dn, to_mods(modifications))
            .await
            .map_err(classify)?
            .success()
            .map_err(classify)?;
        Ok(())
    }

    async fn delete(&self, dn: &str, controls: &[RequestControl]) -> Result<(), DirectoryError> {
        let mut ldap = self.session.handle()?;
        ldap.with_controls(to_controls(controls)).delete(dn).await.map_err(classify)?.success().map_err(classify)?;
        Ok(())
    }
}

/// `RemoteDirectory` backed by a real LDAPv3 changelog, polled by
/// `(changenumber>=start)(changenumber<end)`.
pub struct LdapRemote {
    params: LdapConnParams,
    session: LdapSession,
    identity: RemoteIdentity,
    /// Cached on `connect()` from the remote's own root-DSE read (spec
    /// §4.2's version gate needs a synchronous accessor once connected).
    version: Mutex<i64>,
    raw_queries: String,
    matcher: FilterMatcher,
    changelog_base: String,
}

impl LdapRemote {
    pub fn new(
        params: LdapConnParams,
        identity: RemoteIdentity,
        raw_queries: String,
        matcher: FilterMatcher,
        changelog_base: String,
    ) -> Self {
        Self {
            params,
            session: LdapSession::empty(),
            identity,
            version: Mutex::new(0),
            raw_queries,
            matcher,
            changelog_base,
        }
    }

    fn parse_change(entry: SearchEntry) -> Result<Change, DirectoryError> {
        let changenumber: u64 = entry
            .attrs
            .get("changenumber")
            .and_then(|v| v.first())
            .ok_or_else(|| DirectoryError::Other("changelog entry missing changenumber".to_string()))?
            .parse()
            .map_err(|e| DirectoryError::Other(format!("bad changenumber: {e}")))?;
        let targetdn = entry
            .attrs
            .get("targetdn")
            .and_then(|v| v.first())
            .cloned()
            .ok_or_else(|| DirectoryError::Other("changelog entry missing targetdn".to_string()))?;
        let changetype = entry
            .attrs
            .get("changetype")
            .and_then(|v| v.first())
            .cloned()
            .unwrap_or_default();
        match changetype.as_str() {
            "add" => {
                let attrs = Entry::from_map(entry.attrs);
                Ok(Change::Add { changenumber, targetdn, attrs })
            }
            "modify" => {
                let modifications = entry
                    .attrs
                    .get("changes")
                    .map(|raw| parse_modify_changes(raw))
                    .unwrap_or_default();
                Ok(Change::Modify { changenumber, targetdn, modifications })
            }
            "delete" => Ok(Change::Delete { changenumber, targetdn }),
            other => Err(DirectoryError::Other(format!("unknown changetype: {other}"))),
        }
    }
}

/// Parse a changelog entry's `changes` attribute (one `op: attr: value`
/// line per LDIF-style modify record) into [`Modification`]s.
fn parse_modify_changes(raw: &[String]) -> Vec<Modification> {
    let mut out = Vec::new();
    let mut current: Option<(ModificationOp, String, Vec<String>)> = None;
    for line in raw {
        if let Some(attr) = line.strip_prefix("add: ") {
            flush(&mut current, &mut out);
            current = Some((ModificationOp::Add, attr.trim().to_string(), Vec::new()));
        } else if let Some(attr) = line.strip_prefix("delete: ") {
            flush(&mut current, &mut out);
            current = Some((ModificationOp::Delete, attr.trim().to_string(), Vec::new()));
        } else if let Some(attr) = line.strip_prefix("replace: ") {
            flush(&mut current, &mut out);
            current = Some((ModificationOp::Replace, attr.trim().to_string(), Vec::new()));
        } else if let Some((_, attr, values)) = current.as_mut() {
            if let Some(value) = line.strip_prefix(&format!("{attr}: ")) {
                values.push(value.to_string());
            }
        }
    }
    flush(&mut current, &mut out);
    out
}

fn flush(current: &mut Option<(ModificationOp, String, Vec<String>)>, out: &mut Vec<Modification>) {
    if let Some((op, attr, values)) = current.take() {
        out.push(Modification { op, attr, values });
    }
}

#[async_trait]
impl RemoteDirectory for LdapRemote {
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
        self.session.connected()
    }

    async fn connect(&self) -> Result<(), DirectoryError> {
        self.session.connect(&self.params).await?;
        let version = read_server_version(&self.session).await?;
        *self.version.lock() = version;
        Ok(())
    }

    async fn unbind(&self) -> Result<(), DirectoryError> {
        self.session.unbind().await
    }

    async fn poll(
        &self,
        start: u64,
        end: u64,
        on_entry: &mut (dyn FnMut(Change) + Send),
    ) -> Option<u64> {
        let mut ldap = self.session.handle().ok()?;
        let filter = format!("(&(changenumber>={start})(changenumber<{end}))");
        let (entries, _) =
            ldap.search(&self.changelog_base, Scope::Subtree, &filter, vec!["*"]).await.ok()?.success().ok()?;

        let mut last = 0u64;
        for raw_entry in entries {
            let parsed = SearchEntry::construct(raw_entry);
            match Self::parse_change(parsed) {
                Ok(change) => {
                    last = last.max(change.changenumber());
                    on_entry(change);
                }
                Err(err) => {
                    tracing::warn!(error = %err, "dropping unparseable changelog entry");
                }
            }
        }
        Some(last)
    }
}
