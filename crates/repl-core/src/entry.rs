// SPDX-License-Identifier: MIT

//! In-memory representation of a directory entry's attributes.

use crate::change::{Modification, ModificationOp};
use std::collections::HashMap;

/// An attribute map, keyed by attribute name (case-sensitive; the backing
/// directory is responsible for case-folding before entries reach here).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Entry(HashMap<String, Vec<String>>);

impl Entry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(map: HashMap<String, Vec<String>>) -> Self {
        Self(map)
    }

    pub fn get(&self, attr: &str) -> Option<&[String]> {
        self.0.get(attr).map(Vec::as_slice)
    }

    pub fn has_value(&self, attr: &str, value: &str) -> bool {
        self.0.get(attr).is_some_and(|vals| vals.iter().any(|v| v.eq_ignore_ascii_case(value)))
    }

    pub fn attributes(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn into_map(self) -> HashMap<String, Vec<String>> {
        self.0
    }

    /// Apply a list of LDAP modify operations to a deep copy of this entry,
    /// following standard add/delete/replace semantics:
    /// - `Add` appends values, creating the attribute if absent.
    /// - `Delete` with values removes just those values; with an empty value
    ///   list it removes the whole attribute.
    /// - `Replace` overwrites the attribute wholesale (or removes it, if the
    ///   replacement value list is empty).
    pub fn apply(&self, modifications: &[Modification]) -> Entry {
        let mut out = self.clone();
        for m in modifications {
            let slot = out.0.entry(m.attr.clone()).or_default();
            match m.op {
                ModificationOp::Add => slot.extend(m.values.iter().cloned()),
                ModificationOp::Delete => {
                    if m.values.is_empty() {
                        out.0.remove(&m.attr);
                    } else {
                        slot.retain(|v| !m.values.contains(v));
                        if slot.is_empty() {
                            out.0.remove(&m.attr);
                        }
                    }
                }
                ModificationOp::Replace => {
                    if m.values.is_empty() {
                        out.0.remove(&m.attr);
                    } else {
                        *slot = m.values.clone();
                    }
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::{Modification, ModificationOp};

    fn modification(op: ModificationOp, attr: &str, values: &[&str]) -> Modification {
        Modification {
            op,
            attr: attr.to_string(),
            values: values.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn add_creates_attribute() {
        let entry = Entry::new();
        let out = entry.apply(&[modification(ModificationOp::Add, "cn", &["x"])]);
        assert_eq!(out.get("cn"), Some(&["x".to_string()][..]));
    }

    #[test]
    fn delete_without_values_removes_attribute() {
        let mut map = HashMap::new();
        map.insert("objectclass".to_string(), vec!["sdcperson".to_string()]);
        let entry = Entry::from_map(map);
        let out = entry.apply(&[modification(ModificationOp::Delete, "objectclass", &[])]);
        assert_eq!(out.get("objectclass"), None);
    }

    #[test]
    fn delete_with_values_removes_only_those_values() {
        let mut map = HashMap::new();
        map.insert("objectclass".to_string(), vec!["top".to_string(), "sdcperson".to_string()]);
        let entry = Entry::from_map(map);
        let out =
            entry.apply(&[modification(ModificationOp::Delete, "objectclass", &["sdcperson"])]);
        assert_eq!(out.get("objectclass"), Some(&["top".to_string()][..]));
    }

    #[test]
    fn replace_overwrites() {
        let mut map = HashMap::new();
        map.insert("cn".to_string(), vec!["old".to_string()]);
        let entry = Entry::from_map(map);
        let out = entry.apply(&[modification(ModificationOp::Replace, "cn", &["new"])]);
        assert_eq!(out.get("cn"), Some(&["new".to_string()][..]));
    }

    #[test]
    fn replace_with_empty_removes() {
        let mut map = HashMap::new();
        map.insert("cn".to_string(), vec!["old".to_string()]);
        let entry = Entry::from_map(map);
        let out = entry.apply(&[modification(ModificationOp::Replace, "cn", &[])]);
        assert_eq!(out.get("cn"), None);
    }
}
