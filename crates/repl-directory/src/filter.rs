// SPDX-License-Identifier: MIT

//! A minimal LDAP filter grammar (RFC 4515 subset: AND/OR/NOT, equality
//! and presence) parsed into an AST that can be evaluated directly
//! against an in-memory [`repl_core::Entry`].
//!
//! The acceptance filter is, per spec §9, "an opaque capability
//! `matches(entry) -> bool`"; this module is the one piece of the
//! replicator that actually has to look inside it, because §4.6 needs to
//! evaluate a remote's filter against local entry state rather than
//! handing it to a server.

use repl_core::Entry;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterExpr {
    Equality(String, String),
    Presence(String),
    And(Vec<FilterExpr>),
    Or(Vec<FilterExpr>),
    Not(Box<FilterExpr>),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FilterParseError {
    #[error("filter must be wrapped in parentheses: {0}")]
    NotParenthesized(String),
    #[error("unexpected end of filter")]
    UnexpectedEnd,
    #[error("empty equality filter")]
    EmptyEquality,
    #[error("unsupported filter operator in: {0}")]
    UnsupportedOperator(String),
}

impl FilterExpr {
    pub fn matches(&self, entry: &Entry) -> bool {
        match self {
            FilterExpr::Equality(attr, value) => entry.has_value(attr, value),
            FilterExpr::Presence(attr) => entry.get(attr).is_some(),
            FilterExpr::And(items) => items.iter().all(|f| f.matches(entry)),
            FilterExpr::Or(items) => items.iter().any(|f| f.matches(entry)),
            FilterExpr::Not(inner) => !inner.matches(entry),
        }
    }
}

/// Parse a single parenthesized LDAP filter, e.g. `(&(objectclass=sdcperson)(cn=*))`.
pub fn parse(input: &str) -> Result<FilterExpr, FilterParseError> {
    let trimmed = input.trim();
    let (expr, rest) = parse_filter(trimmed)?;
    if !rest.is_empty() {
        return Err(FilterParseError::UnsupportedOperator(input.to_string()));
    }
    Ok(expr)
}

fn parse_filter(s: &str) -> Result<(FilterExpr, &str), FilterParseError> {
    let s = s.trim_start();
    let rest = s.strip_prefix('(').ok_or_else(|| FilterParseError::NotParenthesized(s.to_string()))?;
    let (body, after) = split_balanced(rest)?;
    let expr = parse_body(body)?;
    Ok((expr, after))
}

/// Splits `rest` (the text immediately after an opening `(`) into the
/// content up to its matching `)` and whatever follows that `)`.
fn split_balanced(rest: &str) -> Result<(&str, &str), FilterParseError> {
    let mut depth = 1i32;
    for (idx, ch) in rest.char_indices() {
        match ch {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Ok((&rest[..idx], &rest[idx + 1..]));
                }
            }
            _ => {}
        }
    }
    Err(FilterParseError::UnexpectedEnd)
}

fn parse_body(body: &str) -> Result<FilterExpr, FilterParseError> {
    match body.as_bytes().first() {
        Some(b'&') => Ok(FilterExpr::And(parse_filter_list(&body[1..])?)),
        Some(b'|') => Ok(FilterExpr::Or(parse_filter_list(&body[1..])?)),
        Some(b'!') => {
            let (inner, rest) = parse_filter(&body[1..])?;
            if !rest.is_empty() {
                return Err(FilterParseError::UnsupportedOperator(body.to_string()));
            }
            Ok(FilterExpr::Not(Box::new(inner)))
        }
        _ => parse_simple(body),
    }
}

fn parse_filter_list(mut rest: &str) -> Result<Vec<FilterExpr>, FilterParseError> {
    let mut out = Vec::new();
    rest = rest.trim_start();
    while !rest.is_empty() {
        let (expr, after) = parse_filter(rest)?;
        out.push(expr);
        rest = after.trim_start();
    }
    Ok(out)
}

fn parse_simple(body: &str) -> Result<FilterExpr, FilterParseError> {
    let (attr, value) =
        body.split_once('=').ok_or_else(|| FilterParseError::UnsupportedOperator(body.to_string()))?;
    if attr.is_empty() {
        return Err(FilterParseError::EmptyEquality);
    }
    if value == "*" {
        Ok(FilterExpr::Presence(attr.to_string()))
    } else {
        Ok(FilterExpr::Equality(attr.to_string(), value.to_string()))
    }
}

/// The acceptance filter for one remote: a disjunction ("conceptual OR",
/// spec §4.6) of independently-parsed filters.
#[derive(Debug, Clone)]
pub struct FilterMatcher(Vec<FilterExpr>);

impl FilterMatcher {
    pub fn new(exprs: Vec<FilterExpr>) -> Self {
        Self(exprs)
    }

    pub fn parse_all(filters: &[String]) -> Result<Self, FilterParseError> {
        let exprs = filters.iter().map(|f| parse(f)).collect::<Result<Vec<_>, _>>()?;
        Ok(Self(exprs))
    }

    pub fn matches(&self, entry: &Entry) -> bool {
        self.0.iter().any(|f| f.matches(entry))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn entry(attrs: &[(&str, &[&str])]) -> Entry {
        let mut map = HashMap::new();
        for (k, vs) in attrs {
            map.insert(k.to_string(), vs.iter().map(|v| v.to_string()).collect());
        }
        Entry::from_map(map)
    }

    #[test]
    fn equality_matches_value() {
        let f = parse("(objectclass=sdcperson)").unwrap();
        assert!(f.matches(&entry(&[("objectclass", &["sdcperson"])])));
        assert!(!f.matches(&entry(&[("objectclass", &["other"])])));
    }

    #[test]
    fn presence_matches_any_value() {
        let f = parse("(cn=*)").unwrap();
        assert!(f.matches(&entry(&[("cn", &["x"])])));
        assert!(!f.matches(&entry(&[])));
    }

    #[test]
    fn and_requires_all() {
        let f = parse("(&(objectclass=sdcperson)(cn=*))").unwrap();
        assert!(f.matches(&entry(&[("objectclass", &["sdcperson"]), ("cn", &["x"])])));
        assert!(!f.matches(&entry(&[("objectclass", &["sdcperson"])])));
    }

    #[test]
    fn or_requires_any() {
        let f = parse("(|(url=a)(uuid=b))").unwrap();
        assert!(f.matches(&entry(&[("url", &["a"])])));
        assert!(f.matches(&entry(&[("uuid", &["b"])])));
        assert!(!f.matches(&entry(&[("url", &["c"])])));
    }

    #[test]
    fn not_negates() {
        let f = parse("(!(objectclass=sdcperson))").unwrap();
        assert!(!f.matches(&entry(&[("objectclass", &["sdcperson"])])));
        assert!(f.matches(&entry(&[("objectclass", &["other"])])));
    }

    #[test]
    fn nested_checkpoint_filter_matches_url_or_uuid() {
        // The filter shape built by checkpointInit (spec §4.3).
        let f = parse("(&(objectclass=sdcreplcheckpoint)(|(url=ldaps://r1)(uuid=A)))").unwrap();
        assert!(f.matches(&entry(&[
            ("objectclass", &["sdcreplcheckpoint"]),
            ("url", &["ldaps://r1"])
        ])));
        assert!(f.matches(&entry(&[("objectclass", &["sdcreplcheckpoint"]), ("uuid", &["A"])])));
        assert!(!f.matches(&entry(&[("objectclass", &["other"]), ("url", &["ldaps://r1"])])));
    }

    #[test]
    fn matcher_is_disjunction_of_independent_filters() {
        let matcher = FilterMatcher::parse_all(&[
            "(objectclass=sdcperson)".to_string(),
            "(objectclass=sdcgroup)".to_string(),
        ])
        .unwrap();
        assert!(matcher.matches(&entry(&[("objectclass", &["sdcperson"])])));
        assert!(matcher.matches(&entry(&[("objectclass", &["sdcgroup"])])));
        assert!(!matcher.matches(&entry(&[("objectclass", &["other"])])));
    }
}
