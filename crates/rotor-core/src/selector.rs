//! Selectors — key matching patterns.
//!
//! A [`Selector`] decides whether a registration is interested in a
//! notification key, and can optionally extract structured headers from a
//! key it matched (regex named captures, path-template variables). Resolved
//! headers are merged into the outgoing event before the consumer runs.

use regex::Regex;

use crate::key::Key;
use crate::{Error, Result};

// ---------------------------------------------------------------------------
// PathTemplate
// ---------------------------------------------------------------------------

/// A `/`-separated path pattern where `{name}` segments capture the
/// corresponding key segment as a header.
///
/// `/orders/{id}/items` matches `/orders/42/items` and resolves the header
/// `id = 42`.
#[derive(Debug, Clone)]
pub struct PathTemplate {
    segments: Vec<Segment>,
}

#[derive(Debug, Clone)]
enum Segment {
    Literal(String),
    Var(String),
}

impl PathTemplate {
    /// Parses a template.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the template is empty or a
    /// variable segment is malformed (`{}` or an unclosed brace).
    pub fn parse(template: &str) -> Result<Self> {
        let trimmed = template.trim_matches('/');
        if trimmed.is_empty() {
            return Err(Error::InvalidArgument("empty path template".into()));
        }

        let mut segments = Vec::new();
        for part in trimmed.split('/') {
            if let Some(inner) = part.strip_prefix('{') {
                let name = inner.strip_suffix('}').ok_or_else(|| {
                    Error::InvalidArgument(format!("unclosed variable segment: {part}"))
                })?;
                if name.is_empty() {
                    return Err(Error::InvalidArgument("empty variable name in path template".into()));
                }
                segments.push(Segment::Var(name.to_string()));
            } else {
                segments.push(Segment::Literal(part.to_string()));
            }
        }
        Ok(Self { segments })
    }

    fn matches(&self, path: &str) -> bool {
        self.captures(path).is_some()
    }

    fn captures(&self, path: &str) -> Option<Vec<(String, String)>> {
        let parts: Vec<&str> = path.trim_matches('/').split('/').collect();
        if parts.len() != self.segments.len() {
            return None;
        }

        let mut vars = Vec::new();
        for (segment, part) in self.segments.iter().zip(&parts) {
            match segment {
                Segment::Literal(lit) if lit == part => {}
                Segment::Literal(_) => return None,
                Segment::Var(name) => vars.push((name.clone(), (*part).to_string())),
            }
        }
        Some(vars)
    }
}

// ---------------------------------------------------------------------------
// Selector
// ---------------------------------------------------------------------------

/// A key-matching pattern with optional header resolution.
///
/// Selectors are immutable; registrations hold them for the lifetime of the
/// binding. Matching is pure and side-effect free.
#[derive(Debug, Clone)]
pub enum Selector {
    /// Matches one key by equality.
    Exact(Key),
    /// Matches string keys against a regular expression (full match). Named
    /// capture groups resolve to headers.
    Regex(Regex),
    /// Matches one failure-kind key.
    Kind(&'static str),
    /// Matches every failure-kind key. The catch-all used for blanket error
    /// observation.
    AnyKind,
    /// Matches string keys against a path template; `{var}` segments resolve
    /// to headers.
    Path(PathTemplate),
}

impl Selector {
    /// Selector matching `key` exactly.
    pub fn exact(key: impl Into<Key>) -> Self {
        Self::Exact(key.into())
    }

    /// Selector matching string keys against `pattern` (anchored full
    /// match).
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `pattern` is not a valid
    /// regular expression.
    pub fn regex(pattern: &str) -> Result<Self> {
        let anchored = format!("^(?:{pattern})$");
        let re = Regex::new(&anchored)
            .map_err(|e| Error::InvalidArgument(format!("invalid regex pattern: {e}")))?;
        Ok(Self::Regex(re))
    }

    /// Selector matching the failure-kind key `kind`.
    #[must_use]
    pub fn kind(kind: &'static str) -> Self {
        Self::Kind(kind)
    }

    /// Selector matching any failure-kind key.
    #[must_use]
    pub fn any_kind() -> Self {
        Self::AnyKind
    }

    /// Selector matching string keys against a path template.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the template is malformed.
    pub fn path(template: &str) -> Result<Self> {
        Ok(Self::Path(PathTemplate::parse(template)?))
    }

    /// Returns `true` if this selector matches `key`.
    #[must_use]
    pub fn matches(&self, key: &Key) -> bool {
        match self {
            Self::Exact(k) => k == key,
            Self::Regex(re) => key.as_str().is_some_and(|s| re.is_match(s)),
            Self::Kind(kind) => matches!(key, Key::Kind(k) if k == kind),
            Self::AnyKind => matches!(key, Key::Kind(_)),
            Self::Path(tmpl) => key.as_str().is_some_and(|s| tmpl.matches(s)),
        }
    }

    /// Resolves structured headers from a key this selector matched.
    ///
    /// Returns `None` when the selector has no header-resolving capability
    /// or nothing was captured.
    #[must_use]
    pub fn resolve_headers(&self, key: &Key) -> Option<Vec<(String, String)>> {
        match self {
            Self::Regex(re) => {
                let s = key.as_str()?;
                let caps = re.captures(s)?;
                let vars: Vec<(String, String)> = re
                    .capture_names()
                    .flatten()
                    .filter_map(|name| {
                        caps.name(name).map(|m| (name.to_string(), m.as_str().to_string()))
                    })
                    .collect();
                if vars.is_empty() {
                    None
                } else {
                    Some(vars)
                }
            }
            Self::Path(tmpl) => {
                let vars = tmpl.captures(key.as_str()?)?;
                if vars.is_empty() {
                    None
                } else {
                    Some(vars)
                }
            }
            _ => None,
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    // -- Exact --

    #[test]
    fn test_exact_matches_equal_key_only() {
        let sel = Selector::exact("orders");
        assert!(sel.matches(&Key::from("orders")));
        assert!(!sel.matches(&Key::from("orders.created")));
        assert!(!sel.matches(&Key::Int(1)));
    }

    #[test]
    fn test_exact_token_identity() {
        let key = Key::token();
        let sel = Selector::Exact(key.clone());
        assert!(sel.matches(&key));
        assert!(!sel.matches(&Key::token()));
    }

    // -- Regex --

    #[test]
    fn test_regex_full_match() {
        let sel = Selector::regex(r"orders\..+").unwrap();
        assert!(sel.matches(&Key::from("orders.created")));
        assert!(!sel.matches(&Key::from("orders")));
        // Anchored: a substring match is not enough
        assert!(!sel.matches(&Key::from("all-orders.created-today")));
    }

    #[test]
    fn test_regex_rejects_non_string_keys() {
        let sel = Selector::regex(".*").unwrap();
        assert!(!sel.matches(&Key::Int(5)));
        assert!(!sel.matches(&Key::Kind("x")));
    }

    #[test]
    fn test_regex_invalid_pattern() {
        assert!(matches!(Selector::regex("("), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_regex_named_captures_resolve_headers() {
        let sel = Selector::regex(r"orders\.(?P<action>\w+)").unwrap();
        let key = Key::from("orders.created");
        assert!(sel.matches(&key));
        let headers = sel.resolve_headers(&key).unwrap();
        assert_eq!(headers, vec![("action".to_string(), "created".to_string())]);
    }

    #[test]
    fn test_regex_without_named_groups_resolves_nothing() {
        let sel = Selector::regex(r"orders\.\w+").unwrap();
        assert!(sel.resolve_headers(&Key::from("orders.created")).is_none());
    }

    // -- Kind --

    #[test]
    fn test_kind_selector() {
        let sel = Selector::kind("consumer-failure");
        assert!(sel.matches(&Key::Kind("consumer-failure")));
        assert!(!sel.matches(&Key::Kind("consumer-panic")));
        assert!(!sel.matches(&Key::from("consumer-failure")));
    }

    #[test]
    fn test_any_kind_selector() {
        let sel = Selector::any_kind();
        assert!(sel.matches(&Key::Kind("consumer-failure")));
        assert!(sel.matches(&Key::Kind("argument-resolution")));
        assert!(!sel.matches(&Key::from("anything")));
    }

    // -- Path template --

    #[test]
    fn test_path_template_literal() {
        let sel = Selector::path("/orders/all").unwrap();
        assert!(sel.matches(&Key::from("/orders/all")));
        assert!(sel.matches(&Key::from("orders/all")));
        assert!(!sel.matches(&Key::from("/orders/42")));
    }

    #[test]
    fn test_path_template_captures() {
        let sel = Selector::path("/orders/{id}/items/{item}").unwrap();
        let key = Key::from("/orders/42/items/7");
        assert!(sel.matches(&key));
        let headers = sel.resolve_headers(&key).unwrap();
        assert_eq!(
            headers,
            vec![
                ("id".to_string(), "42".to_string()),
                ("item".to_string(), "7".to_string()),
            ]
        );
    }

    #[test]
    fn test_path_template_segment_count_must_match() {
        let sel = Selector::path("/orders/{id}").unwrap();
        assert!(!sel.matches(&Key::from("/orders/42/items")));
        assert!(!sel.matches(&Key::from("/orders")));
    }

    #[test]
    fn test_path_template_malformed() {
        assert!(Selector::path("").is_err());
        assert!(Selector::path("/a/{b").is_err());
        assert!(Selector::path("/a/{}").is_err());
    }
}
