//! Notification keys.
//!
//! A [`Key`] identifies "what happened" when an event is notified. Consumers
//! register interest in keys through selectors; the registry matches keys
//! against registered selector patterns.
//!
//! Keys are cheap to clone (string keys share an `Arc<str>`) and hashable,
//! so they can index the registry's match cache directly.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Counter backing [`Key::token`].
static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

// ---------------------------------------------------------------------------
// Key
// ---------------------------------------------------------------------------

/// A notification key.
///
/// Four shapes cover the engine's routing needs:
///
/// - [`Key::Str`] — named topics (`"orders.created"`, `"/users/42"`).
/// - [`Key::Int`] — numeric topics.
/// - [`Key::Token`] — process-unique anonymous keys, used for default keys
///   and targeted point-to-point notification.
/// - [`Key::Kind`] — static type tags, used to route failure events by their
///   concrete kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    /// A string key. Shared storage, cheap to clone.
    Str(Arc<str>),
    /// A numeric key.
    Int(i64),
    /// A process-unique anonymous key.
    Token(u64),
    /// A static type-tag key (failure kinds and similar closed sets).
    Kind(&'static str),
}

impl Key {
    /// Returns a fresh, process-unique anonymous key.
    ///
    /// Two calls never return equal keys.
    #[must_use]
    pub fn token() -> Self {
        Self::Token(NEXT_TOKEN.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the string form of this key if it is a [`Key::Str`].
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Self::Str(Arc::from(s))
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Self::Str(Arc::from(s.as_str()))
    }
}

impl From<i64> for Key {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Str(s) => write!(f, "{s}"),
            Self::Int(n) => write!(f, "{n}"),
            Self::Token(t) => write!(f, "token-{t}"),
            Self::Kind(k) => write!(f, "kind:{k}"),
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
