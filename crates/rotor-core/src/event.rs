//! Event envelope types.
//!
//! An [`Event`] is an immutable envelope around a payload: string headers,
//! an optional reply address, and an optional per-event error handler ride
//! along with the data. Deriving a new payload via [`Event::copy_with`]
//! produces a new envelope sharing the original's headers and reply
//! semantics; the original is never mutated.
//!
//! The payload lives in a [`Body`] with three shapes:
//!
//! - [`Body::Empty`] — the "no data" sentinel, distinguishable from any
//!   wrapped value.
//! - [`Body::Value`] — an `Arc`-shared, dynamically-typed value.
//! - [`Body::Continuation`] — a nested (consumer, argument) pair that the
//!   gateway's built-in default-key consumer resolves by invoking the
//!   consumer with the argument event. Reply handling and internal
//!   continuations flow through the same dispatch pipeline as user events
//!   via this variant.

use std::any::Any;
use std::sync::Arc;

use fxhash::FxHashMap;

use crate::consumer::Consumer;
use crate::key::Key;
use crate::router::ErrorHandler;

/// A dynamically-typed, shareable event payload.
pub type Payload = Arc<dyn Any + Send + Sync>;

// ---------------------------------------------------------------------------
// Headers
// ---------------------------------------------------------------------------

/// String headers attached to an event. Keys are unique; setting an existing
/// key replaces its value.
#[derive(Debug, Clone, Default)]
pub struct Headers {
    map: FxHashMap<String, String>,
}

impl Headers {
    /// Creates an empty header set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value for `name`, if present.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.map.get(name).map(String::as_str)
    }

    /// Sets `name` to `value`, replacing any existing value.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.map.insert(name.into(), value.into());
    }

    /// Merges `entries` into this header set, replacing on collision.
    pub fn merge(&mut self, entries: impl IntoIterator<Item = (String, String)>) {
        for (name, value) in entries {
            self.map.insert(name, value);
        }
    }

    /// Returns the number of headers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns `true` if no headers are set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Iterates over `(name, value)` pairs in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.map.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

// ---------------------------------------------------------------------------
// ReplyPort
// ---------------------------------------------------------------------------

/// The narrow interface through which a reply gateway travels inside an
/// event.
///
/// `Reactor` implements this; events stamped by `send` carry a port back to
/// the gateway that should observe the reply, without this module depending
/// on the gateway type.
pub trait ReplyPort: Send + Sync {
    /// Delivers a reply event at `key` on the owning gateway.
    fn reply(&self, key: &Key, event: Event);
}

// ---------------------------------------------------------------------------
// Body
// ---------------------------------------------------------------------------

/// The payload position of an event.
#[derive(Clone, Default)]
pub enum Body {
    /// No payload. Distinguishable from any wrapped value.
    #[default]
    Empty,
    /// A dynamically-typed value.
    Value(Payload),
    /// A nested consumer/argument pair, resolved by the gateway's built-in
    /// default-key consumer.
    Continuation {
        /// The consumer to invoke.
        consumer: Arc<dyn Consumer>,
        /// The event handed to `consumer`.
        argument: Box<Event>,
    },
}

impl std::fmt::Debug for Body {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => f.write_str("Empty"),
            Self::Value(_) => f.write_str("Value(..)"),
            Self::Continuation { .. } => f.write_str("Continuation(..)"),
        }
    }
}

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// An immutable event envelope.
///
/// Built with [`Event::empty`], [`Event::wrap`], or [`Event::continuation`];
/// refined with the `with_*` builders; transformed with [`Event::copy_with`].
#[derive(Clone, Default)]
pub struct Event {
    headers: Headers,
    body: Body,
    reply_to: Option<Key>,
    reply_port: Option<Arc<dyn ReplyPort>>,
    on_error: Option<ErrorHandler>,
}

impl Event {
    /// Creates the no-data event.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Wraps `value` as an event payload.
    #[must_use]
    pub fn wrap<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            body: Body::Value(Arc::new(value)),
            ..Self::default()
        }
    }

    /// Creates an event from an already-shared payload.
    #[must_use]
    pub fn from_payload(payload: Payload) -> Self {
        Self {
            body: Body::Value(payload),
            ..Self::default()
        }
    }

    /// Creates a continuation event pairing `consumer` with its `argument`.
    #[must_use]
    pub fn continuation(consumer: Arc<dyn Consumer>, argument: Event) -> Self {
        Self {
            body: Body::Continuation {
                consumer,
                argument: Box::new(argument),
            },
            ..Self::default()
        }
    }

    /// Derives a new event carrying `value`, sharing this event's headers,
    /// reply address, reply port, and error handler. `self` is unchanged.
    #[must_use]
    pub fn copy_with<T: Any + Send + Sync>(&self, value: T) -> Self {
        Self {
            headers: self.headers.clone(),
            body: Body::Value(Arc::new(value)),
            reply_to: self.reply_to.clone(),
            reply_port: self.reply_port.clone(),
            on_error: self.on_error.clone(),
        }
    }

    /// Derives a new event with `body`, sharing everything else.
    #[must_use]
    pub fn copy_with_body(&self, body: Body) -> Self {
        Self {
            headers: self.headers.clone(),
            body,
            reply_to: self.reply_to.clone(),
            reply_port: self.reply_port.clone(),
            on_error: self.on_error.clone(),
        }
    }

    /// Adds a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.set(name, value);
        self
    }

    /// Sets the reply-to key.
    #[must_use]
    pub fn with_reply_to(mut self, key: impl Into<Key>) -> Self {
        self.reply_to = Some(key.into());
        self
    }

    /// Sets the reply port.
    #[must_use]
    pub fn with_reply_port(mut self, port: Arc<dyn ReplyPort>) -> Self {
        self.reply_port = Some(port);
        self
    }

    /// Sets the per-event error handler, consulted before any router-level
    /// handler when a consumer fails while processing this event.
    #[must_use]
    pub fn with_error_handler(mut self, handler: ErrorHandler) -> Self {
        self.on_error = Some(handler);
        self
    }

    /// Returns the headers.
    #[must_use]
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns the body.
    #[must_use]
    pub fn body(&self) -> &Body {
        &self.body
    }

    /// Returns `true` if this event carries a value or continuation payload.
    #[must_use]
    pub fn has_payload(&self) -> bool {
        !matches!(self.body, Body::Empty)
    }

    /// Returns the payload as a dynamically-typed reference, if this is a
    /// value event.
    #[must_use]
    pub fn payload(&self) -> Option<&(dyn Any + Send + Sync)> {
        match &self.body {
            Body::Value(p) => Some(p.as_ref()),
            _ => None,
        }
    }

    /// Returns the shared payload handle, if this is a value event.
    #[must_use]
    pub fn payload_arc(&self) -> Option<&Payload> {
        match &self.body {
            Body::Value(p) => Some(p),
            _ => None,
        }
    }

    /// Downcasts the payload to `T`.
    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.payload().and_then(|p| p.downcast_ref())
    }

    /// Returns the reply-to key, if set.
    #[must_use]
    pub fn reply_to(&self) -> Option<&Key> {
        self.reply_to.as_ref()
    }

    /// Returns the reply port, if set.
    #[must_use]
    pub fn reply_port(&self) -> Option<&Arc<dyn ReplyPort>> {
        self.reply_port.as_ref()
    }

    /// Returns the per-event error handler, if set.
    #[must_use]
    pub fn on_error(&self) -> Option<&ErrorHandler> {
        self.on_error.as_ref()
    }

    /// Merges resolved selector headers into a derived event. Returns `self`
    /// cloned with `entries` applied.
    pub(crate) fn with_merged_headers(
        &self,
        entries: impl IntoIterator<Item = (String, String)>,
    ) -> Self {
        let mut ev = self.clone();
        ev.headers.merge(entries);
        ev
    }
}

impl std::fmt::Debug for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Event")
            .field("headers", &self.headers)
            .field("body", &self.body)
            .field("reply_to", &self.reply_to)
            .finish_non_exhaustive()
    }
}

// ===========================================================================
// Tests
// ===========================================================================
