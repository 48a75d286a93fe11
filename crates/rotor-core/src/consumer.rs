//! Consumers — the units of work events are delivered to.
//!
//! A [`Consumer`] declares the argument shape it accepts through
//! [`Consumer::accepts`] and is invoked with a pre-resolved [`Argument`].
//! The declared shape is what lets the invoker serve consumers written
//! against payload types, event envelopes, or converted types from a single
//! routing path without knowing their concrete signatures.
//!
//! Closure adapters cover the common cases:
//!
//! - [`event_fn`] — consumer of the full event envelope.
//! - [`typed_fn`] — consumer of a `T` payload; the invoker unwraps or
//!   converts candidate arguments to satisfy it.

use std::any::{Any, TypeId};
use std::sync::Arc;

use crate::event::Event;

// ---------------------------------------------------------------------------
// ConsumerFailure
// ---------------------------------------------------------------------------

/// A failure raised by a consumer during invocation.
///
/// Captured by the router and redirected to error consumers; never
/// propagated to the notifier.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct ConsumerFailure {
    message: String,
}

impl ConsumerFailure {
    /// Creates a failure with the given message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }

    /// Returns the failure message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<&str> for ConsumerFailure {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ConsumerFailure {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

// ---------------------------------------------------------------------------
// AcceptedArg / Argument
// ---------------------------------------------------------------------------

/// The argument shape a consumer accepts. The typed capability the invoker
/// resolves candidates against.
#[derive(Debug, Clone, Copy)]
pub enum AcceptedArg {
    /// The full event envelope.
    Event,
    /// A payload of one concrete type.
    Payload {
        /// The accepted payload type.
        type_id: TypeId,
        /// Human-readable type name, used in resolution-failure messages.
        type_name: &'static str,
    },
}

impl AcceptedArg {
    /// The accepted shape for a payload of type `T`.
    #[must_use]
    pub fn payload<T: Any>() -> Self {
        Self::Payload {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
        }
    }
}

/// A resolved invocation argument.
#[derive(Clone, Copy)]
pub enum Argument<'a> {
    /// The event envelope.
    Event(&'a Event),
    /// A payload value matching the consumer's accepted type.
    Payload(&'a (dyn Any + Send + Sync)),
}

impl<'a> Argument<'a> {
    /// Downcasts a payload argument to `T`.
    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&'a T> {
        match *self {
            Self::Payload(p) => p.downcast_ref(),
            Self::Event(ev) => ev.downcast_ref(),
        }
    }

    /// Returns the event, if this is an event argument.
    #[must_use]
    pub fn event(&self) -> Option<&'a Event> {
        match *self {
            Self::Event(ev) => Some(ev),
            Self::Payload(_) => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Consumer
// ---------------------------------------------------------------------------

/// A unit of work that events are delivered to.
///
/// Consumers registered with a parallelizing dispatcher (thread pool,
/// multi-consumer ring) must tolerate concurrent invocation; the engine does
/// not serialize calls to a single consumer across keys.
pub trait Consumer: Send + Sync {
    /// The argument shape this consumer accepts.
    fn accepts(&self) -> AcceptedArg {
        AcceptedArg::Event
    }

    /// Invokes the consumer with a resolved argument.
    ///
    /// Returning `Ok(Some(event))` is the "produces a result" capability:
    /// routers that care (reply handling) propagate the produced event.
    ///
    /// # Errors
    ///
    /// Returns [`ConsumerFailure`] on any application-level failure; the
    /// router captures it.
    fn invoke(&self, arg: Argument<'_>) -> Result<Option<Event>, ConsumerFailure>;
}

// ---------------------------------------------------------------------------
// Closure adapters
// ---------------------------------------------------------------------------

struct EventFn<F>(F);

impl<F> Consumer for EventFn<F>
where
    F: Fn(&Event) + Send + Sync,
{
    fn invoke(&self, arg: Argument<'_>) -> Result<Option<Event>, ConsumerFailure> {
        let ev = arg
            .event()
            .ok_or_else(|| ConsumerFailure::new("event consumer invoked without an event"))?;
        (self.0)(ev);
        Ok(None)
    }
}

struct TypedFn<T, F> {
    f: F,
    _marker: std::marker::PhantomData<fn(&T)>,
}

impl<T, F> Consumer for TypedFn<T, F>
where
    T: Any + Send + Sync,
    F: Fn(&T) + Send + Sync,
{
    fn accepts(&self) -> AcceptedArg {
        AcceptedArg::payload::<T>()
    }

    fn invoke(&self, arg: Argument<'_>) -> Result<Option<Event>, ConsumerFailure> {
        let value = arg.downcast_ref::<T>().ok_or_else(|| {
            ConsumerFailure::new(format!(
                "argument is not a {}",
                std::any::type_name::<T>()
            ))
        })?;
        (self.f)(value);
        Ok(None)
    }
}

/// Wraps a closure over the event envelope as a consumer.
pub fn event_fn<F>(f: F) -> Arc<dyn Consumer>
where
    F: Fn(&Event) + Send + Sync + 'static,
{
    Arc::new(EventFn(f))
}

/// Wraps a closure over a `T` payload as a consumer. The invoker unwraps
/// event payloads and applies converters to satisfy the declared type.
pub fn typed_fn<T, F>(f: F) -> Arc<dyn Consumer>
where
    T: Any + Send + Sync,
    F: Fn(&T) + Send + Sync + 'static,
{
    Arc::new(TypedFn { f, _marker: std::marker::PhantomData })
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_event_fn_receives_envelope() {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let c = event_fn(move |ev| {
            assert_eq!(ev.downcast_ref::<i32>(), Some(&5));
            seen.fetch_add(1, Ordering::SeqCst);
        });

        let ev = Event::wrap(5i32);
        c.invoke(Argument::Event(&ev)).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(matches!(c.accepts(), AcceptedArg::Event));
    }

    #[test]
    fn test_typed_fn_declares_payload_type() {
        let c = typed_fn::<String, _>(|_| {});
        match c.accepts() {
            AcceptedArg::Payload { type_id, .. } => {
                assert_eq!(type_id, TypeId::of::<String>());
            }
            AcceptedArg::Event => panic!("expected payload shape"),
        }
    }

    #[test]
    fn test_typed_fn_invoke_with_payload() {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let c = typed_fn::<i32, _>(move |n| {
            assert_eq!(*n, 9);
            seen.fetch_add(1, Ordering::SeqCst);
        });

        let value: Arc<dyn Any + Send + Sync> = Arc::new(9i32);
        c.invoke(Argument::Payload(value.as_ref())).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_typed_fn_wrong_payload_fails() {
        let c = typed_fn::<i32, _>(|_| {});
        let value: Arc<dyn Any + Send + Sync> = Arc::new("nope");
        let err = c.invoke(Argument::Payload(value.as_ref())).unwrap_err();
        assert!(err.message().contains("i32"));
    }

    #[test]
    fn test_argument_downcast_through_event() {
        let ev = Event::wrap(3u64);
        let arg = Argument::Event(&ev);
        assert_eq!(arg.downcast_ref::<u64>(), Some(&3));
    }
}
