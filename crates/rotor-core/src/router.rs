//! Event routing — argument resolution, invocation, and failure capture.
//!
//! The router is the delivery stage: given a key, an event, and the
//! registry's match list, it applies a [`Filter`], merges selector-resolved
//! headers into the event each consumer sees, resolves each consumer's
//! accepted argument shape, and invokes. Failures never escape to the
//! notifier; they are captured as [`InvokeError`] and fed to the error
//! capture chain (per-event handler, then the router-level handler, then a
//! debug log).
//!
//! # Argument resolution
//!
//! For a consumer accepting the event envelope, the envelope is passed
//! as-is. For a consumer accepting a payload type `T`, candidates are tried
//! in order:
//!
//! 1. the event's payload, if it already is a `T`;
//! 2. the payload converted to `T` through the converter registry.
//!
//! If neither works, the consumer is skipped with an
//! [`InvokeError::NoMatchingArgument`] fed to the capture chain.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crate::consumer::{AcceptedArg, Argument, Consumer, ConsumerFailure};
use crate::convert::ConverterRegistry;
use crate::event::Event;
use crate::filter::Filter;
use crate::key::Key;
use crate::registry::Registration;

/// Shared error callback invoked with captured invocation failures.
pub type ErrorHandler = Arc<dyn Fn(&InvokeError) + Send + Sync>;

// ---------------------------------------------------------------------------
// InvokeError
// ---------------------------------------------------------------------------

/// A failure captured during consumer invocation.
#[derive(Debug, thiserror::Error)]
pub enum InvokeError {
    /// The consumer returned a failure.
    #[error("consumer failed: {0}")]
    Consumer(#[from] ConsumerFailure),

    /// The consumer panicked; the panic was contained.
    #[error("consumer panicked: {0}")]
    Panicked(String),

    /// No candidate argument satisfied the consumer's accepted shape.
    #[error("no argument matching accepted type {accepted}")]
    NoMatchingArgument {
        /// The type name the consumer declared.
        accepted: &'static str,
    },
}

impl InvokeError {
    /// Stable failure-kind name, used as the failure-kind notification key.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Consumer(_) => "consumer-failure",
            Self::Panicked(_) => "consumer-panic",
            Self::NoMatchingArgument { .. } => "argument-resolution",
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

// ---------------------------------------------------------------------------
// ConsumerInvoker
// ---------------------------------------------------------------------------

/// Resolves a consumer's accepted argument from an event and invokes it,
/// containing panics.
pub trait ConsumerInvoker: Send + Sync {
    /// Invokes `consumer` with an argument resolved from `event`.
    ///
    /// # Errors
    ///
    /// Returns [`InvokeError`] on resolution failure, consumer failure, or
    /// a contained panic.
    fn invoke(&self, consumer: &dyn Consumer, event: &Event)
        -> Result<Option<Event>, InvokeError>;
}

/// The standard invoker: direct payload match first, then conversion.
#[derive(Default)]
pub struct ArgResolvingInvoker {
    converters: ConverterRegistry,
}

impl ArgResolvingInvoker {
    /// Creates an invoker with no converters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an invoker backed by `converters`.
    #[must_use]
    pub fn with_converters(converters: ConverterRegistry) -> Self {
        Self { converters }
    }

    fn call(
        consumer: &dyn Consumer,
        arg: Argument<'_>,
    ) -> Result<Option<Event>, InvokeError> {
        match catch_unwind(AssertUnwindSafe(|| consumer.invoke(arg))) {
            Ok(result) => result.map_err(InvokeError::from),
            Err(panic) => Err(InvokeError::Panicked(panic_message(panic.as_ref()))),
        }
    }
}

impl ConsumerInvoker for ArgResolvingInvoker {
    fn invoke(
        &self,
        consumer: &dyn Consumer,
        event: &Event,
    ) -> Result<Option<Event>, InvokeError> {
        match consumer.accepts() {
            AcceptedArg::Event => Self::call(consumer, Argument::Event(event)),
            AcceptedArg::Payload { type_id, type_name } => {
                if let Some(payload) = event.payload() {
                    if payload.type_id() == type_id {
                        return Self::call(consumer, Argument::Payload(payload));
                    }
                    if let Some(converted) = self.converters.convert(payload, type_id) {
                        return Self::call(consumer, Argument::Payload(converted.as_ref()));
                    }
                }
                Err(InvokeError::NoMatchingArgument { accepted: type_name })
            }
        }
    }
}

// ---------------------------------------------------------------------------
// EventRouter
// ---------------------------------------------------------------------------

/// Routes one event to a match list.
pub trait EventRouter: Send + Sync {
    /// Delivers `event` at `key` to `matches`.
    ///
    /// `completion`, when present, is invoked exactly once after all
    /// matched consumers ran, regardless of individual failures.
    /// `error_handler` receives captured failures not already claimed by
    /// the event's own handler.
    fn route(
        &self,
        key: &Key,
        event: &Event,
        matches: Vec<Arc<Registration>>,
        completion: Option<&Arc<dyn Consumer>>,
        error_handler: Option<&ErrorHandler>,
    );
}

/// The standard router: filter, merge resolved headers, invoke, capture.
pub struct FilteringRouter {
    filter: Arc<dyn Filter>,
    invoker: Arc<dyn ConsumerInvoker>,
}

impl FilteringRouter {
    /// Creates a router with the given filter and invoker.
    #[must_use]
    pub fn new(filter: Arc<dyn Filter>, invoker: Arc<dyn ConsumerInvoker>) -> Self {
        Self { filter, invoker }
    }

    /// Feeds a captured failure to the capture chain: the event's handler
    /// first, then the router-level handler, then a debug log.
    fn capture(event: &Event, error_handler: Option<&ErrorHandler>, err: &InvokeError) {
        if let Some(handler) = event.on_error() {
            handler(err);
            return;
        }
        if let Some(handler) = error_handler {
            handler(err);
            return;
        }
        tracing::debug!(kind = err.kind(), error = %err, "unhandled consumer failure");
    }

    fn deliver(
        &self,
        event: &Event,
        consumer: &dyn Consumer,
        error_handler: Option<&ErrorHandler>,
    ) {
        match self.invoker.invoke(consumer, event) {
            Ok(Some(reply)) => {
                if let (Some(reply_to), Some(port)) = (event.reply_to(), event.reply_port()) {
                    port.reply(reply_to, reply);
                }
            }
            Ok(None) => {}
            Err(err) => Self::capture(event, error_handler, &err),
        }
    }
}

impl EventRouter for FilteringRouter {
    fn route(
        &self,
        key: &Key,
        event: &Event,
        matches: Vec<Arc<Registration>>,
        completion: Option<&Arc<dyn Consumer>>,
        error_handler: Option<&ErrorHandler>,
    ) {
        let selected = self.filter.filter(matches, key);

        for reg in &selected {
            // Flags may have flipped since selection. A cancelled single-use
            // entry only reaches this list through the claim that cancelled
            // it, so it must still run; all claim paths exclude entries
            // cancelled earlier.
            if reg.is_paused() || (reg.is_cancelled() && !reg.is_cancel_after_use()) {
                continue;
            }

            let enriched;
            let ev = match reg.selector().resolve_headers(key) {
                Some(vars) => {
                    enriched = event.with_merged_headers(vars);
                    &enriched
                }
                None => event,
            };

            self.deliver(ev, reg.consumer().as_ref(), error_handler);
        }

        if let Some(done) = completion {
            self.deliver(event, done.as_ref(), error_handler);
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::{event_fn, typed_fn};
    use crate::convert::convert_fn;
    use crate::registry::Registry;
    use crate::selector::Selector;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn router() -> FilteringRouter {
        FilteringRouter::new(
            Arc::new(crate::filter::PassThroughFilter),
            Arc::new(ArgResolvingInvoker::new()),
        )
    }

    fn counting_consumer() -> (Arc<dyn Consumer>, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        (event_fn(move |_| { seen.fetch_add(1, Ordering::SeqCst); }), count)
    }

    // -- Invoker --

    #[test]
    fn test_invoker_passes_envelope() {
        let invoker = ArgResolvingInvoker::new();
        let (c, count) = counting_consumer();
        invoker.invoke(c.as_ref(), &Event::wrap(1i32)).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_invoker_direct_payload_match() {
        let invoker = ArgResolvingInvoker::new();
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let c = typed_fn::<i32, _>(move |n| {
            assert_eq!(*n, 7);
            seen.fetch_add(1, Ordering::SeqCst);
        });
        invoker.invoke(c.as_ref(), &Event::wrap(7i32)).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_invoker_converts_payload() {
        let converters =
            ConverterRegistry::new().with(convert_fn::<i32, String, _>(|n| n.to_string()));
        let invoker = ArgResolvingInvoker::with_converters(converters);

        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let c = typed_fn::<String, _>(move |s| {
            assert_eq!(s, "42");
            seen.fetch_add(1, Ordering::SeqCst);
        });
        invoker.invoke(c.as_ref(), &Event::wrap(42i32)).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_invoker_unresolvable_argument() {
        let invoker = ArgResolvingInvoker::new();
        let c = typed_fn::<String, _>(|_| {});
        let err = invoker.invoke(c.as_ref(), &Event::wrap(1u8)).unwrap_err();
        assert_eq!(err.kind(), "argument-resolution");

        let err = invoker.invoke(c.as_ref(), &Event::empty()).unwrap_err();
        assert_eq!(err.kind(), "argument-resolution");
    }

    #[test]
    fn test_invoker_contains_panic() {
        let invoker = ArgResolvingInvoker::new();
        let c = event_fn(|_| panic!("boom"));
        let err = invoker.invoke(c.as_ref(), &Event::empty()).unwrap_err();
        assert_eq!(err.kind(), "consumer-panic");
        assert!(err.to_string().contains("boom"));
    }

    // -- Router --

    #[test]
    fn test_route_delivers_in_order() {
        let reg = Registry::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for tag in ["a", "b", "c"] {
            let order = Arc::clone(&order);
            reg.register(Selector::exact("k"), event_fn(move |_| order.lock().push(tag)));
        }

        let key = Key::from("k");
        router().route(&key, &Event::empty(), reg.select(&key).into_vec(), None, None);
        assert_eq!(*order.lock(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_route_failure_does_not_stop_later_consumers() {
        let reg = Registry::new();
        reg.register(Selector::exact("k"), event_fn(|_| panic!("first fails")));
        let (ok, count) = counting_consumer();
        reg.register(Selector::exact("k"), ok);

        let errors = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&errors);
        let handler: ErrorHandler = Arc::new(move |_| { seen.fetch_add(1, Ordering::SeqCst); });

        let key = Key::from("k");
        router().route(&key, &Event::empty(), reg.select(&key).into_vec(), None, Some(&handler));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(errors.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_event_handler_preempts_router_handler() {
        let reg = Registry::new();
        reg.register(Selector::exact("k"), event_fn(|_| panic!("boom")));

        let event_seen = Arc::new(AtomicUsize::new(0));
        let router_seen = Arc::new(AtomicUsize::new(0));

        let ev_count = Arc::clone(&event_seen);
        let per_event: ErrorHandler = Arc::new(move |_| { ev_count.fetch_add(1, Ordering::SeqCst); });
        let rt_count = Arc::clone(&router_seen);
        let router_level: ErrorHandler = Arc::new(move |_| { rt_count.fetch_add(1, Ordering::SeqCst); });

        let event = Event::empty().with_error_handler(per_event);
        let key = Key::from("k");
        router().route(&key, &event, reg.select(&key).into_vec(), None, Some(&router_level));

        assert_eq!(event_seen.load(Ordering::SeqCst), 1);
        assert_eq!(router_seen.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_route_merges_selector_headers() {
        let reg = Registry::new();
        let seen = Arc::new(Mutex::new(None));
        let out = Arc::clone(&seen);
        reg.register(
            Selector::path("/orders/{id}").unwrap(),
            event_fn(move |ev| {
                *out.lock() = ev.headers().get("id").map(str::to_string);
            }),
        );

        let key = Key::from("/orders/42");
        router().route(&key, &Event::empty(), reg.select(&key).into_vec(), None, None);
        assert_eq!(seen.lock().as_deref(), Some("42"));
    }

    #[test]
    fn test_completion_runs_once_after_matches() {
        let reg = Registry::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for _ in 0..2 {
            let order = Arc::clone(&order);
            reg.register(Selector::exact("k"), event_fn(move |_| order.lock().push("consumer")));
        }
        let done_order = Arc::clone(&order);
        let done: Arc<dyn Consumer> = event_fn(move |_| done_order.lock().push("done"));

        let key = Key::from("k");
        router().route(&key, &Event::empty(), reg.select(&key).into_vec(), Some(&done), None);
        assert_eq!(*order.lock(), vec!["consumer", "consumer", "done"]);
    }

    #[test]
    fn test_completion_runs_even_when_no_matches() {
        let (done, count) = counting_consumer();
        let key = Key::from("k");
        router().route(&key, &Event::empty(), Vec::new(), Some(&done), None);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_route_rechecks_flags() {
        let reg = Registry::new();
        let (c, count) = counting_consumer();
        let r = reg.register(Selector::exact("k"), c);

        let key = Key::from("k");
        let matches = reg.select(&key).into_vec();
        r.pause();
        router().route(&key, &Event::empty(), matches, None, None);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_claimed_single_use_still_runs() {
        let reg = Registry::new();
        let (c, count) = counting_consumer();
        let r = reg.register(Selector::exact("k"), c);
        r.cancel_after_use();

        let key = Key::from("k");
        // select claims it (marks cancelled); routing must still deliver it.
        let matches = reg.select(&key).into_vec();
        assert_eq!(matches.len(), 1);
        router().route(&key, &Event::empty(), matches, None, None);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_produced_reply_goes_through_port() {
        struct CapturePort(Mutex<Vec<(Key, Event)>>);
        impl crate::event::ReplyPort for CapturePort {
            fn reply(&self, key: &Key, event: Event) {
                self.0.lock().push((key.clone(), event));
            }
        }

        struct Echo;
        impl Consumer for Echo {
            fn invoke(&self, arg: Argument<'_>) -> Result<Option<Event>, ConsumerFailure> {
                let ev = arg.event().ok_or("expected event")?;
                Ok(Some(ev.copy_with("pong")))
            }
        }

        let reg = Registry::new();
        reg.register(Selector::exact("ping"), Arc::new(Echo));

        let port = Arc::new(CapturePort(Mutex::new(Vec::new())));
        let event = Event::wrap("ping")
            .with_reply_to("replies")
            .with_reply_port(Arc::<CapturePort>::clone(&port));

        let key = Key::from("ping");
        router().route(&key, &event, reg.select(&key).into_vec(), None, None);

        let replies = port.0.lock();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].0, Key::from("replies"));
        assert_eq!(replies[0].1.downcast_ref::<&str>(), Some(&"pong"));
    }
}
