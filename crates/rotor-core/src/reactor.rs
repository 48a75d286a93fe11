//! Reactor — the event gateway.
//!
//! A [`Reactor`] ties a registry, a router, and a dispatcher into one
//! handle: `on` registers consumers, `notify` pushes events through the
//! dispatcher, `send`/`receive` layer request/reply on top, `prepare` pins
//! a match set for repeated notification, and `link` fans notifications out
//! to peer reactors.
//!
//! ```text
//!   notify(key, event)
//!        │
//!        ▼
//!   ┌──────────┐   select    ┌──────────┐   filter/invoke   ┌───────────┐
//!   │dispatcher│ ──────────▶ │ registry │ ────────────────▶ │ consumers │
//!   └──────────┘             └──────────┘                   └───────────┘
//!        │ forwarded to linked peers (their own dispatchers)
//!        ▼
//! ```
//!
//! # Failure policy
//!
//! Consumer failures never reach the notifier. The reactor's error handler
//! re-enters `notify` with the failure at `Key::Kind(kind)` — and that
//! inner dispatch carries no error handler, so a failing error consumer
//! cannot recurse. A built-in catch-all consumer logs otherwise-unobserved
//! failure events at debug level.

use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use uuid::Uuid;

use crate::consumer::{Argument, Consumer, ConsumerFailure};
use crate::dispatch::sync::SynchronousDispatcher;
use crate::dispatch::{DispatchTask, Dispatcher, MatchSource};
use crate::event::{Body, Event, ReplyPort};
use crate::filter::PassThroughFilter;
use crate::key::Key;
use crate::registry::{Registration, Registry};
use crate::router::{ArgResolvingInvoker, ConsumerInvoker, ErrorHandler, EventRouter, FilteringRouter};
use crate::selector::Selector;
use crate::Result;

// ---------------------------------------------------------------------------
// Reactor
// ---------------------------------------------------------------------------

struct Inner {
    id: Uuid,
    registry: Arc<Registry>,
    router: Arc<dyn EventRouter>,
    dispatcher: Arc<dyn Dispatcher>,
    default_key: Key,
    links: RwLock<Vec<(Uuid, Weak<Inner>)>>,
    /// Back-reference so `&self` contexts (the reply port) can rebuild the
    /// error handler.
    self_ref: Weak<Inner>,
}

impl Inner {
    fn error_handler(self: &Arc<Self>) -> ErrorHandler {
        let weak = Arc::downgrade(self);
        Arc::new(move |err: &crate::router::InvokeError| {
            let Some(inner) = weak.upgrade() else { return };
            let key = Key::Kind(err.kind());
            let event = Event::wrap(err.to_string());
            // No error handler here: a failing error consumer must not
            // recurse into itself.
            if let Err(e) = inner.dispatch(key, event, None, None) {
                tracing::warn!(error = %e, "failed to dispatch error notification");
            }
        })
    }

    fn dispatch(
        self: &Arc<Self>,
        key: Key,
        event: Event,
        completion: Option<Arc<dyn Consumer>>,
        error_handler: Option<ErrorHandler>,
    ) -> Result<()> {
        self.dispatcher.dispatch(DispatchTask {
            key,
            event,
            matches: MatchSource::Registry(Arc::clone(&self.registry)),
            router: Arc::clone(&self.router),
            error_handler,
            completion,
        })?;
        Ok(())
    }

    /// Local dispatch plus one-hop forwarding to linked peers. Peers do not
    /// forward again, so cyclic links cannot loop.
    fn notify(
        self: &Arc<Self>,
        key: Key,
        event: Event,
        completion: Option<Arc<dyn Consumer>>,
    ) -> Result<()> {
        self.dispatch(
            key.clone(),
            event.clone(),
            completion,
            Some(self.error_handler()),
        )?;

        let links = self.links.read().clone();
        for (_, peer) in links {
            if let Some(peer) = peer.upgrade() {
                if let Err(e) =
                    peer.dispatch(key.clone(), event.clone(), None, Some(peer.error_handler()))
                {
                    tracing::warn!(error = %e, "linked reactor rejected forwarded event");
                }
            }
        }
        Ok(())
    }
}

impl ReplyPort for Inner {
    fn reply(&self, key: &Key, event: Event) {
        let Some(inner) = self.self_ref.upgrade() else {
            return;
        };
        // Replies are ordinary deliveries: a failing reply consumer
        // surfaces as a failure-kind notification like any other.
        if let Err(e) = inner.dispatch(key.clone(), event, None, Some(inner.error_handler())) {
            tracing::warn!(error = %e, "failed to dispatch reply");
        }
    }
}

/// An event gateway: registry + router + dispatcher behind one cloneable
/// handle.
///
/// Clones share the same state; equality and hashing follow the reactor's
/// identity, not its contents.
#[derive(Clone)]
pub struct Reactor {
    inner: Arc<Inner>,
}

impl Reactor {
    /// Creates a reactor with the synchronous dispatcher and the standard
    /// router.
    #[must_use]
    pub fn new() -> Self {
        Self::with_parts(None, None)
    }

    /// Creates a reactor running on `dispatcher`.
    #[must_use]
    pub fn with_dispatcher(dispatcher: Arc<dyn Dispatcher>) -> Self {
        Self::with_parts(Some(dispatcher), None)
    }

    /// Creates a reactor from explicit parts; `None` picks the default
    /// (synchronous dispatcher, pass-through filtering router).
    #[must_use]
    pub fn with_parts(
        dispatcher: Option<Arc<dyn Dispatcher>>,
        router: Option<Arc<dyn EventRouter>>,
    ) -> Self {
        let dispatcher = dispatcher.unwrap_or_else(|| Arc::new(SynchronousDispatcher::new()));
        let router = router.unwrap_or_else(|| {
            Arc::new(FilteringRouter::new(
                Arc::new(PassThroughFilter),
                Arc::new(ArgResolvingInvoker::new()),
            ))
        });

        let inner = Arc::new_cyclic(|weak| Inner {
            id: Uuid::new_v4(),
            registry: Arc::new(Registry::new()),
            router,
            dispatcher,
            default_key: Key::token(),
            links: RwLock::new(Vec::new()),
            self_ref: Weak::clone(weak),
        });

        // Built-in consumers: continuation resolution on the default key,
        // and a debug logger observing every failure-kind event.
        inner.registry.register(
            Selector::Exact(inner.default_key.clone()),
            Arc::new(ContinuationConsumer {
                invoker: ArgResolvingInvoker::new(),
            }),
        );
        inner.registry.register(
            Selector::any_kind(),
            crate::consumer::event_fn(|ev| {
                tracing::debug!(event = ?ev, "failure event observed");
            }),
        );

        Self { inner }
    }

    /// Returns this reactor's identity.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// Returns this reactor's anonymous default key, where replies and
    /// continuations land unless directed elsewhere.
    #[must_use]
    pub fn default_key(&self) -> &Key {
        &self.inner.default_key
    }

    // -- registration --

    /// Registers `consumer` for keys matching `selector`.
    pub fn on(&self, selector: Selector, consumer: Arc<dyn Consumer>) -> Arc<Registration> {
        self.inner.registry.register(selector, consumer)
    }

    /// Registers `consumer` on the default key.
    pub fn on_default(&self, consumer: Arc<dyn Consumer>) -> Arc<Registration> {
        self.on(Selector::Exact(self.inner.default_key.clone()), consumer)
    }

    /// Returns `true` if a live, non-paused registration matches `key`.
    #[must_use]
    pub fn responds_to(&self, key: &Key) -> bool {
        self.inner.registry.matches(key)
    }

    // -- notification --

    /// Dispatches `event` to consumers matching `key`, then forwards the
    /// notification to every linked peer.
    ///
    /// # Errors
    ///
    /// Returns an error only if the dispatcher refuses the task; consumer
    /// failures are captured, never propagated.
    pub fn notify(&self, key: impl Into<Key>, event: Event) -> Result<()> {
        self.inner.notify(key.into(), event, None)
    }

    /// Like [`notify`](Self::notify), with a completion consumer invoked
    /// once after all matched consumers ran.
    pub fn notify_with(
        &self,
        key: impl Into<Key>,
        event: Event,
        completion: Arc<dyn Consumer>,
    ) -> Result<()> {
        self.inner.notify(key.into(), event, Some(completion))
    }

    /// Notifies `key` with the empty event.
    pub fn notify_key(&self, key: impl Into<Key>) -> Result<()> {
        self.notify(key, Event::empty())
    }

    // -- request/reply --

    /// Notifies `key` with `event` prepared for replies: the event is
    /// stamped with this reactor as its reply port, and its reply-to key
    /// defaults to this reactor's default key.
    pub fn send(&self, key: impl Into<Key>, event: Event) -> Result<()> {
        let mut event = event;
        if event.reply_port().is_none() {
            let port: Arc<dyn ReplyPort> = Arc::clone(&self.inner) as Arc<dyn ReplyPort>;
            event = event.with_reply_port(port);
        }
        if event.reply_to().is_none() {
            event = event.with_reply_to(self.inner.default_key.clone());
        }
        self.notify(key, event)
    }

    /// [`send`](Self::send) with an explicit reply-to key.
    pub fn send_to(
        &self,
        key: impl Into<Key>,
        event: Event,
        reply_to: impl Into<Key>,
    ) -> Result<()> {
        self.send(key, event.with_reply_to(reply_to))
    }

    /// [`send`](Self::send) directing replies to another gateway: the event
    /// is stamped with `gateway`'s reply port, and its reply-to key defaults
    /// to `gateway`'s default key. Replies and handler failures run on
    /// `gateway`'s dispatcher, not this reactor's.
    pub fn send_to_gateway(
        &self,
        key: impl Into<Key>,
        event: Event,
        gateway: &Reactor,
    ) -> Result<()> {
        let mut event = event.with_reply_port(gateway.reply_port());
        if event.reply_to().is_none() {
            event = event.with_reply_to(gateway.inner.default_key.clone());
        }
        self.notify(key, event)
    }

    /// Returns this reactor's reply port, for stamping onto events sent
    /// through other gateways.
    #[must_use]
    pub fn reply_port(&self) -> Arc<dyn ReplyPort> {
        Arc::clone(&self.inner) as Arc<dyn ReplyPort>
    }

    /// Registers a request handler: `f` observes matching events and its
    /// non-empty result is delivered back at each event's reply-to key
    /// through the event's reply port. Handler failures surface as
    /// failure-kind notifications.
    pub fn receive<F, R>(&self, selector: Selector, f: F) -> Arc<Registration>
    where
        F: Fn(&Event) -> R + Send + Sync + 'static,
        R: IntoReply + 'static,
    {
        self.on(
            selector,
            Arc::new(ReceiveFn {
                f,
                _marker: std::marker::PhantomData,
            }),
        )
    }

    // -- prepared notification --

    /// Pins the current match set for `key`. The returned [`Prepared`]
    /// notifies that fixed set, bypassing registry selection on each call.
    #[must_use]
    pub fn prepare(&self, key: impl Into<Key>) -> Prepared {
        let key = key.into();
        let matches = Arc::new(self.inner.registry.snapshot(&key));
        Prepared {
            key,
            matches,
            inner: Arc::clone(&self.inner),
        }
    }

    // -- linking --

    /// Links `peer`: notifications on this reactor are also dispatched
    /// through `peer`'s dispatcher to `peer`'s consumers. Idempotent; holds
    /// the peer weakly.
    pub fn link(&self, peer: &Reactor) {
        let mut links = self.inner.links.write();
        if links.iter().any(|(id, _)| *id == peer.id()) {
            return;
        }
        links.push((peer.id(), Arc::downgrade(&peer.inner)));
    }

    /// Removes `peer` from the link set.
    pub fn unlink(&self, peer: &Reactor) {
        self.inner
            .links
            .write()
            .retain(|(id, link)| *id != peer.id() && link.strong_count() > 0);
    }
}

impl Default for Reactor {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Reactor {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Reactor {}

impl std::hash::Hash for Reactor {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl std::fmt::Debug for Reactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reactor")
            .field("id", &self.inner.id)
            .field("registrations", &self.inner.registry.len())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Prepared
// ---------------------------------------------------------------------------

/// A pinned match set for one key. Registrations added after
/// [`Reactor::prepare`] are not seen; lifecycle flags still apply at
/// delivery.
pub struct Prepared {
    key: Key,
    matches: Arc<Vec<Arc<Registration>>>,
    inner: Arc<Inner>,
}

impl Prepared {
    /// Returns the pinned key.
    #[must_use]
    pub fn key(&self) -> &Key {
        &self.key
    }

    /// Returns the number of pinned registrations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.matches.len()
    }

    /// Returns `true` if the pinned set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    /// Dispatches `event` to the pinned match set.
    ///
    /// # Errors
    ///
    /// Returns an error only if the dispatcher refuses the task.
    pub fn notify(&self, event: Event) -> Result<()> {
        self.inner.dispatcher.dispatch(DispatchTask {
            key: self.key.clone(),
            event,
            matches: MatchSource::Fixed(Arc::clone(&self.matches)),
            router: Arc::clone(&self.inner.router),
            error_handler: Some(self.inner.error_handler()),
            completion: None,
        })?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Built-in consumers
// ---------------------------------------------------------------------------

/// Resolves [`Body::Continuation`] events landing on the default key by
/// invoking the nested consumer with its argument event.
struct ContinuationConsumer {
    invoker: ArgResolvingInvoker,
}

impl Consumer for ContinuationConsumer {
    fn invoke(&self, arg: Argument<'_>) -> std::result::Result<Option<Event>, ConsumerFailure> {
        let ev = arg
            .event()
            .ok_or_else(|| ConsumerFailure::new("continuation consumer needs an event"))?;
        let Body::Continuation { consumer, argument } = ev.body() else {
            return Ok(None);
        };

        match self.invoker.invoke(consumer.as_ref(), argument) {
            Ok(Some(reply)) => {
                if let (Some(key), Some(port)) = (argument.reply_to(), argument.reply_port()) {
                    port.reply(key, reply);
                }
                Ok(None)
            }
            Ok(None) => Ok(None),
            Err(err) => Err(ConsumerFailure::new(err.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// IntoReply
// ---------------------------------------------------------------------------

/// Conversion of a request handler's return value into an optional reply
/// event.
pub trait IntoReply {
    /// Converts `self` into the reply to send, if any.
    ///
    /// # Errors
    ///
    /// Returns [`ConsumerFailure`] when the handler's result represents a
    /// failure.
    fn into_reply(self) -> std::result::Result<Option<Event>, ConsumerFailure>;
}

impl IntoReply for Event {
    fn into_reply(self) -> std::result::Result<Option<Event>, ConsumerFailure> {
        Ok(Some(self))
    }
}

impl IntoReply for Option<Event> {
    fn into_reply(self) -> std::result::Result<Option<Event>, ConsumerFailure> {
        Ok(self)
    }
}

impl IntoReply for () {
    fn into_reply(self) -> std::result::Result<Option<Event>, ConsumerFailure> {
        Ok(None)
    }
}

impl IntoReply for std::result::Result<Event, ConsumerFailure> {
    fn into_reply(self) -> std::result::Result<Option<Event>, ConsumerFailure> {
        self.map(Some)
    }
}

impl IntoReply for std::result::Result<Option<Event>, ConsumerFailure> {
    fn into_reply(self) -> std::result::Result<Option<Event>, ConsumerFailure> {
        self
    }
}

struct ReceiveFn<F, R> {
    f: F,
    _marker: std::marker::PhantomData<fn() -> R>,
}

impl<F, R> Consumer for ReceiveFn<F, R>
where
    F: Fn(&Event) -> R + Send + Sync,
    R: IntoReply,
{
    fn invoke(&self, arg: Argument<'_>) -> std::result::Result<Option<Event>, ConsumerFailure> {
        let ev = arg
            .event()
            .ok_or_else(|| ConsumerFailure::new("request handler needs an event"))?;
        match (self.f)(ev).into_reply() {
            Ok(reply) => Ok(reply),
            Err(err) => {
                // The requester owns the outcome: failures surface on the
                // reply gateway, where the reply would have gone.
                if let Some(port) = ev.reply_port() {
                    port.reply(&Key::Kind("consumer-failure"), Event::wrap(err.to_string()));
                    Ok(None)
                } else {
                    Err(err)
                }
            }
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
