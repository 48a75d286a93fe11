//! # Rotor Core
//!
//! An in-process event dispatch engine: consumers register interest in
//! notification keys through selectors, and events pushed at a key are
//! routed to every interested consumer through a pluggable execution
//! strategy.
//!
//! This crate provides:
//! - **Reactor**: the gateway tying registry, router, and dispatcher into
//!   one cloneable handle, with request/reply and peer linking on top
//! - **Selectors**: exact, regex (with named-capture headers),
//!   failure-kind, and path-template key matching
//! - **Dispatchers**: inline, single-worker queue, thread pool, and a
//!   disruptor-style ring buffer with waiting backpressure
//! - **Typed invocation**: consumers declare the argument shape they
//!   accept; the invoker unwraps payloads and applies converters to
//!   satisfy it
//!
//! ## Design Principles
//!
//! 1. **Failures never reach the notifier** - consumer errors and panics
//!    are captured and re-routed as failure-kind events
//! 2. **Delivery order is registration order** - per notification, under
//!    ordering-preserving dispatchers
//! 3. **Events are immutable** - transformation derives a new envelope
//! 4. **Execution strategy is orthogonal** - the same routing pass runs
//!    inline, queued, pooled, or through the ring
//!
//! ## Example
//!
//! ```rust
//! use rotor_core::{Event, Reactor, Selector};
//!
//! let reactor = Reactor::new();
//! reactor.on(Selector::exact("orders.created"), rotor_core::event_fn(|ev| {
//!     println!("order: {:?}", ev.downcast_ref::<String>());
//! }));
//! reactor.notify("orders.created", Event::wrap("order-42".to_string()))?;
//! # Ok::<(), rotor_core::Error>(())
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)] // Will selectively allow where needed with justification
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod consumer;
pub mod convert;
pub mod dispatch;
pub mod event;
pub mod filter;
pub mod key;
pub mod reactor;
pub mod registry;
pub mod router;
pub mod selector;

// Re-export key types
pub use config::{Environment, EnvironmentConfig};
pub use consumer::{event_fn, typed_fn, AcceptedArg, Argument, Consumer, ConsumerFailure};
pub use convert::{convert_fn, ConverterRegistry, TryConvert};
pub use dispatch::{DispatchError, Dispatcher};
pub use event::{Body, Event, Headers, Payload, ReplyPort};
pub use filter::{Filter, FirstFilter, PassThroughFilter, RandomFilter, RoundRobinFilter};
pub use key::Key;
pub use reactor::{IntoReply, Prepared, Reactor};
pub use registry::{Registration, RegistrationId, Registry};
pub use router::{ErrorHandler, EventRouter, InvokeError};
pub use selector::Selector;

/// Result type for rotor-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for rotor-core
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A malformed argument: bad regex, bad path template, unknown
    /// dispatcher name, unparseable configuration value
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Dispatch refusals
    #[error("dispatch error: {0}")]
    Dispatch(#[from] dispatch::DispatchError),

    /// Captured invocation failures
    #[error("invoke error: {0}")]
    Invoke(#[from] router::InvokeError),
}
