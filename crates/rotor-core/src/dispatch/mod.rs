//! Dispatchers — execution strategies for routing tasks.
//!
//! A [`Dispatcher`] decides *where and when* a routing pass runs; the
//! [`DispatchTask`] it receives is self-contained and identical across
//! strategies, so the calling thread (sync), a single worker (queue), a
//! worker pool, or a ring buffer all execute the same delivery logic.
//!
//! | strategy                  | threads | ordering    | backpressure      |
//! |---------------------------|---------|-------------|-------------------|
//! | [`SynchronousDispatcher`] | caller  | total       | none (inline)     |
//! | [`QueueDispatcher`]       | 1       | total       | unbounded/bounded |
//! | [`ThreadPoolDispatcher`]  | N       | none        | unbounded         |
//! | [`RingBufferDispatcher`]  | 1 or N  | claim order | bounded, waiting  |
//!
//! [`SynchronousDispatcher`]: sync::SynchronousDispatcher
//! [`QueueDispatcher`]: queue::QueueDispatcher
//! [`ThreadPoolDispatcher`]: pool::ThreadPoolDispatcher
//! [`RingBufferDispatcher`]: ring::RingBufferDispatcher

pub mod pool;
pub mod queue;
pub mod ring;
pub mod sync;

pub use pool::ThreadPoolDispatcher;
pub use queue::QueueDispatcher;
pub use ring::{ProducerMode, RingBufferDispatcher, WaitStrategy};
pub use sync::SynchronousDispatcher;

use std::sync::Arc;

use crate::consumer::Consumer;
use crate::event::Event;
use crate::key::Key;
use crate::registry::Registry;
use crate::router::{ErrorHandler, EventRouter};

// ---------------------------------------------------------------------------
// DispatchError
// ---------------------------------------------------------------------------

/// Failure to accept a task for dispatch.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The dispatcher has been shut down.
    #[error("dispatcher terminated")]
    Terminated,

    /// A bounded queue is full and the dispatcher does not wait.
    #[error("dispatch queue full (capacity {capacity})")]
    QueueFull {
        /// The queue's configured capacity.
        capacity: usize,
    },
}

// ---------------------------------------------------------------------------
// DispatchTask
// ---------------------------------------------------------------------------

/// Where a task's match list comes from.
///
/// Registry-sourced tasks select at execution time, so registrations added
/// between submission and execution are seen. Fixed lists pin the matches at
/// submission.
#[derive(Clone)]
pub enum MatchSource {
    /// Select from the registry when the task runs.
    Registry(Arc<Registry>),
    /// Deliver to a pinned match list.
    Fixed(Arc<Vec<Arc<crate::registry::Registration>>>),
}

/// A self-contained routing pass: everything a dispatcher needs to deliver
/// one event, on whatever thread it chooses.
#[derive(Clone)]
pub struct DispatchTask {
    /// The notification key.
    pub key: Key,
    /// The event to deliver.
    pub event: Event,
    /// The match list or the registry to select it from.
    pub matches: MatchSource,
    /// The router that performs delivery.
    pub router: Arc<dyn EventRouter>,
    /// Router-level error handler for captured failures.
    pub error_handler: Option<ErrorHandler>,
    /// Invoked once after all matched consumers ran.
    pub completion: Option<Arc<dyn Consumer>>,
}

impl DispatchTask {
    /// Executes the routing pass on the current thread.
    pub fn run(&self) {
        let matches = match &self.matches {
            MatchSource::Registry(registry) => registry.select(&self.key).into_vec(),
            // A pinned list is reused across notifications, so single-use
            // entries must be claimed here, exactly as `select` claims them.
            MatchSource::Fixed(list) => list
                .iter()
                .filter(|reg| !reg.is_cancel_after_use() || reg.claim_single_use())
                .map(Arc::clone)
                .collect(),
        };
        self.router.route(
            &self.key,
            &self.event,
            matches,
            self.completion.as_ref(),
            self.error_handler.as_ref(),
        );
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// An execution strategy for routing tasks.
pub trait Dispatcher: Send + Sync {
    /// Submits `task` for execution.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Terminated`] after shutdown, or
    /// [`DispatchError::QueueFull`] if a bounded, non-waiting queue is at
    /// capacity.
    fn dispatch(&self, task: DispatchTask) -> Result<(), DispatchError>;

    /// Returns `true` until shutdown begins.
    fn alive(&self) -> bool;

    /// Stops accepting tasks, drains already-accepted ones, and joins any
    /// worker threads. Idempotent.
    fn shutdown(&self);
}
