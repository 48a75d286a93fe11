//! Environment — named dispatchers and process-environment configuration.
//!
//! An [`Environment`] owns one dispatcher per strategy (`"sync"`,
//! `"queue"`, `"pool"`, `"ring"`), sized by an [`EnvironmentConfig`] that
//! defaults sensibly and can be overridden through `ROTOR_*` environment
//! variables. Reactors built against an environment share its dispatchers;
//! `shutdown` drains and joins all of them.

use std::sync::Arc;

use fxhash::FxHashMap;
use parking_lot::RwLock;

use crate::dispatch::pool::ThreadPoolDispatcher;
use crate::dispatch::queue::QueueDispatcher;
use crate::dispatch::ring::{RingBufferDispatcher, WaitStrategy};
use crate::dispatch::sync::SynchronousDispatcher;
use crate::dispatch::Dispatcher;
use crate::{Error, Result};

const DEFAULT_POOL_WORKERS: usize = 4;
const DEFAULT_QUEUE_CAPACITY: usize = 0; // 0 = unbounded
const DEFAULT_RING_CAPACITY: usize = 1024;

// ---------------------------------------------------------------------------
// EnvironmentConfig
// ---------------------------------------------------------------------------

/// Sizing and selection knobs for an [`Environment`]'s dispatchers.
#[derive(Debug, Clone)]
pub struct EnvironmentConfig {
    /// Name of the dispatcher handed out by
    /// [`Environment::default_dispatcher`].
    pub default_dispatcher: String,
    /// Worker count for the `"pool"` dispatcher.
    pub pool_workers: usize,
    /// Capacity of the `"queue"` dispatcher; `0` means unbounded.
    pub queue_capacity: usize,
    /// Slot count for the `"ring"` dispatcher (rounded up to a power of 2).
    pub ring_capacity: usize,
    /// Wait strategy for the `"ring"` dispatcher.
    pub ring_wait: WaitStrategy,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            default_dispatcher: "sync".to_string(),
            pool_workers: DEFAULT_POOL_WORKERS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            ring_capacity: DEFAULT_RING_CAPACITY,
            ring_wait: WaitStrategy::Yield,
        }
    }
}

impl EnvironmentConfig {
    /// Builds a config from defaults overridden by `ROTOR_*` process
    /// environment variables: `ROTOR_DEFAULT_DISPATCHER`,
    /// `ROTOR_POOL_WORKERS`, `ROTOR_QUEUE_CAPACITY`, `ROTOR_RING_CAPACITY`,
    /// `ROTOR_RING_WAIT` (`spin` | `yield` | `block`).
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for unparseable values.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(name) = std::env::var("ROTOR_DEFAULT_DISPATCHER") {
            config.default_dispatcher = name;
        }
        if let Ok(v) = std::env::var("ROTOR_POOL_WORKERS") {
            config.pool_workers = parse_usize("ROTOR_POOL_WORKERS", &v)?;
        }
        if let Ok(v) = std::env::var("ROTOR_QUEUE_CAPACITY") {
            config.queue_capacity = parse_usize("ROTOR_QUEUE_CAPACITY", &v)?;
        }
        if let Ok(v) = std::env::var("ROTOR_RING_CAPACITY") {
            config.ring_capacity = parse_usize("ROTOR_RING_CAPACITY", &v)?;
        }
        if let Ok(v) = std::env::var("ROTOR_RING_WAIT") {
            config.ring_wait = parse_wait(&v)?;
        }
        Ok(config)
    }
}

fn parse_usize(name: &str, value: &str) -> Result<usize> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::InvalidArgument(format!("{name}: not a number: {value:?}")))
}

fn parse_wait(value: &str) -> Result<WaitStrategy> {
    match value.trim().to_ascii_lowercase().as_str() {
        "spin" => Ok(WaitStrategy::Spin),
        "yield" => Ok(WaitStrategy::Yield),
        "block" => Ok(WaitStrategy::Block),
        other => Err(Error::InvalidArgument(format!(
            "ROTOR_RING_WAIT: expected spin, yield, or block, got {other:?}"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Environment
// ---------------------------------------------------------------------------

/// A named-dispatcher registry with shared ownership.
pub struct Environment {
    config: EnvironmentConfig,
    dispatchers: RwLock<FxHashMap<String, Arc<dyn Dispatcher>>>,
}

impl Environment {
    /// Creates an environment from `config`, building the four standard
    /// dispatchers.
    #[must_use]
    pub fn new(config: EnvironmentConfig) -> Self {
        let mut dispatchers: FxHashMap<String, Arc<dyn Dispatcher>> = FxHashMap::default();
        dispatchers.insert("sync".to_string(), Arc::new(SynchronousDispatcher::new()));
        let queue: Arc<dyn Dispatcher> = if config.queue_capacity == 0 {
            Arc::new(QueueDispatcher::new())
        } else {
            Arc::new(QueueDispatcher::bounded(config.queue_capacity))
        };
        dispatchers.insert("queue".to_string(), queue);
        dispatchers.insert(
            "pool".to_string(),
            Arc::new(ThreadPoolDispatcher::new(config.pool_workers)),
        );
        dispatchers.insert(
            "ring".to_string(),
            Arc::new(RingBufferDispatcher::new(config.ring_capacity, config.ring_wait)),
        );

        Self {
            config,
            dispatchers: RwLock::new(dispatchers),
        }
    }

    /// Creates an environment configured from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for unparseable `ROTOR_*` values.
    pub fn from_env() -> Result<Self> {
        Ok(Self::new(EnvironmentConfig::from_env()?))
    }

    /// Returns the active configuration.
    #[must_use]
    pub fn config(&self) -> &EnvironmentConfig {
        &self.config
    }

    /// Returns the dispatcher registered under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if no dispatcher has that name.
    pub fn dispatcher(&self, name: &str) -> Result<Arc<dyn Dispatcher>> {
        self.dispatchers
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::InvalidArgument(format!("unknown dispatcher: {name:?}")))
    }

    /// Returns the dispatcher named by `config.default_dispatcher`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the configured name is not
    /// registered.
    pub fn default_dispatcher(&self) -> Result<Arc<dyn Dispatcher>> {
        self.dispatcher(&self.config.default_dispatcher)
    }

    /// Registers `dispatcher` under `name`, replacing any existing entry
    /// with that name. The replaced dispatcher is not shut down; callers
    /// holding it may still use it.
    pub fn register_dispatcher(&self, name: impl Into<String>, dispatcher: Arc<dyn Dispatcher>) {
        self.dispatchers.write().insert(name.into(), dispatcher);
    }

    /// Shuts down every owned dispatcher, draining accepted tasks.
    pub fn shutdown(&self) {
        for dispatcher in self.dispatchers.read().values() {
            dispatcher.shutdown();
        }
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new(EnvironmentConfig::default())
    }
}

// ===========================================================================
// Tests
// ===========================================================================
