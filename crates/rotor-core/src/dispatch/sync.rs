//! Synchronous dispatcher — runs the task inline on the caller's thread.

use std::sync::atomic::{AtomicBool, Ordering};

use super::{DispatchError, DispatchTask, Dispatcher};

/// Executes every task inline before `dispatch` returns. Total ordering,
/// zero threads, no backpressure to manage.
#[derive(Debug)]
pub struct SynchronousDispatcher {
    alive: AtomicBool,
}

impl SynchronousDispatcher {
    /// Creates a live synchronous dispatcher.
    #[must_use]
    pub fn new() -> Self {
        Self { alive: AtomicBool::new(true) }
    }
}

impl Default for SynchronousDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher for SynchronousDispatcher {
    fn dispatch(&self, task: DispatchTask) -> Result<(), DispatchError> {
        if !self.alive() {
            return Err(DispatchError::Terminated);
        }
        task.run();
        Ok(())
    }

    fn alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    fn shutdown(&self) {
        self.alive.store(false, Ordering::Release);
    }
}
