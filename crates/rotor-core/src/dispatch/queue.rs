//! Single-worker queue dispatcher.
//!
//! One named worker thread drains a channel of tasks in submission order,
//! giving total ordering without blocking the caller. The queue is
//! unbounded by default; bounded variants either block the producer until
//! space frees or reject with [`DispatchError::QueueFull`].
//!
//! Shutdown drops the sender; the worker drains everything already
//! accepted, then exits and is joined.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::thread::JoinHandle;

use parking_lot::Mutex;

use super::{DispatchError, DispatchTask, Dispatcher};

static NEXT_QUEUE_ID: AtomicU64 = AtomicU64::new(0);

enum Tx {
    Unbounded(mpsc::Sender<DispatchTask>),
    /// Blocks the producer while the queue is at capacity.
    Bounded(mpsc::SyncSender<DispatchTask>),
    /// Fails fast with `QueueFull` while the queue is at capacity.
    Rejecting(mpsc::SyncSender<DispatchTask>, usize),
}

/// Dispatches tasks to a single worker thread in submission order.
pub struct QueueDispatcher {
    sender: Mutex<Option<Tx>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl QueueDispatcher {
    /// Creates an unbounded queue dispatcher.
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        Self::start(Tx::Unbounded(tx), rx)
    }

    /// Creates a bounded queue dispatcher that blocks the producer while
    /// `capacity` tasks are queued.
    #[must_use]
    pub fn bounded(capacity: usize) -> Self {
        let (tx, rx) = mpsc::sync_channel(capacity);
        Self::start(Tx::Bounded(tx), rx)
    }

    /// Creates a bounded queue dispatcher that rejects with
    /// [`DispatchError::QueueFull`] while `capacity` tasks are queued.
    #[must_use]
    pub fn bounded_rejecting(capacity: usize) -> Self {
        let (tx, rx) = mpsc::sync_channel(capacity);
        Self::start(Tx::Rejecting(tx, capacity), rx)
    }

    fn start(tx: Tx, rx: mpsc::Receiver<DispatchTask>) -> Self {
        let id = NEXT_QUEUE_ID.fetch_add(1, Ordering::Relaxed);
        let worker = std::thread::Builder::new()
            .name(format!("rotor-queue-{id}"))
            .spawn(move || {
                while let Ok(task) = rx.recv() {
                    task.run();
                }
                tracing::debug!(queue = id, "queue dispatcher worker exiting");
            })
            .ok();

        if worker.is_none() {
            tracing::warn!(queue = id, "failed to spawn queue dispatcher worker");
        }

        Self {
            sender: Mutex::new(worker.is_some().then_some(tx)),
            worker: Mutex::new(worker),
        }
    }
}

impl Default for QueueDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher for QueueDispatcher {
    fn dispatch(&self, task: DispatchTask) -> Result<(), DispatchError> {
        let sender = self.sender.lock();
        match sender.as_ref() {
            None => Err(DispatchError::Terminated),
            Some(Tx::Unbounded(tx)) => {
                tx.send(task).map_err(|_| DispatchError::Terminated)
            }
            Some(Tx::Bounded(tx)) => tx.send(task).map_err(|_| DispatchError::Terminated),
            Some(Tx::Rejecting(tx, capacity)) => match tx.try_send(task) {
                Ok(()) => Ok(()),
                Err(mpsc::TrySendError::Full(_)) => {
                    Err(DispatchError::QueueFull { capacity: *capacity })
                }
                Err(mpsc::TrySendError::Disconnected(_)) => Err(DispatchError::Terminated),
            },
        }
    }

    fn alive(&self) -> bool {
        self.sender.lock().is_some()
    }

    fn shutdown(&self) {
        // Dropping the sender closes the channel; the worker drains and
        // exits.
        drop(self.sender.lock().take());
        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                tracing::warn!("queue dispatcher worker panicked during drain");
            }
        }
    }
}

impl Drop for QueueDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::event_fn;
    use crate::dispatch::MatchSource;
    use crate::event::Event;
    use crate::filter::PassThroughFilter;
    use crate::key::Key;
    use crate::registry::Registry;
    use crate::router::{ArgResolvingInvoker, FilteringRouter};
    use crate::selector::Selector;
    use std::sync::Arc;

    fn task(registry: Arc<Registry>, key: &str, payload: u32) -> DispatchTask {
        DispatchTask {
            key: Key::from(key),
            event: Event::wrap(payload),
            matches: MatchSource::Registry(registry),
            router: Arc::new(FilteringRouter::new(
                Arc::new(PassThroughFilter),
                Arc::new(ArgResolvingInvoker::new()),
            )),
            error_handler: None,
            completion: None,
        }
    }

    #[test]
    fn test_preserves_submission_order() {
        let registry = Arc::new(Registry::new());
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let out = Arc::clone(&seen);
        registry.register(
            Selector::exact("k"),
            event_fn(move |ev| {
                if let Some(n) = ev.downcast_ref::<u32>() {
                    out.lock().push(*n);
                }
            }),
        );

        let d = QueueDispatcher::new();
        for n in 0..50 {
            d.dispatch(task(Arc::clone(&registry), "k", n)).unwrap();
        }
        d.shutdown();

        assert_eq!(*seen.lock(), (0..50).collect::<Vec<u32>>());
    }

    #[test]
    fn test_shutdown_drains_then_rejects() {
        let registry = Arc::new(Registry::new());
        let count = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        registry.register(
            Selector::exact("k"),
            event_fn(move |_| { seen.fetch_add(1, Ordering::SeqCst); }),
        );

        let d = QueueDispatcher::new();
        for _ in 0..10 {
            d.dispatch(task(Arc::clone(&registry), "k", 0)).unwrap();
        }
        d.shutdown();
        assert_eq!(count.load(Ordering::SeqCst), 10);

        assert!(!d.alive());
        assert!(matches!(
            d.dispatch(task(registry, "k", 0)),
            Err(DispatchError::Terminated)
        ));
    }

    #[test]
    fn test_bounded_rejects_when_full() {
        let registry = Arc::new(Registry::new());
        // A consumer that blocks the worker so tasks pile up.
        let gate = Arc::new(parking_lot::Mutex::new(()));
        let held = gate.lock();
        let worker_gate = Arc::clone(&gate);
        registry.register(
            Selector::exact("k"),
            event_fn(move |_| { drop(worker_gate.lock()); }),
        );

        let d = QueueDispatcher::bounded_rejecting(2);
        // First task occupies the worker; next two fill the queue.
        let mut accepted = 0;
        let mut full = 0;
        for _ in 0..8 {
            match d.dispatch(task(Arc::clone(&registry), "k", 0)) {
                Ok(()) => accepted += 1,
                Err(DispatchError::QueueFull { capacity }) => {
                    assert_eq!(capacity, 2);
                    full += 1;
                }
                Err(e) => panic!("unexpected: {e}"),
            }
        }
        assert!(accepted >= 2);
        assert!(full >= 1);

        drop(held);
        d.shutdown();
    }

    #[test]
    fn test_bounded_blocks_producer_until_space_frees() {
        let registry = Arc::new(Registry::new());
        let count = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        registry.register(
            Selector::exact("k"),
            event_fn(move |_| {
                std::thread::sleep(std::time::Duration::from_millis(1));
                seen.fetch_add(1, Ordering::SeqCst);
            }),
        );

        let d = Arc::new(QueueDispatcher::bounded(2));
        let producer_d = Arc::clone(&d);
        let producer = std::thread::spawn(move || {
            for _ in 0..20 {
                producer_d
                    .dispatch(task(Arc::clone(&registry), "k", 0))
                    .unwrap();
            }
        });

        producer.join().unwrap();
        d.shutdown();
        assert_eq!(count.load(Ordering::SeqCst), 20);
    }

    #[test]
    fn test_shutdown_idempotent() {
        let d = QueueDispatcher::new();
        d.shutdown();
        d.shutdown();
        assert!(!d.alive());
    }
}
