//! Worker-pool dispatcher.
//!
//! N named workers pull tasks from a shared channel. Throughput over
//! ordering: two tasks may run concurrently and complete in any order, so
//! consumers reachable through this dispatcher must tolerate concurrent
//! invocation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;

use super::{DispatchError, DispatchTask, Dispatcher};

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(0);

/// Dispatches tasks to a fixed-size pool of worker threads. No ordering
/// guarantee across tasks.
pub struct ThreadPoolDispatcher {
    sender: Mutex<Option<mpsc::Sender<DispatchTask>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl ThreadPoolDispatcher {
    /// Creates a pool with `workers` threads. A zero worker count is
    /// rounded up to one.
    #[must_use]
    pub fn new(workers: usize) -> Self {
        let workers = workers.max(1);
        let pool_id = NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel::<DispatchTask>();
        let rx = Arc::new(Mutex::new(rx));

        let mut handles = Vec::with_capacity(workers);
        for n in 0..workers {
            let rx = Arc::clone(&rx);
            let spawned = std::thread::Builder::new()
                .name(format!("rotor-pool-{pool_id}-{n}"))
                .spawn(move || loop {
                    // Release the receiver lock before running the task so
                    // other workers can pull concurrently.
                    let next = rx.lock().recv();
                    match next {
                        Ok(task) => task.run(),
                        Err(_) => break,
                    }
                });
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(_) => {
                    tracing::warn!(pool = pool_id, worker = n, "failed to spawn pool worker");
                }
            }
        }

        Self {
            sender: Mutex::new((!handles.is_empty()).then_some(tx)),
            workers: Mutex::new(handles),
        }
    }
}

impl Dispatcher for ThreadPoolDispatcher {
    fn dispatch(&self, task: DispatchTask) -> Result<(), DispatchError> {
        match self.sender.lock().as_ref() {
            Some(tx) => tx.send(task).map_err(|_| DispatchError::Terminated),
            None => Err(DispatchError::Terminated),
        }
    }

    fn alive(&self) -> bool {
        self.sender.lock().is_some()
    }

    fn shutdown(&self) {
        drop(self.sender.lock().take());
        let handles: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        for handle in handles {
            if handle.join().is_err() {
                tracing::warn!("pool dispatcher worker panicked during drain");
            }
        }
    }
}

impl Drop for ThreadPoolDispatcher {
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
    use std::collections::HashSet;
    use std::sync::atomic::AtomicUsize;

    fn task(registry: Arc<Registry>, payload: u32) -> DispatchTask {
        DispatchTask {
            key: Key::from("k"),
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
    fn test_all_tasks_run_exactly_once() {
        let registry = Arc::new(Registry::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let out = Arc::clone(&seen);
        registry.register(
            Selector::exact("k"),
            event_fn(move |ev| {
                if let Some(n) = ev.downcast_ref::<u32>() {
                    out.lock().push(*n);
                }
            }),
        );

        let d = ThreadPoolDispatcher::new(4);
        for n in 0..100 {
            d.dispatch(task(Arc::clone(&registry), n)).unwrap();
        }
        d.shutdown();

        let got: HashSet<u32> = seen.lock().iter().copied().collect();
        assert_eq!(seen.lock().len(), 100);
        assert_eq!(got, (0..100).collect::<HashSet<u32>>());
    }

    #[test]
    fn test_work_spreads_across_workers() {
        let registry = Arc::new(Registry::new());
        let threads = Arc::new(Mutex::new(HashSet::new()));
        let out = Arc::clone(&threads);
        registry.register(
            Selector::exact("k"),
            event_fn(move |_| {
                out.lock().insert(std::thread::current().id());
                std::thread::sleep(std::time::Duration::from_millis(1));
            }),
        );

        let d = ThreadPoolDispatcher::new(4);
        for n in 0..40 {
            d.dispatch(task(Arc::clone(&registry), n)).unwrap();
        }
        d.shutdown();

        assert!(threads.lock().len() > 1, "expected more than one worker to run tasks");
    }

    #[test]
    fn test_rejects_after_shutdown() {
        let registry = Arc::new(Registry::new());
        let d = ThreadPoolDispatcher::new(2);
        d.shutdown();
        assert!(!d.alive());
        assert!(matches!(
            d.dispatch(task(registry, 0)),
            Err(DispatchError::Terminated)
        ));
    }

    #[test]
    fn test_zero_workers_rounds_up() {
        let registry = Arc::new(Registry::new());
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        registry.register(
            Selector::exact("k"),
            event_fn(move |_| { seen.fetch_add(1, Ordering::SeqCst); }),
        );

        let d = ThreadPoolDispatcher::new(0);
        d.dispatch(task(registry, 1)).unwrap();
        d.shutdown();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
