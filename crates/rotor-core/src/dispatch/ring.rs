//! Ring-buffer dispatcher.
//!
//! Bounded, pre-allocated slot ring with per-slot sequence numbers.
//! Producers claim a slot, write the task, then publish by advancing the
//! slot sequence; consumers claim in sequence order and release the slot a
//! lap ahead for reuse. Claim order is total even with multiple consumers;
//! task *completion* may interleave when more than one consumer thread is
//! configured.
//!
//! ## Design
//!
//! - Cache-line padded head/tail cursors prevent false sharing
//! - Power-of-2 capacity for fast modulo via bitmask
//! - Acquire/Release ordering on slot sequences; no locks on the hot path
//! - Backpressure by waiting: a full ring makes `dispatch` wait per the
//!   configured [`WaitStrategy`] instead of rejecting

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use super::{DispatchError, DispatchTask, Dispatcher};

static NEXT_RING_ID: AtomicU64 = AtomicU64::new(0);

/// How a blocked party (producer on full, consumer on empty) waits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStrategy {
    /// Busy-spin. Lowest latency, burns a core.
    Spin,
    /// Spin with `thread::yield_now`. The default trade-off.
    Yield,
    /// Park on a condvar. Lowest CPU, highest wake-up latency.
    Block,
}

/// Producer-side claim protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerMode {
    /// Any thread may dispatch; slots are claimed by CAS.
    Multi,
    /// Exactly one thread dispatches; the claim is a plain store. Undefined
    /// delivery order (but no unsafety) if violated, so this is only an
    /// optimization for callers that already serialize submission.
    Single,
}

// ---------------------------------------------------------------------------
// Ring storage
// ---------------------------------------------------------------------------

/// Pads a value to a cache line to prevent false sharing between the
/// producer and consumer cursors.
#[repr(C, align(64))]
struct CachePadded<T> {
    value: T,
}

impl<T> CachePadded<T> {
    const fn new(value: T) -> Self {
        Self { value }
    }
}

impl<T> std::ops::Deref for CachePadded<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.value
    }
}

struct Slot<T> {
    /// Slot state encoded as a sequence: `index` = free for lap N's
    /// producer, `index + 1` = published, `index + capacity` = free for the
    /// next lap.
    sequence: AtomicUsize,
    value: UnsafeCell<MaybeUninit<T>>,
}

/// Bounded multi-producer multi-consumer ring. Each slot carries its own
/// sequence, so producers and consumers synchronize per slot rather than
/// through a shared count.
struct RingBuffer<T> {
    slots: Box<[Slot<T>]>,
    capacity_mask: usize,
    head: CachePadded<AtomicUsize>,
    tail: CachePadded<AtomicUsize>,
    single_producer: bool,
}

// SAFETY: slots are only accessed by the claiming thread between claim and
// publish/release; the sequence protocol hands ownership across threads
// with Release/Acquire pairs.
#[allow(unsafe_code)]
unsafe impl<T: Send> Send for RingBuffer<T> {}
#[allow(unsafe_code)]
unsafe impl<T: Send> Sync for RingBuffer<T> {}

impl<T> RingBuffer<T> {
    /// Capacity is rounded up to the next power of 2.
    fn new(capacity: usize, single_producer: bool) -> Self {
        assert!(capacity > 0, "capacity must be > 0");
        let capacity = capacity.next_power_of_two();

        let slots: Vec<Slot<T>> = (0..capacity)
            .map(|i| Slot {
                sequence: AtomicUsize::new(i),
                value: UnsafeCell::new(MaybeUninit::uninit()),
            })
            .collect();

        Self {
            slots: slots.into_boxed_slice(),
            capacity_mask: capacity - 1,
            head: CachePadded::new(AtomicUsize::new(0)),
            tail: CachePadded::new(AtomicUsize::new(0)),
            single_producer,
        }
    }

    fn capacity(&self) -> usize {
        self.capacity_mask + 1
    }

    /// Claims, writes, and publishes one slot. Returns the item back if the
    /// ring is full.
    fn try_push(&self, item: T) -> Result<(), T> {
        loop {
            let tail = self.tail.load(Ordering::Relaxed);
            let slot = &self.slots[tail & self.capacity_mask];
            let seq = slot.sequence.load(Ordering::Acquire);
            let diff = seq as isize - tail as isize;

            if diff == 0 {
                let claimed = if self.single_producer {
                    self.tail.store(tail.wrapping_add(1), Ordering::Relaxed);
                    true
                } else {
                    self.tail
                        .compare_exchange_weak(
                            tail,
                            tail.wrapping_add(1),
                            Ordering::Relaxed,
                            Ordering::Relaxed,
                        )
                        .is_ok()
                };
                if claimed {
                    // SAFETY: the claim gives this thread exclusive write
                    // access to the slot until the sequence is advanced.
                    #[allow(unsafe_code)]
                    unsafe {
                        (*slot.value.get()).write(item);
                    }
                    slot.sequence.store(tail.wrapping_add(1), Ordering::Release);
                    return Ok(());
                }
            } else if diff < 0 {
                // Slot not yet released by the consumer a lap behind: full.
                return Err(item);
            }
            // diff > 0: stale tail, another producer advanced it. Retry.
        }
    }

    /// Claims and reads the next published slot, releasing it for the next
    /// lap. Returns `None` if the ring is empty.
    fn try_pop(&self) -> Option<T> {
        loop {
            let head = self.head.load(Ordering::Relaxed);
            let slot = &self.slots[head & self.capacity_mask];
            let seq = slot.sequence.load(Ordering::Acquire);
            let diff = seq as isize - head.wrapping_add(1) as isize;

            if diff == 0 {
                if self
                    .head
                    .compare_exchange_weak(
                        head,
                        head.wrapping_add(1),
                        Ordering::Relaxed,
                        Ordering::Relaxed,
                    )
                    .is_ok()
                {
                    // SAFETY: the claim gives this thread exclusive read
                    // access; the producer published this slot (sequence
                    // was head + 1).
                    #[allow(unsafe_code)]
                    let item = unsafe { (*slot.value.get()).assume_init_read() };
                    slot.sequence
                        .store(head.wrapping_add(self.capacity()), Ordering::Release);
                    return Some(item);
                }
            } else if diff < 0 {
                return None;
            }
            // diff > 0: stale head. Retry.
        }
    }
}

impl<T> Drop for RingBuffer<T> {
    fn drop(&mut self) {
        while self.try_pop().is_some() {}
    }
}

// ---------------------------------------------------------------------------
// RingBufferDispatcher
// ---------------------------------------------------------------------------

struct Shared {
    ring: RingBuffer<DispatchTask>,
    wait: WaitStrategy,
    closed: AtomicBool,
    /// Producers currently inside `dispatch`. Shutdown waits for this to
    /// reach zero so its final drain sees every accepted task.
    in_flight: AtomicUsize,
    lock: Mutex<()>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl Shared {
    fn wait_producer(&self) {
        match self.wait {
            WaitStrategy::Spin => std::hint::spin_loop(),
            WaitStrategy::Yield => std::thread::yield_now(),
            WaitStrategy::Block => {
                let mut guard = self.lock.lock();
                // Timed wait: closed and freed-slot signals can race the
                // park, so recheck periodically.
                self.not_full.wait_for(&mut guard, Duration::from_millis(1));
            }
        }
    }

    fn wait_consumer(&self) {
        match self.wait {
            WaitStrategy::Spin => std::hint::spin_loop(),
            WaitStrategy::Yield => std::thread::yield_now(),
            WaitStrategy::Block => {
                let mut guard = self.lock.lock();
                self.not_empty.wait_for(&mut guard, Duration::from_millis(1));
            }
        }
    }
}

/// Dispatches tasks through a pre-allocated ring with waiting backpressure.
///
/// One consumer thread gives totally ordered execution; more trade ordering
/// of completion for throughput while preserving claim order.
pub struct RingBufferDispatcher {
    shared: Arc<Shared>,
    consumers: Mutex<Vec<JoinHandle<()>>>,
}

impl RingBufferDispatcher {
    /// Single consumer, multi-producer ring with the given capacity
    /// (rounded up to a power of 2).
    #[must_use]
    pub fn new(capacity: usize, wait: WaitStrategy) -> Self {
        Self::with_options(capacity, wait, ProducerMode::Multi, 1)
    }

    /// Fully-configured ring. A zero consumer count is rounded up to one.
    #[must_use]
    pub fn with_options(
        capacity: usize,
        wait: WaitStrategy,
        mode: ProducerMode,
        consumers: usize,
    ) -> Self {
        let consumers = consumers.max(1);
        let ring_id = NEXT_RING_ID.fetch_add(1, Ordering::Relaxed);
        let shared = Arc::new(Shared {
            ring: RingBuffer::new(capacity, mode == ProducerMode::Single),
            wait,
            closed: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
            lock: Mutex::new(()),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        });

        let mut handles = Vec::with_capacity(consumers);
        for n in 0..consumers {
            let shared = Arc::clone(&shared);
            let spawned = std::thread::Builder::new()
                .name(format!("rotor-ring-{ring_id}-{n}"))
                .spawn(move || loop {
                    if let Some(task) = shared.ring.try_pop() {
                        if shared.wait == WaitStrategy::Block {
                            shared.not_full.notify_one();
                        }
                        task.run();
                        continue;
                    }
                    if shared.closed.load(Ordering::Acquire) {
                        // Closed and observed empty: drain residue and exit.
                        while let Some(task) = shared.ring.try_pop() {
                            task.run();
                        }
                        break;
                    }
                    shared.wait_consumer();
                });
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(_) => {
                    tracing::warn!(ring = ring_id, consumer = n, "failed to spawn ring consumer");
                }
            }
        }

        Self {
            shared,
            consumers: Mutex::new(handles),
        }
    }

    /// Returns the ring capacity after power-of-2 rounding.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.shared.ring.capacity()
    }
}

impl RingBufferDispatcher {
    fn push_until_accepted(&self, task: DispatchTask) -> Result<(), DispatchError> {
        let mut task = task;
        loop {
            // SeqCst pairs with the shutdown-side store: once shutdown has
            // observed zero in-flight producers, no later dispatch can miss
            // the closed flag.
            if self.shared.closed.load(Ordering::SeqCst) {
                return Err(DispatchError::Terminated);
            }
            match self.shared.ring.try_push(task) {
                Ok(()) => {
                    if self.shared.wait == WaitStrategy::Block {
                        self.shared.not_empty.notify_one();
                    }
                    return Ok(());
                }
                Err(returned) => {
                    // Full: backpressure by waiting, not rejection.
                    task = returned;
                    self.shared.wait_producer();
                }
            }
        }
    }
}

impl Dispatcher for RingBufferDispatcher {
    fn dispatch(&self, task: DispatchTask) -> Result<(), DispatchError> {
        self.shared.in_flight.fetch_add(1, Ordering::SeqCst);
        let result = self.push_until_accepted(task);
        self.shared.in_flight.fetch_sub(1, Ordering::Release);
        result
    }

    fn alive(&self) -> bool {
        !self.shared.closed.load(Ordering::Acquire)
    }

    fn shutdown(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        self.shared.not_full.notify_all();

        // Wait out producers that passed the closed check before the store:
        // their pushes must land before the final drain below.
        while self.shared.in_flight.load(Ordering::SeqCst) != 0 {
            std::thread::yield_now();
        }

        self.shared.not_empty.notify_all();
        let handles: Vec<JoinHandle<()>> = self.consumers.lock().drain(..).collect();
        for handle in handles {
            if handle.join().is_err() {
                tracing::warn!("ring dispatcher consumer panicked during drain");
            }
        }

        // Consumers can exit between a racing producer's publish and the
        // joins above; run whatever they left behind.
        while let Some(task) = self.shared.ring.try_pop() {
            task.run();
        }
    }
}

impl Drop for RingBufferDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ===========================================================================
// Tests
// ===========================================================================
