//! Registration registry — selector-to-consumer bindings with a cached
//! match path.
//!
//! The registry keeps registrations in insertion order (the delivery-order
//! contract) and answers `select(key)` from a key-indexed cache of
//! selector-level matches so high-frequency notification does not
//! re-evaluate every selector.
//!
//! # Thread safety
//!
//! - `select` / `matches` take read locks only (and one short cache write on
//!   a miss); concurrent readers share cached entries.
//! - `register` / `unregister` serialize on the write lock, bump the
//!   generation counter, and clear the cache. A concurrent `select` only
//!   publishes a computed entry when the generation is unchanged, so no
//!   reader can install a stale entry after a mutation wiped the cache.
//! - Pause and cancellation are atomic flags on the registration itself,
//!   (re)checked on every `select`; a flag flip is visible to the next
//!   select without touching the cache.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use fxhash::FxHashMap;
use parking_lot::RwLock;
use smallvec::SmallVec;

use crate::consumer::Consumer;
use crate::key::Key;
use crate::selector::Selector;

/// Match list returned by [`Registry::select`]. Inline capacity covers the
/// common small fan-out without allocating.
pub type Matches = SmallVec<[Arc<Registration>; 4]>;

// ---------------------------------------------------------------------------
// RegistrationId
// ---------------------------------------------------------------------------

/// Unique registration identifier, monotonically assigned per registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegistrationId(u64);

impl std::fmt::Display for RegistrationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "reg-{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Registration
// ---------------------------------------------------------------------------

/// A live binding of a selector to a consumer.
///
/// Shared handle: the registry and any caller-held clone refer to the same
/// lifecycle flags, so `pause`/`resume`/`cancel` on a held handle take
/// effect immediately, including for cached match lists.
pub struct Registration {
    id: RegistrationId,
    selector: Selector,
    consumer: Arc<dyn Consumer>,
    cancelled: AtomicBool,
    paused: AtomicBool,
    cancel_after_use: AtomicBool,
}

impl Registration {
    fn new(id: RegistrationId, selector: Selector, consumer: Arc<dyn Consumer>) -> Self {
        Self {
            id,
            selector,
            consumer,
            cancelled: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            cancel_after_use: AtomicBool::new(false),
        }
    }

    /// Returns this registration's identity.
    #[must_use]
    pub fn id(&self) -> RegistrationId {
        self.id
    }

    /// Returns the selector.
    #[must_use]
    pub fn selector(&self) -> &Selector {
        &self.selector
    }

    /// Returns the consumer.
    #[must_use]
    pub fn consumer(&self) -> &Arc<dyn Consumer> {
        &self.consumer
    }

    /// Marks this registration for automatic removal after its next
    /// inclusion in a match result.
    pub fn cancel_after_use(&self) {
        self.cancel_after_use.store(true, Ordering::Release);
    }

    /// Returns `true` if this registration auto-cancels after use.
    #[must_use]
    pub fn is_cancel_after_use(&self) -> bool {
        self.cancel_after_use.load(Ordering::Acquire)
    }

    /// Pauses this registration. Paused registrations keep their order
    /// position but are excluded from match results.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::Release);
    }

    /// Resumes a paused registration.
    pub fn resume(&self) {
        self.paused.store(false, Ordering::Release);
    }

    /// Returns `true` if paused.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// Cancels this registration permanently.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Returns `true` if cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Claims a cancel-after-use registration for exactly one delivery.
    /// Returns `true` for the single winning caller. Called by registry
    /// selection and by pinned-list delivery.
    pub(crate) fn claim_single_use(&self) -> bool {
        self.cancelled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("id", &self.id)
            .field("selector", &self.selector)
            .field("cancelled", &self.is_cancelled())
            .field("paused", &self.is_paused())
            .field("cancel_after_use", &self.is_cancel_after_use())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Insertion-ordered registration collection with a key-indexed match
/// cache.
pub struct Registry {
    registrations: RwLock<Vec<Arc<Registration>>>,
    /// key → selector-level matches (lifecycle flags applied per select).
    cache: RwLock<FxHashMap<Key, Arc<Vec<Arc<Registration>>>>>,
    /// Bumped on every membership mutation; guards cache publication.
    generation: AtomicU64,
    next_id: AtomicU64,
}

impl Registry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            registrations: RwLock::new(Vec::new()),
            cache: RwLock::new(FxHashMap::default()),
            generation: AtomicU64::new(0),
            next_id: AtomicU64::new(1),
        }
    }

    /// Registers `consumer` under `selector`. The returned handle shares
    /// lifecycle flags with the registry's copy.
    pub fn register(&self, selector: Selector, consumer: Arc<dyn Consumer>) -> Arc<Registration> {
        let id = RegistrationId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let reg = Arc::new(Registration::new(id, selector, consumer));

        {
            let mut regs = self.registrations.write();
            regs.retain(|r| !r.is_cancelled());
            regs.push(Arc::clone(&reg));
        }
        self.invalidate();
        reg
    }

    /// Cancels and removes the registration with `id`. Returns `true` if it
    /// existed and was still live.
    pub fn unregister(&self, id: RegistrationId) -> bool {
        let mut removed = false;
        {
            let mut regs = self.registrations.write();
            if let Some(reg) = regs.iter().find(|r| r.id() == id) {
                removed = !reg.is_cancelled();
                reg.cancel();
            }
            regs.retain(|r| !r.is_cancelled());
        }
        self.invalidate();
        removed
    }

    /// Returns the registrations matching `key`, in registration order.
    ///
    /// Cancelled and paused registrations are excluded. A cancel-after-use
    /// registration is claimed atomically: it appears in exactly one select
    /// result across all concurrent callers.
    #[must_use]
    pub fn select(&self, key: &Key) -> Matches {
        let matched = self.selector_matches(key);

        let mut out = Matches::new();
        for reg in matched.iter() {
            if reg.is_paused() {
                continue;
            }
            if reg.is_cancel_after_use() {
                if reg.claim_single_use() {
                    out.push(Arc::clone(reg));
                }
                continue;
            }
            if reg.is_cancelled() {
                continue;
            }
            out.push(Arc::clone(reg));
        }
        out
    }

    /// Returns the live registrations matching `key` without claiming
    /// cancel-after-use entries. Backs pinned match lists.
    #[must_use]
    pub fn snapshot(&self, key: &Key) -> Vec<Arc<Registration>> {
        self.selector_matches(key)
            .iter()
            .filter(|r| !r.is_cancelled())
            .cloned()
            .collect()
    }

    /// Returns `true` if at least one live, non-paused registration matches
    /// `key`. Does not claim cancel-after-use registrations.
    #[must_use]
    pub fn matches(&self, key: &Key) -> bool {
        self.selector_matches(key)
            .iter()
            .any(|r| !r.is_cancelled() && !r.is_paused())
    }

    /// Returns the number of live registrations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.registrations.read().iter().filter(|r| !r.is_cancelled()).count()
    }

    /// Returns `true` if no live registrations exist.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Selector-level matches for `key`, from cache or recomputed.
    fn selector_matches(&self, key: &Key) -> Arc<Vec<Arc<Registration>>> {
        if let Some(hit) = self.cache.read().get(key) {
            return Arc::clone(hit);
        }

        let generation = self.generation.load(Ordering::Acquire);
        let computed: Arc<Vec<Arc<Registration>>> = {
            let regs = self.registrations.read();
            Arc::new(
                regs.iter()
                    .filter(|r| r.selector().matches(key))
                    .cloned()
                    .collect(),
            )
        };

        let mut cache = self.cache.write();
        if self.generation.load(Ordering::Acquire) == generation {
            cache.insert(key.clone(), Arc::clone(&computed));
        }
        computed
    }

    /// Generation bump + full cache clear. Runs after every membership
    /// mutation, before readers could observe the cache again.
    fn invalidate(&self) {
        self.generation.fetch_add(1, Ordering::Release);
        self.cache.write().clear();
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

// ===========================================================================
// Tests
// ===========================================================================
