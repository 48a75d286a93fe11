//! Payload conversion — the explicit `TryConvert` capability.
//!
//! Converters let the invoker satisfy a consumer whose accepted payload type
//! differs from what a candidate argument carries. The registry holds an
//! ordered converter list and a bounded route cache mapping
//! `(source, target)` type pairs to the converter that serves them, so the
//! linear scan happens once per pair rather than once per invocation.

use std::any::{Any, TypeId};
use std::sync::Arc;

use fxhash::FxHashMap;
use parking_lot::Mutex;

use crate::event::Payload;

/// Default capacity of the conversion route cache.
const DEFAULT_ROUTE_CACHE_CAPACITY: usize = 256;

// ---------------------------------------------------------------------------
// TryConvert
// ---------------------------------------------------------------------------

/// Converts payload values from one concrete type to another.
pub trait TryConvert: Send + Sync {
    /// The source type this converter reads.
    fn source_type(&self) -> TypeId;

    /// The target type this converter produces.
    fn target_type(&self) -> TypeId;

    /// Converts `value`, which must be of the source type.
    ///
    /// Returns `None` if `value` is not of the source type or the
    /// conversion is not possible for this particular value.
    fn convert(&self, value: &(dyn Any + Send + Sync)) -> Option<Payload>;
}

struct ConvertFn<S, T, F> {
    f: F,
    _marker: std::marker::PhantomData<fn(&S) -> T>,
}

impl<S, T, F> TryConvert for ConvertFn<S, T, F>
where
    S: Any + Send + Sync,
    T: Any + Send + Sync,
    F: Fn(&S) -> T + Send + Sync,
{
    fn source_type(&self) -> TypeId {
        TypeId::of::<S>()
    }

    fn target_type(&self) -> TypeId {
        TypeId::of::<T>()
    }

    fn convert(&self, value: &(dyn Any + Send + Sync)) -> Option<Payload> {
        let s = value.downcast_ref::<S>()?;
        Some(Arc::new((self.f)(s)))
    }
}

/// Wraps a closure as a [`TryConvert`] from `S` to `T`.
pub fn convert_fn<S, T, F>(f: F) -> Arc<dyn TryConvert>
where
    S: Any + Send + Sync,
    T: Any + Send + Sync,
    F: Fn(&S) -> T + Send + Sync + 'static,
{
    Arc::new(ConvertFn { f, _marker: std::marker::PhantomData })
}

// ---------------------------------------------------------------------------
// ConverterRegistry
// ---------------------------------------------------------------------------

/// An ordered collection of converters with a bounded route cache.
///
/// Lookup order is registration order; the first converter whose
/// source/target pair fits wins. Negative results are cached too, so
/// repeated misses stay cheap. The cache is evicted wholesale when it
/// reaches capacity — an explicit bound rather than a GC-driven weak map.
pub struct ConverterRegistry {
    converters: Vec<Arc<dyn TryConvert>>,
    route_cache: Mutex<FxHashMap<(TypeId, TypeId), Option<usize>>>,
    cache_capacity: usize,
}

impl ConverterRegistry {
    /// Creates an empty registry with the default cache capacity.
    #[must_use]
    pub fn new() -> Self {
        Self {
            converters: Vec::new(),
            route_cache: Mutex::new(FxHashMap::default()),
            cache_capacity: DEFAULT_ROUTE_CACHE_CAPACITY,
        }
    }

    /// Adds `converter` to the end of the lookup order.
    #[must_use]
    pub fn with(mut self, converter: Arc<dyn TryConvert>) -> Self {
        self.converters.push(converter);
        self
    }

    /// Returns `true` if a registered converter maps `from` to `to`.
    #[must_use]
    pub fn can_convert(&self, from: TypeId, to: TypeId) -> bool {
        self.route(from, to).is_some()
    }

    /// Converts `value` to type `to`, if a converter exists.
    #[must_use]
    pub fn convert(&self, value: &(dyn Any + Send + Sync), to: TypeId) -> Option<Payload> {
        let index = self.route(value.type_id(), to)?;
        self.converters[index].convert(value)
    }

    /// Returns the number of registered converters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.converters.len()
    }

    /// Returns `true` if no converters are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.converters.is_empty()
    }

    fn route(&self, from: TypeId, to: TypeId) -> Option<usize> {
        if self.converters.is_empty() {
            return None;
        }

        let mut cache = self.route_cache.lock();
        if let Some(cached) = cache.get(&(from, to)) {
            return *cached;
        }

        let found = self
            .converters
            .iter()
            .position(|c| c.source_type() == from && c.target_type() == to);

        if cache.len() >= self.cache_capacity {
            cache.clear();
        }
        cache.insert((from, to), found);
        found
    }
}

impl Default for ConverterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ===========================================================================
// Tests
// ===========================================================================
