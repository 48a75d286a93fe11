//! Match-list filters — routing strategies applied between selection and
//! invocation.
//!
//! A [`Filter`] narrows the registry's match list before the router invokes
//! anybody: broadcast ([`PassThroughFilter`]), first-wins
//! ([`FirstFilter`]), random single delivery ([`RandomFilter`]), and
//! round-robin single delivery ([`RoundRobinFilter`]).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rand::RngExt;

use crate::key::Key;
use crate::registry::Registration;

/// Narrows a match list to the registrations that should actually be
/// invoked for one routing pass.
pub trait Filter: Send + Sync {
    /// Filters `matches` for delivery at `key`. Order of the returned list
    /// is delivery order.
    fn filter(&self, matches: Vec<Arc<Registration>>, key: &Key) -> Vec<Arc<Registration>>;
}

/// Delivers to every match, in registration order.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassThroughFilter;

impl Filter for PassThroughFilter {
    fn filter(&self, matches: Vec<Arc<Registration>>, _key: &Key) -> Vec<Arc<Registration>> {
        matches
    }
}

/// Delivers to the first match only.
#[derive(Debug, Default, Clone, Copy)]
pub struct FirstFilter;

impl Filter for FirstFilter {
    fn filter(&self, mut matches: Vec<Arc<Registration>>, _key: &Key) -> Vec<Arc<Registration>> {
        matches.truncate(1);
        matches
    }
}

/// Delivers to one uniformly-random match.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomFilter;

impl Filter for RandomFilter {
    fn filter(&self, mut matches: Vec<Arc<Registration>>, _key: &Key) -> Vec<Arc<Registration>> {
        if matches.len() > 1 {
            let pick = rand::rng().random_range(0..matches.len());
            matches.swap(0, pick);
            matches.truncate(1);
        }
        matches
    }
}

/// Delivers to one match, rotating through the list across successive
/// routing passes.
///
/// The cursor is a single counter shared across keys; fairness is per
/// filter instance, not per key.
#[derive(Debug, Default)]
pub struct RoundRobinFilter {
    next: AtomicUsize,
}

impl RoundRobinFilter {
    /// Creates a round-robin filter with its cursor at the first position.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Filter for RoundRobinFilter {
    fn filter(&self, mut matches: Vec<Arc<Registration>>, _key: &Key) -> Vec<Arc<Registration>> {
        if matches.len() > 1 {
            let turn = self.next.fetch_add(1, Ordering::Relaxed);
            let pick = turn % matches.len();
            matches.swap(0, pick);
            matches.truncate(1);
        }
        matches
    }
}

// ===========================================================================
// Tests
// ===========================================================================
