//! Per-pool schema load accounting: available counts, outstanding leases, generations.

use crate::cache::PoolId;
use crate::error::AllocError;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::time::{Duration, Instant};

/// One schema's current tenant count, tagged with the cache generation it was
/// built in. Ordered by ascending count, name as tiebreak, so a min-heap of
/// these always yields the least-populated schema.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct SchemaLoad {
    pub(crate) name: String,
    pub(crate) count: u32,
    pub(crate) generation: u64,
}

impl Ord for SchemaLoad {
    fn cmp(&self, other: &Self) -> Ordering {
        self.count
            .cmp(&other.count)
            .then_with(|| self.name.cmp(&other.name))
    }
}

impl PartialOrd for SchemaLoad {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Outcome of one pass over a pool's available schemas.
pub(crate) enum NextSchema {
    /// A schema was moved to the leased set; its count is already incremented.
    Granted(String),
    /// Nothing available and nothing leased: the cached counts are useless.
    Exhausted,
    /// A repopulation superseded the counts this pass started from.
    Stale,
}

/// Lock-guarded portion of a pool's cache entry.
#[derive(Debug, Default)]
pub(crate) struct PoolInner {
    available: BinaryHeap<Reverse<SchemaLoad>>,
    leased: HashMap<String, SchemaLoad>,
    pub(crate) generation: u64,
    last_refreshed: Option<Instant>,
}

/// Cached schema counts for one connection pool. A name is in at most one of
/// `available` or `leased`; every live entry carries the current generation.
/// Never handed out of the crate, so all access goes through these methods and
/// the `inner` lock. `deprecated` is the one field readable without it.
#[derive(Debug)]
pub(crate) struct PoolSchemaState {
    pool_id: PoolId,
    inner: Mutex<PoolInner>,
    freed: Condvar,
    deprecated: AtomicBool,
}

impl PoolSchemaState {
    /// Starts deprecated at generation 0 (no valid entries), so the first
    /// acquire always runs the counting query.
    pub(crate) fn new(pool_id: PoolId) -> Self {
        PoolSchemaState {
            pool_id,
            inner: Mutex::new(PoolInner::default()),
            freed: Condvar::new(),
            deprecated: AtomicBool::new(true),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, PoolInner> {
        self.inner.lock()
    }

    /// Lock-free probe; only ever a hint, real work re-checks under the lock.
    pub(crate) fn is_deprecated(&self) -> bool {
        self.deprecated.load(AtomicOrdering::Acquire)
    }

    /// Whether the cached counts may still be served against.
    pub(crate) fn accessible(&self, inner: &PoolInner, ttl: Option<Duration>) -> bool {
        if self.is_deprecated() {
            return false;
        }
        match inner.last_refreshed {
            None => false,
            Some(at) => ttl.map_or(true, |ttl| at.elapsed() <= ttl),
        }
    }

    /// Replace all cached counts with a fresh result of the counting query.
    /// Bumps the generation, which strands every outstanding lease, and wakes
    /// blocked acquirers so they re-run against the new counts.
    pub(crate) fn initialize_with(&self, inner: &mut PoolInner, counts: HashMap<String, u32>) {
        inner.available.clear();
        inner.leased.clear();
        inner.generation += 1;
        let generation = inner.generation;
        for (name, count) in counts {
            inner.available.push(Reverse(SchemaLoad {
                name,
                count,
                generation,
            }));
        }
        inner.last_refreshed = Some(Instant::now());
        self.deprecated.store(false, AtomicOrdering::Release);
        tracing::debug!(
            "pool {}: cached {} schema counts at generation {}",
            self.pool_id,
            inner.available.len(),
            generation
        );
        self.freed.notify_all();
    }

    /// Drop all cached counts and mark the pool for re-query. The generation
    /// bump strands outstanding leases; their release becomes a no-op.
    pub(crate) fn mark_deprecated(&self) {
        let mut inner = self.inner.lock();
        inner.available.clear();
        inner.leased.clear();
        inner.generation += 1;
        self.deprecated.store(true, AtomicOrdering::Release);
        tracing::debug!(
            "pool {}: cache invalidated, now at generation {}",
            self.pool_id,
            inner.generation
        );
        self.freed.notify_all();
    }

    /// Forget the freshness stamp so the next acquire re-runs the counting
    /// query even inside the TTL window.
    pub(crate) fn invalidate_freshness(&self, inner: &mut PoolInner) {
        inner.last_refreshed = None;
    }

    /// Pick the least-populated schema below `max_contexts`, increment it and
    /// move it to the leased set. Blocks on `freed` while every candidate is
    /// leased out; a deadline bounds that wait when given. The caller holds
    /// the lock via `inner` and must treat [`NextSchema::Stale`] as "start
    /// over from the freshness check".
    pub(crate) fn next_schema(
        &self,
        inner: &mut MutexGuard<'_, PoolInner>,
        max_contexts: u32,
        deadline: Option<Instant>,
    ) -> Result<NextSchema, AllocError> {
        if self.is_deprecated() {
            // Deprecated between the caller's freshness check and here.
            return Ok(NextSchema::Exhausted);
        }
        let target_generation = inner.generation;
        loop {
            if let Some(Reverse(mut load)) = inner.available.pop() {
                if load.count < max_contexts {
                    load.count += 1;
                    let name = load.name.clone();
                    tracing::trace!(
                        "pool {}: leased schema {} at count {}",
                        self.pool_id,
                        name,
                        load.count
                    );
                    inner.leased.insert(name.clone(), load);
                    return Ok(NextSchema::Granted(name));
                }
                // Min-heap: the head at or above the bound means everything
                // still in `available` is too. The popped entry stays out of
                // consideration until the next repopulation.
            }
            if inner.leased.is_empty() {
                return Ok(NextSchema::Exhausted);
            }
            // Leased schemas may come back below the bound; wait for a release.
            match deadline {
                Some(deadline) => {
                    if self.freed.wait_until(inner, deadline).timed_out() {
                        return Err(AllocError::WaitTimeout {
                            pool_id: self.pool_id,
                        });
                    }
                }
                None => self.freed.wait(inner),
            }
            if inner.generation != target_generation {
                return Ok(NextSchema::Stale);
            }
        }
    }

    /// Return a leased schema to the available set. A generation mismatch
    /// means a repopulation superseded the lease: nothing to put back, but
    /// waiters are still woken. `decrement` undoes the speculative increment
    /// taken at acquire time.
    pub(crate) fn release_schema(&self, name: &str, decrement: bool, generation: u64) {
        let mut inner = self.inner.lock();
        if inner.generation == generation {
            if let Some(mut load) = inner.leased.remove(name) {
                if decrement {
                    load.count = load.count.saturating_sub(1);
                }
                debug_assert_eq!(load.generation, inner.generation);
                tracing::trace!(
                    "pool {}: schema {} returned at count {}",
                    self.pool_id,
                    name,
                    load.count
                );
                inner.available.push(Reverse(load));
            }
        } else {
            tracing::trace!(
                "pool {}: stale release of {} (generation {} != {})",
                self.pool_id,
                name,
                generation,
                inner.generation
            );
        }
        self.freed.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn load(name: &str, count: u32) -> SchemaLoad {
        SchemaLoad {
            name: name.into(),
            count,
            generation: 1,
        }
    }

    #[test]
    fn orders_by_count_then_name() {
        let mut heap = BinaryHeap::new();
        for entry in [load("s2", 5), load("s3", 1), load("s1", 5)] {
            heap.push(Reverse(entry));
        }
        let order: Vec<String> = std::iter::from_fn(|| heap.pop().map(|Reverse(l)| l.name)).collect();
        assert_eq!(order, vec!["s3", "s1", "s2"]);
    }

    #[test]
    fn grants_least_populated_and_moves_it_to_leased() {
        let state = PoolSchemaState::new(7);
        let mut inner = state.lock();
        state.initialize_with(
            &mut inner,
            HashMap::from([("a".to_string(), 2), ("b".to_string(), 5), ("c".to_string(), 1)]),
        );
        match state.next_schema(&mut inner, 10, None).unwrap() {
            NextSchema::Granted(name) => assert_eq!(name, "c"),
            _ => panic!("expected a grant"),
        }
        assert_eq!(inner.leased.get("c").map(|l| l.count), Some(2));
    }

    #[test]
    fn release_with_old_generation_is_inert() {
        let state = PoolSchemaState::new(7);
        {
            let mut inner = state.lock();
            state.initialize_with(&mut inner, HashMap::from([("a".to_string(), 0)]));
            let granted = state.next_schema(&mut inner, 1, None).unwrap();
            assert!(matches!(granted, NextSchema::Granted(_)));
        }
        state.release_schema("a", true, 0);
        let inner = state.lock();
        assert!(inner.leased.contains_key("a"));
        assert_eq!(inner.available.len(), 0);
    }

    #[test]
    fn release_decrement_restores_count() {
        let state = PoolSchemaState::new(7);
        let generation;
        {
            let mut inner = state.lock();
            state.initialize_with(&mut inner, HashMap::from([("a".to_string(), 3)]));
            generation = inner.generation;
            state.next_schema(&mut inner, 10, None).unwrap();
        }
        state.release_schema("a", true, generation);
        let mut inner = state.lock();
        let Some(Reverse(back)) = inner.available.pop() else {
            panic!("schema not returned");
        };
        assert_eq!(back.count, 3);
    }

    #[test]
    fn release_without_decrement_keeps_count() {
        let state = PoolSchemaState::new(7);
        let generation;
        {
            let mut inner = state.lock();
            state.initialize_with(&mut inner, HashMap::from([("a".to_string(), 3)]));
            generation = inner.generation;
            state.next_schema(&mut inner, 10, None).unwrap();
        }
        state.release_schema("a", false, generation);
        let mut inner = state.lock();
        let Some(Reverse(back)) = inner.available.pop() else {
            panic!("schema not returned");
        };
        assert_eq!(back.count, 4);
    }
}
