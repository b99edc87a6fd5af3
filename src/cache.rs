//! Pool-keyed cache of schema tenant counts, with lease-based allocation.

use crate::config::AllocatorConfig;
use crate::error::AllocError;
use crate::lease::Lease;
use crate::state::{NextSchema, PoolSchemaState};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Connection pool / database cluster identifier.
pub type PoolId = u32;

/// Decides which schema a newly created tenant context is placed into.
///
/// Per-pool tenant counts are expensive to compute, so they are cached here
/// and refreshed only when stale (TTL), explicitly invalidated, or exhausted.
/// `acquire` hands out a [`Lease`] on the least-populated schema that is below
/// the caller's `max_contexts` bound; the lease must be released once the
/// tenant creation attempt finishes. Construct one instance and share it
/// (e.g. behind an `Arc`); pools are independent of each other.
pub struct SchemaAllocationCache {
    pools: RwLock<HashMap<PoolId, Arc<PoolSchemaState>>>,
    ttl: Option<Duration>,
}

impl SchemaAllocationCache {
    pub fn new(config: AllocatorConfig) -> Self {
        let ttl = if config.ttl_millis > 0 {
            Some(Duration::from_millis(config.ttl_millis as u64))
        } else {
            None
        };
        SchemaAllocationCache {
            pools: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Lease the least-populated schema of `pool_id` that is below
    /// `max_contexts`. Runs `count_schemas(pool_id, max_contexts)` first when
    /// the cached counts are missing, deprecated or older than the TTL; its
    /// error propagates unchanged and leaves the cache untouched.
    ///
    /// Returns `Ok(None)` when every schema of the pool is at the bound and
    /// none is currently leased: the caller must create a new schema
    /// out-of-band, and the next acquire re-runs the counting query. Blocks
    /// without bound while leased schemas could still free up; see
    /// [`Self::acquire_timeout`] for a deadline.
    pub fn acquire<F>(
        &self,
        pool_id: PoolId,
        max_contexts: u32,
        count_schemas: F,
    ) -> Result<Option<Lease>, AllocError>
    where
        F: FnMut(PoolId, u32) -> Result<HashMap<String, u32>, AllocError>,
    {
        self.acquire_inner(pool_id, max_contexts, None, count_schemas)
    }

    /// Same as [`Self::acquire`], but a blocking wait for capacity that
    /// outlives `timeout` fails with [`AllocError::WaitTimeout`] instead of
    /// waiting forever on leases that may never be released.
    pub fn acquire_timeout<F>(
        &self,
        pool_id: PoolId,
        max_contexts: u32,
        timeout: Duration,
        count_schemas: F,
    ) -> Result<Option<Lease>, AllocError>
    where
        F: FnMut(PoolId, u32) -> Result<HashMap<String, u32>, AllocError>,
    {
        self.acquire_inner(pool_id, max_contexts, Some(Instant::now() + timeout), count_schemas)
    }

    fn acquire_inner<F>(
        &self,
        pool_id: PoolId,
        max_contexts: u32,
        deadline: Option<Instant>,
        mut count_schemas: F,
    ) -> Result<Option<Lease>, AllocError>
    where
        F: FnMut(PoolId, u32) -> Result<HashMap<String, u32>, AllocError>,
    {
        let state = self.pool_state(pool_id);
        let mut inner = state.lock();
        loop {
            if !state.accessible(&inner, self.ttl) {
                // The query runs before anything is cleared, so a failure
                // leaves the previous state fully intact.
                let counts = count_schemas(pool_id, max_contexts)?;
                state.initialize_with(&mut inner, counts);
            }
            match state.next_schema(&mut inner, max_contexts, deadline)? {
                NextSchema::Granted(name) => {
                    return Ok(Some(Lease::new(
                        pool_id,
                        name,
                        inner.generation,
                        Arc::clone(&state),
                    )));
                }
                NextSchema::Exhausted => {
                    state.invalidate_freshness(&mut inner);
                    tracing::warn!(
                        "pool {}: no schema below {} contexts, forcing recount on next acquire",
                        pool_id,
                        max_contexts
                    );
                    return Ok(None);
                }
                // A repopulation happened while this thread was blocked;
                // start over against the new counts.
                NextSchema::Stale => continue,
            }
        }
    }

    /// Drop the cached counts for `pool_id` so the next acquire re-queries
    /// storage, e.g. after tenant counts changed outside this cache's
    /// knowledge. Idempotent; a no-op for unknown or already-deprecated pools.
    pub fn invalidate(&self, pool_id: PoolId) {
        let state = self.pools.read().get(&pool_id).cloned();
        if let Some(state) = state {
            if !state.is_deprecated() {
                state.mark_deprecated();
            }
        }
    }

    /// One state per pool for the process lifetime, created on first use.
    fn pool_state(&self, pool_id: PoolId) -> Arc<PoolSchemaState> {
        if let Some(state) = self.pools.read().get(&pool_id) {
            return Arc::clone(state);
        }
        let mut pools = self.pools.write();
        Arc::clone(
            pools
                .entry(pool_id)
                .or_insert_with(|| Arc::new(PoolSchemaState::new(pool_id))),
        )
    }
}

impl Default for SchemaAllocationCache {
    fn default() -> Self {
        SchemaAllocationCache::new(AllocatorConfig::default())
    }
}
