//! Lease on a schema slot, released once the tenant creation attempt finishes.

use crate::cache::PoolId;
use crate::state::PoolSchemaState;
use std::sync::Arc;

/// A claim on one tenant slot of a schema, handed out by
/// [`acquire`](crate::SchemaAllocationCache::acquire). The schema's cached
/// count was already incremented for it.
///
/// Call [`release`](Self::release) with the outcome of the tenant creation.
/// A lease that is dropped instead is released as if creation failed, so a
/// panicking caller gives the slot back rather than stranding blocked
/// acquirers. A lease that outlives a repopulation of its pool releases as a
/// silent no-op.
#[derive(Debug)]
pub struct Lease {
    pool_id: PoolId,
    schema_name: String,
    generation: u64,
    state: Arc<PoolSchemaState>,
    released: bool,
}

impl Lease {
    pub(crate) fn new(
        pool_id: PoolId,
        schema_name: String,
        generation: u64,
        state: Arc<PoolSchemaState>,
    ) -> Self {
        Lease {
            pool_id,
            schema_name,
            generation,
            state,
            released: false,
        }
    }

    /// Schema this lease points at; create the tenant context here.
    pub fn schema_name(&self) -> &str {
        &self.schema_name
    }

    pub fn pool_id(&self) -> PoolId {
        self.pool_id
    }

    /// Return the schema to the pool and wake blocked acquirers. When the
    /// tenant context was created, its slot stays occupied; otherwise the
    /// speculative increment is undone.
    pub fn release(mut self, context_was_created: bool) {
        self.state
            .release_schema(&self.schema_name, !context_was_created, self.generation);
        self.released = true;
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if !self.released {
            self.state
                .release_schema(&self.schema_name, true, self.generation);
        }
    }
}
