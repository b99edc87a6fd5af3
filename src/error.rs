//! Typed errors for schema allocation.

use crate::cache::PoolId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AllocError {
    /// The counting query failed while repopulating a pool's cache. No cache
    /// state is mutated when this is returned.
    #[error("schema count query: {0}")]
    Count(#[source] Box<dyn std::error::Error + Send + Sync>),
    /// `acquire_timeout` spent its whole deadline blocked on leased schemas.
    #[error("timed out waiting for schema capacity in pool {pool_id}")]
    WaitTimeout { pool_id: PoolId },
}

impl AllocError {
    /// Wrap a storage error raised inside a counting closure.
    pub fn count(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        AllocError::Count(err.into())
    }
}
