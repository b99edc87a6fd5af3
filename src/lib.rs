//! Shardpool: schema allocation cache for multi-tenant database sharding.

pub mod cache;
pub mod config;
pub mod error;
pub mod lease;
mod state;

pub use cache::{PoolId, SchemaAllocationCache};
pub use config::AllocatorConfig;
pub use error::AllocError;
pub use lease::Lease;
