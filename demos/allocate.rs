//! Demo: worker threads place tenants into the least-populated schemas of two
//! pools, against a simulated storage layer serving the counting query.
//!
//! Run with `cargo run --example allocate`. `SHARDPOOL_TTL_MS` tunes how long
//! cached counts stay trusted.

use shardpool::{AllocatorConfig, PoolId, SchemaAllocationCache};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const MAX_CONTEXTS: u32 = 5;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("shardpool=debug")),
        )
        .init();

    // Simulated storage: per-pool schema populations behind a slow query.
    let storage: Arc<Mutex<HashMap<PoolId, HashMap<String, u32>>>> =
        Arc::new(Mutex::new(HashMap::from([
            (
                1,
                HashMap::from([("tenants_01".to_string(), 3), ("tenants_02".to_string(), 1)]),
            ),
            (2, HashMap::from([("tenants_10".to_string(), 0)])),
        ])));

    let cache = Arc::new(SchemaAllocationCache::new(AllocatorConfig::from_env()));

    let mut workers = Vec::new();
    for worker in 0..4u32 {
        let cache = Arc::clone(&cache);
        let storage = Arc::clone(&storage);
        workers.push(thread::spawn(move || {
            let pool_id = 1 + worker % 2;
            for tenant in 0..5u32 {
                let lease = cache
                    .acquire(pool_id, MAX_CONTEXTS, |pool, _max| {
                        thread::sleep(Duration::from_millis(20)); // the expensive part
                        Ok(storage
                            .lock()
                            .unwrap()
                            .get(&pool)
                            .cloned()
                            .unwrap_or_default())
                    })
                    .expect("simulated counting query cannot fail");
                match lease {
                    Some(lease) => {
                        let schema = lease.schema_name().to_string();
                        // "Create" the tenant, then keep the slot occupied.
                        *storage
                            .lock()
                            .unwrap()
                            .get_mut(&pool_id)
                            .unwrap()
                            .entry(schema.clone())
                            .or_insert(0) += 1;
                        tracing::info!(
                            "worker {}: tenant {} placed in pool {} schema {}",
                            worker,
                            tenant,
                            pool_id,
                            schema
                        );
                        lease.release(true);
                    }
                    None => {
                        tracing::info!(
                            "worker {}: pool {} is full, creating a fresh schema",
                            worker,
                            pool_id
                        );
                        let mut storage = storage.lock().unwrap();
                        let schemas = storage.get_mut(&pool_id).unwrap();
                        let name = format!("tenants_{:02}", 20 + schemas.len());
                        schemas.insert(name, 0);
                    }
                }
            }
        }));
    }
    for w in workers {
        w.join().expect("worker panicked");
    }

    for (pool, schemas) in storage.lock().unwrap().iter() {
        for (schema, count) in schemas {
            tracing::info!("pool {} schema {}: {} tenants", pool, schema, count);
        }
    }
    Ok(())
}
