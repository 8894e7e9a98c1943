//! Id generators for explicit-id mode.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::{Entity, Query, QueryExecutor, StorageError};

/// Supplies identities for entities when the database does not generate them.
///
/// The entity instance is passed so implementations can pick a strategy per
/// type or per shard.
#[async_trait]
pub trait IdGenerator: Send + Sync {
    async fn next_id<E: Entity>(&self, entity: &E) -> Result<i64, StorageError>;
}

/// Generator for DAOs that only ever use database-generated keys.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoIdGenerator;

#[async_trait]
impl IdGenerator for NoIdGenerator {
    async fn next_id<E: Entity>(&self, _entity: &E) -> Result<i64, StorageError> {
        Err(StorageError::IdGeneration(format!(
            "no id generator configured for {}",
            E::table_name()
        )))
    }
}

/// Per-table counters seeded from the current maximum id.
///
/// The first request for a table reads `MAX(id)` through the executor (an
/// empty table starts at 0); later requests increment in memory. Only valid
/// while this generator is the sole writer of ids for its tables.
pub struct MaxIdGenerator<X> {
    executor: X,
    last_ids: Mutex<HashMap<&'static str, i64>>,
}

impl<X: QueryExecutor> MaxIdGenerator<X> {
    pub fn new(executor: X) -> Self {
        Self {
            executor,
            last_ids: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl<X: QueryExecutor> IdGenerator for MaxIdGenerator<X> {
    async fn next_id<E: Entity>(&self, _entity: &E) -> Result<i64, StorageError> {
        let mut last_ids = self.last_ids.lock().await;

        let last = match last_ids.get(E::table_name()) {
            Some(last) => *last,
            None => {
                let seed = self
                    .executor
                    .max_id(Query::<E>::new())
                    .await?
                    .unwrap_or(0);
                debug!("Seeded id counter for {} at {}", E::table_name(), seed);
                seed
            }
        };

        let next = last + 1;
        last_ids.insert(E::table_name(), next);
        Ok(next)
    }
}
