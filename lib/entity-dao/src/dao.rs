//! Generic entity DAO.
//!
//! `AppDao` exposes one CRUD surface for every [`Entity`] type. Each call
//! builds a descriptor through the mapping layer and hands it to the
//! executor; the DAO itself never validates, retries or caches.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::debug;

use crate::mapping::{apply_column, resolve_column};
use crate::{
    DaoConfig, Delete, Entity, IdGenerator, Insert, Query, QueryExecutor, Statement, StorageError,
    Update, Value,
};

/// Generic DAO over an executor `X` and an id generator `G`.
pub struct AppDao<X, G> {
    executor: X,
    id_generator: G,
    generated_keys: AtomicBool,
}

impl<X: QueryExecutor, G: IdGenerator> AppDao<X, G> {
    /// Create a DAO using database-generated keys.
    pub fn new(executor: X, id_generator: G) -> Self {
        Self::with_config(executor, id_generator, DaoConfig::default())
    }

    pub fn with_config(executor: X, id_generator: G, config: DaoConfig) -> Self {
        log_key_strategy(config.generated_keys);
        Self {
            executor,
            id_generator,
            generated_keys: AtomicBool::new(config.generated_keys),
        }
    }

    pub fn executor(&self) -> &X {
        &self.executor
    }

    pub fn id_generator(&self) -> &G {
        &self.id_generator
    }

    /// Whether ids are assigned by the database on insert.
    pub fn is_generated_keys(&self) -> bool {
        self.generated_keys.load(Ordering::Relaxed)
    }

    /// Choose how primary keys are assigned for subsequent inserts.
    pub fn set_generated_keys(&self, generated_keys: bool) {
        self.generated_keys.store(generated_keys, Ordering::Relaxed);
        log_key_strategy(generated_keys);
    }

    /// Insert a transient entity or update a persistent one.
    ///
    /// On insert the entity's id is populated, either from the database's
    /// generated key or from the id generator.
    pub async fn store<E: Entity>(&self, mut entity: E) -> Result<E, StorageError> {
        if entity.is_persistent() {
            debug!("Updating {} {:?}", E::table_name(), entity.entity_id());
            self.executor
                .execute(Statement::Update(Update::all_columns(&entity)?))
                .await?;
            return Ok(entity);
        }

        if self.is_generated_keys() {
            let insert = Insert::from_entity(&entity)?;
            let key = self.executor.execute_returning_key(insert).await?;
            debug!("Inserted {} with generated key {}", E::table_name(), key);
            entity.set_entity_id(key)?;
        } else {
            let next_id = self.id_generator.next_id(&entity).await?;
            entity.set_entity_id(next_id)?;
            debug!("Inserting {} with id {}", E::table_name(), next_id);
            self.executor
                .execute(Statement::Insert(Insert::from_entity(&entity)?))
                .await?;
        }

        Ok(entity)
    }

    /// Insert the entity as-is, without capturing any key.
    pub async fn save<E: Entity>(&self, entity: &E) -> Result<(), StorageError> {
        self.executor
            .execute(Statement::Insert(Insert::from_entity(entity)?))
            .await?;
        Ok(())
    }

    /// Update a single property, both in storage and on `entity`.
    ///
    /// `name` may be the column name or the serde field name.
    pub async fn update_property<E: Entity>(
        &self,
        entity: &mut E,
        name: &str,
        value: impl Into<Value>,
    ) -> Result<(), StorageError> {
        let value = value.into();
        let idx = resolve_column::<E>(name)?;
        let mut updated = entity.clone();
        apply_column(&mut updated, idx, &value)?;
        self.executor
            .execute(Statement::Update(Update::column(entity, name, value)?))
            .await?;
        *entity = updated;
        Ok(())
    }

    /// Find a single entity by its id.
    pub async fn find_by_id<E: Entity>(&self, id: i64) -> Result<Option<E>, StorageError> {
        self.executor.fetch_optional(Query::<E>::by_id(id)).await
    }

    /// Reload an entity by its own id. `None` yields `None` without a query.
    pub async fn find_by_entity_id<E: Entity>(
        &self,
        entity: Option<&E>,
    ) -> Result<Option<E>, StorageError> {
        let Some(entity) = entity else {
            return Ok(None);
        };
        self.executor.fetch_optional(Query::by_entity_id(entity)).await
    }

    /// Find a single entity by a property match.
    pub async fn find_one_by_property<E: Entity>(
        &self,
        name: &str,
        value: impl Into<Value>,
    ) -> Result<Option<E>, StorageError> {
        self.executor
            .fetch_optional(Query::<E>::by_column(name, value)?)
            .await
    }

    /// Find one entity matching the non-null fields of `criteria`.
    pub async fn find_one<E: Entity>(&self, criteria: &E) -> Result<Option<E>, StorageError> {
        self.executor.fetch_optional(Query::matching(criteria)?).await
    }

    /// Find all entities matching the non-null fields of `criteria`.
    pub async fn find<E: Entity>(&self, criteria: &E) -> Result<Vec<E>, StorageError> {
        self.executor.fetch(Query::matching(criteria)?).await
    }

    /// Delete by id. Runs even when no such row exists.
    pub async fn delete_by_id<E: Entity>(&self, id: i64) -> Result<(), StorageError> {
        let affected = self
            .executor
            .execute(Statement::Delete(Delete::<E>::by_id(id)))
            .await?;
        debug!("Deleted {} {} ({} rows)", E::table_name(), id, affected);
        Ok(())
    }

    /// Delete a persistent entity. `None` or a transient entity is a no-op.
    pub async fn delete_entity<E: Entity>(&self, entity: Option<&E>) -> Result<(), StorageError> {
        match entity {
            Some(entity) if entity.is_persistent() => {
                self.executor
                    .execute(Statement::Delete(Delete::entity(entity)))
                    .await?;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Count all entities of a type.
    pub async fn count<E: Entity>(&self) -> Result<u64, StorageError> {
        self.executor.count(Query::<E>::new()).await
    }

    /// Find entities of type `T` that reference `source` through a foreign key.
    pub async fn find_related<T: Entity, S: Entity>(
        &self,
        source: &S,
    ) -> Result<Vec<T>, StorageError> {
        self.executor.fetch(Query::<T>::foreign(source)?).await
    }

    /// List all entities of a type.
    pub async fn list<E: Entity>(&self) -> Result<Vec<E>, StorageError> {
        self.executor.fetch(Query::<E>::new()).await
    }
}

fn log_key_strategy(generated_keys: bool) {
    if generated_keys {
        debug!("IDs are incremented in database");
    } else {
        debug!("IDs are generated by the id generator");
    }
}
