//! PostgreSQL executor for entity-dao.
//!
//! This crate provides a PostgreSQL-backed `QueryExecutor`. It uses serde
//! serialization for binding values and reading rows, so entity types only
//! need `#[derive(Entity, Serialize, Deserialize)]`.
//!
//! # Usage
//!
//! ```text
//! use entity_dao::{AppDao, Entity, NoIdGenerator};
//! use entity_dao_postgres::PgPool;
//!
//! #[derive(Entity, Serialize, Deserialize, Clone)]
//! #[entity(table = "users")]
//! pub struct User {
//!     #[serde(skip_serializing_if = "Option::is_none")]
//!     pub id: Option<i64>,
//!     pub name: String,
//! }
//!
//! let pool = PgPool::connect("postgres://localhost/app").await?;
//! let dao = AppDao::new(pool, NoIdGenerator);
//! let user = dao.store(User::new("a".into())).await?;
//! ```

#![cfg_attr(
    test,
    allow(clippy::unwrap_used, clippy::expect_used, clippy::unwrap_in_result)
)]

mod executor;
mod serde_bind;

pub use executor::PgPool;
pub use serde_bind::{bind_value, deserialize_row, extract_column_value};

// Re-export core types for convenience
pub use entity_dao::{
    AppDao, ColumnType, ConnectionConfig, DaoConfig, Delete, Entity, Filter, IdGenerator, Insert,
    MaxIdGenerator, NoIdGenerator, Order, Query, QueryExecutor, Statement, StorageError, Update,
    Value,
};
