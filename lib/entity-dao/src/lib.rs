//! Entity DAO - generic CRUD access to mapped persistent entities.
//!
//! # Core Concepts
//!
//! - **Entity**: a record type with table metadata, a nullable `i64` identity
//!   and a persisted/transient state.
//! - **Descriptor**: an immutable `Query`, `Insert`, `Update` or `Delete`
//!   built by the mapping layer from an entity or entity type.
//! - **Executor**: a backend that runs one descriptor per call.
//!
//! # Types
//!
//! - [`AppDao`]: the generic DAO
//! - [`Entity`]: metadata and identity for mapped types (derivable)
//! - [`QueryExecutor`]: backend contract
//! - [`IdGenerator`]: id source when keys are not generated by the database

#![cfg_attr(
    test,
    allow(clippy::unwrap_used, clippy::expect_used, clippy::unwrap_in_result)
)]

// Lets `#[derive(Entity)]` output resolve inside this crate too.
extern crate self as entity_dao;

mod config;
mod dao;
mod entity;
mod error;
mod id_generator;
pub mod mapping;
mod query;

pub use config::{ConnectionConfig, DaoConfig};
pub use dao::AppDao;
pub use entity::{ColumnType, Entity, ForeignKey};
pub use error::StorageError;
pub use id_generator::{IdGenerator, MaxIdGenerator, NoIdGenerator};
pub use query::{Delete, Filter, Insert, Order, Query, QueryExecutor, Statement, Update, Value};

// Re-export derive macro
pub use entity_dao_derive::Entity;
