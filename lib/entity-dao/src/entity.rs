//! Entity trait for mapped persistent records.
//!
//! Types implementing `Entity` carry the static metadata the mapping layer
//! needs to build descriptors (table, columns, id column, foreign keys) and
//! the instance capabilities the DAO relies on (identity and persistence
//! state). Add `#[derive(Entity)]` with `#[entity(table = "...")]` to
//! generate the implementation.

use serde::{Serialize, de::DeserializeOwned};

use crate::StorageError;

/// Database-agnostic column type, used to type bound values and nulls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Text,
    BigInt,
    Integer,
    Double,
    Boolean,
    Datetime,
    Json,
}

impl ColumnType {
    /// Parse the type names emitted by `#[derive(Entity)]`.
    ///
    /// Unknown names fall back to `Text`.
    pub fn parse(name: &str) -> Self {
        match name {
            "bigint" => ColumnType::BigInt,
            "integer" => ColumnType::Integer,
            "double" => ColumnType::Double,
            "boolean" => ColumnType::Boolean,
            "datetime" => ColumnType::Datetime,
            "json" => ColumnType::Json,
            _ => ColumnType::Text,
        }
    }
}

/// A foreign-key column on an entity, pointing at another entity's table.
#[derive(Debug, Clone, Copy)]
pub struct ForeignKey {
    /// Column on the owning table.
    pub column: &'static str,
    /// Table name of the referenced entity.
    pub references: fn() -> &'static str,
}

/// Trait for mapped persistent records.
///
/// # Example
///
/// ```text
/// #[derive(Entity, Serialize, Deserialize, Clone)]
/// #[entity(table = "posts")]
/// #[serde(rename_all = "camelCase")]
/// pub struct Post {
///     #[id]
///     pub id: Option<i64>,
///     #[references(User)]
///     pub user_id: Option<i64>,
///     pub title: String,
/// }
/// ```
///
/// # Column Naming
///
/// Database columns use snake_case (Rust field names). Serialization keys
/// follow whatever serde is configured for; `json_keys()` corresponds 1:1
/// with `columns()`.
///
/// Use `#[column(skip)]` to exclude a field from database storage.
/// Use `#[column(name = "custom_name")]` to override the column name.
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync {
    /// The database table name for this type.
    fn table_name() -> &'static str;

    /// Snake-case entity name, used to derive conventional foreign-key
    /// columns (`<entity_name>_<id_column>`).
    fn entity_name() -> &'static str;

    /// Column names in order (snake_case for DB).
    fn columns() -> &'static [&'static str];

    /// Column types in order.
    /// Values: "text", "bigint", "integer", "double", "boolean", "datetime", "json"
    fn column_types() -> &'static [&'static str];

    /// Serde key names in order, 1:1 with `columns()`.
    fn json_keys() -> &'static [&'static str];

    /// Primary key column.
    fn id_column() -> &'static str;

    /// Declared foreign keys.
    fn foreign_keys() -> &'static [ForeignKey] {
        &[]
    }

    /// The identity, or `None` while the entity is transient.
    fn entity_id(&self) -> Option<i64>;

    /// Assign the identity (after insert or from an id generator).
    ///
    /// Fails with `StorageError::Mapping` when `id` does not fit the id field.
    fn set_entity_id(&mut self, id: i64) -> Result<(), StorageError>;

    /// Whether this entity already exists in storage.
    fn is_persistent(&self) -> bool {
        self.entity_id().is_some()
    }

    /// Number of columns.
    fn column_count() -> usize {
        Self::columns().len()
    }
}
