//! Serde-based mapping between entities and column values.
//!
//! Entities serialize to JSON objects; values are looked up by serde key
//! (`Entity::json_keys()`) and typed by column type, so no per-type binding
//! code is needed.

use serde_json::{Map, Value as Json};

use crate::{ColumnType, Entity, StorageError, Value};

/// Find the index of a mapped column by column name or serde key.
pub fn resolve_column<E: Entity>(name: &str) -> Result<usize, StorageError> {
    E::columns()
        .iter()
        .position(|column| *column == name)
        .or_else(|| E::json_keys().iter().position(|key| *key == name))
        .ok_or_else(|| StorageError::UnknownColumn {
            table: E::table_name(),
            name: name.to_string(),
        })
}

/// Name of the column at `idx`.
pub fn column_name<E: Entity>(idx: usize) -> Result<&'static str, StorageError> {
    E::columns().get(idx).copied().ok_or_else(|| {
        StorageError::Mapping(format!(
            "No column at index {} on table {}",
            idx,
            E::table_name()
        ))
    })
}

/// Type of the column at `idx`, defaulting to text.
pub fn column_type<E: Entity>(idx: usize) -> ColumnType {
    E::column_types()
        .get(idx)
        .map(|name| ColumnType::parse(name))
        .unwrap_or(ColumnType::Text)
}

/// Typed null for the primary key column.
pub(crate) fn null_id<E: Entity>() -> Value {
    match resolve_column::<E>(E::id_column()) {
        Ok(idx) => Value::Null(column_type::<E>(idx)),
        Err(_) => Value::Null(ColumnType::BigInt),
    }
}

fn to_object<E: Entity>(entity: &E) -> Result<Map<String, Json>, StorageError> {
    match serde_json::to_value(entity)? {
        Json::Object(obj) => Ok(obj),
        _ => Err(StorageError::Mapping(format!(
            "Expected JSON object for entity {}",
            E::entity_name()
        ))),
    }
}

/// Extract all column values of an entity, in column order.
///
/// Missing serde keys (e.g. `skip_serializing_if`) become typed nulls.
pub fn column_values<E: Entity>(entity: &E) -> Result<Vec<(&'static str, Value)>, StorageError> {
    let obj = to_object(entity)?;

    E::columns()
        .iter()
        .zip(E::json_keys().iter())
        .enumerate()
        .map(|(idx, (column, key))| {
            let json = obj.get(*key).cloned().unwrap_or(Json::Null);
            Ok((*column, Value::from_json(json, column_type::<E>(idx))?))
        })
        .collect()
}

/// Build an entity from a row keyed by column name.
///
/// Null values are omitted to match serde's skip_serializing_if behavior.
pub fn entity_from_columns<E: Entity>(mut row: Map<String, Json>) -> Result<E, StorageError> {
    let mut obj = Map::new();

    for (column, key) in E::columns().iter().zip(E::json_keys().iter()) {
        if let Some(value) = row.remove(*column) {
            if !value.is_null() {
                obj.insert((*key).to_string(), value);
            }
        }
    }

    Ok(serde_json::from_value(Json::Object(obj))?)
}

/// Write a single column value onto an entity instance.
pub fn apply_column<E: Entity>(
    entity: &mut E,
    idx: usize,
    value: &Value,
) -> Result<(), StorageError> {
    let key = E::json_keys()
        .get(idx)
        .ok_or_else(|| StorageError::Mapping(format!("No serde key for column index {}", idx)))?;

    let mut obj = to_object(entity)?;
    obj.insert((*key).to_string(), value.to_json());
    *entity = serde_json::from_value(Json::Object(obj))?;
    Ok(())
}

/// Column on `T` that references `S`.
///
/// Declared `#[references(S)]` keys win; otherwise the conventional
/// `<source entity name>_<source id column>` column must exist on `T`.
pub fn foreign_column<T: Entity, S: Entity>() -> Result<&'static str, StorageError> {
    if let Some(fk) = T::foreign_keys()
        .iter()
        .find(|fk| (fk.references)() == S::table_name())
    {
        return Ok(fk.column);
    }

    let conventional = format!("{}_{}", S::entity_name(), S::id_column());
    T::columns()
        .iter()
        .find(|column| **column == conventional)
        .copied()
        .ok_or(StorageError::UnknownColumn {
            table: T::table_name(),
            name: conventional,
        })
}
