//! Value binding and serde-based row mapping for PostgreSQL.
//!
//! Entities never need sqlx-specific derives: values arrive as
//! `entity_dao::Value` and rows leave as JSON objects handed to serde.

use entity_dao::{ColumnType, Entity, StorageError, Value, mapping::entity_from_columns};
use serde_json::Value as Json;
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::{Arguments, Column, Row};

pub(crate) fn db_err(e: impl std::fmt::Display) -> StorageError {
    StorageError::Database(e.to_string())
}

/// Bind a Value to PgArguments.
pub fn bind_value(args: &mut PgArguments, value: &Value) -> Result<(), StorageError> {
    let result = match value {
        Value::String(s) => args.add(s.as_str()),
        Value::Int(n) => args.add(*n),
        // PostgreSQL doesn't have unsigned, use i64
        Value::UInt(n) => args.add(*n as i64),
        Value::Float(n) => args.add(*n),
        Value::Bool(b) => args.add(*b),
        Value::Strings(v) => args.add(v.as_slice()),
        Value::Datetime(dt) => args.add(*dt),
        Value::Json(v) => args.add(v.clone()),
        // Use column type to bind the correct null type
        Value::Null(column_type) => match column_type {
            ColumnType::Datetime => args.add(None::<chrono::DateTime<chrono::Utc>>),
            ColumnType::BigInt => args.add(None::<i64>),
            ColumnType::Integer => args.add(None::<i32>),
            ColumnType::Double => args.add(None::<f64>),
            ColumnType::Boolean => args.add(None::<bool>),
            ColumnType::Json => args.add(None::<Json>),
            ColumnType::Text => args.add(None::<String>),
        },
    };
    result.map_err(db_err)
}

/// Deserialize a PostgreSQL row to an entity.
///
/// Extracts the entity's columns from the row and lets serde rebuild the
/// value through `json_keys()`.
pub fn deserialize_row<T: Entity>(row: &PgRow) -> Result<T, StorageError> {
    let mut obj = serde_json::Map::new();

    for column in T::columns() {
        obj.insert((*column).to_string(), extract_column_value(row, column)?);
    }

    entity_from_columns(obj)
}

/// Extract a column value from a row as JSON
pub fn extract_column_value(row: &PgRow, col_name: &str) -> Result<Json, StorageError> {
    use sqlx::TypeInfo;

    // Find the column index
    let col_idx = row
        .columns()
        .iter()
        .position(|c| c.name() == col_name)
        .ok_or_else(|| StorageError::Mapping(format!("Column not found: {}", col_name)))?;

    let col = &row.columns()[col_idx];
    let type_name = col.type_info().name();

    // Handle based on PostgreSQL type
    let value = match type_name {
        "BOOL" => {
            let v: Option<bool> = row.try_get(col_idx).map_err(db_err)?;
            v.map(Json::Bool).unwrap_or(Json::Null)
        }
        "INT2" => {
            let v: Option<i16> = row.try_get(col_idx).map_err(db_err)?;
            v.map(|n| Json::Number(n.into())).unwrap_or(Json::Null)
        }
        "INT4" => {
            let v: Option<i32> = row.try_get(col_idx).map_err(db_err)?;
            v.map(|n| Json::Number(n.into())).unwrap_or(Json::Null)
        }
        "INT8" => {
            let v: Option<i64> = row.try_get(col_idx).map_err(db_err)?;
            v.map(|n| Json::Number(n.into())).unwrap_or(Json::Null)
        }
        "FLOAT4" => {
            let v: Option<f32> = row.try_get(col_idx).map_err(db_err)?;
            v.and_then(|n| serde_json::Number::from_f64(n.into()).map(Json::Number))
                .unwrap_or(Json::Null)
        }
        "FLOAT8" => {
            let v: Option<f64> = row.try_get(col_idx).map_err(db_err)?;
            v.and_then(|n| serde_json::Number::from_f64(n).map(Json::Number))
                .unwrap_or(Json::Null)
        }
        "TIMESTAMPTZ" => {
            let v: Option<chrono::DateTime<chrono::Utc>> = row.try_get(col_idx).map_err(db_err)?;
            v.map(|dt| Json::String(dt.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)))
                .unwrap_or(Json::Null)
        }
        "TIMESTAMP" => {
            let v: Option<chrono::NaiveDateTime> = row.try_get(col_idx).map_err(db_err)?;
            v.map(|dt| {
                Json::String(
                    dt.and_utc()
                        .to_rfc3339_opts(chrono::SecondsFormat::Micros, true),
                )
            })
            .unwrap_or(Json::Null)
        }
        "JSONB" | "JSON" => {
            let v: Option<Json> = row.try_get(col_idx).map_err(db_err)?;
            v.unwrap_or(Json::Null)
        }
        "TEXT[]" | "VARCHAR[]" => {
            let v: Option<Vec<String>> = row.try_get(col_idx).map_err(db_err)?;
            v.map(Json::from).unwrap_or(Json::Null)
        }
        _ => {
            // Default: treat as string (VARCHAR, TEXT, CHAR, etc.)
            let v: Option<String> = row.try_get(col_idx).map_err(db_err)?;
            v.map(Json::String).unwrap_or(Json::Null)
        }
    };

    Ok(value)
}

/// Read an integer key column (INT2/INT4/INT8) from a row.
pub(crate) fn extract_key(row: &PgRow, col_name: &str) -> Result<Option<i64>, StorageError> {
    match extract_column_value(row, col_name)? {
        Json::Null => Ok(None),
        Json::Number(n) => n
            .as_i64()
            .map(Some)
            .ok_or_else(|| StorageError::Mapping(format!("Non-integer key in {}", col_name))),
        other => Err(StorageError::Mapping(format!(
            "Non-integer key in {}: {}",
            col_name, other
        ))),
    }
}
