//! Database-agnostic operation descriptors.
//!
//! This module is the mapping layer: it turns entities (or entity types plus
//! keys) into immutable descriptors that a [`QueryExecutor`] translates for
//! its backend.

use std::marker::PhantomData;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};

use crate::mapping::{
    column_name, column_type, column_values, foreign_column, null_id, resolve_column,
};
use crate::{ColumnType, Entity, StorageError};

/// A value that can be bound to a statement parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Int(i64),
    UInt(u64),
    Float(f64),
    Bool(bool),
    Strings(Vec<String>),
    Datetime(DateTime<Utc>),
    Json(serde_json::Value),
    /// A null carrying its column type, so backends can bind it correctly.
    Null(ColumnType),
}

impl Value {
    /// Convert a serialized field into a bindable value for a column type.
    pub fn from_json(json: serde_json::Value, column_type: ColumnType) -> Result<Self, StorageError> {
        use serde_json::Value as Json;

        let value = match json {
            Json::Null => Value::Null(column_type),
            _ if column_type == ColumnType::Json => Value::Json(json),
            Json::Bool(b) => Value::Bool(b),
            Json::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else if let Some(u) = n.as_u64() {
                    Value::UInt(u)
                } else if let Some(f) = n.as_f64() {
                    Value::Float(f)
                } else {
                    return Err(StorageError::Mapping(format!("Unrepresentable number: {}", n)));
                }
            }
            Json::String(s) if column_type == ColumnType::Datetime => {
                let dt = DateTime::parse_from_rfc3339(&s)
                    .map_err(|e| StorageError::Mapping(format!("Invalid datetime: {}", e)))?;
                Value::Datetime(dt.with_timezone(&Utc))
            }
            Json::String(s) => Value::String(s),
            other => Value::Json(other),
        };

        Ok(value)
    }

    /// Convert back into the serialized form used by entities.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as Json;

        match self {
            Value::String(s) => Json::String(s.clone()),
            Value::Int(n) => Json::from(*n),
            Value::UInt(n) => Json::from(*n),
            Value::Float(n) => serde_json::Number::from_f64(*n)
                .map(Json::Number)
                .unwrap_or(Json::Null),
            Value::Bool(b) => Json::Bool(*b),
            Value::Strings(v) => Json::from(v.clone()),
            Value::Datetime(dt) => Json::String(dt.to_rfc3339_opts(SecondsFormat::Micros, true)),
            Value::Json(v) => v.clone(),
            Value::Null(_) => Json::Null,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null(_))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&String> for Value {
    fn from(s: &String) -> Self {
        Value::String(s.clone())
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(n.into())
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Value::UInt(n)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Float(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<Vec<String>> for Value {
    fn from(v: Vec<String>) -> Self {
        Value::Strings(v)
    }
}

impl From<&[String]> for Value {
    fn from(v: &[String]) -> Self {
        Value::Strings(v.to_vec())
    }
}

impl<'a> From<Vec<&'a str>> for Value {
    fn from(v: Vec<&'a str>) -> Self {
        Value::Strings(v.into_iter().map(|s| s.to_string()).collect())
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(dt: DateTime<Utc>) -> Self {
        Value::Datetime(dt)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Value::Json(v)
    }
}

/// Filter conditions for queries.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// field = value
    Eq(String, Value),
    /// field != value
    Ne(String, Value),
    /// field > value
    Gt(String, Value),
    /// field >= value
    Gte(String, Value),
    /// field < value
    Lt(String, Value),
    /// field <= value
    Lte(String, Value),
    /// field IN (values) - for arrays
    In(String, Value),
    /// field IS NULL
    IsNull(String),
    /// field IS NOT NULL
    IsNotNull(String),
}

/// Sort order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Asc,
    Desc,
}

/// A SELECT descriptor. Also used for COUNT and MAX(id).
#[derive(Debug, Clone)]
pub struct Query<T> {
    /// The table to query.
    pub table: String,
    /// Filter conditions.
    pub filters: Vec<Filter>,
    /// Order by clauses.
    pub order_by: Vec<(String, Order)>,
    /// Maximum number of results.
    pub limit: Option<u64>,
    /// Offset for pagination.
    pub offset: Option<u64>,
    pub(crate) _marker: PhantomData<T>,
}

impl<T: Entity> Query<T> {
    /// Select every row of the type's table.
    pub fn new() -> Self {
        Self::for_table(T::table_name())
    }

    /// Create a new query with an explicit table name.
    pub fn for_table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            filters: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            offset: None,
            _marker: PhantomData,
        }
    }

    /// Select by primary key.
    pub fn by_id(id: i64) -> Self {
        Self::new().eq(T::id_column(), id)
    }

    /// Select by the entity's own key. A transient entity matches nothing.
    pub fn by_entity_id(entity: &T) -> Self {
        match entity.entity_id() {
            Some(id) => Self::by_id(id),
            None => Self::new().eq(T::id_column(), null_id::<T>()),
        }
    }

    /// Select by single-column equality. `name` may be a column or serde key.
    pub fn by_column(name: &str, value: impl Into<Value>) -> Result<Self, StorageError> {
        let column = column_name::<T>(resolve_column::<T>(name)?)?;
        Ok(Self::new().eq(column, value))
    }

    /// Select rows equal to every non-null field of `criteria`.
    pub fn matching(criteria: &T) -> Result<Self, StorageError> {
        let query = column_values(criteria)?
            .into_iter()
            .filter(|(_, value)| !value.is_null())
            .fold(Self::new(), |query, (column, value)| query.eq(column, value));
        Ok(query)
    }

    /// Select rows of `T` whose foreign key references `source`.
    pub fn foreign<S: Entity>(source: &S) -> Result<Self, StorageError> {
        let column = foreign_column::<T, S>()?;
        let idx = resolve_column::<T>(column)?;
        let value = match source.entity_id() {
            Some(id) => Value::Int(id),
            None => Value::Null(column_type::<T>(idx)),
        };
        Ok(Self::new().eq(column, value))
    }

    /// Add a filter condition.
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Add an equality filter (shorthand for Filter::Eq).
    pub fn eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(Filter::Eq(field.into(), value.into()))
    }

    /// Add an inequality filter.
    pub fn ne(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(Filter::Ne(field.into(), value.into()))
    }

    /// Add an IN filter (shorthand for Filter::In).
    pub fn r#in(self, field: impl Into<String>, values: impl Into<Value>) -> Self {
        self.filter(Filter::In(field.into(), values.into()))
    }

    /// Add a greater-than filter.
    pub fn gt(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(Filter::Gt(field.into(), value.into()))
    }

    /// Add a greater-than-or-equal filter.
    pub fn gte(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(Filter::Gte(field.into(), value.into()))
    }

    /// Add a less-than filter.
    pub fn lt(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(Filter::Lt(field.into(), value.into()))
    }

    /// Add a less-than-or-equal filter.
    pub fn lte(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(Filter::Lte(field.into(), value.into()))
    }

    /// Add an IS NULL filter.
    pub fn is_null(self, field: impl Into<String>) -> Self {
        self.filter(Filter::IsNull(field.into()))
    }

    /// Add an order-by clause.
    pub fn order_by(mut self, field: impl Into<String>, order: Order) -> Self {
        self.order_by.push((field.into(), order));
        self
    }

    /// Set the maximum number of results.
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Set the offset for pagination.
    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }
}

impl<T: Entity> Default for Query<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// An INSERT descriptor.
#[derive(Debug, Clone)]
pub struct Insert<T> {
    /// The table to insert into.
    pub table: String,
    /// Columns with their values. Null columns are left out so the
    /// database can apply defaults.
    pub values: Vec<(String, Value)>,
    /// Primary key column, read back when a generated key is requested.
    pub id_column: String,
    pub(crate) _marker: PhantomData<T>,
}

impl<T: Entity> Insert<T> {
    /// Insert every non-null column of `entity`.
    ///
    /// The id column of a transient entity is left out as well, so a plain
    /// integer id of `0` never reaches the database.
    pub fn from_entity(entity: &T) -> Result<Self, StorageError> {
        let transient = !entity.is_persistent();
        let id_column = T::id_column();
        let values = column_values(entity)?
            .into_iter()
            .filter(|(column, value)| !value.is_null() && !(transient && *column == id_column))
            .map(|(column, value)| (column.to_string(), value))
            .collect();

        Ok(Self {
            table: T::table_name().to_string(),
            values,
            id_column: T::id_column().to_string(),
            _marker: PhantomData,
        })
    }
}

/// An UPDATE descriptor.
#[derive(Debug, Clone)]
pub struct Update<T> {
    /// The table to update.
    pub table: String,
    /// SET assignments.
    pub assignments: Vec<(String, Value)>,
    /// Filter conditions.
    pub filters: Vec<Filter>,
    pub(crate) _marker: PhantomData<T>,
}

impl<T: Entity> Update<T> {
    /// Update every non-key column (nulls included) for the entity's key.
    pub fn all_columns(entity: &T) -> Result<Self, StorageError> {
        let id_column = T::id_column();
        let assignments = column_values(entity)?
            .into_iter()
            .filter(|(column, _)| *column != id_column)
            .map(|(column, value)| (column.to_string(), value))
            .collect();

        Ok(Self::keyed(entity, assignments))
    }

    /// Update a single column for the entity's key.
    pub fn column(entity: &T, name: &str, value: impl Into<Value>) -> Result<Self, StorageError> {
        let column = column_name::<T>(resolve_column::<T>(name)?)?;
        let assignments = vec![(column.to_string(), value.into())];
        Ok(Self::keyed(entity, assignments))
    }

    fn keyed(entity: &T, assignments: Vec<(String, Value)>) -> Self {
        let key = entity
            .entity_id()
            .map(Value::Int)
            .unwrap_or_else(null_id::<T>);

        Self {
            table: T::table_name().to_string(),
            assignments,
            filters: vec![Filter::Eq(T::id_column().to_string(), key)],
            _marker: PhantomData,
        }
    }
}

/// A DELETE descriptor.
#[derive(Debug, Clone)]
pub struct Delete<T> {
    /// The table to delete from.
    pub table: String,
    /// Filter conditions.
    pub filters: Vec<Filter>,
    pub(crate) _marker: PhantomData<T>,
}

impl<T: Entity> Delete<T> {
    /// Create a new delete for the type's table.
    pub fn new() -> Self {
        Self::for_table(T::table_name())
    }

    /// Create a new delete with an explicit table name.
    pub fn for_table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            filters: Vec::new(),
            _marker: PhantomData,
        }
    }

    /// Delete by primary key.
    pub fn by_id(id: i64) -> Self {
        Self::new().eq(T::id_column(), id)
    }

    /// Delete the row keyed by `entity`. A transient entity matches nothing.
    pub fn entity(entity: &T) -> Self {
        match entity.entity_id() {
            Some(id) => Self::by_id(id),
            None => Self::new().eq(T::id_column(), null_id::<T>()),
        }
    }

    /// Add a filter condition.
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Add an equality filter (shorthand).
    pub fn eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(Filter::Eq(field.into(), value.into()))
    }

    /// Add an IN filter.
    pub fn r#in(self, field: impl Into<String>, values: impl Into<Value>) -> Self {
        self.filter(Filter::In(field.into(), values.into()))
    }
}

impl<T: Entity> Default for Delete<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// A write descriptor.
#[derive(Debug, Clone)]
pub enum Statement<T> {
    Insert(Insert<T>),
    Update(Update<T>),
    Delete(Delete<T>),
}

impl<T> From<Insert<T>> for Statement<T> {
    fn from(insert: Insert<T>) -> Self {
        Statement::Insert(insert)
    }
}

impl<T> From<Update<T>> for Statement<T> {
    fn from(update: Update<T>) -> Self {
        Statement::Update(update)
    }
}

impl<T> From<Delete<T>> for Statement<T> {
    fn from(delete: Delete<T>) -> Self {
        Statement::Delete(delete)
    }
}

/// Trait for executing descriptors against a database backend.
///
/// Every call runs exactly one statement. Implementations acquire whatever
/// connection or statement handle they need for the call and release it on
/// every exit path, including errors.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Execute a write and return the number of rows affected.
    async fn execute<T: Entity>(&self, statement: Statement<T>) -> Result<u64, StorageError>;

    /// Execute an insert and return the database-generated key.
    async fn execute_returning_key<T: Entity>(&self, insert: Insert<T>)
    -> Result<i64, StorageError>;

    /// Execute a SELECT and return at most one result.
    async fn fetch_optional<T: Entity>(&self, query: Query<T>) -> Result<Option<T>, StorageError>;

    /// Execute a SELECT and return all results in backend order.
    async fn fetch<T: Entity>(&self, query: Query<T>) -> Result<Vec<T>, StorageError>;

    /// Count rows matching the query.
    async fn count<T: Entity>(&self, query: Query<T>) -> Result<u64, StorageError>;

    /// Largest primary key among rows matching the query.
    async fn max_id<T: Entity>(&self, query: Query<T>) -> Result<Option<i64>, StorageError>;
}
