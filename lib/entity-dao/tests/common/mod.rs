//! In-memory executor for DAO tests.
//!
//! Interprets descriptors over JSON rows keyed by column name and records
//! which executor method each call went through.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use entity_dao::mapping::entity_from_columns;
use entity_dao::{
    Entity, Filter, Insert, Order, Query, QueryExecutor, Statement, StorageError, Value,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};

type Row = Map<String, Json>;

/// Executor method invoked, with the table it targeted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Insert(String),
    InsertReturningKey(String),
    Update(String),
    Delete(String),
    FetchOptional(String),
    Fetch(String),
    Count(String),
    MaxId(String),
}

#[derive(Default)]
struct State {
    tables: HashMap<String, Vec<Row>>,
    calls: Vec<Call>,
    fail_next: Option<String>,
}

#[derive(Clone, Default)]
pub struct MemoryExecutor {
    state: Arc<Mutex<State>>,
}

impl MemoryExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    /// Make the next executor call fail with a database error.
    pub fn fail_next(&self, message: &str) {
        self.state.lock().unwrap().fail_next = Some(message.to_string());
    }

    fn begin(&self, call: Call) -> Result<std::sync::MutexGuard<'_, State>, StorageError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call);
        match state.fail_next.take() {
            Some(message) => Err(StorageError::Database(message)),
            None => Ok(state),
        }
    }
}

fn matches(row: &Row, filter: &Filter) -> bool {
    let field = |name: &String| row.get(name).cloned().unwrap_or(Json::Null);
    let compare = |name: &String, value: &Value| compare_json(&field(name), &value.to_json());

    match filter {
        // SQL semantics: NULL never compares equal
        Filter::Eq(name, value) => !value.is_null() && field(name) == value.to_json(),
        Filter::Ne(name, value) => !value.is_null() && field(name) != value.to_json(),
        Filter::Gt(name, value) => compare(name, value) == Some(Ordering::Greater),
        Filter::Gte(name, value) => matches!(
            compare(name, value),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        Filter::Lt(name, value) => compare(name, value) == Some(Ordering::Less),
        Filter::Lte(name, value) => {
            matches!(compare(name, value), Some(Ordering::Less | Ordering::Equal))
        }
        Filter::In(name, value) => match value.to_json() {
            Json::Array(items) => items.contains(&field(name)),
            _ => false,
        },
        Filter::IsNull(name) => field(name).is_null(),
        Filter::IsNotNull(name) => !field(name).is_null(),
    }
}

fn compare_json(a: &Json, b: &Json) -> Option<Ordering> {
    match (a, b) {
        (Json::Number(x), Json::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Json::String(x), Json::String(y)) => Some(x.cmp(y)),
        (Json::Bool(x), Json::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn select<T: Entity>(state: &State, query: &Query<T>) -> Vec<Row> {
    let mut rows: Vec<Row> = state
        .tables
        .get(&query.table)
        .map(|rows| {
            rows.iter()
                .filter(|row| query.filters.iter().all(|f| matches(row, f)))
                .cloned()
                .collect()
        })
        .unwrap_or_default();

    for (field, order) in query.order_by.iter().rev() {
        rows.sort_by(|a, b| {
            let ord = compare_json(
                a.get(field).unwrap_or(&Json::Null),
                b.get(field).unwrap_or(&Json::Null),
            )
            .unwrap_or(Ordering::Equal);
            match order {
                Order::Asc => ord,
                Order::Desc => ord.reverse(),
            }
        });
    }

    let offset = query.offset.unwrap_or(0) as usize;
    let limit = query.limit.map(|l| l as usize).unwrap_or(usize::MAX);
    rows.into_iter().skip(offset).take(limit).collect()
}

fn insert_row<T: Entity>(state: &mut State, insert: &Insert<T>) -> Result<i64, StorageError> {
    let rows = state.tables.entry(insert.table.clone()).or_default();

    let mut row: Row = T::columns()
        .iter()
        .map(|column| ((*column).to_string(), Json::Null))
        .collect();
    for (column, value) in &insert.values {
        row.insert(column.clone(), value.to_json());
    }

    let key = match row.get(&insert.id_column).and_then(Json::as_i64) {
        Some(key) => {
            let duplicate = rows
                .iter()
                .any(|r| r.get(&insert.id_column).and_then(Json::as_i64) == Some(key));
            if duplicate {
                return Err(StorageError::Database(format!(
                    "duplicate key value violates unique constraint \"{}_pkey\"",
                    insert.table
                )));
            }
            key
        }
        None => {
            // Serial default
            let key = rows
                .iter()
                .filter_map(|r| r.get(&insert.id_column).and_then(Json::as_i64))
                .max()
                .unwrap_or(0)
                + 1;
            row.insert(insert.id_column.clone(), Json::from(key));
            key
        }
    };

    rows.push(row);
    Ok(key)
}

#[async_trait]
impl QueryExecutor for MemoryExecutor {
    async fn execute<T: Entity>(&self, statement: Statement<T>) -> Result<u64, StorageError> {
        match statement {
            Statement::Insert(insert) => {
                let mut state = self.begin(Call::Insert(insert.table.clone()))?;
                insert_row(&mut state, &insert)?;
                Ok(1)
            }
            Statement::Update(update) => {
                let mut state = self.begin(Call::Update(update.table.clone()))?;
                let mut affected = 0;
                if let Some(rows) = state.tables.get_mut(&update.table) {
                    for row in rows
                        .iter_mut()
                        .filter(|row| update.filters.iter().all(|f| matches(row, f)))
                    {
                        for (column, value) in &update.assignments {
                            row.insert(column.clone(), value.to_json());
                        }
                        affected += 1;
                    }
                }
                Ok(affected)
            }
            Statement::Delete(delete) => {
                let mut state = self.begin(Call::Delete(delete.table.clone()))?;
                let Some(rows) = state.tables.get_mut(&delete.table) else {
                    return Ok(0);
                };
                let before = rows.len();
                rows.retain(|row| !delete.filters.iter().all(|f| matches(row, f)));
                Ok((before - rows.len()) as u64)
            }
        }
    }

    async fn execute_returning_key<T: Entity>(
        &self,
        insert: Insert<T>,
    ) -> Result<i64, StorageError> {
        let mut state = self.begin(Call::InsertReturningKey(insert.table.clone()))?;
        insert_row(&mut state, &insert)
    }

    async fn fetch_optional<T: Entity>(&self, query: Query<T>) -> Result<Option<T>, StorageError> {
        let state = self.begin(Call::FetchOptional(query.table.clone()))?;
        select(&state, &query.limit(1))
            .into_iter()
            .next()
            .map(entity_from_columns)
            .transpose()
    }

    async fn fetch<T: Entity>(&self, query: Query<T>) -> Result<Vec<T>, StorageError> {
        let state = self.begin(Call::Fetch(query.table.clone()))?;
        select(&state, &query)
            .into_iter()
            .map(entity_from_columns)
            .collect()
    }

    async fn count<T: Entity>(&self, query: Query<T>) -> Result<u64, StorageError> {
        let state = self.begin(Call::Count(query.table.clone()))?;
        Ok(select(&state, &query).len() as u64)
    }

    async fn max_id<T: Entity>(&self, query: Query<T>) -> Result<Option<i64>, StorageError> {
        let state = self.begin(Call::MaxId(query.table.clone()))?;
        Ok(select(&state, &query)
            .iter()
            .filter_map(|row| row.get(T::id_column()).and_then(Json::as_i64))
            .max())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, entity_dao::Entity)]
#[entity(table = "users")]
pub struct User {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub name: String,
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, entity_dao::Entity)]
#[entity(table = "posts")]
#[serde(rename_all = "camelCase")]
pub struct Post {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[references(User)]
    pub author_id: Option<i64>,
    pub title: String,
}

/// Relates to `User` through the conventional `user_id` column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, entity_dao::Entity)]
#[entity(table = "comments")]
pub struct Comment {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub user_id: Option<i64>,
    pub body: String,
}

/// Plain integer id; `0` means not yet stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, entity_dao::Entity)]
#[entity(table = "tags")]
pub struct Tag {
    pub id: i64,
    pub label: String,
}

pub fn tag(label: &str) -> Tag {
    Tag {
        id: 0,
        label: label.to_string(),
    }
}

pub fn user(name: &str) -> User {
    User::new(name.to_string(), None)
}
