//! PostgreSQL implementation of QueryExecutor.

const DEFAULT_MAX_CONNECTIONS: u32 = 16;

use async_trait::async_trait;
use entity_dao::{
    ConnectionConfig, Delete, Entity, Filter, Insert, Order, Query, QueryExecutor, Statement,
    StorageError, Update,
};
use sqlx::Row;
use sqlx::postgres::{PgArguments, PgPoolOptions};
use std::ops::Deref;
use tracing::trace;

use crate::deserialize_row;
use crate::serde_bind::{bind_value, db_err, extract_key};

/// Wrapper around sqlx::PgPool that implements QueryExecutor.
///
/// Every executor call acquires one pooled connection, runs one statement
/// and returns the connection when the guard drops, on success and error
/// paths alike.
#[derive(Clone, Debug)]
pub struct PgPool(sqlx::PgPool);

impl PgPool {
    /// Create a new PgPool from an sqlx PgPool.
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self(pool)
    }

    /// Connect to a PostgreSQL database.
    pub async fn connect(config: impl Into<ConnectionConfig>) -> Result<Self, StorageError> {
        let config = config.into();
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections().unwrap_or(DEFAULT_MAX_CONNECTIONS))
            .connect(config.url())
            .await
            .map_err(db_err)?;
        Ok(Self(pool))
    }

    /// Get the inner sqlx::PgPool.
    pub fn inner(&self) -> &sqlx::PgPool {
        &self.0
    }
}

impl Deref for PgPool {
    type Target = sqlx::PgPool;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Build a WHERE clause from filters, numbering placeholders from `start_param`.
fn build_where_clause(filters: &[Filter], start_param: usize) -> String {
    if filters.is_empty() {
        return String::new();
    }

    let mut param_idx = start_param;
    let mut next_param = || {
        let p = format!("${}", param_idx);
        param_idx += 1;
        p
    };

    let clauses: Vec<String> = filters
        .iter()
        .map(|filter| match filter {
            Filter::Eq(field, _) => format!("{} = {}", field, next_param()),
            Filter::Ne(field, _) => format!("{} != {}", field, next_param()),
            Filter::Gt(field, _) => format!("{} > {}", field, next_param()),
            Filter::Gte(field, _) => format!("{} >= {}", field, next_param()),
            Filter::Lt(field, _) => format!("{} < {}", field, next_param()),
            Filter::Lte(field, _) => format!("{} <= {}", field, next_param()),
            Filter::In(field, _) => format!("{} = ANY({})", field, next_param()),
            Filter::IsNull(field) => format!("{} IS NULL", field),
            Filter::IsNotNull(field) => format!("{} IS NOT NULL", field),
        })
        .collect();

    format!(" WHERE {}", clauses.join(" AND "))
}

/// Bind filter values to PgArguments.
fn bind_filters(args: &mut PgArguments, filters: &[Filter]) -> Result<(), StorageError> {
    for filter in filters {
        match filter {
            Filter::Eq(_, value)
            | Filter::Ne(_, value)
            | Filter::Gt(_, value)
            | Filter::Gte(_, value)
            | Filter::Lt(_, value)
            | Filter::Lte(_, value)
            | Filter::In(_, value) => {
                bind_value(args, value)?;
            }
            Filter::IsNull(_) | Filter::IsNotNull(_) => {
                // No binding needed
            }
        }
    }
    Ok(())
}

/// Build ORDER BY clause.
fn build_order_clause(order_by: &[(String, Order)]) -> String {
    if order_by.is_empty() {
        return String::new();
    }

    let clauses: Vec<String> = order_by
        .iter()
        .map(|(field, order)| {
            let dir = match order {
                Order::Asc => "ASC",
                Order::Desc => "DESC",
            };
            format!("{} {}", field, dir)
        })
        .collect();

    format!(" ORDER BY {}", clauses.join(", "))
}

fn build_select_sql<T>(query: &Query<T>, select: &str) -> String {
    let mut sql = format!(
        "SELECT {} FROM {}{}{}",
        select,
        query.table,
        build_where_clause(&query.filters, 1),
        build_order_clause(&query.order_by)
    );

    if let Some(limit) = query.limit {
        sql.push_str(&format!(" LIMIT {}", limit));
    }
    if let Some(offset) = query.offset {
        sql.push_str(&format!(" OFFSET {}", offset));
    }

    sql
}

/// Build INSERT SQL, optionally returning the key column.
fn build_insert_sql<T>(insert: &Insert<T>, returning: Option<&str>) -> String {
    let mut sql = if insert.values.is_empty() {
        format!("INSERT INTO {} DEFAULT VALUES", insert.table)
    } else {
        let cols: Vec<&str> = insert.values.iter().map(|(c, _)| c.as_str()).collect();
        let placeholders: Vec<String> = (1..=cols.len()).map(|i| format!("${}", i)).collect();
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            insert.table,
            cols.join(", "),
            placeholders.join(", ")
        )
    };

    if let Some(column) = returning {
        sql.push_str(&format!(" RETURNING {}", column));
    }

    sql
}

fn build_update_sql<T>(update: &Update<T>) -> String {
    let sets: Vec<String> = update
        .assignments
        .iter()
        .enumerate()
        .map(|(i, (column, _))| format!("{} = ${}", column, i + 1))
        .collect();

    format!(
        "UPDATE {} SET {}{}",
        update.table,
        sets.join(", "),
        build_where_clause(&update.filters, update.assignments.len() + 1)
    )
}

fn build_delete_sql<T>(delete: &Delete<T>) -> String {
    format!(
        "DELETE FROM {}{}",
        delete.table,
        build_where_clause(&delete.filters, 1)
    )
}

/// Render a write statement and its bound arguments.
fn prepare_statement<T>(statement: &Statement<T>) -> Result<(String, PgArguments), StorageError> {
    let mut args = PgArguments::default();

    let sql = match statement {
        Statement::Insert(insert) => {
            for (_, value) in &insert.values {
                bind_value(&mut args, value)?;
            }
            build_insert_sql(insert, None)
        }
        Statement::Update(update) => {
            for (_, value) in &update.assignments {
                bind_value(&mut args, value)?;
            }
            bind_filters(&mut args, &update.filters)?;
            build_update_sql(update)
        }
        Statement::Delete(delete) => {
            bind_filters(&mut args, &delete.filters)?;
            build_delete_sql(delete)
        }
    };

    Ok((sql, args))
}

#[async_trait]
impl QueryExecutor for PgPool {
    async fn execute<T: Entity>(&self, statement: Statement<T>) -> Result<u64, StorageError> {
        let (sql, args) = prepare_statement(&statement)?;
        trace!("{}", sql);

        let mut conn = self.0.acquire().await.map_err(db_err)?;
        let result = sqlx::query_with(&sql, args)
            .execute(&mut *conn)
            .await
            .map_err(db_err)?;

        Ok(result.rows_affected())
    }

    async fn execute_returning_key<T: Entity>(
        &self,
        insert: Insert<T>,
    ) -> Result<i64, StorageError> {
        let mut args = PgArguments::default();
        for (_, value) in &insert.values {
            bind_value(&mut args, value)?;
        }
        let sql = build_insert_sql(&insert, Some(&insert.id_column));
        trace!("{}", sql);

        let mut conn = self.0.acquire().await.map_err(db_err)?;
        let row = sqlx::query_with(&sql, args)
            .fetch_one(&mut *conn)
            .await
            .map_err(db_err)?;

        extract_key(&row, &insert.id_column)?.ok_or_else(|| {
            StorageError::Database(format!("No generated key returned for {}", insert.table))
        })
    }

    async fn fetch_optional<T: Entity>(&self, query: Query<T>) -> Result<Option<T>, StorageError> {
        let mut q = query;
        q.limit = Some(1);

        let results = self.fetch(q).await?;
        Ok(results.into_iter().next())
    }

    async fn fetch<T: Entity>(&self, query: Query<T>) -> Result<Vec<T>, StorageError> {
        let sql = build_select_sql(&query, "*");
        trace!("{}", sql);

        let mut args = PgArguments::default();
        bind_filters(&mut args, &query.filters)?;

        let mut conn = self.0.acquire().await.map_err(db_err)?;
        let rows = sqlx::query_with(&sql, args)
            .fetch_all(&mut *conn)
            .await
            .map_err(db_err)?;

        rows.iter().map(|row| deserialize_row::<T>(row)).collect()
    }

    async fn count<T: Entity>(&self, query: Query<T>) -> Result<u64, StorageError> {
        let sql = format!(
            "SELECT COUNT(*) FROM {}{}",
            query.table,
            build_where_clause(&query.filters, 1)
        );
        trace!("{}", sql);

        let mut args = PgArguments::default();
        bind_filters(&mut args, &query.filters)?;

        let mut conn = self.0.acquire().await.map_err(db_err)?;
        let row = sqlx::query_with(&sql, args)
            .fetch_one(&mut *conn)
            .await
            .map_err(db_err)?;

        let count: i64 = row.try_get(0).map_err(db_err)?;
        Ok(count.max(0) as u64)
    }

    async fn max_id<T: Entity>(&self, query: Query<T>) -> Result<Option<i64>, StorageError> {
        let sql = format!(
            "SELECT MAX({}) AS max_id FROM {}{}",
            T::id_column(),
            query.table,
            build_where_clause(&query.filters, 1)
        );
        trace!("{}", sql);

        let mut args = PgArguments::default();
        bind_filters(&mut args, &query.filters)?;

        let mut conn = self.0.acquire().await.map_err(db_err)?;
        let row = sqlx::query_with(&sql, args)
            .fetch_one(&mut *conn)
            .await
            .map_err(db_err)?;

        extract_key(&row, "max_id")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use entity_dao::{ColumnType, Value};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize, entity_dao::Entity)]
    #[entity(table = "users")]
    struct User {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<i64>,
        name: String,
        email: Option<String>,
    }

    #[derive(Debug, Clone, Serialize, Deserialize, entity_dao::Entity)]
    #[entity(table = "posts")]
    struct Post {
        id: Option<i64>,
        #[references(User)]
        author_id: Option<i64>,
        title: String,
    }

    #[test]
    fn insert_sql_lists_only_present_columns() {
        let insert = Insert::from_entity(&User::new("ann".to_string(), None)).unwrap();
        assert_eq!(
            build_insert_sql(&insert, Some("id")),
            "INSERT INTO users (name) VALUES ($1) RETURNING id"
        );
    }

    #[test]
    fn insert_without_values_uses_defaults() {
        let mut insert = Insert::from_entity(&User::new("ann".to_string(), None)).unwrap();
        insert.values.clear();
        assert_eq!(build_insert_sql(&insert, None), "INSERT INTO users DEFAULT VALUES");
    }

    #[test]
    fn update_sql_numbers_filters_after_assignments() {
        let mut user = User::new("ann".to_string(), None);
        user.id = Some(4);
        let update = Update::all_columns(&user).unwrap();
        assert_eq!(
            build_update_sql(&update),
            "UPDATE users SET name = $1, email = $2 WHERE id = $3"
        );
        assert_eq!(update.assignments[1].1, Value::Null(ColumnType::Text));
    }

    #[test]
    fn select_sql_with_order_and_paging() {
        let query = Query::<User>::new()
            .eq("name", "ann")
            .is_null("email")
            .order_by("id", Order::Desc)
            .limit(10)
            .offset(20);
        assert_eq!(
            build_select_sql(&query, "*"),
            "SELECT * FROM users WHERE name = $1 AND email IS NULL ORDER BY id DESC LIMIT 10 OFFSET 20"
        );
    }

    #[test]
    fn foreign_query_uses_declared_reference() {
        let mut author = User::new("ann".to_string(), None);
        author.id = Some(9);
        let query = Query::<Post>::foreign(&author).unwrap();
        assert_eq!(
            build_select_sql(&query, "*"),
            "SELECT * FROM posts WHERE author_id = $1"
        );
    }

    #[test]
    fn delete_sql_by_id() {
        let (sql, _) = prepare_statement(&Statement::Delete(Delete::<User>::by_id(999))).unwrap();
        assert_eq!(sql, "DELETE FROM users WHERE id = $1");
    }
}
