//! # Database Module
//!
//! Async row lookups with SQLx for PostgreSQL and SQLite, used by
//! route-model binding.
//!
//! Rows come back as JSON objects so a bound model can be stored on the
//! request and serialised straight into a response.

use crate::error::{Error, Result};
use serde_json::{Map, Value};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Row, TypeInfo};

/// A fetched row, column name → value
pub type DbRow = Map<String, Value>;

/// Database connection pool supporting multiple backends
#[derive(Clone, Debug)]
pub enum DatabasePool {
    /// SQLite connection pool
    Sqlite(SqlitePool),
    /// PostgreSQL connection pool
    Postgres(PgPool),
}

impl DatabasePool {
    /// Connect to a SQLite database
    ///
    /// `max_connections` defaults to 10. An in-memory database is private to
    /// each connection, so use one connection for `sqlite::memory:`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Database` when the connection fails.
    pub async fn connect_sqlite(url: &str, max_connections: Option<u32>) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.unwrap_or(10))
            .connect(url)
            .await
            .map_err(|e| Error::Database {
                message: format!("SQLite connection failed: {e}"),
            })?;

        Ok(Self::Sqlite(pool))
    }

    /// Connect to a PostgreSQL database
    ///
    /// # Errors
    ///
    /// Returns `Error::Database` when the connection fails.
    pub async fn connect_postgres(url: &str, max_connections: Option<u32>) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.unwrap_or(10))
            .connect(url)
            .await
            .map_err(|e| Error::Database {
                message: format!("PostgreSQL connection failed: {e}"),
            })?;

        Ok(Self::Postgres(pool))
    }

    /// Execute a statement that returns no rows; yields the affected count
    ///
    /// # Errors
    ///
    /// Returns `Error::Database` when the statement fails.
    pub async fn execute(&self, query: &str) -> Result<u64> {
        let affected = match self {
            Self::Sqlite(pool) => sqlx::query(query)
                .execute(pool)
                .await
                .map(|r| r.rows_affected()),
            Self::Postgres(pool) => sqlx::query(query)
                .execute(pool)
                .await
                .map(|r| r.rows_affected()),
        };
        affected.map_err(query_error)
    }

    /// Fetch every row of `query`
    ///
    /// # Errors
    ///
    /// Returns `Error::Database` when the query fails.
    pub async fn fetch_all(&self, query: &str) -> Result<Vec<DbRow>> {
        match self {
            Self::Sqlite(pool) => {
                let rows: Vec<SqliteRow> = sqlx::query(query)
                    .fetch_all(pool)
                    .await
                    .map_err(query_error)?;
                Ok(rows.iter().map(sqlite_row_to_json).collect())
            }
            Self::Postgres(pool) => {
                let rows: Vec<PgRow> = sqlx::query(query)
                    .fetch_all(pool)
                    .await
                    .map_err(query_error)?;
                Ok(rows.iter().map(pg_row_to_json).collect())
            }
        }
    }

    /// First row of `table` whose `column` equals `value`
    ///
    /// Both identifiers are validated before they are quoted into the
    /// statement; `value` is always bound. PostgreSQL compares the column
    /// as text so numeric keys match their path form.
    ///
    /// # Errors
    ///
    /// Returns `Error::Database` for an invalid identifier or a failed query.
    pub async fn find_row(&self, table: &str, column: &str, value: &str) -> Result<Option<DbRow>> {
        validate_identifier(table)?;
        validate_identifier(column)?;
        let table = quote_identifier(table);
        let column = quote_identifier(column);

        match self {
            Self::Sqlite(pool) => {
                let sql = format!("SELECT * FROM {table} WHERE {column} = ? LIMIT 1");
                let row: Option<SqliteRow> = sqlx::query(&sql)
                    .bind(value)
                    .fetch_optional(pool)
                    .await
                    .map_err(query_error)?;
                Ok(row.as_ref().map(sqlite_row_to_json))
            }
            Self::Postgres(pool) => {
                let sql = format!("SELECT * FROM {table} WHERE {column}::text = $1 LIMIT 1");
                let row: Option<PgRow> = sqlx::query(&sql)
                    .bind(value)
                    .fetch_optional(pool)
                    .await
                    .map_err(query_error)?;
                Ok(row.as_ref().map(pg_row_to_json))
            }
        }
    }

    /// Close the database connection pool
    pub async fn close(&self) {
        match self {
            Self::Sqlite(pool) => pool.close().await,
            Self::Postgres(pool) => pool.close().await,
        }
    }
}

fn query_error(e: sqlx::Error) -> Error {
    Error::Database {
        message: format!("Query error: {e}"),
    }
}

/// Accept `name` or `schema.name` made of ASCII letters, digits and `_`
///
/// # Errors
///
/// Returns `Error::Database` naming the rejected identifier.
pub fn validate_identifier(ident: &str) -> Result<()> {
    let valid = !ident.is_empty()
        && ident.split('.').count() <= 2
        && ident.split('.').all(|part| {
            part.chars().next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
                && part.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        });
    if valid {
        Ok(())
    } else {
        Err(Error::Database {
            message: format!("Invalid SQL identifier '{ident}'"),
        })
    }
}

fn quote_identifier(ident: &str) -> String {
    ident
        .split('.')
        .map(|part| format!("\"{part}\""))
        .collect::<Vec<_>>()
        .join(".")
}

fn sqlite_row_to_json(row: &SqliteRow) -> DbRow {
    let mut map = Map::new();

    for (i, column) in row.columns().iter().enumerate() {
        let value = match column.type_info().name() {
            "INTEGER" => row.try_get::<i64, _>(i).map(Value::from),
            "REAL" => row.try_get::<f64, _>(i).map(Value::from),
            "BOOLEAN" => row.try_get::<bool, _>(i).map(Value::from),
            "BLOB" => row.try_get::<Vec<u8>, _>(i).map(Value::from),
            _ => row.try_get::<String, _>(i).map(Value::from),
        };
        map.insert(column.name().to_string(), value.unwrap_or(Value::Null));
    }

    map
}

fn pg_row_to_json(row: &PgRow) -> DbRow {
    let mut map = Map::new();

    for (i, column) in row.columns().iter().enumerate() {
        let value = match column.type_info().name() {
            "INT2" => row.try_get::<i16, _>(i).map(Value::from),
            "INT4" => row.try_get::<i32, _>(i).map(Value::from),
            "INT8" => row.try_get::<i64, _>(i).map(Value::from),
            "FLOAT4" => row.try_get::<f32, _>(i).map(Value::from),
            "FLOAT8" => row.try_get::<f64, _>(i).map(Value::from),
            "BOOL" => row.try_get::<bool, _>(i).map(Value::from),
            "BYTEA" => row.try_get::<Vec<u8>, _>(i).map(Value::from),
            _ => row.try_get::<String, _>(i).map(Value::from),
        };
        map.insert(column.name().to_string(), value.unwrap_or(Value::Null));
    }

    map
}
