//! Database access layer
//!
//! A small dialect-aware abstraction over the two supported engines. The
//! trait offers exactly what the migration pipeline needs: catalog
//! introspection, statement execution (single, parameterized, and
//! transactional batch), and row queries returned as JSON maps.
//!
//! The SQLite implementation wraps a blocking `rusqlite` connection and
//! offloads every call through `tokio::task::spawn_blocking`, so a slow
//! statement never stalls unrelated async work sharing the runtime. The
//! PostgreSQL implementation is natively async on a deadpool pool.

use crate::error::MigrationError;
use crate::introspection::{LiveColumn, PostgresIntrospector, SqliteIntrospector};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// A queried row, keyed by column name.
pub type JsonRow = serde_json::Map<String, Value>;

/// SQL dialect of a target database, with the capability flags the generator
/// and risk assessor branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    Postgres,
    Sqlite,
}

impl Dialect {
    /// Whether the dialect can change a column's type in place.
    pub fn supports_alter_column(&self) -> bool {
        matches!(self, Dialect::Postgres)
    }

    /// Whether the dialect can drop a column in place.
    pub fn supports_drop_column(&self) -> bool {
        matches!(self, Dialect::Postgres)
    }

    /// Positional placeholder for parameterized statements (1-based).
    pub fn placeholder(&self, n: usize) -> String {
        match self {
            Dialect::Postgres => format!("${n}"),
            Dialect::Sqlite => format!("?{n}"),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Dialect::Postgres => "postgres",
            Dialect::Sqlite => "sqlite",
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Target database handle shared by detection, generation, execution and
/// storage. The advisory-lock session is deliberately NOT part of this
/// abstraction: it must live on its own dedicated connection.
#[async_trait]
pub trait Database: Send + Sync {
    fn dialect(&self) -> Dialect;

    /// List user table names.
    async fn list_tables(&self) -> Result<Vec<String>, MigrationError>;

    /// List columns of one table, in ordinal order.
    async fn list_columns(&self, table: &str) -> Result<Vec<LiveColumn>, MigrationError>;

    /// Execute raw SQL outside any explicit transaction.
    async fn execute(&self, sql: &str) -> Result<(), MigrationError>;

    /// Execute one parameterized statement; returns the affected row count.
    /// Placeholders follow the dialect convention (`$n` / `?n`).
    async fn execute_with_params(
        &self,
        sql: &str,
        params: Vec<Option<String>>,
    ) -> Result<u64, MigrationError>;

    /// Run the given statements inside a single transaction. Any failure
    /// rolls the whole batch back.
    async fn execute_transaction(&self, statements: &[String]) -> Result<(), MigrationError>;

    /// Run a query and return rows as JSON maps keyed by column name.
    async fn query_rows(&self, sql: &str) -> Result<Vec<JsonRow>, MigrationError>;
}

// =============================================================================
// PostgreSQL
// =============================================================================

/// PostgreSQL-backed database handle on a deadpool connection pool.
pub struct PostgresDatabase {
    pool: deadpool_postgres::Pool,
}

impl PostgresDatabase {
    pub fn new(pool: deadpool_postgres::Pool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &deadpool_postgres::Pool {
        &self.pool
    }
}

#[async_trait]
impl Database for PostgresDatabase {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    async fn list_tables(&self) -> Result<Vec<String>, MigrationError> {
        let client = self.pool.get().await?;
        PostgresIntrospector::table_names(&client).await
    }

    async fn list_columns(&self, table: &str) -> Result<Vec<LiveColumn>, MigrationError> {
        let client = self.pool.get().await?;
        PostgresIntrospector::columns(&client, table).await
    }

    async fn execute(&self, sql: &str) -> Result<(), MigrationError> {
        let client = self.pool.get().await?;
        client.batch_execute(sql).await?;
        Ok(())
    }

    async fn execute_with_params(
        &self,
        sql: &str,
        params: Vec<Option<String>>,
    ) -> Result<u64, MigrationError> {
        let client = self.pool.get().await?;
        let refs: Vec<&(dyn tokio_postgres::types::ToSql + Sync)> = params
            .iter()
            .map(|p| p as &(dyn tokio_postgres::types::ToSql + Sync))
            .collect();
        let affected = client.execute(sql, &refs).await?;
        Ok(affected)
    }

    async fn execute_transaction(&self, statements: &[String]) -> Result<(), MigrationError> {
        let mut client = self.pool.get().await?;
        let transaction = client.transaction().await?;
        for statement in statements {
            // Rollback is automatic when the transaction guard drops on error.
            transaction.batch_execute(statement).await?;
        }
        transaction.commit().await?;
        Ok(())
    }

    async fn query_rows(&self, sql: &str) -> Result<Vec<JsonRow>, MigrationError> {
        let client = self.pool.get().await?;
        let rows = client.query(sql, &[]).await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let mut map = JsonRow::new();
            for (idx, column) in row.columns().iter().enumerate() {
                map.insert(column.name().to_string(), pg_json_value(&row, idx));
            }
            out.push(map);
        }
        Ok(out)
    }
}

/// Convert one PostgreSQL column value to JSON. Covers the types the engine
/// reads back (history table + catalog queries); anything else degrades to a
/// string rendering or null.
fn pg_json_value(row: &tokio_postgres::Row, idx: usize) -> Value {
    use tokio_postgres::types::Type;

    let ty = row.columns()[idx].type_();

    if *ty == Type::BOOL {
        opt_value(row.try_get::<_, Option<bool>>(idx))
    } else if *ty == Type::INT2 {
        opt_value(row.try_get::<_, Option<i16>>(idx))
    } else if *ty == Type::INT4 {
        opt_value(row.try_get::<_, Option<i32>>(idx))
    } else if *ty == Type::INT8 {
        opt_value(row.try_get::<_, Option<i64>>(idx))
    } else if *ty == Type::FLOAT4 {
        opt_value(row.try_get::<_, Option<f32>>(idx))
    } else if *ty == Type::FLOAT8 {
        opt_value(row.try_get::<_, Option<f64>>(idx))
    } else if *ty == Type::TIMESTAMPTZ {
        match row.try_get::<_, Option<chrono::DateTime<chrono::Utc>>>(idx) {
            Ok(Some(ts)) => Value::String(ts.to_rfc3339()),
            _ => Value::Null,
        }
    } else if *ty == Type::TIMESTAMP {
        match row.try_get::<_, Option<chrono::NaiveDateTime>>(idx) {
            Ok(Some(ts)) => Value::String(ts.format("%Y-%m-%d %H:%M:%S").to_string()),
            _ => Value::Null,
        }
    } else {
        match row.try_get::<_, Option<String>>(idx) {
            Ok(Some(s)) => Value::String(s),
            _ => Value::Null,
        }
    }
}

fn opt_value<T: Into<Value>>(value: Result<Option<T>, tokio_postgres::Error>) -> Value {
    match value {
        Ok(Some(v)) => v.into(),
        _ => Value::Null,
    }
}

// =============================================================================
// SQLite
// =============================================================================

/// SQLite-backed database handle.
///
/// `rusqlite` is a blocking driver; the shared connection sits behind a mutex
/// and every operation is dispatched onto the blocking thread pool.
pub struct SqliteDatabase {
    conn: Arc<parking_lot::Mutex<rusqlite::Connection>>,
}

impl SqliteDatabase {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, MigrationError> {
        let conn = rusqlite::Connection::open(path)?;
        Ok(Self {
            conn: Arc::new(parking_lot::Mutex::new(conn)),
        })
    }

    /// In-memory database; used heavily by the test suite.
    pub fn open_in_memory() -> Result<Self, MigrationError> {
        let conn = rusqlite::Connection::open_in_memory()?;
        Ok(Self {
            conn: Arc::new(parking_lot::Mutex::new(conn)),
        })
    }

    /// Offload a closure onto the blocking pool with exclusive access to the
    /// connection.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, MigrationError>
    where
        T: Send + 'static,
        F: FnOnce(&mut rusqlite::Connection) -> Result<T, MigrationError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock();
            f(&mut guard)
        })
        .await?
    }
}

#[async_trait]
impl Database for SqliteDatabase {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    async fn list_tables(&self) -> Result<Vec<String>, MigrationError> {
        self.with_conn(|conn| SqliteIntrospector::table_names(conn))
            .await
    }

    async fn list_columns(&self, table: &str) -> Result<Vec<LiveColumn>, MigrationError> {
        let table = table.to_string();
        self.with_conn(move |conn| SqliteIntrospector::columns(conn, &table))
            .await
    }

    async fn execute(&self, sql: &str) -> Result<(), MigrationError> {
        let sql = sql.to_string();
        self.with_conn(move |conn| {
            conn.execute_batch(&sql)?;
            Ok(())
        })
        .await
    }

    async fn execute_with_params(
        &self,
        sql: &str,
        params: Vec<Option<String>>,
    ) -> Result<u64, MigrationError> {
        let sql = sql.to_string();
        self.with_conn(move |conn| {
            let affected = conn.execute(&sql, rusqlite::params_from_iter(params.iter()))?;
            Ok(affected as u64)
        })
        .await
    }

    async fn execute_transaction(&self, statements: &[String]) -> Result<(), MigrationError> {
        let statements = statements.to_vec();
        self.with_conn(move |conn| {
            let transaction = conn.transaction()?;
            for statement in &statements {
                // Dropping the transaction on error rolls everything back.
                transaction.execute_batch(statement)?;
            }
            transaction.commit()?;
            Ok(())
        })
        .await
    }

    async fn query_rows(&self, sql: &str) -> Result<Vec<JsonRow>, MigrationError> {
        let sql = sql.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let column_names: Vec<String> =
                stmt.column_names().iter().map(|s| s.to_string()).collect();

            let mut rows = stmt.query([])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                let mut map = JsonRow::new();
                for (idx, name) in column_names.iter().enumerate() {
                    map.insert(name.clone(), sqlite_json_value(row.get_ref(idx)?));
                }
                out.push(map);
            }
            Ok(out)
        })
        .await
    }
}

fn sqlite_json_value(value: rusqlite::types::ValueRef<'_>) -> Value {
    use rusqlite::types::ValueRef;
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(n) => Value::from(n),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        // Binary payloads never appear in the engine's own queries.
        ValueRef::Blob(_) => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sqlite_transaction_rolls_back_on_failure() {
        let db = SqliteDatabase::open_in_memory().unwrap();
        db.execute("CREATE TABLE t (id INTEGER PRIMARY KEY, v TEXT NOT NULL)")
            .await
            .unwrap();

        let statements = vec![
            "INSERT INTO t (id, v) VALUES (1, 'first')".to_string(),
            "INSERT INTO t (id, v) VALUES (2, NULL)".to_string(),
        ];
        let result = db.execute_transaction(&statements).await;
        assert!(result.is_err());

        let rows = db.query_rows("SELECT COUNT(*) AS n FROM t").await.unwrap();
        assert_eq!(rows[0]["n"], serde_json::json!(0));
    }

    #[tokio::test]
    async fn sqlite_query_rows_preserves_types() {
        let db = SqliteDatabase::open_in_memory().unwrap();
        db.execute("CREATE TABLE t (id INTEGER, name TEXT, score REAL)")
            .await
            .unwrap();
        db.execute("INSERT INTO t VALUES (7, 'ada', 0.5), (8, NULL, NULL)")
            .await
            .unwrap();

        let rows = db.query_rows("SELECT * FROM t ORDER BY id").await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["id"], serde_json::json!(7));
        assert_eq!(rows[0]["name"], serde_json::json!("ada"));
        assert_eq!(rows[0]["score"], serde_json::json!(0.5));
        assert_eq!(rows[1]["name"], Value::Null);
    }

    #[tokio::test]
    async fn sqlite_parameterized_insert() {
        let db = SqliteDatabase::open_in_memory().unwrap();
        db.execute("CREATE TABLE t (a TEXT, b TEXT)").await.unwrap();

        let affected = db
            .execute_with_params(
                "INSERT INTO t (a, b) VALUES (?1, ?2)",
                vec![Some("x".to_string()), None],
            )
            .await
            .unwrap();
        assert_eq!(affected, 1);

        let rows = db.query_rows("SELECT a, b FROM t").await.unwrap();
        assert_eq!(rows[0]["a"], serde_json::json!("x"));
        assert_eq!(rows[0]["b"], Value::Null);
    }

    #[test]
    fn dialect_capabilities() {
        assert!(Dialect::Postgres.supports_alter_column());
        assert!(Dialect::Postgres.supports_drop_column());
        assert!(!Dialect::Sqlite.supports_alter_column());
        assert!(!Dialect::Sqlite.supports_drop_column());
        assert_eq!(Dialect::Postgres.placeholder(2), "$2");
        assert_eq!(Dialect::Sqlite.placeholder(2), "?2");
    }
}
