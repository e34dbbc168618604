//! Schema introspection module
//!
//! Reads the live database catalog: table names and per-table columns with
//! name, type string, nullability and default. The live catalog is the source
//! of truth the declared model is diffed against.

use crate::error::MigrationError;
use serde::{Deserialize, Serialize};

/// Column as reflected from the live catalog
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveColumn {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
    pub ordinal_position: i32,
}

/// Catalog introspector for PostgreSQL
///
/// Works against the connection's current schema so unqualified declared
/// table names compare cleanly.
pub struct PostgresIntrospector;

impl PostgresIntrospector {
    /// List base table names in the current schema.
    pub async fn table_names(
        client: &deadpool_postgres::Client,
    ) -> Result<Vec<String>, MigrationError> {
        let query = r#"
            SELECT t.table_name
            FROM information_schema.tables t
            WHERE t.table_schema = current_schema()
              AND t.table_type = 'BASE TABLE'
            ORDER BY t.table_name
        "#;

        let rows = client.query(query, &[]).await?;
        Ok(rows.iter().map(|row| row.get("table_name")).collect())
    }

    /// Columns for one table, in ordinal order.
    pub async fn columns(
        client: &deadpool_postgres::Client,
        table: &str,
    ) -> Result<Vec<LiveColumn>, MigrationError> {
        let query = r#"
            SELECT
                c.column_name,
                c.data_type,
                c.is_nullable,
                c.column_default,
                c.ordinal_position
            FROM information_schema.columns c
            WHERE c.table_schema = current_schema()
              AND c.table_name = $1
            ORDER BY c.ordinal_position
        "#;

        let rows = client.query(query, &[&table]).await?;

        let columns = rows
            .iter()
            .map(|row| LiveColumn {
                name: row.get("column_name"),
                data_type: row.get("data_type"),
                nullable: row.get::<_, String>("is_nullable") == "YES",
                default_value: row.get("column_default"),
                ordinal_position: row.get("ordinal_position"),
            })
            .collect();

        Ok(columns)
    }
}

/// Catalog introspector for SQLite
///
/// Runs on the caller's thread; the SQLite database handle offloads these
/// calls onto the blocking pool.
pub struct SqliteIntrospector;

impl SqliteIntrospector {
    /// List user table names, excluding SQLite internals.
    pub fn table_names(conn: &rusqlite::Connection) -> Result<Vec<String>, MigrationError> {
        let mut stmt = conn.prepare(
            "SELECT name FROM sqlite_master
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
             ORDER BY name",
        )?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }

    /// Columns for one table via `PRAGMA table_info`.
    pub fn columns(
        conn: &rusqlite::Connection,
        table: &str,
    ) -> Result<Vec<LiveColumn>, MigrationError> {
        let pragma = format!("PRAGMA table_info({})", quote_ident(table));
        let mut stmt = conn.prepare(&pragma)?;
        let columns = stmt
            .query_map([], |row| {
                Ok(LiveColumn {
                    ordinal_position: row.get::<_, i32>(0)? + 1,
                    name: row.get(1)?,
                    data_type: row.get(2)?,
                    nullable: row.get::<_, i32>(3)? == 0,
                    default_value: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(columns)
    }
}

/// Double-quote an identifier, escaping embedded quotes. Guards generated SQL
/// against malformed table/column names.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
