//! Migration history storage
//!
//! One durable table records every applied migration. Recording is
//! deliberately forgiving: by the time a row is written the schema change has
//! already been applied, so a storage failure only degrades audit/rollback
//! capability and is reported, never raised. Duplicate versions are swallowed
//! as idempotent successes.

use crate::config::MigratorSettings;
use crate::db::{Database, JsonRow};
use crate::engine::types::{MigrationRecord, OperationResult, RiskLevel};
use crate::error::MigrationError;
use crate::introspection::quote_ident;
use chrono::{DateTime, NaiveDateTime, Utc};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub struct MigrationStorage {
    db: Arc<dyn Database>,
    table: String,
    init_retries: u32,
    init_backoff: Duration,
}

impl MigrationStorage {
    pub fn new(db: Arc<dyn Database>, settings: &MigratorSettings) -> Self {
        Self {
            db,
            table: settings.history_table.clone(),
            init_retries: settings.init_retries.max(1),
            init_backoff: settings.init_backoff,
        }
    }

    /// Name of the history table.
    pub fn table_name(&self) -> &str {
        &self.table
    }

    /// Create the history table if it does not exist. Retried with linear
    /// backoff: this runs alongside other connection-dependent startup work
    /// and transient pool exhaustion is common there.
    pub async fn initialize(&self) -> Result<(), MigrationError> {
        let sql = self.create_table_sql();
        let mut last_error = None;

        for attempt in 1..=self.init_retries {
            match self.db.execute(&sql).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(
                        attempt,
                        retries = self.init_retries,
                        error = %e,
                        "history table initialization failed"
                    );
                    last_error = Some(e);
                    if attempt < self.init_retries {
                        tokio::time::sleep(self.init_backoff * attempt).await;
                    }
                }
            }
        }

        let source = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        Err(MigrationError::Storage(format!(
            "could not initialize history table '{}': {source}",
            self.table
        )))
    }

    /// Insert one history row. Never raises: a duplicate version is reported
    /// as an idempotent success, any other failure as a non-fatal error the
    /// caller logs and moves past.
    pub async fn record_migration(
        &self,
        version: &str,
        description: &str,
        rollback_sql: Option<&str>,
        risk: RiskLevel,
    ) -> OperationResult {
        let d = self.db.dialect();
        let sql = format!(
            "INSERT INTO {} (version, description, rollback_sql, risk_level, status) \
             VALUES ({}, {}, {}, {}, {})",
            quote_ident(&self.table),
            d.placeholder(1),
            d.placeholder(2),
            d.placeholder(3),
            d.placeholder(4),
            d.placeholder(5),
        );
        let params = vec![
            Some(version.to_string()),
            Some(description.to_string()),
            rollback_sql.map(|s| s.to_string()),
            Some(risk.as_str().to_string()),
            Some("applied".to_string()),
        ];

        match self.db.execute_with_params(&sql, params).await {
            Ok(_) => {
                debug!(version, "migration recorded");
                let mut result = OperationResult::ok();
                result
                    .metadata
                    .insert("version".to_string(), serde_json::json!(version));
                result
            }
            Err(e) if e.is_unique_violation() => {
                debug!(version, "duplicate migration record ignored");
                OperationResult::idempotent(version)
            }
            Err(e) => {
                warn!(version, error = %e, "failed to record migration history");
                OperationResult::failed(format!("{e} ({})", e.remediation()))
            }
        }
    }

    /// Versions already applied, ascending. Best-effort: detection is
    /// schema-state-based and does not depend on history for correctness, so
    /// a read failure degrades to an empty list.
    pub async fn get_applied_versions(&self) -> Vec<String> {
        let sql = format!(
            "SELECT version FROM {} ORDER BY version",
            quote_ident(&self.table)
        );
        match self.db.query_rows(&sql).await {
            Ok(rows) => rows
                .iter()
                .filter_map(|row| row.get("version").and_then(|v| v.as_str()))
                .map(|s| s.to_string())
                .collect(),
            Err(e) => {
                warn!(error = %e, "could not read applied versions; returning empty");
                Vec::new()
            }
        }
    }

    /// Most recent history rows, newest first. Best-effort like
    /// [`get_applied_versions`](Self::get_applied_versions).
    pub async fn get_migration_history(&self, limit: usize) -> Vec<MigrationRecord> {
        let sql = format!(
            "SELECT id, version, description, applied_at, rollback_sql, risk_level, status \
             FROM {} ORDER BY version DESC LIMIT {limit}",
            quote_ident(&self.table)
        );
        match self.db.query_rows(&sql).await {
            Ok(rows) => rows.iter().map(record_from_row).collect(),
            Err(e) => {
                warn!(error = %e, "could not read migration history; returning empty");
                Vec::new()
            }
        }
    }

    fn create_table_sql(&self) -> String {
        let table = quote_ident(&self.table);
        match self.db.dialect() {
            crate::db::Dialect::Postgres => format!(
                "CREATE TABLE IF NOT EXISTS {table} (
                    id BIGSERIAL PRIMARY KEY,
                    version TEXT NOT NULL UNIQUE,
                    description TEXT NOT NULL,
                    applied_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                    rollback_sql TEXT,
                    risk_level TEXT NOT NULL,
                    status TEXT NOT NULL DEFAULT 'applied'
                )"
            ),
            crate::db::Dialect::Sqlite => format!(
                "CREATE TABLE IF NOT EXISTS {table} (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    version TEXT NOT NULL UNIQUE,
                    description TEXT NOT NULL,
                    applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                    rollback_sql TEXT,
                    risk_level TEXT NOT NULL,
                    status TEXT NOT NULL DEFAULT 'applied'
                )"
            ),
        }
    }
}

fn record_from_row(row: &JsonRow) -> MigrationRecord {
    let text = |key: &str| {
        row.get(key)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string()
    };

    MigrationRecord {
        id: row.get("id").and_then(|v| v.as_i64()).unwrap_or_default(),
        version: text("version"),
        description: text("description"),
        applied_at: parse_timestamp(&text("applied_at")),
        rollback_sql: row
            .get("rollback_sql")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string()),
        risk: RiskLevel::from_str(&text("risk_level")).unwrap_or(RiskLevel::High),
        status: text("status"),
    }
}

/// Parse the timestamp spellings the two backends produce: RFC 3339 from
/// PostgreSQL, `YYYY-MM-DD HH:MM:SS` from SQLite's CURRENT_TIMESTAMP.
fn parse_timestamp(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .or_else(|_| {
            NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S").map(|naive| naive.and_utc())
        })
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}
