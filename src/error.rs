//! Error handling module
//!
//! Provides the unified error type for the migration engine. Every variant
//! carries a human-readable message and maps to an actionable remediation
//! suggestion intended for the operator at the CLI boundary.

use thiserror::Error;

/// Engine-wide error type
#[derive(Error, Debug)]
pub enum MigrationError {
    #[error("database error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    #[error("pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("schema introspection failed: {0}")]
    Introspection(String),

    #[error("migration {version} failed: {reason}")]
    Execution { version: String, reason: String },

    #[error("lock error: {0}")]
    Lock(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl MigrationError {
    /// Actionable remediation suggestion for the operator.
    pub fn remediation(&self) -> &'static str {
        match self {
            MigrationError::Postgres(_) | MigrationError::Pool(_) | MigrationError::Sqlite(_) => {
                "check database connectivity and credentials, and that the role has DDL privileges"
            }
            MigrationError::Introspection(_) => {
                "verify the connection string and that the user can read the system catalogs"
            }
            MigrationError::Execution { .. } => {
                "review the generated SQL for syntax or permission issues; migrations committed earlier in the batch remain applied"
            }
            MigrationError::Lock(_) => {
                "another migrator may hold the lock; retry later or remove a stale lock file"
            }
            MigrationError::Storage(_) => {
                "the schema change itself succeeded; inspect the migration history table and repair it manually"
            }
            MigrationError::Config(_) => "fix the configuration value and retry",
            MigrationError::Join(_) => "internal task failure; re-run the operation",
        }
    }

    /// Whether this error is a duplicate-key violation from the underlying
    /// driver. Used by storage to treat duplicate version inserts as
    /// idempotent successes rather than failures.
    pub fn is_unique_violation(&self) -> bool {
        match self {
            MigrationError::Postgres(e) => {
                e.code() == Some(&tokio_postgres::error::SqlState::UNIQUE_VIOLATION)
            }
            MigrationError::Sqlite(rusqlite::Error::SqliteFailure(e, _)) => {
                e.code == rusqlite::ErrorCode::ConstraintViolation
            }
            _ => false,
        }
    }
}

/// Result type alias used throughout the engine
pub type MigrationResult<T> = Result<T, MigrationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_variant_has_a_remediation() {
        let errors = [
            MigrationError::Introspection("nope".into()),
            MigrationError::Execution {
                version: "20260101000000_abcd".into(),
                reason: "syntax error".into(),
            },
            MigrationError::Lock("held".into()),
            MigrationError::Storage("insert failed".into()),
            MigrationError::Config("bad url".into()),
        ];
        for e in errors {
            assert!(!e.remediation().is_empty());
        }
    }

    #[test]
    fn plain_errors_are_not_unique_violations() {
        assert!(!MigrationError::Storage("boom".into()).is_unique_violation());
        assert!(!MigrationError::Introspection("x".into()).is_unique_violation());
    }
}
