//! SchemaDrift — schema drift reconciliation and safe auto-migration
//!
//! Reconciles a declared application data model against a live relational
//! database: detects drift, classifies the risk of each required change,
//! compiles reversible SQL, and applies it under operator-selected safety
//! policies while guaranteeing only one process migrates a given database at
//! a time.
//!
//! Pipeline stages:
//! - Detect: diff the declared model against the live catalog
//! - Assess: classify each change SAFE / MEDIUM / HIGH
//! - Generate: compile forward/reverse SQL (table rebuilds for engines with
//!   limited ALTER TABLE support)
//! - Execute: apply per-migration transactions under an execution mode
//! - Record: durable, idempotent migration history
//!
//! Planning is side-effect free; execution is a separate, explicit call.
//! Front-ends (CLI, services) drive the [`MigrationEngine`] and render its
//! plans.

pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod introspection;
pub mod lock;
pub mod schema;
pub mod storage;

pub use config::{DatabaseSettings, MigratorSettings};
pub use db::{Database, Dialect, PostgresDatabase, SqliteDatabase};
pub use engine::detector::SchemaDetector;
pub use engine::executor::MigrationExecutor;
pub use engine::generator::MigrationGenerator;
pub use engine::risk::{RiskAssessor, RiskRule};
pub use engine::types::{
    ChangeOp, ExecutionMode, Migration, MigrationPlan, MigrationRecord, OperationResult,
    PlanStatus, RiskLevel, RiskSummary, SchemaChange,
};
pub use engine::MigrationEngine;
pub use error::{MigrationError, MigrationResult};
pub use introspection::LiveColumn;
pub use lock::{FileLock, LockProvider, PgAdvisoryLock};
pub use schema::{ColumnDef, DeclaredSchema, TableDef};
pub use storage::MigrationStorage;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize structured logging for binaries and integration harnesses that
/// embed the engine. Honors `RUST_LOG`; defaults to info for the crate.
pub fn init_tracing() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,schemadrift=debug"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_level(true)
                .compact(),
        )
        .init();
}
