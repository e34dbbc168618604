//! Migration execution
//!
//! Applies a plan under an operator-chosen execution mode. Each migration
//! runs in its own transaction; the first failure rolls that migration back
//! and halts the rest of the batch. Migrations committed earlier in the batch
//! stand — there is no cross-migration atomicity.

use crate::db::Database;
use crate::engine::types::{ExecutionMode, Migration, MigrationPlan, PlanStatus};
use crate::error::MigrationError;
use crate::storage::MigrationStorage;
use std::sync::Arc;
use tracing::info;

pub struct MigrationExecutor {
    db: Arc<dyn Database>,
    storage: Arc<MigrationStorage>,
}

impl MigrationExecutor {
    pub fn new(db: Arc<dyn Database>, storage: Arc<MigrationStorage>) -> Self {
        Self { db, storage }
    }

    /// Apply the plan under `mode`. Returns the updated plan plus the list of
    /// migrations actually executed, in order.
    ///
    /// Migrations above the mode's risk ceiling are skipped and left pending
    /// for manual review; the returned status is `completed` only when every
    /// plan migration ran. Each applied migration is recorded into history
    /// right after its transaction commits; recording failures are logged by
    /// storage and never fail the batch.
    pub async fn execute_plan(
        &self,
        plan: &MigrationPlan,
        mode: ExecutionMode,
    ) -> Result<(MigrationPlan, Vec<Migration>), MigrationError> {
        if mode == ExecutionMode::DryRun {
            for migration in &plan.migrations {
                info!(
                    version = %migration.version,
                    risk = %migration.risk,
                    "[dry run] would execute: {}",
                    migration.description
                );
            }
            return Ok((plan.clone(), Vec::new()));
        }

        let mut executed = Vec::new();

        for migration in &plan.migrations {
            if !mode.allows(migration.risk) {
                info!(
                    version = %migration.version,
                    risk = %migration.risk,
                    "skipping migration above mode risk ceiling: {}",
                    migration.description
                );
                continue;
            }

            let statements = split_statements(&migration.upgrade_sql);
            self.db
                .execute_transaction(&statements)
                .await
                .map_err(|e| MigrationError::Execution {
                    version: migration.version.clone(),
                    reason: e.to_string(),
                })?;

            info!(
                version = %migration.version,
                risk = %migration.risk,
                "migration applied: {}",
                migration.description
            );

            // History is audit data; by now the change is already live.
            let _ = self
                .storage
                .record_migration(
                    &migration.version,
                    &migration.description,
                    Some(&migration.downgrade_sql),
                    migration.risk,
                )
                .await;

            executed.push(migration.clone());
        }

        let status = if executed.len() == plan.migrations.len() {
            PlanStatus::Completed
        } else {
            PlanStatus::Partial
        };

        let updated = MigrationPlan {
            migrations: plan.migrations.clone(),
            status,
        };
        Ok((updated, executed))
    }
}

/// Split migration SQL into executable statements on `;` boundaries, dropping
/// comment-only lines and bare transaction markers. The copy-swap SQL embeds
/// its own BEGIN/COMMIT; stripping them here keeps it from double-nesting
/// inside the executor's per-migration transaction.
pub fn split_statements(sql: &str) -> Vec<String> {
    sql.split(';')
        .filter_map(|chunk| {
            let lines: Vec<&str> = chunk
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with("--"))
                .collect();
            if lines.is_empty() {
                return None;
            }
            let statement = lines.join("\n");
            let upper = statement.to_uppercase();
            if matches!(upper.as_str(), "BEGIN" | "BEGIN TRANSACTION" | "COMMIT" | "END") {
                return None;
            }
            Some(statement)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MigratorSettings;
    use crate::db::{Dialect, SqliteDatabase};
    use crate::engine::generator::MigrationGenerator;
    use crate::engine::types::{ChangeOp, RiskLevel, SchemaChange};
    use crate::schema::{ColumnDef, TableDef};
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    fn fixture(db: Arc<SqliteDatabase>) -> (MigrationExecutor, Arc<MigrationStorage>) {
        let storage = Arc::new(MigrationStorage::new(
            db.clone(),
            &MigratorSettings::default(),
        ));
        (MigrationExecutor::new(db, storage.clone()), storage)
    }

    fn migration(version: &str, risk: RiskLevel, upgrade_sql: &str) -> Migration {
        Migration {
            version: version.to_string(),
            description: format!("test migration {version}"),
            risk,
            upgrade_sql: upgrade_sql.to_string(),
            downgrade_sql: "-- none".to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn split_drops_comments_and_transaction_markers() {
        let sql = "BEGIN TRANSACTION;\n\
                   -- rebuild users\n\
                   CREATE TABLE \"users_new_ab12\" (\n    \"id\" INTEGER\n);\n\
                   INSERT INTO \"users_new_ab12\" (\"id\") SELECT \"id\" FROM \"users\";\n\
                   DROP TABLE \"users\";\n\
                   ALTER TABLE \"users_new_ab12\" RENAME TO \"users\";\n\
                   COMMIT;";
        let statements = split_statements(sql);
        assert_eq!(statements.len(), 4);
        assert!(statements[0].starts_with("CREATE TABLE"));
        assert!(statements[3].starts_with("ALTER TABLE"));
    }

    #[test]
    fn split_skips_comment_only_sql() {
        let statements = split_statements("-- no automatic downgrade\n-- restore from backup");
        assert!(statements.is_empty());
    }

    #[tokio::test]
    async fn dry_run_executes_nothing() {
        let db = Arc::new(SqliteDatabase::open_in_memory().unwrap());
        let (executor, _) = fixture(db.clone());

        let plan = MigrationPlan::pending(vec![migration(
            "20260807120000_aaaa",
            RiskLevel::Safe,
            "CREATE TABLE \"t\" (\"id\" INTEGER);",
        )]);

        let (updated, executed) = executor
            .execute_plan(&plan, ExecutionMode::DryRun)
            .await
            .unwrap();
        assert!(executed.is_empty());
        assert_eq!(updated.status, PlanStatus::Pending);
        assert!(db.list_tables().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn safe_mode_leaves_high_risk_pending() {
        let db = Arc::new(SqliteDatabase::open_in_memory().unwrap());
        let (executor, storage) = fixture(db.clone());
        storage.initialize().await.unwrap();

        let plan = MigrationPlan::pending(vec![
            migration(
                "20260807120000_aaaa",
                RiskLevel::Safe,
                "CREATE TABLE \"a\" (\"id\" INTEGER);",
            ),
            migration(
                "20260807120001_bbbb",
                RiskLevel::High,
                "CREATE TABLE \"b\" (\"id\" INTEGER);",
            ),
        ]);

        let (updated, executed) = executor
            .execute_plan(&plan, ExecutionMode::Safe)
            .await
            .unwrap();
        assert_eq!(executed.len(), 1);
        assert_eq!(updated.status, PlanStatus::Partial);

        let tables = db.list_tables().await.unwrap();
        assert!(tables.contains(&"a".to_string()));
        assert!(!tables.contains(&"b".to_string()));
    }

    #[tokio::test]
    async fn aggressive_mode_applies_copy_swap_and_preserves_rows() {
        let db = Arc::new(SqliteDatabase::open_in_memory().unwrap());
        let (executor, storage) = fixture(db.clone());
        storage.initialize().await.unwrap();

        db.execute(
            "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT, email TEXT);
             INSERT INTO users VALUES (1, 'ada', 'ada@example.com'), (2, 'alan', 'alan@example.com');",
        )
        .await
        .unwrap();

        let definition = TableDef::new("users")
            .column(ColumnDef::new("id", "INTEGER").primary_key())
            .column(ColumnDef::new("name", "TEXT"));
        let change = SchemaChange {
            op: ChangeOp::DropColumn {
                table: "users".to_string(),
                column: "email".to_string(),
                definition,
                existing: vec![
                    "id".to_string(),
                    "name".to_string(),
                    "email".to_string(),
                ],
            },
            risk: RiskLevel::High,
            description: "drop column 'users.email' (data will be lost)".to_string(),
            warning: None,
        };
        let plan = MigrationGenerator::new(Dialect::Sqlite).generate_plan(&[change]);

        let (updated, executed) = executor
            .execute_plan(&plan, ExecutionMode::Aggressive)
            .await
            .unwrap();
        assert_eq!(executed.len(), 1);
        assert_eq!(updated.status, PlanStatus::Completed);

        let columns = db.list_columns("users").await.unwrap();
        let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["id", "name"]);

        let rows = db
            .query_rows("SELECT id, name FROM users ORDER BY id")
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["name"], serde_json::json!("ada"));

        // Applied migration landed in history.
        let history = storage.get_migration_history(10).await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].version, executed[0].version);
    }

    #[tokio::test]
    async fn failure_halts_batch_and_prior_migrations_stand() {
        let db = Arc::new(SqliteDatabase::open_in_memory().unwrap());
        let (executor, storage) = fixture(db.clone());
        storage.initialize().await.unwrap();

        let plan = MigrationPlan::pending(vec![
            migration(
                "20260807120000_aaaa",
                RiskLevel::Safe,
                "CREATE TABLE \"a\" (\"id\" INTEGER);",
            ),
            migration(
                "20260807120001_bbbb",
                RiskLevel::Safe,
                "CREATE TABLE \"b\" (\"id\" NONSENSE SYNTAX ERROR HERE;",
            ),
            migration(
                "20260807120002_cccc",
                RiskLevel::Safe,
                "CREATE TABLE \"c\" (\"id\" INTEGER);",
            ),
        ]);

        let err = executor
            .execute_plan(&plan, ExecutionMode::Safe)
            .await
            .unwrap_err();
        match &err {
            MigrationError::Execution { version, .. } => {
                assert_eq!(version, "20260807120001_bbbb");
            }
            other => panic!("expected Execution error, got {other:?}"),
        }

        let tables = db.list_tables().await.unwrap();
        assert!(tables.contains(&"a".to_string()));
        assert!(!tables.iter().any(|t| t == "b" || t == "c"));

        // The committed first migration was recorded before the halt.
        let versions = storage.get_applied_versions().await;
        assert_eq!(versions, vec!["20260807120000_aaaa".to_string()]);
    }

    #[tokio::test]
    async fn interrupted_copy_swap_keeps_the_original_table() {
        let db = Arc::new(SqliteDatabase::open_in_memory().unwrap());
        let (executor, storage) = fixture(db.clone());
        storage.initialize().await.unwrap();

        db.execute(
            "CREATE TABLE users (id INTEGER PRIMARY KEY, email TEXT);
             INSERT INTO users VALUES (1, NULL), (2, 'alan@example.com');",
        )
        .await
        .unwrap();

        // Simulated mid-swap fault: the replacement table demands NOT NULL,
        // so the INSERT...SELECT fails after the CREATE already ran.
        let sql = "BEGIN TRANSACTION;\n\
                   CREATE TABLE \"users_new_zz99\" (\n    \"id\" INTEGER PRIMARY KEY,\n    \"email\" TEXT NOT NULL\n);\n\
                   INSERT INTO \"users_new_zz99\" (\"id\", \"email\") SELECT \"id\", \"email\" FROM \"users\";\n\
                   DROP TABLE \"users\";\n\
                   ALTER TABLE \"users_new_zz99\" RENAME TO \"users\";\n\
                   COMMIT;";
        let plan = MigrationPlan::pending(vec![migration(
            "20260807120000_zz99",
            RiskLevel::High,
            sql,
        )]);

        let result = executor.execute_plan(&plan, ExecutionMode::Aggressive).await;
        assert!(result.is_err());

        // The transaction rolled back as a unit: original intact, temp gone.
        let tables = db.list_tables().await.unwrap();
        assert!(tables.contains(&"users".to_string()));
        assert!(!tables.iter().any(|t| t.starts_with("users_new_")));

        let rows = db.query_rows("SELECT COUNT(*) AS n FROM users").await.unwrap();
        assert_eq!(rows[0]["n"], serde_json::json!(2));
    }
}
