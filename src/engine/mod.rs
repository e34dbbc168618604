//! Migration engine orchestrator
//!
//! Wires the pipeline together: lock → detect → assess + generate →
//! (explicit execute) → record → unlock. Planning has no side effects; the
//! schema is only ever mutated through the separate, explicit
//! [`apply_plan`](MigrationEngine::apply_plan) call, so nothing changes
//! silently behind the operator's back.

pub mod detector;
pub mod executor;
pub mod generator;
pub mod risk;
pub mod types;

use crate::config::MigratorSettings;
use crate::db::Database;
use crate::engine::detector::SchemaDetector;
use crate::engine::executor::MigrationExecutor;
use crate::engine::generator::MigrationGenerator;
use crate::engine::risk::RiskAssessor;
use crate::engine::types::{
    ExecutionMode, Migration, MigrationPlan, MigrationRecord, PlanStatus,
};
use crate::error::MigrationError;
use crate::lock::LockProvider;
use crate::schema::DeclaredSchema;
use crate::storage::MigrationStorage;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// The migration engine: the only component that knows every collaborator.
///
/// Constructed from explicit parts — database handle, declared schema, lock
/// provider, settings — so multiple engines against different targets coexist
/// safely in one process.
pub struct MigrationEngine {
    pub detector: SchemaDetector,
    pub assessor: RiskAssessor,
    pub generator: MigrationGenerator,
    pub executor: MigrationExecutor,
    pub storage: Arc<MigrationStorage>,
    lock: Mutex<Box<dyn LockProvider>>,
    settings: MigratorSettings,
}

impl MigrationEngine {
    pub fn new(
        db: Arc<dyn Database>,
        schema: DeclaredSchema,
        lock: Box<dyn LockProvider>,
        settings: MigratorSettings,
    ) -> Self {
        let dialect = db.dialect();
        let storage = Arc::new(MigrationStorage::new(db.clone(), &settings));
        Self {
            detector: SchemaDetector::new(db.clone(), schema),
            assessor: RiskAssessor::new(dialect),
            generator: MigrationGenerator::new(dialect),
            executor: MigrationExecutor::new(db, storage.clone()),
            storage,
            lock: Mutex::new(lock),
            settings,
        }
    }

    /// Execution mode used when the caller does not choose one.
    pub fn default_mode(&self) -> ExecutionMode {
        self.settings.default_mode
    }

    /// Lock-protected detect + assess + generate. Returns a plan with status
    /// `up_to_date`, `pending`, or `locked`; never executes anything.
    ///
    /// A lock held by another migrator is not an error: the invocation is a
    /// deferred no-op the caller may retry later.
    pub async fn auto_migrate(&self) -> Result<MigrationPlan, MigrationError> {
        let mut lock = self.lock.lock().await;
        if !lock.acquire().await? {
            info!("another migrator holds the lock; deferring");
            return Ok(MigrationPlan::locked());
        }

        let result = self.plan().await;

        // The lock is released on every exit path; a release failure is
        // logged but never overrides the pipeline result.
        if let Err(e) = lock.release().await {
            warn!(error = %e, "failed to release migration lock");
        }
        result
    }

    async fn plan(&self) -> Result<MigrationPlan, MigrationError> {
        self.storage.initialize().await?;

        let changes = self.detector.detect_changes().await?;
        if changes.is_empty() {
            info!("schema is up to date");
            return Ok(MigrationPlan::up_to_date());
        }

        let assessed = self.assessor.assess_changes(changes);
        let summary = self.assessor.get_risk_summary(&assessed);
        info!(
            safe = summary.safe,
            medium = summary.medium,
            high = summary.high,
            "schema drift detected; plan generated"
        );

        Ok(self.generator.generate_plan(&assessed))
    }

    /// Lock-scoped execution of a previously reviewed plan. Delegates to the
    /// executor, which records each applied migration into history.
    pub async fn apply_plan(
        &self,
        plan: &MigrationPlan,
        mode: ExecutionMode,
    ) -> Result<(MigrationPlan, Vec<Migration>), MigrationError> {
        let mut lock = self.lock.lock().await;
        if !lock.acquire().await? {
            info!("another migrator holds the lock; deferring execution");
            let mut locked = plan.clone();
            locked.status = PlanStatus::Locked;
            return Ok((locked, Vec::new()));
        }

        let result = self.executor.execute_plan(plan, mode).await;

        if let Err(e) = lock.release().await {
            warn!(error = %e, "failed to release migration lock");
        }
        result
    }

    /// Most recent history rows, newest first.
    pub async fn get_history(&self, limit: usize) -> Vec<MigrationRecord> {
        self.storage.get_migration_history(limit).await
    }
}
