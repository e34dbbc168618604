//! Value objects for the migration pipeline

use crate::schema::{ColumnDef, TableDef};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Coarse classification of how likely a schema change is to cause data loss
/// or break the application. Ordered: `Safe < Medium < High`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Safe,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Safe => "safe",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "safe" => Ok(RiskLevel::Safe),
            "medium" => Ok(RiskLevel::Medium),
            "high" => Ok(RiskLevel::High),
            other => Err(format!("unknown risk level: {other}")),
        }
    }
}

/// Operator-chosen policy governing which risk tiers are applied
/// automatically versus deferred for manual review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Execute nothing; log what would run.
    DryRun,
    /// Auto-apply SAFE migrations only.
    Safe,
    /// Auto-apply SAFE and MEDIUM migrations.
    Auto,
    /// Auto-apply everything, HIGH included.
    Aggressive,
}

impl ExecutionMode {
    /// Whether a migration of the given risk is applied under this mode.
    pub fn allows(&self, risk: RiskLevel) -> bool {
        match self {
            ExecutionMode::DryRun => false,
            ExecutionMode::Safe => risk == RiskLevel::Safe,
            ExecutionMode::Auto => risk <= RiskLevel::Medium,
            ExecutionMode::Aggressive => true,
        }
    }
}

impl FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "dry_run" | "dry-run" | "dryrun" => Ok(ExecutionMode::DryRun),
            "safe" => Ok(ExecutionMode::Safe),
            "auto" => Ok(ExecutionMode::Auto),
            "aggressive" => Ok(ExecutionMode::Aggressive),
            other => Err(format!("unknown execution mode: {other}")),
        }
    }
}

/// One detected schema difference, as a tagged union so generator and
/// assessor dispatch exhaustively instead of branching on strings.
///
/// The rebuild variants (`DropColumn`, `ChangeColumn`) carry the declared
/// target table definition plus the live column list captured at detection
/// time; the copy-swap generator needs both to synthesize the replacement
/// table and its copy set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChangeOp {
    CreateTable {
        table: String,
        definition: TableDef,
    },
    AddColumn {
        table: String,
        column: ColumnDef,
    },
    DropColumn {
        table: String,
        column: String,
        definition: TableDef,
        existing: Vec<String>,
    },
    ChangeColumn {
        table: String,
        column: ColumnDef,
        old_type: String,
        new_type: String,
        definition: TableDef,
        existing: Vec<String>,
    },
}

impl ChangeOp {
    /// Table the change applies to.
    pub fn table(&self) -> &str {
        match self {
            ChangeOp::CreateTable { table, .. }
            | ChangeOp::AddColumn { table, .. }
            | ChangeOp::DropColumn { table, .. }
            | ChangeOp::ChangeColumn { table, .. } => table,
        }
    }

    /// Column the change applies to, if column-scoped.
    pub fn column(&self) -> Option<&str> {
        match self {
            ChangeOp::CreateTable { .. } => None,
            ChangeOp::AddColumn { column, .. } => Some(&column.name),
            ChangeOp::DropColumn { column, .. } => Some(column),
            ChangeOp::ChangeColumn { column, .. } => Some(&column.name),
        }
    }
}

/// A detected change together with its assessed risk. Produced once per diff
/// by the detector; the risk and warning are finalized by the assessor before
/// any SQL is generated.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaChange {
    #[serde(flatten)]
    pub op: ChangeOp,
    pub risk: RiskLevel,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

/// One executable migration unit with forward and reverse SQL.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Migration {
    /// Timestamp plus random suffix; globally unique and chronologically
    /// sortable.
    pub version: String,
    pub description: String,
    pub risk: RiskLevel,
    pub upgrade_sql: String,
    pub downgrade_sql: String,
    pub created_at: DateTime<Utc>,
}

/// Lifecycle state of a migration plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    UpToDate,
    Pending,
    Completed,
    Partial,
    Locked,
}

impl fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PlanStatus::UpToDate => "up_to_date",
            PlanStatus::Pending => "pending",
            PlanStatus::Completed => "completed",
            PlanStatus::Partial => "partial",
            PlanStatus::Locked => "locked",
        };
        f.write_str(s)
    }
}

/// Ordered list of migrations plus plan status. Migration order equals
/// detection order; there is no dependency-graph reordering.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationPlan {
    pub migrations: Vec<Migration>,
    pub status: PlanStatus,
}

impl MigrationPlan {
    pub fn up_to_date() -> Self {
        Self {
            migrations: Vec::new(),
            status: PlanStatus::UpToDate,
        }
    }

    pub fn locked() -> Self {
        Self {
            migrations: Vec::new(),
            status: PlanStatus::Locked,
        }
    }

    pub fn pending(migrations: Vec<Migration>) -> Self {
        Self {
            migrations,
            status: PlanStatus::Pending,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }
}

/// Row of the migration history table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationRecord {
    pub id: i64,
    pub version: String,
    pub description: String,
    pub applied_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rollback_sql: Option<String>,
    pub risk: RiskLevel,
    pub status: String,
}

/// Outcome wrapper for storage operations. Failures are carried as data, not
/// raised: history recording must never sink an already-applied change.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl OperationResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            errors: Vec::new(),
            metadata: serde_json::Map::new(),
        }
    }

    /// Success path for a duplicate insert that was safely ignored.
    pub fn idempotent(version: &str) -> Self {
        let mut metadata = serde_json::Map::new();
        metadata.insert("idempotent".to_string(), serde_json::json!(true));
        metadata.insert("version".to_string(), serde_json::json!(version));
        Self {
            success: true,
            errors: Vec::new(),
            metadata,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            errors: vec![message.into()],
            metadata: serde_json::Map::new(),
        }
    }

    pub fn is_idempotent(&self) -> bool {
        self.metadata
            .get("idempotent")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }
}

/// Aggregated risk counts for plan review.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskSummary {
    pub safe: usize,
    pub medium: usize,
    pub high: usize,
    pub details: Vec<String>,
}

impl RiskSummary {
    pub fn total(&self) -> usize {
        self.safe + self.medium + self.high
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn risk_levels_are_ordered() {
        assert!(RiskLevel::Safe < RiskLevel::Medium);
        assert!(RiskLevel::Medium < RiskLevel::High);
    }

    #[test]
    fn mode_gating_matrix() {
        for risk in [RiskLevel::Safe, RiskLevel::Medium, RiskLevel::High] {
            assert!(!ExecutionMode::DryRun.allows(risk));
            assert!(ExecutionMode::Aggressive.allows(risk));
        }

        assert!(ExecutionMode::Safe.allows(RiskLevel::Safe));
        assert!(!ExecutionMode::Safe.allows(RiskLevel::Medium));
        assert!(!ExecutionMode::Safe.allows(RiskLevel::High));

        assert!(ExecutionMode::Auto.allows(RiskLevel::Safe));
        assert!(ExecutionMode::Auto.allows(RiskLevel::Medium));
        assert!(!ExecutionMode::Auto.allows(RiskLevel::High));
    }

    #[test]
    fn execution_mode_parses_cli_spellings() {
        assert_eq!(
            "dry-run".parse::<ExecutionMode>().unwrap(),
            ExecutionMode::DryRun
        );
        assert_eq!(
            "AGGRESSIVE".parse::<ExecutionMode>().unwrap(),
            ExecutionMode::Aggressive
        );
        assert!("yolo".parse::<ExecutionMode>().is_err());
    }

    #[test]
    fn idempotent_result_carries_flag() {
        let result = OperationResult::idempotent("20260101000000_ab12");
        assert!(result.success);
        assert!(result.is_idempotent());
        assert!(!OperationResult::ok().is_idempotent());
        assert!(!OperationResult::failed("nope").success);
    }
}
