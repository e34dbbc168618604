//! Risk assessment
//!
//! Classifies each detected change as SAFE / MEDIUM / HIGH. Custom rules run
//! ahead of the defaults in order; the first matching rule wins. A rule whose
//! predicate fails is logged and skipped so one bad rule never poisons the
//! assessment of other changes.

use crate::db::Dialect;
use crate::engine::detector::normalize_base_type;
use crate::engine::types::{ChangeOp, RiskLevel, RiskSummary, SchemaChange};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use tracing::warn;

/// Fallible predicate over a change. An `Err` means the rule could not be
/// evaluated for this change and is skipped.
pub type RulePredicate = Box<dyn Fn(&ChangeOp) -> anyhow::Result<bool> + Send + Sync>;

/// One custom classification rule: first rule whose predicate returns true
/// short-circuits the defaults.
pub struct RiskRule {
    pub name: String,
    pub risk: RiskLevel,
    pub mitigation: Option<String>,
    predicate: RulePredicate,
}

impl RiskRule {
    pub fn new(
        name: impl Into<String>,
        risk: RiskLevel,
        mitigation: Option<String>,
        predicate: impl Fn(&ChangeOp) -> anyhow::Result<bool> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            risk,
            mitigation,
            predicate: Box::new(predicate),
        }
    }
}

/// Asymmetric, hand-picked conversion matrix over normalized base types.
/// Unlisted pairs default to HIGH: the conservative choice for an engine that
/// only checks types syntactically.
static TYPE_COMPATIBILITY: Lazy<HashMap<(&'static str, &'static str), RiskLevel>> =
    Lazy::new(|| {
        let mut m = HashMap::new();
        // Widening conversions: lossless.
        m.insert(("smallint", "integer"), RiskLevel::Safe);
        m.insert(("smallint", "bigint"), RiskLevel::Safe);
        m.insert(("integer", "bigint"), RiskLevel::Safe);
        m.insert(("int", "bigint"), RiskLevel::Safe);
        m.insert(("real", "double precision"), RiskLevel::Safe);
        m.insert(("varchar", "text"), RiskLevel::Safe);
        m.insert(("character varying", "text"), RiskLevel::Safe);
        m.insert(("char", "varchar"), RiskLevel::Safe);
        m.insert(("char", "text"), RiskLevel::Safe);
        m.insert(("date", "timestamp"), RiskLevel::Safe);
        m.insert(("numeric", "decimal"), RiskLevel::Safe);
        m.insert(("decimal", "numeric"), RiskLevel::Safe);
        // Castable but potentially lossy.
        m.insert(("text", "varchar"), RiskLevel::Medium);
        m.insert(("varchar", "char"), RiskLevel::Medium);
        m.insert(("timestamp", "timestamptz"), RiskLevel::Medium);
        m.insert(("timestamptz", "timestamp"), RiskLevel::Medium);
        m.insert(("double precision", "numeric"), RiskLevel::Medium);
        m.insert(("integer", "numeric"), RiskLevel::Medium);
        // Narrowing conversions: explicit HIGH for the common cases, same as
        // the unlisted default, kept visible for documentation value.
        m.insert(("bigint", "integer"), RiskLevel::High);
        m.insert(("integer", "smallint"), RiskLevel::High);
        m.insert(("timestamp", "date"), RiskLevel::High);
        m
    });

/// Classifies schema changes. Pure and deterministic given the change, the
/// dialect, and the configured rule list.
pub struct RiskAssessor {
    dialect: Dialect,
    rules: Vec<RiskRule>,
}

impl RiskAssessor {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            rules: Vec::new(),
        }
    }

    /// Append a custom rule. Rules are evaluated in insertion order, before
    /// the default classification.
    pub fn add_rule(&mut self, rule: RiskRule) {
        self.rules.push(rule);
    }

    pub fn with_rule(mut self, rule: RiskRule) -> Self {
        self.add_rule(rule);
        self
    }

    /// Classify one change: risk level plus an optional mitigation hint.
    pub fn assess(&self, op: &ChangeOp) -> (RiskLevel, Option<String>) {
        for rule in &self.rules {
            match (rule.predicate)(op) {
                Ok(true) => return (rule.risk, rule.mitigation.clone()),
                Ok(false) => {}
                Err(e) => {
                    warn!(rule = %rule.name, error = %e, "risk rule predicate failed; rule skipped");
                }
            }
        }
        self.default_assessment(op)
    }

    /// Finalize risk and warning on a detected change list.
    pub fn assess_changes(&self, changes: Vec<SchemaChange>) -> Vec<SchemaChange> {
        changes
            .into_iter()
            .map(|change| {
                let (risk, warning) = self.assess(&change.op);
                SchemaChange {
                    op: change.op,
                    risk,
                    description: change.description,
                    warning: warning.or(change.warning),
                }
            })
            .collect()
    }

    /// Per-level counts plus a flattened description line per change, for
    /// plan review at the CLI boundary.
    pub fn get_risk_summary(&self, changes: &[SchemaChange]) -> RiskSummary {
        let mut summary = RiskSummary::default();
        for change in changes {
            match change.risk {
                RiskLevel::Safe => summary.safe += 1,
                RiskLevel::Medium => summary.medium += 1,
                RiskLevel::High => summary.high += 1,
            }
            let mut line = format!("[{}] {}", change.risk, change.description);
            if let Some(warning) = &change.warning {
                line.push_str(" - ");
                line.push_str(warning);
            }
            summary.details.push(line);
        }
        summary
    }

    fn default_assessment(&self, op: &ChangeOp) -> (RiskLevel, Option<String>) {
        match op {
            ChangeOp::CreateTable { .. } => (RiskLevel::Safe, None),
            ChangeOp::AddColumn { column, .. } => {
                if column.nullable {
                    (RiskLevel::Safe, None)
                } else if column.default_value.is_some() {
                    (
                        RiskLevel::Medium,
                        Some("existing rows are backfilled from the column default".to_string()),
                    )
                } else {
                    (
                        RiskLevel::High,
                        Some(
                            "adding a NOT NULL column without a default fails on non-empty \
                             tables; add a default or backfill first"
                                .to_string(),
                        ),
                    )
                }
            }
            ChangeOp::DropColumn { .. } => (
                RiskLevel::High,
                Some("column data is permanently lost; take a backup before applying".to_string()),
            ),
            ChangeOp::ChangeColumn {
                old_type, new_type, ..
            } => {
                if !self.dialect.supports_alter_column() {
                    return (
                        RiskLevel::High,
                        Some(format!(
                            "{} cannot alter columns in place; the table will be rebuilt \
                             and copied",
                            self.dialect
                        )),
                    );
                }
                let pair = (
                    normalize_base_type(old_type),
                    normalize_base_type(new_type),
                );
                match TYPE_COMPATIBILITY.get(&(pair.0.as_str(), pair.1.as_str())) {
                    Some(RiskLevel::Safe) => (RiskLevel::Safe, None),
                    Some(RiskLevel::Medium) => (
                        RiskLevel::Medium,
                        Some(format!(
                            "conversion {} -> {} may truncate or lose precision",
                            old_type, new_type
                        )),
                    ),
                    Some(RiskLevel::High) | None => (
                        RiskLevel::High,
                        Some(format!(
                            "no known safe conversion from {} to {}; verify data \
                             compatibility before applying",
                            old_type, new_type
                        )),
                    ),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnDef, TableDef};

    fn add_column(column: ColumnDef) -> ChangeOp {
        ChangeOp::AddColumn {
            table: "users".to_string(),
            column,
        }
    }

    fn change_column(old_type: &str, new_type: &str) -> ChangeOp {
        ChangeOp::ChangeColumn {
            table: "users".to_string(),
            column: ColumnDef::new("age", new_type),
            old_type: old_type.to_string(),
            new_type: new_type.to_string(),
            definition: TableDef::new("users").column(ColumnDef::new("age", new_type)),
            existing: vec!["age".to_string()],
        }
    }

    #[test]
    fn add_column_risk_is_monotonic() {
        let assessor = RiskAssessor::new(Dialect::Postgres);

        let (nullable, _) = assessor.assess(&add_column(ColumnDef::new("a", "TEXT")));
        assert_eq!(nullable, RiskLevel::Safe);

        let (with_default, warning) = assessor.assess(&add_column(
            ColumnDef::new("b", "TEXT").not_null().default_value("''"),
        ));
        assert_eq!(with_default, RiskLevel::Medium);
        assert!(warning.is_some());

        let (no_default, _) = assessor.assess(&add_column(ColumnDef::new("c", "TEXT").not_null()));
        assert_eq!(no_default, RiskLevel::High);
    }

    #[test]
    fn create_is_safe_and_drop_is_high() {
        let assessor = RiskAssessor::new(Dialect::Postgres);

        let create = ChangeOp::CreateTable {
            table: "orders".to_string(),
            definition: TableDef::new("orders"),
        };
        assert_eq!(assessor.assess(&create).0, RiskLevel::Safe);

        let drop = ChangeOp::DropColumn {
            table: "users".to_string(),
            column: "email".to_string(),
            definition: TableDef::new("users"),
            existing: vec!["email".to_string()],
        };
        assert_eq!(assessor.assess(&drop).0, RiskLevel::High);
    }

    #[test]
    fn change_column_without_native_alter_is_high() {
        let assessor = RiskAssessor::new(Dialect::Sqlite);
        let (risk, warning) = assessor.assess(&change_column("INTEGER", "BIGINT"));
        assert_eq!(risk, RiskLevel::High);
        assert!(warning.unwrap().contains("rebuilt"));
    }

    #[test]
    fn type_matrix_is_asymmetric_and_conservative() {
        let assessor = RiskAssessor::new(Dialect::Postgres);

        assert_eq!(
            assessor.assess(&change_column("INTEGER", "BIGINT")).0,
            RiskLevel::Safe
        );
        assert_eq!(
            assessor.assess(&change_column("BIGINT", "INTEGER")).0,
            RiskLevel::High
        );
        assert_eq!(
            assessor.assess(&change_column("TEXT", "VARCHAR(50)")).0,
            RiskLevel::Medium
        );
        // Unknown pair defaults to HIGH.
        assert_eq!(
            assessor.assess(&change_column("JSONB", "INTEGER")).0,
            RiskLevel::High
        );
    }

    #[test]
    fn custom_rule_short_circuits_defaults() {
        let assessor = RiskAssessor::new(Dialect::Postgres).with_rule(RiskRule::new(
            "audit tables are always risky",
            RiskLevel::High,
            Some("get sign-off from the audit owner".to_string()),
            |op| Ok(op.table().starts_with("audit_")),
        ));

        let op = ChangeOp::CreateTable {
            table: "audit_log".to_string(),
            definition: TableDef::new("audit_log"),
        };
        let (risk, mitigation) = assessor.assess(&op);
        assert_eq!(risk, RiskLevel::High);
        assert_eq!(
            mitigation.as_deref(),
            Some("get sign-off from the audit owner")
        );

        // Non-matching change falls through to the defaults.
        let other = ChangeOp::CreateTable {
            table: "orders".to_string(),
            definition: TableDef::new("orders"),
        };
        assert_eq!(assessor.assess(&other).0, RiskLevel::Safe);
    }

    #[test]
    fn failing_predicate_is_skipped_not_fatal() {
        let assessor = RiskAssessor::new(Dialect::Postgres)
            .with_rule(RiskRule::new(
                "broken rule",
                RiskLevel::High,
                None,
                |_| anyhow::bail!("rule backend unavailable"),
            ))
            .with_rule(RiskRule::new(
                "working rule",
                RiskLevel::Medium,
                None,
                |op| Ok(op.table() == "orders"),
            ));

        let op = ChangeOp::CreateTable {
            table: "orders".to_string(),
            definition: TableDef::new("orders"),
        };
        // The broken rule is skipped; the next rule still matches.
        assert_eq!(assessor.assess(&op).0, RiskLevel::Medium);
    }

    #[test]
    fn summary_counts_and_details() {
        let assessor = RiskAssessor::new(Dialect::Postgres);
        let changes = vec![
            SchemaChange {
                op: ChangeOp::CreateTable {
                    table: "a".to_string(),
                    definition: TableDef::new("a"),
                },
                risk: RiskLevel::Safe,
                description: "create table 'a'".to_string(),
                warning: None,
            },
            SchemaChange {
                op: ChangeOp::DropColumn {
                    table: "b".to_string(),
                    column: "c".to_string(),
                    definition: TableDef::new("b"),
                    existing: vec![],
                },
                risk: RiskLevel::High,
                description: "drop column 'b.c' (data will be lost)".to_string(),
                warning: Some("take a backup".to_string()),
            },
        ];

        let summary = assessor.get_risk_summary(&changes);
        assert_eq!(summary.safe, 1);
        assert_eq!(summary.medium, 0);
        assert_eq!(summary.high, 1);
        assert_eq!(summary.total(), 2);
        assert_eq!(summary.details.len(), 2);
        assert!(summary.details[1].contains("take a backup"));
    }
}
