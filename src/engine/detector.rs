//! Schema drift detection
//!
//! Compares the declared model against the live catalog and emits an ordered
//! list of changes. Detection is read-only and aborts wholesale on any
//! introspection failure; a partial change list is never returned.

use crate::db::Database;
use crate::engine::types::{ChangeOp, RiskLevel, SchemaChange};
use crate::error::MigrationError;
use crate::schema::DeclaredSchema;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

static TYPE_PARENS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\(.*?\)").expect("valid regex"));

/// Normalize a type string to its base token: strip parenthesized
/// length/precision, lowercase, collapse whitespace.
///
/// Comparison is syntactic, not semantic: `VARCHAR(255)` and `VARCHAR(100)`
/// compare equal, while equivalent spellings across dialects (`INTEGER` vs
/// `INT`) compare different. Known limitation, kept deliberately.
pub fn normalize_base_type(data_type: &str) -> String {
    let stripped = TYPE_PARENS.replace_all(data_type, "");
    stripped
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Detects drift between a declared schema and the live catalog.
pub struct SchemaDetector {
    db: Arc<dyn Database>,
    schema: DeclaredSchema,
}

impl SchemaDetector {
    pub fn new(db: Arc<dyn Database>, schema: DeclaredSchema) -> Self {
        Self { db, schema }
    }

    /// Compute the ordered change list. Empty means no drift.
    ///
    /// Per declared table: missing table first, then added columns, then
    /// dropped columns, then type changes. Tables present live but not
    /// declared are left untouched.
    pub async fn detect_changes(&self) -> Result<Vec<SchemaChange>, MigrationError> {
        let live_tables = self
            .db
            .list_tables()
            .await
            .map_err(|e| introspection_error("listing tables", e))?;
        let live_set: HashSet<&str> = live_tables.iter().map(|s| s.as_str()).collect();

        let mut changes = Vec::new();

        for table in &self.schema.tables {
            if !live_set.contains(table.name.as_str()) {
                changes.push(SchemaChange {
                    op: ChangeOp::CreateTable {
                        table: table.name.clone(),
                        definition: table.clone(),
                    },
                    risk: RiskLevel::Safe,
                    description: format!("create table '{}'", table.name),
                    warning: None,
                });
                continue;
            }

            let live_columns = self
                .db
                .list_columns(&table.name)
                .await
                .map_err(|e| {
                    introspection_error(&format!("listing columns of '{}'", table.name), e)
                })?;
            let existing: Vec<String> = live_columns.iter().map(|c| c.name.clone()).collect();
            let declared_names: HashSet<&str> =
                table.columns.iter().map(|c| c.name.as_str()).collect();

            // Declared but absent live: additions. Risk is finalized by the
            // assessor; the placeholder here is conservative.
            for column in &table.columns {
                if !existing.iter().any(|c| c == &column.name) {
                    changes.push(SchemaChange {
                        op: ChangeOp::AddColumn {
                            table: table.name.clone(),
                            column: column.clone(),
                        },
                        risk: RiskLevel::High,
                        description: format!("add column '{}.{}'", table.name, column.name),
                        warning: None,
                    });
                }
            }

            // Present live but not declared: drops. Always HIGH.
            for live in &live_columns {
                if !declared_names.contains(live.name.as_str()) {
                    changes.push(SchemaChange {
                        op: ChangeOp::DropColumn {
                            table: table.name.clone(),
                            column: live.name.clone(),
                            definition: table.clone(),
                            existing: existing.clone(),
                        },
                        risk: RiskLevel::High,
                        description: format!(
                            "drop column '{}.{}' (data will be lost)",
                            table.name, live.name
                        ),
                        warning: None,
                    });
                }
            }

            // Present in both with a different normalized base type.
            for column in &table.columns {
                if let Some(live) = live_columns.iter().find(|c| c.name == column.name) {
                    let declared_base = normalize_base_type(&column.data_type);
                    let live_base = normalize_base_type(&live.data_type);
                    if declared_base != live_base {
                        changes.push(SchemaChange {
                            op: ChangeOp::ChangeColumn {
                                table: table.name.clone(),
                                column: column.clone(),
                                old_type: live.data_type.clone(),
                                new_type: column.data_type.clone(),
                                definition: table.clone(),
                                existing: existing.clone(),
                            },
                            risk: RiskLevel::High,
                            description: format!(
                                "change column '{}.{}' type {} -> {}",
                                table.name, column.name, live.data_type, column.data_type
                            ),
                            warning: None,
                        });
                    }
                }
            }
        }

        debug!(count = changes.len(), "schema drift detection complete");
        Ok(changes)
    }
}

fn introspection_error(context: &str, source: MigrationError) -> MigrationError {
    MigrationError::Introspection(format!("{context}: {source}"))
}
