//! Migration SQL generator
//!
//! Compiles an assessed change into one executable migration: forward and
//! reverse DDL plus a version. Generation branches on risk-bearing dialect
//! capabilities: engines that cannot alter or drop columns in place get the
//! copy-swap-drop rebuild instead of ALTER TABLE.

use crate::db::Dialect;
use crate::engine::types::{ChangeOp, Migration, MigrationPlan, SchemaChange};
use crate::error::MigrationError;
use crate::introspection::quote_ident;
use crate::schema::{ColumnDef, TableDef};
use chrono::Utc;
use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::warn;

pub struct MigrationGenerator {
    dialect: Dialect,
}

impl MigrationGenerator {
    pub fn new(dialect: Dialect) -> Self {
        Self { dialect }
    }

    /// Allocate a new migration version: UTC timestamp plus a 4-character
    /// random suffix. Chronologically sortable, practically unique.
    pub fn new_version() -> String {
        format!(
            "{}_{}",
            Utc::now().format("%Y%m%d%H%M%S"),
            random_suffix()
        )
    }

    /// Compile the full change list into a plan with status `pending`.
    /// The caller reports `up_to_date` itself when the change list is empty.
    pub fn generate_plan(&self, changes: &[SchemaChange]) -> MigrationPlan {
        let migrations = changes
            .iter()
            .map(|change| self.generate_migration(change))
            .collect();
        MigrationPlan::pending(migrations)
    }

    /// Compile one change. Generation never aborts the plan: a change that
    /// cannot be compiled becomes a comment-only placeholder migration the
    /// operator will see in review.
    pub fn generate_migration(&self, change: &SchemaChange) -> Migration {
        let (upgrade_sql, downgrade_sql) = match self.build_sql(&change.op) {
            Ok(pair) => pair,
            Err(e) => {
                warn!(
                    change = %change.description,
                    error = %e,
                    "could not compile change; emitting placeholder migration"
                );
                let comment = format!(
                    "-- could not generate SQL for change: {}\n-- reason: {}",
                    change.description, e
                );
                (comment.clone(), comment)
            }
        };

        Migration {
            version: Self::new_version(),
            description: change.description.clone(),
            risk: change.risk,
            upgrade_sql,
            downgrade_sql,
            created_at: Utc::now(),
        }
    }

    fn build_sql(&self, op: &ChangeOp) -> Result<(String, String), MigrationError> {
        match op {
            ChangeOp::CreateTable { table, definition } => {
                let up = self.create_table_sql(table, definition)?;
                let down = format!("DROP TABLE IF EXISTS {};", quote_ident(table));
                Ok((up, down))
            }
            ChangeOp::AddColumn { table, column } => {
                let up = format!(
                    "ALTER TABLE {} ADD COLUMN {};",
                    quote_ident(table),
                    column_ddl(column)
                );
                let down = if self.dialect.supports_drop_column() {
                    format!(
                        "ALTER TABLE {} DROP COLUMN IF EXISTS {};",
                        quote_ident(table),
                        quote_ident(&column.name)
                    )
                } else {
                    format!(
                        "-- downgrade not supported: {} cannot drop column {}; \
                         restore from backup",
                        self.dialect,
                        quote_ident(&column.name)
                    )
                };
                Ok((up, down))
            }
            ChangeOp::DropColumn {
                table,
                column,
                definition,
                existing,
            } => {
                if self.dialect.supports_drop_column() {
                    let up = format!(
                        "ALTER TABLE {} DROP COLUMN {};",
                        quote_ident(table),
                        quote_ident(column)
                    );
                    let down = format!(
                        "-- no automatic downgrade for dropped column {}.{}: \
                         data cannot be reconstructed without a backup",
                        quote_ident(table),
                        quote_ident(column)
                    );
                    Ok((up, down))
                } else {
                    let up = self.rebuild_table_sql(table, definition, existing)?;
                    Ok((up, rebuild_downgrade_comment()))
                }
            }
            ChangeOp::ChangeColumn {
                table,
                column,
                old_type,
                new_type,
                definition,
                existing,
            } => {
                if self.dialect.supports_alter_column() {
                    let up = alter_column_type_sql(table, &column.name, new_type);
                    let down = alter_column_type_sql(table, &column.name, old_type);
                    Ok((up, down))
                } else {
                    let up = self.rebuild_table_sql(table, definition, existing)?;
                    Ok((up, rebuild_downgrade_comment()))
                }
            }
        }
    }

    fn create_table_sql(
        &self,
        table: &str,
        definition: &TableDef,
    ) -> Result<String, MigrationError> {
        if definition.columns.is_empty() {
            return Err(MigrationError::Config(format!(
                "declared table '{table}' has no columns"
            )));
        }

        let columns: Vec<String> = definition
            .columns
            .iter()
            .map(|col| format!("    {}", column_ddl(col)))
            .collect();

        Ok(format!(
            "CREATE TABLE {} (\n{}\n);",
            quote_ident(table),
            columns.join(",\n")
        ))
    }

    /// Copy-swap-drop rebuild for dialects without in-place column surgery:
    /// create a replacement table from the target definition, copy the rows
    /// over, drop the original, rename the replacement into place. The whole
    /// sequence runs in one explicit transaction so a partial swap can never
    /// leave the database without the original table.
    fn rebuild_table_sql(
        &self,
        table: &str,
        definition: &TableDef,
        existing: &[String],
    ) -> Result<String, MigrationError> {
        let temp_name = format!("{}_new_{}", table, random_suffix());
        let create = self.create_table_sql(&temp_name, definition)?;

        // Columns common to the old and new shape: only those can be copied.
        // Dropped columns are absent from the target definition; columns
        // added in the same plan are absent from the live list and fall back
        // to their declared defaults.
        let copy_columns: Vec<String> = definition
            .columns
            .iter()
            .filter(|c| existing.iter().any(|e| e == &c.name))
            .map(|c| quote_ident(&c.name))
            .collect();

        let mut statements = vec!["BEGIN TRANSACTION;".to_string(), create];
        if !copy_columns.is_empty() {
            let column_list = copy_columns.join(", ");
            statements.push(format!(
                "INSERT INTO {} ({}) SELECT {} FROM {};",
                quote_ident(&temp_name),
                column_list,
                column_list,
                quote_ident(table)
            ));
        }
        statements.push(format!("DROP TABLE {};", quote_ident(table)));
        statements.push(format!(
            "ALTER TABLE {} RENAME TO {};",
            quote_ident(&temp_name),
            quote_ident(table)
        ));
        statements.push("COMMIT;".to_string());

        Ok(statements.join("\n"))
    }
}

fn alter_column_type_sql(table: &str, column: &str, new_type: &str) -> String {
    format!(
        "ALTER TABLE {} ALTER COLUMN {} TYPE {} USING {}::{};",
        quote_ident(table),
        quote_ident(column),
        new_type,
        quote_ident(column),
        new_type
    )
}

fn rebuild_downgrade_comment() -> String {
    "-- no automatic downgrade: the table rebuild drops the original table; \
     restore from backup"
        .to_string()
}

/// Column DDL fragment: name, type, constraints.
fn column_ddl(col: &ColumnDef) -> String {
    let mut def = format!("{} {}", quote_ident(&col.name), col.data_type);
    if !col.nullable {
        def.push_str(" NOT NULL");
    }
    if let Some(default) = &col.default_value {
        def.push_str(&format!(" DEFAULT {default}"));
    }
    if col.is_primary_key {
        def.push_str(" PRIMARY KEY");
    }
    def
}

fn random_suffix() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(4)
        .map(char::from)
        .collect::<String>()
        .to_lowercase()
}
