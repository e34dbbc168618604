//! Declared schema model
//!
//! The application's desired shape of the database: tables and columns with
//! name, type string, nullability, default and primary-key flag. This is the
//! minimal abstraction the engine consumes; it carries no ORM semantics.

use serde::{Deserialize, Serialize};

/// Column definition in the declared model
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnDef {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
    #[serde(default)]
    pub is_primary_key: bool,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            nullable: true,
            default_value: None,
            is_primary_key: false,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn default_value(mut self, default: impl Into<String>) -> Self {
        self.default_value = Some(default.into());
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.is_primary_key = true;
        self.nullable = false;
        self
    }
}

/// Table definition in the declared model
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableDef {
    pub name: String,
    pub columns: Vec<ColumnDef>,
}

impl TableDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
        }
    }

    pub fn column(mut self, column: ColumnDef) -> Self {
        self.columns.push(column);
        self
    }

    pub fn get_column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }
}

/// The complete declared schema: the desired end state of the database.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeclaredSchema {
    pub tables: Vec<TableDef>,
}

impl DeclaredSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table(mut self, table: TableDef) -> Self {
        self.tables.push(table);
        self
    }

    pub fn get_table(&self, name: &str) -> Option<&TableDef> {
        self.tables.iter().find(|t| t.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_produces_expected_shape() {
        let schema = DeclaredSchema::new().table(
            TableDef::new("orders")
                .column(ColumnDef::new("id", "INTEGER").primary_key())
                .column(
                    ColumnDef::new("total", "DECIMAL")
                        .not_null()
                        .default_value("0"),
                ),
        );

        let orders = schema.get_table("orders").unwrap();
        assert_eq!(orders.columns.len(), 2);

        let id = orders.get_column("id").unwrap();
        assert!(id.is_primary_key);
        assert!(!id.nullable);

        let total = orders.get_column("total").unwrap();
        assert!(!total.nullable);
        assert_eq!(total.default_value.as_deref(), Some("0"));
    }

    #[test]
    fn primary_key_implies_not_null() {
        let col = ColumnDef::new("id", "BIGINT").primary_key();
        assert!(!col.nullable);
    }
}
