//! Destination table schemas
//!
//! A `TableSchema` is immutable once built (fetched from warehouse metadata
//! or constructed directly); its column order is the load order for shard
//! files and the bulk-load command.

use serde::{Deserialize, Serialize};

/// One column of a destination table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    /// Warehouse type tag, e.g. "integer", "character varying"
    pub data_type: String,
    pub max_length: Option<i32>,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            max_length: None,
        }
    }
}

/// A foreign-key relationship on a destination table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    pub constraint_name: String,
    pub source_column: String,
    pub target_schema: String,
    pub target_table: String,
    pub target_column: String,
}

/// Schema of one destination table: owning schema, ordered columns,
/// primary-key column names, foreign keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub schema: String,
    pub name: String,
    pub columns: Vec<ColumnDef>,
    pub primary_key: Vec<String>,
    pub foreign_keys: Vec<ForeignKey>,
}

impl TableSchema {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
            columns: Vec::new(),
            primary_key: Vec::new(),
            foreign_keys: Vec::new(),
        }
    }

    pub fn with_columns(mut self, columns: Vec<ColumnDef>) -> Self {
        self.columns = columns;
        self
    }

    pub fn with_primary_key(mut self, key: Vec<String>) -> Self {
        self.primary_key = key;
        self
    }

    /// `schema.table`
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }
}

/// Insertion-ordered set of destination table schemas.
///
/// The first entry is the default destination: transformer output that is
/// not already keyed by table name is routed there.
#[derive(Debug, Clone, Default)]
pub struct SchemaLookup {
    entries: Vec<TableSchema>,
}

impl SchemaLookup {
    pub fn new(schemas: Vec<TableSchema>) -> Self {
        Self { entries: schemas }
    }

    pub fn single(schema: TableSchema) -> Self {
        Self {
            entries: vec![schema],
        }
    }

    pub fn get(&self, table: &str) -> Option<&TableSchema> {
        self.entries.iter().find(|s| s.name == table)
    }

    /// The default destination table name (first entry).
    pub fn default_table(&self) -> Option<&str> {
        self.entries.first().map(|s| s.name.as_str())
    }

    pub fn tables(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|s| s.name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &TableSchema> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn orgs_schema() -> TableSchema {
        TableSchema::new("analytics", "orgs")
            .with_columns(vec![
                ColumnDef::new("id", "integer"),
                ColumnDef::new("name", "character varying"),
            ])
            .with_primary_key(vec!["id".to_string()])
    }

    #[test]
    fn test_qualified_name() {
        assert_eq!(orgs_schema().qualified_name(), "analytics.orgs");
    }

    #[test]
    fn test_lookup_order_and_default() {
        let lookup = SchemaLookup::new(vec![
            orgs_schema(),
            TableSchema::new("analytics", "orgs_history"),
        ]);
        assert_eq!(lookup.default_table(), Some("orgs"));
        assert_eq!(lookup.len(), 2);
        assert!(lookup.get("orgs_history").is_some());
        assert!(lookup.get("missing").is_none());
        let tables: Vec<_> = lookup.tables().collect();
        assert_eq!(tables, vec!["orgs", "orgs_history"]);
    }
}
