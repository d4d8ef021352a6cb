//! Row transform chain
//!
//! Transformers run strictly in order; the output of one feeds the next. A
//! transformer may drop the row (`Skip`) or fan it out into per-table rows,
//! letting one source row expand into multiple destination rows (e.g.
//! history tables).

use std::collections::HashMap;

use crate::error::{EtlError, Result};
use crate::row::{format_cell, Row};
use crate::schema::SchemaLookup;

mod null_sentinel;
mod remove_newlines;

pub use null_sentinel::NullSentinel;
pub use remove_newlines::RemoveNewlines;

/// Result of one transformer application
pub enum TransformOutput {
    /// A single reshaped row, still bound for the default table
    Row(Row),
    /// Rows fanned out per destination table
    PerTable(HashMap<String, Vec<Row>>),
    /// Drop this row: do not count it, do not forward it
    Skip,
}

/// A single step of the transform chain
pub trait RowTransformer: Send + Sync {
    fn transform(&self, row: Row) -> Result<TransformOutput>;
}

/// Outcome of running the whole chain over one source row
pub enum Transformed {
    Skip,
    /// Destination table -> projected cell vectors, in column order
    Tables(HashMap<String, Vec<Vec<Option<String>>>>),
}

/// Run `chain` over `row`, normalize the result to per-table rows, and
/// project each row into the table's column order.
///
/// A `Skip` from any transformer short-circuits the rest. Once a
/// transformer has fanned the row out, later transformers run on each
/// fanned row individually; a `Skip` there drops only that row, and
/// fanning out again is a structural error.
pub fn apply_chain(
    chain: &[&dyn RowTransformer],
    schemas: &SchemaLookup,
    row: Row,
) -> Result<Transformed> {
    let mut state = TransformOutput::Row(row);

    for transformer in chain {
        state = match state {
            TransformOutput::Row(row) => transformer.transform(row)?,
            TransformOutput::PerTable(tables) => {
                let mut next = HashMap::with_capacity(tables.len());
                for (table, rows) in tables {
                    let mut kept = Vec::with_capacity(rows.len());
                    for row in rows {
                        match transformer.transform(row)? {
                            TransformOutput::Row(row) => kept.push(row),
                            TransformOutput::Skip => {},
                            TransformOutput::PerTable(_) => {
                                return Err(EtlError::Transform(format!(
                                    "row already fanned out to table '{}' was fanned out again",
                                    table
                                )))
                            },
                        }
                    }
                    next.insert(table, kept);
                }
                TransformOutput::PerTable(next)
            },
            TransformOutput::Skip => TransformOutput::Skip,
        };

        if matches!(state, TransformOutput::Skip) {
            return Ok(Transformed::Skip);
        }
    }

    let tables = match state {
        TransformOutput::Skip => return Ok(Transformed::Skip),
        TransformOutput::PerTable(tables) => tables,
        TransformOutput::Row(row) => {
            let default = schemas
                .default_table()
                .ok_or_else(|| EtlError::Transform("no destination tables configured".into()))?;
            HashMap::from([(default.to_string(), vec![row])])
        },
    };

    let mut projected = HashMap::with_capacity(tables.len());
    for (table, rows) in tables {
        let schema = schemas
            .get(&table)
            .ok_or_else(|| EtlError::UnknownTable(table.clone()))?;
        let values = rows
            .iter()
            .map(|row| {
                schema
                    .columns
                    .iter()
                    .map(|col| row.get(&col.name).map(format_cell))
                    .collect()
            })
            .collect();
        projected.insert(table, values);
    }

    Ok(Transformed::Tables(projected))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row::row_from_pairs;
    use crate::schema::{ColumnDef, TableSchema};
    use serde_json::json;

    struct SkipAll;

    impl RowTransformer for SkipAll {
        fn transform(&self, _row: Row) -> Result<TransformOutput> {
            Ok(TransformOutput::Skip)
        }
    }

    struct Uppercase;

    impl RowTransformer for Uppercase {
        fn transform(&self, mut row: Row) -> Result<TransformOutput> {
            for (_, value) in row.iter_mut() {
                if let serde_json::Value::String(s) = value {
                    *s = s.to_uppercase();
                }
            }
            Ok(TransformOutput::Row(row))
        }
    }

    struct FanToHistory;

    impl RowTransformer for FanToHistory {
        fn transform(&self, row: Row) -> Result<TransformOutput> {
            let mut tables = HashMap::new();
            tables.insert("orgs".to_string(), vec![row.clone()]);
            tables.insert("orgs_history".to_string(), vec![row.clone(), row]);
            Ok(TransformOutput::PerTable(tables))
        }
    }

    fn schemas() -> SchemaLookup {
        SchemaLookup::new(vec![
            TableSchema::new("analytics", "orgs").with_columns(vec![
                ColumnDef::new("id", "integer"),
                ColumnDef::new("name", "character varying"),
            ]),
            TableSchema::new("analytics", "orgs_history").with_columns(vec![
                ColumnDef::new("id", "integer"),
                ColumnDef::new("name", "character varying"),
            ]),
        ])
    }

    fn sample_row() -> Row {
        row_from_pairs([("id", json!(7)), ("name", json!("acme"))])
    }

    #[test]
    fn test_plain_row_routes_to_default_table() {
        let result = apply_chain(&[], &schemas(), sample_row()).unwrap();
        let Transformed::Tables(tables) = result else {
            panic!("row should not be skipped");
        };
        assert_eq!(tables.len(), 1);
        let rows = &tables["orgs"];
        assert_eq!(
            rows[0],
            vec![Some("7".to_string()), Some("acme".to_string())]
        );
    }

    #[test]
    fn test_missing_column_projects_to_none() {
        let row = row_from_pairs([("id", json!(7))]);
        let Transformed::Tables(tables) = apply_chain(&[], &schemas(), row).unwrap() else {
            panic!("row should not be skipped");
        };
        assert_eq!(tables["orgs"][0], vec![Some("7".to_string()), None]);
    }

    #[test]
    fn test_skip_short_circuits() {
        let skip = SkipAll;
        let upper = Uppercase;
        let chain: Vec<&dyn RowTransformer> = vec![&skip, &upper];
        assert!(matches!(
            apply_chain(&chain, &schemas(), sample_row()).unwrap(),
            Transformed::Skip
        ));
    }

    #[test]
    fn test_fanout_expands_rows_per_table() {
        let fan = FanToHistory;
        let chain: Vec<&dyn RowTransformer> = vec![&fan];
        let Transformed::Tables(tables) = apply_chain(&chain, &schemas(), sample_row()).unwrap()
        else {
            panic!("row should not be skipped");
        };
        assert_eq!(tables["orgs"].len(), 1);
        assert_eq!(tables["orgs_history"].len(), 2);
    }

    #[test]
    fn test_transformers_after_fanout_run_per_row() {
        let fan = FanToHistory;
        let upper = Uppercase;
        let chain: Vec<&dyn RowTransformer> = vec![&fan, &upper];
        let Transformed::Tables(tables) = apply_chain(&chain, &schemas(), sample_row()).unwrap()
        else {
            panic!("row should not be skipped");
        };
        assert_eq!(tables["orgs"][0][1], Some("ACME".to_string()));
    }

    #[test]
    fn test_refanning_is_an_error() {
        let fan = FanToHistory;
        let chain: Vec<&dyn RowTransformer> = vec![&fan, &fan];
        let err = apply_chain(&chain, &schemas(), sample_row()).unwrap_err();
        assert!(matches!(err, EtlError::Transform(_)));
    }

    #[test]
    fn test_unknown_table_is_an_error() {
        struct FanToUnknown;
        impl RowTransformer for FanToUnknown {
            fn transform(&self, row: Row) -> Result<TransformOutput> {
                Ok(TransformOutput::PerTable(HashMap::from([(
                    "nope".to_string(),
                    vec![row],
                )])))
            }
        }
        let fan = FanToUnknown;
        let chain: Vec<&dyn RowTransformer> = vec![&fan];
        let err = apply_chain(&chain, &schemas(), sample_row()).unwrap_err();
        assert!(matches!(err, EtlError::UnknownTable(t) if t == "nope"));
    }
}
