//! Untyped row values
//!
//! Rows stay untyped through the transform chain; they are checked against
//! a table's column order only when projected into shard-file cells.

use anyhow::Result;
use serde_json::Value;

/// A row: column name -> untyped value
pub type Row = serde_json::Map<String, Value>;

/// Build a row from `(column, value)` pairs.
pub fn row_from_pairs<I, K>(pairs: I) -> Row
where
    I: IntoIterator<Item = (K, Value)>,
    K: Into<String>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v)).collect()
}

/// Render one value as a shard-file cell.
///
/// Strings pass through unquoted, null becomes an empty field (the null
/// sentinel transformer has already rewritten nulls that must survive the
/// bulk load), and anything else uses its JSON rendering.
pub fn format_cell(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

/// A lazy, finite, single-pass source of rows.
///
/// Supplied by a job or reader external to the pipeline; `add_rows` drains
/// it exactly once.
pub trait RowSource {
    /// Produce the next row, or `None` when the source is exhausted.
    fn next_row(&mut self) -> Result<Option<Row>>;
}

impl<I> RowSource for I
where
    I: Iterator<Item = Row>,
{
    fn next_row(&mut self) -> Result<Option<Row>> {
        Ok(self.next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_format_cell() {
        assert_eq!(format_cell(&json!("abc")), "abc");
        assert_eq!(format_cell(&json!(null)), "");
        assert_eq!(format_cell(&json!(42)), "42");
        assert_eq!(format_cell(&json!(1.5)), "1.5");
        assert_eq!(format_cell(&json!(true)), "true");
    }

    #[test]
    fn test_iterator_row_source() {
        let rows = vec![
            row_from_pairs([("id", json!(1))]),
            row_from_pairs([("id", json!(2))]),
        ];
        let mut source = rows.into_iter();
        assert_eq!(source.next_row().unwrap().unwrap()["id"], json!(1));
        assert_eq!(source.next_row().unwrap().unwrap()["id"], json!(2));
        assert!(source.next_row().unwrap().is_none());
    }
}
