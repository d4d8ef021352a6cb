use super::{RowTransformer, TransformOutput};
use crate::error::Result;
use crate::row::Row;
use serde_json::Value;

/// Rewrites null values into the configured sentinel string.
///
/// The orchestrator appends this transformer last and adds the matching
/// `NULL AS '<sentinel>'` option to the bulk-load command, so explicit
/// nulls survive the trip through the delimited staging files.
#[derive(Debug)]
pub struct NullSentinel {
    sentinel: String,
}

impl NullSentinel {
    pub fn new(sentinel: impl Into<String>) -> Self {
        Self {
            sentinel: sentinel.into(),
        }
    }
}

impl RowTransformer for NullSentinel {
    fn transform(&self, mut row: Row) -> Result<TransformOutput> {
        for (_, value) in row.iter_mut() {
            if value.is_null() {
                *value = Value::String(self.sentinel.clone());
            }
        }
        Ok(TransformOutput::Row(row))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row::row_from_pairs;
    use serde_json::json;

    #[test]
    fn test_rewrites_nulls_only() {
        let row = row_from_pairs([
            ("a", json!(null)),
            ("b", json!("keep")),
            ("c", json!(0)),
        ]);
        let out = NullSentinel::new("*null_string*").transform(row).unwrap();
        let TransformOutput::Row(row) = out else {
            panic!("row should pass through");
        };
        assert_eq!(row["a"], json!("*null_string*"));
        assert_eq!(row["b"], json!("keep"));
        assert_eq!(row["c"], json!(0));
    }
}
