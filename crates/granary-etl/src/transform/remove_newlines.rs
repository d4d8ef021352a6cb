//! Embedded newlines corrupt the row-delimited staging format, so every
//! load strips them before anything else runs.

use super::{RowTransformer, TransformOutput};
use crate::error::Result;
use crate::row::Row;
use serde_json::Value;

/// Strips embedded newline characters from every string value.
#[derive(Debug, Default)]
pub struct RemoveNewlines;

impl RowTransformer for RemoveNewlines {
    fn transform(&self, mut row: Row) -> Result<TransformOutput> {
        for (_, value) in row.iter_mut() {
            if let Value::String(s) = value {
                if s.contains(['\n', '\r']) {
                    *s = s.replace(['\n', '\r'], "");
                }
            }
        }
        Ok(TransformOutput::Row(row))
    }
}
