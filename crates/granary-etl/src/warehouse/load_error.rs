//! Structured bulk-load failure diagnostics
//!
//! When the warehouse rejects rows during a bulk load it records the
//! offending line and the partially parsed column values in its load-error
//! tables. [`LoadError`] carries both so callers can reconstruct the bad
//! source line instead of staring at a generic load failure.

use std::fmt;

/// One parsed column value from the load-error detail table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadErrorDetail {
    pub column_name: String,
    pub parsed_value: String,
}

/// A bulk-load failure reported by the warehouse
#[derive(Debug, Clone)]
pub struct LoadError {
    /// Warehouse query id of the failed load
    pub query_id: i64,
    /// Object-storage key of the shard file holding the bad row
    pub file_name: String,
    pub line_number: i64,
    pub position: i64,
    pub raw_line: String,
    pub reason: String,
    /// Per-column parse detail for the failing row
    pub details: Vec<LoadErrorDetail>,
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Load error on query '{}': Reason: '{}', file: {} LineNumber: {}, Position: {}, Rawline: '{}', parsed row: '{{",
            self.query_id,
            self.reason,
            self.file_name,
            self.line_number,
            self.position,
            self.raw_line,
        )?;
        for (i, detail) in self.details.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", detail.column_name, detail.parsed_value)?;
        }
        write!(f, "}}'")
    }
}

impl std::error::Error for LoadError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_carries_file_line_and_details() {
        let err = LoadError {
            query_id: 8812,
            file_name: "s3://bucket/run42/orgs.2_abc".to_string(),
            line_number: 17,
            position: 3,
            raw_line: "7\u{1}acme".to_string(),
            reason: "Invalid digit".to_string(),
            details: vec![
                LoadErrorDetail {
                    column_name: "id".to_string(),
                    parsed_value: "7".to_string(),
                },
                LoadErrorDetail {
                    column_name: "name".to_string(),
                    parsed_value: "acme".to_string(),
                },
            ],
        };

        let message = err.to_string();
        assert!(message.contains("s3://bucket/run42/orgs.2_abc"));
        assert!(message.contains("LineNumber: 17"));
        assert!(message.contains("Invalid digit"));
        assert!(message.contains("id: 7"));
        assert!(message.contains("name: acme"));
    }
}
