//! Pipeline error types

use thiserror::Error;

use crate::warehouse::load_error::LoadError;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, EtlError>;

/// Error type covering every stage of the bulk-load pipeline
#[derive(Error, Debug)]
pub enum EtlError {
    /// Warehouse query or connection error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Disconnect retries were exhausted; carries the original message
    #[error("Connection retries exhausted after {attempts} attempts: {message}")]
    RetriesExhausted { attempts: u32, message: String },

    /// The warehouse rejected rows during a bulk load
    #[error(transparent)]
    Load(#[from] LoadError),

    /// `add_row` was called after the last push
    #[error("Once the last push has run, add_row cannot be invoked")]
    WriterFinalized,

    /// A transformer emitted rows for a table with no configured schema
    #[error("No schema configured for destination table '{0}'")]
    UnknownTable(String),

    /// A merge-strategy name that is neither append nor upsert
    #[error("Unknown merge strategy '{0}'")]
    UnknownMergeStrategy(String),

    /// The configured object-storage bucket does not exist
    #[error("The bucket '{0}' doesn't exist")]
    BucketMissing(String),

    /// Structurally invalid transformer output
    #[error("Malformed transformer output: {0}")]
    Transform(String),

    /// The staging validator rejected a table's staged data
    #[error("Validation failed for table '{table}': {source}")]
    Validation {
        table: String,
        #[source]
        source: anyhow::Error,
    },

    /// The row source failed while producing rows
    #[error("Row source error: {0}")]
    Source(#[source] anyhow::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Shard file error: {0}")]
    Csv(#[from] csv::Error),

    /// Object-storage upload, listing, or deletion failure
    #[error("Object storage error: {0}")]
    Storage(#[source] anyhow::Error),

    #[error("Granary error: {0}")]
    Common(#[from] granary_common::GranaryError),

    #[error("Configuration error: {0}")]
    Config(String),
}
