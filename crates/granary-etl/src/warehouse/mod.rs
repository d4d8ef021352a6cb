//! Warehouse access: connection management, bulk ingestion, merges.

pub mod client;
pub mod load_error;
pub mod merge;

pub use client::WarehouseClient;
pub use load_error::{LoadError, LoadErrorDetail};
pub use merge::MergeStrategy;

use async_trait::async_trait;

use crate::schema::TableSchema;

/// Optional pre-merge check over a table's staged data.
///
/// An error aborts that table's merge; other tables in the same load are
/// unaffected.
#[async_trait]
pub trait StagingValidator: Send + Sync {
    async fn validate(
        &self,
        table: &str,
        staging_table: &str,
        schema: &TableSchema,
    ) -> anyhow::Result<()>;
}
