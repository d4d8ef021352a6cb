//! Granary ETL Library
//!
//! Bulk-loads streams of transformed rows into a columnar analytical
//! warehouse through an object-storage staging area, using the warehouse's
//! native bulk-load command and transactional merges instead of row-by-row
//! inserts.
//!
//! # Pipeline
//!
//! Data flows one way; cleanup flows backward on success and failure:
//!
//! 1. A [`row::RowSource`] yields rows once, in order.
//! 2. The [`transform`] chain reshapes, fans out, or skips each row.
//! 3. The [`s3::ShardedBufferWriter`] spreads projected rows round-robin
//!    across per-table shard files and pushes them to object storage when
//!    their summed size crosses a threshold.
//! 4. The [`warehouse::WarehouseClient`] bulk-loads the uploaded shards
//!    into an ephemeral staging table per destination and merges each
//!    staging table inside a single transaction
//!    ([`warehouse::MergeStrategy`]: append or upsert).
//!
//! # Example
//!
//! ```no_run
//! use granary_etl::config::WarehouseConfig;
//! use granary_etl::schema::SchemaLookup;
//! use granary_etl::warehouse::WarehouseClient;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = WarehouseConfig::load()?;
//!     let mut client = WarehouseClient::new(config).await?;
//!
//!     let orders = client.table_schema("analytics", "orders").await?;
//!     let schemas = SchemaLookup::single(orders);
//!
//!     let mut reader = std::iter::empty::<granary_etl::row::Row>();
//!     let rows = client
//!         .upsert_rows(&mut reader, &schemas, &[], None, &[])
//!         .await?;
//!     println!("processed {rows} rows");
//!
//!     client.close().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod queue;
pub mod row;
pub mod s3;
pub mod schema;
pub mod transform;
pub mod warehouse;

// Re-export commonly used types
pub use error::{EtlError, Result};
pub use schema::{ColumnDef, SchemaLookup, TableSchema};
pub use warehouse::{MergeStrategy, WarehouseClient};
