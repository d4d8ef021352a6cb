//! Transform-chain to shard-file shape: what lands on disk for a mix of
//! ordinary, reshaped, skipped, and null-bearing rows.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use granary_etl::row::{row_from_pairs, Row, RowSource};
use granary_etl::s3::{ObjectPusher, ShardedBufferWriter, WriterOptions};
use granary_etl::schema::{ColumnDef, SchemaLookup, TableSchema};
use granary_etl::transform::{
    apply_chain, NullSentinel, RemoveNewlines, RowTransformer, TransformOutput, Transformed,
};
use serde_json::json;

#[derive(Default)]
struct NullPusher {
    pushes: AtomicUsize,
}

#[async_trait]
impl ObjectPusher for NullPusher {
    async fn push(&self, _remote_folder: &str, files: &[PathBuf]) -> anyhow::Result<Vec<String>> {
        self.pushes.fetch_add(1, Ordering::SeqCst);
        Ok(files
            .iter()
            .filter_map(|f| f.file_name().map(|n| n.to_string_lossy().to_string()))
            .collect())
    }
}

/// Drops every row whose "id" is odd.
struct DropOddIds;

impl RowTransformer for DropOddIds {
    fn transform(&self, row: Row) -> granary_etl::Result<TransformOutput> {
        match row.get("id").and_then(|v| v.as_i64()) {
            Some(id) if id % 2 == 1 => Ok(TransformOutput::Skip),
            _ => Ok(TransformOutput::Row(row)),
        }
    }
}

fn schemas() -> SchemaLookup {
    SchemaLookup::single(
        TableSchema::new("analytics", "orgs")
            .with_columns(vec![
                ColumnDef::new("id", "integer"),
                ColumnDef::new("name", "character varying"),
                ColumnDef::new("note", "character varying"),
            ])
            .with_primary_key(vec!["id".to_string()]),
    )
}

fn sample_rows() -> Vec<Row> {
    vec![
        row_from_pairs([("id", json!(0)), ("name", json!("a\nco")), ("note", json!(null))]),
        row_from_pairs([("id", json!(1)), ("name", json!("skipped"))]),
        row_from_pairs([("id", json!(2)), ("name", json!("b co"))]),
        row_from_pairs([("id", json!(3)), ("name", json!("skipped"))]),
    ]
}

/// Drive rows through the standard chain into a writer, the way a load
/// does, and return per-table counts.
async fn drive(
    writer: &mut ShardedBufferWriter,
    schemas: &SchemaLookup,
    rows: Vec<Row>,
) -> HashMap<String, u64> {
    let remove_newlines = RemoveNewlines;
    let drop_odd = DropOddIds;
    let null_sentinel = NullSentinel::new("*null_string*");
    let chain: Vec<&dyn RowTransformer> = vec![&remove_newlines, &drop_odd, &null_sentinel];

    let mut counts: HashMap<String, u64> = HashMap::new();
    let mut reader = rows.into_iter();
    while let Some(row) = reader.next_row().unwrap() {
        match apply_chain(&chain, schemas, row).unwrap() {
            Transformed::Skip => continue,
            Transformed::Tables(tables) => {
                for (table, rows) in tables {
                    for cells in rows {
                        writer.add_row(&table, &cells).await.unwrap();
                        *counts.entry(table.clone()).or_default() += 1;
                    }
                }
            },
        }
    }
    counts
}

#[tokio::test]
async fn test_skipped_rows_reach_neither_counter_nor_disk() {
    let tmp = tempfile::tempdir().unwrap();
    let pusher = Arc::new(NullPusher::default());
    let mut writer = ShardedBufferWriter::new(
        Arc::clone(&pusher) as Arc<dyn ObjectPusher>,
        vec!["orgs".to_string()],
        2,
        WriterOptions {
            remote_folder: Some("shape-test".to_string()),
            tmp_dir: tmp.path().to_path_buf(),
            ..WriterOptions::default()
        },
    )
    .unwrap();

    let counts = drive(&mut writer, &schemas(), sample_rows()).await;

    // ids 1 and 3 were skipped; 0 and 2 survive
    assert_eq!(counts["orgs"], 2);
    assert_eq!(writer.rows_written(), 2);

    // nothing was pushed yet; rows sit in local shard files
    assert_eq!(pusher.pushes.load(Ordering::SeqCst), 0);
}

#[test]
fn test_projection_carries_cleaned_values_and_sentinel() {
    let remove_newlines = RemoveNewlines;
    let null_sentinel = NullSentinel::new("*null_string*");
    let chain: Vec<&dyn RowTransformer> = vec![&remove_newlines, &null_sentinel];

    let row = row_from_pairs([
        ("id", json!(0)),
        ("name", json!("a\nco")),
        ("note", json!(null)),
    ]);
    let Transformed::Tables(tables) = apply_chain(&chain, &schemas(), row).unwrap() else {
        panic!("row should not be skipped");
    };

    // newline stripped, explicit null rewritten to the sentinel
    assert_eq!(
        tables["orgs"][0],
        vec![
            Some("0".to_string()),
            Some("aco".to_string()),
            Some("*null_string*".to_string()),
        ]
    );

    // a column absent from the row stays a nil placeholder, distinct from
    // the sentinel
    let sparse = row_from_pairs([("id", json!(2)), ("name", json!("b co"))]);
    let Transformed::Tables(tables) = apply_chain(&chain, &schemas(), sparse).unwrap() else {
        panic!("row should not be skipped");
    };
    assert_eq!(
        tables["orgs"][0],
        vec![Some("2".to_string()), Some("b co".to_string()), None]
    );
}
