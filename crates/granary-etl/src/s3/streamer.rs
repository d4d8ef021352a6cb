//! Size-triggered sharded buffering
//!
//! Rows are spread round-robin across a fixed number of local shard files
//! per destination table. When the summed size of all open shard files
//! crosses a threshold, the files are closed, pushed to object storage,
//! deleted locally, and a fresh generation is opened. Shard files are
//! always closed before upload.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use granary_common::tmpfile;
use tracing::{debug, warn};

use super::ObjectPusher;
use crate::config::{DEFAULT_DELIMITER, DEFAULT_MAX_SUM_FILE_SIZE_MB, DEFAULT_TMP_DIR};
use crate::error::{EtlError, Result};

/// Shard-file stat interval: summed sizes are checked once per this many
/// rows, keeping the per-row cost flat while still flushing a 1 MB
/// threshold well within a ~100-row burst of large values.
const SIZE_CHECK_INTERVAL: u64 = 100;

/// Scratch-file category under the day-bucketed temp root.
const TMP_CATEGORY: &str = "s3";

/// Options for [`ShardedBufferWriter`].
#[derive(Debug, Clone)]
pub struct WriterOptions {
    /// Remote folder for this run; defaults to 16 random hex chars
    pub remote_folder: Option<String>,
    pub delimiter: u8,
    pub max_sum_file_size_mb: f64,
    pub tmp_dir: PathBuf,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            remote_folder: None,
            delimiter: DEFAULT_DELIMITER,
            max_sum_file_size_mb: DEFAULT_MAX_SUM_FILE_SIZE_MB,
            tmp_dir: PathBuf::from(DEFAULT_TMP_DIR),
        }
    }
}

/// Buffers projected rows into per-table shard files and pushes them to
/// object storage, either when the size threshold trips or on the final
/// [`push_last`](Self::push_last).
pub struct ShardedBufferWriter {
    pusher: Arc<dyn ObjectPusher>,
    tables: Vec<String>,
    shard_count: usize,
    remote_folder: String,
    delimiter: u8,
    max_sum_file_size_mb: f64,
    tmp_dir: PathBuf,

    /// Open shard writers keyed by `<table>.<shard>`
    writers: HashMap<String, csv::Writer<std::fs::File>>,
    file_paths: HashMap<String, PathBuf>,
    cursors: HashMap<String, usize>,
    row_number: u64,
    data_pushed: bool,
    finalized: bool,
}

impl ShardedBufferWriter {
    pub fn new(
        pusher: Arc<dyn ObjectPusher>,
        tables: Vec<String>,
        shard_count: usize,
        options: WriterOptions,
    ) -> Result<Self> {
        let mut writer = Self {
            pusher,
            tables,
            shard_count: shard_count.max(1),
            remote_folder: options
                .remote_folder
                .unwrap_or_else(|| tmpfile::random_hex(16)),
            delimiter: options.delimiter,
            max_sum_file_size_mb: options.max_sum_file_size_mb,
            tmp_dir: options.tmp_dir,
            writers: HashMap::new(),
            file_paths: HashMap::new(),
            cursors: HashMap::new(),
            row_number: 0,
            data_pushed: false,
            finalized: false,
        };
        writer.open_shards()?;
        Ok(writer)
    }

    /// Write one projected row to the current shard of `table` and advance
    /// the table's round-robin cursor. `None` cells write as empty fields.
    pub async fn add_row(&mut self, table: &str, cells: &[Option<String>]) -> Result<()> {
        if self.finalized {
            return Err(EtlError::WriterFinalized);
        }

        let cursor = self
            .cursors
            .get_mut(table)
            .ok_or_else(|| EtlError::UnknownTable(table.to_string()))?;
        let key = format!("{}.{}", table, cursor);
        *cursor = (*cursor + 1) % self.shard_count;

        let writer = self
            .writers
            .get_mut(&key)
            .ok_or_else(|| EtlError::UnknownTable(table.to_string()))?;
        writer.write_record(cells.iter().map(|c| c.as_deref().unwrap_or("")))?;

        self.row_number += 1;

        // Stat-ing every shard file on every row would dominate the write
        // path, so the threshold is only consulted periodically.
        if self.row_number % SIZE_CHECK_INTERVAL == 0
            && self.sum_file_sizes_mb()? > self.max_sum_file_size_mb
        {
            self.flush_and_rotate().await?;
        }

        Ok(())
    }

    /// Close and push all shard files, then mark the writer finalized.
    /// Subsequent [`add_row`](Self::add_row) calls fail.
    pub async fn push_last(&mut self) -> Result<()> {
        self.push_current_files().await?;
        self.close_and_delete_files();
        self.finalized = true;
        Ok(())
    }

    /// Best-effort close-and-delete of any remaining local shard files.
    /// Used on every exit path of a load; never fails.
    pub fn discard_local_files(&mut self) {
        self.writers.clear();
        for path in self.file_paths.values() {
            if !path.exists() {
                continue;
            }
            if let Err(err) = std::fs::remove_file(path) {
                warn!(path = %path.display(), error = %err, "failed to remove shard file");
            }
        }
        self.file_paths.clear();
        self.cursors.clear();
    }

    /// True once any shard generation has been uploaded.
    pub fn data_pushed(&self) -> bool {
        self.data_pushed
    }

    /// Remote folder owned by this run.
    pub fn remote_folder(&self) -> &str {
        &self.remote_folder
    }

    /// Remote key prefix matching exactly one table's shard files.
    pub fn remote_prefix_for(&self, table: &str) -> String {
        format!("{}/{}.", self.remote_folder, table)
    }

    /// Rows accepted so far across all tables.
    pub fn rows_written(&self) -> u64 {
        self.row_number
    }

    fn open_shards(&mut self) -> Result<()> {
        self.writers = HashMap::new();
        self.file_paths = HashMap::new();
        self.cursors = HashMap::new();
        for table in self.tables.clone() {
            self.cursors.insert(table.clone(), 0);
            for shard in 0..self.shard_count {
                let key = format!("{}.{}", table, shard);
                let path = tmpfile::by_day(&self.tmp_dir, TMP_CATEGORY, &key)?;
                let file = std::fs::OpenOptions::new().write(true).open(&path)?;
                let writer = csv::WriterBuilder::new()
                    .delimiter(self.delimiter)
                    .from_writer(file);
                self.file_paths.insert(key.clone(), path);
                self.writers.insert(key, writer);
            }
        }
        Ok(())
    }

    async fn flush_and_rotate(&mut self) -> Result<()> {
        debug!(
            rows = self.row_number,
            threshold_mb = self.max_sum_file_size_mb,
            "shard size threshold exceeded, pushing current generation"
        );
        self.push_current_files().await?;
        self.close_and_delete_files();
        self.open_shards()
    }

    async fn push_current_files(&mut self) -> Result<()> {
        for writer in self.writers.values_mut() {
            writer.flush()?;
        }
        let files: Vec<PathBuf> = self.file_paths.values().cloned().collect();
        self.pusher
            .push(&self.remote_folder, &files)
            .await
            .map_err(EtlError::Storage)?;
        self.data_pushed = true;
        Ok(())
    }

    fn close_and_delete_files(&mut self) {
        self.writers.clear();
        for path in self.file_paths.values() {
            if let Err(err) = std::fs::remove_file(path) {
                warn!(path = %path.display(), error = %err, "failed to remove shard file");
            }
        }
        self.file_paths.clear();
        self.cursors.clear();
    }

    fn sum_file_sizes_mb(&mut self) -> Result<f64> {
        for writer in self.writers.values_mut() {
            writer.flush()?;
        }
        let mut bytes = 0u64;
        for path in self.file_paths.values() {
            bytes += std::fs::metadata(path)?.len();
        }
        Ok(bytes as f64 / (1024.0 * 1024.0))
    }
}

impl std::fmt::Debug for ShardedBufferWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardedBufferWriter")
            .field("tables", &self.tables)
            .field("shard_count", &self.shard_count)
            .field("remote_folder", &self.remote_folder)
            .field("rows_written", &self.row_number)
            .field("data_pushed", &self.data_pushed)
            .field("finalized", &self.finalized)
            .finish()
    }
}
