//! Warehouse client and the bulk-load orchestration
//!
//! One client owns one lazily-opened connection. Every primitive runs
//! through a bounded reconnect-retry loop; bulk ingestion goes through
//! object storage and ephemeral staging tables rather than row-by-row
//! inserts.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use granary_common::tmpfile;
use sqlx::postgres::{PgConnection, PgRow};
use sqlx::{Connection, Row};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::load_error::{LoadError, LoadErrorDetail};
use super::merge::{primary_key_join, MergeStrategy};
use super::StagingValidator;
use crate::config::WarehouseConfig;
use crate::error::{EtlError, Result};
use crate::row::RowSource;
use crate::s3::{BucketPusher, ShardedBufferWriter, WriterOptions};
use crate::schema::{ColumnDef, ForeignKey, SchemaLookup, TableSchema};
use crate::transform::{self, NullSentinel, RemoveNewlines, RowTransformer, Transformed};

/// Substring the warehouse puts in bulk-load failures that have diagnostic
/// rows available.
const LOAD_ERROR_MARKER: &str = "stl_load_errors";

/// Client for a columnar warehouse speaking the Postgres wire protocol.
pub struct WarehouseClient {
    config: WarehouseConfig,
    conn: Option<PgConnection>,
    schema_cache: HashMap<String, TableSchema>,
    pusher: Arc<BucketPusher>,
}

impl WarehouseClient {
    /// Build the client. Fails fast if the staging bucket does not exist;
    /// the warehouse connection itself opens lazily on first use.
    pub async fn new(config: WarehouseConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|err| EtlError::Config(err.to_string()))?;
        let pusher = Arc::new(BucketPusher::new(&config.storage, config.upload_workers).await?);
        Ok(Self {
            config,
            conn: None,
            schema_cache: HashMap::new(),
            pusher,
        })
    }

    /// Close the connection. Call when done with the client; dropping it
    /// without closing leaves teardown to the server.
    pub async fn close(mut self) -> Result<()> {
        if let Some(conn) = self.conn.take() {
            conn.close().await?;
        }
        Ok(())
    }

    /// The pusher bound to the configured staging bucket.
    pub fn pusher(&self) -> &Arc<BucketPusher> {
        &self.pusher
    }

    // ------------------------------------------------------------------
    // Primitives: every statement goes through the reconnect-retry loop
    // ------------------------------------------------------------------

    /// Run a statement (or a `begin …; end;` batch), returning affected rows.
    pub async fn execute(&mut self, sql: &str) -> Result<u64> {
        debug!(sql, "execute");
        let sql = sql.to_string();
        self.with_retry("execute", move |conn| {
            let sql = sql.clone();
            Box::pin(async move {
                sqlx::raw_sql(&sql)
                    .execute(conn)
                    .await
                    .map(|done| done.rows_affected())
            })
        })
        .await
    }

    /// Run a query and collect all result rows.
    pub async fn fetch(&mut self, sql: &str) -> Result<Vec<PgRow>> {
        debug!(sql, "fetch");
        let sql = sql.to_string();
        self.with_retry("fetch", move |conn| {
            let sql = sql.clone();
            Box::pin(async move { sqlx::raw_sql(&sql).fetch_all(conn).await })
        })
        .await
    }

    /// Run a DDL statement.
    pub async fn execute_ddl(&mut self, sql: &str) -> Result<()> {
        self.execute(sql).await.map(|_| ())
    }

    /// Run a delete/update/insert statement, returning affected rows.
    pub async fn execute_dui(&mut self, sql: &str) -> Result<u64> {
        self.execute(sql).await
    }

    /// Run an insert statement, returning inserted rows.
    pub async fn execute_insert(&mut self, sql: &str) -> Result<u64> {
        self.execute(sql).await
    }

    async fn with_retry<T, F>(&mut self, op_name: &str, op: F) -> Result<T>
    where
        T: Send,
        F: for<'c> Fn(&'c mut PgConnection) -> BoxFuture<'c, sqlx::Result<T>>,
    {
        let mut attempt: u32 = 0;
        loop {
            // reopen the connection if the last attempt dropped it
            if self.conn.is_none() {
                match PgConnection::connect(&self.config.database_url).await {
                    Ok(conn) => {
                        debug!("opened warehouse connection");
                        self.conn = Some(conn);
                    },
                    Err(err) if is_disconnect(&err) => {
                        if attempt >= self.config.max_connection_retries {
                            return Err(EtlError::RetriesExhausted {
                                attempts: attempt,
                                message: err.to_string(),
                            });
                        }
                        attempt += 1;
                        let backoff = backoff_for(attempt);
                        warn!(
                            op = op_name,
                            attempt,
                            backoff_secs = backoff.as_secs(),
                            error = %err,
                            "warehouse connection failed, retrying"
                        );
                        sleep(backoff).await;
                        continue;
                    },
                    // auth and protocol failures are not worth a reconnect
                    Err(err) => return Err(err.into()),
                }
            }
            let Some(conn) = self.conn.as_mut() else {
                continue;
            };

            match op(conn).await {
                Ok(value) => return Ok(value),
                Err(err) if is_disconnect(&err) => {
                    // the cached connection is dead; reconnect on next pass
                    self.conn = None;
                    if attempt >= self.config.max_connection_retries {
                        return Err(EtlError::RetriesExhausted {
                            attempts: attempt,
                            message: err.to_string(),
                        });
                    }
                    attempt += 1;
                    let backoff = backoff_for(attempt);
                    warn!(
                        op = op_name,
                        attempt,
                        backoff_secs = backoff.as_secs(),
                        error = %err,
                        "warehouse disconnected, retrying"
                    );
                    sleep(backoff).await;
                },
                Err(err) => return Err(err.into()),
            }
        }
    }

    // ------------------------------------------------------------------
    // Metadata
    // ------------------------------------------------------------------

    /// Fetch (and cache) the schema of `schema.table` from warehouse
    /// metadata: ordered columns, primary key, foreign keys.
    pub async fn table_schema(&mut self, schema: &str, table: &str) -> Result<TableSchema> {
        let full_name = format!("{}.{}", schema, table);
        if self.config.cache_table_schemas {
            if let Some(cached) = self.schema_cache.get(&full_name) {
                return Ok(cached.clone());
            }
        }

        self.execute(&format!("SET search_path TO {}", schema))
            .await?;

        let columns_sql = format!(
            "SELECT pg_table_def.\"column\" AS column_name, pg_table_def.type AS data_type, \
             i.character_maximum_length AS max_length \
             FROM pg_table_def \
             LEFT JOIN information_schema.columns AS i \
               ON i.table_schema = pg_table_def.schemaname \
              AND i.table_name = pg_table_def.tablename \
              AND i.column_name = pg_table_def.\"column\" \
             WHERE tablename = '{table}' AND schemaname = '{schema}'"
        );
        let mut columns = Vec::new();
        for row in self.fetch(&columns_sql).await? {
            columns.push(ColumnDef {
                name: row.try_get("column_name")?,
                data_type: row.try_get("data_type")?,
                max_length: row.try_get("max_length")?,
            });
        }

        let pk_sql = format!(
            "SELECT pg_constraint.conkey AS primary_key_ordinals \
             FROM pg_constraint \
             LEFT JOIN pg_namespace ON pg_constraint.connamespace = pg_namespace.oid \
             LEFT JOIN pg_class ON pg_constraint.conrelid = pg_class.oid \
             WHERE pg_constraint.contype = 'p' \
               AND pg_namespace.nspname = '{schema}' AND pg_class.relname = '{table}'"
        );
        let mut primary_key = Vec::new();
        if let Some(row) = self.fetch(&pk_sql).await?.first() {
            let ordinals: Vec<i16> = row.try_get("primary_key_ordinals")?;
            for ordinal in ordinals {
                // constraint-key ordinals are 1-based column positions
                if let Some(col) = columns.get((ordinal as usize).saturating_sub(1)) {
                    primary_key.push(col.name.clone());
                }
            }
        }

        let fks_sql = format!(
            "SELECT o.conname AS constraint_name, \
             (SELECT a.attname FROM pg_attribute a WHERE a.attrelid = m.oid \
                AND a.attnum = o.conkey[1] AND a.attisdropped = false) AS source_column, \
             (SELECT nspname FROM pg_namespace WHERE oid = f.relnamespace) AS target_schema, \
             f.relname AS target_table, \
             (SELECT a.attname FROM pg_attribute a WHERE a.attrelid = f.oid \
                AND a.attnum = o.confkey[1] AND a.attisdropped = false) AS target_column \
             FROM pg_constraint o \
             LEFT JOIN pg_class f ON f.oid = o.confrelid \
             LEFT JOIN pg_class m ON m.oid = o.conrelid \
             WHERE o.contype = 'f' AND m.relname = '{table}' \
               AND (SELECT nspname FROM pg_namespace WHERE oid = m.relnamespace) = '{schema}'"
        );
        let mut foreign_keys = Vec::new();
        for row in self.fetch(&fks_sql).await? {
            foreign_keys.push(ForeignKey {
                constraint_name: row.try_get("constraint_name")?,
                source_column: row.try_get("source_column")?,
                target_schema: row.try_get("target_schema")?,
                target_table: row.try_get("target_table")?,
                target_column: row.try_get("target_column")?,
            });
        }

        let table_schema = TableSchema {
            schema: schema.to_string(),
            name: table.to_string(),
            columns,
            primary_key,
            foreign_keys,
        };

        if self.config.cache_table_schemas {
            self.schema_cache
                .insert(full_name, table_schema.clone());
        }

        Ok(table_schema)
    }

    pub async fn table_exists(&mut self, schema: &str, table: &str) -> Result<bool> {
        let sql = format!(
            "SELECT count(*) AS n FROM pg_tables \
             WHERE schemaname = '{schema}' AND tablename = '{table}'"
        );
        let rows = self.fetch(&sql).await?;
        let count: i64 = match rows.first() {
            Some(row) => row.try_get("n")?,
            None => 0,
        };
        Ok(count == 1)
    }

    pub async fn drop_table(&mut self, schema: &str, table: &str) -> Result<()> {
        self.execute_ddl(&format!("DROP TABLE IF EXISTS {}.{};", schema, table))
            .await
    }

    // ------------------------------------------------------------------
    // Bulk ingestion
    // ------------------------------------------------------------------

    /// Create an ephemeral staging table structured like the destination
    /// and return its generated name.
    pub async fn create_staging_table(
        &mut self,
        final_schema: &str,
        final_table: &str,
    ) -> Result<String> {
        let staging = staging_table_name(final_table);
        let sql = format!(
            "CREATE TEMP TABLE {} (LIKE {}.{})",
            staging, final_schema, final_table
        );
        self.execute_ddl(&sql).await?;
        Ok(staging)
    }

    /// Bulk-load shard files under `remote_path` into `table`.
    ///
    /// When the failure message names the load-error table, the diagnostic
    /// rows are fetched and surfaced as a structured [`LoadError`]; any
    /// other failure is re-raised unchanged.
    pub async fn copy_from_object_store(
        &mut self,
        table: &str,
        remote_path: &str,
        options: &[String],
    ) -> Result<()> {
        let sql = self.build_copy_sql(table, remote_path, options);
        match self.execute(&sql).await {
            Ok(_) => Ok(()),
            Err(err) => {
                if mentions_load_errors(&err.to_string()) {
                    if let Some(load_error) = self.diagnose_load_error(remote_path).await {
                        return Err(EtlError::Load(load_error));
                    }
                }
                Err(err)
            },
        }
    }

    fn build_copy_sql(&self, table: &str, remote_path: &str, options: &[String]) -> String {
        let mut sql = format!(
            "COPY {table}\nFROM 's3://{remote_path}'\nIAM_ROLE '{role}'\n\
             TIMEFORMAT AS 'auto'\nDATEFORMAT AS 'auto'\nDELIMITER '{delimiter}'\n\
             REGION '{region}'\nACCEPTINVCHARS",
            role = self.config.iam_role,
            delimiter = self.config.delimiter as char,
            region = self.config.storage.region,
        );
        for option in options {
            sql.push('\n');
            sql.push_str(option);
        }
        sql
    }

    /// Fetch the first load-error row for `remote_path` and its per-column
    /// detail. Returns `None` when the diagnostic queries fail or come back
    /// empty, so the original copy error can surface instead.
    async fn diagnose_load_error(&mut self, remote_path: &str) -> Option<LoadError> {
        let full_path = format!("s3://{}", remote_path);
        let sql = format!(
            "SELECT query, filename, line_number, position, raw_line, err_reason \
             FROM stl_load_errors WHERE filename LIKE '{}%' ORDER BY filename",
            full_path
        );
        // multiple shard files can fail at once; report the first
        let rows = self.fetch(&sql).await.ok()?;
        let row = rows.first()?;

        let query_id: i64 = row.try_get::<i32, _>("query").ok()? as i64;
        let file_name: String = row.try_get("filename").ok()?;
        let line_number: i64 = row.try_get("line_number").ok()?;
        let position: i32 = row.try_get("position").ok()?;
        let raw_line: String = row.try_get("raw_line").ok()?;
        let reason: String = row.try_get("err_reason").ok()?;

        let detail_sql = format!(
            "SELECT colname, value FROM stl_loaderror_detail WHERE query = '{}'",
            query_id
        );
        let details = match self.fetch(&detail_sql).await {
            Ok(rows) => rows
                .iter()
                .filter_map(|row| {
                    let column_name: String = row.try_get("colname").ok()?;
                    let parsed_value: String = row.try_get("value").ok()?;
                    Some(LoadErrorDetail {
                        column_name: column_name.trim().to_string(),
                        parsed_value: parsed_value.trim().to_string(),
                    })
                })
                .collect(),
            Err(_) => Vec::new(),
        };

        Some(LoadError {
            query_id,
            file_name: file_name.trim().to_string(),
            line_number,
            position: position as i64,
            raw_line: raw_line.trim().to_string(),
            reason: reason.trim().to_string(),
            details,
        })
    }

    /// Export a query's result set to object storage with the warehouse's
    /// native unload command.
    pub async fn unload_to_object_store(&mut self, query: &str, destination: &str) -> Result<()> {
        let sql = format!(
            "UNLOAD ('{query}') TO 's3://{destination}'\nIAM_ROLE '{role}'\nDELIMITER '{delimiter}'",
            role = self.config.iam_role,
            delimiter = self.config.delimiter as char,
        );
        self.execute(&sql).await.map(|_| ())
    }

    /// Sum the lines the warehouse scanned loading files under
    /// `destination`, per its load-commit log.
    pub async fn count_rows_loaded_from(&mut self, destination: &str) -> Result<i64> {
        let sql = format!(
            "SELECT c.lines_scanned FROM stl_load_commits c, stl_query q \
             WHERE filename LIKE 's3://{destination}%' \
             AND c.query = q.query AND trim(q.querytxt) NOT LIKE 'COPY ANALYZE%'"
        );
        let mut loaded = 0i64;
        for row in self.fetch(&sql).await? {
            let lines: i64 = row.try_get("lines_scanned")?;
            loaded += lines;
        }
        Ok(loaded)
    }

    // ------------------------------------------------------------------
    // Orchestration
    // ------------------------------------------------------------------

    /// Upsert rows from `reader` into the destination tables.
    pub async fn upsert_rows(
        &mut self,
        reader: &mut dyn RowSource,
        schemas: &SchemaLookup,
        transformers: &[Box<dyn RowTransformer>],
        validator: Option<&dyn StagingValidator>,
        copy_options: &[String],
    ) -> Result<u64> {
        self.add_rows(
            reader,
            schemas,
            transformers,
            validator,
            copy_options,
            MergeStrategy::Upsert,
        )
        .await
    }

    /// Append rows from `reader` to the destination tables.
    pub async fn append_rows(
        &mut self,
        reader: &mut dyn RowSource,
        schemas: &SchemaLookup,
        transformers: &[Box<dyn RowTransformer>],
        validator: Option<&dyn StagingValidator>,
        copy_options: &[String],
    ) -> Result<u64> {
        self.add_rows(
            reader,
            schemas,
            transformers,
            validator,
            copy_options,
            MergeStrategy::Append,
        )
        .await
    }

    /// Drain `reader` through the transform chain, shard and upload the
    /// output, bulk-load it into per-table staging tables, and merge each
    /// staging table into its destination with `strategy`.
    ///
    /// Local shard files, uploaded objects, and staging tables are released
    /// on every exit path. Returns the highest per-table row count.
    pub async fn add_rows(
        &mut self,
        reader: &mut dyn RowSource,
        schemas: &SchemaLookup,
        transformers: &[Box<dyn RowTransformer>],
        validator: Option<&dyn StagingValidator>,
        copy_options: &[String],
        strategy: MergeStrategy,
    ) -> Result<u64> {
        let remove_newlines = RemoveNewlines;
        let null_sentinel = NullSentinel::new(self.config.null_sentinel.clone());
        let mut chain: Vec<&dyn RowTransformer> = Vec::with_capacity(transformers.len() + 2);
        chain.push(&remove_newlines);
        chain.extend(transformers.iter().map(|t| t.as_ref()));
        chain.push(&null_sentinel);

        let mut copy_options = copy_options.to_vec();
        copy_options.push(format!("NULL AS '{}'", self.config.null_sentinel));

        let mut writer = ShardedBufferWriter::new(
            self.pusher.clone(),
            schemas.tables().map(str::to_string).collect(),
            self.config.shard_count_per_table,
            WriterOptions {
                remote_folder: None,
                delimiter: self.config.delimiter,
                max_sum_file_size_mb: self.config.max_sum_file_size_mb,
                tmp_dir: self.config.tmp_dir.clone(),
            },
        )?;

        let mut rows_processed: HashMap<String, u64> =
            schemas.tables().map(|t| (t.to_string(), 0)).collect();
        let mut staging_tables: Vec<String> = Vec::new();

        let result = self
            .load_and_merge(
                reader,
                schemas,
                &chain,
                validator,
                &copy_options,
                strategy,
                &mut writer,
                &mut rows_processed,
                &mut staging_tables,
            )
            .await;

        // Cleanup runs on every exit path and must not mask the original
        // error: discard shard files still on disk, drop every staging
        // table we created, delete the run's uploaded objects.
        writer.discard_local_files();
        for staging in &staging_tables {
            if let Err(err) = self
                .execute_ddl(&format!("DROP TABLE IF EXISTS {}", staging))
                .await
            {
                warn!(staging_table = %staging, error = %err, "failed to drop staging table");
            }
        }
        if writer.data_pushed() {
            if let Err(err) = self
                .pusher
                .delete_objects_with_prefix(writer.remote_folder())
                .await
            {
                warn!(
                    remote_folder = %writer.remote_folder(),
                    error = %err,
                    "failed to delete staged objects"
                );
            }
        }

        result?;

        Ok(rows_processed.values().copied().max().unwrap_or(0))
    }

    #[allow(clippy::too_many_arguments)]
    async fn load_and_merge(
        &mut self,
        reader: &mut dyn RowSource,
        schemas: &SchemaLookup,
        chain: &[&dyn RowTransformer],
        validator: Option<&dyn StagingValidator>,
        copy_options: &[String],
        strategy: MergeStrategy,
        writer: &mut ShardedBufferWriter,
        rows_processed: &mut HashMap<String, u64>,
        staging_tables: &mut Vec<String>,
    ) -> Result<()> {
        let mut has_rows = false;
        while let Some(row) = reader.next_row().map_err(EtlError::Source)? {
            match transform::apply_chain(chain, schemas, row)? {
                Transformed::Skip => continue,
                Transformed::Tables(tables) => {
                    for (table, rows) in tables {
                        for cells in rows {
                            writer.add_row(&table, &cells).await?;
                            if let Some(count) = rows_processed.get_mut(&table) {
                                *count += 1;
                            }
                            has_rows = true;
                        }
                    }
                },
            }
        }

        if !has_rows {
            debug!("no rows produced, skipping staging and merge");
            return Ok(());
        }

        writer.push_last().await?;

        // Merges are independent per table: one table's validation failure
        // must not affect the others, so it is deferred, not propagated.
        let mut first_validation_failure: Option<EtlError> = None;
        for schema in schemas.iter() {
            let count = rows_processed.get(&schema.name).copied().unwrap_or(0);
            if count == 0 {
                continue;
            }

            let staging = self
                .create_staging_table(&schema.schema, &schema.name)
                .await?;
            staging_tables.push(staging.clone());

            let remote_path = format!(
                "{}/{}",
                self.config.storage.bucket,
                writer.remote_prefix_for(&schema.name)
            );
            self.copy_from_object_store(&staging, &remote_path, copy_options)
                .await?;

            match self
                .merge_staged_table(validator, strategy, &staging, schema)
                .await
            {
                Ok(()) => {
                    info!(table = %schema.name, rows = count, "merged staged rows");
                },
                Err(err @ EtlError::Validation { .. }) => {
                    warn!(table = %schema.name, error = %err, "staged data failed validation, skipping merge");
                    first_validation_failure.get_or_insert(err);
                },
                Err(err) => return Err(err),
            }
        }

        match first_validation_failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn merge_staged_table(
        &mut self,
        validator: Option<&dyn StagingValidator>,
        strategy: MergeStrategy,
        staging_table: &str,
        schema: &TableSchema,
    ) -> Result<()> {
        if let Some(validator) = validator {
            validator
                .validate(&schema.name, staging_table, schema)
                .await
                .map_err(|source| EtlError::Validation {
                    table: schema.name.clone(),
                    source,
                })?;
        }

        let destination = schema.qualified_name();
        let where_join = primary_key_join(schema, &destination, staging_table);
        let sql = strategy.build_sql(staging_table, &destination, &where_join);
        self.execute(&sql).await?;
        Ok(())
    }
}

/// `<final_table><random hex>`: unique per invocation, trivially traceable
/// back to its destination.
fn staging_table_name(final_table: &str) -> String {
    format!("{}{}", final_table, tmpfile::random_hex(10))
}

fn backoff_for(attempt: u32) -> Duration {
    Duration::from_secs(2u64.pow(attempt.min(16)))
}

/// Does a copy failure advertise diagnostic rows in the load-error table?
fn mentions_load_errors(message: &str) -> bool {
    message.contains(LOAD_ERROR_MARKER)
}

/// Disconnect-class errors are worth a reconnect; everything else is not.
fn is_disconnect(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Io(_) => true,
        // SQLSTATE class 08: connection exceptions
        sqlx::Error::Database(db) => db.code().is_some_and(|code| code.starts_with("08")),
        _ => false,
    }
}
