//! Merge strategies: how staged rows enter their destination table

use crate::error::EtlError;
use crate::schema::TableSchema;

/// Policy for moving rows from a staging table into the destination.
///
/// Both strategies run inside a single transaction, so a destination table
/// is never observed half-updated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStrategy {
    /// Pure insert: destination keeps everything it had.
    Append,
    /// Replace-on-key: delete destination rows whose primary key matches a
    /// staged row, then insert all staged rows. Implements upsert semantics
    /// without native MERGE support.
    Upsert,
}

impl MergeStrategy {
    /// Build the merge transaction for one destination table.
    ///
    /// `where_join` must equate every primary-key column between the
    /// destination and staging tables (see [`primary_key_join`]); it is
    /// only consulted by `Upsert`.
    pub fn build_sql(&self, staging: &str, destination: &str, where_join: &str) -> String {
        match self {
            MergeStrategy::Append => format!(
                "begin transaction;\n  insert into {destination} select * from {staging};\nend transaction;"
            ),
            MergeStrategy::Upsert => format!(
                "begin transaction;\n  delete from {destination} using {staging} {where_join};\n  insert into {destination} select * from {staging};\nend transaction;"
            ),
        }
    }
}

impl std::str::FromStr for MergeStrategy {
    type Err = EtlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "append" => Ok(MergeStrategy::Append),
            "upsert" => Ok(MergeStrategy::Upsert),
            other => Err(EtlError::UnknownMergeStrategy(other.to_string())),
        }
    }
}

impl std::fmt::Display for MergeStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MergeStrategy::Append => write!(f, "append"),
            MergeStrategy::Upsert => write!(f, "upsert"),
        }
    }
}

/// Join clause equating every primary-key column of the destination with
/// the staging table.
pub fn primary_key_join(schema: &TableSchema, destination: &str, staging: &str) -> String {
    let mut clause = String::new();
    for pk in &schema.primary_key {
        if clause.is_empty() {
            clause = format!("where {destination}.{pk} = {staging}.{pk}");
        } else {
            clause = format!("{clause} and {destination}.{pk} = {staging}.{pk}");
        }
    }
    clause
}
