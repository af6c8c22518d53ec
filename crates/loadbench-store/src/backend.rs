//! Destination store trait definition.

use serde_json::{Map, Value};

use crate::error;
use crate::schema::ColumnDef;

/// One normalized record: flat column name to JSON value.
pub type Row = Map<String, Value>;

/// A completed load, recorded alongside the swapped tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadRecord {
    pub load_id: String,
    pub pipeline: String,
    pub dataset: String,
    pub row_count: u64,
}

/// A table taking part in a replace commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplaceTable {
    pub name: String,
    /// `false` when the resource produced no rows: the target is dropped
    /// and nothing is swapped in.
    pub staged: bool,
}

/// Storage contract for replace-on-load destinations.
///
/// Implementations must be `Send + Sync` for use behind `Arc<dyn DestinationStore>`.
pub trait DestinationStore: Send + Sync {
    /// Human-readable destination description (e.g. `sqlite:/tmp/x.sqlite`).
    fn describe(&self) -> String;

    /// Drop any leftover staging table for `(dataset, table)` and create a
    /// fresh one with `columns`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`](crate::StoreError) on storage failure.
    fn prepare_staging(&self, dataset: &str, table: &str, columns: &[ColumnDef])
        -> error::Result<()>;

    /// Append rows to the staging table of `(dataset, table)`. Returns the
    /// number of rows inserted.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`](crate::StoreError) on storage failure.
    fn insert_rows(
        &self,
        dataset: &str,
        table: &str,
        columns: &[ColumnDef],
        rows: &[Row],
    ) -> error::Result<u64>;

    /// Atomically replace every target table with its staging table and
    /// record the load.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`](crate::StoreError) on storage failure; nothing
    /// is committed in that case.
    fn commit_replace(&self, load: &LoadRecord, tables: &[ReplaceTable]) -> error::Result<()>;

    /// Drop staging tables left by an aborted load.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`](crate::StoreError) on storage failure.
    fn discard_staging(&self, dataset: &str, tables: &[String]) -> error::Result<()>;

    /// Row count of a committed table, `None` if the table does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`](crate::StoreError) on storage failure.
    fn table_row_count(&self, dataset: &str, table: &str) -> error::Result<Option<u64>>;

    /// Names of every physical table, metadata tables included.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`](crate::StoreError) on storage failure.
    fn list_tables(&self) -> error::Result<Vec<String>>;
}
