//! Load stage: copy normalized files into staging tables, then swap every
//! table of the run into place in one destination transaction.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use loadbench_store::{ColumnDef, DestinationStore, LoadRecord, ReplaceTable, Row};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use super::normalize::NormalizedTable;
use super::{acquire_worker, collect_tasks, StageSettings, TableLoad};
use crate::error::{PipelineError, Stage};

/// Rows per insert transaction.
const INSERT_CHUNK_ROWS: usize = 1_000;

/// Identity of the load being committed.
pub(crate) struct LoadTarget<'a> {
    pub pipeline: &'a str,
    pub dataset: &'a str,
    pub load_id: &'a str,
}

/// Load `tables` and commit them together. On any failure the staging
/// tables are dropped and the committed tables stay as they were.
pub(crate) async fn run_load(
    store: Arc<dyn DestinationStore>,
    target: &LoadTarget<'_>,
    tables: Vec<NormalizedTable>,
    settings: &StageSettings,
) -> Result<Vec<TableLoad>, PipelineError> {
    let staged: Vec<String> = tables
        .iter()
        .filter(|t| !t.columns.is_empty())
        .map(|t| t.table.clone())
        .collect();

    match load_and_commit(Arc::clone(&store), target, tables, settings).await {
        Ok(loaded) => Ok(loaded),
        Err(error) => {
            discard_staging(store, target.dataset, staged).await;
            Err(error)
        }
    }
}

async fn load_and_commit(
    store: Arc<dyn DestinationStore>,
    target: &LoadTarget<'_>,
    tables: Vec<NormalizedTable>,
    settings: &StageSettings,
) -> Result<Vec<TableLoad>, PipelineError> {
    let dataset = target.dataset.to_string();

    let prepare: Vec<(String, Vec<ColumnDef>)> = tables
        .iter()
        .filter(|t| !t.columns.is_empty())
        .map(|t| (t.table.clone(), t.columns.clone()))
        .collect();
    let prepare_dataset = dataset.clone();
    blocking(Arc::clone(&store), move |store| {
        for (table, columns) in &prepare {
            store.prepare_staging(&prepare_dataset, table, columns)?;
        }
        Ok(())
    })
    .await?;

    let row_counts = load_files(Arc::clone(&store), &dataset, &tables, settings).await?;

    let loaded: Vec<TableLoad> = tables
        .iter()
        .zip(&row_counts)
        .map(|(table, rows)| TableLoad {
            table: table.table.clone(),
            rows: *rows,
            files: table.files.len(),
        })
        .collect();
    for (table, rows) in tables.iter().zip(&row_counts) {
        if table.rows != *rows {
            return Err(PipelineError::stage(
                Stage::Load,
                anyhow::anyhow!(
                    "table '{}': normalized {} rows but loaded {}",
                    table.table,
                    table.rows,
                    rows
                ),
            ));
        }
    }

    let record = LoadRecord {
        load_id: target.load_id.to_string(),
        pipeline: target.pipeline.to_string(),
        dataset,
        row_count: row_counts.iter().sum(),
    };
    let replace: Vec<ReplaceTable> = tables
        .iter()
        .map(|t| ReplaceTable {
            name: t.table.clone(),
            staged: !t.columns.is_empty(),
        })
        .collect();
    blocking(store, move |store| {
        store.commit_replace(&record, &replace)?;
        Ok(())
    })
    .await?;

    Ok(loaded)
}

/// Insert every file, at most `load_workers` at a time. Returns the row
/// count per table, in `tables` order.
async fn load_files(
    store: Arc<dyn DestinationStore>,
    dataset: &str,
    tables: &[NormalizedTable],
    settings: &StageSettings,
) -> Result<Vec<u64>, PipelineError> {
    let workers = Arc::new(Semaphore::new(settings.load_workers));
    let mut join_set: JoinSet<Result<(usize, u64), PipelineError>> = JoinSet::new();

    for (index, table) in tables.iter().enumerate() {
        let columns = Arc::new(table.columns.clone());
        for path in &table.files {
            let workers = Arc::clone(&workers);
            let store = Arc::clone(&store);
            let dataset = dataset.to_string();
            let name = table.table.clone();
            let columns = Arc::clone(&columns);
            let path = path.clone();
            join_set.spawn(async move {
                let _permit = acquire_worker(&workers).await?;
                let rows = blocking(store, move |store| {
                    load_file(store, &dataset, &name, &columns, path)
                })
                .await?;
                Ok((index, rows))
            });
        }
    }

    let mut counts = vec![0u64; tables.len()];
    for (index, rows) in collect_tasks(join_set).await? {
        counts[index] += rows;
    }
    Ok(counts)
}

fn load_file(
    store: &dyn DestinationStore,
    dataset: &str,
    table: &str,
    columns: &[ColumnDef],
    path: PathBuf,
) -> anyhow::Result<u64> {
    let file = File::open(&path)
        .with_context(|| format!("Failed to open load file {}", path.display()))?;
    let mut chunk: Vec<Row> = Vec::with_capacity(INSERT_CHUNK_ROWS);
    let mut inserted = 0u64;

    for line in BufReader::new(file).lines() {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        let row: Row = serde_json::from_str(&line)
            .with_context(|| format!("Malformed row in {}", path.display()))?;
        chunk.push(row);
        if chunk.len() >= INSERT_CHUNK_ROWS {
            inserted += store.insert_rows(dataset, table, columns, &chunk)?;
            chunk.clear();
        }
    }
    if !chunk.is_empty() {
        inserted += store.insert_rows(dataset, table, columns, &chunk)?;
    }

    tracing::debug!(table, file = %path.display(), rows = inserted, "loaded file");
    Ok(inserted)
}

/// Run a destination call off the async runtime, mapping failures to the
/// load stage.
async fn blocking<T, F>(store: Arc<dyn DestinationStore>, f: F) -> Result<T, PipelineError>
where
    T: Send + 'static,
    F: FnOnce(&dyn DestinationStore) -> anyhow::Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(move || f(store.as_ref()))
        .await
        .map_err(|e| PipelineError::Infrastructure(anyhow::anyhow!("load task panicked: {e}")))?
        .map_err(|e| PipelineError::stage(Stage::Load, e))
}

async fn discard_staging(store: Arc<dyn DestinationStore>, dataset: &str, tables: Vec<String>) {
    if tables.is_empty() {
        return;
    }
    let dataset = dataset.to_string();
    let result = blocking(store, move |store| {
        store.discard_staging(&dataset, &tables)?;
        Ok(())
    })
    .await;
    if let Err(e) = result {
        tracing::warn!("Failed to discard staging tables: {}", e);
    }
}
