//! Normalize stage: flatten records, infer table schemas and write
//! newline-delimited JSON load files.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use loadbench_store::schema::{normalize_identifier, NAMESPACE_SEPARATOR};
use loadbench_store::{ColumnDef, ColumnType, Row};
use serde_json::{Map, Value};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;

use super::extract::Batch;
use super::{acquire_worker, collect_tasks, StageSettings};
use crate::error::{PipelineError, Stage};

/// Column that holds records which are not JSON objects.
const SCALAR_COLUMN: &str = "value";

/// Output of normalizing one resource.
#[derive(Debug)]
pub(crate) struct NormalizedTable {
    pub table: String,
    pub columns: Vec<ColumnDef>,
    pub files: Vec<PathBuf>,
    pub rows: u64,
}

/// Flatten nested objects into `parent__child` columns. Arrays stay as
/// values and are stored as JSON text.
///
/// # Errors
///
/// Fails when two fields of the record map to the same column, e.g. `ID`
/// and `id`, or `a__b` and `{"a": {"b": ..}}`.
pub(crate) fn flatten_record(record: Value) -> anyhow::Result<Row> {
    let mut row = Row::new();
    match record {
        Value::Object(map) => flatten_into(&mut row, None, map)?,
        other => {
            row.insert(SCALAR_COLUMN.to_string(), other);
        }
    }
    Ok(row)
}

fn flatten_into(
    row: &mut Row,
    prefix: Option<&str>,
    map: Map<String, Value>,
) -> anyhow::Result<()> {
    for (key, value) in map {
        let name = normalize_identifier(&key);
        let column = match prefix {
            Some(prefix) => format!("{prefix}{NAMESPACE_SEPARATOR}{name}"),
            None => name,
        };
        match value {
            Value::Object(nested) if !nested.is_empty() => {
                flatten_into(row, Some(&column), nested)?;
            }
            other => {
                if row.contains_key(&column) {
                    bail!("field '{key}' collides with another field on column '{column}'");
                }
                row.insert(column, other);
            }
        }
    }
    Ok(())
}

/// Column order and widened types observed across a table's rows.
#[derive(Debug, Default)]
pub(crate) struct TableSchema {
    columns: Vec<(String, Option<ColumnType>)>,
    index: HashMap<String, usize>,
}

impl TableSchema {
    pub fn observe(&mut self, row: &Row) {
        for (name, value) in row {
            let observed = ColumnType::of(value);
            if let Some(&i) = self.index.get(name) {
                let slot = &mut self.columns[i].1;
                *slot = match (*slot, observed) {
                    (Some(current), Some(seen)) => Some(current.merge(seen)),
                    (current, seen) => current.or(seen),
                };
            } else {
                self.index.insert(name.clone(), self.columns.len());
                self.columns.push((name.clone(), observed));
            }
        }
    }

    /// Columns that only ever held `null` become text.
    pub fn into_columns(self) -> Vec<ColumnDef> {
        self.columns
            .into_iter()
            .map(|(name, data_type)| ColumnDef::new(name, data_type.unwrap_or(ColumnType::Text)))
            .collect()
    }
}

/// Writes JSONL rows, starting a new file once the current one reaches
/// `max_bytes`.
pub(crate) struct RotatingWriter {
    dir: PathBuf,
    stem: String,
    max_bytes: Option<u64>,
    current: Option<BufWriter<File>>,
    current_bytes: u64,
    files: Vec<PathBuf>,
}

impl RotatingWriter {
    pub fn new(dir: &Path, stem: &str, max_bytes: Option<u64>) -> Self {
        Self {
            dir: dir.to_path_buf(),
            stem: stem.to_string(),
            max_bytes,
            current: None,
            current_bytes: 0,
            files: Vec::new(),
        }
    }

    pub fn write_row(&mut self, row: &Row) -> anyhow::Result<()> {
        if self.current.is_none() {
            self.open_next()?;
        }
        let Some(writer) = self.current.as_mut() else {
            bail!("load file for '{}' is not open", self.stem);
        };

        let mut line = serde_json::to_vec(row)?;
        line.push(b'\n');
        writer.write_all(&line)?;
        self.current_bytes += line.len() as u64;

        if let Some(max_bytes) = self.max_bytes {
            if self.current_bytes >= max_bytes {
                tracing::debug!(
                    table = self.stem,
                    bytes = self.current_bytes,
                    "rotating load file"
                );
                self.close_current()?;
            }
        }
        Ok(())
    }

    /// Push buffered rows of the open file to disk.
    pub fn flush(&mut self) -> anyhow::Result<()> {
        if let Some(writer) = self.current.as_mut() {
            writer.flush()?;
        }
        Ok(())
    }

    /// Flush the open file and return every file written, in order.
    pub fn finish(mut self) -> anyhow::Result<Vec<PathBuf>> {
        self.close_current()?;
        Ok(self.files)
    }

    fn open_next(&mut self) -> anyhow::Result<()> {
        let path = self
            .dir
            .join(format!("{}.{:04}.jsonl", self.stem, self.files.len()));
        let file = File::create(&path)
            .with_context(|| format!("Failed to create load file {}", path.display()))?;
        self.files.push(path);
        self.current = Some(BufWriter::new(file));
        self.current_bytes = 0;
        Ok(())
    }

    fn close_current(&mut self) -> anyhow::Result<()> {
        if let Some(mut writer) = self.current.take() {
            writer.flush()?;
        }
        Ok(())
    }
}

/// Receiving end of one resource's batch channel.
#[derive(Debug)]
pub(crate) struct NormalizeInput {
    pub table: String,
    pub batches: mpsc::Receiver<Batch>,
}

/// Schema, writer and row count of a table being normalized.
struct TableWriter {
    table: String,
    schema: TableSchema,
    writer: RotatingWriter,
    rows: u64,
}

impl TableWriter {
    fn new(dir: &Path, table: String, max_bytes: Option<u64>) -> Self {
        let writer = RotatingWriter::new(dir, &table, max_bytes);
        Self {
            table,
            schema: TableSchema::default(),
            writer,
            rows: 0,
        }
    }

    /// Write one flushed buffer and push it to disk.
    fn write_batch(&mut self, batch: Batch) -> anyhow::Result<()> {
        for record in batch {
            let row = flatten_record(record)
                .with_context(|| format!("table '{}' row {}", self.table, self.rows))?;
            self.schema.observe(&row);
            self.writer.write_row(&row)?;
            self.rows += 1;
        }
        self.writer.flush()
    }

    fn finish(self) -> anyhow::Result<NormalizedTable> {
        let files = self.writer.finish()?;
        let columns = self.schema.into_columns();
        tracing::info!(
            table = self.table,
            rows = self.rows,
            columns = columns.len(),
            files = files.len(),
            "normalized resource"
        );
        Ok(NormalizedTable {
            table: self.table,
            columns,
            files,
            rows: self.rows,
        })
    }
}

/// Run a file-writing step off the async runtime, mapping failures to the
/// normalize stage.
async fn blocking<T, F>(f: F) -> Result<T, PipelineError>
where
    T: Send + 'static,
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| {
            PipelineError::Infrastructure(anyhow::anyhow!("normalize task panicked: {e}"))
        })?
        .map_err(|e| PipelineError::stage(Stage::Normalize, e))
}

/// Write batches as they arrive until the extractor closes the channel.
/// A worker slot is held only while a batch is being written.
async fn normalize_stream(
    input: NormalizeInput,
    dir: PathBuf,
    max_bytes: Option<u64>,
    workers: Arc<Semaphore>,
) -> Result<NormalizedTable, PipelineError> {
    let NormalizeInput { table, mut batches } = input;
    let mut writer = TableWriter::new(&dir, table, max_bytes);

    while let Some(batch) = batches.recv().await {
        let _permit = acquire_worker(&workers).await?;
        writer = blocking(move || {
            writer.write_batch(batch)?;
            Ok(writer)
        })
        .await?;
    }

    blocking(move || writer.finish()).await
}

/// Normalize every resource's batch stream into `dir`, writing at most
/// `normalize_workers` batches at a time. Results keep the input order.
pub(crate) async fn run_normalize(
    inputs: Vec<NormalizeInput>,
    dir: &Path,
    settings: &StageSettings,
) -> Result<Vec<NormalizedTable>, PipelineError> {
    let workers = Arc::new(Semaphore::new(settings.normalize_workers));
    let max_bytes = settings.file_rotation_bytes;
    let mut join_set: JoinSet<Result<(usize, NormalizedTable), PipelineError>> =
        JoinSet::new();

    for (index, input) in inputs.into_iter().enumerate() {
        let workers = Arc::clone(&workers);
        let dir = dir.to_path_buf();
        join_set.spawn(async move {
            let table = normalize_stream(input, dir, max_bytes, workers).await?;
            Ok((index, table))
        });
    }

    let mut tables = collect_tasks(join_set).await?;
    tables.sort_by_key(|(index, _)| *index);
    Ok(tables.into_iter().map(|(_, table)| table).collect())
}
