//! Pipeline runtime: the collaborator that actually extracts, normalizes
//! and loads a plan.
//!
//! The harness only depends on [`PipelineRuntime`]. [`LocalRuntime`] is the
//! in-process implementation: extract and normalize run together, linked by
//! bounded batch channels, and load starts once both are done. Each stage
//! has its own bounded worker pool.

mod extract;
mod load;
mod local;
mod normalize;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;

use crate::error::PipelineError;
use crate::pipeline::{PipelinePlan, RunConfig};

pub use local::LocalRuntime;

pub const DEFAULT_EXTRACT_WORKERS: usize = 5;
pub const DEFAULT_NORMALIZE_WORKERS: usize = 1;
pub const DEFAULT_LOAD_WORKERS: usize = 20;
pub const DEFAULT_BUFFER_MAX_ITEMS: usize = 5_000;

const BYTES_PER_MB: u64 = 1024 * 1024;

/// Executes a plan to completion.
#[async_trait]
pub trait PipelineRuntime: Send + Sync {
    /// Run every stage of `plan`. Any stage failure fails the whole run and
    /// leaves the destination's committed tables untouched.
    async fn run(&self, plan: &PipelinePlan) -> Result<LoadInfo, PipelineError>;
}

/// Rows loaded into one destination table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableLoad {
    pub table: String,
    pub rows: u64,
    pub files: usize,
}

/// Summary of a completed load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadInfo {
    pub pipeline_name: String,
    pub dataset_name: String,
    pub destination: String,
    pub load_id: String,
    /// Units handed from extraction downstream (records or pages).
    pub units_extracted: u64,
    pub tables: Vec<TableLoad>,
}

impl LoadInfo {
    #[must_use]
    pub fn total_rows(&self) -> u64 {
        self.tables.iter().map(|t| t.rows).sum()
    }
}

impl fmt::Display for LoadInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Pipeline {} load {} completed: {} rows into dataset {} at {}",
            self.pipeline_name,
            self.load_id,
            self.total_rows(),
            self.dataset_name,
            self.destination
        )?;
        for table in &self.tables {
            writeln!(
                f,
                "  {:<20} {:>8} rows  ({} file(s))",
                table.table, table.rows, table.files
            )?;
        }
        Ok(())
    }
}

/// Stage tunables with runtime defaults filled in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageSettings {
    pub extract_workers: usize,
    pub normalize_workers: usize,
    pub load_workers: usize,
    pub buffer_max_items: usize,
    pub file_rotation_bytes: Option<u64>,
}

fn as_count(value: Option<u32>, default: usize) -> usize {
    value
        .map_or(default, |v| usize::try_from(v).unwrap_or(usize::MAX))
        .max(1)
}

impl StageSettings {
    #[must_use]
    pub fn resolve(run: &RunConfig) -> Self {
        Self {
            extract_workers: as_count(run.workers.extract, DEFAULT_EXTRACT_WORKERS),
            normalize_workers: as_count(run.workers.normalize, DEFAULT_NORMALIZE_WORKERS),
            load_workers: as_count(run.workers.load, DEFAULT_LOAD_WORKERS),
            buffer_max_items: as_count(run.buffer_max_items, DEFAULT_BUFFER_MAX_ITEMS),
            file_rotation_bytes: run
                .file_rotation_size_mb
                .map(|mb| u64::from(mb).saturating_mul(BYTES_PER_MB)),
        }
    }
}

/// Wait for a worker slot.
pub(crate) async fn acquire_worker(
    semaphore: &Arc<Semaphore>,
) -> Result<OwnedSemaphorePermit, PipelineError> {
    Arc::clone(semaphore)
        .acquire_owned()
        .await
        .map_err(|e| PipelineError::Infrastructure(anyhow::anyhow!("worker pool closed: {e}")))
}

/// Drain a set of stage tasks. The first failure cancels the remaining
/// tasks and is returned; successes are discarded in that case.
pub(crate) async fn collect_tasks<T: Send + 'static>(
    mut join_set: JoinSet<Result<T, PipelineError>>,
) -> Result<Vec<T>, PipelineError> {
    let mut successes = Vec::new();
    let mut first_error: Option<PipelineError> = None;

    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok(Ok(value)) if first_error.is_none() => successes.push(value),
            Ok(Ok(_)) => {}
            Ok(Err(error)) => {
                tracing::error!("Task failed: {}", error);
                if first_error.is_none() {
                    first_error = Some(error);
                    join_set.abort_all();
                }
            }
            Err(join_err) if join_err.is_cancelled() && first_error.is_some() => {
                // Expected: sibling tasks cancelled after the first failure.
            }
            Err(join_err) => {
                return Err(PipelineError::Infrastructure(anyhow::anyhow!(
                    "Stage task panicked: {join_err}"
                )));
            }
        }
    }

    match first_error {
        Some(error) => Err(error),
        None => Ok(successes),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::{Granularity, StageWorkers};
    use std::time::{Duration, Instant};

    fn run_config(workers: StageWorkers, buffer: Option<u32>, rotation: Option<u32>) -> RunConfig {
        RunConfig {
            granularity: Granularity::Page,
            workers,
            buffer_max_items: buffer,
            file_rotation_size_mb: rotation,
            dataset_name: "ds".into(),
        }
    }

    #[test]
    fn absent_settings_use_runtime_defaults() {
        let settings = StageSettings::resolve(&run_config(StageWorkers::default(), None, None));
        assert_eq!(settings.extract_workers, DEFAULT_EXTRACT_WORKERS);
        assert_eq!(settings.normalize_workers, DEFAULT_NORMALIZE_WORKERS);
        assert_eq!(settings.load_workers, DEFAULT_LOAD_WORKERS);
        assert_eq!(settings.buffer_max_items, DEFAULT_BUFFER_MAX_ITEMS);
        assert_eq!(settings.file_rotation_bytes, None);
    }

    #[test]
    fn explicit_settings_override_defaults() {
        let workers = StageWorkers {
            extract: Some(2),
            normalize: Some(3),
            load: Some(4),
        };
        let settings = StageSettings::resolve(&run_config(workers, Some(10_000), Some(100)));
        assert_eq!(settings.extract_workers, 2);
        assert_eq!(settings.normalize_workers, 3);
        assert_eq!(settings.load_workers, 4);
        assert_eq!(settings.buffer_max_items, 10_000);
        assert_eq!(settings.file_rotation_bytes, Some(100 * 1024 * 1024));
    }

    #[tokio::test]
    async fn collect_tasks_fails_fast_and_cancels_siblings() {
        let mut join_set: JoinSet<Result<u32, PipelineError>> = JoinSet::new();
        join_set.spawn(async {
            tokio::time::sleep(Duration::from_millis(250)).await;
            Ok(1)
        });
        join_set.spawn(async {
            tokio::time::sleep(Duration::from_millis(25)).await;
            Err(PipelineError::Infrastructure(anyhow::anyhow!(
                "expected failure"
            )))
        });

        let start = Instant::now();
        let err = collect_tasks(join_set).await.unwrap_err();
        assert!(err.to_string().contains("expected failure"));
        assert!(start.elapsed() < Duration::from_millis(200));
    }

    #[tokio::test]
    async fn collect_tasks_returns_all_successes() {
        let mut join_set: JoinSet<Result<u32, PipelineError>> = JoinSet::new();
        for i in 0..4 {
            join_set.spawn(async move { Ok(i) });
        }
        let mut values = collect_tasks(join_set).await.unwrap();
        values.sort_unstable();
        assert_eq!(values, vec![0, 1, 2, 3]);
    }

    #[test]
    fn load_info_display_lists_tables() {
        let info = LoadInfo {
            pipeline_name: "jaffle_shop".into(),
            dataset_name: "jaffle_shop_data".into(),
            destination: "sqlite:/tmp/x.sqlite".into(),
            load_id: "20240101000000000000".into(),
            units_extracted: 3,
            tables: vec![
                TableLoad {
                    table: "customers".into(),
                    rows: 100,
                    files: 1,
                },
                TableLoad {
                    table: "orders".into(),
                    rows: 250,
                    files: 2,
                },
            ],
        };
        assert_eq!(info.total_rows(), 350);
        let text = info.to_string();
        assert!(text.contains("350 rows into dataset jaffle_shop_data"));
        assert!(text.contains("orders"));
    }
}
