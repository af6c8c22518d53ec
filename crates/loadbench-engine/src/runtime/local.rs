//! In-process pipeline runtime backed by a SQLite destination.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use loadbench_store::{DestinationStore, SqliteDestination};
use tempfile::TempDir;

use super::extract::{self, ExtractSummary};
use super::load::{run_load, LoadTarget};
use super::normalize::{self, NormalizedTable};
use super::{LoadInfo, PipelineRuntime, StageSettings};
use crate::error::{PipelineError, Stage};
use crate::pipeline::PipelinePlan;

/// Runs a plan inside this process. Normalize consumes extracted buffers as
/// they are flushed; the destination is only opened once both stages have
/// succeeded.
///
/// Intermediate load files live in a temporary directory (under `work_dir`
/// when set) that is removed when the run ends, successful or not.
#[derive(Debug, Clone, Default)]
pub struct LocalRuntime {
    work_dir: Option<PathBuf>,
}

impl LocalRuntime {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Place intermediate files under `dir` instead of the system temp dir.
    #[must_use]
    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = Some(dir.into());
        self
    }

    fn scratch_dir(&self) -> Result<TempDir, PipelineError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("loadbench-");
        let dir = match &self.work_dir {
            Some(parent) => {
                std::fs::create_dir_all(parent).map_err(|e| {
                    PipelineError::Infrastructure(anyhow::anyhow!(
                        "Failed to create work dir {}: {e}",
                        parent.display()
                    ))
                })?;
                builder.tempdir_in(parent)
            }
            None => builder.tempdir(),
        };
        dir.map_err(|e| {
            PipelineError::Infrastructure(anyhow::anyhow!("Failed to create scratch dir: {e}"))
        })
    }
}

fn new_load_id() -> String {
    Utc::now().format("%Y%m%d%H%M%S%6f").to_string()
}

async fn open_destination(path: &Path) -> Result<Arc<dyn DestinationStore>, PipelineError> {
    let path = path.to_path_buf();
    let store = tokio::task::spawn_blocking(move || SqliteDestination::open(&path))
        .await
        .map_err(|e| PipelineError::Infrastructure(anyhow::anyhow!("open task panicked: {e}")))?
        .map_err(|e| PipelineError::stage(Stage::Load, e))?;
    Ok(Arc::new(store))
}

/// Every extracted record must have become exactly one normalized row.
fn check_normalized_rows(
    extracted: &[ExtractSummary],
    normalized: &[NormalizedTable],
) -> Result<(), PipelineError> {
    for (summary, table) in extracted.iter().zip(normalized) {
        if summary.records != table.rows {
            return Err(PipelineError::stage(
                Stage::Normalize,
                anyhow::anyhow!(
                    "table '{}': extracted {} records but normalized {} rows",
                    summary.table,
                    summary.records,
                    table.rows
                ),
            ));
        }
    }
    Ok(())
}

#[async_trait]
impl PipelineRuntime for LocalRuntime {
    async fn run(&self, plan: &PipelinePlan) -> Result<LoadInfo, PipelineError> {
        let settings = StageSettings::resolve(plan.run_config());
        let load_id = new_load_id();
        tracing::info!(
            pipeline = plan.pipeline_name(),
            dataset = plan.dataset_name(),
            load_id = load_id.as_str(),
            granularity = plan.run_config().granularity.as_str(),
            extract_workers = settings.extract_workers,
            normalize_workers = settings.normalize_workers,
            load_workers = settings.load_workers,
            buffer_max_items = settings.buffer_max_items,
            "Starting pipeline run"
        );

        let scratch = self.scratch_dir()?;
        let (sinks, inputs) = extract::batch_channels(plan.source());
        let (extracted, normalized) = tokio::try_join!(
            extract::run_extract(plan.source(), &settings, sinks),
            normalize::run_normalize(inputs, scratch.path(), &settings),
        )?;
        check_normalized_rows(&extracted, &normalized)?;
        tracing::debug!(
            flushes = extracted.iter().map(|r| r.batches).sum::<u64>(),
            files = normalized.iter().map(|t| t.files.len()).sum::<usize>(),
            "extract and normalize finished"
        );
        let units_extracted = extracted.iter().map(|r| r.units).sum();

        let store = open_destination(plan.destination()).await?;
        let destination = store.describe();
        let target = LoadTarget {
            pipeline: plan.pipeline_name(),
            dataset: plan.dataset_name(),
            load_id: &load_id,
        };
        let tables = run_load(store, &target, normalized, &settings).await?;

        Ok(LoadInfo {
            pipeline_name: plan.pipeline_name().to_string(),
            dataset_name: plan.dataset_name().to_string(),
            destination,
            load_id,
            units_extracted,
            tables,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::{CollectionSpec, Granularity, StageWorkers};
    use crate::pipeline::{RunConfig, Source};
    use crate::resource::tests::ScriptedSource;
    use crate::resource::{FetchError, PageNumberPaginator, PageSource, ResourceDefinition};
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicBool, Ordering};

    fn plan(
        destination: &Path,
        granularity: Granularity,
        scripted: &Arc<ScriptedSource>,
        dataset: &str,
    ) -> PipelinePlan {
        let resources = ["customers", "orders"]
            .iter()
            .map(|name| {
                ResourceDefinition::new(
                    &CollectionSpec::new(*name, *name),
                    granularity,
                    PageNumberPaginator::default(),
                    scripted.clone(),
                )
            })
            .collect();
        PipelinePlan::new(
            "shop",
            destination,
            Source::new("shop", resources),
            RunConfig {
                granularity,
                workers: StageWorkers::default(),
                buffer_max_items: None,
                file_rotation_size_mb: None,
                dataset_name: dataset.to_string(),
            },
        )
        .unwrap()
    }

    fn scripted() -> Arc<ScriptedSource> {
        Arc::new(ScriptedSource::pages(vec![
            vec![json!({"id": 1, "name": "a"}), json!({"id": 2, "name": "b"})],
            vec![json!({"id": 3, "name": "c"})],
        ]))
    }

    #[tokio::test]
    async fn item_and_page_runs_load_the_same_rows() {
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("dest.sqlite");
        let runtime = LocalRuntime::new().with_work_dir(dir.path().join("work"));

        let naive = runtime
            .run(&plan(&destination, Granularity::Item, &scripted(), "naive_1"))
            .await
            .unwrap();
        let optimized = runtime
            .run(&plan(&destination, Granularity::Page, &scripted(), "optimized_1"))
            .await
            .unwrap();

        assert_eq!(naive.total_rows(), 6);
        assert_eq!(optimized.total_rows(), 6);
        assert_eq!(naive.units_extracted, 6);
        assert_eq!(optimized.units_extracted, 4);

        let store = SqliteDestination::open(&destination).unwrap();
        assert_eq!(store.table_row_count("naive_1", "orders").unwrap(), Some(3));
        assert_eq!(store.table_row_count("optimized_1", "customers").unwrap(), Some(3));
    }

    #[tokio::test]
    async fn scratch_dir_is_removed_after_run() {
        let dir = tempfile::tempdir().unwrap();
        let work = dir.path().join("work");
        let runtime = LocalRuntime::new().with_work_dir(&work);

        runtime
            .run(&plan(&dir.path().join("dest.sqlite"), Granularity::Page, &scripted(), "ds"))
            .await
            .unwrap();

        assert_eq!(std::fs::read_dir(&work).unwrap().count(), 0);
    }

    /// Serves `pages` and, on the request past the last one, records
    /// whether any load file under `work` already holds data.
    struct WatchingSource {
        pages: Vec<Vec<Value>>,
        work: PathBuf,
        output_seen: AtomicBool,
    }

    fn any_file_with_data(dir: &Path) -> bool {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return false;
        };
        entries.flatten().any(|entry| {
            let path = entry.path();
            if path.is_dir() {
                any_file_with_data(&path)
            } else {
                entry.metadata().map(|m| m.len() > 0).unwrap_or(false)
            }
        })
    }

    #[async_trait]
    impl PageSource for WatchingSource {
        async fn fetch_page(
            &self,
            _endpoint: &str,
            _page_param: &str,
            page: u32,
        ) -> Result<Vec<Value>, FetchError> {
            let index = usize::try_from(page - 1).unwrap();
            match self.pages.get(index) {
                Some(records) => Ok(records.clone()),
                None => {
                    self.output_seen
                        .store(any_file_with_data(&self.work), Ordering::SeqCst);
                    Ok(Vec::new())
                }
            }
        }
    }

    #[tokio::test]
    async fn normalize_writes_while_extraction_is_running() {
        let dir = tempfile::tempdir().unwrap();
        let work = dir.path().join("work");
        let watching = Arc::new(WatchingSource {
            pages: (0..4)
                .map(|p| (0..3).map(|i| json!({"id": p * 3 + i})).collect())
                .collect(),
            work: work.clone(),
            output_seen: AtomicBool::new(false),
        });
        let resource = ResourceDefinition::new(
            &CollectionSpec::new("orders", "orders"),
            Granularity::Item,
            PageNumberPaginator::new(1, "page", 10).unwrap(),
            watching.clone(),
        );
        let plan = PipelinePlan::new(
            "shop",
            dir.path().join("dest.sqlite"),
            Source::new("shop", vec![resource]),
            RunConfig {
                granularity: Granularity::Item,
                workers: StageWorkers::default(),
                buffer_max_items: Some(1),
                file_rotation_size_mb: None,
                dataset_name: "streamed".to_string(),
            },
        )
        .unwrap();

        let info = LocalRuntime::new()
            .with_work_dir(&work)
            .run(&plan)
            .await
            .unwrap();

        assert_eq!(info.total_rows(), 12);
        assert!(watching.output_seen.load(Ordering::SeqCst));
    }

    #[test]
    fn mismatched_row_counts_fail_the_normalize_stage() {
        let extracted = [ExtractSummary {
            table: "orders".into(),
            units: 1,
            records: 3,
            batches: 1,
        }];
        let normalized = [NormalizedTable {
            table: "orders".into(),
            columns: Vec::new(),
            files: Vec::new(),
            rows: 2,
        }];
        let err = check_normalized_rows(&extracted, &normalized).unwrap_err();
        assert_eq!(err.failed_stage(), Some(Stage::Normalize));
    }

    #[test]
    fn load_ids_are_timestamps() {
        let id = new_load_id();
        assert_eq!(id.len(), 20);
        assert!(id.chars().all(|c| c.is_ascii_digit()));
    }
}
