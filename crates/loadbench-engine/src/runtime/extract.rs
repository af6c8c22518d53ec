//! Extract stage: drain each resource reader, flushing full record buffers
//! to the normalize stage as they fill.

use std::sync::Arc;

use loadbench_store::schema::normalize_identifier;
use serde_json::Value;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;

use super::normalize::NormalizeInput;
use super::{acquire_worker, collect_tasks, StageSettings};
use crate::error::PipelineError;
use crate::pipeline::Source;
use crate::resource::{LoadUnit, ResourceReader};

/// One flushed buffer of records.
pub(crate) type Batch = Vec<Value>;

/// Flushed buffers a resource may have queued ahead of its normalizer.
const BATCH_CHANNEL_CAPACITY: usize = 2;

/// Counters for one extracted resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ExtractSummary {
    pub table: String,
    pub units: u64,
    pub records: u64,
    pub batches: u64,
}

/// One bounded batch channel per resource of `source`, in resource order.
pub(crate) fn batch_channels(source: &Source) -> (Vec<mpsc::Sender<Batch>>, Vec<NormalizeInput>) {
    source
        .resources()
        .iter()
        .map(|resource| {
            let (tx, rx) = mpsc::channel::<Batch>(BATCH_CHANNEL_CAPACITY);
            let input = NormalizeInput {
                table: normalize_identifier(resource.name()),
                batches: rx,
            };
            (tx, input)
        })
        .unzip()
}

/// Extract every resource of `source`, at most `extract_workers` at a time,
/// sending each full buffer to the matching sink. Results keep the source's
/// resource order.
pub(crate) async fn run_extract(
    source: &Source,
    settings: &StageSettings,
    sinks: Vec<mpsc::Sender<Batch>>,
) -> Result<Vec<ExtractSummary>, PipelineError> {
    if sinks.len() != source.resources().len() {
        return Err(PipelineError::Infrastructure(anyhow::anyhow!(
            "{} batch sinks for {} resources",
            sinks.len(),
            source.resources().len()
        )));
    }

    let workers = Arc::new(Semaphore::new(settings.extract_workers));
    let buffer_max_items = settings.buffer_max_items;
    let mut join_set: JoinSet<Result<(usize, ExtractSummary), PipelineError>> =
        JoinSet::new();

    for (index, (resource, sink)) in source.resources().iter().zip(sinks).enumerate() {
        let reader = resource.reader();
        let workers = Arc::clone(&workers);
        join_set.spawn(async move {
            let _permit = acquire_worker(&workers).await?;
            let summary = extract_resource(reader, buffer_max_items, sink).await?;
            Ok((index, summary))
        });
    }

    let mut extracted = collect_tasks(join_set).await?;
    extracted.sort_by_key(|(index, _)| *index);
    Ok(extracted.into_iter().map(|(_, summary)| summary).collect())
}

async fn extract_resource(
    mut reader: ResourceReader,
    buffer_max_items: usize,
    sink: mpsc::Sender<Batch>,
) -> Result<ExtractSummary, PipelineError> {
    let table = normalize_identifier(reader.name());
    let mut buffer: Batch = Vec::new();
    let mut units = 0u64;
    let mut records = 0u64;
    let mut batches = 0u64;

    while let Some(unit) = reader.next_unit().await? {
        units += 1;
        records += unit.len() as u64;
        match unit {
            LoadUnit::Item(record) => buffer.push(record),
            LoadUnit::Page(page) => buffer.extend(page),
        }
        if buffer.len() >= buffer_max_items {
            if sink.send(std::mem::take(&mut buffer)).await.is_err() {
                // The normalizer is gone and reports its own failure.
                tracing::debug!(resource = reader.name(), "normalize stage closed");
                break;
            }
            batches += 1;
        }
    }
    if !buffer.is_empty() && sink.send(buffer).await.is_ok() {
        batches += 1;
    }

    tracing::info!(
        resource = reader.name(),
        pages = reader.pages_fetched(),
        units,
        records,
        batches,
        "extracted resource"
    );
    Ok(ExtractSummary {
        table,
        units,
        records,
        batches,
    })
}
