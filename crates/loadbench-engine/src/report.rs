//! Naive-versus-optimized comparison and its console summary.

use std::fmt::Write as _;

use serde_json::json;

use crate::config::types::Granularity;
use crate::error::PipelineError;
use crate::orchestrator::run_timed;
use crate::pipeline::PipelinePlan;
use crate::result::RunResult;
use crate::runtime::PipelineRuntime;

/// Printed in place of a percentage the comparison cannot compute.
pub const UNDEFINED: &str = "undefined (N/A)";

const BANNER: &str = "═══════════════════════════════════════════════";

/// `(naive - optimized) / naive * 100`, or `None` when the baseline is not a
/// positive, finite duration.
#[must_use]
pub fn improvement_pct(naive_secs: f64, optimized_secs: f64) -> Option<f64> {
    if !naive_secs.is_finite() || !optimized_secs.is_finite() || naive_secs <= 0.0 {
        return None;
    }
    Some((naive_secs - optimized_secs) / naive_secs * 100.0)
}

/// Two decimals, or [`UNDEFINED`].
#[must_use]
pub fn format_improvement(pct: Option<f64>) -> String {
    pct.map_or_else(|| UNDEFINED.to_string(), |p| format!("{p:.2}%"))
}

/// What the optimized plan changes relative to the naive one.
#[must_use]
pub fn describe_optimizations(naive: &PipelinePlan, optimized: &PipelinePlan) -> Vec<String> {
    let base = naive.run_config();
    let tuned = optimized.run_config();
    let mut applied = Vec::new();

    if base.granularity == Granularity::Item && tuned.granularity == Granularity::Page {
        applied.push("Chunking: yielding entire pages instead of individual items".to_string());
    }
    if tuned.workers != base.workers && !tuned.workers.is_default() {
        let show = |w: Option<u32>| w.map_or_else(|| "default".to_string(), |n| n.to_string());
        applied.push(format!(
            "Worker tuning: extract={}, normalize={}, load={}",
            show(tuned.workers.extract),
            show(tuned.workers.normalize),
            show(tuned.workers.load)
        ));
    }
    if let Some(items) = tuned.buffer_max_items {
        if base.buffer_max_items != Some(items) {
            applied.push(format!("Buffer control: buffer_max_items = {items}"));
        }
    }
    if let Some(mb) = tuned.file_rotation_size_mb {
        if base.file_rotation_size_mb != Some(mb) {
            applied.push(format!("File rotation: file_rotation_size_mb = {mb}"));
        }
    }
    let source = optimized.source();
    applied.push(format!(
        "Source grouping: {} resource(s) run together as source '{}'",
        source.resources().len(),
        source.name()
    ));
    applied
}

/// Result of one naive/optimized pair.
#[derive(Debug, Clone)]
pub struct Comparison {
    pub naive: RunResult,
    pub optimized: RunResult,
    pub optimizations: Vec<String>,
}

impl Comparison {
    #[must_use]
    pub fn improvement_pct(&self) -> Option<f64> {
        improvement_pct(self.naive.elapsed_secs, self.optimized.elapsed_secs)
    }

    /// Human-readable summary.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out);
        let _ = writeln!(out, "{BANNER}");
        let _ = writeln!(out, "  PERFORMANCE RESULTS");
        let _ = writeln!(out, "{BANNER}");
        for run in [&self.naive, &self.optimized] {
            let _ = writeln!(
                out,
                "  {:<10} {:>8.2} seconds  {:>8} rows  (dataset {})",
                run.label,
                run.elapsed_secs,
                run.rows_loaded(),
                run.load_info.dataset_name
            );
        }
        let _ = writeln!(
            out,
            "  Performance improvement: {}",
            format_improvement(self.improvement_pct())
        );
        let _ = writeln!(out);
        let _ = writeln!(out, "{BANNER}");
        let _ = writeln!(out, "  OPTIMIZATION DETAILS");
        let _ = writeln!(out, "{BANNER}");
        for (i, optimization) in self.optimizations.iter().enumerate() {
            let _ = writeln!(out, "  {}. {optimization}", i + 1);
        }
        out
    }

    /// Machine-readable form of the comparison.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "naive": self.naive,
            "optimized": self.optimized,
            "improvement_pct": self.improvement_pct(),
            "optimizations": self.optimizations,
        })
    }
}

/// Run `naive_plan` then `optimized_plan`, strictly one after the other.
///
/// # Errors
///
/// Propagates the first run failure; the second run is not started if the
/// first one fails.
pub async fn run_comparison(
    runtime: &dyn PipelineRuntime,
    naive_plan: &PipelinePlan,
    optimized_plan: &PipelinePlan,
) -> Result<Comparison, PipelineError> {
    tracing::info!("Running {} pipeline...", naive_plan.label());
    let naive = run_timed(runtime, naive_plan).await?;

    tracing::info!("Running {} pipeline...", optimized_plan.label());
    let optimized = run_timed(runtime, optimized_plan).await?;

    Ok(Comparison {
        naive,
        optimized,
        optimizations: describe_optimizations(naive_plan, optimized_plan),
    })
}
