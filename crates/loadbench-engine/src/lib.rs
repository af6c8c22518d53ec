//! Benchmark harness for paginated extract-and-load runs.
//!
//! A run fetches every configured collection page by page, hands the
//! records downstream either one at a time or one page at a time, and
//! replaces the matching tables in a SQLite destination. The harness times
//! each run and compares a naive configuration against an optimized one.

pub mod config;
pub mod error;
pub mod orchestrator;
pub mod pipeline;
pub mod report;
pub mod resource;
pub mod result;
pub mod runtime;
pub mod timing;

// Re-export public API for convenience
pub use error::{PipelineError, Stage};
pub use orchestrator::run_timed;
pub use pipeline::{PipelinePlan, RunConfig, Source};
pub use report::{improvement_pct, run_comparison, Comparison};
pub use resource::{HttpPageSource, PageSource, ResourceDefinition, ResourceReader};
pub use result::RunResult;
pub use runtime::{LoadInfo, LocalRuntime, PipelineRuntime};
