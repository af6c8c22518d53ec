//! Timed execution of a single plan.

use crate::error::PipelineError;
use crate::pipeline::PipelinePlan;
use crate::result::RunResult;
use crate::runtime::PipelineRuntime;
use crate::timing::timed;

/// Run `plan` to completion on `runtime`, timing only the runtime call.
///
/// # Errors
///
/// Returns whatever the runtime returned; failures are neither retried nor
/// wrapped, and no [`RunResult`] is produced for them.
pub async fn run_timed(
    runtime: &dyn PipelineRuntime,
    plan: &PipelinePlan,
) -> Result<RunResult, PipelineError> {
    let (outcome, elapsed) = timed(runtime.run(plan)).await;
    match outcome {
        Ok(load_info) => {
            let elapsed_secs = elapsed.as_secs_f64();
            tracing::info!(
                "{} completed in {:.2} seconds",
                plan.label(),
                elapsed_secs
            );
            Ok(RunResult {
                label: plan.label().to_string(),
                elapsed_secs,
                load_info,
            })
        }
        Err(e) => {
            tracing::error!(
                "{} failed after {:.2} seconds: {}",
                plan.label(),
                elapsed.as_secs_f64(),
                e
            );
            Err(e)
        }
    }
}
