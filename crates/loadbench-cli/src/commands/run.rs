use anyhow::Result;

use loadbench_engine::pipeline::plan_from_profile;
use loadbench_engine::{run_timed, LocalRuntime};

use super::{load_config, page_source, HarnessArgs};

/// Execute the `run` command: one production load into the fixed dataset.
pub async fn execute(args: &HarnessArgs) -> Result<()> {
    let config = load_config(args)?;
    let source = page_source(&config)?;
    let plan = plan_from_profile(&config, "production", &config.profiles.production, &source)?;

    tracing::info!(
        pipeline = config.pipeline,
        dataset = plan.dataset_name(),
        destination = %plan.destination().display(),
        "Harness validated"
    );

    let result = run_timed(&LocalRuntime::new(), &plan).await?;

    println!(
        "Pipeline '{}' completed in {:.2} seconds.",
        plan.pipeline_name(),
        result.elapsed_secs
    );
    print!("{}", result.load_info);

    println!("@@BENCH_JSON@@{}", serde_json::json!(result));

    Ok(())
}
