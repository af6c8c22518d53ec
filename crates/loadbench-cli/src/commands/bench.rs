use anyhow::Result;

use loadbench_engine::pipeline::plan_from_profile;
use loadbench_engine::{run_comparison, LocalRuntime};

use super::{load_config, page_source, HarnessArgs};

/// Execute the `bench` command: naive run, optimized run, comparison.
pub async fn execute(args: &HarnessArgs) -> Result<()> {
    let config = load_config(args)?;
    let source = page_source(&config)?;

    let naive = plan_from_profile(&config, "naive", &config.profiles.naive, &source)?;
    let optimized = plan_from_profile(&config, "optimized", &config.profiles.optimized, &source)?;

    tracing::info!(
        pipeline = config.pipeline,
        collections = config.source.collections.len(),
        destination = %config.destination.path.display(),
        maximum_page = config.source.paginator.maximum_page,
        "Harness validated"
    );

    let runtime = LocalRuntime::new();
    let comparison = run_comparison(&runtime, &naive, &optimized).await?;

    for run in [&comparison.naive, &comparison.optimized] {
        println!("{} completed in {:.2} seconds", run.label, run.elapsed_secs);
    }
    print!("{}", comparison.render());

    // Machine-readable JSON for benchmarking tools
    println!("@@BENCH_JSON@@{}", comparison.to_json());

    Ok(())
}
