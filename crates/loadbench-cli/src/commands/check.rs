use anyhow::Result;

use loadbench_engine::pipeline::{plan_from_profile, PipelinePlan};
use loadbench_engine::runtime::StageSettings;

use super::{load_config, page_source, HarnessArgs};

/// Execute the `check` command: validate the harness and build every plan
/// without touching the network or the destination.
pub fn execute(args: &HarnessArgs) -> Result<()> {
    let config = load_config(args)?;
    println!("Harness structure: OK");

    let source = page_source(&config)?;
    let profiles = [
        ("naive", &config.profiles.naive),
        ("optimized", &config.profiles.optimized),
        ("production", &config.profiles.production),
    ];
    for (label, profile) in profiles {
        let plan = plan_from_profile(&config, label, profile, &source)?;
        print_plan(&plan);
    }

    println!("\nAll checks passed.");
    Ok(())
}

fn print_plan(plan: &PipelinePlan) {
    let run = plan.run_config();
    let settings = StageSettings::resolve(run);
    let rotation = settings
        .file_rotation_bytes
        .map_or_else(|| "off".to_string(), |b| format!("{} MB", b / (1024 * 1024)));

    println!("\n{}:", plan.label());
    println!("  Dataset:      {}", plan.dataset_name());
    println!("  Destination:  {}", plan.destination().display());
    println!("  Granularity:  {}", run.granularity.as_str());
    println!(
        "  Workers:      extract={} normalize={} load={}",
        settings.extract_workers, settings.normalize_workers, settings.load_workers
    );
    println!("  Buffer:       {} items", settings.buffer_max_items);
    println!("  Rotation:     {rotation}");
    let names: Vec<&str> = plan.source().resources().iter().map(|r| r.name()).collect();
    println!(
        "  Source:       {} [{}]",
        plan.source().name(),
        names.join(", ")
    );
}
