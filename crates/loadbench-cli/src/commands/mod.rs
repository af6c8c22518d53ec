pub mod bench;
pub mod check;
pub mod run;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;

use loadbench_engine::config::parser;
use loadbench_engine::config::types::HarnessConfig;
use loadbench_engine::config::validator;
use loadbench_engine::{HttpPageSource, PageSource};

/// Built-in harness targeting the public Jaffle Shop API.
const DEFAULT_HARNESS: &str = include_str!("../../../../pipelines/jaffle_shop.yaml");

/// Harness selection and overrides shared by every command.
#[derive(Args, Debug, Clone, Default)]
pub struct HarnessArgs {
    /// Path to a harness YAML file (default: built-in Jaffle Shop harness)
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Override the destination SQLite file
    #[arg(long)]
    pub destination: Option<PathBuf>,
    /// Override the maximum number of pages fetched per collection
    #[arg(long)]
    pub max_pages: Option<u32>,
}

/// Parse the selected harness, apply overrides, then validate.
pub fn load_config(args: &HarnessArgs) -> Result<HarnessConfig> {
    let mut config = match &args.config {
        Some(path) => parser::parse_harness(path)
            .with_context(|| format!("Failed to load harness: {}", path.display()))?,
        None => parser::parse_harness_str(DEFAULT_HARNESS)
            .context("Failed to load built-in harness")?,
    };

    if let Some(destination) = &args.destination {
        config.destination.path.clone_from(destination);
    }
    if let Some(max_pages) = args.max_pages {
        config.source.paginator.maximum_page = max_pages;
    }

    validator::validate_harness(&config)?;
    Ok(config)
}

/// HTTP page source for the harness's base URL.
pub fn page_source(config: &HarnessConfig) -> Result<Arc<dyn PageSource>> {
    let source = HttpPageSource::new(config.source.base_url.clone())?;
    Ok(Arc::new(source))
}
