mod commands;
mod logging;

use clap::{Parser, Subcommand};

use commands::HarnessArgs;

#[derive(Parser)]
#[command(
    name = "loadbench",
    version,
    about = "Benchmark harness for paginated REST extract-and-load pipelines"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the naive and optimized profiles back to back and compare them
    Bench {
        #[command(flatten)]
        harness: HarnessArgs,
    },
    /// Run the production profile into its fixed dataset
    Run {
        #[command(flatten)]
        harness: HarnessArgs,
    },
    /// Validate the harness configuration and print the resolved plans
    Check {
        #[command(flatten)]
        harness: HarnessArgs,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    logging::init(&cli.log_level);

    match cli.command {
        Commands::Bench { harness } => commands::bench::execute(&harness).await,
        Commands::Run { harness } => commands::run::execute(&harness).await,
        Commands::Check { harness } => commands::check::execute(&harness),
    }
}
