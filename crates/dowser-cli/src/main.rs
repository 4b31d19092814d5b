mod batch;
mod cli;
mod commands;
mod encoder;
mod sink;

use anyhow::Result;
use clap::Parser;
use cli::{Args, Command};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let args = Args::parse();

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("dowser=warn,dowser_core=warn"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    match args.command {
        Command::Analyze {
            system,
            batches,
            targets,
            output,
            config,
        } => commands::analyze::run(
            &system,
            &batches,
            targets.as_deref(),
            output.as_deref(),
            config.as_deref(),
        ),
        Command::Systems => commands::systems::run(),
    }
}
