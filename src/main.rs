mod cli;
mod commands;
mod config;
mod github;
mod model;
mod redcap;
mod scoring;
mod util;
mod xnat;

use anyhow::Result;
use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};

fn main() {
    init_tracing();

    if let Err(err) = run() {
        error!(error = %err, "command failed");
        for cause in err.chain().skip(1) {
            error!(cause = %cause, "caused by");
        }
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Score(args) => commands::score::run(args, &config),
        Commands::ExportSpiral(args) => commands::export_spiral::run(args, &config),
        Commands::LockForm(args) => commands::lock::run(args, &config),
        Commands::LockReport(args) => commands::lock::run_report(args, &config),
        Commands::PostIssues(args) => commands::post_issues::run(args, &config),
        Commands::Report(args) => commands::report::run(args, &config),
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
