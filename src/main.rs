mod config;
mod dedup;
mod enrich;
mod fetch;
mod lever;
mod models;
mod pipeline;
mod sheets;
mod snapshot;
mod sync;

use anyhow::Result;
use clap::{Parser, Subcommand};
use config::Config;
use std::path::PathBuf;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "recruit-sync")]
#[command(about = "Move candidates from Lever into the recruiting sheet without duplicates")]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// KEY=VALUE file read before the process environment
    #[arg(long, default_value = ".env", global = true)]
    env_file: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch candidates for the posting and merge them into the local snapshot
    Fetch,

    /// Look up LinkedIn URLs and emails for unprocessed candidates
    Enrich,

    /// Append new, non-duplicate candidates to the Google Sheet
    Sync,

    /// Run fetch, enrich and sync in order, stopping at the first failure
    Run,
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "recruit_sync=info",
        1 => "recruit_sync=debug",
        _ => "recruit_sync=trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = Config::load(&cli.env_file)?;

    match cli.command {
        Commands::Fetch => {
            println!("Fetching candidates for '{}'", config.posting_title);
            println!("{}", "=".repeat(60));
            fetch::run(&config)?;
        }

        Commands::Enrich => {
            println!("Enriching candidates from {}", config.candidates_file.display());
            println!("{}", "=".repeat(60));
            enrich::run(&config)?;
        }

        Commands::Sync => {
            println!("Syncing candidates to the sheet");
            println!("{}", "=".repeat(60));
            sync::run(&config)?;
        }

        Commands::Run => {
            pipeline::run(&config, &cli.env_file, cli.verbose)?;
        }
    }

    Ok(())
}
