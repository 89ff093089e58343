//! HMI Ingest - Main entry point

use clap::Parser;
use hmi_common::logging::{init_logging, LogConfig, LogOutput};
use hmi_ingest::{commands, config::IngestConfig, Cli, Commands};
use std::process;
use tracing::error;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_config = LogConfig::builder()
        .level(commands::cli_log_level(cli.verbose))
        .output(LogOutput::Console)
        .log_file_prefix("hmi-ingest")
        .filter_directives("sqlx=warn")
        .build();

    // LOG_* variables take precedence
    let log_config = log_config.clone().merge_env().unwrap_or(log_config);

    // The CLI still works without logging
    let _guard = init_logging(&log_config).ok().flatten();

    match run(&cli).await {
        Ok(true) => {},
        Ok(false) => process::exit(1),
        Err(e) => {
            error!(error = %e, "Command failed");
            eprintln!("Error: {:#}", e);
            process::exit(1);
        },
    }
}

/// Run the selected command; `Ok(false)` means it completed but failed
async fn run(cli: &Cli) -> anyhow::Result<bool> {
    let config = IngestConfig::load()?;

    match &cli.command {
        Commands::Ingest {
            machine,
            file,
            force,
        } => {
            let outcome = commands::ingest(&config, machine.clone(), file, *force).await?;
            Ok(outcome.is_success())
        },
        Commands::Lookup { file } => {
            commands::lookup(&config, file).await?;
            Ok(true)
        },
        Commands::Ping => {
            commands::ping(&config).await?;
            Ok(true)
        },
        Commands::Migrate => {
            commands::migrate(&config).await?;
            Ok(true)
        },
    }
}
