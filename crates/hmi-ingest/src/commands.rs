//! CLI command implementations

use anyhow::{Context, Result};
use hmi_common::checksum;
use hmi_common::logging::LogLevel;
use std::path::Path;
use tracing::info;

use crate::config::IngestConfig;
use crate::db;
use crate::models::IngestionRecord;
use crate::orchestrator::{IngestOutcome, IngestRequest, IngestionOrchestrator};
use crate::store::{IngestStore, PgIngestStore};

/// Import one file and print the outcome
pub async fn ingest(
    config: &IngestConfig,
    machine: Option<String>,
    file: &Path,
    force: bool,
) -> Result<IngestOutcome> {
    let machine_id = resolve_machine_id(machine, config)?;
    let raw_text = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;

    let pool = db::create_pool(&config.database).await?;
    let orchestrator = IngestionOrchestrator::new(PgIngestStore::new(pool));

    let request = IngestRequest::new(machine_id, file_label(file), raw_text).force(force);
    let outcome = orchestrator.ingest(&request).await;

    println!("{}", format_outcome(&outcome));
    Ok(outcome)
}

/// Print the ledger record matching a file's content hash
pub async fn lookup(config: &IngestConfig, file: &Path) -> Result<Option<IngestionRecord>> {
    let content_hash = checksum::hash_file(file)
        .with_context(|| format!("Failed to hash {}", file.display()))?;

    let pool = db::create_pool(&config.database).await?;
    let record = PgIngestStore::new(pool).find_record(&content_hash).await?;

    match &record {
        Some(record) => println!("{}", format_record(record)),
        None => println!("Not ingested: {} ({})", file.display(), content_hash),
    }
    Ok(record)
}

/// Line written to stderr when `ping` cannot reach the database
pub const PING_FAILED_LINE: &str = "FAILED to connect to SQL.";

/// Connect and report the database name
pub async fn ping(config: &IngestConfig) -> Result<String> {
    let name = match connect_and_check(config).await {
        Ok(name) => name,
        Err(e) => {
            eprintln!("{}", PING_FAILED_LINE);
            return Err(e);
        },
    };

    println!("OK: Connected to database '{}'", name);
    Ok(name)
}

async fn connect_and_check(config: &IngestConfig) -> Result<String> {
    let pool = db::create_pool(&config.database)
        .await
        .context("Could not connect to database")?;
    Ok(db::health_check(&pool).await?)
}

/// Console log level: debug with `--verbose`, warnings only otherwise
pub fn cli_log_level(verbose: bool) -> LogLevel {
    if verbose {
        LogLevel::Debug
    } else {
        LogLevel::Warn
    }
}

pub async fn migrate(config: &IngestConfig) -> Result<()> {
    let pool = db::create_pool(&config.database).await?;
    db::run_migrations(&pool).await?;

    info!("Schema is up to date");
    println!("OK: Migrations applied");
    Ok(())
}

fn resolve_machine_id(machine: Option<String>, config: &IngestConfig) -> Result<String> {
    machine
        .map(|m| m.trim().to_string())
        .filter(|m| !m.is_empty())
        .or_else(|| config.default_machine_id.clone())
        .context("No machine id given; pass --machine or set HMI_MACHINE_ID")
}

/// File name recorded in the ledger: the final path component
fn file_label(file: &Path) -> String {
    file.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| file.display().to_string())
}

pub fn format_outcome(outcome: &IngestOutcome) -> String {
    match outcome {
        IngestOutcome::Skipped {
            ingestion_id,
            content_hash,
        } => format!(
            "SKIPPED: already imported as ingestion {} ({})",
            ingestion_id, content_hash
        ),
        IngestOutcome::Succeeded {
            ingestion_id,
            content_hash,
            stats,
        } => format!(
            "OK: ingestion {} ({})\n  hours: {}\n  status summaries: {}\n  status intervals: {}\n  production summaries: {}\n  production intervals: {}",
            ingestion_id,
            content_hash,
            stats.hours,
            stats.status_summaries,
            stats.status_intervals,
            stats.production_summaries,
            stats.production_intervals
        ),
        IngestOutcome::Failed {
            ingestion_id,
            content_hash,
            kind,
            error_message,
        } => {
            let id = ingestion_id
                .map(|id| format!("ingestion {}", id))
                .unwrap_or_else(|| "no ingestion record".to_string());
            format!(
                "FAILED ({}): {} [{}, {}]",
                kind, error_message, id, content_hash
            )
        },
    }
}

fn format_record(record: &IngestionRecord) -> String {
    let mut out = format!(
        "Ingestion {}\n  status: {}\n  machine: {}\n  file: {}\n  hash: {}",
        record.id, record.status, record.machine_id, record.file_name, record.content_hash
    );
    if let Some(timespan) = &record.timespan {
        out.push_str(&format!("\n  timespan: {}", timespan));
    }
    if let (Some(start), Some(end)) = (record.payload_start_utc, record.payload_end_utc) {
        out.push_str(&format!("\n  payload: {} .. {}", start.to_rfc3339(), end.to_rfc3339()));
    }
    if let Some(error) = &record.error_message {
        out.push_str(&format!("\n  error: {}", error));
    }
    out
}
