//! HMI Telemetry Ingest
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Idempotent, transactional import of machine-telemetry JSON documents
//! into a normalized PostgreSQL schema.
//!
//! # Pipeline
//!
//! - **Hashing**: SHA-256 of the raw text deduplicates files by content
//! - **Ledger**: one record per hash moving through
//!   `processing -> imported | failed`
//! - **Parsing**: the nested document becomes a [`PayloadTree`]
//! - **Projection**: hours, statuses, recipes and their intervals are
//!   upserted into five derived tables on natural keys
//!
//! [`IngestionOrchestrator`] runs all of this in one store transaction and
//! reports an [`IngestOutcome`].
//!
//! # Example
//!
//! ```
//! use hmi_ingest::{IngestOutcome, IngestRequest, IngestionOrchestrator, MemoryStore};
//!
//! # tokio_test_block(async {
//! let orchestrator = IngestionOrchestrator::new(MemoryStore::new());
//! let request = IngestRequest::new("press-07", "day.json", r#"{"hours": []}"#);
//!
//! let outcome = orchestrator.ingest(&request).await;
//! assert!(matches!(outcome, IngestOutcome::Succeeded { .. }));
//!
//! let again = orchestrator.ingest(&request).await;
//! assert!(matches!(again, IngestOutcome::Skipped { .. }));
//! # });
//! # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
//! # }
//! ```

pub mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod ledger;
pub mod models;
pub mod orchestrator;
pub mod parser;
pub mod projection;
pub mod store;

pub use error::{FailureKind, IngestError, IngestResult};
pub use ledger::{IngestionLedger, LedgerDecision};
pub use models::{IngestionRecord, IngestionStatus, PayloadTree, ProjectionStats};
pub use orchestrator::{IngestOutcome, IngestRequest, IngestionOrchestrator};
pub use parser::PayloadParser;
pub use projection::ProjectionWriter;
pub use store::{IngestStore, IngestTx, MemoryStore, PgIngestStore};

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// HMI telemetry ingest
#[derive(Parser, Debug)]
#[command(name = "hmi-ingest")]
#[command(author, version, about, long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Import one telemetry file
    Ingest {
        /// Machine identifier (defaults to HMI_MACHINE_ID)
        #[arg(short, long)]
        machine: Option<String>,

        /// Path to the JSON document
        #[arg(short, long)]
        file: PathBuf,

        /// Re-import even if this content was already imported
        #[arg(long)]
        force: bool,
    },

    /// Show the ledger record for a file's content
    Lookup {
        /// Path to the JSON document
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Check the database connection
    Ping,

    /// Apply the bundled database schema
    Migrate,
}
