//! Ingestion orchestrator
//!
//! Runs one file through hash, ledger decision, parse, projection and
//! finalize inside a single store transaction:
//!
//! ```text
//! hash -> decide --Skip------------------------------> rollback -> Skipped
//!               \--CreateNew | Reprocess -> parse -> project -> finalize -> commit -> Succeeded
//!                                             \__________\___________\________\--> rollback -> mark_failed -> Failed
//! ```

use hmi_common::checksum;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::error::{FailureKind, IngestError, IngestResult};
use crate::ledger::{IngestionLedger, LedgerDecision};
use crate::models::ProjectionStats;
use crate::parser::PayloadParser;
use crate::projection::ProjectionWriter;
use crate::store::{IngestStore, IngestTx};

/// One file to ingest
#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub machine_id: String,
    pub file_name: String,
    pub raw_text: String,
    /// Re-run an already imported file
    pub force: bool,
}

impl IngestRequest {
    pub fn new(
        machine_id: impl Into<String>,
        file_name: impl Into<String>,
        raw_text: impl Into<String>,
    ) -> Self {
        Self {
            machine_id: machine_id.into(),
            file_name: file_name.into(),
            raw_text: raw_text.into(),
            force: false,
        }
    }

    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }
}

/// Result of one ingestion attempt
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum IngestOutcome {
    /// Content already imported; nothing was written
    Skipped {
        ingestion_id: i64,
        content_hash: String,
    },
    Succeeded {
        ingestion_id: i64,
        content_hash: String,
        stats: ProjectionStats,
    },
    /// All writes of the attempt were rolled back
    Failed {
        ingestion_id: Option<i64>,
        content_hash: String,
        kind: FailureKind,
        error_message: String,
    },
}

impl IngestOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, IngestOutcome::Failed { .. })
    }

    pub fn content_hash(&self) -> &str {
        match self {
            IngestOutcome::Skipped { content_hash, .. }
            | IngestOutcome::Succeeded { content_hash, .. }
            | IngestOutcome::Failed { content_hash, .. } => content_hash,
        }
    }

    pub fn ingestion_id(&self) -> Option<i64> {
        match self {
            IngestOutcome::Skipped { ingestion_id, .. }
            | IngestOutcome::Succeeded { ingestion_id, .. } => Some(*ingestion_id),
            IngestOutcome::Failed { ingestion_id, .. } => *ingestion_id,
        }
    }
}

/// Ledger record an attempt is writing under
#[derive(Debug, Clone, Copy)]
struct Target {
    id: i64,
    /// Record was committed before this attempt
    existing: bool,
}

pub struct IngestionOrchestrator<S: IngestStore> {
    store: S,
}

impl<S: IngestStore> IngestionOrchestrator<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Ingest one file
    ///
    /// Never returns an error: faults are reported as
    /// [`IngestOutcome::Failed`] after the transaction is rolled back.
    /// Reprocessing projects under the machine id stored on the ledger
    /// record, whatever `request.machine_id` says.
    pub async fn ingest(&self, request: &IngestRequest) -> IngestOutcome {
        let content_hash = checksum::content_hash(request.raw_text.as_bytes());

        info!(
            machine_id = %request.machine_id,
            file_name = %request.file_name,
            content_hash = %content_hash,
            force = request.force,
            bytes = request.raw_text.len(),
            "Starting ingestion"
        );

        let mut tx = match self.store.begin().await {
            Ok(tx) => tx,
            Err(e) => return self.fail(None, content_hash, e).await,
        };

        let existing = match IngestionLedger::find_by_hash(&mut tx, &content_hash).await {
            Ok(existing) => existing,
            Err(e) => {
                rollback(tx).await;
                return self.fail(None, content_hash, e).await;
            },
        };
        let decision = IngestionLedger::decide(existing.as_ref(), request.force);

        info!(
            content_hash = %content_hash,
            decision = decision.as_str(),
            "Ledger decision"
        );

        let target = match decision {
            LedgerDecision::Skip(ingestion_id) => {
                rollback(tx).await;
                info!(ingestion_id, "File already imported, skipping");
                return IngestOutcome::Skipped {
                    ingestion_id,
                    content_hash,
                };
            },
            LedgerDecision::CreateNew => {
                match IngestionLedger::begin_processing(
                    &mut tx,
                    &request.machine_id,
                    &request.file_name,
                    &content_hash,
                    &request.raw_text,
                )
                .await
                {
                    Ok(id) => Target {
                        id,
                        existing: false,
                    },
                    Err(e) => {
                        rollback(tx).await;
                        return self.fail(None, content_hash, e).await;
                    },
                }
            },
            LedgerDecision::Reprocess(id) => {
                if let Some(entry) = existing.as_ref() {
                    if entry.machine_id != request.machine_id {
                        warn!(
                            ingestion_id = id,
                            recorded_machine_id = %entry.machine_id,
                            requested_machine_id = %request.machine_id,
                            "Content already recorded for another machine, reprocessing under the recorded one"
                        );
                    }
                }
                let target = Target { id, existing: true };
                if let Err(e) = IngestionLedger::mark_reprocessing(&mut tx, id).await {
                    rollback(tx).await;
                    return self.fail(Some(target), content_hash, e).await;
                }
                target
            },
        };

        // A reprocessed record keeps the machine it was first imported for
        let machine_id = existing
            .as_ref()
            .map_or(request.machine_id.as_str(), |entry| entry.machine_id.as_str());

        let stats = match load(&mut tx, target.id, machine_id, &request.raw_text).await {
            Ok(stats) => stats,
            Err(e) => {
                rollback(tx).await;
                return self.fail(Some(target), content_hash, e).await;
            },
        };

        if let Err(e) = tx.commit().await {
            return self.fail(Some(target), content_hash, e).await;
        }

        info!(
            ingestion_id = target.id,
            content_hash = %content_hash,
            rows = stats.total(),
            "Ingestion committed"
        );

        IngestOutcome::Succeeded {
            ingestion_id: target.id,
            content_hash,
            stats,
        }
    }

    async fn fail(
        &self,
        target: Option<Target>,
        content_hash: String,
        error: IngestError,
    ) -> IngestOutcome {
        let error_message = error.to_string();
        error!(
            content_hash = %content_hash,
            kind = %error.kind(),
            error = %error_message,
            "Ingestion failed"
        );

        let ingestion_id = match target {
            Some(target) => {
                let marked =
                    IngestionLedger::mark_failed(&self.store, target.id, &error_message).await;
                (marked || target.existing).then_some(target.id)
            },
            None => None,
        };

        IngestOutcome::Failed {
            ingestion_id,
            content_hash,
            kind: error.kind(),
            error_message,
        }
    }
}

/// Parse, project and finalize under `ingestion_id`
async fn load<T: IngestTx>(
    tx: &mut T,
    ingestion_id: i64,
    machine_id: &str,
    raw_text: &str,
) -> IngestResult<ProjectionStats> {
    let tree = PayloadParser::parse(raw_text)?;
    let stats = ProjectionWriter::project(tx, ingestion_id, machine_id, &tree).await?;
    IngestionLedger::finalize(tx, ingestion_id, &tree.meta).await?;
    Ok(stats)
}

async fn rollback<T: IngestTx>(tx: T) {
    if let Err(e) = tx.rollback().await {
        warn!(error = %e, "Transaction rollback failed");
    }
}
