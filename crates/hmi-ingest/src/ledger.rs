//! Ingestion ledger
//!
//! One record per distinct file content. The record moves through
//! `processing -> imported` on success and `processing -> failed` when an
//! attempt aborts; both `imported` and `failed` go back to `processing`
//! when the content is reprocessed.

use tracing::{debug, info, warn};

use crate::error::IngestResult;
use crate::models::{IngestionStatus, LedgerEntry, PayloadMeta};
use crate::store::{IngestStore, IngestTx};

/// What to do with a file given its existing ledger entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerDecision {
    /// Hash never seen: create a record
    CreateNew,
    /// Re-run the projection under the existing record id
    Reprocess(i64),
    /// Already imported and not forced
    Skip(i64),
}

impl LedgerDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerDecision::CreateNew => "create_new",
            LedgerDecision::Reprocess(_) => "reprocess",
            LedgerDecision::Skip(_) => "skip",
        }
    }
}

pub struct IngestionLedger;

impl IngestionLedger {
    /// Decide between create, reprocess and skip
    ///
    /// Records left `processing` or `failed` by an earlier attempt are always
    /// reprocessed; `force` only matters for `imported` ones.
    pub fn decide(existing: Option<&LedgerEntry>, force: bool) -> LedgerDecision {
        match existing {
            None => LedgerDecision::CreateNew,
            Some(entry) => match entry.status {
                IngestionStatus::Imported if !force => LedgerDecision::Skip(entry.id),
                IngestionStatus::Imported
                | IngestionStatus::Processing
                | IngestionStatus::Failed => LedgerDecision::Reprocess(entry.id),
            },
        }
    }

    pub async fn find_by_hash<T: IngestTx>(
        tx: &mut T,
        content_hash: &str,
    ) -> IngestResult<Option<LedgerEntry>> {
        let entry = tx.find_by_hash(content_hash).await?;
        debug!(content_hash, entry = ?entry, "Ledger lookup");
        Ok(entry)
    }

    /// Create a `processing` record and store the raw document with it
    pub async fn begin_processing<T: IngestTx>(
        tx: &mut T,
        machine_id: &str,
        file_name: &str,
        content_hash: &str,
        raw_text: &str,
    ) -> IngestResult<i64> {
        let id = tx
            .insert_ingestion(machine_id, file_name, content_hash)
            .await?;
        tx.insert_raw_payload(id, raw_text).await?;

        info!(
            ingestion_id = id,
            machine_id,
            file_name,
            content_hash,
            "Created ingestion record"
        );
        Ok(id)
    }

    pub async fn mark_reprocessing<T: IngestTx>(tx: &mut T, ingestion_id: i64) -> IngestResult<()> {
        tx.reset_to_processing(ingestion_id).await?;
        info!(ingestion_id, "Reprocessing existing ingestion record");
        Ok(())
    }

    pub async fn finalize<T: IngestTx>(
        tx: &mut T,
        ingestion_id: i64,
        meta: &PayloadMeta,
    ) -> IngestResult<()> {
        tx.finalize(ingestion_id, meta).await?;
        debug!(ingestion_id, timespan = ?meta.timespan, "Ingestion record finalized");
        Ok(())
    }

    /// Record a failure outside the aborted transaction
    ///
    /// Returns whether a record was updated. Errors are logged and reported
    /// as `false`; the caller reports the attempt's own error.
    pub async fn mark_failed<S: IngestStore>(store: &S, ingestion_id: i64, message: &str) -> bool {
        match store.mark_failed(ingestion_id, message).await {
            Ok(true) => {
                info!(ingestion_id, error = message, "Ingestion marked failed");
                true
            },
            Ok(false) => {
                debug!(ingestion_id, "No committed ingestion record to mark failed");
                false
            },
            Err(e) => {
                warn!(ingestion_id, error = %e, "Could not mark ingestion failed");
                false
            },
        }
    }
}
