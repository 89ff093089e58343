//! Transactional store interface
//!
//! The pipeline never talks to a database directly. It opens an [`IngestTx`]
//! through an [`IngestStore`], issues ledger queries and derived-table
//! upserts on it, and then commits or rolls back the whole unit.
//!
//! Two backends implement the traits:
//! - [`PgIngestStore`]: PostgreSQL via sqlx
//! - [`MemoryStore`]: in-process tables with fault injection

use async_trait::async_trait;

use crate::error::IngestResult;
use crate::models::{
    HourBucketRow, IngestionRecord, LedgerEntry, PayloadMeta, ProductionIntervalRow,
    ProductionSummaryRow, StatusIntervalRow, StatusSummaryRow,
};

pub mod memory;
pub mod postgres;

pub use memory::{DerivedTable, Fault, MemoryStore, MemoryTables};
pub use postgres::PgIngestStore;

/// Entry point to a transactional backend
#[async_trait]
pub trait IngestStore: Send + Sync {
    type Tx: IngestTx;

    /// Open a transaction covering one ingestion attempt
    async fn begin(&self) -> IngestResult<Self::Tx>;

    /// Mark an ingestion as failed in a transaction of its own
    ///
    /// Returns `false` when no record with that id exists.
    async fn mark_failed(&self, ingestion_id: i64, message: &str) -> IngestResult<bool>;

    /// Full ledger record for a content hash (highest id wins)
    async fn find_record(&self, content_hash: &str) -> IngestResult<Option<IngestionRecord>>;
}

/// One open transaction
///
/// Upserts match on the natural key of their table, overwrite every
/// non-key column including `ingestion_id`, and insert when absent.
#[async_trait]
pub trait IngestTx: Send {
    async fn find_by_hash(&mut self, content_hash: &str) -> IngestResult<Option<LedgerEntry>>;

    /// Insert a `processing` ledger row and return its id
    async fn insert_ingestion(
        &mut self,
        machine_id: &str,
        file_name: &str,
        content_hash: &str,
    ) -> IngestResult<i64>;

    /// Store the raw document; a payload already stored for the id is kept
    async fn insert_raw_payload(&mut self, ingestion_id: i64, raw_text: &str) -> IngestResult<()>;

    /// Status back to `processing` with the error cleared
    async fn reset_to_processing(&mut self, ingestion_id: i64) -> IngestResult<()>;

    /// Status to `imported`, error cleared, payload metadata stamped
    async fn finalize(&mut self, ingestion_id: i64, meta: &PayloadMeta) -> IngestResult<()>;

    async fn upsert_hour_bucket(&mut self, row: &HourBucketRow) -> IngestResult<()>;

    async fn upsert_status_summary(&mut self, row: &StatusSummaryRow) -> IngestResult<()>;

    async fn upsert_status_interval(&mut self, row: &StatusIntervalRow) -> IngestResult<()>;

    async fn upsert_production_summary(&mut self, row: &ProductionSummaryRow) -> IngestResult<()>;

    async fn upsert_production_interval(
        &mut self,
        row: &ProductionIntervalRow,
    ) -> IngestResult<()>;

    async fn commit(self) -> IngestResult<()>;

    async fn rollback(self) -> IngestResult<()>;
}
