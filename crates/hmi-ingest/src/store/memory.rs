//! In-memory backend
//!
//! A transaction works on a private copy of the tables and swaps it in on
//! commit. Ids come from a counter outside the copy, so a rolled-back id is
//! never handed out again (same as a PostgreSQL sequence).
//!
//! Faults can be armed to make `begin`, `commit`, `mark_failed` or the n-th
//! upsert into a derived table fail.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{IngestStore, IngestTx};
use crate::error::{IngestError, IngestResult};
use crate::models::{
    HourBucketRow, IngestionRecord, IngestionStatus, LedgerEntry, PayloadMeta,
    ProductionIntervalRow, ProductionSummaryRow, StatusIntervalRow, StatusSummaryRow,
};

pub type HourKey = (String, DateTime<Utc>);
pub type NamedKey = (String, DateTime<Utc>, String);
pub type IntervalKey = (String, DateTime<Utc>, String, DateTime<Utc>, DateTime<Utc>);

/// The five derived tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DerivedTable {
    HourBuckets,
    StatusSummaries,
    StatusIntervals,
    ProductionSummaries,
    ProductionIntervals,
}

impl DerivedTable {
    pub fn as_str(&self) -> &'static str {
        match self {
            DerivedTable::HourBuckets => "hour_buckets",
            DerivedTable::StatusSummaries => "status_summaries",
            DerivedTable::StatusIntervals => "status_intervals",
            DerivedTable::ProductionSummaries => "production_summaries",
            DerivedTable::ProductionIntervals => "production_intervals",
        }
    }
}

/// An injected failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Begin,
    Commit,
    MarkFailed,
    /// Fail the upsert that follows `after` successful upserts into `table`
    /// within one transaction
    Upsert { table: DerivedTable, after: usize },
}

/// Snapshot of every table
#[derive(Debug, Clone, Default)]
pub struct MemoryTables {
    pub ingestions: BTreeMap<i64, IngestionRecord>,
    pub raw_payloads: BTreeMap<i64, String>,
    pub hour_buckets: BTreeMap<HourKey, HourBucketRow>,
    pub status_summaries: BTreeMap<NamedKey, StatusSummaryRow>,
    pub status_intervals: BTreeMap<IntervalKey, StatusIntervalRow>,
    pub production_summaries: BTreeMap<NamedKey, ProductionSummaryRow>,
    pub production_intervals: BTreeMap<IntervalKey, ProductionIntervalRow>,
}

impl MemoryTables {
    pub fn row_count(&self, table: DerivedTable) -> usize {
        match table {
            DerivedTable::HourBuckets => self.hour_buckets.len(),
            DerivedTable::StatusSummaries => self.status_summaries.len(),
            DerivedTable::StatusIntervals => self.status_intervals.len(),
            DerivedTable::ProductionSummaries => self.production_summaries.len(),
            DerivedTable::ProductionIntervals => self.production_intervals.len(),
        }
    }

    /// Rows across all five derived tables
    pub fn derived_rows(&self) -> usize {
        [
            DerivedTable::HourBuckets,
            DerivedTable::StatusSummaries,
            DerivedTable::StatusIntervals,
            DerivedTable::ProductionSummaries,
            DerivedTable::ProductionIntervals,
        ]
        .iter()
        .map(|table| self.row_count(*table))
        .sum()
    }

    /// Latest record for a hash (highest id wins)
    pub fn record_by_hash(&self, content_hash: &str) -> Option<&IngestionRecord> {
        self.ingestions
            .values()
            .rev()
            .find(|record| record.content_hash == content_hash)
    }
}

#[derive(Default)]
struct Shared {
    tables: Mutex<MemoryTables>,
    faults: Mutex<Vec<Fault>>,
    last_id: AtomicI64,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inject(&self, fault: Fault) -> IngestResult<()> {
        lock(&self.shared.faults)?.push(fault);
        Ok(())
    }

    pub fn clear_faults(&self) -> IngestResult<()> {
        lock(&self.shared.faults)?.clear();
        Ok(())
    }

    /// Committed state
    pub fn tables(&self) -> IngestResult<MemoryTables> {
        Ok(lock(&self.shared.tables)?.clone())
    }

    fn armed(&self, fault: Fault) -> IngestResult<bool> {
        Ok(lock(&self.shared.faults)?.contains(&fault))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> IngestResult<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| IngestError::store("memory store lock poisoned"))
}

fn injected(what: &str) -> IngestError {
    IngestError::store(format!("injected fault: {}", what))
}

#[async_trait]
impl IngestStore for MemoryStore {
    type Tx = MemoryTx;

    async fn begin(&self) -> IngestResult<MemoryTx> {
        if self.armed(Fault::Begin)? {
            return Err(injected("begin"));
        }

        Ok(MemoryTx {
            store: self.clone(),
            tables: self.tables()?,
            upserts: BTreeMap::new(),
        })
    }

    async fn mark_failed(&self, ingestion_id: i64, message: &str) -> IngestResult<bool> {
        if self.armed(Fault::MarkFailed)? {
            return Err(injected("mark_failed"));
        }

        let mut tables = lock(&self.shared.tables)?;
        match tables.ingestions.get_mut(&ingestion_id) {
            Some(record) => {
                record.status = IngestionStatus::Failed;
                record.error_message = Some(message.to_string());
                Ok(true)
            },
            None => Ok(false),
        }
    }

    async fn find_record(&self, content_hash: &str) -> IngestResult<Option<IngestionRecord>> {
        Ok(lock(&self.shared.tables)?
            .record_by_hash(content_hash)
            .cloned())
    }
}

pub struct MemoryTx {
    store: MemoryStore,
    tables: MemoryTables,
    upserts: BTreeMap<DerivedTable, usize>,
}

impl MemoryTx {
    fn record_mut(&mut self, ingestion_id: i64) -> IngestResult<&mut IngestionRecord> {
        self.tables
            .ingestions
            .get_mut(&ingestion_id)
            .ok_or_else(|| IngestError::store(format!("ingestion {} not found", ingestion_id)))
    }

    /// Count an upsert into `table`, failing if a fault is armed for it
    fn track(&mut self, table: DerivedTable) -> IngestResult<()> {
        let done = self.upserts.entry(table).or_insert(0);
        if self.store.armed(Fault::Upsert {
            table,
            after: *done,
        })? {
            return Err(injected(&format!("upsert into {}", table.as_str())));
        }
        *done += 1;
        Ok(())
    }
}

#[async_trait]
impl IngestTx for MemoryTx {
    async fn find_by_hash(&mut self, content_hash: &str) -> IngestResult<Option<LedgerEntry>> {
        Ok(self
            .tables
            .record_by_hash(content_hash)
            .map(IngestionRecord::entry))
    }

    async fn insert_ingestion(
        &mut self,
        machine_id: &str,
        file_name: &str,
        content_hash: &str,
    ) -> IngestResult<i64> {
        if self.tables.record_by_hash(content_hash).is_some() {
            return Err(IngestError::store(format!(
                "duplicate key value violates unique constraint on content_hash {}",
                content_hash
            )));
        }

        let id = self.store.shared.last_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.tables.ingestions.insert(
            id,
            IngestionRecord {
                id,
                machine_id: machine_id.to_string(),
                file_name: file_name.to_string(),
                content_hash: content_hash.to_string(),
                status: IngestionStatus::Processing,
                error_message: None,
                timespan: None,
                payload_start_utc: None,
                payload_end_utc: None,
            },
        );
        Ok(id)
    }

    async fn insert_raw_payload(&mut self, ingestion_id: i64, raw_text: &str) -> IngestResult<()> {
        self.record_mut(ingestion_id)?;
        self.tables
            .raw_payloads
            .entry(ingestion_id)
            .or_insert_with(|| raw_text.to_string());
        Ok(())
    }

    async fn reset_to_processing(&mut self, ingestion_id: i64) -> IngestResult<()> {
        let record = self.record_mut(ingestion_id)?;
        record.status = IngestionStatus::Processing;
        record.error_message = None;
        Ok(())
    }

    async fn finalize(&mut self, ingestion_id: i64, meta: &PayloadMeta) -> IngestResult<()> {
        let record = self.record_mut(ingestion_id)?;
        record.status = IngestionStatus::Imported;
        record.error_message = None;
        record.timespan = meta.timespan.clone();
        record.payload_start_utc = meta.start_utc;
        record.payload_end_utc = meta.end_utc;
        Ok(())
    }

    async fn upsert_hour_bucket(&mut self, row: &HourBucketRow) -> IngestResult<()> {
        self.track(DerivedTable::HourBuckets)?;
        self.tables
            .hour_buckets
            .insert((row.machine_id.clone(), row.hour_start_utc), row.clone());
        Ok(())
    }

    async fn upsert_status_summary(&mut self, row: &StatusSummaryRow) -> IngestResult<()> {
        self.track(DerivedTable::StatusSummaries)?;
        self.tables.status_summaries.insert(
            (
                row.machine_id.clone(),
                row.hour_start_utc,
                row.status_name.clone(),
            ),
            row.clone(),
        );
        Ok(())
    }

    async fn upsert_status_interval(&mut self, row: &StatusIntervalRow) -> IngestResult<()> {
        self.track(DerivedTable::StatusIntervals)?;
        self.tables.status_intervals.insert(
            (
                row.machine_id.clone(),
                row.hour_start_utc,
                row.status_name.clone(),
                row.interval_start_utc,
                row.interval_end_utc,
            ),
            row.clone(),
        );
        Ok(())
    }

    async fn upsert_production_summary(&mut self, row: &ProductionSummaryRow) -> IngestResult<()> {
        self.track(DerivedTable::ProductionSummaries)?;
        self.tables.production_summaries.insert(
            (
                row.machine_id.clone(),
                row.hour_start_utc,
                row.recipe_name.clone(),
            ),
            row.clone(),
        );
        Ok(())
    }

    async fn upsert_production_interval(
        &mut self,
        row: &ProductionIntervalRow,
    ) -> IngestResult<()> {
        self.track(DerivedTable::ProductionIntervals)?;
        self.tables.production_intervals.insert(
            (
                row.machine_id.clone(),
                row.hour_start_utc,
                row.recipe_name.clone(),
                row.interval_start_utc,
                row.interval_end_utc,
            ),
            row.clone(),
        );
        Ok(())
    }

    async fn commit(self) -> IngestResult<()> {
        if self.store.armed(Fault::Commit)? {
            return Err(injected("commit"));
        }
        *lock(&self.store.shared.tables)? = self.tables;
        Ok(())
    }

    async fn rollback(self) -> IngestResult<()> {
        Ok(())
    }
}
