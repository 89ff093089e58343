//! Data models for telemetry ingestion
//!
//! Three groups of types live here:
//! - ledger types tracking one import per distinct file content,
//! - the parsed payload tree produced by the parser,
//! - the row shapes written to the five derived tables.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============================================================================
// Ingestion ledger
// ============================================================================

/// Lifecycle status of an ingestion record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestionStatus {
    Processing,
    Imported,
    Failed,
}

impl IngestionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestionStatus::Processing => "processing",
            IngestionStatus::Imported => "imported",
            IngestionStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for IngestionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for IngestionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "processing" => Ok(IngestionStatus::Processing),
            "imported" => Ok(IngestionStatus::Imported),
            "failed" => Ok(IngestionStatus::Failed),
            other => Err(format!("Unknown ingestion status: {}", other)),
        }
    }
}

/// Minimal view of a ledger row used for the new/reprocess/skip decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub id: i64,
    pub status: IngestionStatus,
    /// Machine the record was first imported for
    pub machine_id: String,
}

/// Full ingestion record (maps to the `ingestions` table)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionRecord {
    pub id: i64,
    pub machine_id: String,
    pub file_name: String,
    pub content_hash: String,
    pub status: IngestionStatus,
    pub error_message: Option<String>,
    pub timespan: Option<String>,
    pub payload_start_utc: Option<DateTime<Utc>>,
    pub payload_end_utc: Option<DateTime<Utc>>,
}

impl IngestionRecord {
    pub fn entry(&self) -> LedgerEntry {
        LedgerEntry {
            id: self.id,
            status: self.status,
            machine_id: self.machine_id.clone(),
        }
    }
}

// ============================================================================
// Parsed payload
// ============================================================================

/// Document-level metadata; every field is optional in the input
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PayloadMeta {
    pub timespan: Option<String>,
    pub start_utc: Option<DateTime<Utc>>,
    pub end_utc: Option<DateTime<Utc>>,
}

/// In-memory form of one telemetry document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PayloadTree {
    pub meta: PayloadMeta,
    /// Hour entries in document order (duplicates are kept)
    pub hours: Vec<HourEntry>,
}

/// One hour-aligned slice of telemetry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HourEntry {
    pub hour_start: DateTime<Utc>,
    /// Status name -> summary; names are whatever keys the machine reported
    pub statuses: BTreeMap<String, StatusEntry>,
    pub production: Vec<ProductionEntry>,
}

impl HourEntry {
    pub fn new(hour_start: DateTime<Utc>) -> Self {
        Self {
            hour_start,
            statuses: BTreeMap::new(),
            production: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusEntry {
    pub count: i64,
    pub duration_seconds: i64,
    pub intervals: Vec<Interval>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductionEntry {
    pub recipe: String,
    pub good: i64,
    pub reject: i64,
    pub total: i64,
    pub intervals: Vec<Interval>,
}

/// A contiguous UTC time range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interval {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Interval {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Seconds from start to end; negative when end precedes start
    pub fn duration_seconds(&self) -> f64 {
        (self.end - self.start).as_seconds_f64()
    }
}

// ============================================================================
// Derived rows
// ============================================================================

/// `hour_buckets` row, keyed by (machine_id, hour_start_utc)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HourBucketRow {
    pub machine_id: String,
    pub hour_start_utc: DateTime<Utc>,
    pub timespan: Option<String>,
    pub payload_start_utc: Option<DateTime<Utc>>,
    pub payload_end_utc: Option<DateTime<Utc>>,
    pub ingestion_id: i64,
}

/// `status_summaries` row, keyed by (machine_id, hour_start_utc, status_name)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSummaryRow {
    pub machine_id: String,
    pub hour_start_utc: DateTime<Utc>,
    pub status_name: String,
    pub occurrence_count: i64,
    pub duration_seconds: i64,
    pub ingestion_id: i64,
}

/// `status_intervals` row, keyed by the summary key plus both boundaries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusIntervalRow {
    pub machine_id: String,
    pub hour_start_utc: DateTime<Utc>,
    pub status_name: String,
    pub interval_start_utc: DateTime<Utc>,
    pub interval_end_utc: DateTime<Utc>,
    pub duration_seconds: f64,
    pub ingestion_id: i64,
}

/// `production_summaries` row, keyed by (machine_id, hour_start_utc, recipe_name)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductionSummaryRow {
    pub machine_id: String,
    pub hour_start_utc: DateTime<Utc>,
    pub recipe_name: String,
    pub good_count: i64,
    pub reject_count: i64,
    pub total_count: i64,
    pub ingestion_id: i64,
}

/// `production_intervals` row, keyed by the summary key plus both boundaries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductionIntervalRow {
    pub machine_id: String,
    pub hour_start_utc: DateTime<Utc>,
    pub recipe_name: String,
    pub interval_start_utc: DateTime<Utc>,
    pub interval_end_utc: DateTime<Utc>,
    pub duration_seconds: f64,
    pub ingestion_id: i64,
}

/// Number of upserts issued per derived table during one projection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectionStats {
    pub hours: usize,
    pub status_summaries: usize,
    pub status_intervals: usize,
    pub production_summaries: usize,
    pub production_intervals: usize,
}

impl ProjectionStats {
    pub fn total(&self) -> usize {
        self.hours
            + self.status_summaries
            + self.status_intervals
            + self.production_summaries
            + self.production_intervals
    }
}
