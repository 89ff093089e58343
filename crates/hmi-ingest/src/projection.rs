//! Projection of a parsed payload onto the derived tables
//!
//! Each hour fans out into one hour bucket, one summary per status and
//! recipe, and one row per interval. All writes are upserts on natural
//! keys issued through the caller's transaction; nothing is deleted, so
//! keys missing from a newer version of a document keep their old rows.

use tracing::debug;

use crate::error::IngestResult;
use crate::models::{
    HourBucketRow, HourEntry, PayloadMeta, PayloadTree, ProductionIntervalRow,
    ProductionSummaryRow, ProjectionStats, StatusIntervalRow, StatusSummaryRow,
};
use crate::store::IngestTx;

pub struct ProjectionWriter;

impl ProjectionWriter {
    /// Upsert every row derived from `tree`, stamped with `ingestion_id`
    ///
    /// Hours are written in document order, so when an hour appears twice
    /// the later entry's values win.
    pub async fn project<T: IngestTx>(
        tx: &mut T,
        ingestion_id: i64,
        machine_id: &str,
        tree: &PayloadTree,
    ) -> IngestResult<ProjectionStats> {
        let mut stats = ProjectionStats::default();

        for hour in &tree.hours {
            Self::project_hour(tx, ingestion_id, machine_id, &tree.meta, hour, &mut stats).await?;
        }

        debug!(
            ingestion_id,
            machine_id,
            hours = stats.hours,
            status_summaries = stats.status_summaries,
            status_intervals = stats.status_intervals,
            production_summaries = stats.production_summaries,
            production_intervals = stats.production_intervals,
            "Projection complete"
        );

        Ok(stats)
    }

    async fn project_hour<T: IngestTx>(
        tx: &mut T,
        ingestion_id: i64,
        machine_id: &str,
        meta: &PayloadMeta,
        hour: &HourEntry,
        stats: &mut ProjectionStats,
    ) -> IngestResult<()> {
        tx.upsert_hour_bucket(&HourBucketRow {
            machine_id: machine_id.to_string(),
            hour_start_utc: hour.hour_start,
            timespan: meta.timespan.clone(),
            payload_start_utc: meta.start_utc,
            payload_end_utc: meta.end_utc,
            ingestion_id,
        })
        .await?;
        stats.hours += 1;

        for (status_name, status) in &hour.statuses {
            tx.upsert_status_summary(&StatusSummaryRow {
                machine_id: machine_id.to_string(),
                hour_start_utc: hour.hour_start,
                status_name: status_name.clone(),
                occurrence_count: status.count,
                duration_seconds: status.duration_seconds,
                ingestion_id,
            })
            .await?;
            stats.status_summaries += 1;

            for interval in &status.intervals {
                tx.upsert_status_interval(&StatusIntervalRow {
                    machine_id: machine_id.to_string(),
                    hour_start_utc: hour.hour_start,
                    status_name: status_name.clone(),
                    interval_start_utc: interval.start,
                    interval_end_utc: interval.end,
                    duration_seconds: interval.duration_seconds(),
                    ingestion_id,
                })
                .await?;
                stats.status_intervals += 1;
            }
        }

        for production in &hour.production {
            tx.upsert_production_summary(&ProductionSummaryRow {
                machine_id: machine_id.to_string(),
                hour_start_utc: hour.hour_start,
                recipe_name: production.recipe.clone(),
                good_count: production.good,
                reject_count: production.reject,
                total_count: production.total,
                ingestion_id,
            })
            .await?;
            stats.production_summaries += 1;

            for interval in &production.intervals {
                tx.upsert_production_interval(&ProductionIntervalRow {
                    machine_id: machine_id.to_string(),
                    hour_start_utc: hour.hour_start,
                    recipe_name: production.recipe.clone(),
                    interval_start_utc: interval.start,
                    interval_end_utc: interval.end,
                    duration_seconds: interval.duration_seconds(),
                    ingestion_id,
                })
                .await?;
                stats.production_intervals += 1;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::models::{Interval, ProductionEntry, StatusEntry};
    use crate::store::{DerivedTable, IngestStore, MemoryStore};
    use chrono::{DateTime, TimeZone, Utc};

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, h, m, 0).unwrap()
    }

    fn sample_tree() -> PayloadTree {
        let mut hour = HourEntry::new(at(0, 0));
        hour.statuses.insert(
            "Run".to_string(),
            StatusEntry {
                count: 5,
                duration_seconds: 3600,
                intervals: vec![Interval::new(at(0, 0), at(1, 0))],
            },
        );
        hour.statuses.insert("Idle".to_string(), StatusEntry::default());
        hour.production.push(ProductionEntry {
            recipe: "RecipeA".to_string(),
            good: 10,
            reject: 1,
            total: 11,
            intervals: vec![
                Interval::new(at(0, 0), at(0, 30)),
                Interval::new(at(0, 30), at(0, 45)),
            ],
        });

        PayloadTree {
            meta: PayloadMeta {
                timespan: Some("1h".to_string()),
                start_utc: Some(at(0, 0)),
                end_utc: Some(at(1, 0)),
            },
            hours: vec![hour],
        }
    }

    #[tokio::test]
    async fn test_project_writes_all_tables() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let stats = ProjectionWriter::project(&mut tx, 1, "M1", &sample_tree())
            .await
            .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(
            stats,
            ProjectionStats {
                hours: 1,
                status_summaries: 2,
                status_intervals: 1,
                production_summaries: 1,
                production_intervals: 2,
            }
        );

        let tables = store.tables().unwrap();
        assert_eq!(tables.derived_rows(), stats.total());

        let bucket = tables.hour_buckets.values().next().unwrap();
        assert_eq!(bucket.timespan.as_deref(), Some("1h"));
        assert_eq!(bucket.payload_end_utc, Some(at(1, 0)));

        let interval = tables.status_intervals.values().next().unwrap();
        assert_eq!(interval.status_name, "Run");
        assert_eq!(interval.duration_seconds, 3600.0);

        let durations: Vec<f64> = tables
            .production_intervals
            .values()
            .map(|row| row.duration_seconds)
            .collect();
        assert_eq!(durations, vec![1800.0, 900.0]);
    }

    #[tokio::test]
    async fn test_duplicate_hours_collapse_to_later_values() {
        let mut tree = sample_tree();
        let mut later = HourEntry::new(at(0, 0));
        later.statuses.insert(
            "Run".to_string(),
            StatusEntry {
                count: 9,
                duration_seconds: 120,
                intervals: Vec::new(),
            },
        );
        tree.hours.push(later);

        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let stats = ProjectionWriter::project(&mut tx, 1, "M1", &tree).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(stats.hours, 2);
        let tables = store.tables().unwrap();
        assert_eq!(tables.row_count(DerivedTable::HourBuckets), 1);
        let run = &tables.status_summaries[&("M1".to_string(), at(0, 0), "Run".to_string())];
        assert_eq!(run.occurrence_count, 9);
        assert_eq!(run.duration_seconds, 120);
    }

    #[tokio::test]
    async fn test_rows_are_scoped_by_machine() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        ProjectionWriter::project(&mut tx, 1, "M1", &sample_tree()).await.unwrap();
        ProjectionWriter::project(&mut tx, 2, "M2", &sample_tree()).await.unwrap();
        tx.commit().await.unwrap();

        let tables = store.tables().unwrap();
        assert_eq!(tables.row_count(DerivedTable::HourBuckets), 2);
        assert_eq!(tables.row_count(DerivedTable::StatusSummaries), 4);
    }

    #[tokio::test]
    async fn test_empty_tree_writes_nothing() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let stats = ProjectionWriter::project(&mut tx, 1, "M1", &PayloadTree::default())
            .await
            .unwrap();
        assert_eq!(stats.total(), 0);
    }
}
