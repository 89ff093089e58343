//! PostgreSQL backend
//!
//! Every derived-table write is an `INSERT ... ON CONFLICT (natural key)
//! DO UPDATE SET col = EXCLUDED.col` statement.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use tracing::debug;

use super::{IngestStore, IngestTx};
use crate::error::{IngestError, IngestResult};
use crate::models::{
    HourBucketRow, IngestionRecord, IngestionStatus, LedgerEntry, PayloadMeta,
    ProductionIntervalRow, ProductionSummaryRow, StatusIntervalRow, StatusSummaryRow,
};

#[derive(Clone)]
pub struct PgIngestStore {
    pool: PgPool,
}

impl PgIngestStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[derive(sqlx::FromRow)]
struct IngestionRow {
    id: i64,
    machine_id: String,
    file_name: String,
    content_hash: String,
    status: String,
    error_message: Option<String>,
    timespan: Option<String>,
    payload_start_utc: Option<DateTime<Utc>>,
    payload_end_utc: Option<DateTime<Utc>>,
}

impl TryFrom<IngestionRow> for IngestionRecord {
    type Error = IngestError;

    fn try_from(row: IngestionRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            machine_id: row.machine_id,
            file_name: row.file_name,
            content_hash: row.content_hash.trim_end().to_string(),
            status: parse_status(&row.status)?,
            error_message: row.error_message,
            timespan: row.timespan,
            payload_start_utc: row.payload_start_utc,
            payload_end_utc: row.payload_end_utc,
        })
    }
}

fn parse_status(value: &str) -> IngestResult<IngestionStatus> {
    value.parse().map_err(IngestError::store)
}

#[async_trait]
impl IngestStore for PgIngestStore {
    type Tx = PgIngestTx;

    async fn begin(&self) -> IngestResult<PgIngestTx> {
        let tx = self.pool.begin().await?;
        Ok(PgIngestTx { tx })
    }

    async fn mark_failed(&self, ingestion_id: i64, message: &str) -> IngestResult<bool> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE ingestions
            SET status = $2, error_message = $3, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(ingestion_id)
        .bind(IngestionStatus::Failed.as_str())
        .bind(message)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(result.rows_affected() > 0)
    }

    async fn find_record(&self, content_hash: &str) -> IngestResult<Option<IngestionRecord>> {
        let row = sqlx::query_as::<_, IngestionRow>(
            r#"
            SELECT id, machine_id, file_name, content_hash, status, error_message,
                   timespan, payload_start_utc, payload_end_utc
            FROM ingestions
            WHERE content_hash = $1
            ORDER BY id DESC
            LIMIT 1
            "#,
        )
        .bind(content_hash)
        .fetch_optional(&self.pool)
        .await?;

        row.map(IngestionRecord::try_from).transpose()
    }
}

pub struct PgIngestTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl IngestTx for PgIngestTx {
    async fn find_by_hash(&mut self, content_hash: &str) -> IngestResult<Option<LedgerEntry>> {
        let row: Option<(i64, String, String)> = sqlx::query_as(
            r#"
            SELECT id, status, machine_id
            FROM ingestions
            WHERE content_hash = $1
            ORDER BY id DESC
            LIMIT 1
            "#,
        )
        .bind(content_hash)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.map(|(id, status, machine_id)| {
            Ok(LedgerEntry {
                id,
                status: parse_status(&status)?,
                machine_id,
            })
        })
        .transpose()
    }

    async fn insert_ingestion(
        &mut self,
        machine_id: &str,
        file_name: &str,
        content_hash: &str,
    ) -> IngestResult<i64> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO ingestions (machine_id, file_name, content_hash, status)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(machine_id)
        .bind(file_name)
        .bind(content_hash)
        .bind(IngestionStatus::Processing.as_str())
        .fetch_one(&mut *self.tx)
        .await?;

        debug!(ingestion_id = id, content_hash, "Inserted ingestion record");
        Ok(id)
    }

    async fn insert_raw_payload(&mut self, ingestion_id: i64, raw_text: &str) -> IngestResult<()> {
        sqlx::query(
            r#"
            INSERT INTO raw_payloads (ingestion_id, raw_text)
            VALUES ($1, $2)
            ON CONFLICT (ingestion_id) DO NOTHING
            "#,
        )
        .bind(ingestion_id)
        .bind(raw_text)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn reset_to_processing(&mut self, ingestion_id: i64) -> IngestResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE ingestions
            SET status = $2, error_message = NULL, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(ingestion_id)
        .bind(IngestionStatus::Processing.as_str())
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(IngestError::store(format!(
                "ingestion {} not found",
                ingestion_id
            )));
        }
        Ok(())
    }

    async fn finalize(&mut self, ingestion_id: i64, meta: &PayloadMeta) -> IngestResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE ingestions
            SET status = $2,
                error_message = NULL,
                timespan = $3,
                payload_start_utc = $4,
                payload_end_utc = $5,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(ingestion_id)
        .bind(IngestionStatus::Imported.as_str())
        .bind(meta.timespan.as_deref())
        .bind(meta.start_utc)
        .bind(meta.end_utc)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(IngestError::store(format!(
                "ingestion {} not found",
                ingestion_id
            )));
        }
        Ok(())
    }

    async fn upsert_hour_bucket(&mut self, row: &HourBucketRow) -> IngestResult<()> {
        sqlx::query(
            r#"
            INSERT INTO hour_buckets (
                machine_id, hour_start_utc, timespan,
                payload_start_utc, payload_end_utc, ingestion_id
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (machine_id, hour_start_utc) DO UPDATE SET
                timespan = EXCLUDED.timespan,
                payload_start_utc = EXCLUDED.payload_start_utc,
                payload_end_utc = EXCLUDED.payload_end_utc,
                ingestion_id = EXCLUDED.ingestion_id
            "#,
        )
        .bind(&row.machine_id)
        .bind(row.hour_start_utc)
        .bind(row.timespan.as_deref())
        .bind(row.payload_start_utc)
        .bind(row.payload_end_utc)
        .bind(row.ingestion_id)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn upsert_status_summary(&mut self, row: &StatusSummaryRow) -> IngestResult<()> {
        sqlx::query(
            r#"
            INSERT INTO status_summaries (
                machine_id, hour_start_utc, status_name,
                occurrence_count, duration_seconds, ingestion_id
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (machine_id, hour_start_utc, status_name) DO UPDATE SET
                occurrence_count = EXCLUDED.occurrence_count,
                duration_seconds = EXCLUDED.duration_seconds,
                ingestion_id = EXCLUDED.ingestion_id
            "#,
        )
        .bind(&row.machine_id)
        .bind(row.hour_start_utc)
        .bind(&row.status_name)
        .bind(row.occurrence_count)
        .bind(row.duration_seconds)
        .bind(row.ingestion_id)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn upsert_status_interval(&mut self, row: &StatusIntervalRow) -> IngestResult<()> {
        sqlx::query(
            r#"
            INSERT INTO status_intervals (
                machine_id, hour_start_utc, status_name,
                interval_start_utc, interval_end_utc, duration_seconds, ingestion_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (machine_id, hour_start_utc, status_name, interval_start_utc, interval_end_utc)
            DO UPDATE SET
                duration_seconds = EXCLUDED.duration_seconds,
                ingestion_id = EXCLUDED.ingestion_id
            "#,
        )
        .bind(&row.machine_id)
        .bind(row.hour_start_utc)
        .bind(&row.status_name)
        .bind(row.interval_start_utc)
        .bind(row.interval_end_utc)
        .bind(row.duration_seconds)
        .bind(row.ingestion_id)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn upsert_production_summary(&mut self, row: &ProductionSummaryRow) -> IngestResult<()> {
        sqlx::query(
            r#"
            INSERT INTO production_summaries (
                machine_id, hour_start_utc, recipe_name,
                good_count, reject_count, total_count, ingestion_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (machine_id, hour_start_utc, recipe_name) DO UPDATE SET
                good_count = EXCLUDED.good_count,
                reject_count = EXCLUDED.reject_count,
                total_count = EXCLUDED.total_count,
                ingestion_id = EXCLUDED.ingestion_id
            "#,
        )
        .bind(&row.machine_id)
        .bind(row.hour_start_utc)
        .bind(&row.recipe_name)
        .bind(row.good_count)
        .bind(row.reject_count)
        .bind(row.total_count)
        .bind(row.ingestion_id)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn upsert_production_interval(
        &mut self,
        row: &ProductionIntervalRow,
    ) -> IngestResult<()> {
        sqlx::query(
            r#"
            INSERT INTO production_intervals (
                machine_id, hour_start_utc, recipe_name,
                interval_start_utc, interval_end_utc, duration_seconds, ingestion_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (machine_id, hour_start_utc, recipe_name, interval_start_utc, interval_end_utc)
            DO UPDATE SET
                duration_seconds = EXCLUDED.duration_seconds,
                ingestion_id = EXCLUDED.ingestion_id
            "#,
        )
        .bind(&row.machine_id)
        .bind(row.hour_start_utc)
        .bind(&row.recipe_name)
        .bind(row.interval_start_utc)
        .bind(row.interval_end_utc)
        .bind(row.duration_seconds)
        .bind(row.ingestion_id)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn commit(self) -> IngestResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> IngestResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
