//! Shared helpers for hmi-ingest integration tests
//!
//! - telemetry document fixtures
//! - a PostgreSQL container with the bundled migrations applied
//!   (Docker required)

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use anyhow::{Context, Result};
use serde_json::{json, Value};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;
use testcontainers::{core::IntoContainerPort, runners::AsyncRunner, ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tracing::info;

pub fn init_test_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,hmi_ingest=debug,sqlx=warn,testcontainers=info")
        }))
        .with_test_writer()
        .try_init();
}

// ============================================================================
// Fixtures
// ============================================================================

pub fn interval(start: &str, end: &str) -> Value {
    json!({ "start": start, "end": end })
}

/// Two hours, two statuses in the first, one recipe per hour
pub fn sample_document() -> Value {
    json!({
        "timespan": "2h",
        "start": "2024-01-01T00:00:00Z",
        "end": "2024-01-01T02:00:00Z",
        "hours": [
            {
                "hour": "2024-01-01T00:00:00Z",
                "status": {
                    "Run": {
                        "count": 5,
                        "duration": 3600,
                        "intervals": [interval("2024-01-01T00:00:00Z", "2024-01-01T01:00:00Z")]
                    },
                    "Idle": { "count": 0, "duration": 0 }
                },
                "production": {
                    "RecipeA": {
                        "good": 10, "reject": 1, "total": 11,
                        "intervals": [interval("2024-01-01T00:05:00Z", "2024-01-01T00:50:00Z")]
                    }
                }
            },
            {
                "hour": "2024-01-01T01:00:00Z",
                "status": {
                    "Stop": {
                        "count": 2,
                        "duration": 600,
                        "intervals": [
                            interval("2024-01-01T01:00:00Z", "2024-01-01T01:05:00Z"),
                            interval("2024-01-01T01:30:00Z", "2024-01-01T01:35:00Z")
                        ]
                    }
                },
                "production": {
                    "RecipeB": { "good": 4, "reject": 0, "total": 4 }
                }
            }
        ]
    })
}

pub fn sample_text() -> String {
    sample_document().to_string()
}

// ============================================================================
// PostgreSQL Test Container
// ============================================================================

pub struct TestPostgres {
    _container: ContainerAsync<Postgres>,
    pool: PgPool,
}

impl TestPostgres {
    /// Start PostgreSQL 16 with migrations applied
    pub async fn start() -> Result<Self> {
        info!("Starting PostgreSQL test container...");

        let container = Postgres::default()
            .with_tag("16-alpine")
            .start()
            .await
            .context("Failed to start PostgreSQL container")?;

        let host = container
            .get_host()
            .await
            .context("Failed to get container host")?;
        let port = container
            .get_host_port_ipv4(5432.tcp())
            .await
            .context("Failed to get container port")?;

        let connection_string =
            format!("postgresql://postgres:postgres@{}:{}/postgres", host, port);

        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(30))
            .connect(&connection_string)
            .await
            .context("Failed to connect to PostgreSQL")?;

        hmi_ingest::db::run_migrations(&pool)
            .await
            .context("Failed to run migrations")?;

        Ok(Self {
            _container: container,
            pool,
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn count(&self, table: &str) -> i64 {
        sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
            .fetch_one(&self.pool)
            .await
            .expect("count query failed")
    }
}
