//! PostgreSQL-backed [`diffcalc_core::DiffMetricStore`] (§6, §6A).
//!
//! Stores `DiffMetric` rows and `ProblemImage` rows in two tables. Table
//! names are validated as plain identifiers before being interpolated into
//! DDL/DML, the same discipline `dashflow-postgres-checkpointer` applies to
//! its own configurable table name.
//!
//! # Example
//!
//! ```rust,ignore
//! use diffcalc_postgres::PostgresDiffMetricStore;
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = PostgresDiffMetricStore::new(
//!         "host=localhost user=postgres password=postgres dbname=diffcalc",
//!     )
//!     .await?;
//!     Ok(())
//! }
//! ```

mod error;

pub use error::Error;

use std::future::Future;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use diffcalc_core::{Digest, DiffMetric, DiffMetricStore, Result as CoreResult};
use tokio_postgres::{Client, NoTls};
use tracing::{error, warn};

const DEFAULT_METRICS_TABLE: &str = "diff_metrics";
const DEFAULT_PROBLEMS_TABLE: &str = "problem_images";
const MAX_ATTEMPTS: u32 = 3;

/// A `DiffMetricStore` backed by a `PostgreSQL` connection.
pub struct PostgresDiffMetricStore {
    client: Client,
    metrics_table: String,
    problems_table: String,
}

impl PostgresDiffMetricStore {
    /// Connects and ensures the default tables exist.
    pub async fn new(connection_string: &str) -> Result<Self, Error> {
        Self::with_table_names(connection_string, DEFAULT_METRICS_TABLE, DEFAULT_PROBLEMS_TABLE).await
    }

    /// Connects and ensures the given tables exist.
    pub async fn with_table_names(connection_string: &str, metrics_table: &str, problems_table: &str) -> Result<Self, Error> {
        error::validate_identifier(metrics_table)?;
        error::validate_identifier(problems_table)?;

        let (client, connection) = tokio_postgres::connect(connection_string, NoTls).await?;
        tokio::spawn(async move {
            if let Err(err) = connection.await {
                error!(error = %err, "postgres connection closed with error");
            }
        });

        let store = Self { client, metrics_table: metrics_table.to_string(), problems_table: problems_table.to_string() };
        store.ensure_schema().await?;
        Ok(store)
    }

    async fn ensure_schema(&self) -> Result<(), Error> {
        let create_metrics = format!(
            "CREATE TABLE IF NOT EXISTS {} (
                left_digest BYTEA NOT NULL,
                right_digest BYTEA NOT NULL,
                num_pixels_diff BIGINT NOT NULL,
                percent_pixels_diff REAL NOT NULL,
                max_rgba_diffs SMALLINT[] NOT NULL,
                max_channel_diff SMALLINT NOT NULL,
                combined_metric REAL NOT NULL,
                dimensions_differ BOOLEAN NOT NULL,
                ts_millis BIGINT NOT NULL,
                PRIMARY KEY (left_digest, right_digest)
            )",
            self.metrics_table
        );
        self.client.execute(&create_metrics, &[]).await?;

        let create_problems = format!(
            "CREATE TABLE IF NOT EXISTS {} (
                digest TEXT PRIMARY KEY,
                num_errors INTEGER NOT NULL,
                latest_error TEXT NOT NULL,
                error_ts_millis BIGINT NOT NULL
            )",
            self.problems_table
        );
        self.client.execute(&create_problems, &[]).await?;
        Ok(())
    }

    async fn with_retry<T, F, Fut>(&self, mut op: F) -> Result<T, Error>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, tokio_postgres::Error>>,
    {
        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt + 1 < MAX_ATTEMPTS && is_transient(&err) => {
                    attempt += 1;
                    let backoff = Duration::from_millis(50 * 2u64.pow(attempt));
                    warn!(attempt, backoff_ms = backoff.as_millis() as u64, error = %err, "retrying transient postgres error");
                    tokio::time::sleep(backoff).await;
                }
                Err(err) if attempt > 0 => return Err(Error::RetriesExhausted { attempts: attempt + 1, reason: err.to_string() }),
                Err(err) => return Err(Error::Postgres(err)),
            }
        }
    }
}

fn is_transient(err: &tokio_postgres::Error) -> bool {
    // Errors the server reported explicitly (constraint violations, bad SQL)
    // are not worth retrying; I/O-level failures (dropped connection, reset)
    // are.
    err.as_db_error().is_none()
}

fn millis_since_epoch(ts: SystemTime) -> i64 {
    ts.duration_since(SystemTime::UNIX_EPOCH).map(|d| d.as_millis() as i64).unwrap_or(0)
}

fn millis_to_system_time(millis: i64) -> SystemTime {
    if millis >= 0 {
        SystemTime::UNIX_EPOCH + Duration::from_millis(millis as u64)
    } else {
        SystemTime::UNIX_EPOCH - Duration::from_millis((-millis) as u64)
    }
}

#[async_trait]
impl DiffMetricStore for PostgresDiffMetricStore {
    async fn write_batch(&self, rows: &[DiffMetric]) -> CoreResult<()> {
        for row in rows {
            let max_rgba: Vec<i16> = row.max_rgba_diffs.iter().map(|&b| i16::from(b)).collect();
            let stmt = format!(
                "INSERT INTO {} (left_digest, right_digest, num_pixels_diff, percent_pixels_diff,
                    max_rgba_diffs, max_channel_diff, combined_metric, dimensions_differ, ts_millis)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                 ON CONFLICT (left_digest, right_digest) DO NOTHING",
                self.metrics_table
            );
            self.with_retry(|| {
                let stmt = &stmt;
                let left = row.left.as_bytes().as_slice();
                let right = row.right.as_bytes().as_slice();
                let max_channel_diff = i16::from(row.max_channel_diff);
                let ts_millis = millis_since_epoch(row.ts);
                async move {
                    self.client
                        .execute(
                            stmt,
                            &[
                                &left,
                                &right,
                                &(row.num_pixels_diff as i64),
                                &row.percent_pixels_diff,
                                &max_rgba,
                                &max_channel_diff,
                                &row.combined_metric,
                                &row.dimensions_differ,
                                &ts_millis,
                            ],
                        )
                        .await
                }
            })
            .await
            .map_err(diffcalc_core::Error::from)?;
        }
        Ok(())
    }

    async fn read_existing_pairs(&self, left: &[Digest], right: &[Digest]) -> CoreResult<Vec<(Digest, Digest)>> {
        if left.is_empty() || right.is_empty() {
            return Ok(Vec::new());
        }
        let left_bytes: Vec<Vec<u8>> = left.iter().map(|d| d.as_bytes().to_vec()).collect();
        let right_bytes: Vec<Vec<u8>> = right.iter().map(|d| d.as_bytes().to_vec()).collect();
        let stmt = format!(
            "SELECT left_digest, right_digest FROM {} WHERE left_digest = ANY($1) AND right_digest = ANY($2)",
            self.metrics_table
        );
        let rows = self
            .with_retry(|| {
                let stmt = &stmt;
                let left_bytes = &left_bytes;
                let right_bytes = &right_bytes;
                async move { self.client.query(stmt, &[left_bytes, right_bytes]).await }
            })
            .await
            .map_err(diffcalc_core::Error::from)?;

        let mut pairs = Vec::with_capacity(rows.len());
        for row in &rows {
            let l: Vec<u8> = row.get(0);
            let r: Vec<u8> = row.get(1);
            let l: [u8; diffcalc_core::DIGEST_LEN] = l
                .try_into()
                .map_err(|_| diffcalc_core::Error::InvariantViolation("stored left_digest has wrong length".to_string()))?;
            let r: [u8; diffcalc_core::DIGEST_LEN] = r
                .try_into()
                .map_err(|_| diffcalc_core::Error::InvariantViolation("stored right_digest has wrong length".to_string()))?;
            pairs.push((Digest::from_bytes(l), Digest::from_bytes(r)));
        }
        Ok(pairs)
    }

    async fn upsert_problem_image(&self, digest: Digest, error_message: &str, error_ts: SystemTime) -> CoreResult<()> {
        let stmt = format!(
            "INSERT INTO {} (digest, num_errors, latest_error, error_ts_millis)
             VALUES ($1, 1, $2, $3)
             ON CONFLICT (digest) DO UPDATE SET
                num_errors = {}.num_errors + 1,
                latest_error = EXCLUDED.latest_error,
                error_ts_millis = EXCLUDED.error_ts_millis",
            self.problems_table, self.problems_table
        );
        let hex = digest.to_hex();
        let ts_millis = millis_since_epoch(error_ts);
        self.with_retry(|| {
            let stmt = &stmt;
            let hex = &hex;
            async move { self.client.execute(stmt, &[hex, error_message, &ts_millis]).await }
        })
        .await
        .map_err(diffcalc_core::Error::from)?;
        Ok(())
    }
}
