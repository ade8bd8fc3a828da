//! # Reconciliation Outbox for Orphan Blobs
//!
//! Writes to the blob store happen before the relational index is updated, so a
//! failure between the two steps leaves an object in the blob store that no
//! index row points at. The writer records the key here and an out-of-band
//! sweep removes it later.
//!
//! ## Guarantees
//!
//! - A record is only swept after a grace period, so an in-flight write whose
//!   outcome was unknown (timeout) has time to settle.
//! - Before deleting, the sweep asks the [`OrphanReaper`] whether the key is
//!   referenced. A referenced key is resolved without touching the blob.
//! - Failed sweep attempts are retried with exponential backoff up to a
//!   configured limit, then left for manual intervention.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use reconciliation_outbox::{OrphanRepository, SqlxOrphanRepository};
//!
//! async fn after_failed_insert(
//!     repo: &SqlxOrphanRepository,
//!     blob_key: &str,
//! ) -> Result<(), Box<dyn std::error::Error>> {
//!     repo.enqueue(blob_key, "insert-failed").await?;
//!     Ok(())
//! }
//! ```

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{PgPool, Row};
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

mod error;
pub mod metrics;
pub mod sweeper;

pub use error::{OutboxError, OutboxResult};
pub use sweeper::{OrphanSweeper, SweepConfig, SweepReport};

/// A blob key that may no longer be referenced by the index.
#[derive(Debug, Clone, Serialize)]
pub struct OrphanRecord {
    /// Unique identifier for this record
    pub id: Uuid,

    /// Blob store key (e.g. "images/{project_id}/{file_name}")
    pub blob_key: String,

    /// Why the key was recorded (e.g. "insert-failed")
    pub reason: String,

    /// When the record was written
    pub created_at: DateTime<Utc>,

    /// When the sweep settled the record (None = pending)
    pub resolved_at: Option<DateTime<Utc>>,

    /// How the record was settled ("reaped", "referenced")
    pub resolution: Option<String>,

    /// Number of failed sweep attempts
    pub retry_count: i32,

    /// Last error from a failed sweep attempt
    pub last_error: Option<String>,

    /// When the sweep last tried this record
    pub last_attempt_at: Option<DateTime<Utc>>,
}

impl OrphanRecord {
    pub fn new(blob_key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            blob_key: blob_key.into(),
            reason: reason.into(),
            created_at: Utc::now(),
            resolved_at: None,
            resolution: None,
            retry_count: 0,
            last_error: None,
            last_attempt_at: None,
        }
    }
}

/// Repository trait for the orphan backlog.
///
/// Writers only call [`OrphanRepository::enqueue`]; the remaining methods are
/// used by the sweep.
#[async_trait]
pub trait OrphanRepository: Send + Sync {
    /// Record a blob key as an orphan candidate.
    async fn enqueue(&self, blob_key: &str, reason: &str) -> OutboxResult<OrphanRecord>;

    /// Pending records created at least `grace` ago with fewer than
    /// `max_retries` failed attempts, oldest first.
    async fn get_due(
        &self,
        grace: Duration,
        max_retries: i32,
        limit: i64,
    ) -> OutboxResult<Vec<OrphanRecord>>;

    /// Settle a record.
    async fn mark_resolved(&self, id: Uuid, resolution: &str) -> OutboxResult<()>;

    /// Count a failed sweep attempt and keep the error for debugging.
    async fn mark_failed(&self, id: Uuid, error: &str) -> OutboxResult<()>;

    /// Pending count and oldest pending age (seconds). Age is 0 if none pending.
    async fn pending_stats(&self) -> OutboxResult<(i64, i64)>;
}

/// Decides whether a recorded key is still in use and deletes it if not.
#[async_trait]
pub trait OrphanReaper: Send + Sync {
    /// True if some index row still points at the blob.
    async fn is_referenced(&self, blob_key: &str) -> OutboxResult<bool>;

    /// Delete the blob. Deleting an absent key must succeed.
    async fn reap(&self, blob_key: &str) -> OutboxResult<()>;
}

/// PostgreSQL implementation backed by the `orphan_blobs` table.
pub struct SqlxOrphanRepository {
    pool: PgPool,
}

impl SqlxOrphanRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn record_from_row(row: &sqlx::postgres::PgRow) -> Result<OrphanRecord, sqlx::Error> {
    Ok(OrphanRecord {
        id: row.try_get("id")?,
        blob_key: row.try_get("blob_key")?,
        reason: row.try_get("reason")?,
        created_at: row.try_get("created_at")?,
        resolved_at: row.try_get("resolved_at")?,
        resolution: row.try_get("resolution")?,
        retry_count: row.try_get("retry_count")?,
        last_error: row.try_get("last_error")?,
        last_attempt_at: row.try_get("last_attempt_at")?,
    })
}

#[async_trait]
impl OrphanRepository for SqlxOrphanRepository {
    async fn enqueue(&self, blob_key: &str, reason: &str) -> OutboxResult<OrphanRecord> {
        let record = OrphanRecord::new(blob_key, reason);

        sqlx::query(
            r#"
            INSERT INTO orphan_blobs (id, blob_key, reason, created_at, retry_count)
            VALUES ($1, $2, $3, $4, 0)
            "#,
        )
        .bind(record.id)
        .bind(&record.blob_key)
        .bind(&record.reason)
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .context("Failed to insert orphan record")?;

        debug!(
            record_id = %record.id,
            blob_key = %record.blob_key,
            reason = %record.reason,
            "Orphan blob recorded"
        );

        Ok(record)
    }

    async fn get_due(
        &self,
        grace: Duration,
        max_retries: i32,
        limit: i64,
    ) -> OutboxResult<Vec<OrphanRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, blob_key, reason, created_at, resolved_at, resolution,
                   retry_count, last_error, last_attempt_at
            FROM orphan_blobs
            WHERE resolved_at IS NULL
              AND created_at <= NOW() - make_interval(secs => $1)
              AND retry_count < $2
            ORDER BY created_at ASC
            LIMIT $3
            "#,
        )
        .bind(grace.as_secs_f64())
        .bind(max_retries)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch due orphan records")?;

        let records = rows
            .into_iter()
            .map(|row| record_from_row(&row))
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .context("Failed to parse orphan records")?;

        debug!(count = records.len(), "Fetched due orphan records");

        Ok(records)
    }

    async fn mark_resolved(&self, id: Uuid, resolution: &str) -> OutboxResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE orphan_blobs
            SET resolved_at = NOW(),
                resolution = $2,
                last_attempt_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(resolution)
        .execute(&self.pool)
        .await
        .context("Failed to mark orphan record as resolved")?;

        if result.rows_affected() == 0 {
            warn!(record_id = %id, "Orphan record not found when marking as resolved");
            return Err(OutboxError::RecordNotFound(id));
        }

        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, error: &str) -> OutboxResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE orphan_blobs
            SET retry_count = retry_count + 1,
                last_error = $2,
                last_attempt_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await
        .context("Failed to mark orphan record as failed")?;

        if result.rows_affected() == 0 {
            warn!(record_id = %id, "Orphan record not found when marking as failed");
            return Err(OutboxError::RecordNotFound(id));
        }

        Ok(())
    }

    async fn pending_stats(&self) -> OutboxResult<(i64, i64)> {
        let rec = sqlx::query(
            r#"
            SELECT
                COUNT(*)::BIGINT AS pending,
                COALESCE(EXTRACT(EPOCH FROM (NOW() - MIN(created_at))), 0)::BIGINT AS age_seconds
            FROM orphan_blobs
            WHERE resolved_at IS NULL
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .context("Failed to compute pending stats")?;

        let pending: i64 = rec.try_get("pending").unwrap_or(0);
        let age: i64 = rec.try_get("age_seconds").unwrap_or(0);
        Ok((pending, age))
    }
}
