//! Background sweep that drains the orphan backlog.

use crate::metrics::SweepMetrics;
use crate::{OrphanReaper, OrphanRecord, OrphanRepository, OutboxResult};
use chrono::Utc;
use resilience::{exponential_backoff, BackoffConfig};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub const RESOLUTION_REAPED: &str = "reaped";
pub const RESOLUTION_REFERENCED: &str = "referenced";

#[derive(Debug, Clone)]
pub struct SweepConfig {
    /// Records per polling cycle
    pub batch_size: i64,
    /// Sleep between polling cycles
    pub poll_interval: Duration,
    /// Minimum age of a record before it is considered
    pub grace_period: Duration,
    /// Failed attempts after which a record is left for manual intervention
    pub max_retries: i32,
    /// Delay between attempts on the same record
    pub backoff: BackoffConfig,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            poll_interval: Duration::from_secs(60),
            grace_period: Duration::from_secs(15 * 60),
            max_retries: 5,
            backoff: BackoffConfig::default(),
        }
    }
}

/// Outcome counts of a single polling cycle.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub reaped: u32,
    pub still_referenced: u32,
    pub failed: u32,
    pub deferred: u32,
}

/// Polls the repository for due records and reaps unreferenced blobs.
///
/// - A key that is referenced again (e.g. an index write that committed after
///   its caller timed out) is resolved as `referenced` and left alone.
/// - A record that failed recently is deferred until its backoff has elapsed.
/// - A record that reaches `max_retries` is no longer fetched. It stays
///   pending (and counted in the pending gauge) for manual follow-up.
pub struct OrphanSweeper<R: OrphanRepository, P: OrphanReaper> {
    repository: Arc<R>,
    reaper: Arc<P>,
    config: SweepConfig,
    metrics: Option<SweepMetrics>,
}

impl<R: OrphanRepository, P: OrphanReaper> OrphanSweeper<R, P> {
    pub fn new(repository: Arc<R>, reaper: Arc<P>, config: SweepConfig) -> Self {
        Self {
            repository,
            reaper,
            config,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: SweepMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Run the sweep loop forever. Spawn it as a background task.
    pub async fn start(&self) {
        info!(
            batch_size = self.config.batch_size,
            poll_interval_secs = self.config.poll_interval.as_secs(),
            grace_period_secs = self.config.grace_period.as_secs(),
            max_retries = self.config.max_retries,
            "Orphan sweep starting"
        );

        loop {
            match self.run_once().await {
                Ok(report) if report.reaped > 0 || report.failed > 0 => {
                    info!(
                        reaped = report.reaped,
                        still_referenced = report.still_referenced,
                        failed = report.failed,
                        deferred = report.deferred,
                        "Orphan sweep cycle finished"
                    );
                }
                Ok(_) => debug!("No orphan blobs to reap"),
                Err(e) => error!(error = ?e, "Orphan sweep error"),
            }

            if let Some(metrics) = &self.metrics {
                if let Ok((pending, age)) = self.repository.pending_stats().await {
                    metrics.pending.set(pending);
                    metrics.oldest_pending_age_seconds.set(age);
                }
            }

            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    /// Process one batch of due records.
    pub async fn run_once(&self) -> OutboxResult<SweepReport> {
        let records = self
            .repository
            .get_due(
                self.config.grace_period,
                self.config.max_retries,
                self.config.batch_size,
            )
            .await?;
        let mut report = SweepReport::default();

        for record in records {
            if !self.backoff_elapsed(&record) {
                report.deferred += 1;
                continue;
            }

            match self.settle(&record).await {
                Ok(true) => {
                    report.reaped += 1;
                    if let Some(metrics) = &self.metrics {
                        metrics.reaped.inc();
                    }
                }
                Ok(false) => report.still_referenced += 1,
                Err(e) => {
                    report.failed += 1;
                    if let Some(metrics) = &self.metrics {
                        metrics.failed.inc();
                    }
                    warn!(
                        record_id = %record.id,
                        blob_key = %record.blob_key,
                        error = %e,
                        "Failed to reap orphan blob"
                    );
                    if let Err(mark_err) =
                        self.repository.mark_failed(record.id, &e.to_string()).await
                    {
                        error!(record_id = %record.id, error = ?mark_err, "Failed to mark orphan record as failed");
                    } else if record.retry_count + 1 >= self.config.max_retries {
                        error!(
                            record_id = %record.id,
                            blob_key = %record.blob_key,
                            retries = record.retry_count + 1,
                            "Orphan record exhausted its retries (requires manual intervention)"
                        );
                    }
                }
            }
        }

        Ok(report)
    }

    /// Returns true if the blob was deleted, false if it is still referenced.
    async fn settle(&self, record: &OrphanRecord) -> OutboxResult<bool> {
        if self.reaper.is_referenced(&record.blob_key).await? {
            debug!(blob_key = %record.blob_key, "Orphan candidate is referenced, keeping blob");
            self.repository
                .mark_resolved(record.id, RESOLUTION_REFERENCED)
                .await?;
            return Ok(false);
        }

        self.reaper.reap(&record.blob_key).await?;
        self.repository
            .mark_resolved(record.id, RESOLUTION_REAPED)
            .await?;
        debug!(blob_key = %record.blob_key, reason = %record.reason, "Orphan blob reaped");
        Ok(true)
    }

    fn backoff_elapsed(&self, record: &OrphanRecord) -> bool {
        let Some(last_attempt) = record.last_attempt_at else {
            return true;
        };
        if record.retry_count == 0 {
            return true;
        }
        let wait = exponential_backoff(&self.config.backoff, (record.retry_count - 1) as u32);
        let since = Utc::now()
            .signed_duration_since(last_attempt)
            .to_std()
            .unwrap_or_default();
        since >= wait
    }
}
