use prometheus::{IntCounter, IntGauge, Opts};
use tracing::warn;

#[derive(Clone)]
pub struct SweepMetrics {
    pub pending: IntGauge,
    pub oldest_pending_age_seconds: IntGauge,
    pub reaped: IntCounter,
    pub failed: IntCounter,
}

impl SweepMetrics {
    pub fn new(service: &str) -> Self {
        let registry = prometheus::default_registry();

        let pending = IntGauge::with_opts(
            Opts::new(
                "orphan_blobs_pending_count",
                "Number of orphan blob records waiting for the sweep",
            )
            .const_label("service", service.to_string()),
        )
        .expect("valid metric opts for orphan_blobs_pending_count");

        let oldest_pending_age_seconds = IntGauge::with_opts(
            Opts::new(
                "orphan_blobs_oldest_pending_age_seconds",
                "Age in seconds of the oldest unresolved orphan blob record",
            )
            .const_label("service", service.to_string()),
        )
        .expect("valid metric opts for orphan_blobs_oldest_pending_age_seconds");

        let reaped = IntCounter::with_opts(
            Opts::new(
                "orphan_blobs_reaped_total",
                "Total number of orphan blobs deleted by the sweep",
            )
            .const_label("service", service.to_string()),
        )
        .expect("valid metric opts for orphan_blobs_reaped_total");

        let failed = IntCounter::with_opts(
            Opts::new(
                "orphan_blobs_sweep_failures_total",
                "Total number of failed sweep attempts",
            )
            .const_label("service", service.to_string()),
        )
        .expect("valid metric opts for orphan_blobs_sweep_failures_total");

        for metric in [
            Box::new(pending.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(oldest_pending_age_seconds.clone()),
            Box::new(reaped.clone()),
            Box::new(failed.clone()),
        ] {
            if let Err(e) = registry.register(metric) {
                warn!("Failed to register sweep metric: {}", e);
            }
        }

        Self {
            pending,
            oldest_pending_age_seconds,
            reaped,
            failed,
        }
    }
}
