use prometheus::{IntCounter, IntCounterVec, Opts};
use tracing::warn;

/// Counters for the consistency protocol between blob store and index
#[derive(Clone)]
pub struct AssetMetrics {
    pub orphans_enqueued: IntCounterVec,
    pub orphans_lost: IntCounter,
    pub blob_delete_failures: IntCounter,
}

impl AssetMetrics {
    pub fn new(service: &str) -> Self {
        let registry = prometheus::default_registry();

        let orphans_enqueued = IntCounterVec::new(
            Opts::new(
                "asset_orphans_enqueued_total",
                "Blob keys recorded for the orphan sweep",
            )
            .const_label("service", service.to_string()),
            &["reason"],
        )
        .expect("valid metric opts for asset_orphans_enqueued_total");

        let orphans_lost = IntCounter::with_opts(
            Opts::new(
                "asset_orphans_lost_total",
                "Orphan blob keys that could not be recorded",
            )
            .const_label("service", service.to_string()),
        )
        .expect("valid metric opts for asset_orphans_lost_total");

        let blob_delete_failures = IntCounter::with_opts(
            Opts::new(
                "asset_blob_delete_failures_total",
                "Blob deletes downgraded to warnings",
            )
            .const_label("service", service.to_string()),
        )
        .expect("valid metric opts for asset_blob_delete_failures_total");

        for metric in [
            Box::new(orphans_enqueued.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(orphans_lost.clone()),
            Box::new(blob_delete_failures.clone()),
        ] {
            if let Err(e) = registry.register(metric) {
                warn!("Failed to register asset metric: {}", e);
            }
        }

        Self {
            orphans_enqueued,
            orphans_lost,
            blob_delete_failures,
        }
    }
}
