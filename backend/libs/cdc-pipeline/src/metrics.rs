use prometheus::{IntCounter, IntCounterVec, Opts};
use tracing::warn;

/// Prometheus counters for the CDC pipeline.
///
/// Registered on the default registry. Cloning shares the underlying counters.
#[derive(Clone)]
pub struct PipelineMetrics {
    pub records_dispatched: IntCounter,
    pub records_ignored: IntCounter,
    pub records_skipped: IntCounter,
    /// Labelled by failure kind: `decode` or `dispatch`
    pub records_failed: IntCounterVec,
    pub dead_lettered: IntCounter,
    pub dead_letter_publish_failures: IntCounter,
    pub batches_committed: IntCounter,
}

impl PipelineMetrics {
    pub fn new(service: &str) -> Result<Self, prometheus::Error> {
        let registry = prometheus::default_registry();

        let counter = |name: &str, help: &str| {
            IntCounter::with_opts(Opts::new(name, help).const_label("service", service))
        };

        let records_dispatched = counter(
            "cdc_records_dispatched_total",
            "Total CDC records handled by a change handler",
        )?;
        let records_ignored = counter(
            "cdc_records_ignored_total",
            "Total CDC records with an unknown operation",
        )?;
        let records_skipped = counter(
            "cdc_records_skipped_total",
            "Total tombstone and heartbeat records skipped",
        )?;
        let records_failed = IntCounterVec::new(
            Opts::new(
                "cdc_records_failed_total",
                "Total CDC records that failed decoding or dispatch",
            )
            .const_label("service", service),
            &["kind"],
        )?;
        let dead_lettered = counter(
            "cdc_dead_lettered_total",
            "Total records republished to a dead-letter topic",
        )?;
        let dead_letter_publish_failures = counter(
            "cdc_dead_letter_publish_failures_total",
            "Total dead-letter publishes that failed",
        )?;
        let batches_committed = counter(
            "cdc_batches_committed_total",
            "Total partition batches whose offsets were committed",
        )?;

        for metric in [
            Box::new(records_dispatched.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(records_ignored.clone()),
            Box::new(records_skipped.clone()),
            Box::new(records_failed.clone()),
            Box::new(dead_lettered.clone()),
            Box::new(dead_letter_publish_failures.clone()),
            Box::new(batches_committed.clone()),
        ] {
            if let Err(e) = registry.register(metric) {
                warn!("Failed to register CDC pipeline metric: {}", e);
            }
        }

        Ok(Self {
            records_dispatched,
            records_ignored,
            records_skipped,
            records_failed,
            dead_lettered,
            dead_letter_publish_failures,
            batches_committed,
        })
    }
}
