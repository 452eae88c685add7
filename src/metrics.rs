use std::sync::OnceLock;

use opentelemetry::{
    global,
    metrics::{Counter, Histogram},
};
use prometheus::{IntGaugeVec, Opts};

/// Process-wide metrics, lazily initialized once at startup.
pub struct Metrics {
    pub commits_observed: Counter<u64>,
    pub webhook_events_received: Counter<u64>,
    pub webhook_signature_failures: Counter<u64>,
    pub bundles_built: Counter<u64>,
    pub bundle_build_duration_seconds: Histogram<f64>,
    pub bundle_deployments_transitioned: Counter<u64>,
    pub rollout_stalls: Counter<u64>,
    pub helm_releases_applied: Counter<u64>,
    pub helm_release_duration_seconds: Histogram<f64>,
    pub drift_detections: IntGaugeVec,
    pub reconcile_errors: IntGaugeVec,
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

pub fn init(registry: &prometheus::Registry) -> Result<(), anyhow::Error> {
    let meter = global::meter("gitjobctl");

    let drift_detections = IntGaugeVec::new(
        Opts::new(
            "gitjobctl_drift_detections",
            "Count of resources currently classified Modified/Missing/Orphaned",
        ),
        &["bundle_deployment", "classification"],
    )?;
    registry.register(Box::new(drift_detections.clone()))?;

    let reconcile_errors = IntGaugeVec::new(
        Opts::new(
            "gitjobctl_reconcile_errors",
            "Count of reconciliation errors by controller and error kind",
        ),
        &["controller", "kind"],
    )?;
    registry.register(Box::new(reconcile_errors.clone()))?;

    let metrics = Metrics {
        commits_observed: meter.u64_counter("gitjobctl_commits_observed_total").init(),
        webhook_events_received: meter
            .u64_counter("gitjobctl_webhook_events_received_total")
            .init(),
        webhook_signature_failures: meter
            .u64_counter("gitjobctl_webhook_signature_failures_total")
            .init(),
        bundles_built: meter.u64_counter("gitjobctl_bundles_built_total").init(),
        bundle_build_duration_seconds: meter
            .f64_histogram("gitjobctl_bundle_build_duration_seconds")
            .init(),
        bundle_deployments_transitioned: meter
            .u64_counter("gitjobctl_bundle_deployments_transitioned_total")
            .init(),
        rollout_stalls: meter.u64_counter("gitjobctl_rollout_stalls_total").init(),
        helm_releases_applied: meter
            .u64_counter("gitjobctl_helm_releases_applied_total")
            .init(),
        helm_release_duration_seconds: meter
            .f64_histogram("gitjobctl_helm_release_duration_seconds")
            .init(),
        drift_detections,
        reconcile_errors,
    };

    METRICS
        .set(metrics)
        .map_err(|_| anyhow::anyhow!("Metrics already initialized"))?;

    Ok(())
}

#[allow(clippy::expect_used)]
pub fn get() -> &'static Metrics {
    METRICS
        .get()
        .expect("Metrics not initialized - call metrics::init() first")
}
