//! Supervision metrics recorded through the `metrics` facade.

use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Duration;

use gatewarden_core::{Error, Result};

/// Install the Prometheus recorder and serve it on `addr`.
pub fn setup_metrics_exporter(addr: &str) -> Result<()> {
    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| Error::config(format!("Invalid metrics address {}: {}", addr, e)))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| Error::internal(format!("Failed to install Prometheus recorder: {}", e)))?;

    tracing::info!(addr = %addr, "Prometheus metrics exporter listening");
    Ok(())
}

/// Count a gateway start attempt by outcome (`ready`, `throttled`, `timeout`, ...).
pub fn record_start(outcome: &'static str) {
    metrics::counter!("gateway_start_attempts_total", "outcome" => outcome).increment(1);
}

pub fn record_startup_duration(elapsed: Duration) {
    metrics::histogram!("gateway_startup_duration_seconds").record(elapsed.as_secs_f64());
}

pub fn record_reaped(found: usize, killed: usize) {
    metrics::counter!("gateway_zombies_found_total").increment(found as u64);
    metrics::counter!("gateway_zombies_reaped_total").increment(killed as u64);
}

pub fn record_listing_error() {
    metrics::counter!("process_listing_errors_total").increment(1);
}

/// Track the outcome of a state sync or restore run.
pub fn record_sync(operation: &'static str, success: bool) {
    let outcome = if success { "ok" } else { "error" };
    metrics::counter!("state_sync_runs_total", "operation" => operation, "outcome" => outcome)
        .increment(1);
}
