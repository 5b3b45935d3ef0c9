//! Logging and metrics setup for the daemon.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use gatewarden_core::{config::TelemetryConfig, Error, Result};

use crate::metrics::setup_metrics_exporter;

/// Install the global tracing subscriber, and the Prometheus exporter when
/// `metrics_addr` is set. `RUST_LOG` overrides the configured filter.
pub fn configure_tracing(config: &TelemetryConfig) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_filter));

    let registry = tracing_subscriber::registry().with(env_filter);
    let installed = if config.json_logs {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(false))
            .try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };
    installed.map_err(|e| Error::config(format!("Failed to install tracing subscriber: {}", e)))?;

    if let Some(addr) = &config.metrics_addr {
        setup_metrics_exporter(addr)?;
    }
    Ok(())
}
