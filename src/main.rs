#![deny(unused)]
//! Gatewarden - gateway supervisor and state sync daemon.
//!
//! Keeps exactly one gateway process alive inside a sandbox container and
//! mirrors its state to object storage so a fresh sandbox can pick up where
//! the last one left off.

use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;

use gatewarden_core::config::AppConfig;
use gatewarden_sandbox::{DockerSandbox, SandboxBackend};
use gatewarden_store::open_store;
use gatewarden_supervisor::{configure_tracing, GatewaySupervisor, HealthReporter};
use gatewarden_sync::SyncEngine;

#[derive(Parser)]
#[command(name = "gatewarden", version, about = "Gateway supervisor and state sync daemon")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Supervise the gateway and sync state periodically (default).
    Run,
    /// Upload sandbox state to object storage once.
    Sync,
    /// Restore sandbox state from object storage, including deferred files.
    Restore,
    /// Print gateway status and the last backup time.
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let (config, load_error) = match AppConfig::load() {
        Ok(config) => (config, None),
        Err(e) => (AppConfig::default(), Some(e)),
    };
    configure_tracing(&config.telemetry)?;
    if let Some(e) = load_error {
        tracing::warn!(error = %e, "Failed to load configuration, using defaults");
    }

    tracing::info!("Starting Gatewarden v{}", env!("CARGO_PKG_VERSION"));

    // =========================================================================
    // Sandbox, storage and sync
    // =========================================================================
    let docker = DockerSandbox::connect(config.sandbox.clone())?;
    if !docker.is_available().await {
        tracing::warn!(container = %config.sandbox.container, "Docker daemon not reachable");
    }
    let sandbox: Arc<dyn SandboxBackend> = Arc::new(docker);

    let store = open_store(&config.store).await?;
    let sync = SyncEngine::new(sandbox.clone(), store, config.sync.clone());
    let supervisor = Arc::new(GatewaySupervisor::new(
        sandbox,
        sync,
        config.supervisor.clone(),
    ));

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(supervisor, &config).await,
        Command::Sync => {
            let outcome = supervisor.sync().await;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            if !outcome.success {
                anyhow::bail!("sync failed");
            }
            Ok(())
        }
        Command::Restore => {
            let outcome = supervisor.restore().await;
            let deferred = supervisor.restore_deferred(&outcome.deferred_keys).await;
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "restore": outcome,
                    "deferred": deferred,
                }))?
            );
            if !outcome.success {
                anyhow::bail!("restore failed");
            }
            Ok(())
        }
        Command::Status => {
            let reporter = HealthReporter::new(supervisor.clone());
            let status = reporter.status().await;
            let last_backup = supervisor.sync_engine().last_backup().await.ok().flatten();
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "gateway": status,
                    "listing": reporter.health(),
                    "last_backup": last_backup,
                }))?
            );
            Ok(())
        }
    }
}

/// Supervise until Ctrl-C, syncing on an interval and once more at shutdown.
async fn run(supervisor: Arc<GatewaySupervisor>, config: &AppConfig) -> anyhow::Result<()> {
    supervisor.warm_up();

    let period = Duration::from_secs(config.sync.interval_secs.max(1));
    let periodic = config.sync.interval_secs > 0;
    let mut ticker = tokio::time::interval(period);
    ticker.tick().await;

    tracing::info!(
        port = config.supervisor.gateway_port,
        sync_interval_secs = config.sync.interval_secs,
        "Supervisor running"
    );

    loop {
        tokio::select! {
            _ = ticker.tick(), if periodic => {
                if let Err(e) = supervisor.ensure_ready().await {
                    tracing::warn!(error = %e, "Gateway not ready");
                }
                let outcome = supervisor.sync().await;
                if !outcome.success {
                    tracing::warn!(error = ?outcome.error, "Periodic sync failed");
                }
            }
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    tracing::error!(error = %e, "Failed to listen for shutdown signal");
                }
                break;
            }
        }
    }

    tracing::info!("Shutting down, running final sync");
    let outcome = supervisor.sync().await;
    if !outcome.success {
        tracing::warn!(error = ?outcome.error, "Final sync failed");
    }
    supervisor.tasks().drain().await;
    tracing::info!("Gatewarden stopped");
    Ok(())
}
