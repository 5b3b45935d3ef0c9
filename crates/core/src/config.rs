use std::collections::HashMap;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use secrecy::Secret;
use serde::Deserialize;

use crate::types::PortCheck;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub sandbox: SandboxConfig,
    pub supervisor: SupervisorConfig,
    pub sync: SyncConfig,
    pub store: StoreConfig,
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SandboxConfig {
    /// Name or id of the container hosting the gateway.
    pub container: String,
    /// Timeout for one-shot helper commands (probes, file transfers).
    pub exec_timeout_ms: u64,
    /// Directory inside the sandbox receiving process stdout/stderr.
    pub log_dir: String,
    pub port_poll_interval_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SupervisorConfig {
    pub gateway_port: u16,
    pub start_command: String,
    pub port_check: PortCheck,
    pub startup_timeout_ms: u64,
    pub start_throttle_ms: u64,
    pub process_cache_ttl_ms: u64,
    pub process_stale_bound_ms: u64,
    pub max_consecutive_start_failures: u32,
    pub stderr_excerpt_chars: usize,
    pub patterns: CommandPatterns,
    /// Variables always set on the gateway process.
    pub env: HashMap<String, String>,
    /// Host variables copied into the gateway environment when present.
    pub env_passthrough: Vec<String>,
    pub gateway_token: Option<Secret<String>>,
}

/// Substrings identifying processes by their command line.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CommandPatterns {
    /// Current and legacy gateway launchers.
    pub gateway: Vec<String>,
    /// One-shot CLI invocations of the gateway binary.
    pub cli: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SyncConfig {
    pub config_dir: String,
    pub config_file: String,
    pub legacy_config_dir: String,
    pub legacy_config_file: String,
    pub workspace_dir: String,
    pub skills_dir: String,
    pub config_prefix: String,
    pub workspace_prefix: String,
    pub skills_prefix: String,
    pub marker_key: String,
    pub restore_batch_size: usize,
    pub deferred_batch_size: usize,
    /// Period of the scheduled sync in `run` mode; 0 disables it.
    pub interval_secs: u64,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    None,
    Memory,
    S3,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub bucket: Option<String>,
    pub endpoint: Option<String>,
    pub prefix: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TelemetryConfig {
    pub log_filter: String,
    pub json_logs: bool,
    /// Address for the Prometheus scrape listener, e.g. `0.0.0.0:9464`.
    pub metrics_addr: Option<String>,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("GATEWARDEN_ENV").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            .add_source(File::with_name("config/local").required(false))
            // Map GATEWARDEN__SUPERVISOR__GATEWAY_PORT=18789 to supervisor.gateway_port
            .add_source(
                Environment::with_prefix("GATEWARDEN")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        s.try_deserialize()
    }
}

impl SandboxConfig {
    pub fn exec_timeout(&self) -> Duration {
        Duration::from_millis(self.exec_timeout_ms)
    }

    pub fn port_poll_interval(&self) -> Duration {
        Duration::from_millis(self.port_poll_interval_ms)
    }
}

impl SupervisorConfig {
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    pub fn start_throttle(&self) -> Duration {
        Duration::from_millis(self.start_throttle_ms)
    }

    pub fn process_cache_ttl(&self) -> Duration {
        Duration::from_millis(self.process_cache_ttl_ms)
    }

    pub fn process_stale_bound(&self) -> Duration {
        Duration::from_millis(self.process_stale_bound_ms)
    }
}

impl SyncConfig {
    /// Path of the current config marker file.
    pub fn config_marker(&self) -> String {
        format!("{}/{}", self.config_dir.trim_end_matches('/'), self.config_file)
    }

    /// Path of the legacy config marker file.
    pub fn legacy_config_marker(&self) -> String {
        format!(
            "{}/{}",
            self.legacy_config_dir.trim_end_matches('/'),
            self.legacy_config_file
        )
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            container: "gatewarden-sandbox".into(),
            exec_timeout_ms: 30_000,
            log_dir: "/tmp/gatewarden".into(),
            port_poll_interval_ms: 500,
        }
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            gateway_port: 18789,
            start_command: "/usr/local/bin/start-openclaw.sh".into(),
            port_check: PortCheck::default(),
            startup_timeout_ms: 180_000,
            start_throttle_ms: 30_000,
            process_cache_ttl_ms: 5_000,
            process_stale_bound_ms: 30_000,
            max_consecutive_start_failures: 3,
            stderr_excerpt_chars: 2_000,
            patterns: CommandPatterns::default(),
            env: HashMap::new(),
            env_passthrough: vec![
                "ANTHROPIC_API_KEY".into(),
                "OPENAI_API_KEY".into(),
                "TELEGRAM_BOT_TOKEN".into(),
                "DISCORD_BOT_TOKEN".into(),
                "SLACK_BOT_TOKEN".into(),
                "SLACK_APP_TOKEN".into(),
            ],
            gateway_token: None,
        }
    }
}

impl Default for CommandPatterns {
    fn default() -> Self {
        Self {
            gateway: vec![
                "start-openclaw.sh".into(),
                "openclaw gateway".into(),
                // legacy launcher names
                "start-moltbot.sh".into(),
                "clawdbot gateway".into(),
            ],
            cli: vec!["openclaw".into(), "clawdbot".into()],
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            config_dir: "/root/.openclaw".into(),
            config_file: "openclaw.json".into(),
            legacy_config_dir: "/root/.clawdbot".into(),
            legacy_config_file: "clawdbot.json".into(),
            workspace_dir: "/root/clawd".into(),
            skills_dir: "/root/clawd/skills".into(),
            config_prefix: "openclaw/".into(),
            workspace_prefix: "workspace/".into(),
            skills_prefix: "skills/".into(),
            marker_key: ".last-sync".into(),
            restore_batch_size: 5,
            deferred_batch_size: 3,
            interval_secs: 300,
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_filter: "info,gatewarden=debug".into(),
            json_logs: false,
            metrics_addr: None,
        }
    }
}
