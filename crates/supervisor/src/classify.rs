//! Process classification and zombie reaping.

use serde::Serialize;

use gatewarden_core::{config::CommandPatterns, ProcessInfo};
use gatewarden_sandbox::SandboxBackend;

use crate::directory::ProcessDirectory;
use crate::metrics;

/// What a listed process is, judged from its command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessKind {
    /// The gateway launcher, current or legacy.
    Gateway,
    /// A one-shot invocation of the gateway CLI.
    AncillaryCli,
    Unknown,
}

/// Classify a process. Gateway patterns win over CLI patterns, so
/// `openclaw gateway` is a gateway even though it names the CLI binary.
pub fn classify(info: &ProcessInfo, patterns: &CommandPatterns) -> ProcessKind {
    let command = info.command.as_str();
    if patterns.gateway.iter().any(|p| command.contains(p.as_str())) {
        return ProcessKind::Gateway;
    }
    let invokes_cli = command.split_whitespace().any(|token| {
        let name = token.rsplit('/').next().unwrap_or(token);
        patterns.cli.iter().any(|cli| name == cli)
    });
    if invokes_cli {
        ProcessKind::AncillaryCli
    } else {
        ProcessKind::Unknown
    }
}

/// The canonical gateway and everything that should be killed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Triage {
    pub canonical: Option<ProcessInfo>,
    pub zombies: Vec<ProcessInfo>,
}

/// Pick the first live gateway as canonical. Every other gateway entry is a
/// zombie, as is every CLI invocation that is no longer live.
pub fn triage(processes: &[ProcessInfo], patterns: &CommandPatterns) -> Triage {
    let mut result = Triage::default();
    for info in processes {
        match classify(info, patterns) {
            ProcessKind::Gateway => {
                if result.canonical.is_none() && info.status.is_live() {
                    result.canonical = Some(info.clone());
                } else {
                    result.zombies.push(info.clone());
                }
            }
            ProcessKind::AncillaryCli if !info.status.is_live() => {
                result.zombies.push(info.clone());
            }
            _ => {}
        }
    }
    result
}

/// Kill every zombie, ignoring failures, then invalidate the directory.
/// Returns how many kills succeeded.
pub async fn reap(
    backend: &dyn SandboxBackend,
    directory: &ProcessDirectory,
    zombies: &[ProcessInfo],
) -> usize {
    if zombies.is_empty() {
        return 0;
    }

    let mut killed = 0;
    for zombie in zombies {
        match backend.kill_process(&zombie.id).await {
            Ok(()) => {
                killed += 1;
                tracing::info!(process_id = %zombie.id, command = %zombie.command, "Reaped zombie process");
            }
            Err(e) => {
                tracing::debug!(process_id = %zombie.id, error = %e, "Zombie kill failed");
            }
        }
    }
    metrics::record_reaped(zombies.len(), killed);
    directory.invalidate();
    killed
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatewarden_core::ProcessStatus;

    fn proc(id: &str, command: &str, status: ProcessStatus) -> ProcessInfo {
        ProcessInfo::new(id, command, status)
    }

    #[test]
    fn test_classify_gateway_patterns() {
        let patterns = CommandPatterns::default();
        for command in [
            "/bin/bash /usr/local/bin/start-openclaw.sh",
            "node /usr/lib/node_modules/openclaw/dist/index.js openclaw gateway --port 18789",
            "/bin/bash /usr/local/bin/start-moltbot.sh",
            "clawdbot gateway --bind lan",
        ] {
            assert_eq!(
                classify(&proc("1", command, ProcessStatus::Running), &patterns),
                ProcessKind::Gateway,
                "{}",
                command
            );
        }
    }

    #[test]
    fn test_classify_cli_and_unknown() {
        let patterns = CommandPatterns::default();
        assert_eq!(
            classify(&proc("1", "/usr/bin/openclaw devices list", ProcessStatus::Dead), &patterns),
            ProcessKind::AncillaryCli
        );
        assert_eq!(
            classify(&proc("2", "clawdbot --version", ProcessStatus::Running), &patterns),
            ProcessKind::AncillaryCli
        );
        assert_eq!(
            classify(&proc("3", "cat /root/.openclaw/openclaw.json", ProcessStatus::Running), &patterns),
            ProcessKind::Unknown
        );
        assert_eq!(
            classify(&proc("4", "/sbin/tini -- sleep infinity", ProcessStatus::Running), &patterns),
            ProcessKind::Unknown
        );
    }

    #[test]
    fn test_triage_running_and_dead_gateway() {
        let processes = vec![
            proc("10", "/usr/local/bin/start-openclaw.sh", ProcessStatus::Dead),
            proc("11", "/usr/local/bin/start-openclaw.sh", ProcessStatus::Running),
        ];
        let triage = triage(&processes, &CommandPatterns::default());

        assert_eq!(triage.canonical.unwrap().id.as_str(), "11");
        assert_eq!(triage.zombies.len(), 1);
        assert_eq!(triage.zombies[0].id.as_str(), "10");
    }

    #[test]
    fn test_triage_duplicates_and_cli() {
        let processes = vec![
            proc("1", "/usr/local/bin/start-openclaw.sh", ProcessStatus::Starting),
            proc("2", "clawdbot gateway", ProcessStatus::Running),
            proc("3", "openclaw devices list", ProcessStatus::Dead),
            proc("4", "openclaw config get", ProcessStatus::Running),
            proc("5", "sshd", ProcessStatus::Dead),
        ];
        let triage = triage(&processes, &CommandPatterns::default());

        assert_eq!(triage.canonical.unwrap().id.as_str(), "1");
        let zombie_ids: Vec<&str> = triage.zombies.iter().map(|z| z.id.as_str()).collect();
        assert_eq!(zombie_ids, vec!["2", "3"]);
    }

    #[test]
    fn test_triage_launcher_and_child_are_one_gateway() {
        let listing = "\
   42    42 Ss   /bin/bash /usr/local/bin/start-openclaw.sh
   57    42 Sl   node /usr/local/bin/openclaw gateway --port 18789
";
        let processes = gatewarden_sandbox::docker::parse_ps_output(listing);
        let triage = triage(&processes, &CommandPatterns::default());

        assert_eq!(triage.canonical.unwrap().id.as_str(), "42");
        assert!(triage.zombies.is_empty());
    }

    #[test]
    fn test_triage_empty() {
        assert_eq!(triage(&[], &CommandPatterns::default()), Triage::default());
    }
}
