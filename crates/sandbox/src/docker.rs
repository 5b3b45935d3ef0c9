//! Docker-backed sandbox.
//!
//! The gateway runs inside an already provisioned container. Every backend
//! operation is a short `docker exec` into that container via `bollard`:
//! processes are launched detached with `setsid nohup`, listed with `ps`, and
//! probed with `nc`/`wget`. File contents cross the exec boundary as base64 on
//! the way out and as raw stdin on the way in, so binary files survive.

use async_trait::async_trait;
use base64::Engine;
use bollard::container::LogOutput;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt::Display;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use gatewarden_core::config::SandboxConfig;
use gatewarden_core::{
    Error, PortCheck, ProcessId, ProcessInfo, ProcessLogs, ProcessStatus, Result,
};

use crate::engine::{FileEntry, ListFilesOptions, SandboxBackend};

/// Exit code used by the port probe when the watched process is gone.
const PROCESS_GONE_EXIT: i64 = 3;

/// Bytes of each log stream returned by `process_logs`.
const LOG_TAIL_BYTES: usize = 64 * 1024;

/// Result of executing a command in the sandbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecResult {
    /// Exit code of the command.
    pub exit_code: i64,
    /// Standard output.
    pub stdout: String,
    /// Standard error.
    pub stderr: String,
    /// Whether the command timed out.
    pub timed_out: bool,
}

impl ExecResult {
    /// Whether the execution was successful (exit code 0, no timeout).
    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }
}

/// Docker-based sandbox backend using the `bollard` crate.
pub struct DockerSandbox {
    docker: bollard::Docker,
    config: SandboxConfig,
    logs: Mutex<LogRegistry>,
}

impl DockerSandbox {
    /// Connect to the local Docker daemon.
    pub fn connect(config: SandboxConfig) -> Result<Self> {
        let docker = bollard::Docker::connect_with_local_defaults().map_err(|e| {
            Error::sandbox(format!(
                "Failed to connect to Docker daemon: {}. Is Docker running?",
                e
            ))
        })?;
        Ok(Self::from_client(docker, config))
    }

    /// Create from an existing bollard Docker client.
    pub fn from_client(docker: bollard::Docker, config: SandboxConfig) -> Self {
        Self {
            docker,
            config,
            logs: Mutex::new(LogRegistry::default()),
        }
    }

    /// Run `sh -c command` in the container and collect its output.
    pub async fn exec(
        &self,
        command: &str,
        env: Option<Vec<String>>,
        stdin: Option<&[u8]>,
        timeout: Duration,
    ) -> Result<ExecResult> {
        use bollard::exec::{CreateExecOptions, StartExecResults};

        let exec_options = CreateExecOptions {
            cmd: Some(vec!["sh".to_string(), "-c".to_string(), command.to_string()]),
            env,
            attach_stdin: Some(stdin.is_some()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };

        let exec = self
            .docker
            .create_exec(&self.config.container, exec_options)
            .await
            .map_err(|e| Error::sandbox(format!("Failed to create exec in sandbox: {}", e)))?;

        let start_result = self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| Error::sandbox(format!("Failed to start exec in sandbox: {}", e)))?;

        let (stdout, stderr) = match start_result {
            StartExecResults::Attached { output, input } => {
                let attached = drive_attached(output, input, stdin, timeout).await?;
                if attached.timed_out {
                    tracing::warn!(container = %self.config.container, command = %command, "Sandbox exec timed out");
                    return Ok(ExecResult {
                        exit_code: -1,
                        stdout: attached.stdout,
                        stderr: attached.stderr,
                        timed_out: true,
                    });
                }
                (attached.stdout, attached.stderr)
            }
            StartExecResults::Detached => (String::new(), String::new()),
        };

        let inspect = self
            .docker
            .inspect_exec(&exec.id)
            .await
            .map_err(|e| Error::sandbox(format!("Failed to inspect exec result: {}", e)))?;

        Ok(ExecResult {
            exit_code: inspect.exit_code.unwrap_or(-1),
            stdout,
            stderr,
            timed_out: false,
        })
    }

    async fn run(&self, command: &str) -> Result<ExecResult> {
        self.exec(command, None, None, self.config.exec_timeout()).await
    }

    async fn run_ok(&self, command: &str, what: &str) -> Result<ExecResult> {
        let result = self.run(command).await?;
        if !result.success() {
            return Err(Error::sandbox(format!(
                "{} failed (exit code {}): {}",
                what,
                result.exit_code,
                result.stderr.trim()
            )));
        }
        Ok(result)
    }

    /// Probe until the port answers or the process disappears.
    async fn poll_port(&self, script: &str, id: &ProcessId, port: u16) -> Result<()> {
        let poll = self.config.port_poll_interval();
        loop {
            let result = self
                .exec(script, None, None, poll.max(Duration::from_secs(5)))
                .await?;
            if result.success() {
                return Ok(());
            }
            if result.exit_code == PROCESS_GONE_EXIT {
                return Err(Error::sandbox(format!(
                    "process {} exited before port {} became ready",
                    id, port
                )));
            }
            tokio::time::sleep(poll).await;
        }
    }

    fn log_paths(&self, stem: &str) -> (String, String) {
        let dir = self.config.log_dir.trim_end_matches('/');
        (format!("{}/{}.out", dir, stem), format!("{}/{}.err", dir, stem))
    }

    fn logs(&self) -> MutexGuard<'_, LogRegistry> {
        self.logs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Best-effort removal of log files left by killed processes.
    async fn remove_logs(&self, stems: Vec<String>) {
        if stems.is_empty() {
            return;
        }
        let files: Vec<String> = stems
            .iter()
            .flat_map(|stem| {
                let (out, err) = self.log_paths(stem);
                [shell_quote(&out), shell_quote(&err)]
            })
            .collect();
        match self.run(&format!("rm -f {}", files.join(" "))).await {
            Ok(result) if result.success() => {
                tracing::debug!(count = stems.len(), "Removed logs of retired processes");
            }
            Ok(result) => {
                tracing::debug!(exit_code = result.exit_code, stderr = %result.stderr.trim(), "Log cleanup failed");
            }
            Err(e) => tracing::debug!(error = %e, "Log cleanup failed"),
        }
    }
}

// =============================================================================
// Attached Exec I/O
// =============================================================================

/// Output of an attached exec.
#[derive(Debug, Default)]
struct AttachedOutput {
    stdout: String,
    stderr: String,
    timed_out: bool,
}

/// Feed `stdin` and collect `output`, all under one `timeout`.
async fn drive_attached<S, E, W>(
    mut output: S,
    mut input: W,
    stdin: Option<&[u8]>,
    timeout: Duration,
) -> Result<AttachedOutput>
where
    S: Stream<Item = std::result::Result<LogOutput, E>> + Unpin,
    E: Display,
    W: AsyncWrite + Unpin,
{
    let mut stdout = String::new();
    let mut stderr = String::new();

    let feed = async {
        if let Some(bytes) = stdin {
            input
                .write_all(bytes)
                .await
                .map_err(|e| Error::sandbox(format!("Failed to write exec stdin: {}", e)))?;
            input
                .shutdown()
                .await
                .map_err(|e| Error::sandbox(format!("Failed to close exec stdin: {}", e)))?;
        }
        Ok::<(), Error>(())
    };
    let collect = async {
        while let Some(msg) = output.next().await {
            match msg {
                Ok(LogOutput::StdOut { message }) => {
                    stdout.push_str(&String::from_utf8_lossy(&message));
                }
                Ok(LogOutput::StdErr { message }) => {
                    stderr.push_str(&String::from_utf8_lossy(&message));
                }
                Ok(_) => {}
                Err(e) => {
                    stderr.push_str(&format!("\n[sandbox error: {}]", e));
                    break;
                }
            }
        }
    };

    let finished = tokio::time::timeout(timeout, async { tokio::join!(feed, collect).0 }).await;
    match finished {
        Ok(fed) => {
            fed?;
            Ok(AttachedOutput {
                stdout,
                stderr,
                timed_out: false,
            })
        }
        Err(_) => Ok(AttachedOutput {
            stdout,
            stderr: format!("{}\n[Execution timed out after {:?}]", stderr, timeout),
            timed_out: true,
        }),
    }
}

// =============================================================================
// Log Registry
// =============================================================================

#[derive(Debug)]
struct LogEntry {
    stem: String,
    retired: bool,
}

/// Log file stems of processes launched by this backend, keyed by pid.
///
/// A killed process keeps its entry, so its logs stay readable, until the
/// next launch purges it.
#[derive(Debug, Default)]
struct LogRegistry {
    entries: HashMap<String, LogEntry>,
}

impl LogRegistry {
    /// Record a launch. Returns the stems whose files can now be deleted.
    fn record(&mut self, pid: &str, stem: String) -> Vec<String> {
        let mut purged: Vec<String> = Vec::new();
        self.entries.retain(|_, entry| {
            if entry.retired {
                purged.push(entry.stem.clone());
            }
            !entry.retired
        });
        let previous = self.entries.insert(
            pid.to_string(),
            LogEntry {
                stem,
                retired: false,
            },
        );
        // pid reuse: the old process is gone
        if let Some(previous) = previous {
            purged.push(previous.stem);
        }
        purged
    }

    fn retire(&mut self, pid: &str) {
        if let Some(entry) = self.entries.get_mut(pid) {
            entry.retired = true;
        }
    }

    fn stem(&self, pid: &str) -> Option<String> {
        self.entries.get(pid).map(|entry| entry.stem.clone())
    }
}

#[async_trait]
impl SandboxBackend for DockerSandbox {
    async fn start_process(
        &self,
        command: &str,
        env: &HashMap<String, String>,
    ) -> Result<ProcessInfo> {
        let stem = uuid::Uuid::new_v4().simple().to_string();
        let (out, err) = self.log_paths(&stem);
        let script = format!(
            "mkdir -p {dir} && setsid nohup sh -c {cmd} > {out} 2> {err} < /dev/null & echo $!",
            dir = shell_quote(&self.config.log_dir),
            cmd = shell_quote(command),
            out = shell_quote(&out),
            err = shell_quote(&err),
        );
        let env: Vec<String> = env.iter().map(|(k, v)| format!("{}={}", k, v)).collect();

        let result = self
            .exec(&script, Some(env), None, self.config.exec_timeout())
            .await?;
        if !result.success() {
            return Err(Error::sandbox(format!(
                "Failed to launch '{}': {}",
                command,
                result.stderr.trim()
            )));
        }
        let pid = result.stdout.trim().parse::<u32>().map_err(|_| {
            Error::sandbox(format!(
                "Unexpected launcher output for '{}': {:?}",
                command, result.stdout
            ))
        })?;
        let pid = pid.to_string();

        let purged = self.logs().record(&pid, stem);
        tracing::info!(container = %self.config.container, pid = %pid, command = %command, "Process launched in sandbox");
        self.remove_logs(purged).await;
        Ok(ProcessInfo::new(pid, command, ProcessStatus::Starting))
    }

    async fn list_processes(&self) -> Result<Vec<ProcessInfo>> {
        let result = self.run_ok(PS_COMMAND, "Process listing").await?;
        Ok(parse_ps_output(&result.stdout))
    }

    async fn kill_process(&self, id: &ProcessId) -> Result<()> {
        self.run_ok(&kill_script(id), "kill").await?;
        self.logs().retire(id.as_str());
        tracing::debug!(pid = %id, "Sent SIGTERM to sandbox process group");
        Ok(())
    }

    async fn wait_for_port(
        &self,
        id: &ProcessId,
        port: u16,
        check: &PortCheck,
        timeout: Duration,
    ) -> Result<()> {
        let script = port_probe_script(id, port, check);

        match tokio::time::timeout(timeout, self.poll_port(&script, id, port)).await {
            Ok(result) => result,
            Err(_) => Err(Error::timeout(format!(
                "port {} not ready after {}ms",
                port,
                timeout.as_millis()
            ))),
        }
    }

    async fn process_logs(&self, id: &ProcessId) -> Result<ProcessLogs> {
        let stem = self
            .logs()
            .stem(id.as_str())
            .ok_or_else(|| Error::sandbox(format!("no captured logs for process {}", id)))?;
        let (out, err) = self.log_paths(&stem);

        let stdout = self
            .run_ok(&format!("tail -c {} {}", LOG_TAIL_BYTES, shell_quote(&out)), "log read")
            .await?
            .stdout;
        let stderr = self
            .run_ok(&format!("tail -c {} {}", LOG_TAIL_BYTES, shell_quote(&err)), "log read")
            .await?
            .stdout;
        Ok(ProcessLogs { stdout, stderr })
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let result = self.run(&format!("test -e {}", shell_quote(path))).await?;
        match result.exit_code {
            0 => Ok(true),
            1 => Ok(false),
            code => Err(Error::sandbox(format!(
                "existence check for {} failed (exit code {}): {}",
                path,
                code,
                result.stderr.trim()
            ))),
        }
    }

    async fn list_files(&self, path: &str, options: ListFilesOptions) -> Result<Vec<FileEntry>> {
        let result = self
            .run_ok(&find_command(path, options), "File listing")
            .await?;
        Ok(result
            .stdout
            .lines()
            .filter(|line| !line.is_empty())
            .map(|line| FileEntry::under(path, line))
            .collect())
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let result = self
            .run_ok(&format!("base64 {}", shell_quote(path)), "File read")
            .await?;
        let encoded: String = result
            .stdout
            .chars()
            .filter(|c| !c.is_ascii_whitespace())
            .collect();
        base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| Error::sandbox(format!("Failed to decode {}: {}", path, e)))
    }

    async fn write_file(&self, path: &str, content: &[u8]) -> Result<()> {
        let command = format!("cat > {}", shell_quote(path));
        let result = self
            .exec(&command, None, Some(content), self.config.exec_timeout())
            .await?;
        if !result.success() {
            return Err(Error::sandbox(format!(
                "Failed to write file '{}' in sandbox: {}",
                path,
                result.stderr.trim()
            )));
        }
        Ok(())
    }

    async fn mkdir(&self, path: &str, recursive: bool) -> Result<()> {
        let flag = if recursive { "-p " } else { "" };
        self.run_ok(&format!("mkdir {}{}", flag, shell_quote(path)), "mkdir")
            .await?;
        Ok(())
    }

    async fn is_available(&self) -> bool {
        self.docker.ping().await.is_ok()
    }
}

// =============================================================================
// Command Helpers
// =============================================================================

const PS_COMMAND: &str = "ps -eo pid=,pgid=,stat=,args=";

/// Quote a string for `sh`.
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

struct PsRow<'a> {
    pid: &'a str,
    pgid: &'a str,
    status: ProcessStatus,
    args: String,
}

fn parse_ps_row(line: &str) -> Option<PsRow<'_>> {
    let mut parts = line.split_whitespace();
    let pid = parts.next()?;
    let pgid = parts.next()?;
    let stat = parts.next()?;
    let args = parts.collect::<Vec<_>>().join(" ");
    if pid.parse::<u32>().is_err() || pgid.parse::<u32>().is_err() || args.is_empty() {
        return None;
    }
    if args.contains(PS_COMMAND) {
        return None;
    }
    let status = match stat.chars().next() {
        Some('Z') | Some('X') => ProcessStatus::Dead,
        Some('T') | Some('t') => ProcessStatus::Stopped,
        _ => ProcessStatus::Running,
    };
    Some(PsRow {
        pid,
        pgid,
        status,
        args,
    })
}

/// Parse `ps -eo pid=,pgid=,stat=,args=` output into one entry per process group.
///
/// A launcher script and the program it spawns share a group, so members fold
/// into their listed leader: the entry keeps the leader's pid and command and
/// counts as running while any member runs. Members whose leader is not listed
/// stay separate.
pub fn parse_ps_output(output: &str) -> Vec<ProcessInfo> {
    let rows: Vec<PsRow<'_>> = output.lines().filter_map(parse_ps_row).collect();
    let leaders: HashSet<&str> = rows
        .iter()
        .filter(|row| row.pid == row.pgid && row.pid != "1")
        .map(|row| row.pid)
        .collect();

    let mut live_groups: HashSet<&str> = HashSet::new();
    for row in &rows {
        if row.pid != row.pgid && leaders.contains(row.pgid) && row.status == ProcessStatus::Running {
            live_groups.insert(row.pgid);
        }
    }

    rows.iter()
        .filter(|row| row.pid == row.pgid || !leaders.contains(row.pgid))
        .map(|row| {
            let status = if live_groups.contains(row.pid) {
                ProcessStatus::Running
            } else {
                row.status
            };
            ProcessInfo::new(row.pid, row.args.clone(), status)
        })
        .collect()
}

/// Signal the whole group when `id` leads one, else just the process.
pub fn kill_script(id: &ProcessId) -> String {
    let pid = shell_quote(id.as_str());
    format!(
        "pgid=$(ps -o pgid= -p {pid} | tr -d ' '); \
         if [ \"$pgid\" = {pid} ]; then kill -TERM -- -{pid}; else kill -TERM {pid}; fi",
        pid = pid
    )
}

/// Shell script probing `port`; exits with `PROCESS_GONE_EXIT` if `id` is gone.
pub fn port_probe_script(id: &ProcessId, port: u16, check: &PortCheck) -> String {
    let probe = match check {
        PortCheck::Tcp => format!("nc -z 127.0.0.1 {}", port),
        PortCheck::Http { path } => format!(
            "wget -q -O /dev/null {}",
            shell_quote(&format!("http://127.0.0.1:{}{}", port, path))
        ),
    };
    format!(
        "kill -0 {} 2>/dev/null || exit {}; {}",
        shell_quote(id.as_str()),
        PROCESS_GONE_EXIT,
        probe
    )
}

fn find_command(path: &str, options: ListFilesOptions) -> String {
    let mut command = format!("find {} -mindepth 1", shell_quote(path));
    if !options.recursive {
        command.push_str(" -maxdepth 1");
    }
    if !options.include_hidden {
        command.push_str(" -name '.*' -prune -o");
    }
    command.push_str(" -type f -print");
    command
}
