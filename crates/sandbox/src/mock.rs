//! In-memory sandbox for testing without Docker.
//!
//! Processes, port readiness and the filesystem are all scripted. Port waits
//! and listing delays use `tokio::time`, so tests running with a paused clock
//! skip through long startup timeouts instantly.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use gatewarden_core::{
    Error, PortCheck, ProcessId, ProcessInfo, ProcessLogs, ProcessStatus, Result,
};

use crate::engine::{FileEntry, ListFilesOptions, SandboxBackend};

struct MockState {
    processes: Vec<ProcessInfo>,
    ready: HashSet<ProcessId>,
    kills: Vec<ProcessId>,
    started_envs: Vec<HashMap<String, String>>,
    files: BTreeMap<String, Vec<u8>>,
    dirs: BTreeSet<String>,
    unreadable: HashSet<String>,
    unwritable: HashSet<String>,
    unlistable: HashSet<String>,
    list_failures: usize,
    next_pid: u32,
    started_ready: bool,
    list_started: bool,
    stderr: String,
    logs_fail: bool,
    list_delay: Duration,
    port_delay: Duration,
    write_delay: Duration,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            processes: Vec::new(),
            ready: HashSet::new(),
            kills: Vec::new(),
            started_envs: Vec::new(),
            files: BTreeMap::new(),
            dirs: BTreeSet::from(["/".to_string()]),
            unreadable: HashSet::new(),
            unwritable: HashSet::new(),
            unlistable: HashSet::new(),
            list_failures: 0,
            next_pid: 100,
            started_ready: true,
            list_started: true,
            stderr: String::new(),
            logs_fail: false,
            list_delay: Duration::ZERO,
            port_delay: Duration::ZERO,
            write_delay: Duration::ZERO,
        }
    }
}

/// Scriptable in-memory sandbox backend.
#[derive(Default)]
pub struct MockSandbox {
    state: Mutex<MockState>,
    start_calls: AtomicUsize,
    list_calls: AtomicUsize,
    active_writes: AtomicUsize,
    max_active_writes: AtomicUsize,
}

impl MockSandbox {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // -------------------------------------------------------------------------
    // Scripting
    // -------------------------------------------------------------------------

    /// Seed a listed process; `ready` controls whether its port answers.
    pub fn with_process(self, info: ProcessInfo, ready: bool) -> Self {
        {
            let mut state = self.state();
            if ready {
                state.ready.insert(info.id.clone());
            }
            state.processes.push(info);
        }
        self
    }

    /// Seed a file, creating its ancestor directories.
    pub fn with_file(self, path: &str, content: impl Into<Vec<u8>>) -> Self {
        {
            let mut state = self.state();
            for dir in ancestors(path) {
                state.dirs.insert(dir);
            }
            state.files.insert(path.to_string(), content.into());
        }
        self
    }

    /// Make reads of `path` fail.
    pub fn with_unreadable(self, path: &str) -> Self {
        self.state().unreadable.insert(path.to_string());
        self
    }

    /// Make writes to `path` fail.
    pub fn with_unwritable(self, path: &str) -> Self {
        self.state().unwritable.insert(path.to_string());
        self
    }

    /// Make listings rooted at `path` fail even though the directory exists.
    pub fn with_unlistable(self, path: &str) -> Self {
        self.state().unlistable.insert(path.to_string());
        self
    }

    /// Hold every write for `delay`, so concurrent writes overlap.
    pub fn with_write_delay(self, delay: Duration) -> Self {
        self.state().write_delay = delay;
        self
    }

    /// Whether processes started through the backend answer on their port.
    pub fn started_processes_ready(self, ready: bool) -> Self {
        self.state().started_ready = ready;
        self
    }

    /// Keep started processes out of later listings.
    pub fn hide_started_processes(self) -> Self {
        self.state().list_started = false;
        self
    }

    /// Stderr reported for every process.
    pub fn with_stderr(self, stderr: &str) -> Self {
        self.state().stderr = stderr.to_string();
        self
    }

    /// Make log retrieval fail.
    pub fn fail_logs(self) -> Self {
        self.state().logs_fail = true;
        self
    }

    pub fn with_list_delay(self, delay: Duration) -> Self {
        self.state().list_delay = delay;
        self
    }

    pub fn with_port_delay(self, delay: Duration) -> Self {
        self.state().port_delay = delay;
        self
    }

    /// Fail the next `n` process listings.
    pub fn fail_next_lists(&self, n: usize) {
        self.state().list_failures = n;
    }

    // -------------------------------------------------------------------------
    // Inspection
    // -------------------------------------------------------------------------

    pub fn start_calls(&self) -> usize {
        self.start_calls.load(Ordering::SeqCst)
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Most writes ever in progress at the same time.
    pub fn max_concurrent_writes(&self) -> usize {
        self.max_active_writes.load(Ordering::SeqCst)
    }

    pub fn kills(&self) -> Vec<ProcessId> {
        self.state().kills.clone()
    }

    pub fn processes(&self) -> Vec<ProcessInfo> {
        self.state().processes.clone()
    }

    /// Environments passed to `start_process`, in call order.
    pub fn started_envs(&self) -> Vec<HashMap<String, String>> {
        self.state().started_envs.clone()
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.state().files.get(path).cloned()
    }

    pub fn file_paths(&self) -> Vec<String> {
        self.state().files.keys().cloned().collect()
    }

    fn store_file(&self, path: &str, content: &[u8]) -> Result<()> {
        let mut state = self.state();
        if state.unwritable.contains(path) {
            return Err(Error::sandbox(format!("cannot create {}: Read-only file system", path)));
        }
        let parent = parent_dir(path);
        if !state.dirs.contains(&parent) {
            return Err(Error::sandbox(format!(
                "cannot create {}: parent directory missing",
                path
            )));
        }
        state.files.insert(path.to_string(), content.to_vec());
        Ok(())
    }
}

#[async_trait]
impl SandboxBackend for MockSandbox {
    async fn start_process(
        &self,
        command: &str,
        env: &HashMap<String, String>,
    ) -> Result<ProcessInfo> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state();
        state.next_pid += 1;
        let info = ProcessInfo::new(state.next_pid.to_string(), command, ProcessStatus::Starting);
        if state.started_ready {
            state.ready.insert(info.id.clone());
        }
        if state.list_started {
            state.processes.push(info.clone());
        }
        state.started_envs.push(env.clone());
        Ok(info)
    }

    async fn list_processes(&self) -> Result<Vec<ProcessInfo>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.state().list_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state();
        if state.list_failures > 0 {
            state.list_failures -= 1;
            return Err(Error::sandbox("mock listing failure"));
        }
        Ok(state.processes.clone())
    }

    async fn kill_process(&self, id: &ProcessId) -> Result<()> {
        let mut state = self.state();
        state.kills.push(id.clone());
        state.ready.remove(id);
        match state.processes.iter_mut().find(|p| &p.id == id) {
            Some(process) if process.status.is_live() => {
                process.status = ProcessStatus::Dead;
                Ok(())
            }
            Some(_) => Err(Error::sandbox(format!("process {} already exited", id))),
            None => Err(Error::sandbox(format!("no such process {}", id))),
        }
    }

    async fn wait_for_port(
        &self,
        id: &ProcessId,
        port: u16,
        _check: &PortCheck,
        timeout: Duration,
    ) -> Result<()> {
        let (ready, delay) = {
            let state = self.state();
            (state.ready.contains(id), state.port_delay)
        };
        if ready && delay <= timeout {
            tokio::time::sleep(delay).await;
            let mut state = self.state();
            if let Some(process) = state.processes.iter_mut().find(|p| &p.id == id) {
                process.status = ProcessStatus::Running;
            }
            return Ok(());
        }
        tokio::time::sleep(timeout).await;
        Err(Error::timeout(format!(
            "port {} not ready after {}ms",
            port,
            timeout.as_millis()
        )))
    }

    async fn process_logs(&self, _id: &ProcessId) -> Result<ProcessLogs> {
        let state = self.state();
        if state.logs_fail {
            return Err(Error::sandbox("mock log retrieval failure"));
        }
        Ok(ProcessLogs {
            stdout: String::new(),
            stderr: state.stderr.clone(),
        })
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let state = self.state();
        let path = path.trim_end_matches('/');
        Ok(state.files.contains_key(path) || state.dirs.contains(path))
    }

    async fn list_files(&self, path: &str, options: ListFilesOptions) -> Result<Vec<FileEntry>> {
        let state = self.state();
        let root = path.trim_end_matches('/');
        if state.unlistable.contains(root) {
            return Err(Error::sandbox(format!("find: '{}': Permission denied", root)));
        }
        if !state.dirs.contains(root) {
            return Err(Error::sandbox(format!(
                "find: '{}': No such file or directory",
                root
            )));
        }
        let prefix = format!("{}/", root);
        Ok(state
            .files
            .keys()
            .filter(|p| p.starts_with(&prefix))
            .map(|p| FileEntry::under(root, p))
            .filter(|entry| options.recursive || !entry.relative.contains('/'))
            .filter(|entry| {
                options.include_hidden || !entry.relative.split('/').any(|s| s.starts_with('.'))
            })
            .collect())
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let state = self.state();
        if state.unreadable.contains(path) {
            return Err(Error::sandbox(format!("cat: {}: Permission denied", path)));
        }
        state
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| Error::sandbox(format!("File not found in mock sandbox: {}", path)))
    }

    async fn write_file(&self, path: &str, content: &[u8]) -> Result<()> {
        let active = self.active_writes.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active_writes.fetch_max(active, Ordering::SeqCst);
        let delay = self.state().write_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let result = self.store_file(path, content);
        self.active_writes.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn mkdir(&self, path: &str, recursive: bool) -> Result<()> {
        let mut state = self.state();
        let path = path.trim_end_matches('/').to_string();
        if recursive {
            for dir in ancestors(&format!("{}/_", path)) {
                state.dirs.insert(dir);
            }
        } else {
            if !state.dirs.contains(&parent_dir(&path)) {
                return Err(Error::sandbox(format!("mkdir: cannot create {}", path)));
            }
            state.dirs.insert(path);
        }
        Ok(())
    }

    async fn is_available(&self) -> bool {
        true
    }
}

fn parent_dir(path: &str) -> String {
    match path.trim_end_matches('/').rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(idx) => path[..idx].to_string(),
    }
}

/// Every ancestor directory of `path`, root first.
fn ancestors(path: &str) -> Vec<String> {
    let mut dirs = vec!["/".to_string()];
    let mut current = String::new();
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    for segment in segments.iter().take(segments.len().saturating_sub(1)) {
        current.push('/');
        current.push_str(segment);
        dirs.push(current.clone());
    }
    dirs
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_mock_sandbox_filesystem() {
        let mock = MockSandbox::new().with_file("/root/clawd/notes/a.md", "hello");

        assert!(mock.exists("/root/clawd").await.unwrap());
        assert!(mock.exists("/root/clawd/notes/a.md").await.unwrap());
        assert!(!mock.exists("/root/other").await.unwrap());

        // parent must exist before writing
        assert!(mock.write_file("/root/new/b.md", b"x").await.is_err());
        mock.mkdir("/root/new", true).await.unwrap();
        mock.write_file("/root/new/b.md", b"x").await.unwrap();
        assert_eq!(mock.read_file("/root/new/b.md").await.unwrap(), b"x");
    }

    #[tokio::test(start_paused = true)]
    async fn test_mock_write_failures_and_overlap() {
        let mock = Arc::new(
            MockSandbox::new()
                .with_file("/data/keep.txt", "1")
                .with_unwritable("/data/locked.txt")
                .with_unlistable("/data")
                .with_write_delay(Duration::from_millis(10)),
        );

        assert!(mock.write_file("/data/locked.txt", b"x").await.is_err());
        assert!(mock.list_files("/data", ListFilesOptions::default()).await.is_err());

        let writes = (0..4).map(|i| {
            let mock = mock.clone();
            async move { mock.write_file(&format!("/data/{}.txt", i), b"x").await }
        });
        for result in futures::future::join_all(writes).await {
            result.unwrap();
        }
        assert_eq!(mock.max_concurrent_writes(), 4);
    }

    #[tokio::test]
    async fn test_mock_list_files_options() {
        let mock = MockSandbox::new()
            .with_file("/data/top.txt", "1")
            .with_file("/data/.hidden", "2")
            .with_file("/data/sub/deep.txt", "3");

        let all = mock
            .list_files("/data", ListFilesOptions::default())
            .await
            .unwrap();
        assert_eq!(all.len(), 3);

        let shallow_visible = mock
            .list_files(
                "/data",
                ListFilesOptions {
                    recursive: false,
                    include_hidden: false,
                },
            )
            .await
            .unwrap();
        assert_eq!(shallow_visible.len(), 1);
        assert_eq!(shallow_visible[0].relative, "top.txt");

        assert!(mock
            .list_files("/missing", ListFilesOptions::default())
            .await
            .is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_mock_port_wait_times_out_for_unready_process() {
        let mock = MockSandbox::new().with_process(
            ProcessInfo::new("7", "openclaw gateway", ProcessStatus::Running),
            false,
        );
        let result = mock
            .wait_for_port(
                &ProcessId::new("7"),
                18789,
                &PortCheck::Tcp,
                Duration::from_secs(180),
            )
            .await;
        assert!(matches!(result, Err(Error::Timeout(_))));
    }

    #[tokio::test]
    async fn test_mock_kill_marks_dead() {
        let mock = MockSandbox::new().with_process(
            ProcessInfo::new("7", "openclaw gateway", ProcessStatus::Running),
            true,
        );
        mock.kill_process(&ProcessId::new("7")).await.unwrap();
        assert_eq!(mock.processes()[0].status, ProcessStatus::Dead);
        // killing again reports an error
        assert!(mock.kill_process(&ProcessId::new("7")).await.is_err());
        assert_eq!(mock.kills().len(), 2);
    }
}
