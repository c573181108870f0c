//! Background shells: OS processes launched by the run-terminal tool that
//! live independently of the conversation loop.
//!
//! Each shell is a handle in a table keyed by a stable `shell-N` id. Its
//! state machine is `Running -> Completed` (natural exit, code recorded)
//! or `Running -> Killed` (explicit kill, no code). Output accumulates via
//! async line readers; storage is unbounded and only the consumer-facing
//! view is tail-truncated.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Lines shown per stream by `output`; full buffers are kept regardless.
const OUTPUT_TAIL_LINES: usize = 10;

/// Exit code recorded when the process could not be spawned or its exit
/// status is unavailable.
const ABNORMAL_EXIT_CODE: i32 = -1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShellStatus {
    Running,
    Completed,
    Killed,
}

impl ShellStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// Mutable record for one shell. Mutated only by the manager's spawn/kill
/// paths and the per-shell reader/waiter tasks.
struct ShellState {
    command: String,
    status: ShellStatus,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
    exit_code: Option<i32>,
    stdout: Vec<String>,
    stderr: Vec<String>,
}

struct ShellHandle {
    state: Arc<Mutex<ShellState>>,
    kill: CancellationToken,
}

/// Listing row for the shell panel.
#[derive(Clone, Debug, Serialize)]
pub struct ShellSnapshot {
    pub id: String,
    pub command: String,
    pub status: ShellStatus,
    pub started_at: DateTime<Utc>,
    pub exit_code: Option<i32>,
    pub runtime_secs: i64,
}

/// Tail view of a shell's output.
#[derive(Clone, Debug, Serialize)]
pub struct ShellOutput {
    pub id: String,
    pub status: ShellStatus,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

pub struct ProcessManager {
    shells: DashMap<String, ShellHandle>,
    next_id: AtomicU64,
    shell_program: PathBuf,
}

impl ProcessManager {
    pub fn new() -> Self {
        Self {
            shells: DashMap::new(),
            next_id: AtomicU64::new(0),
            shell_program: PathBuf::from("bash"),
        }
    }

    /// Override the shell binary. Used by tests to exercise spawn failure.
    pub fn with_shell(mut self, program: impl Into<PathBuf>) -> Self {
        self.shell_program = program.into();
        self
    }

    /// Launch `command` in the background. Never fails: if the process
    /// cannot be spawned the returned shell is immediately `Completed`
    /// with a non-zero exit code and the error text in its stderr buffer.
    pub fn spawn(&self, command: &str, workdir: &Path) -> String {
        let id = format!("shell-{}", self.next_id.fetch_add(1, Ordering::Relaxed) + 1);

        let mut child = match Command::new(&self.shell_program)
            .arg("-c")
            .arg(command)
            .current_dir(workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                warn!(shell_id = %id, command, error = %e, "background spawn failed");
                let state = ShellState {
                    command: command.to_string(),
                    status: ShellStatus::Completed,
                    started_at: Utc::now(),
                    ended_at: Some(Utc::now()),
                    exit_code: Some(ABNORMAL_EXIT_CODE),
                    stdout: Vec::new(),
                    stderr: vec![format!("Failed to spawn command: {e}")],
                };
                self.shells.insert(
                    id.clone(),
                    ShellHandle {
                        state: Arc::new(Mutex::new(state)),
                        kill: CancellationToken::new(),
                    },
                );
                return id;
            }
        };

        let state = Arc::new(Mutex::new(ShellState {
            command: command.to_string(),
            status: ShellStatus::Running,
            started_at: Utc::now(),
            ended_at: None,
            exit_code: None,
            stdout: Vec::new(),
            stderr: Vec::new(),
        }));
        let kill = CancellationToken::new();

        let stdout_task = child
            .stdout
            .take()
            .map(|out| spawn_reader(out, Arc::clone(&state), StreamKind::Stdout));
        let stderr_task = child
            .stderr
            .take()
            .map(|err| spawn_reader(err, Arc::clone(&state), StreamKind::Stderr));

        // Waiter: observes natural exit or the kill signal. The status
        // transition for kill happens synchronously in `kill()`; this task
        // only reaps the process.
        let waiter_state = Arc::clone(&state);
        let waiter_kill = kill.clone();
        let waiter_id = id.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = waiter_kill.cancelled() => {
                    if let Err(e) = child.kill().await {
                        warn!(shell_id = %waiter_id, error = %e, "failed to kill background shell");
                    }
                    let _ = child.wait().await;
                    debug!(shell_id = %waiter_id, "background shell killed");
                }
                status = child.wait() => {
                    // Let the readers drain the pipes before finalizing.
                    if let Some(task) = stdout_task {
                        let _ = task.await;
                    }
                    if let Some(task) = stderr_task {
                        let _ = task.await;
                    }
                    let mut s = waiter_state.lock();
                    if s.status == ShellStatus::Running {
                        s.status = ShellStatus::Completed;
                        s.ended_at = Some(Utc::now());
                        s.exit_code = Some(match status {
                            Ok(st) => st.code().unwrap_or(ABNORMAL_EXIT_CODE),
                            Err(_) => ABNORMAL_EXIT_CODE,
                        });
                        debug!(shell_id = %waiter_id, exit_code = ?s.exit_code, "background shell completed");
                    }
                }
            }
        });

        info!(shell_id = %id, command, "background shell started");
        self.shells.insert(id.clone(), ShellHandle { state, kill });
        id
    }

    /// Kill a running shell. No-op returning false when the id is unknown
    /// or the shell has already reached a terminal state.
    pub fn kill(&self, id: &str) -> bool {
        let Some(handle) = self.shells.get(id) else {
            return false;
        };
        {
            let mut s = handle.state.lock();
            if s.status != ShellStatus::Running {
                return false;
            }
            s.status = ShellStatus::Killed;
            s.ended_at = Some(Utc::now());
        }
        handle.kill.cancel();
        info!(shell_id = %id, "background shell kill requested");
        true
    }

    /// The last ten lines of each stream plus current status. Truncation
    /// here is a view concern; the stored buffers stay complete.
    pub fn output(&self, id: &str) -> Option<ShellOutput> {
        let handle = self.shells.get(id)?;
        let s = handle.state.lock();
        Some(ShellOutput {
            id: id.to_string(),
            status: s.status,
            exit_code: s.exit_code,
            stdout: tail(&s.stdout, OUTPUT_TAIL_LINES),
            stderr: tail(&s.stderr, OUTPUT_TAIL_LINES),
        })
    }

    pub fn list(&self) -> Vec<ShellSnapshot> {
        let mut snapshots: Vec<ShellSnapshot> = self
            .shells
            .iter()
            .map(|entry| {
                let s = entry.value().state.lock();
                let end = s.ended_at.unwrap_or_else(Utc::now);
                ShellSnapshot {
                    id: entry.key().clone(),
                    command: s.command.clone(),
                    status: s.status,
                    started_at: s.started_at,
                    exit_code: s.exit_code,
                    runtime_secs: (end - s.started_at).num_seconds(),
                }
            })
            .collect();
        snapshots.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        snapshots
    }

    pub fn status(&self, id: &str) -> Option<ShellStatus> {
        self.shells.get(id).map(|h| h.state.lock().status)
    }

    /// Evict a shell from the table; running shells are killed first.
    /// This is the only way a shell record goes away short of shutdown.
    pub fn remove(&self, id: &str) -> bool {
        self.kill(id);
        self.shells.remove(id).is_some()
    }

    /// Kill every running shell. Called when the application exits.
    pub fn shutdown(&self) -> usize {
        let ids: Vec<String> = self.shells.iter().map(|e| e.key().clone()).collect();
        ids.iter().filter(|id| self.kill(id)).count()
    }
}

impl Default for ProcessManager {
    fn default() -> Self {
        Self::new()
    }
}

enum StreamKind {
    Stdout,
    Stderr,
}

fn spawn_reader(
    stream: impl AsyncRead + Unpin + Send + 'static,
    state: Arc<Mutex<ShellState>>,
    kind: StreamKind,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let mut s = state.lock();
            match kind {
                StreamKind::Stdout => s.stdout.push(line),
                StreamKind::Stderr => s.stderr.push(line),
            }
        }
    })
}

fn tail(lines: &[String], n: usize) -> String {
    let start = lines.len().saturating_sub(n);
    lines[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn wait_for_terminal(manager: &ProcessManager, id: &str) -> ShellStatus {
        for _ in 0..100 {
            let status = manager.status(id).unwrap();
            if status.is_terminal() {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("shell {id} never reached a terminal state");
    }

    #[tokio::test]
    async fn natural_exit_records_completed_and_code() {
        let manager = ProcessManager::new();
        let id = manager.spawn("exit 0", Path::new("/tmp"));

        let status = wait_for_terminal(&manager, &id).await;
        assert_eq!(status, ShellStatus::Completed);

        let output = manager.output(&id).unwrap();
        assert_eq!(output.exit_code, Some(0));
    }

    #[tokio::test]
    async fn nonzero_exit_code_recorded() {
        let manager = ProcessManager::new();
        let id = manager.spawn("exit 3", Path::new("/tmp"));

        wait_for_terminal(&manager, &id).await;
        assert_eq!(manager.output(&id).unwrap().exit_code, Some(3));
    }

    #[tokio::test]
    async fn kill_leaves_no_exit_code() {
        let manager = ProcessManager::new();
        let id = manager.spawn("sleep 5", Path::new("/tmp"));

        assert!(manager.kill(&id));
        let output = manager.output(&id).unwrap();
        assert_eq!(output.status, ShellStatus::Killed);
        assert_eq!(output.exit_code, None);
    }

    #[tokio::test]
    async fn kill_is_noop_on_terminal_shell() {
        let manager = ProcessManager::new();
        let id = manager.spawn("exit 0", Path::new("/tmp"));

        wait_for_terminal(&manager, &id).await;
        assert!(!manager.kill(&id));
        // Status stays completed; kill never overwrites a terminal state.
        assert_eq!(manager.status(&id), Some(ShellStatus::Completed));
    }

    #[tokio::test]
    async fn kill_unknown_id_returns_false() {
        let manager = ProcessManager::new();
        assert!(!manager.kill("shell-999"));
    }

    #[tokio::test]
    async fn output_is_captured() {
        let manager = ProcessManager::new();
        let id = manager.spawn("echo out; echo err >&2", Path::new("/tmp"));

        wait_for_terminal(&manager, &id).await;
        let output = manager.output(&id).unwrap();
        assert_eq!(output.stdout, "out");
        assert_eq!(output.stderr, "err");
    }

    #[tokio::test]
    async fn output_view_tails_ten_lines() {
        let manager = ProcessManager::new();
        let id = manager.spawn("for i in $(seq 1 25); do echo line-$i; done", Path::new("/tmp"));

        wait_for_terminal(&manager, &id).await;
        let output = manager.output(&id).unwrap();
        let lines: Vec<&str> = output.stdout.lines().collect();
        assert_eq!(lines.len(), 10);
        assert_eq!(lines[0], "line-16");
        assert_eq!(lines[9], "line-25");
    }

    #[tokio::test]
    async fn spawn_failure_surfaces_as_completed_shell() {
        let manager = ProcessManager::new().with_shell("/nonexistent/bash");
        let id = manager.spawn("echo hi", Path::new("/tmp"));

        let output = manager.output(&id).unwrap();
        assert_eq!(output.status, ShellStatus::Completed);
        assert_eq!(output.exit_code, Some(-1));
        assert!(output.stderr.contains("Failed to spawn"));
    }

    #[tokio::test]
    async fn list_orders_by_start_time() {
        let manager = ProcessManager::new();
        let first = manager.spawn("sleep 2", Path::new("/tmp"));
        let second = manager.spawn("sleep 2", Path::new("/tmp"));

        let shells = manager.list();
        assert_eq!(shells.len(), 2);
        assert_eq!(shells[0].id, first);
        assert_eq!(shells[1].id, second);
        assert_eq!(shells[0].status, ShellStatus::Running);

        manager.shutdown();
    }

    #[tokio::test]
    async fn ids_are_monotonic() {
        let manager = ProcessManager::new();
        let a = manager.spawn("exit 0", Path::new("/tmp"));
        let b = manager.spawn("exit 0", Path::new("/tmp"));
        assert_eq!(a, "shell-1");
        assert_eq!(b, "shell-2");
    }

    #[tokio::test]
    async fn remove_evicts_and_kills() {
        let manager = ProcessManager::new();
        let id = manager.spawn("sleep 5", Path::new("/tmp"));

        assert!(manager.remove(&id));
        assert!(manager.output(&id).is_none());
        assert!(!manager.remove(&id));
    }

    #[tokio::test]
    async fn shutdown_kills_running_shells_only() {
        let manager = ProcessManager::new();
        let done = manager.spawn("exit 0", Path::new("/tmp"));
        wait_for_terminal(&manager, &done).await;
        manager.spawn("sleep 5", Path::new("/tmp"));
        manager.spawn("sleep 5", Path::new("/tmp"));

        assert_eq!(manager.shutdown(), 2);
    }
}
