//! Process supervisor: owns the lifecycle of server-spawned child processes,
//! independent of the request that started them.
//!
//! One supervisor is constructed at server start and injected into every
//! handler; there is no ambient global table. The table is pid-keyed and is
//! never pruned automatically; callers are allowed to query processes that
//! exited long ago, so entries live for the life of the server. Entries carry
//! the audit execution id, and a stale
//! exited entry is replaced if the OS reuses its pid for a new spawn.

mod entry;

use std::{collections::HashMap, path::PathBuf, sync::Arc};

use {
    serde::{Deserialize, Serialize},
    tokio::{process::Command, sync::Mutex},
    tracing::{debug, info, warn},
};

use {
    toolcase_common::{AuditRecord, ToolError},
    toolcase_policy::{CommandSpec, PolicyEngine, normalize_command},
};

pub use entry::{OutputStream, ProcessSnapshot};
use entry::{CaptureFiles, ProcessEntry};

/// Subdirectory of the sandbox root holding capture files.
const CAPTURE_DIR: &str = ".toolcase/process";

/// Request to start a supervised process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartRequest {
    pub cmd: CommandSpec,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub env: Option<HashMap<String, String>>,
    #[serde(default = "default_true")]
    pub capture_output: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize)]
pub struct StartResult {
    pub ok: bool,
    pub pid: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr_path: Option<PathBuf>,
    pub audit: AuditRecord,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusResult {
    pub ok: bool,
    pub pid: u32,
    pub running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub returncode: Option<i32>,
    pub cmd: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
    pub start_time: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr_path: Option<PathBuf>,
    pub audit: AuditRecord,
}

#[derive(Debug, Clone, Serialize)]
pub struct KillResult {
    pub ok: bool,
    /// `"exited"` if the process was already gone, `"terminated"` otherwise.
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub returncode: Option<i32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReadResult {
    pub ok: bool,
    pub pid: u32,
    pub stream: OutputStream,
    /// Total size of the backing capture file, in bytes.
    pub size: u64,
    pub content: String,
    /// True when `content` covers less than the full file.
    pub truncated: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListResult {
    pub ok: bool,
    pub processes: Vec<StatusResult>,
}

/// Supervisor over a table of spawned child processes.
///
/// The table lock is held only for insert/lookup; waiting on or polling a
/// child happens on the per-entry lock after the entry reference has been
/// cloned out.
pub struct ProcessSupervisor {
    policy: PolicyEngine,
    table: Mutex<HashMap<u32, Arc<Mutex<ProcessEntry>>>>,
}

impl ProcessSupervisor {
    pub fn new(policy: PolicyEngine) -> Self {
        Self {
            policy,
            table: Mutex::new(HashMap::new()),
        }
    }

    /// Normalize and policy-check the command, then spawn it detached from
    /// the calling request. Output capture redirects the child's stdout and
    /// stderr into freshly-named log files under the sandbox root.
    pub async fn start(&self, req: &StartRequest) -> Result<StartResult, ToolError> {
        let argv = normalize_command(&req.cmd)?;
        let audit = self.policy.build_audit(&argv, "process.start");

        let decision = self.policy.check_execution(
            "process.start",
            &argv,
            req.cwd.as_deref(),
            req.env.as_ref(),
            None,
        );
        if !decision.allowed {
            return Err(ToolError::PolicyDenied {
                reason: decision.reason.unwrap_or_else(|| "policy denied".into()),
                audit,
            });
        }

        let resolved_cwd = self.policy.resolve_cwd(req.cwd.as_deref())?;

        let capture = if req.capture_output {
            Some(self.allocate_capture_files(&audit)?)
        } else {
            None
        };

        let mut cmd = Command::new(&argv[0]);
        cmd.args(&argv[1..]).stdin(std::process::Stdio::null());
        if let Some(ref dir) = resolved_cwd {
            cmd.current_dir(dir);
        }
        if let Some(ref env) = req.env {
            cmd.envs(env);
        }
        match capture {
            Some(ref files) => {
                cmd.stdout(files.stdout_stdio()?);
                cmd.stderr(files.stderr_stdio()?);
            },
            None => {
                cmd.stdout(std::process::Stdio::null());
                cmd.stderr(std::process::Stdio::null());
            },
        }

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                // No stale capture files for a process that never existed.
                if let Some(files) = capture {
                    files.remove();
                }
                return Err(ToolError::SpawnFailed {
                    message: format!("failed to spawn '{}': {e}", argv[0]),
                    audit,
                });
            },
        };

        let Some(pid) = child.id() else {
            return Err(ToolError::internal("spawned child has no pid"));
        };

        let (stdout_path, stderr_path) = match capture {
            Some(ref files) => (Some(files.stdout_path.clone()), Some(files.stderr_path.clone())),
            None => (None, None),
        };

        let entry = ProcessEntry::new(child, argv.clone(), resolved_cwd.clone(), capture, audit.clone());
        {
            let mut table = self.table.lock().await;
            if let Some(previous) = table.insert(pid, Arc::new(Mutex::new(entry))) {
                // OS pid reuse: the old entry must already be gone, so the
                // record is superseded rather than aliased.
                let previous = previous.lock().await;
                warn!(
                    pid,
                    stale_execution_id = %previous.audit().execution_id,
                    "pid reused, replacing stale process entry"
                );
            }
        }

        info!(pid, preview = %audit.command_preview, "process started");
        Ok(StartResult {
            ok: true,
            pid,
            cwd: resolved_cwd,
            stdout_path,
            stderr_path,
            audit,
        })
    }

    /// Report whether the process is still running, via a non-blocking poll.
    /// Observing an exit closes the capture handles (idempotent); the exit
    /// code is cached and re-reported forever after.
    pub async fn status(&self, pid: u32) -> Result<StatusResult, ToolError> {
        let entry = self.lookup(pid).await?;
        let mut entry = entry.lock().await;
        let returncode = entry.poll();
        Ok(entry.status_view(pid, returncode))
    }

    /// Terminate a tracked process: graceful signal first, and only with
    /// `force` an unconditional kill. Each wait is bounded by `timeout_s`.
    pub async fn kill(&self, pid: u32, force: bool, timeout_s: u64) -> Result<KillResult, ToolError> {
        let entry = self.lookup(pid).await?;
        let mut entry = entry.lock().await;

        if let Some(code) = entry.poll() {
            return Ok(KillResult {
                ok: true,
                status: "exited",
                returncode: Some(code),
            });
        }

        entry.send_terminate();
        let wait = std::time::Duration::from_secs(timeout_s);
        if let Some(code) = entry.wait_with_timeout(wait).await {
            info!(pid, code, "process terminated gracefully");
            return Ok(KillResult {
                ok: true,
                status: "terminated",
                returncode: Some(code),
            });
        }

        if !force {
            return Err(ToolError::Timeout(format!(
                "process {pid} did not exit within {timeout_s}s (use force to escalate)"
            )));
        }

        debug!(pid, "graceful wait expired, escalating to kill");
        entry.send_kill().await;
        match entry.wait_with_timeout(wait).await {
            Some(code) => {
                info!(pid, code, "process killed");
                Ok(KillResult {
                    ok: true,
                    status: "terminated",
                    returncode: Some(code),
                })
            },
            None => Err(ToolError::internal(format!(
                "process {pid} survived SIGKILL wait"
            ))),
        }
    }

    /// Read captured output for a tracked process, bounded by `max_bytes`.
    /// `tail` returns the most recent bytes instead of the start of the file.
    pub async fn read(
        &self,
        pid: u32,
        stream: OutputStream,
        max_bytes: usize,
        tail: bool,
    ) -> Result<ReadResult, ToolError> {
        let entry = self.lookup(pid).await?;
        let path = {
            let entry = entry.lock().await;
            entry
                .capture_path(stream)
                .ok_or(ToolError::NoOutput)?
                .to_path_buf()
        };
        if !path.exists() {
            return Err(ToolError::NotFound(format!(
                "capture file for pid {pid} ({stream}) is missing"
            )));
        }

        let (content, size, truncated) = read_window(&path, max_bytes, tail)?;
        Ok(ReadResult {
            ok: true,
            pid,
            stream,
            size,
            content,
            truncated,
        })
    }

    /// Full status view of every tracked process, with a fresh poll each.
    pub async fn list(&self) -> ListResult {
        let entries = self.entries().await;
        let mut processes = Vec::with_capacity(entries.len());
        for (pid, entry) in entries {
            let mut entry = entry.lock().await;
            let returncode = entry.poll();
            processes.push(entry.status_view(pid, returncode));
        }
        processes.sort_by_key(|p| p.pid);
        ListResult {
            ok: true,
            processes,
        }
    }

    /// Lightweight snapshot for supervisory/UI consumption.
    pub async fn snapshot(&self) -> Vec<ProcessSnapshot> {
        let entries = self.entries().await;
        let mut snapshots = Vec::with_capacity(entries.len());
        for (pid, entry) in entries {
            let mut entry = entry.lock().await;
            let returncode = entry.poll();
            snapshots.push(entry.snapshot_view(pid, returncode));
        }
        snapshots.sort_by_key(|s| s.pid);
        snapshots
    }

    async fn lookup(&self, pid: u32) -> Result<Arc<Mutex<ProcessEntry>>, ToolError> {
        let table = self.table.lock().await;
        table
            .get(&pid)
            .cloned()
            .ok_or_else(|| ToolError::NotFound(format!("pid {pid} is not tracked")))
    }

    async fn entries(&self) -> Vec<(u32, Arc<Mutex<ProcessEntry>>)> {
        let table = self.table.lock().await;
        table
            .iter()
            .map(|(pid, entry)| (*pid, Arc::clone(entry)))
            .collect()
    }

    /// Allocate capture log files keyed by the audit execution id (chosen
    /// pre-spawn, so two concurrent starts can never collide on a path).
    fn allocate_capture_files(&self, audit: &AuditRecord) -> Result<CaptureFiles, ToolError> {
        let dir = self.policy.sandbox_root().join(CAPTURE_DIR);
        std::fs::create_dir_all(&dir)?;
        CaptureFiles::create(&dir, &audit.execution_id)
    }
}

/// Read up to `max_bytes` from `path`; `tail` seeks to the end first.
/// Decodes as UTF-8 with a lossy fallback that preserves length.
fn read_window(
    path: &std::path::Path,
    max_bytes: usize,
    tail: bool,
) -> Result<(String, u64, bool), ToolError> {
    use std::io::{Read, Seek, SeekFrom};

    let mut file = std::fs::File::open(path)?;
    let size = file.metadata()?.len();
    if tail && size > max_bytes as u64 {
        file.seek(SeekFrom::Start(size - max_bytes as u64))?;
    }
    let mut data = Vec::with_capacity(max_bytes.min(size as usize));
    file.take(max_bytes as u64).read_to_end(&mut data)?;

    let truncated = (data.len() as u64) < size;
    let content = String::from_utf8_lossy(&data).into_owned();
    Ok((content, size, truncated))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn supervisor(root: &std::path::Path) -> ProcessSupervisor {
        ProcessSupervisor::new(PolicyEngine::new(root, 300))
    }

    fn start_req(cmd: &str, capture: bool) -> StartRequest {
        StartRequest {
            cmd: CommandSpec::Line(cmd.into()),
            cwd: None,
            env: None,
            capture_output: capture,
        }
    }

    async fn wait_for_exit(sup: &ProcessSupervisor, pid: u32) -> StatusResult {
        for _ in 0..100 {
            let status = sup.status(pid).await.unwrap();
            if !status.running {
                return status;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        panic!("process {pid} did not exit in time");
    }

    #[tokio::test]
    async fn test_start_and_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(dir.path());

        let started = sup.start(&start_req("echo fixed-output", true)).await.unwrap();
        assert!(started.ok);
        assert!(started.stdout_path.is_some());

        wait_for_exit(&sup, started.pid).await;
        let read = sup
            .read(started.pid, OutputStream::Stdout, 1 << 20, true)
            .await
            .unwrap();
        assert_eq!(read.content, "fixed-output\n");
        assert!(!read.truncated);
        assert_eq!(read.size, read.content.len() as u64);
    }

    #[tokio::test]
    async fn test_status_idempotent_after_exit() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(dir.path());

        let started = sup.start(&start_req("true", false)).await.unwrap();
        let first = wait_for_exit(&sup, started.pid).await;
        let second = sup.status(started.pid).await.unwrap();
        assert_eq!(first.returncode, second.returncode);
        assert_eq!(first.returncode, Some(0));
        assert!(!second.running);
    }

    #[tokio::test]
    async fn test_nonzero_exit_code_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(dir.path());

        let started = sup.start(&start_req("sh -c 'exit 3'", false)).await.unwrap();
        let status = wait_for_exit(&sup, started.pid).await;
        assert_eq!(status.returncode, Some(3));
    }

    #[tokio::test]
    async fn test_policy_denied_start_spawns_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(dir.path());

        let err = sup.start(&start_req("shutdown -h now", true)).await.unwrap_err();
        assert_eq!(err.kind(), "policy_denied");
        match err {
            ToolError::PolicyDenied { audit, .. } => {
                assert_eq!(audit.tool, "process.start");
            },
            other => panic!("unexpected error: {other}"),
        }
        assert!(sup.list().await.processes.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_command_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(dir.path());
        let err = sup.start(&start_req("echo 'oops", true)).await.unwrap_err();
        assert_eq!(err.kind(), "invalid_command");
    }

    #[tokio::test]
    async fn test_spawn_failure_removes_capture_files() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(dir.path());

        let err = sup
            .start(&start_req("definitely-not-a-binary-xyz", true))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "internal_error");

        let capture_dir = dir.path().join(CAPTURE_DIR);
        let leftovers: Vec<_> = std::fs::read_dir(&capture_dir)
            .map(|rd| rd.filter_map(|e| e.ok()).collect())
            .unwrap_or_default();
        assert!(leftovers.is_empty(), "stale capture files: {leftovers:?}");
    }

    #[tokio::test]
    async fn test_status_unknown_pid() {
        let dir = tempfile::tempdir().unwrap();
        let err = supervisor(dir.path()).status(999_999_999).await.unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[tokio::test]
    async fn test_kill_unknown_pid() {
        let dir = tempfile::tempdir().unwrap();
        let err = supervisor(dir.path())
            .kill(999_999_999, false, 1)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[tokio::test]
    async fn test_kill_already_exited() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(dir.path());
        let started = sup.start(&start_req("true", false)).await.unwrap();
        wait_for_exit(&sup, started.pid).await;

        let killed = sup.kill(started.pid, false, 1).await.unwrap();
        assert_eq!(killed.status, "exited");
        assert_eq!(killed.returncode, Some(0));
    }

    #[tokio::test]
    async fn test_kill_graceful() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(dir.path());
        let started = sup.start(&start_req("sleep 30", false)).await.unwrap();

        let killed = sup.kill(started.pid, false, 5).await.unwrap();
        assert_eq!(killed.status, "terminated");

        let status = sup.status(started.pid).await.unwrap();
        assert!(!status.running);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_kill_force_escalates_on_stubborn_child() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(dir.path());
        // Child that ignores SIGTERM.
        let started = sup
            .start(&start_req("sh -c 'trap \"\" TERM; sleep 30'", false))
            .await
            .unwrap();
        // Give the shell a moment to install the trap.
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;

        let err = sup.kill(started.pid, false, 1).await.unwrap_err();
        assert_eq!(err.kind(), "timeout");

        let killed = sup.kill(started.pid, true, 2).await.unwrap();
        assert_eq!(killed.status, "terminated");
    }

    #[tokio::test]
    async fn test_read_without_capture() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(dir.path());
        let started = sup.start(&start_req("true", false)).await.unwrap();
        let err = sup
            .read(started.pid, OutputStream::Stdout, 1024, true)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "no_output");
    }

    #[tokio::test]
    async fn test_read_tail_window() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(dir.path());
        let started = sup
            .start(&start_req("sh -c 'printf 0123456789'", true))
            .await
            .unwrap();
        wait_for_exit(&sup, started.pid).await;

        let tail = sup
            .read(started.pid, OutputStream::Stdout, 4, true)
            .await
            .unwrap();
        assert_eq!(tail.content, "6789");
        assert!(tail.truncated);
        assert_eq!(tail.size, 10);

        let head = sup
            .read(started.pid, OutputStream::Stdout, 4, false)
            .await
            .unwrap();
        assert_eq!(head.content, "0123");
        assert!(head.truncated);
    }

    #[tokio::test]
    async fn test_read_stderr_stream() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(dir.path());
        let started = sup
            .start(&start_req("sh -c 'echo oops >&2'", true))
            .await
            .unwrap();
        wait_for_exit(&sup, started.pid).await;

        let read = sup
            .read(started.pid, OutputStream::Stderr, 1024, true)
            .await
            .unwrap();
        assert_eq!(read.content, "oops\n");
    }

    #[tokio::test]
    async fn test_list_and_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(dir.path());
        let a = sup.start(&start_req("sleep 5", false)).await.unwrap();
        let b = sup.start(&start_req("true", false)).await.unwrap();
        wait_for_exit(&sup, b.pid).await;

        let list = sup.list().await;
        assert_eq!(list.processes.len(), 2);

        let snapshot = sup.snapshot().await;
        assert_eq!(snapshot.len(), 2);
        let running: Vec<u32> = snapshot.iter().filter(|s| s.running).map(|s| s.pid).collect();
        assert_eq!(running, vec![a.pid]);

        // Exited entries are retained, not evicted.
        assert!(snapshot.iter().any(|s| s.pid == b.pid && !s.running));

        sup.kill(a.pid, true, 5).await.unwrap();
    }

    #[tokio::test]
    async fn test_start_resolves_relative_cwd() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("work")).unwrap();
        let sup = supervisor(dir.path());

        let mut req = start_req("pwd", true);
        req.cwd = Some("work".into());
        let started = sup.start(&req).await.unwrap();
        wait_for_exit(&sup, started.pid).await;

        let read = sup
            .read(started.pid, OutputStream::Stdout, 4096, false)
            .await
            .unwrap();
        assert!(read.content.trim_end().ends_with("work"));
    }
}
