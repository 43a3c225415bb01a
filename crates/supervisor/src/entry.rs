//! Per-process table entry: the child handle, capture files, and the cached
//! exit state.

use std::{
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use {
    serde::{Deserialize, Serialize},
    tokio::process::Child,
    tracing::{debug, warn},
};

use toolcase_common::{AuditRecord, ToolError};

use crate::StatusResult;

/// Which captured stream to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl std::fmt::Display for OutputStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stdout => f.write_str("stdout"),
            Self::Stderr => f.write_str("stderr"),
        }
    }
}

/// Lightweight per-process view for supervisory consumption.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessSnapshot {
    pub pid: u32,
    pub running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub returncode: Option<i32>,
    pub cmd: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
    pub start_time: f64,
    pub capture_output: bool,
}

/// Capture log files for one process, named by a pre-spawn token.
pub(crate) struct CaptureFiles {
    pub stdout_path: PathBuf,
    pub stderr_path: PathBuf,
    stdout_handle: Option<std::fs::File>,
    stderr_handle: Option<std::fs::File>,
}

impl CaptureFiles {
    pub fn create(dir: &Path, token: &str) -> Result<Self, ToolError> {
        let stdout_path = dir.join(format!("{token}.stdout.log"));
        let stderr_path = dir.join(format!("{token}.stderr.log"));
        let stdout_handle = std::fs::File::create(&stdout_path)?;
        let stderr_handle = std::fs::File::create(&stderr_path)?;
        Ok(Self {
            stdout_path,
            stderr_path,
            stdout_handle: Some(stdout_handle),
            stderr_handle: Some(stderr_handle),
        })
    }

    pub fn stdout_stdio(&self) -> Result<std::process::Stdio, ToolError> {
        match self.stdout_handle {
            Some(ref file) => Ok(file.try_clone()?.into()),
            None => Err(ToolError::internal("stdout capture handle already closed")),
        }
    }

    pub fn stderr_stdio(&self) -> Result<std::process::Stdio, ToolError> {
        match self.stderr_handle {
            Some(ref file) => Ok(file.try_clone()?.into()),
            None => Err(ToolError::internal("stderr capture handle already closed")),
        }
    }

    /// Drop the server-side handles. Idempotent.
    fn close_handles(&mut self) {
        self.stdout_handle.take();
        self.stderr_handle.take();
    }

    /// Best-effort removal after a failed spawn.
    pub fn remove(mut self) {
        self.close_handles();
        for path in [&self.stdout_path, &self.stderr_path] {
            if let Err(e) = std::fs::remove_file(path) {
                warn!(path = %path.display(), error = %e, "failed to remove capture file");
            }
        }
    }
}

/// One tracked child process. Owned exclusively by the supervisor table.
///
/// State machine: spawned, then running or exited; exit is sticky: once
/// observed, the cached exit code is returned without touching the OS again.
pub(crate) struct ProcessEntry {
    child: Child,
    argv: Vec<String>,
    cwd: Option<PathBuf>,
    start_time: f64,
    capture: Option<CaptureFiles>,
    capture_enabled: bool,
    exit_code: Option<i32>,
    audit: AuditRecord,
}

impl ProcessEntry {
    pub fn new(
        child: Child,
        argv: Vec<String>,
        cwd: Option<PathBuf>,
        capture: Option<CaptureFiles>,
        audit: AuditRecord,
    ) -> Self {
        let start_time = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or_default();
        let capture_enabled = capture.is_some();
        Self {
            child,
            argv,
            cwd,
            start_time,
            capture,
            capture_enabled,
            exit_code: None,
            audit,
        }
    }

    pub fn audit(&self) -> &AuditRecord {
        &self.audit
    }

    /// Non-blocking poll. Returns the exit code if the process has finished;
    /// caches the result and closes capture handles on first observation.
    pub fn poll(&mut self) -> Option<i32> {
        if let Some(code) = self.exit_code {
            return Some(code);
        }
        match self.child.try_wait() {
            Ok(Some(status)) => {
                let code = status.code().unwrap_or(-1);
                debug!(code, "observed process exit");
                self.record_exit(code);
                Some(code)
            },
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "failed to poll child process");
                None
            },
        }
    }

    /// Blocking wait bounded by `timeout`. Returns the exit code, or `None`
    /// if the bound expired first.
    pub async fn wait_with_timeout(&mut self, timeout: std::time::Duration) -> Option<i32> {
        if let Some(code) = self.exit_code {
            return Some(code);
        }
        match tokio::time::timeout(timeout, self.child.wait()).await {
            Ok(Ok(status)) => {
                let code = status.code().unwrap_or(-1);
                self.record_exit(code);
                Some(code)
            },
            Ok(Err(e)) => {
                warn!(error = %e, "failed to wait for child process");
                None
            },
            Err(_) => None,
        }
    }

    /// Send the graceful termination signal. No-op if the pid is gone.
    pub fn send_terminate(&mut self) {
        #[cfg(unix)]
        {
            use nix::{
                sys::signal::{Signal, kill},
                unistd::Pid,
            };

            if let Some(pid) = self.child.id() {
                let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
            }
        }

        // No graceful signal on non-unix; escalation handles it.
        #[cfg(not(unix))]
        {
            let _ = self.child.start_kill();
        }
    }

    /// Unconditional kill.
    pub async fn send_kill(&mut self) {
        if let Err(e) = self.child.kill().await {
            warn!(error = %e, "failed to kill child process");
        }
    }

    fn record_exit(&mut self, code: i32) {
        self.exit_code = Some(code);
        if let Some(ref mut capture) = self.capture {
            capture.close_handles();
        }
    }

    pub fn capture_path(&self, stream: OutputStream) -> Option<&Path> {
        let capture = self.capture.as_ref()?;
        Some(match stream {
            OutputStream::Stdout => capture.stdout_path.as_path(),
            OutputStream::Stderr => capture.stderr_path.as_path(),
        })
    }

    pub fn status_view(&self, pid: u32, returncode: Option<i32>) -> StatusResult {
        StatusResult {
            ok: true,
            pid,
            running: returncode.is_none(),
            returncode,
            cmd: self.argv.clone(),
            cwd: self.cwd.clone(),
            start_time: self.start_time,
            stdout_path: self.capture.as_ref().map(|c| c.stdout_path.clone()),
            stderr_path: self.capture.as_ref().map(|c| c.stderr_path.clone()),
            audit: self.audit.clone(),
        }
    }

    pub fn snapshot_view(&self, pid: u32, returncode: Option<i32>) -> ProcessSnapshot {
        ProcessSnapshot {
            pid,
            running: returncode.is_none(),
            returncode,
            cmd: self.argv.clone(),
            cwd: self.cwd.clone(),
            start_time: self.start_time,
            capture_output: self.capture_enabled,
        }
    }
}
