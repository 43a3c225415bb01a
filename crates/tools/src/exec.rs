//! Synchronous command execution: run an argv to completion under the
//! execution policy, with a bounded timeout and capped output.

use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use {
    serde::{Deserialize, Serialize},
    tokio::process::Command,
    tracing::{info, warn},
};

use {
    toolcase_common::{AuditRecord, ToolError},
    toolcase_policy::{CommandSpec, PolicyEngine, normalize_command},
};

/// Applied when the request does not name a timeout. The policy ceiling
/// still caps whatever the caller asks for.
pub const DEFAULT_TIMEOUT_S: u64 = 60;

/// Per-stream output cap.
pub const MAX_OUTPUT_BYTES: usize = 200 * 1024;

#[derive(Debug, Clone, Deserialize)]
pub struct ExecRequest {
    pub cmd: CommandSpec,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub env: Option<HashMap<String, String>>,
    #[serde(default)]
    pub timeout_s: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecResult {
    /// True only for a clean zero exit. A timeout reports `ok: false` with
    /// `exit_code: -1` rather than an error, so the audit record still rides
    /// along in the body.
    pub ok: bool,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    pub truncated: bool,
    pub audit: AuditRecord,
}

/// Run a command to completion. The command is tokenized and policy-checked
/// first; the child never goes through a shell, inherits no stdin, and is
/// killed if it outlives the timeout.
pub async fn run(policy: &PolicyEngine, req: &ExecRequest) -> Result<ExecResult, ToolError> {
    let argv = normalize_command(&req.cmd)?;
    let audit = policy.build_audit(&argv, "exec.run");
    let timeout_s = req.timeout_s.unwrap_or(DEFAULT_TIMEOUT_S);

    let decision = policy.check_execution(
        "exec.run",
        &argv,
        req.cwd.as_deref(),
        req.env.as_ref(),
        Some(timeout_s),
    );
    if !decision.allowed {
        return Err(ToolError::PolicyDenied {
            reason: decision.reason.unwrap_or_else(|| "policy denied".into()),
            audit,
        });
    }

    let cwd = policy.resolve_cwd(req.cwd.as_deref())?;

    let mut cmd = Command::new(&argv[0]);
    cmd.args(&argv[1..])
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true);
    if let Some(ref dir) = cwd {
        cmd.current_dir(dir);
    }
    if let Some(ref env) = req.env {
        cmd.envs(env);
    }

    let started = Instant::now();
    let child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            return Err(ToolError::SpawnFailed {
                message: format!("failed to spawn '{}': {e}", argv[0]),
                audit,
            });
        },
    };

    match tokio::time::timeout(Duration::from_secs(timeout_s), child.wait_with_output()).await {
        Ok(Ok(output)) => {
            let duration_ms = started.elapsed().as_millis() as u64;
            let (stdout, out_truncated) =
                cap_output(String::from_utf8_lossy(&output.stdout).into_owned());
            let (stderr, err_truncated) =
                cap_output(String::from_utf8_lossy(&output.stderr).into_owned());
            let exit_code = output.status.code().unwrap_or(-1);
            info!(
                exit_code,
                duration_ms,
                preview = %audit.command_preview,
                "exec.run finished"
            );
            Ok(ExecResult {
                ok: exit_code == 0,
                exit_code,
                stdout,
                stderr,
                duration_ms,
                truncated: out_truncated || err_truncated,
                audit,
            })
        },
        Ok(Err(e)) => Err(ToolError::internal(format!(
            "failed to collect command output: {e}"
        ))),
        Err(_) => {
            // kill_on_drop reaps the child when the wait future is dropped.
            let duration_ms = started.elapsed().as_millis() as u64;
            warn!(timeout_s, preview = %audit.command_preview, "exec.run timed out");
            Ok(ExecResult {
                ok: false,
                exit_code: -1,
                stdout: String::new(),
                stderr: format!("timeout after {timeout_s}s"),
                duration_ms,
                truncated: false,
                audit,
            })
        },
    }
}

/// Truncate to [`MAX_OUTPUT_BYTES`] on a char boundary, with a marker line.
fn cap_output(mut text: String) -> (String, bool) {
    if text.len() <= MAX_OUTPUT_BYTES {
        return (text, false);
    }
    let mut cut = MAX_OUTPUT_BYTES;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text.truncate(cut);
    text.push_str("\n... [output truncated]");
    (text, true)
}
