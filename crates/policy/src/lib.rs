//! Execution policy: gatekeeps every command before a process is spawned.
//!
//! The engine is stateless and reentrant; the only side effect anywhere is
//! audit-id generation. Denials are reported as structured decisions, never
//! panics or bare errors.

use std::{collections::HashMap, path::PathBuf};

use {
    once_cell::sync::Lazy,
    serde::{Deserialize, Serialize},
    tracing::debug,
};

use toolcase_common::{AuditRecord, ToolError, confine_path};

/// Name of the deny-rule set currently in effect, stamped into every audit
/// record.
pub const POLICY_PROFILE: &str = "default-restricted-v1";

/// Maximum rendered length of a command preview in audit records.
const PREVIEW_MAX_LEN: usize = 240;

/// Executable base names that are never allowed to run.
static DENY_COMMANDS: Lazy<Vec<&'static str>> =
    Lazy::new(|| vec!["shutdown", "reboot", "poweroff", "halt", "mkfs"]);

/// Environment variable names that must not be overridden (dynamic-linker
/// injection vectors).
static DENY_ENV_EXACT: Lazy<Vec<&'static str>> =
    Lazy::new(|| vec!["LD_PRELOAD", "DYLD_INSERT_LIBRARIES"]);

/// Environment variable prefixes that must not be overridden (shellshock-style
/// function injection).
const DENY_ENV_PREFIXES: &[&str] = &["BASH_FUNC_"];

/// Substrings that mark a token as secret-bearing in previews.
const SECRET_MARKERS: &[&str] = &["password", "secret", "token", "apikey", "api_key"];

/// A command as supplied by a caller: either a single string to be tokenized
/// with shell-word rules, or a pre-split argv.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CommandSpec {
    Line(String),
    Argv(Vec<String>),
}

/// Outcome of a policy check. Produced per invocation, not persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl PolicyDecision {
    fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
        }
    }
}

/// Tokenize a command into argv form. Quoting is respected; there is no glob
/// or variable expansion, and the result is never passed through a shell.
pub fn normalize_command(cmd: &CommandSpec) -> Result<Vec<String>, ToolError> {
    let argv = match cmd {
        CommandSpec::Line(line) => shell_words::split(line)
            .map_err(|e| ToolError::InvalidCommand(format!("invalid command string: {e}")))?,
        CommandSpec::Argv(argv) => argv.clone(),
    };
    if argv.is_empty() {
        return Err(ToolError::EmptyCommand);
    }
    Ok(argv)
}

/// Pure decision engine over a fixed rule set and configured ceilings.
#[derive(Debug, Clone)]
pub struct PolicyEngine {
    sandbox_root: PathBuf,
    max_timeout_s: u64,
}

impl PolicyEngine {
    pub fn new(sandbox_root: impl Into<PathBuf>, max_timeout_s: u64) -> Self {
        Self {
            sandbox_root: sandbox_root.into(),
            max_timeout_s,
        }
    }

    pub fn sandbox_root(&self) -> &std::path::Path {
        &self.sandbox_root
    }

    /// Resolve a requested working directory against the sandbox root.
    ///
    /// `None` means the policy imposes no constraint. Relative paths are
    /// joined to the root; symlinks are resolved before the containment
    /// check, so a link cannot escape the root.
    pub fn resolve_cwd(&self, cwd: Option<&str>) -> Result<Option<PathBuf>, ToolError> {
        match cwd {
            None => Ok(None),
            Some(raw) => confine_path(&self.sandbox_root, raw).map(Some),
        }
    }

    /// Run the ordered deny checks. Short-circuits on the first failure and
    /// returns a single human-readable reason.
    pub fn check_execution(
        &self,
        tool: &str,
        argv: &[String],
        cwd: Option<&str>,
        env: Option<&HashMap<String, String>>,
        timeout_s: Option<u64>,
    ) -> PolicyDecision {
        let binary = argv
            .first()
            .map(|arg0| base_name(arg0))
            .unwrap_or_default();
        if DENY_COMMANDS.contains(&binary) || binary.starts_with("mkfs.") {
            debug!(tool, binary, "policy: denied command");
            return PolicyDecision::deny(format!("command '{binary}' is denied"));
        }

        if let Some(raw) = cwd
            && let Err(e) = self.resolve_cwd(Some(raw))
        {
            debug!(tool, cwd = raw, "policy: denied cwd");
            return PolicyDecision::deny(e.to_string());
        }

        if let Some(requested) = timeout_s
            && requested > self.max_timeout_s
        {
            debug!(tool, requested, "policy: denied timeout");
            return PolicyDecision::deny(format!(
                "timeout_s exceeds maximum policy limit ({})",
                self.max_timeout_s
            ));
        }

        if let Some(env) = env {
            for key in env.keys() {
                if DENY_ENV_EXACT.contains(&key.as_str())
                    || DENY_ENV_PREFIXES.iter().any(|p| key.starts_with(p))
                {
                    debug!(tool, key, "policy: denied env var");
                    return PolicyDecision::deny(format!("env var '{key}' is denied"));
                }
            }
        }

        PolicyDecision::allow()
    }

    /// Build the audit record for an invocation attempt. Always succeeds;
    /// runs for denied attempts too.
    pub fn build_audit(&self, argv: &[String], tool: &str) -> AuditRecord {
        AuditRecord {
            execution_id: uuid::Uuid::new_v4().simple().to_string(),
            policy_profile: POLICY_PROFILE.into(),
            tool: tool.into(),
            command_preview: command_preview(argv, PREVIEW_MAX_LEN),
        }
    }
}

fn base_name(arg0: &str) -> &str {
    std::path::Path::new(arg0)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(arg0)
}

/// Redact a single token for preview purposes.
///
/// A `key=value` token whose key side carries a secret marker keeps the key
/// and masks the value; any other token carrying a marker is masked whole.
fn sanitize_arg(arg: &str) -> String {
    let lowered = arg.to_lowercase();
    if let Some((key, _value)) = arg.split_once('=') {
        let key_lowered = key.to_lowercase();
        if SECRET_MARKERS.iter().any(|m| key_lowered.contains(m)) {
            return format!("{key}=***");
        }
    }
    if SECRET_MARKERS.iter().any(|m| lowered.contains(m)) {
        return "***".into();
    }
    arg.into()
}

/// Render a redacted, shell-safe, bounded preview of an argv for audit logs.
pub fn command_preview(argv: &[String], max_len: usize) -> String {
    let sanitized: Vec<String> = argv.iter().map(|arg| sanitize_arg(arg)).collect();
    let quoted: Vec<String> = sanitized
        .iter()
        .map(|arg| shell_words::quote(arg).into_owned())
        .collect();
    let preview = quoted.join(" ");
    truncate_chars(&preview, max_len)
}

fn truncate_chars(text: &str, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        return text.into();
    }
    let kept: String = text.chars().take(max_len.saturating_sub(3)).collect();
    format!("{kept}...")
}
