use serde_json::json;
use thiserror::Error;

use crate::audit::AuditRecord;

/// Error taxonomy shared by every tool surface.
///
/// Each variant maps to a stable wire tag via [`ToolError::kind`]; responses
/// always carry `{ok: false, error: <tag>, ...}` so callers can distinguish a
/// policy denial from an execution failure by the literal tag.
#[derive(Error, Debug)]
pub enum ToolError {
    /// Malformed command string (e.g. unbalanced quoting). Rejected before
    /// any side effect.
    #[error("{0}")]
    InvalidCommand(String),

    /// Command tokenized to zero arguments.
    #[error("command is empty")]
    EmptyCommand,

    /// Rejected by the execution policy. Carries the full audit record so a
    /// denial can be correlated with the attempted command.
    #[error("{reason}")]
    PolicyDenied { reason: String, audit: AuditRecord },

    /// Referenced pid or resource is unknown.
    #[error("{0}")]
    NotFound(String),

    /// A wait bound was exceeded.
    #[error("{0}")]
    Timeout(String),

    /// Output capture was disabled for the process.
    #[error("output capture was disabled for this process")]
    NoOutput,

    /// Path escapes the sandbox root, or the OS refused access.
    #[error("{0}")]
    PermissionDenied(String),

    /// Path exists but is the wrong kind for the operation (file vs
    /// directory), or refers to something the operation cannot act on.
    #[error("{0}")]
    InvalidPath(String),

    /// The OS refused to spawn the process. Carries the audit record so the
    /// attempt is still correlatable.
    #[error("{message}")]
    SpawnFailed { message: String, audit: AuditRecord },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Unexpected failure, catch-all.
    #[error("{0}")]
    Internal(String),
}

impl ToolError {
    /// Stable wire tag for this error.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidCommand(_) => "invalid_command",
            Self::EmptyCommand => "empty_command",
            Self::PolicyDenied { .. } => "policy_denied",
            Self::NotFound(_) => "not_found",
            Self::Timeout(_) => "timeout",
            Self::NoOutput => "no_output",
            Self::PermissionDenied(_) => "permission_denied",
            Self::InvalidPath(_) => "invalid_path",
            Self::SpawnFailed { .. } | Self::Io(_) | Self::Internal(_) => "internal_error",
        }
    }

    /// Serialize as the uniform failure body.
    ///
    /// Policy denials always include the audit record; other failures carry
    /// the tag plus a human-readable reason.
    #[must_use]
    pub fn to_response(&self) -> serde_json::Value {
        match self {
            Self::PolicyDenied { reason, audit } => json!({
                "ok": false,
                "error": "policy_denied",
                "reason": reason,
                "audit": audit,
            }),
            Self::SpawnFailed { message, audit } => json!({
                "ok": false,
                "error": "internal_error",
                "reason": message,
                "audit": audit,
            }),
            other => json!({
                "ok": false,
                "error": other.kind(),
                "reason": other.to_string(),
            }),
        }
    }

    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

pub type Error = ToolError;
pub type Result<T> = std::result::Result<T, ToolError>;

// ── Shared context trait ────────────────────────────────────────────────────

/// Trait for error types that can be constructed from a plain message string.
///
/// Implement this for your crate's error type, then invoke [`impl_context!`]
/// in your error module to get `.context()` and `.with_context()` on `Result`
/// and `Option`.
pub trait FromMessage: Sized {
    fn from_message(message: String) -> Self;
}

impl FromMessage for ToolError {
    fn from_message(message: String) -> Self {
        Self::Internal(message)
    }
}

/// Generate a crate-local `Context` trait with `.context()` and `.with_context()`
/// methods on `Result` and `Option`.
///
/// Invoke inside a module that defines `Error: FromMessage` and
/// `type Result<T> = std::result::Result<T, Error>`.
///
/// ```ignore
/// // in crates/foo/src/error.rs
/// toolcase_common::impl_context!();
/// ```
#[macro_export]
macro_rules! impl_context {
    () => {
        pub trait Context<T> {
            fn context(self, context: impl Into<String>) -> Result<T>;
            fn with_context<C, F>(self, f: F) -> Result<T>
            where
                C: Into<String>,
                F: FnOnce() -> C;
        }

        impl<T, E: std::fmt::Display> Context<T> for std::result::Result<T, E> {
            fn context(self, context: impl Into<String>) -> Result<T> {
                let ctx = context.into();
                self.map_err(|source| {
                    <Error as $crate::FromMessage>::from_message(format!("{ctx}: {source}"))
                })
            }

            fn with_context<C, F>(self, f: F) -> Result<T>
            where
                C: Into<String>,
                F: FnOnce() -> C,
            {
                self.map_err(|source| {
                    let ctx = f().into();
                    <Error as $crate::FromMessage>::from_message(format!("{ctx}: {source}"))
                })
            }
        }

        impl<T> Context<T> for Option<T> {
            fn context(self, context: impl Into<String>) -> Result<T> {
                self.ok_or_else(|| <Error as $crate::FromMessage>::from_message(context.into()))
            }

            fn with_context<C, F>(self, f: F) -> Result<T>
            where
                C: Into<String>,
                F: FnOnce() -> C,
            {
                self.ok_or_else(|| <Error as $crate::FromMessage>::from_message(f().into()))
            }
        }
    };
}
