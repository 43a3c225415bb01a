use serde::{Deserialize, Serialize};

/// Immutable per-invocation record correlating a (possibly denied) execution
/// attempt with a redacted command preview.
///
/// Created once per attempt, attached to every response, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Opaque unique token for this invocation (128-bit random hex).
    pub execution_id: String,
    /// Name of the deny-rule set in effect when the record was produced.
    pub policy_profile: String,
    /// Tool that was invoked, e.g. `process.start`.
    pub tool: String,
    /// Redacted, truncated rendering of the command.
    pub command_preview: String,
}
