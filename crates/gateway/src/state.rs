use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};

use {
    toolcase_config::ToolcaseConfig, toolcase_policy::PolicyEngine,
    toolcase_supervisor::ProcessSupervisor,
};

/// Shared state behind every gateway handler.
///
/// The supervisor is constructed here once and injected; handlers never
/// reach for a global table.
pub struct GatewayState {
    pub policy: PolicyEngine,
    pub supervisor: Arc<ProcessSupervisor>,
    pub sandbox_root: PathBuf,
    pub max_read_bytes: usize,
}

impl GatewayState {
    pub fn from_config(config: &ToolcaseConfig) -> Result<Self> {
        let sandbox_root = config
            .sandbox_root
            .canonicalize()
            .with_context(|| format!("sandbox root {:?} is not usable", config.sandbox_root))?;
        let policy = PolicyEngine::new(&sandbox_root, config.policy.max_timeout_s);
        let supervisor = Arc::new(ProcessSupervisor::new(policy.clone()));
        Ok(Self {
            policy,
            supervisor,
            sandbox_root,
            max_read_bytes: config.max_read_bytes,
        })
    }
}
