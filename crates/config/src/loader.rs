use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::schema::ToolcaseConfig;

const CONFIG_FILENAME: &str = "toolcase.toml";

/// Load config from the given path.
pub fn load_config(path: &Path) -> anyhow::Result<ToolcaseConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let cfg = toml::from_str(&raw)
        .map_err(|e| anyhow::anyhow!("failed to parse {}: {e}", path.display()))?;
    Ok(cfg)
}

/// Discover and load config from standard locations, then apply env overrides.
///
/// Search order:
/// 1. `./toolcase.toml` (project-local)
/// 2. `~/.config/toolcase/toolcase.toml` (user-global)
///
/// Returns defaults (plus env overrides) if no config file is found.
pub fn discover_and_load() -> ToolcaseConfig {
    let mut cfg = if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        match load_config(&path) {
            Ok(cfg) => cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
                ToolcaseConfig::default()
            },
        }
    } else {
        debug!("no config file found, using defaults");
        ToolcaseConfig::default()
    };
    apply_env_overrides(&mut cfg);
    cfg
}

/// Find the first config file in standard locations.
fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from(CONFIG_FILENAME);
    if local.exists() {
        return Some(local);
    }
    if let Some(dir) = config_dir() {
        let p = dir.join(CONFIG_FILENAME);
        if p.exists() {
            return Some(p);
        }
    }
    None
}

/// Returns the user-global config directory (`~/.config/toolcase/`).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "toolcase").map(|d| d.config_dir().to_path_buf())
}

/// Apply `TOOLCASE_*` environment overrides on top of a loaded config.
pub fn apply_env_overrides(cfg: &mut ToolcaseConfig) {
    if let Ok(root) = std::env::var("TOOLCASE_SANDBOX_ROOT") {
        cfg.sandbox_root = PathBuf::from(root);
    }
    if let Some(n) = env_parse::<usize>("TOOLCASE_MAX_READ_BYTES") {
        cfg.max_read_bytes = n;
    }
    if let Ok(bind) = std::env::var("TOOLCASE_BIND") {
        cfg.gateway.bind = bind;
    }
    if let Some(port) = env_parse::<u16>("TOOLCASE_PORT") {
        cfg.gateway.port = port;
    }
    if let Some(limit) = env_parse::<u64>("TOOLCASE_POLICY_MAX_TIMEOUT_S") {
        cfg.policy.max_timeout_s = limit;
    }
    if let Ok(url) = std::env::var("TOOLCASE_BASE_URL") {
        cfg.bridge.base_url = url;
    }
    if let Some(ttl) = env_parse::<f64>("TOOLCASE_TOOLS_CACHE_TTL_S") {
        cfg.bridge.tools_cache_ttl_s = ttl;
    }
    if let Some(secs) = env_parse::<u64>("TOOLCASE_BACKEND_TIMEOUT_S") {
        cfg.bridge.backend_timeout_s = secs;
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    match std::env::var(key) {
        Ok(raw) => match raw.parse() {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(key, value = %raw, "ignoring unparseable env override");
                None
            },
        },
        Err(_) => None,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_load_config_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("toolcase.toml");
        std::fs::write(&path, "sandbox_root = \"/srv/box\"\n[gateway]\nport = 9000\n").unwrap();

        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.sandbox_root, PathBuf::from("/srv/box"));
        assert_eq!(cfg.gateway.port, 9000);
    }

    #[test]
    fn test_load_config_missing_file() {
        assert!(load_config(Path::new("/nonexistent/toolcase.toml")).is_err());
    }

    #[test]
    fn test_no_env_overrides_leaves_defaults() {
        let mut cfg = ToolcaseConfig::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.policy.max_timeout_s, ToolcaseConfig::default().policy.max_timeout_s);
        assert_eq!(cfg.gateway.port, ToolcaseConfig::default().gateway.port);
    }
}
