//! Configuration loading and env overrides.
//!
//! Config file: `toolcase.toml`, searched in `./` then the user config dir.
//! Every key can be overridden with a `TOOLCASE_*` environment variable.

pub mod loader;
pub mod schema;

pub use {
    loader::{apply_env_overrides, config_dir, discover_and_load, load_config},
    schema::{BridgeConfig, GatewayConfig, PolicyConfig, ToolcaseConfig},
};
