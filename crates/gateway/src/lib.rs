//! Gateway: HTTP surface over the toolbox.
//!
//! Lifecycle:
//! 1. Load + validate config
//! 2. Build shared state (policy engine + process supervisor)
//! 3. Bind and serve the router (health, catalog, per-tool POST routes)
//!
//! Tool semantics live in the policy, supervisor, and tools crates; this
//! crate only maps wire shapes onto them and translates errors to HTTP.

pub mod catalog;
pub mod routes;
pub mod server;
pub mod state;

pub use {
    server::{build_gateway_app, run_server},
    state::GatewayState,
};
