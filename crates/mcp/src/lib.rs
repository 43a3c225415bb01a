//! MCP stdio bridge: a JSON-RPC 2.0 server over framed stdin/stdout that
//! proxies tool calls to the HTTP gateway.
//!
//! This crate provides:
//! - `Content-Length` framing over async streams (`framing`)
//! - the backend HTTP client with a finite per-call timeout (`backend`)
//! - the request dispatcher with the TTL tool cache (`bridge`)
//! - JSON-RPC and MCP wire types (`types`)

pub mod backend;
pub mod bridge;
pub mod error;
pub mod framing;
pub mod types;

pub use {
    backend::Backend,
    bridge::{McpBridge, print_config, run_stdio},
    error::{Error, Result},
};
