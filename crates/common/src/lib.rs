//! Shared types, error definitions, and path confinement used across all
//! toolcase crates.

pub mod audit;
pub mod error;
pub mod paths;

pub use {
    audit::AuditRecord,
    error::{Error, FromMessage, Result, ToolError},
    paths::confine_path,
};
