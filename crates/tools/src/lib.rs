//! One-shot tools: synchronous, policy-checked operations that run to
//! completion inside a single request. Every path they touch is confined to
//! the sandbox root.

pub mod archive;
pub mod exec;
pub mod fs;
pub mod search;
