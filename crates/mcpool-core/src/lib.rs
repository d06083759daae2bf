//! # McPool Core Library
//!
//! Domain types, capability traits and shared plumbing for McPool.
//!
//! ## Modules
//!
//! - `domain` - Server registrations, transport configuration, tool descriptors
//! - `client` - The Client capability every transport implements, plus its factory
//! - `config` - Pool tuning knobs (idle timeout, reclaim interval, grace period)
//! - `error` - Error taxonomy shared by the pool and its callers
//! - `logging` - Tracing subscriber setup

pub mod client;
pub mod config;
pub mod domain;
pub mod error;
pub mod logging;

// Re-export commonly used types
pub use client::{ClientFactory, McpClient, ToolParams, ToolResult};
pub use config::PoolConfig;
pub use domain::*;
pub use error::{PoolError, PoolResult, PrewarmError};
pub use logging::{init_tracing, LogConfig};
