//! Client capability
//!
//! Every transport (stdio, Streamable HTTP, SSE) implements [`McpClient`] once.
//! The pool only ever talks to servers through this trait and builds new
//! clients through a [`ClientFactory`].
//!
//! Cancellation follows the usual async Rust contract: dropping a returned
//! future abandons the operation.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::domain::{ServerRegistration, ToolInfo};

/// String-keyed, loosely-typed tool arguments.
pub type ToolParams = Map<String, Value>;

/// String-keyed, loosely-typed tool result.
pub type ToolResult = Map<String, Value>;

/// Connection to one MCP server over one transport.
#[async_trait]
pub trait McpClient: Send + Sync {
    /// Establish the transport and run the protocol handshake.
    async fn connect(&self) -> Result<()>;

    /// Tear the connection down. Closing an already closed client is a no-op.
    async fn close(&self) -> Result<()>;

    /// Whether the transport is still usable.
    fn is_connected(&self) -> bool;

    async fn list_tools(&self) -> Result<Vec<ToolInfo>>;

    async fn call_tool(&self, name: &str, params: ToolParams) -> Result<ToolResult>;

    async fn ping(&self) -> Result<()>;
}

/// Builds unconnected clients from registrations.
pub trait ClientFactory: Send + Sync {
    fn create(&self, registration: &ServerRegistration) -> Result<Arc<dyn McpClient>>;
}
