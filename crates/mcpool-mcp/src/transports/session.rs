//! Running rmcp session shared by the transport clients
//!
//! Holds the `RunningService` once the handshake succeeded and implements the
//! request side of the Client capability on top of its peer. Transports only
//! differ in how they get a service into the slot.

use std::future::Future;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use mcpool_core::{ToolInfo, ToolParams, ToolResult};
use parking_lot::Mutex;
use rmcp::model::{
    CallToolRequestParams, ClientRequest, PingRequest, PingRequestMethod, Tool,
};
use rmcp::service::{Peer, RunningService};
use rmcp::RoleClient;
use tracing::{debug, info, warn};

use crate::handler::McpClientHandler;

/// Type alias for a connected MCP client service
pub type McpService = RunningService<RoleClient, McpClientHandler>;

pub(crate) struct SessionSlot {
    server_id: String,
    /// Applied to every request when set
    request_timeout: Option<Duration>,
    service: Mutex<Option<McpService>>,
    /// Serializes concurrent `connect` calls on the same client
    connect_lock: tokio::sync::Mutex<()>,
}

impl SessionSlot {
    pub(crate) fn new(server_id: String, request_timeout: Option<Duration>) -> Self {
        Self {
            server_id,
            request_timeout,
            service: Mutex::new(None),
            connect_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub(crate) fn server_id(&self) -> &str {
        &self.server_id
    }

    pub(crate) fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout
    }

    pub(crate) async fn lock_connect(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.connect_lock.lock().await
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.service
            .lock()
            .as_ref()
            .is_some_and(|service| !service.peer().is_transport_closed())
    }

    /// Store a freshly connected service.
    pub(crate) fn install(&self, service: McpService) {
        let previous = self.service.lock().replace(service);
        if let Some(previous) = previous {
            // Only reachable when a dead transport is replaced by a reconnect
            warn!(server_id = %self.server_id, "Replacing stale MCP session");
            let server_id = self.server_id.clone();
            tokio::spawn(async move {
                if let Err(e) = previous.cancel().await {
                    warn!(server_id = %server_id, error = %e, "Failed to cancel stale MCP session");
                }
            });
        }
    }

    /// Cancel the running service. Idempotent.
    pub(crate) async fn close(&self) -> Result<()> {
        let service = self.service.lock().take();
        match service {
            Some(service) => {
                info!(server_id = %self.server_id, "Disconnecting from MCP server");
                service
                    .cancel()
                    .await
                    .context("Failed to cancel service")?;
                Ok(())
            }
            None => {
                debug!(server_id = %self.server_id, "Close on already closed session");
                Ok(())
            }
        }
    }

    fn peer(&self) -> Result<Peer<RoleClient>> {
        self.service
            .lock()
            .as_ref()
            .map(|service| service.peer().clone())
            .ok_or_else(|| anyhow!("Server not connected: {}", self.server_id))
    }

    async fn with_timeout<T, F>(&self, what: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match self.request_timeout {
            Some(timeout) => tokio::time::timeout(timeout, fut)
                .await
                .map_err(|_| anyhow!("{} timed out after {:?}", what, timeout))?,
            None => fut.await,
        }
    }

    pub(crate) async fn list_tools(&self) -> Result<Vec<ToolInfo>> {
        let peer = self.peer()?;
        let tools = self
            .with_timeout("tools/list", async {
                peer.list_all_tools()
                    .await
                    .context("Failed to list tools")
            })
            .await?;

        debug!(server_id = %self.server_id, tool_count = tools.len(), "Retrieved tools from server");
        Ok(tools.into_iter().map(tool_info).collect())
    }

    pub(crate) async fn call_tool(&self, name: &str, params: ToolParams) -> Result<ToolResult> {
        debug!(server_id = %self.server_id, tool = %name, "Calling tool");

        let peer = self.peer()?;
        let result = self
            .with_timeout("tools/call", async {
                peer.call_tool(CallToolRequestParams {
                    name: name.to_string().into(),
                    arguments: Some(params),
                    task: None,
                    meta: None,
                })
                .await
                .context("Tool call failed")
            })
            .await?;

        match serde_json::to_value(result).context("Failed to serialize tool result")? {
            serde_json::Value::Object(map) => Ok(map),
            other => Err(anyhow!("Unexpected tool result shape: {}", other)),
        }
    }

    pub(crate) async fn ping(&self) -> Result<()> {
        let peer = self.peer()?;
        self.with_timeout("ping", async {
            peer.send_request(ClientRequest::PingRequest(PingRequest {
                method: PingRequestMethod,
                extensions: Default::default(),
            }))
            .await
            .context("Ping failed")
        })
        .await?;
        Ok(())
    }
}

fn tool_info(tool: Tool) -> ToolInfo {
    ToolInfo {
        name: tool.name.to_string(),
        description: tool.description.map(|d| d.to_string()),
        input_schema: Some(tool.input_schema.as_ref().clone()),
        output_schema: tool.output_schema.map(|schema| schema.as_ref().clone()),
    }
}
