//! rmcp client handler shared by every transport

use rmcp::model::{
    ClientCapabilities, ClientInfo, Implementation, LoggingLevel, LoggingMessageNotificationParam,
};
use rmcp::service::NotificationContext;
use rmcp::RoleClient;
use tracing::{debug, error, info, warn};

/// Client handler for pooled MCP connections
#[derive(Clone)]
pub struct McpClientHandler {
    info: ClientInfo,
    server_id: String,
}

impl std::fmt::Debug for McpClientHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpClientHandler")
            .field("server_id", &self.server_id)
            .finish()
    }
}

impl McpClientHandler {
    pub fn new(server_id: &str) -> Self {
        Self {
            info: ClientInfo {
                protocol_version: Default::default(),
                capabilities: ClientCapabilities::default(),
                client_info: Implementation {
                    name: format!("mcpool-{}", server_id),
                    version: env!("CARGO_PKG_VERSION").to_string(),
                    title: Some("McPool".to_string()),
                    icons: None,
                    website_url: None,
                    ..Default::default()
                },
                meta: None,
            },
            server_id: server_id.to_string(),
        }
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }
}

impl rmcp::ClientHandler for McpClientHandler {
    fn get_info(&self) -> ClientInfo {
        self.info.clone()
    }

    fn on_tool_list_changed(
        &self,
        _context: NotificationContext<RoleClient>,
    ) -> impl std::future::Future<Output = ()> + Send + '_ {
        let server_id = self.server_id.clone();
        async move {
            info!(server_id = %server_id, "Server sent tools/list_changed notification");
        }
    }

    // Forward server log messages into our own tracing output
    fn on_logging_message(
        &self,
        params: LoggingMessageNotificationParam,
        _context: NotificationContext<RoleClient>,
    ) -> impl std::future::Future<Output = ()> + Send + '_ {
        let server_id = self.server_id.clone();
        async move {
            let message = match &params.data {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            let logger = params.logger.as_deref().unwrap_or("-");

            match params.level {
                LoggingLevel::Debug => {
                    debug!(server_id = %server_id, logger, "Server log: {}", message)
                }
                LoggingLevel::Info | LoggingLevel::Notice => {
                    info!(server_id = %server_id, logger, "Server log: {}", message)
                }
                LoggingLevel::Warning => {
                    warn!(server_id = %server_id, logger, "Server log: {}", message)
                }
                LoggingLevel::Error
                | LoggingLevel::Critical
                | LoggingLevel::Alert
                | LoggingLevel::Emergency => {
                    error!(server_id = %server_id, logger, "Server log: {}", message)
                }
            }
        }
    }
}
