//! MCP transport implementations
//!
//! - Stdio: local process communication via child process
//! - HTTP / SSE: remote server communication via Streamable HTTP
//!
//! [`TransportFactory`] turns a registration into the matching client. New
//! transports are added here without touching the pool.

mod http;
mod session;
mod stdio;

use std::sync::Arc;

use anyhow::Result;
use mcpool_core::{ClientFactory, McpClient, ServerRegistration, TransportConfig};
use tracing::debug;

pub use http::HttpClient;
pub use session::McpService;
pub use stdio::{configure_child_process_platform, parse_command, StdioClient};

/// Factory for rmcp-backed clients
#[derive(Debug, Clone, Copy, Default)]
pub struct TransportFactory;

impl TransportFactory {
    pub fn new() -> Self {
        Self
    }
}

impl ClientFactory for TransportFactory {
    fn create(&self, registration: &ServerRegistration) -> Result<Arc<dyn McpClient>> {
        debug!(
            server_id = %registration.id,
            transport = %registration.transport.description(),
            "Creating transport client"
        );

        let client: Arc<dyn McpClient> = match &registration.transport {
            TransportConfig::Stdio { command, args, env } => Arc::new(StdioClient::new(
                registration.id.clone(),
                command.clone(),
                args.clone(),
                env.clone(),
            )),
            TransportConfig::Http {
                url,
                headers,
                timeout,
            } => Arc::new(HttpClient::http(
                registration.id.clone(),
                url.clone(),
                headers.clone(),
                *timeout,
            )),
            TransportConfig::Sse {
                url,
                headers,
                timeout,
            } => Arc::new(HttpClient::sse(
                registration.id.clone(),
                url.clone(),
                headers.clone(),
                *timeout,
            )),
        };
        Ok(client)
    }
}
