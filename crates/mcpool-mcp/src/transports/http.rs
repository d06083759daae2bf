//! HTTP transports for MCP servers
//!
//! Streamable HTTP and SSE servers both go through rmcp's Streamable HTTP
//! client, which consumes `text/event-stream` responses as well as plain JSON
//! ones. Registration headers become default headers on the reqwest client.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use mcpool_core::{McpClient, ToolInfo, ToolParams, ToolResult, TransportKind};
use rmcp::transport::streamable_http_client::StreamableHttpClientTransportConfig;
use rmcp::transport::StreamableHttpClientTransport;
use rmcp::ServiceExt;
use tracing::{debug, info};

use super::session::SessionSlot;
use crate::handler::McpClientHandler;

/// Client for a remote (Streamable HTTP or SSE) MCP server
pub struct HttpClient {
    kind: TransportKind,
    url: String,
    headers: HashMap<String, String>,
    session: SessionSlot,
}

impl HttpClient {
    /// Streamable HTTP client
    pub fn http(
        server_id: impl Into<String>,
        url: impl Into<String>,
        headers: HashMap<String, String>,
        timeout: Option<Duration>,
    ) -> Self {
        Self::new(TransportKind::Http, server_id, url, headers, timeout)
    }

    /// SSE client
    pub fn sse(
        server_id: impl Into<String>,
        url: impl Into<String>,
        headers: HashMap<String, String>,
        timeout: Option<Duration>,
    ) -> Self {
        Self::new(TransportKind::Sse, server_id, url, headers, timeout)
    }

    fn new(
        kind: TransportKind,
        server_id: impl Into<String>,
        url: impl Into<String>,
        headers: HashMap<String, String>,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            kind,
            url: url.into(),
            headers,
            session: SessionSlot::new(server_id.into(), timeout),
        }
    }

    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    pub fn description(&self) -> String {
        format!("{}:{}", self.kind, self.url)
    }

    /// Build a reqwest HeaderMap from the registration headers.
    fn build_default_headers(&self) -> Result<reqwest::header::HeaderMap> {
        let mut header_map = reqwest::header::HeaderMap::new();
        for (key, value) in &self.headers {
            let header_name = reqwest::header::HeaderName::from_bytes(key.as_bytes())
                .with_context(|| format!("Invalid header name '{}'", key))?;
            let header_value = reqwest::header::HeaderValue::from_str(value)
                .with_context(|| format!("Invalid header value for '{}'", key))?;
            header_map.insert(header_name, header_value);
        }
        Ok(header_map)
    }

    /// Build a reqwest::Client with registration headers as default_headers.
    fn build_http_client(&self) -> Result<reqwest::Client> {
        let mut builder = reqwest::Client::builder().default_headers(self.build_default_headers()?);
        if let Some(timeout) = self.session.request_timeout() {
            // Only bounds connection setup; long-lived event streams must stay open
            builder = builder.connect_timeout(timeout);
        }
        builder.build().context("Failed to build HTTP client")
    }
}

#[async_trait]
impl McpClient for HttpClient {
    async fn connect(&self) -> Result<()> {
        let _connecting = self.session.lock_connect().await;
        if self.session.is_connected() {
            return Ok(());
        }

        let server_id = self.session.server_id();
        info!(
            server_id = %server_id,
            transport = %self.kind,
            url = %self.url,
            "Connecting to HTTP server"
        );

        url::Url::parse(&self.url).with_context(|| format!("Invalid URL: {}", self.url))?;
        let client = self.build_http_client()?;
        debug!(server_id = %server_id, header_count = self.headers.len(), "Built HTTP client");

        let transport_config = StreamableHttpClientTransportConfig::with_uri(self.url.as_str());
        let transport = StreamableHttpClientTransport::with_client(client, transport_config);
        let handshake = McpClientHandler::new(server_id).serve(transport);

        let service = match self.session.request_timeout() {
            Some(timeout) => tokio::time::timeout(timeout, handshake)
                .await
                .map_err(|_| anyhow!("MCP handshake timed out after {:?}", timeout))?,
            None => handshake.await,
        }
        .with_context(|| format!("{} connection failed", self.kind))?;

        info!(server_id = %server_id, transport = %self.kind, "HTTP server connected");
        self.session.install(service);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.session.close().await
    }

    fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

    async fn list_tools(&self) -> Result<Vec<ToolInfo>> {
        self.session.list_tools().await
    }

    async fn call_tool(&self, name: &str, params: ToolParams) -> Result<ToolResult> {
        self.session.call_tool(name, params).await
    }

    async fn ping(&self) -> Result<()> {
        self.session.ping().await
    }
}
