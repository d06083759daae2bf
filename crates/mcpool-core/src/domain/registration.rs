//! Server registrations
//!
//! A registration maps a server identity to everything needed to open a
//! transport to it. Registrations are immutable once handed to the pool.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::serde_ms;
use crate::error::PoolError;

/// Opaque identity of one logical server endpoint.
pub type ServerId = String;

/// Wire transport used to reach a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    Stdio,
    Http,
    Sse,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransportKind::Stdio => "stdio",
            TransportKind::Http => "http",
            TransportKind::Sse => "sse",
        };
        f.write_str(name)
    }
}

/// Launch/transport parameters for a server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransportConfig {
    /// Child process speaking line-delimited JSON-RPC over stdin/stdout
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: HashMap<String, String>,
    },
    /// Streamable HTTP request/response
    Http {
        url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
        #[serde(default, with = "serde_ms::option")]
        timeout: Option<Duration>,
    },
    /// Server-sent-events streaming
    Sse {
        url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
        #[serde(default, with = "serde_ms::option")]
        timeout: Option<Duration>,
    },
}

impl TransportConfig {
    /// Get the transport kind for this config
    pub fn kind(&self) -> TransportKind {
        match self {
            TransportConfig::Stdio { .. } => TransportKind::Stdio,
            TransportConfig::Http { .. } => TransportKind::Http,
            TransportConfig::Sse { .. } => TransportKind::Sse,
        }
    }

    /// Get URL for HTTP/SSE transports
    pub fn url(&self) -> Option<&str> {
        match self {
            TransportConfig::Http { url, .. } | TransportConfig::Sse { url, .. } => Some(url),
            TransportConfig::Stdio { .. } => None,
        }
    }

    /// Human-readable description for logs (e.g. "stdio:npx", "http:https://mcp.example.com")
    pub fn description(&self) -> String {
        match self {
            TransportConfig::Stdio { command, .. } => format!("stdio:{}", command),
            TransportConfig::Http { url, .. } => format!("http:{}", url),
            TransportConfig::Sse { url, .. } => format!("sse:{}", url),
        }
    }
}

/// A server the pool may connect to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerRegistration {
    pub id: ServerId,
    pub transport: TransportConfig,
}

impl ServerRegistration {
    pub fn new(id: impl Into<ServerId>, transport: TransportConfig) -> Self {
        Self {
            id: id.into(),
            transport,
        }
    }

    /// Registration for a stdio server.
    pub fn stdio(id: impl Into<ServerId>, command: impl Into<String>, args: Vec<String>) -> Self {
        Self::new(
            id,
            TransportConfig::Stdio {
                command: command.into(),
                args,
                env: HashMap::new(),
            },
        )
    }

    /// Registration for a Streamable HTTP server.
    pub fn http(id: impl Into<ServerId>, url: impl Into<String>) -> Self {
        Self::new(
            id,
            TransportConfig::Http {
                url: url.into(),
                headers: HashMap::new(),
                timeout: None,
            },
        )
    }

    /// Registration for an SSE server.
    pub fn sse(id: impl Into<ServerId>, url: impl Into<String>) -> Self {
        Self::new(
            id,
            TransportConfig::Sse {
                url: url.into(),
                headers: HashMap::new(),
                timeout: None,
            },
        )
    }

    /// Add an environment variable (stdio only, ignored otherwise).
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        if let TransportConfig::Stdio { env, .. } = &mut self.transport {
            env.insert(key.into(), value.into());
        }
        self
    }

    /// Add a request header (http/sse only, ignored otherwise).
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        match &mut self.transport {
            TransportConfig::Http { headers, .. } | TransportConfig::Sse { headers, .. } => {
                headers.insert(key.into(), value.into());
            }
            TransportConfig::Stdio { .. } => {}
        }
        self
    }

    /// Set the request timeout (http/sse only, ignored otherwise).
    pub fn with_timeout(mut self, value: Duration) -> Self {
        match &mut self.transport {
            TransportConfig::Http { timeout, .. } | TransportConfig::Sse { timeout, .. } => {
                *timeout = Some(value);
            }
            TransportConfig::Stdio { .. } => {}
        }
        self
    }

    pub fn kind(&self) -> TransportKind {
        self.transport.kind()
    }

    /// Reject registrations no transport could ever connect with.
    pub fn validate(&self) -> Result<(), PoolError> {
        let invalid = |reason: String| PoolError::InvalidRegistration {
            server_id: self.id.clone(),
            reason,
        };

        if self.id.trim().is_empty() {
            return Err(invalid("server id must not be empty".to_string()));
        }

        match &self.transport {
            TransportConfig::Stdio { command, .. } => {
                if command.trim().is_empty() {
                    return Err(invalid("stdio command must not be empty".to_string()));
                }
            }
            TransportConfig::Http { url, timeout, .. } | TransportConfig::Sse { url, timeout, .. } => {
                url::Url::parse(url).map_err(|e| invalid(format!("invalid URL '{}': {}", url, e)))?;
                if matches!(timeout, Some(t) if t.is_zero()) {
                    return Err(invalid("timeout must be greater than zero".to_string()));
                }
            }
        }

        Ok(())
    }
}
