//! # McPool MCP Library
//!
//! MCP client transports and the connection pool that manages them.
//!
//! This crate provides:
//! - MCP clients over stdio, Streamable HTTP and SSE (rmcp-backed)
//! - A connection pool with exclusive leases per server identity
//! - Background reclamation of idle connections and leaked leases
//! - Graceful shutdown with a grace period and forced close
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       ConnectionPool                            │
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │  HashMap<server_id, Vec<ConnectionRecord>>               │   │
//! │  │                                                          │   │
//! │  │  "github" → [record (active, 1 ref), record (idle)]      │   │
//! │  │  "files"  → [record (idle, pinned)]                      │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! │        ▲ acquire / release          ▲ sweep every interval      │
//! │        │                            │                           │
//! │   PooledClient (lease)          Reclaimer task                  │
//! └─────────────────────────────────────────────────────────────────┘
//!                              │ ClientFactory
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     TransportFactory                            │
//! │  ┌──────────────────┐  ┌──────────────────────────────┐        │
//! │  │   StdioClient    │  │   HttpClient (http / sse)    │        │
//! │  │  (child process) │  │   (Streamable HTTP client)   │        │
//! │  └──────────────────┘  └──────────────────────────────┘        │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use mcpool_core::{PoolConfig, ServerRegistration};
//! use mcpool_mcp::ConnectionPool;
//!
//! let pool = ConnectionPool::with_transports(PoolConfig::default())?;
//! pool.register_server(ServerRegistration::stdio(
//!     "github",
//!     "npx",
//!     vec!["-y".to_string(), "@modelcontextprotocol/server-github".to_string()],
//! ))?;
//!
//! let client = pool.acquire("github").await?;
//! let tools = client.list_tools().await?;
//! pool.release_client(client)?;
//!
//! pool.close().await?;
//! ```

pub mod client_pool;
pub mod handler;
pub mod transports;

pub use client_pool::{ConnectionPool, PoolStats, PooledClient, ServerStats};
pub use handler::McpClientHandler;
pub use transports::{HttpClient, McpService, StdioClient, TransportFactory};
