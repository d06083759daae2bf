//! Exclusive lease on a pooled connection

use std::sync::Arc;

use anyhow::{bail, Result};
use mcpool_core::{ToolInfo, ToolParams, ToolResult};
use uuid::Uuid;

use super::record::ConnectionRecord;

/// A checked-out client.
///
/// Gives access to the server's tools but not to the connection lifecycle:
/// closing is the pool's job. Hand the lease back with
/// [`ConnectionPool::release_client`](super::ConnectionPool::release_client).
/// Once the pool force-closes the underlying connection every call fails.
pub struct PooledClient {
    record: Arc<ConnectionRecord>,
}

impl PooledClient {
    pub(crate) fn new(record: Arc<ConnectionRecord>) -> Self {
        Self { record }
    }

    pub(crate) fn into_record(self) -> Arc<ConnectionRecord> {
        self.record
    }

    #[cfg(test)]
    pub(crate) fn record(&self) -> &Arc<ConnectionRecord> {
        &self.record
    }

    #[cfg(test)]
    pub(crate) fn is_active(&self) -> bool {
        self.record.is_active()
    }

    pub fn server_id(&self) -> &str {
        self.record.server_id()
    }

    /// Identity of the pooled connection backing this lease. Two leases with
    /// the same record id share the same client instance.
    pub fn record_id(&self) -> Uuid {
        self.record.id()
    }

    /// False once the transport died or the pool force-closed the connection.
    pub fn is_connected(&self) -> bool {
        !self.record.snapshot().closed && self.record.client().is_connected()
    }

    pub async fn list_tools(&self) -> Result<Vec<ToolInfo>> {
        self.ensure_open()?;
        self.record.client().list_tools().await
    }

    pub async fn call_tool(&self, name: &str, params: ToolParams) -> Result<ToolResult> {
        self.ensure_open()?;
        self.record.record_call();
        self.record.client().call_tool(name, params).await
    }

    pub async fn ping(&self) -> Result<()> {
        self.ensure_open()?;
        self.record.client().ping().await
    }

    fn ensure_open(&self) -> Result<()> {
        if self.record.snapshot().closed {
            bail!(
                "Connection {} to {} was closed by the pool",
                self.record.id(),
                self.record.server_id()
            );
        }
        Ok(())
    }
}

impl std::fmt::Debug for PooledClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledClient")
            .field("server_id", &self.record.server_id())
            .field("record_id", &self.record.id())
            .finish()
    }
}
