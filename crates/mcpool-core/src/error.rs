//! Pool error taxonomy

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::domain::ServerId;

pub type PoolResult<T> = Result<T, PoolError>;

/// Errors surfaced by the connection pool.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("Server not registered: {0}")]
    NotRegistered(ServerId),

    #[error("Connection pool is closed")]
    PoolClosed,

    #[error("Server already registered: {0}")]
    DuplicateServer(ServerId),

    #[error("No active connection for server: {0}")]
    NoActiveConnection(ServerId),

    #[error("Failed to establish connection to {server_id}: {source:#}")]
    ConnectEstablish {
        server_id: ServerId,
        #[source]
        source: anyhow::Error,
    },

    #[error("Connection to {server_id} timed out after {timeout:?}")]
    ConnectTimeout {
        server_id: ServerId,
        timeout: Duration,
    },

    #[error("Connection to {0} cancelled by caller")]
    Cancelled(ServerId),

    #[error("Forced shutdown: {still_active} connection(s) still active after {grace_period:?}")]
    ForcedShutdown {
        still_active: usize,
        grace_period: Duration,
    },

    #[error("Invalid registration for '{server_id}': {reason}")]
    InvalidRegistration { server_id: ServerId, reason: String },

    #[error("Invalid pool configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Prewarm(#[from] PrewarmError),
}

impl PoolError {
    /// Whether a caller-side retry wrapper may try the same acquisition again.
    ///
    /// The pool itself never retries.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PoolError::ConnectEstablish { .. } | PoolError::ConnectTimeout { .. }
        )
    }
}

/// Aggregate of per-server failures from a pre-warming batch.
#[derive(Debug, Error)]
pub struct PrewarmError {
    pub failures: Vec<(ServerId, PoolError)>,
}

impl PrewarmError {
    pub fn server_ids(&self) -> impl Iterator<Item = &str> {
        self.failures.iter().map(|(id, _)| id.as_str())
    }
}

impl fmt::Display for PrewarmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pre-warming failed for {} server(s)", self.failures.len())?;
        for (server_id, err) in &self.failures {
            write!(f, "; {}: {}", server_id, err)?;
        }
        Ok(())
    }
}
