//! Connection record: one live client plus its usage bookkeeping
//!
//! Every field that changes after creation lives in [`RecordState`] behind the
//! record's own lock, so the reclaimer, releases and stats never see a torn
//! view. `closed` only ever goes from false to true.

use std::sync::Arc;
use std::time::Duration;

use mcpool_core::{McpClient, PoolConfig, ServerId};
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::warn;
use uuid::Uuid;

/// Mutable part of a record, guarded by the record lock.
#[derive(Debug, Clone)]
pub(crate) struct RecordState {
    pub last_used_at: Instant,
    pub acquired_at: Option<Instant>,
    pub in_use: bool,
    pub ref_count: usize,
    pub closed: bool,
    /// Pre-warmed records are long-lived: exempt from idle reclamation
    pub pinned: bool,
    pub acquisitions: u64,
    pub calls_served: u64,
}

/// Why a record left the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CloseReason {
    IdleTimeout,
    Unhealthy,
    LeaseExpired,
    Shutdown,
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let reason = match self {
            CloseReason::IdleTimeout => "idle timeout",
            CloseReason::Unhealthy => "client disconnected",
            CloseReason::LeaseExpired => "lease expired",
            CloseReason::Shutdown => "pool shutdown",
        };
        f.write_str(reason)
    }
}

/// Result of releasing one reference on a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReleaseOutcome {
    /// Reference dropped; `remaining` references are still outstanding
    Released { remaining: usize },
    /// Nothing to release
    NotActive,
    /// The record was force-closed while referenced
    AlreadyClosed,
}

/// A record that was marked closed and whose client still needs closing.
pub(crate) struct Closing {
    pub record: Arc<ConnectionRecord>,
    pub reason: CloseReason,
    /// References still outstanding at closure time
    pub outstanding: usize,
}

pub(crate) struct ConnectionRecord {
    id: Uuid,
    server_id: ServerId,
    client: Arc<dyn McpClient>,
    created_at: Instant,
    state: Mutex<RecordState>,
}

impl ConnectionRecord {
    /// A record handed straight to its first caller (miss path).
    pub(crate) fn new_active(server_id: ServerId, client: Arc<dyn McpClient>) -> Self {
        let now = Instant::now();
        Self::with_state(
            server_id,
            client,
            now,
            RecordState {
                last_used_at: now,
                acquired_at: Some(now),
                in_use: true,
                ref_count: 1,
                closed: false,
                pinned: false,
                acquisitions: 1,
                calls_served: 0,
            },
        )
    }

    /// An idle record nobody holds yet (pre-warming).
    pub(crate) fn new_idle(server_id: ServerId, client: Arc<dyn McpClient>, pinned: bool) -> Self {
        let now = Instant::now();
        Self::with_state(
            server_id,
            client,
            now,
            RecordState {
                last_used_at: now,
                acquired_at: None,
                in_use: false,
                ref_count: 0,
                closed: false,
                pinned,
                acquisitions: 0,
                calls_served: 0,
            },
        )
    }

    fn with_state(
        server_id: ServerId,
        client: Arc<dyn McpClient>,
        created_at: Instant,
        state: RecordState,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            server_id,
            client,
            created_at,
            state: Mutex::new(state),
        }
    }

    pub(crate) fn id(&self) -> Uuid {
        self.id
    }

    pub(crate) fn server_id(&self) -> &str {
        &self.server_id
    }

    pub(crate) fn client(&self) -> &Arc<dyn McpClient> {
        &self.client
    }

    pub(crate) fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub(crate) fn snapshot(&self) -> RecordState {
        self.state.lock().clone()
    }

    pub(crate) fn is_active(&self) -> bool {
        let state = self.state.lock();
        !state.closed && state.ref_count > 0
    }

    /// Reuse path: Idle → Active if the record is idle and its client still
    /// reports connected.
    pub(crate) fn try_acquire(&self) -> bool {
        let mut state = self.state.lock();
        if state.closed || state.ref_count > 0 || !self.client.is_connected() {
            return false;
        }
        state.in_use = true;
        state.ref_count = 1;
        state.acquired_at = Some(Instant::now());
        state.acquisitions += 1;
        true
    }

    /// Drop one reference. At zero the record turns Idle and `last_used_at`
    /// is stamped.
    pub(crate) fn release(&self) -> ReleaseOutcome {
        let mut state = self.state.lock();
        if state.closed {
            return ReleaseOutcome::AlreadyClosed;
        }
        if state.ref_count == 0 {
            return ReleaseOutcome::NotActive;
        }
        state.ref_count -= 1;
        if state.ref_count == 0 {
            state.in_use = false;
            state.last_used_at = Instant::now();
        }
        ReleaseOutcome::Released {
            remaining: state.ref_count,
        }
    }

    pub(crate) fn pin(&self) {
        self.state.lock().pinned = true;
    }

    pub(crate) fn record_call(&self) {
        let mut state = self.state.lock();
        state.calls_served += 1;
        state.last_used_at = Instant::now();
    }

    /// Mark the record closed regardless of references.
    ///
    /// Returns the references still outstanding, or `None` when it was already
    /// closed, so each record is closed (and counted) exactly once.
    pub(crate) fn mark_closed(&self) -> Option<usize> {
        let mut state = self.state.lock();
        if state.closed {
            return None;
        }
        state.closed = true;
        state.in_use = false;
        Some(state.ref_count)
    }

    /// Decide whether the reclaimer should evict this record and, if so, mark
    /// it closed under the same lock acquisition.
    pub(crate) fn reclaim(&self, now: Instant, config: &PoolConfig) -> Option<(CloseReason, usize)> {
        let mut state = self.state.lock();
        if state.closed {
            return None;
        }

        let reason = if state.ref_count == 0 {
            if !self.client.is_connected() {
                Some(CloseReason::Unhealthy)
            } else if !state.pinned
                && now.saturating_duration_since(state.last_used_at) > config.idle_timeout
            {
                Some(CloseReason::IdleTimeout)
            } else {
                None
            }
        } else {
            match (config.max_lease_duration, state.acquired_at) {
                (Some(max), Some(acquired_at)) if now.saturating_duration_since(acquired_at) > max => {
                    Some(CloseReason::LeaseExpired)
                }
                _ => None,
            }
        }?;

        state.closed = true;
        state.in_use = false;
        Some((reason, state.ref_count))
    }

    /// Close the underlying client. Failures are logged, never propagated.
    pub(crate) async fn close_client(&self, reason: CloseReason) {
        if let Err(e) = self.client.close().await {
            warn!(
                server_id = %self.server_id,
                record_id = %self.id,
                reason = %reason,
                error = %e,
                "Failed to close pooled client"
            );
        }
    }
}

impl std::fmt::Debug for ConnectionRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRecord")
            .field("id", &self.id)
            .field("server_id", &self.server_id)
            .field("state", &*self.state.lock())
            .finish()
    }
}
