//! Graceful shutdown
//!
//! `close` stops new checkouts, stops the reclaimer, waits up to
//! `grace_period` for outstanding leases to come back, then closes every
//! remaining client. Leases still held at the deadline are force-closed and
//! counted as leaks.

use std::time::Duration;

use mcpool_core::{PoolError, PoolResult};
use tokio::time::Instant;
use tracing::{info, warn};

use super::record::{CloseReason, Closing};
use super::{ConnectionPool, Lifecycle, PoolShared};

/// Result of the first `close`, replayed to every later caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CloseOutcome {
    Clean,
    Forced { still_active: usize },
}

impl ConnectionPool {
    /// Shut the pool down.
    ///
    /// Returns [`PoolError::ForcedShutdown`] when leases were still held after
    /// the grace period. Calling `close` again is a no-op that returns the
    /// first call's result; concurrent callers wait for the first to finish.
    pub async fn close(&self) -> PoolResult<()> {
        let outcome = *self.close_outcome.get_or_init(|| self.shutdown()).await;
        match outcome {
            CloseOutcome::Clean => Ok(()),
            CloseOutcome::Forced { still_active } => Err(PoolError::ForcedShutdown {
                still_active,
                grace_period: self.shared.config.grace_period,
            }),
        }
    }

    async fn shutdown(&self) -> CloseOutcome {
        self.shared.table.lock().lifecycle = Lifecycle::ShuttingDown;
        info!(
            grace_period = ?self.shared.config.grace_period,
            "Connection pool shutting down"
        );

        let reclaimer = self.reclaimer.lock().take();
        if let Some(reclaimer) = reclaimer {
            reclaimer.stop().await;
        }

        self.shared
            .wait_for_releases(self.shared.config.grace_period)
            .await;
        let still_active = self.shared.close_everything().await;
        self.shared.table.lock().lifecycle = Lifecycle::Closed;

        if still_active == 0 {
            info!("Connection pool closed");
            CloseOutcome::Clean
        } else {
            warn!(still_active, "Connection pool force-closed with active leases");
            CloseOutcome::Forced { still_active }
        }
    }
}

impl PoolShared {
    /// Wait until no record holds a reference or `grace` elapses. Returns
    /// whether the pool drained in time.
    async fn wait_for_releases(&self, grace: Duration) -> bool {
        let deadline = Instant::now() + grace;
        loop {
            let notified = self.released.notified();
            tokio::pin!(notified);
            // Register before checking so a release in between is not missed
            notified.as_mut().enable();

            let active = self.active_count();
            if active == 0 {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                warn!(active, "Grace period elapsed with leases outstanding");
                return false;
            }

            let wake_at = deadline.min(now + self.config.shutdown_poll_interval);
            let _ = tokio::time::timeout_at(wake_at, notified).await;
        }
    }

    /// Remove every record from the table and close its client. Returns how
    /// many were still referenced.
    async fn close_everything(&self) -> usize {
        let closing: Vec<Closing> = {
            let mut table = self.table.lock();
            let servers = std::mem::take(&mut table.servers);
            let closing: Vec<Closing> = servers
                .into_values()
                .flatten()
                .filter_map(|record| {
                    record.mark_closed().map(|outstanding| Closing {
                        record,
                        reason: CloseReason::Shutdown,
                        outstanding,
                    })
                })
                .collect();
            for entry in &closing {
                table.orphan(entry.record.server_id(), entry.outstanding);
            }
            closing
        };

        let still_active = closing.iter().filter(|entry| entry.outstanding > 0).count();
        self.close_all(closing).await;
        still_active
    }
}
