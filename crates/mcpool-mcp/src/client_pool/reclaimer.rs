//! Background reclaimer
//!
//! Runs every `reclaim_interval`, closing idle records past `idle_timeout`,
//! idle records whose client disconnected, and leases held longer than
//! `max_lease_duration` (counted as leaks).

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::record::Closing;
use super::{Lifecycle, PoolShared};

pub(crate) struct Reclaimer {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl Reclaimer {
    pub(crate) fn spawn(shared: Arc<PoolShared>) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(shared.config.reclaim_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        let closed = shared.sweep().await;
                        if closed > 0 {
                            info!(closed, "Reclaimer closed connections");
                        }
                    }
                }
            }
            debug!("Reclaimer stopped");
        });

        Self { cancel, handle }
    }

    /// Signal the task to stop without waiting for it.
    pub(crate) fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Stop the task and wait until it has exited. A sweep already in
    /// progress finishes first.
    pub(crate) async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            warn!(error = %e, "Reclaimer task ended abnormally");
        }
    }
}

impl PoolShared {
    /// One reclamation pass. Returns the number of records closed.
    pub(crate) async fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut closing = Vec::new();

        {
            let mut table = self.table.lock();
            if table.lifecycle != Lifecycle::Open {
                return 0;
            }

            for records in table.servers.values_mut() {
                records.retain(|record| {
                    if record.snapshot().closed {
                        return false;
                    }
                    match record.reclaim(now, &self.config) {
                        Some((reason, outstanding)) => {
                            closing.push(Closing {
                                record: record.clone(),
                                reason,
                                outstanding,
                            });
                            false
                        }
                        None => true,
                    }
                });
            }
            table.servers.retain(|_, records| !records.is_empty());

            for entry in &closing {
                table.orphan(entry.record.server_id(), entry.outstanding);
            }
        }

        let closed = closing.len();
        self.close_all(closing).await;
        closed
    }
}
