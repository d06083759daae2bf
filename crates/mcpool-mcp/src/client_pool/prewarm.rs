//! Pre-warming
//!
//! Opens connections ahead of demand. Pre-warmed records are pinned: they sit
//! idle until acquired and the reclaimer never evicts them for idleness.

use std::collections::{BTreeMap, BTreeSet};

use mcpool_core::{PoolError, PoolResult, PrewarmError, ServerId};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{Admission, ConnectionPool, Lifecycle};

impl ConnectionPool {
    /// Ensure one idle, pinned connection exists for each server.
    ///
    /// Servers are warmed concurrently. A failure for one server never stops
    /// the others; all failures come back together as
    /// [`PoolError::Prewarm`].
    pub async fn prewarm<I, S>(&self, server_ids: I) -> PoolResult<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.shared.ensure_open()?;

        let server_ids: Vec<ServerId> = server_ids
            .into_iter()
            .map(|id| id.as_ref().to_string())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if server_ids.is_empty() {
            return Ok(());
        }

        info!(servers = ?server_ids, "Pre-warming connections");
        let results =
            futures::future::join_all(server_ids.iter().map(|id| self.prewarm_one(id))).await;

        let failures: Vec<(ServerId, PoolError)> = server_ids
            .into_iter()
            .zip(results)
            .filter_map(|(id, result)| result.err().map(|e| (id, e)))
            .collect();

        if failures.is_empty() {
            Ok(())
        } else {
            for (server_id, err) in &failures {
                warn!(server_id = %server_id, error = %err, "Pre-warming failed");
            }
            Err(PrewarmError { failures }.into())
        }
    }

    async fn prewarm_one(&self, server_id: &str) -> PoolResult<()> {
        let registration = self.shared.registration(server_id)?;
        if self.pin_idle(server_id)? {
            debug!(server_id = %server_id, "Pinned existing idle connection");
            return Ok(());
        }
        self.shared
            .establish(&registration, &CancellationToken::new(), Admission::PinnedIdle)
            .await?;
        Ok(())
    }

    /// Pin an idle connected record if there is one.
    fn pin_idle(&self, server_id: &str) -> PoolResult<bool> {
        let table = self.shared.table.lock();
        if table.lifecycle != Lifecycle::Open {
            return Err(PoolError::PoolClosed);
        }
        let idle = table.servers.get(server_id).and_then(|records| {
            records.iter().find(|record| {
                let state = record.snapshot();
                !state.closed && state.ref_count == 0 && record.client().is_connected()
            })
        });
        match idle {
            Some(record) => {
                record.pin();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Successful acquisitions per server since the pool started.
    pub fn acquisition_counts(&self) -> BTreeMap<ServerId, u64> {
        self.shared
            .acquisitions
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }

    /// Pre-warm every server acquired at least `min_acquisitions` times.
    /// Returns the servers that were selected.
    pub async fn prewarm_frequent(&self, min_acquisitions: u64) -> PoolResult<Vec<ServerId>> {
        let frequent: Vec<ServerId> = self
            .acquisition_counts()
            .into_iter()
            .filter(|(_, count)| *count >= min_acquisitions)
            .map(|(server_id, _)| server_id)
            .collect();
        debug!(min_acquisitions, servers = ?frequent, "Selected servers for pre-warming");
        self.prewarm(&frequent).await?;
        Ok(frequent)
    }
}
