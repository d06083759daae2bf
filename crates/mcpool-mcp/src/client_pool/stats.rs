//! Pool statistics

use std::collections::BTreeMap;
use std::sync::atomic::Ordering;

use mcpool_core::ServerId;
use serde::Serialize;

use super::ConnectionPool;

/// Per-server record counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ServerStats {
    pub active: usize,
    pub idle: usize,
    /// Pre-warmed records, counted in `active` or `idle` as well
    pub pinned: usize,
}

/// Point-in-time view of the pool, taken under a single lock.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub servers: BTreeMap<ServerId, ServerStats>,
    pub total_created: u64,
}

impl PoolStats {
    /// Leases currently held across all servers.
    pub fn total_active(&self) -> usize {
        self.servers.values().map(|s| s.active).sum()
    }

    /// Connected records waiting for a caller.
    pub fn total_idle(&self) -> usize {
        self.servers.values().map(|s| s.idle).sum()
    }

    /// Open records, active or idle.
    pub fn total_connections(&self) -> usize {
        self.total_active() + self.total_idle()
    }
}

impl ConnectionPool {
    /// Snapshot of active and idle records per server.
    ///
    /// Servers without open records are omitted.
    pub fn stats(&self) -> PoolStats {
        let table = self.shared.table.lock();
        let mut servers = BTreeMap::new();

        for (server_id, records) in &table.servers {
            let mut stats = ServerStats::default();
            for record in records {
                let state = record.snapshot();
                if state.closed {
                    continue;
                }
                if state.ref_count > 0 {
                    stats.active += 1;
                } else {
                    stats.idle += 1;
                }
                if state.pinned {
                    stats.pinned += 1;
                }
            }
            if stats != ServerStats::default() {
                servers.insert(server_id.clone(), stats);
            }
        }

        PoolStats {
            servers,
            total_created: self.shared.total_created.load(Ordering::SeqCst),
        }
    }
}
