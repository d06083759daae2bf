//! Connection pool
//!
//! Tracks live MCP clients per server identity, hands them out as exclusive
//! leases and reclaims them in the background. Checkout reuses an idle record
//! whose client still reports connected; otherwise a new client is created
//! through the [`ClientFactory`] and connected under `connect_timeout`.
//!
//! Locking: the pool table lock is always taken before any record lock, and no
//! lock is ever held across an `.await`.

mod lease;
mod prewarm;
mod reclaimer;
mod record;
mod shutdown;
mod stats;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use mcpool_core::{
    ClientFactory, McpClient, PoolConfig, PoolError, PoolResult, ServerId, ServerRegistration,
};
use parking_lot::Mutex;
use tokio::sync::{Notify, OnceCell};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::transports::TransportFactory;

pub use lease::PooledClient;
pub use stats::{PoolStats, ServerStats};

use reclaimer::Reclaimer;
use record::{CloseReason, Closing, ConnectionRecord, ReleaseOutcome};
use shutdown::CloseOutcome;

/// Lifecycle of the pool as a whole. Only moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Lifecycle {
    Open,
    ShuttingDown,
    Closed,
}

/// Everything guarded by the pool table lock.
pub(crate) struct PoolTable {
    lifecycle: Lifecycle,
    servers: HashMap<ServerId, Vec<Arc<ConnectionRecord>>>,
    /// Leases force-closed while still referenced, per server. A later
    /// release-by-identity for one of these is a no-op.
    orphaned: HashMap<ServerId, usize>,
}

impl PoolTable {
    fn new() -> Self {
        Self {
            lifecycle: Lifecycle::Open,
            servers: HashMap::new(),
            orphaned: HashMap::new(),
        }
    }

    fn orphan(&mut self, server_id: &str, outstanding: usize) {
        if outstanding > 0 {
            *self.orphaned.entry(server_id.to_string()).or_insert(0) += outstanding;
        }
    }

    /// Consume one orphaned lease for `server_id`, if any.
    fn take_orphan(&mut self, server_id: &str) -> bool {
        match self.orphaned.get_mut(server_id) {
            Some(count) if *count > 0 => {
                *count -= 1;
                if *count == 0 {
                    self.orphaned.remove(server_id);
                }
                true
            }
            _ => false,
        }
    }
}

/// State shared between the pool handle and the reclaimer task.
pub(crate) struct PoolShared {
    config: PoolConfig,
    factory: Arc<dyn ClientFactory>,
    registrations: DashMap<ServerId, Arc<ServerRegistration>>,
    table: Mutex<PoolTable>,
    total_created: AtomicU64,
    leaks_detected: AtomicU64,
    /// Successful acquisitions per server, the input for frequency pre-warming
    acquisitions: DashMap<ServerId, u64>,
    /// Signalled whenever a record drops to zero references
    released: Notify,
}

/// Connection pool
pub struct ConnectionPool {
    shared: Arc<PoolShared>,
    reclaimer: Mutex<Option<Reclaimer>>,
    close_outcome: OnceCell<CloseOutcome>,
}

/// How a freshly connected client enters the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    /// Handed to the caller that created it
    Active,
    /// Parked idle and exempt from idle reclamation
    PinnedIdle,
}

impl ConnectionPool {
    /// Create a pool and start its reclaimer.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: PoolConfig, factory: Arc<dyn ClientFactory>) -> PoolResult<Self> {
        config.validate()?;

        let shared = Arc::new(PoolShared {
            config,
            factory,
            registrations: DashMap::new(),
            table: Mutex::new(PoolTable::new()),
            total_created: AtomicU64::new(0),
            leaks_detected: AtomicU64::new(0),
            acquisitions: DashMap::new(),
            released: Notify::new(),
        });

        let reclaimer = Reclaimer::spawn(shared.clone());
        info!(
            idle_timeout = ?shared.config.idle_timeout,
            reclaim_interval = ?shared.config.reclaim_interval,
            grace_period = ?shared.config.grace_period,
            "Connection pool started"
        );

        Ok(Self {
            shared,
            reclaimer: Mutex::new(Some(reclaimer)),
            close_outcome: OnceCell::new(),
        })
    }

    /// Pool backed by the stdio and HTTP transports.
    pub fn with_transports(config: PoolConfig) -> PoolResult<Self> {
        Self::new(config, Arc::new(TransportFactory::new()))
    }

    /// Settings the pool was created with.
    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    /// Register a server identity. Identities are unique for the pool's
    /// lifetime.
    pub fn register_server(&self, registration: ServerRegistration) -> PoolResult<()> {
        registration.validate()?;
        self.shared.ensure_open()?;

        match self.shared.registrations.entry(registration.id.clone()) {
            Entry::Occupied(_) => {
                warn!(server_id = %registration.id, "Duplicate server registration rejected");
                Err(PoolError::DuplicateServer(registration.id))
            }
            Entry::Vacant(slot) => {
                info!(
                    server_id = %registration.id,
                    transport = %registration.transport.description(),
                    "Server registered"
                );
                slot.insert(Arc::new(registration));
                Ok(())
            }
        }
    }

    /// Whether `server_id` has been registered.
    pub fn is_registered(&self, server_id: &str) -> bool {
        self.shared.registrations.contains_key(server_id)
    }

    /// Check out a connected client for `server_id`.
    ///
    /// Reuses an idle record when one is available; otherwise creates and
    /// connects a new client. Dropping the returned future while connecting
    /// closes the half-built client.
    pub async fn acquire(&self, server_id: &str) -> PoolResult<PooledClient> {
        self.acquire_with_cancel(server_id, &CancellationToken::new())
            .await
    }

    /// [`acquire`](Self::acquire) that also gives up when `cancel` fires
    /// during connection establishment.
    pub async fn acquire_with_cancel(
        &self,
        server_id: &str,
        cancel: &CancellationToken,
    ) -> PoolResult<PooledClient> {
        let registration = self.shared.registration(server_id)?;

        let stale = self.shared.evict_disconnected(server_id)?;
        self.shared.close_all(stale).await;

        let record = match self.shared.claim_idle(server_id)? {
            Some(record) => {
                debug!(
                    server_id = %server_id,
                    record_id = %record.id(),
                    "Reusing idle connection"
                );
                record
            }
            None => {
                self.shared
                    .establish(&registration, cancel, Admission::Active)
                    .await?
            }
        };

        *self
            .shared
            .acquisitions
            .entry(server_id.to_string())
            .or_insert(0) += 1;
        Ok(PooledClient::new(record))
    }

    /// Release the most recently acquired active lease for `server_id`.
    ///
    /// While a force-closed lease of `server_id` is still unreleased, the
    /// call is attributed to it and is a no-op. A live lease therefore stays
    /// active until released again or reclaimed; it is never handed out twice.
    pub fn release(&self, server_id: &str) -> PoolResult<()> {
        let mut table = self.shared.table.lock();

        if table.take_orphan(server_id) {
            debug!(server_id = %server_id, "Release of force-closed lease ignored");
            return Ok(());
        }

        let candidate = table.servers.get(server_id).and_then(|records| {
            records
                .iter()
                .filter(|record| record.is_active())
                .max_by_key(|record| record.snapshot().acquired_at)
                .cloned()
        });

        match candidate.map(|record| (record.release(), record)) {
            Some((ReleaseOutcome::Released { remaining }, record)) => {
                self.shared.after_release(&record, remaining);
                Ok(())
            }
            _ => Err(PoolError::NoActiveConnection(server_id.to_string())),
        }
    }

    /// Release a lease returned by [`acquire`](Self::acquire).
    ///
    /// Releasing a lease whose record was already force-closed is a no-op.
    pub fn release_client(&self, client: PooledClient) -> PoolResult<()> {
        let record = client.into_record();
        match record.release() {
            ReleaseOutcome::Released { remaining } => {
                self.shared.after_release(&record, remaining);
                Ok(())
            }
            ReleaseOutcome::AlreadyClosed => {
                self.shared.table.lock().take_orphan(record.server_id());
                warn!(
                    server_id = %record.server_id(),
                    record_id = %record.id(),
                    "Released lease after its connection was force-closed"
                );
                Ok(())
            }
            ReleaseOutcome::NotActive => {
                Err(PoolError::NoActiveConnection(record.server_id().to_string()))
            }
        }
    }

    /// Number of leases force-closed while still referenced.
    pub fn leak_stats(&self) -> u64 {
        self.shared.leaks_detected.load(Ordering::SeqCst)
    }

    /// True once [`close`](Self::close) has started.
    pub fn is_closed(&self) -> bool {
        self.shared.table.lock().lifecycle != Lifecycle::Open
    }
}

impl PoolShared {
    fn ensure_open(&self) -> PoolResult<()> {
        match self.table.lock().lifecycle {
            Lifecycle::Open => Ok(()),
            _ => Err(PoolError::PoolClosed),
        }
    }

    /// Registration lookup; a closed pool wins over an unknown identity.
    fn registration(&self, server_id: &str) -> PoolResult<Arc<ServerRegistration>> {
        self.ensure_open()?;
        self.registrations
            .get(server_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| PoolError::NotRegistered(server_id.to_string()))
    }

    /// Pull idle records whose client disconnected out of the table. The
    /// caller closes them.
    fn evict_disconnected(&self, server_id: &str) -> PoolResult<Vec<Closing>> {
        let mut table = self.table.lock();
        if table.lifecycle != Lifecycle::Open {
            return Err(PoolError::PoolClosed);
        }

        let Some(records) = table.servers.get_mut(server_id) else {
            return Ok(Vec::new());
        };

        let mut stale = Vec::new();
        records.retain(|record| {
            let state = record.snapshot();
            if state.closed {
                return false;
            }
            if state.ref_count == 0 && !record.client().is_connected() {
                if let Some(outstanding) = record.mark_closed() {
                    stale.push(Closing {
                        record: record.clone(),
                        reason: CloseReason::Unhealthy,
                        outstanding,
                    });
                }
                return false;
            }
            true
        });

        if records.is_empty() {
            table.servers.remove(server_id);
        }
        Ok(stale)
    }

    /// Reuse path: claim the first idle, connected record.
    fn claim_idle(&self, server_id: &str) -> PoolResult<Option<Arc<ConnectionRecord>>> {
        let table = self.table.lock();
        if table.lifecycle != Lifecycle::Open {
            return Err(PoolError::PoolClosed);
        }
        Ok(table
            .servers
            .get(server_id)
            .and_then(|records| records.iter().find(|record| record.try_acquire()).cloned()))
    }

    /// Miss path: create, connect and admit a new client.
    async fn establish(
        &self,
        registration: &ServerRegistration,
        cancel: &CancellationToken,
        admission: Admission,
    ) -> PoolResult<Arc<ConnectionRecord>> {
        let server_id = registration.id.clone();
        let client = self
            .factory
            .create(registration)
            .map_err(|source| PoolError::ConnectEstablish {
                server_id: server_id.clone(),
                source,
            })?;

        debug!(
            server_id = %server_id,
            transport = %registration.transport.kind(),
            "Establishing new connection"
        );

        let guard = ConnectGuard::new(&server_id, client.clone());
        let timeout = self.config.connect_timeout;
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => ConnectOutcome::Cancelled,
            result = tokio::time::timeout(timeout, client.connect()) => match result {
                Ok(Ok(())) => ConnectOutcome::Connected,
                Ok(Err(e)) => ConnectOutcome::Failed(e),
                Err(_) => ConnectOutcome::TimedOut,
            },
        };

        match outcome {
            ConnectOutcome::Connected => {}
            ConnectOutcome::Cancelled => {
                info!(server_id = %server_id, "Connection attempt cancelled");
                guard.abandon().await;
                return Err(PoolError::Cancelled(server_id));
            }
            ConnectOutcome::TimedOut => {
                warn!(server_id = %server_id, timeout = ?timeout, "Connection attempt timed out");
                guard.abandon().await;
                return Err(PoolError::ConnectTimeout { server_id, timeout });
            }
            ConnectOutcome::Failed(source) => {
                error!(server_id = %server_id, error = %source, "Failed to connect");
                guard.abandon().await;
                return Err(PoolError::ConnectEstablish { server_id, source });
            }
        }

        let record = Arc::new(match admission {
            Admission::Active => ConnectionRecord::new_active(server_id.clone(), client),
            Admission::PinnedIdle => ConnectionRecord::new_idle(server_id.clone(), client, true),
        });

        let closed = {
            let mut table = self.table.lock();
            if table.lifecycle != Lifecycle::Open {
                true
            } else {
                table
                    .servers
                    .entry(server_id.clone())
                    .or_default()
                    .push(record.clone());
                false
            }
        };
        if closed {
            info!(server_id = %server_id, "Pool closed while connecting; discarding client");
            guard.abandon().await;
            return Err(PoolError::PoolClosed);
        }
        guard.disarm();

        let total = self.total_created.fetch_add(1, Ordering::SeqCst) + 1;
        info!(
            server_id = %server_id,
            record_id = %record.id(),
            pinned = admission == Admission::PinnedIdle,
            total_created = total,
            "New connection established"
        );
        Ok(record)
    }

    fn after_release(&self, record: &ConnectionRecord, remaining: usize) {
        debug!(
            server_id = %record.server_id(),
            record_id = %record.id(),
            remaining,
            "Connection released"
        );
        if remaining == 0 {
            self.released.notify_waiters();
        }
    }

    /// Close clients of records already marked closed and removed from the
    /// table. Leaks are counted here, once per record.
    async fn close_all(&self, closing: Vec<Closing>) {
        if closing.is_empty() {
            return;
        }
        futures::future::join_all(closing.into_iter().map(|entry| async move {
            if entry.outstanding > 0 {
                let leaks = self.leaks_detected.fetch_add(1, Ordering::SeqCst) + 1;
                warn!(
                    server_id = %entry.record.server_id(),
                    record_id = %entry.record.id(),
                    ref_count = entry.outstanding,
                    leaks,
                    held_for = ?entry.record.snapshot().acquired_at.map(|at| at.elapsed()),
                    reason = %entry.reason,
                    "Connection leak: force-closing a lease that was never released"
                );
            } else {
                debug!(
                    server_id = %entry.record.server_id(),
                    record_id = %entry.record.id(),
                    age = ?entry.record.age(),
                    idle_for = ?entry.record.snapshot().last_used_at.elapsed(),
                    reason = %entry.reason,
                    "Closing pooled connection"
                );
            }
            entry.record.close_client(entry.reason).await;
        }))
        .await;
    }

    /// Count of records currently holding references.
    fn active_count(&self) -> usize {
        self.table
            .lock()
            .servers
            .values()
            .flatten()
            .filter(|record| record.is_active())
            .count()
    }
}

impl Drop for ConnectionPool {
    fn drop(&mut self) {
        if let Some(reclaimer) = self.reclaimer.lock().take() {
            reclaimer.cancel();
        }
        let open = self
            .shared
            .table
            .lock()
            .servers
            .values()
            .map(Vec::len)
            .sum::<usize>();
        if open > 0 {
            warn!(open, "Connection pool dropped without close; clients dropped unclosed");
        }
    }
}

enum ConnectOutcome {
    Connected,
    Cancelled,
    TimedOut,
    Failed(anyhow::Error),
}

/// Owns a client between creation and admission into the table. Unless
/// disarmed, the client is closed, including when the acquiring future is
/// dropped mid-connect.
struct ConnectGuard {
    server_id: ServerId,
    client: Option<Arc<dyn McpClient>>,
}

impl ConnectGuard {
    fn new(server_id: &str, client: Arc<dyn McpClient>) -> Self {
        Self {
            server_id: server_id.to_string(),
            client: Some(client),
        }
    }

    fn disarm(mut self) {
        self.client = None;
    }

    async fn abandon(mut self) {
        if let Some(client) = self.client.take() {
            if let Err(e) = client.close().await {
                warn!(server_id = %self.server_id, error = %e, "Failed to close abandoned client");
            }
        }
    }
}

impl Drop for ConnectGuard {
    fn drop(&mut self) {
        let Some(client) = self.client.take() else {
            return;
        };
        debug!(server_id = %self.server_id, "Acquire dropped mid-connect; closing client");
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let server_id = self.server_id.clone();
                handle.spawn(async move {
                    if let Err(e) = client.close().await {
                        warn!(server_id = %server_id, error = %e, "Failed to close abandoned client");
                    }
                });
            }
            Err(_) => {
                warn!(server_id = %self.server_id, "No runtime to close abandoned client");
            }
        }
    }
}
