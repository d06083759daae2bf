//! Test: background reclamation
//!
//! Validates that:
//! 1. Idle records past the idle timeout are closed within one interval
//! 2. Active records are left alone unless a lease limit is configured
//! 3. Leases held past the limit are force-closed and counted as leaks

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use tests::async_helpers::eventually;
use tests::fixtures::{fast_config, mock_pool, params};
use tests::logging::init_test_tracing;
use tests::MockClientFactory;

#[tokio::test]
async fn test_idle_record_is_reclaimed() {
    init_test_tracing();
    let factory = Arc::new(MockClientFactory::new());
    let pool = mock_pool(fast_config(), factory.clone(), &["echo"]);

    let lease = pool.acquire("echo").await.unwrap();
    pool.release_client(lease).unwrap();
    assert_eq!(pool.stats().total_idle(), 1);

    // idle_timeout (200ms) + one reclaim interval (50ms), with slack
    let reclaimed = eventually(Duration::from_secs(2), || pool.stats().servers.is_empty()).await;
    assert!(reclaimed, "idle record was not reclaimed");
    assert_eq!(factory.created()[0].close_count(), 1);
    assert_eq!(pool.leak_stats(), 0);
    assert_eq!(pool.stats().total_created, 1);
}

#[tokio::test]
async fn test_recently_used_record_survives() {
    let factory = Arc::new(MockClientFactory::new());
    let pool = mock_pool(
        fast_config().with_idle_timeout(Duration::from_secs(30)),
        factory.clone(),
        &["echo"],
    );

    let lease = pool.acquire("echo").await.unwrap();
    pool.release_client(lease).unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(pool.stats().total_idle(), 1);
    assert_eq!(factory.created()[0].close_count(), 0);
}

#[tokio::test]
async fn test_active_lease_is_not_reclaimed_without_limit() {
    let factory = Arc::new(MockClientFactory::new());
    let pool = mock_pool(fast_config(), factory.clone(), &["echo"]);

    let lease = pool.acquire("echo").await.unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert_eq!(pool.stats().total_active(), 1);
    assert!(lease.is_connected());
    assert_eq!(pool.leak_stats(), 0);
    pool.release_client(lease).unwrap();
}

#[tokio::test]
async fn test_expired_lease_counts_as_leak() {
    let factory = Arc::new(MockClientFactory::new());
    let pool = mock_pool(
        fast_config().with_max_lease_duration(Some(Duration::from_millis(100))),
        factory.clone(),
        &["echo"],
    );

    let lease = pool.acquire("echo").await.unwrap();
    let leaked = eventually(Duration::from_secs(2), || pool.leak_stats() == 1).await;
    assert!(leaked, "expired lease was not force-closed");

    assert!(!lease.is_connected());
    assert!(lease.call_tool("echo", params(&[])).await.is_err());
    assert!(pool.stats().servers.is_empty());

    // Later releases of the leaked lease are harmless and not double counted
    pool.release_client(lease).unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(pool.leak_stats(), 1);
    factory.assert_closed_once(true);
}

#[tokio::test]
async fn test_disconnected_idle_record_is_reclaimed() {
    let factory = Arc::new(MockClientFactory::new());
    let pool = mock_pool(
        fast_config().with_idle_timeout(Duration::from_secs(30)),
        factory.clone(),
        &["echo"],
    );

    let lease = pool.acquire("echo").await.unwrap();
    pool.release_client(lease).unwrap();
    factory.created()[0].kill();

    let reclaimed = eventually(Duration::from_secs(2), || pool.stats().servers.is_empty()).await;
    assert!(reclaimed, "disconnected record was not reclaimed");
    assert_eq!(factory.created()[0].close_count(), 1);
}

#[tokio::test]
async fn test_reclaimer_survives_close_failures() {
    let factory = Arc::new(MockClientFactory::new().with_default_behavior(tests::MockBehavior {
        fail_close: true,
        ..Default::default()
    }));
    let pool = mock_pool(fast_config(), factory.clone(), &["a", "b"]);

    for id in ["a", "b"] {
        let lease = pool.acquire(id).await.unwrap();
        pool.release_client(lease).unwrap();
    }
    assert!(eventually(Duration::from_secs(2), || pool.stats().servers.is_empty()).await);

    // The reclaimer is still running after failed closes
    let lease = pool.acquire("a").await.unwrap();
    pool.release_client(lease).unwrap();
    assert!(eventually(Duration::from_secs(2), || pool.stats().servers.is_empty()).await);
    assert_eq!(factory.created().len(), 3);
}
