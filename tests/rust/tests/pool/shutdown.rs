//! Test: graceful and forced shutdown
//!
//! Validates that:
//! 1. Close with nothing active is clean and empties the pool
//! 2. Releases inside the grace period let Close finish cleanly
//! 3. Leases held past the grace period force an error and count as leaks
//! 4. Every operation after Close fails with PoolClosed

use std::sync::Arc;
use std::time::{Duration, Instant};

use pretty_assertions::assert_eq;
use tests::async_helpers::{with_timeout, DEFAULT_TIMEOUT};
use tests::fixtures::{fast_config, mock_pool, stdio_server};
use tests::logging::init_test_tracing;
use tests::{MockBehavior, MockClientFactory, PoolError};

#[tokio::test]
async fn test_close_with_idle_connections() {
    init_test_tracing();
    let factory = Arc::new(MockClientFactory::new());
    let pool = mock_pool(fast_config(), factory.clone(), &["a", "b"]);

    for id in ["a", "b"] {
        let lease = pool.acquire(id).await.unwrap();
        pool.release_client(lease).unwrap();
    }

    with_timeout(DEFAULT_TIMEOUT, pool.close()).await.unwrap();

    assert!(pool.stats().servers.is_empty());
    assert_eq!(pool.leak_stats(), 0);
    assert_eq!(factory.open_clients(), 0);
    factory.assert_closed_once(true);
}

#[tokio::test]
async fn test_close_waits_for_release_within_grace() {
    let factory = Arc::new(MockClientFactory::new());
    let pool = Arc::new(mock_pool(
        fast_config().with_grace_period(Duration::from_secs(5)),
        factory.clone(),
        &["echo"],
    ));

    let lease = pool.acquire("echo").await.unwrap();
    let releaser = pool.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        releaser.release_client(lease).unwrap();
    });

    let started = Instant::now();
    with_timeout(DEFAULT_TIMEOUT, pool.close()).await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(pool.leak_stats(), 0);
    factory.assert_closed_once(true);
}

#[tokio::test]
async fn test_close_forces_after_grace_period() {
    let factory = Arc::new(MockClientFactory::new());
    let pool = mock_pool(
        fast_config().with_grace_period(Duration::from_millis(300)),
        factory.clone(),
        &["echo"],
    );

    let held = pool.acquire("echo").await.unwrap();
    let idle = pool.acquire("echo").await.unwrap();
    pool.release_client(idle).unwrap();

    let started = Instant::now();
    let err = with_timeout(DEFAULT_TIMEOUT, pool.close()).await.unwrap_err();
    let elapsed = started.elapsed();

    assert!(elapsed >= Duration::from_millis(300), "returned after {:?}", elapsed);
    assert!(matches!(
        err,
        PoolError::ForcedShutdown { still_active: 1, grace_period } if grace_period == Duration::from_millis(300)
    ));
    assert_eq!(pool.leak_stats(), 1);
    assert!(pool.stats().servers.is_empty());
    factory.assert_closed_once(true);

    // The forgotten lease is dead but releasing it is harmless
    assert!(!held.is_connected());
    pool.release_client(held).unwrap();
}

#[tokio::test]
async fn test_release_by_identity_after_forced_close() {
    let pool = mock_pool(
        fast_config().with_grace_period(Duration::from_millis(50)),
        Arc::new(MockClientFactory::new()),
        &["echo"],
    );

    let _held = pool.acquire("echo").await.unwrap();
    assert!(pool.close().await.is_err());

    pool.release("echo").unwrap();
    assert!(matches!(
        pool.release("echo"),
        Err(PoolError::NoActiveConnection(_))
    ));
}

#[tokio::test]
async fn test_operations_after_close_fail() {
    let pool = mock_pool(fast_config(), Arc::new(MockClientFactory::new()), &["echo"]);
    pool.close().await.unwrap();

    assert!(pool.is_closed());
    assert!(matches!(pool.acquire("echo").await, Err(PoolError::PoolClosed)));
    assert!(matches!(pool.acquire("ghost").await, Err(PoolError::PoolClosed)));
    assert!(matches!(
        pool.register_server(stdio_server("late")),
        Err(PoolError::PoolClosed)
    ));
    assert!(matches!(pool.prewarm(["echo"]).await, Err(PoolError::PoolClosed)));
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let factory = Arc::new(MockClientFactory::new());
    let pool = Arc::new(mock_pool(
        fast_config().with_grace_period(Duration::from_millis(200)),
        factory.clone(),
        &["echo"],
    ));
    let _held = pool.acquire("echo").await.unwrap();

    // Concurrent callers all observe the first result
    let (a, b) = tokio::join!(pool.close(), pool.close());
    assert!(matches!(a, Err(PoolError::ForcedShutdown { still_active: 1, .. })));
    assert!(matches!(b, Err(PoolError::ForcedShutdown { still_active: 1, .. })));

    let started = Instant::now();
    let c = pool.close().await;
    assert!(matches!(c, Err(PoolError::ForcedShutdown { still_active: 1, .. })));
    assert!(started.elapsed() < Duration::from_millis(100));

    assert_eq!(pool.leak_stats(), 1);
    factory.assert_closed_once(true);
}

#[tokio::test]
async fn test_close_during_connect_discards_client() {
    let factory = Arc::new(
        MockClientFactory::new()
            .with_behavior("slow", MockBehavior::slow(Duration::from_millis(300))),
    );
    let pool = Arc::new(mock_pool(
        fast_config().with_grace_period(Duration::from_millis(50)),
        factory.clone(),
        &["slow"],
    ));

    let acquirer = pool.clone();
    let pending = tokio::spawn(async move { acquirer.acquire("slow").await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    pool.close().await.unwrap();
    let result = with_timeout(DEFAULT_TIMEOUT, pending).await.unwrap();
    assert!(matches!(result, Err(PoolError::PoolClosed)));

    assert_eq!(factory.open_clients(), 0);
    factory.assert_closed_once(true);
    assert_eq!(pool.stats().total_created, 0);
}
