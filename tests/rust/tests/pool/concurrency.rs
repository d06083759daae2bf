//! Test: concurrent callers
//!
//! Validates that:
//! 1. N workers across M servers never deadlock and leave the pool balanced,
//!    whether they release by lease or by server identity
//! 2. A slow connect to one server does not block checkouts of another
//! 3. Concurrent callers never share a client

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serde_json::json;
use tests::async_helpers::with_timeout;
use tests::fixtures::{fast_config, mock_pool, params};
use tests::logging::init_test_tracing;
use tests::{MockBehavior, MockClientFactory, PoolError};
use tokio_util::sync::CancellationToken;

const SERVERS: [&str; 4] = ["alpha", "beta", "gamma", "delta"];

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_workers_across_servers_stay_balanced() {
    init_test_tracing();
    let factory = Arc::new(MockClientFactory::new());
    let pool = Arc::new(mock_pool(
        fast_config().with_idle_timeout(Duration::from_secs(30)),
        factory.clone(),
        &SERVERS,
    ));

    let workers: Vec<_> = (0..16)
        .map(|worker| {
            let pool = pool.clone();
            tokio::spawn(async move {
                for round in 0..25 {
                    let server = SERVERS[(worker + round) % SERVERS.len()];
                    let lease = pool.acquire(server).await.unwrap();
                    let args = params(&[("worker", json!(worker)), ("round", json!(round))]);
                    let result = lease.call_tool("echo", args.clone()).await.unwrap();
                    assert_eq!(result, args);
                    pool.release_client(lease).unwrap();
                }
            })
        })
        .collect();

    with_timeout(Duration::from_secs(30), async {
        for worker in workers {
            worker.await.unwrap();
        }
    })
    .await;

    let stats = pool.stats();
    assert_eq!(stats.total_active(), 0);
    assert_eq!(stats.total_idle() as u64, stats.total_created);
    assert!(stats.total_created <= 16, "created {}", stats.total_created);
    let total_acquisitions: u64 = pool.acquisition_counts().values().sum();
    assert_eq!(total_acquisitions, 16 * 25);

    pool.close().await.unwrap();
    factory.assert_closed_once(true);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_workers_releasing_by_identity_stay_balanced() {
    init_test_tracing();
    let factory = Arc::new(MockClientFactory::new());
    let pool = Arc::new(mock_pool(
        fast_config().with_idle_timeout(Duration::from_secs(30)),
        factory.clone(),
        &SERVERS,
    ));
    let released = Arc::new(AtomicU64::new(0));
    let unmatched = Arc::new(AtomicU64::new(0));

    let workers: Vec<_> = (0..16)
        .map(|worker| {
            let pool = pool.clone();
            let released = released.clone();
            let unmatched = unmatched.clone();
            tokio::spawn(async move {
                for round in 0..25 {
                    let server = SERVERS[(worker * 3 + round) % SERVERS.len()];
                    let lease = pool.acquire(server).await.unwrap();
                    lease.call_tool("echo", params(&[("round", json!(round))])).await.unwrap();
                    drop(lease);
                    match pool.release(server) {
                        Ok(()) => released.fetch_add(1, Ordering::SeqCst),
                        Err(PoolError::NoActiveConnection(_)) => {
                            unmatched.fetch_add(1, Ordering::SeqCst)
                        }
                        Err(other) => panic!("unexpected release error: {other:?}"),
                    };
                    tokio::task::yield_now().await;
                }
            })
        })
        .collect();

    with_timeout(Duration::from_secs(30), async {
        for worker in workers {
            worker.await.unwrap();
        }
    })
    .await;

    let total_acquisitions: u64 = pool.acquisition_counts().values().sum();
    assert_eq!(total_acquisitions, 16 * 25);
    assert_eq!(
        released.load(Ordering::SeqCst) + unmatched.load(Ordering::SeqCst),
        total_acquisitions
    );
    // Every release follows its own acquire, so one always finds a match
    assert_eq!(unmatched.load(Ordering::SeqCst), 0);

    let stats = pool.stats();
    assert_eq!(stats.total_active(), 0);
    assert_eq!(stats.total_idle() as u64, stats.total_created);
    for server in SERVERS {
        assert!(matches!(
            pool.release(server),
            Err(PoolError::NoActiveConnection(_))
        ));
    }

    pool.close().await.unwrap();
    factory.assert_closed_once(true);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_callers_get_distinct_clients() {
    let factory = Arc::new(MockClientFactory::new());
    let pool = Arc::new(mock_pool(fast_config(), factory.clone(), &["echo"]));
    let seen = Arc::new(Mutex::new(HashSet::new()));

    let leases = futures::future::join_all((0..8).map(|_| {
        let pool = pool.clone();
        let seen = seen.clone();
        async move {
            let lease = pool.acquire("echo").await.unwrap();
            let whoami = lease.call_tool("whoami", params(&[])).await.unwrap();
            let instance = whoami["instance"].as_u64().unwrap();
            assert!(seen.lock().insert(instance));
            lease
        }
    }))
    .await;

    assert_eq!(seen.lock().len(), 8);
    assert_eq!(pool.stats().servers["echo"].active, 8);
    for lease in leases {
        pool.release_client(lease).unwrap();
    }
    assert_eq!(pool.stats().servers["echo"].idle, 8);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_slow_connect_does_not_block_other_servers() {
    let factory = Arc::new(
        MockClientFactory::new().with_behavior("slow", MockBehavior::slow(Duration::from_secs(1))),
    );
    let pool = Arc::new(mock_pool(fast_config(), factory, &["slow", "fast"]));

    let slow_pool = pool.clone();
    let slow = tokio::spawn(async move { slow_pool.acquire("slow").await });
    tokio::time::sleep(Duration::from_millis(20)).await;

    // Completes while the slow connect is still in flight
    let lease = with_timeout(Duration::from_millis(500), pool.acquire("fast"))
        .await
        .unwrap();
    pool.release_client(lease).unwrap();
    assert!(!slow.is_finished());

    let slow_lease = slow.await.unwrap().unwrap();
    pool.release_client(slow_lease).unwrap();
}

#[tokio::test]
async fn test_connect_timeout_closes_client() {
    let factory = Arc::new(
        MockClientFactory::new().with_behavior("slow", MockBehavior::slow(Duration::from_secs(5))),
    );
    let pool = mock_pool(
        fast_config().with_connect_timeout(Duration::from_millis(100)),
        factory.clone(),
        &["slow"],
    );

    let err = pool.acquire("slow").await.unwrap_err();
    assert!(matches!(err, PoolError::ConnectTimeout { ref server_id, .. } if server_id == "slow"));
    assert_eq!(factory.created()[0].close_count(), 1);
    assert_eq!(pool.stats().total_created, 0);
}

#[tokio::test]
async fn test_cancelled_acquire_closes_client() {
    let factory = Arc::new(
        MockClientFactory::new().with_behavior("slow", MockBehavior::slow(Duration::from_secs(5))),
    );
    let pool = mock_pool(fast_config(), factory.clone(), &["slow"]);
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let err = pool.acquire_with_cancel("slow", &cancel).await.unwrap_err();
    assert!(matches!(err, PoolError::Cancelled(ref id) if id == "slow"));
    assert!(!err.is_retryable());
    assert_eq!(factory.created()[0].close_count(), 1);
    assert!(pool.stats().servers.is_empty());
}

#[tokio::test]
async fn test_dropped_acquire_closes_client() {
    let factory = Arc::new(
        MockClientFactory::new().with_behavior("slow", MockBehavior::slow(Duration::from_secs(5))),
    );
    let pool = mock_pool(fast_config(), factory.clone(), &["slow"]);

    let result = tokio::time::timeout(Duration::from_millis(50), pool.acquire("slow")).await;
    assert!(result.is_err());

    let client = factory.created()[0].clone();
    let closed = tests::async_helpers::eventually(Duration::from_secs(1), || {
        client.close_count() == 1
    })
    .await;
    assert!(closed, "abandoned client was not closed");
    assert!(pool.stats().servers.is_empty());
}
