//! Background commit driver behavior.

use std::sync::Arc;
use std::time::Duration;

use quiver_db::{IndexConfig, Indexer};
use tokio::sync::Notify;

fn driver_config() -> IndexConfig {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
    IndexConfig::new(2)
        .with_in_memory_mode(true)
        .with_auto_index_check_duration("50ms")
        .with_auto_index_length(1)
        .with_default_pool_size(1)
}

async fn wait_for(idx: &Indexer, deadline: Duration, cond: impl Fn(&Indexer) -> bool) -> bool {
    let start = tokio::time::Instant::now();
    while start.elapsed() < deadline {
        if cond(idx) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond(idx)
}

#[tokio::test]
async fn threshold_triggers_background_commit() {
    let idx = Arc::new(Indexer::new(driver_config()).unwrap());
    let shutdown = Arc::new(Notify::new());
    let rx = idx.clone().start(shutdown.clone());
    assert!(rx.is_some());

    idx.insert("x", vec![1.0, 0.0]).unwrap();
    assert!(
        wait_for(&idx, Duration::from_secs(2), |i| {
            i.number_of_create_index_execution() >= 1
        })
        .await,
        "background commit never ran"
    );

    let (oid, ok) = idx.exists("x");
    assert!(ok);
    assert_ne!(oid, 0);
    assert!(!idx.is_indexing());

    shutdown.notify_one();
}

#[tokio::test]
async fn deadline_forces_commit_below_threshold() {
    // Threshold far out of reach; only the deadline ticker (defaults to
    // 2 * check duration) can drain the staged insert.
    let cfg = driver_config().with_auto_index_length(100);
    let idx = Arc::new(Indexer::new(cfg).unwrap());
    let shutdown = Arc::new(Notify::new());
    let _rx = idx.clone().start(shutdown.clone()).unwrap();

    idx.insert("x", vec![1.0, 0.0]).unwrap();
    assert!(
        wait_for(&idx, Duration::from_secs(2), |i| i.insert_vcache_len() == 0).await,
        "deadline commit never drained the staged insert"
    );
    assert!(idx.number_of_create_index_execution() >= 1);

    shutdown.notify_one();
}

#[tokio::test]
async fn shutdown_runs_a_final_commit() {
    // Long periods: nothing fires before the shutdown signal.
    let cfg = IndexConfig::new(2)
        .with_in_memory_mode(true)
        .with_auto_index_check_duration("10s")
        .with_auto_index_length(1)
        .with_default_pool_size(1);
    let idx = Arc::new(Indexer::new(cfg).unwrap());
    let shutdown = Arc::new(Notify::new());
    let _rx = idx.clone().start(shutdown.clone()).unwrap();

    idx.insert("y", vec![0.0, 1.0]).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(idx.number_of_create_index_execution(), 0);

    shutdown.notify_one();
    assert!(
        wait_for(&idx, Duration::from_secs(2), |i| {
            i.number_of_create_index_execution() >= 1
        })
        .await,
        "shutdown commit never ran"
    );
    assert_ne!(idx.exists("y").0, 0);
}

#[tokio::test]
async fn daemon_disabled_without_threshold_or_period() {
    let idx = Arc::new(
        Indexer::new(IndexConfig::new(2).with_in_memory_mode(true)).unwrap(),
    );
    let shutdown = Arc::new(Notify::new());
    assert!(idx.clone().start(shutdown).is_none());

    // Mutations and explicit commits still work.
    idx.insert("x", vec![1.0, 0.0]).unwrap();
    idx.create_index(1).unwrap();
    assert_ne!(idx.exists("x").0, 0);
}
