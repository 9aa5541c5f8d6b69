use std::sync::Arc;
use std::time::Duration;

use replbox::engine::PoolManager;
use replbox::{Config, EngineError, ExecuteOptions, Executor, IsolationRuntime, LanguageId, SessionState};

use super::{FakeRuntime, test_config};

const J: LanguageId = LanguageId::J;

fn pool(config: Config) -> Arc<PoolManager> {
    let config = Arc::new(config);
    let runtime = Arc::new(IsolationRuntime::from_config(&config));
    Arc::new(PoolManager::new(config, runtime))
}

#[tokio::test]
async fn test_warm_session_reused() {
    let runtime = FakeRuntime::new();
    let executor = Executor::new(test_config(&runtime));

    let first = executor.execute(J, "echo hello", ExecuteOptions::default()).await;
    assert!(first.success, "{first:?}");
    assert_eq!(first.output, "hello");
    assert_eq!(first.used_warm_session, Some(true));

    let second = executor.execute(J, "echo world", ExecuteOptions::default()).await;
    assert_eq!(second.output, "world");
    assert_eq!(second.used_warm_session, Some(true));

    let info = executor.pool().session_info(J).await.expect("session pooled");
    assert_eq!(info.id, 1);
    assert_eq!(info.request_count, 2);
    assert_eq!(info.state, SessionState::Ready);
    assert!(info.container.unwrap().starts_with("replbox-j-"));

    executor.shutdown().await;
}

#[tokio::test]
async fn test_multiline_reply_between_markers() {
    let runtime = FakeRuntime::new();
    let executor = Executor::new(test_config(&runtime));

    let result = executor
        .execute(J, "echo one\necho two\necho three", ExecuteOptions::default())
        .await;
    assert!(result.success);
    assert_eq!(result.output, "one\ntwo\nthree");
    assert!(!result.output.contains("__REPLBOX_"));

    executor.shutdown().await;
}

#[tokio::test]
async fn test_session_recycled_after_request_limit() {
    let runtime = FakeRuntime::new();
    let config = Config {
        max_requests_per_session: 2,
        ..test_config(&runtime)
    };
    let executor = Executor::new(config);

    for _ in 0..2 {
        let result = executor.execute(J, "echo $$", ExecuteOptions::default()).await;
        assert!(result.success);
    }
    let before = executor.pool().session_info(J).await.unwrap();
    assert_eq!(before.request_count, 2);

    let result = executor.execute(J, "echo $$", ExecuteOptions::default()).await;
    assert!(result.success);

    let after = executor.pool().session_info(J).await.unwrap();
    assert_ne!(after.id, before.id);
    assert_eq!(after.request_count, 1);

    executor.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_requests_share_one_session() {
    let runtime = FakeRuntime::new();
    let executor = Executor::new(test_config(&runtime));

    let (a, b, c) = tokio::join!(
        executor.execute(J, "sleep 0.1; echo a", ExecuteOptions::default()),
        executor.execute(J, "echo b", ExecuteOptions::default()),
        executor.execute(J, "echo c", ExecuteOptions::default()),
    );

    assert_eq!(a.output, "a");
    assert_eq!(b.output, "b");
    assert_eq!(c.output, "c");
    for result in [&a, &b, &c] {
        assert!(result.success);
        assert_eq!(result.used_warm_session, Some(true));
    }

    let info = executor.pool().session_info(J).await.unwrap();
    assert_eq!(info.id, 1);
    assert_eq!(info.request_count, 3);

    executor.shutdown().await;
}

#[tokio::test]
async fn test_full_queue_is_rejected() {
    let runtime = FakeRuntime::new();
    let pool = pool(Config {
        max_queued_requests: 0,
        ..test_config(&runtime)
    });

    let lease = pool.get_or_create(J).await.expect("Failed to lease session");
    let result = pool.execute(J, "echo queued", Duration::from_secs(1)).await;
    assert!(matches!(result, Err(EngineError::QueueFull(LanguageId::J))));

    drop(lease);
    let result = pool.execute(J, "echo queued", Duration::from_secs(1)).await.unwrap();
    assert_eq!(result.output, "queued");

    pool.shutdown().await;
}

#[tokio::test]
async fn test_full_queue_falls_back_to_cold_start() {
    let runtime = FakeRuntime::new();
    let executor = Executor::new(Config {
        max_queued_requests: 0,
        ..test_config(&runtime)
    });

    let lease = executor.pool().get_or_create(J).await.unwrap();
    let result = executor.execute(J, "echo cold", ExecuteOptions::default()).await;
    drop(lease);

    assert!(result.success);
    assert_eq!(result.output, "cold");
    assert_eq!(result.used_warm_session, Some(false));

    executor.shutdown().await;
}

#[tokio::test]
async fn test_exited_session_is_replaced() {
    let runtime = FakeRuntime::new();
    let executor = Executor::new(test_config(&runtime));

    let result = executor.execute(J, "exit 0", ExecuteOptions::default()).await;
    assert!(!result.success);
    assert_eq!(result.output, "interpreter exited unexpectedly");
    assert!(executor.pool().session_info(J).await.is_none());

    let result = executor.execute(J, "echo back", ExecuteOptions::default()).await;
    assert!(result.success);
    assert_eq!(result.output, "back");
    assert_eq!(executor.pool().session_info(J).await.unwrap().id, 2);

    executor.shutdown().await;
}

#[tokio::test]
async fn test_prewarm_on_startup() {
    let runtime = FakeRuntime::new();
    let executor = Executor::start(Config {
        prewarm_on_startup: true,
        ..test_config(&runtime)
    })
    .await;

    let info = executor.pool().session_info(J).await.expect("session prewarmed");
    assert_eq!(info.request_count, 0);
    assert!(runtime.was_called_with("run"));

    executor.shutdown().await;
}

#[tokio::test]
async fn test_prewarm_skips_when_warm_pool_disabled() {
    let runtime = FakeRuntime::new();
    let executor = Executor::new(Config {
        warm_pool: false,
        ..test_config(&runtime)
    });

    assert!(executor.prewarm().await.is_empty());
    assert!(executor.pool().session_info(J).await.is_none());
}

#[tokio::test]
async fn test_idle_sessions_evicted() {
    let runtime = FakeRuntime::new();
    let executor = Executor::new(Config {
        idle_eviction_ms: 100,
        ..test_config(&runtime)
    });

    let result = executor.execute(J, "echo idle", ExecuteOptions::default()).await;
    assert!(result.success);
    assert!(executor.pool().session_info(J).await.is_some());

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(executor.pool().session_info(J).await.is_none());

    executor.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_closes_pool() {
    let runtime = FakeRuntime::new();
    let executor = Executor::new(test_config(&runtime));

    executor.execute(J, "echo up", ExecuteOptions::default()).await;
    executor.shutdown().await;

    assert!(executor.pool().is_closed());
    assert!(executor.pool().session_info(J).await.is_none());
    assert!(matches!(
        executor.pool().execute(J, "echo up", Duration::from_secs(1)).await,
        Err(EngineError::PoolClosed)
    ));

    // the executor keeps serving through cold starts
    let result = executor.execute(J, "echo cold", ExecuteOptions::default()).await;
    assert_eq!(result.output, "cold");
    assert_eq!(result.used_warm_session, Some(false));
}
