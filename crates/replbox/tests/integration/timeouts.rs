use std::time::{Duration, Instant};

use replbox::{Config, ExecuteOptions, Executor, LanguageId};

use super::{Behaviour, FakeRuntime, test_config, unavailable_config};

const J: LanguageId = LanguageId::J;

/// Allowance on top of the timeout for the debounce and scheduling
const SLACK: Duration = Duration::from_millis(500);

#[tokio::test]
async fn test_warm_timeout_recycles_session() {
    let runtime = FakeRuntime::new();
    let executor = Executor::new(test_config(&runtime));

    executor.execute(J, "echo warm", ExecuteOptions::default()).await;
    let before = executor.pool().session_info(J).await.unwrap();

    let started = Instant::now();
    let result = executor
        .execute(J, "sleep 5", ExecuteOptions::with_timeout_ms(200))
        .await;
    let elapsed = started.elapsed();

    assert!(!result.success);
    assert!(result.is_timed_out());
    assert_eq!(result.output, "execution timed out");
    assert_eq!(result.used_warm_session, Some(true));
    assert!(elapsed >= Duration::from_millis(200));
    assert!(elapsed < Duration::from_millis(200) + SLACK, "took {elapsed:?}");

    assert!(executor.pool().session_info(J).await.is_none());
    assert!(runtime.was_called_with("kill"));

    let result = executor.execute(J, "echo fresh", ExecuteOptions::default()).await;
    assert_eq!(result.output, "fresh");
    assert_ne!(executor.pool().session_info(J).await.unwrap().id, before.id);

    executor.shutdown().await;
}

#[tokio::test]
async fn test_partial_output_kept_on_timeout() {
    let runtime = FakeRuntime::new();
    let executor = Executor::new(test_config(&runtime));

    let result = executor
        .execute(J, "echo partial\nsleep 5", ExecuteOptions::with_timeout_ms(300))
        .await;
    assert!(result.is_timed_out());
    assert_eq!(result.output, "partial");

    executor.shutdown().await;
}

#[tokio::test]
async fn test_cold_timeout_kills_container() {
    let runtime = FakeRuntime::new();
    let executor = Executor::new(Config {
        warm_pool: false,
        ..test_config(&runtime)
    });

    let started = Instant::now();
    let result = executor
        .execute(J, "sleep 5", ExecuteOptions::with_timeout_ms(200))
        .await;
    let elapsed = started.elapsed();

    assert!(result.is_timed_out());
    assert_eq!(result.used_warm_session, Some(false));
    assert!(elapsed < Duration::from_millis(200) + SLACK, "took {elapsed:?}");
    assert!(runtime.wait_for_call("kill", Duration::from_secs(2)).await);
}

#[tokio::test]
async fn test_warm_timeout_does_not_wait_for_kill() {
    let runtime = FakeRuntime::with_behaviour(Behaviour {
        kill_delay: 3,
        ..Behaviour::default()
    });
    let executor = Executor::new(test_config(&runtime));
    executor.execute(J, "echo warm", ExecuteOptions::default()).await;

    let started = Instant::now();
    let result = executor
        .execute(J, "sleep 10", ExecuteOptions::with_timeout_ms(200))
        .await;
    let elapsed = started.elapsed();

    assert!(result.is_timed_out());
    assert_eq!(result.used_warm_session, Some(true));
    assert!(elapsed < Duration::from_millis(200) + SLACK, "took {elapsed:?}");

    // the next request waits for the recycle, then gets a fresh session
    let result = executor.execute(J, "echo fresh", ExecuteOptions::default()).await;
    assert_eq!(result.output, "fresh");
    assert_eq!(executor.pool().session_info(J).await.unwrap().id, 2);

    executor.shutdown().await;
}

#[tokio::test]
async fn test_cold_timeout_does_not_wait_for_kill() {
    let runtime = FakeRuntime::with_behaviour(Behaviour {
        kill_delay: 3,
        ..Behaviour::default()
    });
    let executor = Executor::new(Config {
        warm_pool: false,
        ..test_config(&runtime)
    });

    let started = Instant::now();
    let result = executor
        .execute(J, "sleep 10", ExecuteOptions::with_timeout_ms(200))
        .await;
    let elapsed = started.elapsed();

    assert!(result.is_timed_out());
    assert_eq!(result.used_warm_session, Some(false));
    assert!(elapsed < Duration::from_millis(200) + SLACK, "took {elapsed:?}");
}

#[tokio::test]
async fn test_direct_timeout() {
    let executor = Executor::new(unavailable_config());

    let started = Instant::now();
    let result = executor
        .execute(J, "sleep 5", ExecuteOptions::with_timeout_ms(200))
        .await;

    assert!(result.is_timed_out());
    assert_eq!(result.used_warm_session, Some(false));
    assert!(started.elapsed() < Duration::from_millis(200) + SLACK);
}

#[tokio::test]
async fn test_configured_timeout_applies_by_default() {
    let runtime = FakeRuntime::new();
    let executor = Executor::new(Config {
        timeout_ms: 200,
        ..test_config(&runtime)
    });

    let started = Instant::now();
    let result = executor.execute(J, "sleep 5", ExecuteOptions::default()).await;

    assert!(result.is_timed_out());
    assert!(started.elapsed() < Duration::from_millis(200) + SLACK);

    executor.shutdown().await;
}
