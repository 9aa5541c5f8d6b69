use replbox::{Config, ExecuteOptions, Executor, LanguageId};

use super::{FakeRuntime, test_config, unavailable_config};

const J: LanguageId = LanguageId::J;

#[tokio::test]
async fn test_error_signature_fails_request() {
    let runtime = FakeRuntime::new();
    let executor = Executor::new(test_config(&runtime));

    let result = executor
        .execute(J, "echo '|domain error'", ExecuteOptions::default())
        .await;
    assert!(!result.success);
    assert!(!result.is_timed_out());
    assert_eq!(result.output, "|domain error");
    assert_eq!(result.used_warm_session, Some(true));

    executor.shutdown().await;
}

#[tokio::test]
async fn test_multiline_error_is_captured() {
    let runtime = FakeRuntime::new();
    let executor = Executor::new(test_config(&runtime));

    let result = executor
        .execute(
            J,
            "echo '|domain error'\necho '   1%0'\necho '   ^'",
            ExecuteOptions::default(),
        )
        .await;
    assert!(!result.success);
    assert_eq!(result.output, "|domain error\n1%0\n^");

    executor.shutdown().await;
}

#[tokio::test]
async fn test_session_survives_an_error() {
    let runtime = FakeRuntime::new();
    let executor = Executor::new(test_config(&runtime));

    let failed = executor
        .execute(J, "echo '|value error: x'", ExecuteOptions::default())
        .await;
    assert!(!failed.success);

    let ok = executor.execute(J, "echo fine", ExecuteOptions::default()).await;
    assert!(ok.success);
    assert_eq!(ok.output, "fine");
    assert_eq!(executor.pool().session_info(J).await.unwrap().id, 1);

    executor.shutdown().await;
}

#[tokio::test]
async fn test_cold_start_classifies_errors() {
    let runtime = FakeRuntime::new();
    let executor = Executor::new(Config {
        warm_pool: false,
        ..test_config(&runtime)
    });

    let result = executor
        .execute(J, "echo '|syntax error'", ExecuteOptions::default())
        .await;
    assert!(!result.success);
    assert_eq!(result.output, "|syntax error");
}

#[tokio::test]
async fn test_direct_tier_classifies_errors() {
    let executor = Executor::new(unavailable_config());

    let result = executor
        .execute(J, "echo '|index error'", ExecuteOptions::default())
        .await;
    assert!(!result.success);
    assert_eq!(result.output, "|index error");
}

#[tokio::test]
async fn test_stderr_ignored_for_stdout_dialect() {
    let runtime = FakeRuntime::new();
    let executor = Executor::new(test_config(&runtime));

    let result = executor
        .execute(J, "echo noise >&2\necho ok", ExecuteOptions::default())
        .await;
    assert!(result.success);
    assert_eq!(result.output, "ok");

    executor.shutdown().await;
}
