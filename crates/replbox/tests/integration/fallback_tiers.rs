use replbox::{Config, ExecuteOptions, Executor, LanguageId};

use super::{FakeRuntime, test_config, unavailable_config};

const J: LanguageId = LanguageId::J;

#[tokio::test]
async fn test_cold_start_when_warm_pool_disabled() {
    let runtime = FakeRuntime::new();
    let executor = Executor::new(Config {
        warm_pool: false,
        ..test_config(&runtime)
    });

    let result = executor.execute(J, "echo cold", ExecuteOptions::default()).await;
    assert!(result.success, "{result:?}");
    assert_eq!(result.output, "cold");
    assert_eq!(result.used_warm_session, Some(false));
    assert!(runtime.was_called_with("run"));
    assert!(executor.pool().session_info(J).await.is_none());
}

#[tokio::test]
async fn test_cold_start_confines_the_session() {
    let runtime = FakeRuntime::new();
    let executor = Executor::new(Config {
        warm_pool: false,
        ..test_config(&runtime)
    });

    executor.execute(J, "echo cold", ExecuteOptions::default()).await;

    let run = runtime
        .calls()
        .into_iter()
        .find(|call| call.starts_with("run "))
        .expect("runtime run invoked");
    for flag in [
        "--rm",
        "--network=none",
        "--read-only",
        "--cap-drop=ALL",
        "--security-opt=no-new-privileges",
        "--user=65534:65534",
        "--memory=256m",
    ] {
        assert!(run.contains(flag), "missing {flag} in {run}");
    }
}

#[tokio::test]
async fn test_direct_tier_when_runtime_unavailable() {
    let executor = Executor::new(unavailable_config());
    assert!(!executor.is_available(J).await);

    let result = executor.execute(J, "echo direct", ExecuteOptions::default()).await;
    assert!(result.success, "{result:?}");
    assert_eq!(result.output, "direct");
    assert_eq!(result.used_warm_session, Some(false));
    assert!(executor.pool().session_info(J).await.is_none());
}

#[tokio::test]
async fn test_no_direct_command_gives_failure_result() {
    let mut config = unavailable_config();
    if let Some(j) = config.languages.get_mut("j") {
        j.direct_command.clear();
    }
    let executor = Executor::new(config);

    let result = executor.execute(J, "echo direct", ExecuteOptions::default()).await;
    assert!(!result.success);
    assert!(
        result.output.contains("no direct command"),
        "{}",
        result.output
    );
}

#[tokio::test]
async fn test_direct_tier_when_image_missing() {
    let runtime = FakeRuntime::with_image(false);
    let executor = Executor::new(test_config(&runtime));
    assert!(executor.is_available(J).await);

    let result = executor.execute(J, "echo direct", ExecuteOptions::default()).await;
    assert!(result.success);
    assert_eq!(result.used_warm_session, Some(false));
    assert!(!runtime.was_called_with("run"));
    assert!(!runtime.was_called_with("build"));
    assert_eq!(executor.runtime().image_status(J), Some(false));
}

#[tokio::test]
async fn test_missing_image_is_built() {
    let runtime = FakeRuntime::with_image(false);
    let mut config = test_config(&runtime);
    if let Some(j) = config.languages.get_mut("j") {
        j.build_context = Some("images/j".into());
    }
    let executor = Executor::new(config);

    let result = executor.execute(J, "echo built", ExecuteOptions::default()).await;
    assert!(result.success);
    assert_eq!(result.used_warm_session, Some(true));
    assert!(runtime.was_called_with("build"));

    // provisioning is cached
    executor.execute(J, "echo again", ExecuteOptions::default()).await;
    let builds = runtime
        .calls()
        .iter()
        .filter(|call| call.starts_with("build "))
        .count();
    assert_eq!(builds, 1);

    executor.shutdown().await;
}

#[tokio::test]
async fn test_unconfigured_language_gives_failure_result() {
    let runtime = FakeRuntime::new();
    let executor = Executor::new(test_config(&runtime));

    assert!(!executor.is_available(LanguageId::Apl).await);
    let result = executor.execute(LanguageId::Apl, "2+2", ExecuteOptions::default()).await;
    assert!(!result.success);
    assert!(result.output.contains("not found"), "{}", result.output);
}

#[tokio::test]
async fn test_request_round_trip() {
    let runtime = FakeRuntime::new();
    let executor = Executor::new(test_config(&runtime));

    let request: replbox::ExecutionRequest =
        serde_json::from_str(r#"{"language":"j","code":"echo json","timeoutMs":2000}"#).unwrap();
    let result = executor.execute_request(&request).await;

    let json = serde_json::to_value(&result).unwrap();
    assert_eq!(json["success"], true);
    assert_eq!(json["output"], "json");
    assert_eq!(json["usedWarmSession"], true);
    assert!(json.get("timedOut").is_none());

    executor.shutdown().await;
}
