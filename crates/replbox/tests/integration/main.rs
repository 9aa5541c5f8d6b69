//! Integration tests for replbox
//!
//! Most tests drive `sh` as a stand-in interpreter through a shell script
//! that plays the container runtime, so they need neither Docker nor the
//! real interpreters. `sh` understands the J dialect's `echo '<marker>'`
//! print statement, so these tests run as J.
//!
//! Tests against real interpreters in real containers need the
//! `integration-tests` feature and are ignored by default:
//!   cargo test -p replbox --features integration-tests -- --include-ignored

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use replbox::{Config, LanguageConfig};
use tempfile::TempDir;

mod errors;
mod fallback_tiers;
mod timeouts;
mod warm_pool;

const FIXTURES_PATH: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures");

/// Path of a config fixture
pub(crate) fn fixture_config(name: &str) -> String {
    format!("{FIXTURES_PATH}/configs/{name}")
}

/// How the fake runtime answers its subcommands
#[derive(Debug, Clone, Copy)]
pub(crate) struct Behaviour {
    /// `image inspect` succeeds
    pub(crate) image_present: bool,
    /// `image inspect` fails for images whose name contains this
    pub(crate) missing_image: Option<&'static str>,
    /// Seconds `kill` takes before succeeding
    pub(crate) kill_delay: u32,
    /// Seconds `build` takes before succeeding
    pub(crate) build_delay: u32,
}

impl Default for Behaviour {
    fn default() -> Self {
        Self {
            image_present: true,
            missing_image: None,
            kill_delay: 0,
            build_delay: 0,
        }
    }
}

/// A shell script standing in for `docker`
///
/// `run` replaces itself with `sh` reading the session's stdin, every other
/// command succeeds (or, for `image`, fails when the image is "missing").
/// Each invocation is appended to `calls.log`.
pub(crate) struct FakeRuntime {
    dir: TempDir,
    script: PathBuf,
}

impl FakeRuntime {
    pub(crate) fn new() -> Self {
        Self::with_behaviour(Behaviour::default())
    }

    pub(crate) fn with_image(image_present: bool) -> Self {
        Self::with_behaviour(Behaviour {
            image_present,
            ..Behaviour::default()
        })
    }

    pub(crate) fn with_behaviour(behaviour: Behaviour) -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let script = dir.path().join("runtime.sh");
        let log = dir.path().join("calls.log");
        let inspect_status = if behaviour.image_present { 0 } else { 1 };
        let missing = behaviour
            .missing_image
            .map(|image| format!("    case \"$*\" in *{image}*) exit 1 ;; esac\n"))
            .unwrap_or_default();

        let body = format!(
            r#"printf '%s\n' "$*" >> '{log}'
case "$1" in
  version|rm) exit 0 ;;
  kill) sleep {kill_delay}; exit 0 ;;
  build) sleep {build_delay}; exit 0 ;;
  image)
{missing}    exit {inspect_status} ;;
  run) exec sh ;;
esac
exit 1
"#,
            log = log.display(),
            kill_delay = behaviour.kill_delay,
            build_delay = behaviour.build_delay,
        );
        fs::write(&script, body).expect("Failed to write fake runtime");

        Self { dir, script }
    }

    pub(crate) fn script(&self) -> &Path {
        &self.script
    }

    /// Runtime invocations so far, one per line
    pub(crate) fn calls(&self) -> Vec<String> {
        fs::read_to_string(self.dir.path().join("calls.log"))
            .unwrap_or_default()
            .lines()
            .map(str::to_owned)
            .collect()
    }

    pub(crate) fn was_called_with(&self, action: &str) -> bool {
        self.calls()
            .iter()
            .any(|call| call.split_whitespace().next() == Some(action))
    }

    /// Poll the call log until `action` shows up or `within` passes
    pub(crate) async fn wait_for_call(&self, action: &str, within: Duration) -> bool {
        let deadline = Instant::now() + within;
        while Instant::now() < deadline {
            if self.was_called_with(action) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        self.was_called_with(action)
    }
}

/// J language entry backed by `sh`, both in the fake container and on the host
pub(crate) fn sh_language() -> LanguageConfig {
    LanguageConfig {
        name: "J (sh stand-in)".to_owned(),
        image: "replbox/test-j".to_owned(),
        build_context: None,
        entrypoint: vec!["sh".to_owned()],
        direct_command: vec!["sh".to_owned()],
        library: None,
        env: HashMap::new(),
        capabilities: vec![],
        limits: None,
    }
}

/// Fast-timing config that routes the runtime through `runtime`
pub(crate) fn test_config(runtime: &FakeRuntime) -> Config {
    let mut config = base_config();
    config.runtime_path = Some(PathBuf::from("sh"));
    config.runtime_args = vec![runtime.script().display().to_string()];
    config
}

/// Fast-timing config whose runtime binary does not exist
pub(crate) fn unavailable_config() -> Config {
    let mut config = base_config();
    config.runtime_path = Some(PathBuf::from("/nonexistent/replbox-runtime"));
    config
}

fn base_config() -> Config {
    let mut config = Config {
        timeout_ms: 3_000,
        startup_timeout_ms: 2_000,
        banner_drain_ms: 50,
        error_debounce_ms: 50,
        reset_fallback_ms: 500,
        ..Config::empty()
    };
    config.languages.insert("j".to_owned(), sh_language());
    config
}
