use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

pub use crate::config::language::{LanguageConfig, LanguageId};
use crate::types::ResourceLimits;

pub mod language;
mod loader;

/// Example configuration embedded at compile time.
///
/// Library users can access this to generate a starter config file.
pub const EXAMPLE_CONFIG: &str = include_str!("../../replbox.example.toml");

/// Prefix for environment overrides (`REPLBOX_TIMEOUT_MS`, `REPLBOX_DEFAULT_LIMITS__MEMORY_MB`, ...)
pub const ENV_PREFIX: &str = "REPLBOX";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse config: {0}")]
    Parse(#[from] config::ConfigError),

    #[error("unknown language '{0}'")]
    UnknownLanguage(String),

    #[error("language '{0}' not found in configuration")]
    LanguageNotFound(LanguageId),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Config for replbox
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Path to the container runtime binary (uses `docker` from PATH if not specified).
    #[serde(default)]
    pub runtime_path: Option<PathBuf>,

    /// Extra leading arguments passed to the runtime on every invocation
    /// (e.g. `["--context", "sandbox"]`).
    #[serde(default)]
    pub runtime_args: Vec<String>,

    /// Non-root identity the interpreter runs as inside the sandbox.
    #[serde(default = "default_sandbox_user")]
    pub sandbox_user: String,

    /// Mount point of the writable scratch tmpfs inside the sandbox.
    #[serde(default = "default_scratch_path")]
    pub scratch_path: String,

    /// Default resource limits applied to every sandboxed session.
    #[serde(default)]
    pub default_limits: ResourceLimits,

    /// Per-request execution timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Requests served by one warm session before it is recycled.
    #[serde(default = "default_max_requests_per_session")]
    pub max_requests_per_session: u32,

    /// Idle time after which warm sessions are evicted; 0 keeps them forever.
    #[serde(default)]
    pub idle_eviction_ms: u64,

    /// Start a warm session for every available language at startup.
    #[serde(default)]
    pub prewarm_on_startup: bool,

    /// Use long-lived warm sessions. When disabled every request is a cold start.
    #[serde(default = "default_true")]
    pub warm_pool: bool,

    /// Requests allowed to wait for a busy warm session, per language.
    #[serde(default = "default_max_queued_requests")]
    pub max_queued_requests: usize,

    /// Upper bound on interpreter boot (banner drain and bootstrap).
    #[serde(default = "default_startup_timeout_ms")]
    pub startup_timeout_ms: u64,

    /// Quiet window that ends the banner drain for dialects without a ready signature.
    #[serde(default = "default_banner_drain_ms")]
    pub banner_drain_ms: u64,

    /// Extra wait after the first error signature to capture multi-line errors.
    #[serde(default = "default_error_debounce_ms")]
    pub error_debounce_ms: u64,

    /// Upper bound on waiting for the reset marker before releasing a session.
    #[serde(default = "default_reset_fallback_ms")]
    pub reset_fallback_ms: u64,

    /// Language configurations keyed by language ID
    #[serde(default)]
    pub languages: HashMap<String, LanguageConfig>,
}

impl Config {
    /// Create a new config with embedded default languages
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty config with no languages
    pub fn empty() -> Self {
        Self {
            runtime_path: None,
            runtime_args: Vec::new(),
            sandbox_user: default_sandbox_user(),
            scratch_path: default_scratch_path(),
            default_limits: ResourceLimits::default(),
            timeout_ms: default_timeout_ms(),
            max_requests_per_session: default_max_requests_per_session(),
            idle_eviction_ms: 0,
            prewarm_on_startup: false,
            warm_pool: true,
            max_queued_requests: default_max_queued_requests(),
            startup_timeout_ms: default_startup_timeout_ms(),
            banner_drain_ms: default_banner_drain_ms(),
            error_debounce_ms: default_error_debounce_ms(),
            reset_fallback_ms: default_reset_fallback_ms(),
            languages: HashMap::new(),
        }
    }

    /// Get a language by ID
    pub fn language(&self, id: LanguageId) -> Result<&LanguageConfig, ConfigError> {
        self.languages
            .get(id.as_str())
            .ok_or(ConfigError::LanguageNotFound(id))
    }

    /// Configured languages, in a stable order
    pub fn language_ids(&self) -> Vec<LanguageId> {
        let mut ids: Vec<_> = self
            .languages
            .keys()
            .filter_map(|key| key.parse().ok())
            .collect();
        ids.sort();
        ids
    }

    /// Get the path to the container runtime binary
    pub fn runtime_binary(&self) -> PathBuf {
        self.runtime_path
            .clone()
            .unwrap_or_else(|| PathBuf::from("docker"))
    }

    /// Merge resource limits with defaults
    pub fn effective_limits(&self, overrides: Option<&ResourceLimits>) -> ResourceLimits {
        match overrides {
            Some(limits) => self.default_limits.with_overrides(limits),
            None => self.default_limits.clone(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    pub fn banner_drain(&self) -> Duration {
        Duration::from_millis(self.banner_drain_ms)
    }

    pub fn error_debounce(&self) -> Duration {
        Duration::from_millis(self.error_debounce_ms)
    }

    pub fn reset_fallback(&self) -> Duration {
        Duration::from_millis(self.reset_fallback_ms)
    }

    /// Idle eviction window, `None` when eviction is disabled
    pub fn idle_eviction(&self) -> Option<Duration> {
        (self.idle_eviction_ms > 0).then(|| Duration::from_millis(self.idle_eviction_ms))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::parse_toml(EXAMPLE_CONFIG).expect("embedded default config should be valid")
    }
}

fn default_sandbox_user() -> String {
    "65534:65534".to_owned()
}

fn default_scratch_path() -> String {
    "/tmp".to_owned()
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_max_requests_per_session() -> u32 {
    500
}

fn default_true() -> bool {
    true
}

fn default_max_queued_requests() -> usize {
    8
}

fn default_startup_timeout_ms() -> u64 {
    5_000
}

fn default_banner_drain_ms() -> u64 {
    300
}

fn default_error_debounce_ms() -> u64 {
    100
}

fn default_reset_fallback_ms() -> u64 {
    2_000
}
