//! Execution engine
//!
//! Provides the high-level [`Executor`] and the pieces it is built from:
//! the warm session pool, the marker protocol, output sanitizing, session
//! reset, and the single-use cold and direct tiers.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{info, instrument, warn};

pub use crate::engine::pool::{PoolManager, WarmLease};
pub use crate::engine::protocol::{Completion, ProtocolOutcome};
pub use crate::engine::reset::ResetOutcome;
pub use crate::engine::sanitize::Cleaned;
pub use crate::engine::session::{Session, SessionInfo, SessionState};

pub mod pool;
pub mod protocol;
pub mod reset;
pub mod sanitize;
pub mod session;
pub mod tiers;

use crate::config::{Config, ConfigError, LanguageConfig, LanguageId};
use crate::runtime::{IsolationRuntime, RuntimeError};
use crate::types::{ExecuteOptions, ExecutionRequest, ExecutionResult};

/// Errors that occur while executing code
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("isolation runtime is unavailable")]
    IsolationUnavailable,

    #[error("execution image for {0} is unavailable")]
    ImageProvisioning(LanguageId),

    #[error("failed to start {language} session: {message}")]
    SessionStartup {
        language: LanguageId,
        message: String,
    },

    #[error("{0} session exited unexpectedly")]
    SessionExited(LanguageId),

    #[error("sandboxing is unavailable and {0} has no direct command configured")]
    DirectUnsupported(LanguageId),

    #[error("too many requests queued for {0}")]
    QueueFull(LanguageId),

    #[error("session pool is shut down")]
    PoolClosed,

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("runtime error: {0}")]
    Runtime(#[from] RuntimeError),
}

/// Executes snippets through the warm → cold → direct tier chain
///
/// Cheap to share behind an `Arc`; every method takes `&self`.
pub struct Executor {
    config: Arc<Config>,
    runtime: Arc<IsolationRuntime>,
    pool: Arc<PoolManager>,
}

impl Executor {
    /// Create an executor
    ///
    /// Starts the idle sweeper when called inside a Tokio runtime and idle
    /// eviction is configured.
    pub fn new(config: Config) -> Self {
        let config = Arc::new(config);
        let runtime = Arc::new(IsolationRuntime::from_config(&config));
        let pool = Arc::new(PoolManager::new(config.clone(), runtime.clone()));

        if tokio::runtime::Handle::try_current().is_ok() {
            pool.start_idle_sweeper();
        }

        Self {
            config,
            runtime,
            pool,
        }
    }

    /// Create an executor and prewarm it when `prewarm_on_startup` is set
    pub async fn start(config: Config) -> Self {
        let executor = Self::new(config);
        if executor.config.prewarm_on_startup {
            executor.prewarm().await;
        }
        executor
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn runtime(&self) -> &IsolationRuntime {
        &self.runtime
    }

    pub fn pool(&self) -> &Arc<PoolManager> {
        &self.pool
    }

    /// Check whether `language` can run sandboxed
    pub async fn is_available(&self, language: LanguageId) -> bool {
        let configured = self
            .config
            .language(language)
            .is_ok_and(|lang| !lang.image.is_empty());
        configured && self.runtime.is_available().await
    }

    /// Execute `code`, always producing a result
    ///
    /// Infrastructure failures become unsuccessful results whose output
    /// explains what went wrong.
    #[instrument(skip(self, code, options))]
    pub async fn execute(
        &self,
        language: LanguageId,
        code: &str,
        options: ExecuteOptions,
    ) -> ExecutionResult {
        let timeout = Duration::from_millis(options.timeout_ms.unwrap_or(self.config.timeout_ms));

        let lang = match self.config.language(language) {
            Ok(lang) => lang,
            Err(e) => return ExecutionResult::failure(e.to_string()),
        };

        match self.execute_tiers(language, lang, code, timeout).await {
            Ok(result) => result,
            Err(e) => {
                warn!(%language, error = %e, "execution failed");
                ExecutionResult::failure(format!("execution failed: {e}"))
            }
        }
    }

    /// Execute a deserialized request
    pub async fn execute_request(&self, request: &ExecutionRequest) -> ExecutionResult {
        self.execute(request.language, &request.code, request.options())
            .await
    }

    async fn execute_tiers(
        &self,
        language: LanguageId,
        lang: &LanguageConfig,
        code: &str,
        timeout: Duration,
    ) -> Result<ExecutionResult, EngineError> {
        let sandboxed = self.runtime.is_available().await
            && self.runtime.ensure_image(language, lang).await;
        if !sandboxed {
            warn!(%language, "sandboxing unavailable, executing directly on the host");
            return tiers::direct(&self.config, language, lang, code, timeout).await;
        }

        if self.config.warm_pool {
            match self.pool.execute(language, code, timeout).await {
                Ok(result) => return Ok(result),
                Err(e) => warn!(%language, error = %e, "warm tier failed, falling back to cold start"),
            }
        }

        tiers::cold_start(&self.runtime, &self.config, language, lang, code, timeout).await
    }

    /// Start a warm session for every configured, available language
    ///
    /// Returns the languages that were warmed.
    pub async fn prewarm(&self) -> Vec<LanguageId> {
        let mut warmed = Vec::new();
        if !self.config.warm_pool {
            return warmed;
        }

        for language in self.config.language_ids() {
            match self.pool.prewarm(language).await {
                Ok(()) => warmed.push(language),
                Err(e) => warn!(%language, error = %e, "prewarm failed"),
            }
        }

        info!(?warmed, "prewarm finished");
        warmed
    }

    /// Terminate all warm sessions
    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
    }
}
