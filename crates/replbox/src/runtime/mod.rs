//! Container runtime wrapper
//!
//! This module drives an existing isolation runtime (`docker`, `podman`) as a
//! subprocess: probing that it works, provisioning execution images, and
//! building the launch commands for confined interpreter sessions.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::{Config, LanguageConfig, LanguageId};
pub use crate::runtime::command::{RuntimeAction, RuntimeCommand};
pub use crate::runtime::process::{SessionProcess, StreamEvent, StreamSource};

mod command;
mod process;

/// Upper bound on `<runtime> version` and `<runtime> image inspect`
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound on `<runtime> build`
pub const BUILD_TIMEOUT: Duration = Duration::from_secs(600);

/// Errors that occur while driving the container runtime
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("failed to spawn runtime process: {0}")]
    SpawnFailed(#[source] std::io::Error),

    #[error("runtime command failed: {0}")]
    CommandFailed(String),

    #[error("runtime command timed out after {0:?}")]
    TimedOut(Duration),

    #[error("failed to kill container: {0}")]
    KillFailed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("stdin is closed")]
    StdinClosed,
}

/// Everything needed to start one interpreter process
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    /// Full argument vector, program first
    pub args: Vec<String>,
    /// Extra environment for the spawned process
    pub env: Vec<(String, String)>,
    /// Runtime command that kills the container, for isolated launches
    pub kill_command: Option<Vec<String>>,
    /// Container name, for isolated launches
    pub container: Option<String>,
}

impl LaunchSpec {
    /// Launch an interpreter directly on the host
    pub fn host(command: &[String], env: &HashMap<String, String>) -> Self {
        let mut env: Vec<_> = env.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        env.sort();
        Self {
            args: command.to_vec(),
            env,
            kill_command: None,
            container: None,
        }
    }

    /// Spawn the process described by this spec
    pub fn spawn(&self) -> Result<SessionProcess, RuntimeError> {
        SessionProcess::spawn(self)
    }
}

/// Handle to the isolation runtime binary
///
/// Availability and per-language image status are probed once and cached for
/// the lifetime of the handle.
#[derive(Debug)]
pub struct IsolationRuntime {
    binary: PathBuf,
    args: Vec<String>,
    available: OnceCell<bool>,
    /// Provisioning outcome per language; each cell serialises its own build
    images: HashMap<LanguageId, OnceCell<bool>>,
}

impl IsolationRuntime {
    pub fn new(binary: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            binary: binary.into(),
            args,
            available: OnceCell::new(),
            images: LanguageId::ALL
                .into_iter()
                .map(|language| (language, OnceCell::new()))
                .collect(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.runtime_binary(), config.runtime_args.clone())
    }

    /// Get the runtime binary path
    pub fn binary(&self) -> &PathBuf {
        &self.binary
    }

    /// Start a command builder for this runtime
    pub fn command(&self) -> RuntimeCommand {
        RuntimeCommand::new(&self.binary).runtime_args(self.args.iter().cloned())
    }

    /// Check whether the runtime works; the answer is cached
    pub async fn is_available(&self) -> bool {
        *self.available.get_or_init(|| self.probe()).await
    }

    #[instrument(skip(self), fields(binary = %self.binary.display()))]
    async fn probe(&self) -> bool {
        let args = self.command().action(RuntimeAction::Version).build();
        match run_command(args, PROBE_TIMEOUT).await {
            Ok(_) => {
                info!("isolation runtime available");
                true
            }
            Err(e) => {
                warn!(error = %e, "isolation runtime unavailable");
                false
            }
        }
    }

    /// Make sure the execution image for `language` exists, building it if needed
    ///
    /// The outcome is cached per language, so a failed build keeps the
    /// language off the sandboxed tiers until restart. Only callers for the
    /// language being provisioned wait on it.
    pub async fn ensure_image(&self, language: LanguageId, lang: &LanguageConfig) -> bool {
        match self.images.get(&language) {
            Some(cell) => *cell.get_or_init(|| self.provision(language, lang)).await,
            None => self.provision(language, lang).await,
        }
    }

    /// Cached provisioning outcome, without probing
    pub fn image_status(&self, language: LanguageId) -> Option<bool> {
        self.images.get(&language)?.get().copied()
    }

    #[instrument(skip(self, lang), fields(image = %lang.image))]
    async fn provision(&self, language: LanguageId, lang: &LanguageConfig) -> bool {
        let inspect = self
            .command()
            .action(RuntimeAction::ImageInspect)
            .image(&lang.image)
            .build();
        if run_command(inspect, PROBE_TIMEOUT).await.is_ok() {
            debug!("image present");
            return true;
        }

        let Some(context) = lang.build_context.clone() else {
            warn!(%language, "image missing and no build context configured");
            return false;
        };

        info!(%language, context = %context.display(), "building image");
        let build = self
            .command()
            .action(RuntimeAction::Build { context })
            .image(&lang.image)
            .build();
        match run_command(build, BUILD_TIMEOUT).await {
            Ok(_) => {
                info!(%language, "image built");
                true
            }
            Err(e) => {
                warn!(%language, error = %e, "image build failed");
                false
            }
        }
    }

    /// Launch spec for a confined interpreter session
    ///
    /// Stdin stays attached; cold starts write their payload once and close it.
    pub fn isolated_launch(
        &self,
        config: &Config,
        language: LanguageId,
        lang: &LanguageConfig,
    ) -> LaunchSpec {
        let name = container_name(language);
        let limits = config.effective_limits(lang.limits.as_ref());

        let mut command = self
            .command()
            .action(RuntimeAction::Run)
            .image(&lang.image)
            .name(&name)
            .limits(limits)
            .user(&config.sandbox_user)
            .scratch_path(&config.scratch_path)
            .capabilities(lang.capabilities.iter().cloned())
            .command(lang.entrypoint.iter().cloned());
        for (key, value) in &lang.env {
            command = command.env(key, value);
        }

        LaunchSpec {
            args: command.build(),
            env: Vec::new(),
            kill_command: Some(self.kill_command(&name)),
            container: Some(name),
        }
    }

    /// Runtime command that kills the named container
    pub fn kill_command(&self, container: &str) -> Vec<String> {
        self.command()
            .action(RuntimeAction::Kill {
                container: container.to_string(),
            })
            .build()
    }
}

/// Unique container name for a session
pub fn container_name(language: LanguageId) -> String {
    format!("replbox-{language}-{}", Uuid::new_v4().simple())
}

/// Run a runtime command to completion, returning its stdout
async fn run_command(args: Vec<String>, timeout: Duration) -> Result<String, RuntimeError> {
    let program = args
        .first()
        .ok_or_else(|| RuntimeError::CommandFailed("empty command arguments".to_string()))?;

    debug!(?args, "running runtime command");
    let output = Command::new(program)
        .args(&args[1..])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output();

    let output = tokio::time::timeout(timeout, output)
        .await
        .map_err(|_| RuntimeError::TimedOut(timeout))?
        .map_err(RuntimeError::SpawnFailed)?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(RuntimeError::CommandFailed(format!(
            "{} ({})",
            stderr.trim(),
            output.status
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
