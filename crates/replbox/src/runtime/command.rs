//! Command builder for the container runtime CLI
//!
//! Builds command-line arguments for `docker`-compatible runtimes.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::types::ResourceLimits;

/// Builder for container runtime command-line arguments
#[derive(Debug)]
pub struct RuntimeCommand {
    /// Path to the runtime binary
    runtime_path: PathBuf,
    /// Leading arguments placed before the subcommand
    runtime_args: Vec<String>,
    action: RuntimeAction,
    /// Image for run, build and inspect
    image: String,
    /// --name
    name: Option<String>,
    limits: ResourceLimits,
    /// --user
    user: Option<String>,
    /// --tmpfs mount point
    scratch_path: String,
    /// --cap-add (everything else is dropped)
    capabilities: Vec<String>,
    /// --env
    env: BTreeMap<String, String>,
    /// -i, keep stdin open
    interactive: bool,
    /// --rm
    auto_remove: bool,
    /// Entrypoint override followed by its arguments
    command: Vec<String>,
}

impl RuntimeCommand {
    /// Create a new runtime command builder
    pub fn new(runtime_path: impl Into<PathBuf>) -> Self {
        Self {
            runtime_path: runtime_path.into(),
            runtime_args: Vec::new(),
            action: RuntimeAction::Run,
            image: String::new(),
            name: None,
            limits: ResourceLimits::default(),
            user: None,
            scratch_path: "/tmp".to_owned(),
            capabilities: Vec::new(),
            env: BTreeMap::new(),
            interactive: true,
            auto_remove: true,
            command: Vec::new(),
        }
    }

    /// Set the leading runtime arguments
    pub fn runtime_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.runtime_args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Set the action to perform
    pub fn action(mut self, action: RuntimeAction) -> Self {
        self.action = action;
        self
    }

    /// Set the image
    pub fn image(mut self, image: impl Into<String>) -> Self {
        self.image = image.into();
        self
    }

    /// Set the container name
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set resource limits
    pub fn limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Run as the given non-root identity
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Set the writable scratch mount point
    pub fn scratch_path(mut self, path: impl Into<String>) -> Self {
        self.scratch_path = path.into();
        self
    }

    /// Add back a capability after dropping all of them
    pub fn capability(mut self, capability: impl Into<String>) -> Self {
        self.capabilities.push(capability.into());
        self
    }

    /// Add back several capabilities
    pub fn capabilities(mut self, capabilities: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.capabilities
            .extend(capabilities.into_iter().map(Into::into));
        self
    }

    /// Set an environment variable
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Keep stdin attached (`-i`)
    pub fn interactive(mut self, enable: bool) -> Self {
        self.interactive = enable;
        self
    }

    /// Remove the container when it exits (`--rm`)
    pub fn auto_remove(mut self, enable: bool) -> Self {
        self.auto_remove = enable;
        self
    }

    /// Set the command to run; the first element replaces the image entrypoint
    pub fn command(mut self, cmd: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.command = cmd.into_iter().map(Into::into).collect();
        self
    }

    /// Build the command-line arguments
    ///
    /// Consumes self to avoid cloning the command vector.
    pub fn build(self) -> Vec<String> {
        let mut args = vec![self.runtime_path.to_string_lossy().into_owned()];
        args.extend(self.runtime_args);

        match self.action {
            RuntimeAction::Version => {
                args.push("version".to_string());
            }
            RuntimeAction::ImageInspect => {
                args.push("image".to_string());
                args.push("inspect".to_string());
                args.push("--format={{.Id}}".to_string());
                args.push(self.image);
            }
            RuntimeAction::Build { context } => {
                args.push("build".to_string());
                args.push(format!("--tag={}", self.image));
                args.push(context.to_string_lossy().into_owned());
            }
            RuntimeAction::Kill { container } => {
                args.push("kill".to_string());
                args.push(container);
            }
            RuntimeAction::Run => {
                args.push("run".to_string());

                if self.interactive {
                    args.push("--interactive".to_string());
                }
                if self.auto_remove {
                    args.push("--rm".to_string());
                }
                if let Some(name) = self.name {
                    args.push(format!("--name={name}"));
                }

                // Isolation
                args.push("--network=none".to_string());
                args.push("--read-only".to_string());
                args.push("--log-driver=none".to_string());
                match self.limits.scratch_mb {
                    Some(size) => args.push(format!(
                        "--tmpfs={}:rw,nosuid,nodev,size={size}m",
                        self.scratch_path
                    )),
                    None => args.push(format!("--tmpfs={}:rw,nosuid,nodev", self.scratch_path)),
                }
                if let Some(user) = self.user {
                    args.push(format!("--user={user}"));
                }
                args.push("--cap-drop=ALL".to_string());
                for capability in &self.capabilities {
                    args.push(format!("--cap-add={capability}"));
                }
                args.push("--security-opt=no-new-privileges".to_string());

                // Resource limits
                if let Some(memory) = self.limits.memory_mb {
                    args.push(format!("--memory={memory}m"));
                    args.push(format!("--memory-swap={memory}m"));
                }
                if let Some(cpus) = self.limits.cpus {
                    args.push(format!("--cpus={cpus}"));
                }
                if let Some(procs) = self.limits.max_processes {
                    args.push(format!("--pids-limit={procs}"));
                }

                // Environment
                for (key, value) in &self.env {
                    args.push(format!("--env={key}={value}"));
                }

                let mut command = self.command.into_iter();
                if let Some(entrypoint) = command.next() {
                    args.push(format!("--entrypoint={entrypoint}"));
                }
                args.push(self.image);
                args.extend(command);
            }
        }

        args
    }

    /// Get the runtime binary path
    pub fn runtime_path(&self) -> &Path {
        &self.runtime_path
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeAction {
    /// Liveness probe
    Version,
    /// Check whether an image exists
    ImageInspect,
    /// Build an image from a context directory
    Build { context: PathBuf },
    /// Start a container
    Run,
    /// Kill a running container by name
    Kill { container: String },
}
