//! A library for sandboxed execution of array-language snippets.
//!
//! replbox drives J, Dyalog APL and Kap interpreters as long-lived REPL
//! sessions inside a container runtime, and turns each snippet into a
//! clean, structured result.
//!
//! # Features
//!
//! - **Warm sessions**: one pooled interpreter per language, reset between requests and recycled after a request budget.
//! - **Marker protocol**: unique start/end markers delimit each reply in the interpreter's output stream.
//! - **Sanitizing**: echoes, prompts, banners and markers are stripped and errors are classified per dialect.
//! - **Fallback tiers**: warm session, then a single-use cold container, then the host interpreter when sandboxing is unavailable.
//! - **Confinement**: no network, read-only root, a small scratch tmpfs, dropped capabilities and resource limits.
//! - **TOML configuration**: embedded defaults with file and `REPLBOX_*` environment overrides.

pub use config::{Config, ConfigError, EXAMPLE_CONFIG, LanguageConfig, LanguageId};
pub use engine::{
    EngineError, Executor, PoolManager, Session, SessionInfo, SessionState, WarmLease,
};
pub use runtime::{IsolationRuntime, LaunchSpec, RuntimeError};
pub use types::{ExecuteOptions, ExecutionRequest, ExecutionResult, ResourceLimits};

pub mod config;
pub mod dialect;
pub mod engine;
pub mod runtime;
pub mod types;
