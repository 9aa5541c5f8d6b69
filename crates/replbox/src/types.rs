use serde::{Deserialize, Serialize};

use crate::config::LanguageId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Memory ceiling in megabytes (swap is capped at the same value)
    #[serde(default)]
    pub memory_mb: Option<u64>,

    /// CPU share, in cores (e.g. 0.5)
    #[serde(default)]
    pub cpus: Option<f64>,

    /// Maximum number of processes/threads inside the sandbox
    #[serde(default)]
    pub max_processes: Option<u32>,

    /// Size of the writable scratch tmpfs in megabytes
    #[serde(default)]
    pub scratch_mb: Option<u64>,
}

impl ResourceLimits {
    /// Create new resource limits with the default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Limits with every field unset, useful as an override layer
    pub fn unset() -> Self {
        Self {
            memory_mb: None,
            cpus: None,
            max_processes: None,
            scratch_mb: None,
        }
    }

    /// Set the memory ceiling in megabytes
    pub fn with_memory_mb(mut self, mb: u64) -> Self {
        self.memory_mb = Some(mb);
        self
    }

    /// Set the CPU share
    pub fn with_cpus(mut self, cpus: f64) -> Self {
        self.cpus = Some(cpus);
        self
    }

    /// Set the maximum number of processes
    pub fn with_max_processes(mut self, count: u32) -> Self {
        self.max_processes = Some(count);
        self
    }

    /// Set the scratch area size in megabytes
    pub fn with_scratch_mb(mut self, mb: u64) -> Self {
        self.scratch_mb = Some(mb);
        self
    }

    /// Apply overrides from another ResourceLimits, preferring values from `overrides`
    pub fn with_overrides(&self, overrides: &ResourceLimits) -> ResourceLimits {
        ResourceLimits {
            memory_mb: overrides.memory_mb.or(self.memory_mb),
            cpus: overrides.cpus.or(self.cpus),
            max_processes: overrides.max_processes.or(self.max_processes),
            scratch_mb: overrides.scratch_mb.or(self.scratch_mb),
        }
    }
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            memory_mb: Some(256),
            cpus: Some(0.5),
            max_processes: Some(64),
            scratch_mb: Some(16),
        }
    }
}

/// A single snippet to execute
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRequest {
    pub language: LanguageId,
    pub code: String,
    /// Falls back to the configured timeout when absent
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl ExecutionRequest {
    pub fn new(language: LanguageId, code: impl Into<String>) -> Self {
        Self {
            language,
            code: code.into(),
            timeout_ms: None,
        }
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn options(&self) -> ExecuteOptions {
        ExecuteOptions {
            timeout_ms: self.timeout_ms,
        }
    }
}

/// Per-call options for [`Executor::execute`](crate::Executor::execute)
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecuteOptions {
    pub timeout_ms: Option<u64>,
}

impl ExecuteOptions {
    pub fn with_timeout_ms(timeout_ms: u64) -> Self {
        Self {
            timeout_ms: Some(timeout_ms),
        }
    }
}

/// Outcome of an execution, identical in shape on every tier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub success: bool,

    pub output: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timed_out: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub used_warm_session: Option<bool>,
}

impl ExecutionResult {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            timed_out: None,
            used_warm_session: None,
        }
    }

    pub fn failure(output: impl Into<String>) -> Self {
        Self {
            success: false,
            output: output.into(),
            timed_out: None,
            used_warm_session: None,
        }
    }

    pub fn timeout(output: impl Into<String>) -> Self {
        Self {
            success: false,
            output: output.into(),
            timed_out: Some(true),
            used_warm_session: None,
        }
    }

    #[must_use]
    pub fn with_warm_session(mut self, warm: bool) -> Self {
        self.used_warm_session = Some(warm);
        self
    }

    /// Check if the execution hit its timeout
    #[must_use]
    pub fn is_timed_out(&self) -> bool {
        self.timed_out == Some(true)
    }
}
