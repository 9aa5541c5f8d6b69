use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;
use crate::types::ResourceLimits;

/// Interpreters the engine knows how to drive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LanguageId {
    J,
    Apl,
    Kap,
}

impl LanguageId {
    pub const ALL: [LanguageId; 3] = [LanguageId::J, LanguageId::Apl, LanguageId::Kap];

    pub fn as_str(&self) -> &'static str {
        match self {
            LanguageId::J => "j",
            LanguageId::Apl => "apl",
            LanguageId::Kap => "kap",
        }
    }
}

impl FromStr for LanguageId {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "j" => Ok(LanguageId::J),
            "apl" => Ok(LanguageId::Apl),
            "kap" => Ok(LanguageId::Kap),
            _ => Err(ConfigError::UnknownLanguage(s.to_owned())),
        }
    }
}

impl fmt::Display for LanguageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a language is launched, inside the isolation runtime and on the host
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanguageConfig {
    /// Human-readable name (e.g., "Dyalog APL")
    pub name: String,

    /// Execution image for the isolation runtime
    pub image: String,

    /// Directory the image is built from when it does not exist yet
    #[serde(default)]
    pub build_context: Option<PathBuf>,

    /// Interactive interpreter command inside the image; replaces the image entrypoint
    pub entrypoint: Vec<String>,

    /// Interpreter command on the host for unsandboxed execution.
    /// Empty disables the direct tier for this language.
    #[serde(default)]
    pub direct_command: Vec<String>,

    /// Capability-restricting library loaded into fresh isolated sessions
    /// (path inside the image). Only used by dialects that support it.
    #[serde(default)]
    pub library: Option<String>,

    /// Environment variables for the interpreter
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Capabilities added back after dropping all of them
    #[serde(default)]
    pub capabilities: Vec<String>,

    /// Resource limits for this language (overrides defaults)
    #[serde(default)]
    pub limits: Option<ResourceLimits>,
}

impl LanguageConfig {
    /// Check if the language can run without the isolation runtime
    pub fn supports_direct(&self) -> bool {
        !self.direct_command.is_empty()
    }

    /// Check if the image can be built on demand
    pub fn is_buildable(&self) -> bool {
        self.build_context.is_some()
    }
}
