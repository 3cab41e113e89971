//! # Configuration
//!
//! Engine configuration loaded from TOML and overridden from the environment.
//!
//! ```toml
//! [defaults]
//! silent = false
//! store_history = true
//! stop_on_error = true
//!
//! [log]
//! filter = "dfkernel_core=debug"
//! format = "json"
//! ```

use crate::primitives;
use crate::DataflowError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

// =============================================================================
// RUN FLAGS
// =============================================================================

/// Flags forwarded to the runner for every execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunFlags {
    /// Suppress displayed output.
    pub silent: bool,
    /// Record the execution in the runtime's history.
    pub store_history: bool,
    /// Abort queued work after a failure.
    pub stop_on_error: bool,
}

impl Default for RunFlags {
    fn default() -> Self {
        Self {
            silent: false,
            store_history: true,
            stop_on_error: true,
        }
    }
}

impl RunFlags {
    /// Merge per-request overrides over these flags.
    #[must_use]
    pub fn apply(&self, overrides: &RunOverrides) -> Self {
        Self {
            silent: overrides.silent.unwrap_or(self.silent),
            store_history: overrides.store_history.unwrap_or(self.store_history),
            stop_on_error: overrides.stop_on_error.unwrap_or(self.stop_on_error),
        }
    }
}

/// Per-request overrides of [`RunFlags`]. `None` keeps the default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunOverrides {
    pub silent: Option<bool>,
    pub store_history: Option<bool>,
    pub stop_on_error: Option<bool>,
}

impl RunOverrides {
    #[must_use]
    pub fn silent(mut self, value: bool) -> Self {
        self.silent = Some(value);
        self
    }

    #[must_use]
    pub fn store_history(mut self, value: bool) -> Self {
        self.store_history = Some(value);
        self
    }

    #[must_use]
    pub fn stop_on_error(mut self, value: bool) -> Self {
        self.stop_on_error = Some(value);
        self
    }
}

// =============================================================================
// LOGGING
// =============================================================================

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = DataflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(DataflowError::ConfigError(format!(
                "unknown log format '{other}' (expected 'text' or 'json')"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `tracing` filter directive.
    pub filter: String,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: primitives::DEFAULT_LOG_FILTER.to_string(),
            format: LogFormat::Text,
        }
    }
}

// =============================================================================
// ENGINE CONFIG
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Controller-wide run flags.
    pub defaults: RunFlags,
    pub log: LogConfig,
}

impl EngineConfig {
    /// Parse a configuration from TOML text. Missing keys keep their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, DataflowError> {
        toml::from_str(text).map_err(|e| DataflowError::ConfigError(e.to_string()))
    }

    /// Read and parse a TOML configuration file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, DataflowError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| DataflowError::IoError(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Apply `DFKERNEL_*` environment variables on top of this configuration.
    pub fn with_env_overrides(self) -> Result<Self, DataflowError> {
        self.apply_env(|name| std::env::var(name).ok())
    }

    fn apply_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self, DataflowError> {
        if let Some(value) = lookup(primitives::ENV_SILENT) {
            self.defaults.silent = parse_bool(primitives::ENV_SILENT, &value)?;
        }
        if let Some(value) = lookup(primitives::ENV_STORE_HISTORY) {
            self.defaults.store_history = parse_bool(primitives::ENV_STORE_HISTORY, &value)?;
        }
        if let Some(value) = lookup(primitives::ENV_LOG) {
            self.log.filter = value;
        }
        if let Some(value) = lookup(primitives::ENV_LOG_FORMAT) {
            self.log.format = value.parse()?;
        }
        Ok(self)
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool, DataflowError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(DataflowError::ConfigError(format!(
            "{name}: expected a boolean, got '{other}'"
        ))),
    }
}

// =============================================================================
// TESTS
// =============================================================================
