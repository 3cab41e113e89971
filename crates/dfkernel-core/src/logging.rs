//! # Logging
//!
//! `tracing-subscriber` initialisation for embedders of the engine.
//!
//! The filter comes from `DFKERNEL_LOG` when set, otherwise from
//! [`LogConfig::filter`]. The format (`text` or `json`) comes from
//! [`LogConfig::format`], which [`EngineConfig::with_env_overrides`]
//! fills from `DFKERNEL_LOG_FORMAT`.
//!
//! [`EngineConfig::with_env_overrides`]: crate::EngineConfig::with_env_overrides

use crate::config::{LogConfig, LogFormat};
use crate::{DataflowError, primitives};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Install a global subscriber. Fails if one is already installed.
pub fn init(config: &LogConfig) -> Result<(), DataflowError> {
    let filter = EnvFilter::try_from_env(primitives::ENV_LOG)
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .map_err(|e| DataflowError::ConfigError(e.to_string()))?;

    let registry = tracing_subscriber::registry().with(filter);
    let installed = match config.format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).try_init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).try_init(),
    };

    installed.map_err(|e| DataflowError::ConfigError(e.to_string()))
}
