// 7.0 config.rs: all settings in one place. engine limits, sweeper cadence, logging.
// 7.1 loaded from TOML. every section is optional and falls back to its defaults.

use crate::engine::EngineConfig;
use crate::sweeper::SweeperConfig;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub sweeper: SweeperConfig,
    pub logging: LoggingConfig,
}

impl AppConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    // Validate the configuration for internal consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        let engine = &self.engine;

        if engine.max_leverage < 1 {
            return Err(ConfigError::InvalidValue {
                field: "engine.max_leverage",
                reason: "must be at least 1".to_string(),
            });
        }

        // the margin has to stay below the initial margin fraction of the highest
        // leverage, otherwise a long's liquidation price lands above its entry
        let max_margin = Decimal::ONE / Decimal::from(engine.max_leverage);
        if engine.security_margin <= Decimal::ZERO || engine.security_margin >= max_margin {
            return Err(ConfigError::InvalidValue {
                field: "engine.security_margin",
                reason: format!("must be between 0 and {max_margin} (exclusive)"),
            });
        }

        if engine.high_risk_distance_pct < Decimal::ZERO {
            return Err(ConfigError::InvalidValue {
                field: "engine.high_risk_distance_pct",
                reason: "must not be negative".to_string(),
            });
        }

        if engine.max_events == 0 {
            return Err(ConfigError::InvalidValue {
                field: "engine.max_events",
                reason: "must be greater than 0".to_string(),
            });
        }

        if self.sweeper.interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "sweeper.interval_secs",
                reason: "must be greater than 0".to_string(),
            });
        }

        if self.sweeper.quote_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "sweeper.quote_timeout_ms",
                reason: "must be greater than 0".to_string(),
            });
        }

        if !matches!(self.logging.format.as_str(), "pretty" | "json") {
            return Err(ConfigError::InvalidValue {
                field: "logging.format",
                reason: format!("expected \"pretty\" or \"json\", got {:?}", self.logging.format),
            });
        }

        Ok(())
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl LoggingConfig {
    /// Installs the global tracing subscriber. `RUST_LOG` wins over `level`.
    /// a second call keeps the first subscriber.
    pub fn init(&self) {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level));

        let _ = match self.format.as_str() {
            "json" => fmt().json().with_env_filter(filter).try_init(),
            _ => fmt().with_env_filter(filter).try_init(),
        };
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "pretty".into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadFile(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}
