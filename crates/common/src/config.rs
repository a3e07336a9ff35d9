use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ArbiterError, ArbiterResult};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    pub engine: EngineConfig,
    pub logging: LoggingConfig,
    pub sink: SinkConfig,
}

/// Largest accepted value for any engine duration: one day.
pub const MAX_ENGINE_DURATION_MS: u64 = 86_400_000;

/// Detection and arbitration parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Trailing window for the submission scan. Requests exactly this old are excluded.
    pub detection_window_ms: u64,
    /// Delay before a buffered (losing) request is applied.
    pub buffer_delay_ms: u64,
    /// Run the full-log scan when a new agent is onboarded.
    pub onboarding_scan: bool,
    /// Reject submissions from agents that were never onboarded instead of
    /// onboarding them implicitly.
    pub strict_onboarding: bool,
    /// Upper bound on a single sink call.
    pub sink_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            detection_window_ms: 5_000,
            buffer_delay_ms: 5_000,
            onboarding_scan: true,
            strict_onboarding: false,
            sink_timeout_ms: 2_000,
        }
    }
}

impl EngineConfig {
    pub fn detection_window(&self) -> Duration {
        Duration::from_millis(self.detection_window_ms)
    }

    pub fn buffer_delay(&self) -> Duration {
        Duration::from_millis(self.buffer_delay_ms)
    }

    pub fn sink_timeout(&self) -> Duration {
        Duration::from_millis(self.sink_timeout_ms)
    }

    pub fn validate(&self) -> ArbiterResult<()> {
        for (name, value) in [
            ("detection_window_ms", self.detection_window_ms),
            ("buffer_delay_ms", self.buffer_delay_ms),
            ("sink_timeout_ms", self.sink_timeout_ms),
        ] {
            if value == 0 {
                return Err(ArbiterError::config_validation(format!(
                    "engine.{} must be greater than 0",
                    name
                )));
            }
            if value > MAX_ENGINE_DURATION_MS {
                return Err(ArbiterError::config_validation(format!(
                    "engine.{} must be at most {} (got {})",
                    name, MAX_ENGINE_DURATION_MS, value
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    /// Append every applied decision to this file as JSON lines.
    pub decision_log: Option<PathBuf>,
}

impl SystemConfig {
    /// Load and validate a TOML configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> ArbiterResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ArbiterError::config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> ArbiterResult<Self> {
        let config: SystemConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ArbiterResult<()> {
        self.engine.validate()?;
        if self.logging.level.trim().is_empty() {
            return Err(ArbiterError::config_validation(
                "logging.level must not be empty",
            ));
        }
        Ok(())
    }
}
