use thiserror::Error;

/// Core error type for engine, configuration and scenario failures
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ArbiterError {
    #[error("Invalid ratio range: min={min}, max={max} (expected 0 <= min <= max <= 100)")]
    InvalidRange { min: i32, max: i32 },

    #[error("Invalid agent id: {0:?}")]
    InvalidAgentId(String),

    #[error("Unknown agent: {0}")]
    UnknownAgent(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Configuration validation failed: {details}")]
    ConfigValidation { details: String },

    #[error("Scenario error: {0}")]
    Scenario(String),

    #[error("Engine has been shut down")]
    EngineStopped,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("TOML deserialization error: {0}")]
    TomlError(#[from] toml::de::Error),
}

impl ArbiterError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a configuration validation error
    pub fn config_validation(details: impl Into<String>) -> Self {
        Self::ConfigValidation {
            details: details.into(),
        }
    }

    pub fn scenario(msg: impl Into<String>) -> Self {
        Self::Scenario(msg.into())
    }

    /// Errors caused by the caller's input rather than by the engine.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidRange { .. } | Self::InvalidAgentId(_) | Self::UnknownAgent(_)
        )
    }
}

/// Failure reported by a sink while enacting a decision
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Decision rejected by target: {reason}")]
    Rejected { reason: String },

    #[error("Sink did not answer within {millis}ms")]
    Timeout { millis: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SinkError {
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected {
            reason: reason.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Io(_))
    }
}

/// Failure reported by a notifier. Observability only.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("No subscribers listening")]
    NoSubscribers,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type ArbiterResult<T> = std::result::Result<T, ArbiterError>;
pub type SinkResult<T> = std::result::Result<T, SinkError>;
pub type NotifyResult<T> = std::result::Result<T, NotifyError>;
