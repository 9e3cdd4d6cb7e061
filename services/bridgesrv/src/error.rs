//! Error handling for the bridge service
//!
//! Steady-state errors (`LinkError`, `PublishError`, `EvaluationError`) are
//! recovered where they occur; only `ConfigurationError` aborts, and only at
//! startup. `BridgeSrvError` aggregates everything for the process boundary.

use bridge_rules::EvaluationError;
use errors::{BridgeError, BridgeErrorTrait, ErrorCategory};
use std::time::Duration;
use thiserror::Error;

/// Device link failures; always transient from the supervisor's point of view
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LinkError {
    #[error("Connect to {endpoint} failed: {reason}")]
    Connect { endpoint: String, reason: String },

    #[error("Link not connected")]
    NotConnected,

    #[error("Read {address} failed: {reason}")]
    Read { address: String, reason: String },

    #[error("Write {address} failed: {reason}")]
    Write { address: String, reason: String },

    #[error("Device I/O timed out after {0:?}")]
    Timeout(Duration),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Link I/O error: {0}")]
    Io(String),
}

impl LinkError {
    pub fn read(address: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Read {
            address: address.into(),
            reason: reason.into(),
        }
    }

    pub fn write(address: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Write {
            address: address.into(),
            reason: reason.into(),
        }
    }
}

/// Telemetry uplink failures; the record goes to the offline buffer instead
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PublishError {
    #[error("Publisher disconnected")]
    Disconnected,

    #[error("Publish rejected: {0}")]
    Rejected(String),

    #[error("Publisher I/O error: {0}")]
    Io(String),
}

/// Missing or invalid configuration; fatal at startup
#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("Missing configuration: {0}")]
    Missing(String),

    #[error("Invalid configuration for {field}: {reason}")]
    Invalid { field: String, reason: String },

    #[error("Variable table {path}: {reason}")]
    Table { path: String, reason: String },

    #[error("Status rules: {0}")]
    Rules(#[from] EvaluationError),

    #[error("Configuration load failed: {0}")]
    Load(String),
}

impl ConfigurationError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn table(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Table {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Service-level error
#[derive(Error, Debug)]
pub enum BridgeSrvError {
    #[error(transparent)]
    Link(#[from] LinkError),

    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error("Status evaluation failed: {0}")]
    Evaluation(#[from] EvaluationError),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("Offline buffer error: {0}")]
    Buffer(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, BridgeSrvError>;

impl From<serde_json::Error> for BridgeSrvError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<csv::Error> for BridgeSrvError {
    fn from(err: csv::Error) -> Self {
        Self::Serialization(format!("CSV: {}", err))
    }
}

impl BridgeErrorTrait for BridgeSrvError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Link(LinkError::Timeout(_)) => "BRIDGESRV_LINK_TIMEOUT",
            Self::Link(_) => "BRIDGESRV_LINK_ERROR",
            Self::Publish(_) => "BRIDGESRV_PUBLISH_ERROR",
            Self::Evaluation(_) => "BRIDGESRV_EVALUATION_ERROR",
            Self::Configuration(_) => "BRIDGESRV_CONFIG_ERROR",
            Self::Buffer(_) => "BRIDGESRV_BUFFER_ERROR",
            Self::Io(_) => "BRIDGESRV_IO_ERROR",
            Self::Serialization(_) => "BRIDGESRV_SERIALIZATION_ERROR",
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Link(LinkError::Timeout(_)) => ErrorCategory::Timeout,
            Self::Link(_) => ErrorCategory::Connection,
            Self::Publish(_) => ErrorCategory::Publish,
            Self::Evaluation(_) => ErrorCategory::Validation,
            Self::Configuration(_) => ErrorCategory::Configuration,
            Self::Buffer(_) | Self::Io(_) => ErrorCategory::Io,
            Self::Serialization(_) => ErrorCategory::Internal,
        }
    }
}

impl From<BridgeSrvError> for BridgeError {
    fn from(err: BridgeSrvError) -> Self {
        match err {
            BridgeSrvError::Link(LinkError::Connect { endpoint, reason }) => {
                BridgeError::ConnectionFailed { endpoint, reason }
            },
            BridgeSrvError::Link(LinkError::Timeout(d)) => {
                BridgeError::Timeout(format!("device I/O after {:?}", d))
            },
            BridgeSrvError::Link(e) => BridgeError::Communication(e.to_string()),
            BridgeSrvError::Publish(e) => BridgeError::Publish(e.to_string()),
            BridgeSrvError::Evaluation(e) => BridgeError::InvalidExpression {
                expression: match &e {
                    EvaluationError::Syntax { formula, .. }
                    | EvaluationError::MissingBit { formula, .. } => formula.clone(),
                    _ => String::new(),
                },
                error: e.to_string(),
            },
            BridgeSrvError::Configuration(ConfigurationError::Missing(msg)) => {
                BridgeError::MissingConfig(msg)
            },
            BridgeSrvError::Configuration(ConfigurationError::Invalid { field, reason }) => {
                BridgeError::InvalidConfig { field, reason }
            },
            BridgeSrvError::Configuration(e) => BridgeError::Configuration(e.to_string()),
            BridgeSrvError::Buffer(msg) => BridgeError::Internal(format!("offline buffer: {}", msg)),
            BridgeSrvError::Io(e) => BridgeError::Io(e),
            BridgeSrvError::Serialization(msg) => BridgeError::Serialization(msg),
        }
    }
}

impl From<ConfigurationError> for BridgeError {
    fn from(err: ConfigurationError) -> Self {
        BridgeSrvError::from(err).into()
    }
}
