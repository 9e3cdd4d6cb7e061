//! Unified error handling for PLC bridge services
//!
//! Service crates keep their own fine-grained error enums and convert into
//! [`BridgeError`] at the process boundary (startup, `main`).

use thiserror::Error;

// ============================================================================
// BridgeError - Main error type
// ============================================================================

/// Main error type shared by all bridge services
#[derive(Debug, Error)]
pub enum BridgeError {
    // ======================================
    // Configuration Errors
    // ======================================
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid configuration: {field}: {reason}")]
    InvalidConfig { field: String, reason: String },

    #[error("Missing required configuration: {0}")]
    MissingConfig(String),

    // ======================================
    // Device & Communication Errors
    // ======================================
    #[error("Communication error: {0}")]
    Communication(String),

    #[error("Connection failed: {endpoint}: {reason}")]
    ConnectionFailed { endpoint: String, reason: String },

    #[error("Timeout waiting for response from {0}")]
    Timeout(String),

    #[error("Publish failed: {0}")]
    Publish(String),

    // ======================================
    // Evaluation Errors
    // ======================================
    #[error("Invalid expression: {expression}: {error}")]
    InvalidExpression { expression: String, error: String },

    // ======================================
    // File & I/O Errors
    // ======================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // ======================================
    // Service & Runtime Errors
    // ======================================
    #[error("Service startup failed: {0}")]
    StartupFailed(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using BridgeError
pub type BridgeResult<T> = Result<T, BridgeError>;

impl BridgeError {
    /// Process exit code for errors that abort the service
    ///
    /// Retryable failures map to `EX_TEMPFAIL` so a supervisor restarts the unit.
    pub fn exit_code(&self) -> i32 {
        if self.is_retryable() {
            return 75;
        }
        match self.category() {
            ErrorCategory::Configuration | ErrorCategory::Validation => 78,
            ErrorCategory::Io => 74,
            _ => 1,
        }
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for BridgeError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

// ============================================================================
// Error classification
// ============================================================================

/// Coarse error classification used for logging and exit codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Validation,
    Connection,
    Timeout,
    Publish,
    Io,
    Internal,
}

/// Common behaviour of every error type in the workspace
pub trait BridgeErrorTrait: std::error::Error + Send + Sync + 'static {
    /// Stable error code for logs
    fn error_code(&self) -> &'static str;

    /// Error category
    fn category(&self) -> ErrorCategory;

    /// Whether the operation may succeed if simply retried
    fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Connection | ErrorCategory::Timeout | ErrorCategory::Publish
        )
    }
}

impl BridgeErrorTrait for BridgeError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::InvalidConfig { .. } => "INVALID_CONFIG",
            Self::MissingConfig(_) => "MISSING_CONFIG",
            Self::Communication(_) => "COMMUNICATION_ERROR",
            Self::ConnectionFailed { .. } => "CONNECTION_FAILED",
            Self::Timeout(_) => "TIMEOUT",
            Self::Publish(_) => "PUBLISH_FAILED",
            Self::InvalidExpression { .. } => "INVALID_EXPRESSION",
            Self::Io(_) => "IO_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::StartupFailed(_) => "STARTUP_FAILED",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Configuration(_) | Self::InvalidConfig { .. } | Self::MissingConfig(_) => {
                ErrorCategory::Configuration
            },
            Self::InvalidExpression { .. } => ErrorCategory::Validation,
            Self::Communication(_) | Self::ConnectionFailed { .. } => ErrorCategory::Connection,
            Self::Timeout(_) => ErrorCategory::Timeout,
            Self::Publish(_) => ErrorCategory::Publish,
            Self::Io(_) => ErrorCategory::Io,
            Self::Serialization(_) | Self::StartupFailed(_) | Self::Internal(_) => {
                ErrorCategory::Internal
            },
        }
    }
}
