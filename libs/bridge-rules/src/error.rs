//! Error types for bridge-rules

use thiserror::Error;

/// Formula and status-table errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvaluationError {
    #[error("Empty formula")]
    Empty,

    #[error("Invalid formula '{formula}': {reason}")]
    Syntax { formula: String, reason: String },

    #[error("Formula '{formula}' references '{symbol}' but only {available} bits are available")]
    MissingBit {
        formula: String,
        symbol: String,
        available: usize,
    },

    #[error("Expected {expected} status bits, got {actual}")]
    BitCountMismatch { expected: usize, actual: usize },

    #[error("Unknown status address '{0}'")]
    UnknownAddress(String),

    #[error("Duplicate status address '{0}'")]
    DuplicateAddress(String),

    #[error("Too many status addresses: {count} (limit {limit})")]
    TooManyAddresses { count: usize, limit: usize },
}

impl EvaluationError {
    pub fn syntax(formula: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Syntax {
            formula: formula.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, EvaluationError>;
