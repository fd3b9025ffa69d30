//! Error types for the simulator

use thiserror::Error;

/// Errors raised while configuring or running a simulation
#[derive(Debug, Error)]
pub enum SimError {
    /// Malformed redundancy spec, tier mismatch or missing recovery settings
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A pluggable event-time generator produced an unusable timestamp
    #[error("generator error on {unit}: {reason}")]
    Generator { unit: String, reason: String },

    /// Internal accounting went out of bounds
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// A redundancy model was handed a state it cannot evaluate
    #[error("invalid stripe state: {0}")]
    InvalidState(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl SimError {
    pub fn config(msg: impl Into<String>) -> Self {
        SimError::Configuration(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        SimError::InvariantViolation(msg.into())
    }

    pub fn generator(unit: impl Into<String>, reason: impl Into<String>) -> Self {
        SimError::Generator {
            unit: unit.into(),
            reason: reason.into(),
        }
    }
}
