//! Error types for the interval subsystem.
//!
//! Two error kinds surface as variants here; a third category — "silent
//! tolerance" for legacy id collisions and unknown reserved properties on
//! deserialize — is never an error at all: those paths return `Ok` and
//! emit a `tracing::warn!` instead.

use thiserror::Error;

/// Errors raised by the endpoint factory and interval operations.
#[derive(Debug, Clone, Error)]
pub enum IntervalError {
    /// The caller violated a contract (bad flag combination, missing
    /// segment where one is required). Callers are expected to fix their
    /// input; this is never retried internally.
    #[error("usage error: {message}")]
    Usage {
        /// Description of the violated precondition.
        message: String,
    },

    /// An internal invariant was violated (op-created reference missing
    /// `SlideOnRemove`, an unreachable normalization branch). Fatal to the
    /// caller — the core cannot proceed safely past this point.
    #[error("invariant violation: {message}")]
    Invariant {
        /// Description of the violated invariant.
        message: String,
    },
}

impl IntervalError {
    /// Construct a [`IntervalError::Usage`] error.
    pub fn usage(message: impl Into<String>) -> Self {
        Self::Usage {
            message: message.into(),
        }
    }

    /// Construct a [`IntervalError::Invariant`] error.
    pub fn invariant(message: impl Into<String>) -> Self {
        Self::Invariant {
            message: message.into(),
        }
    }
}
