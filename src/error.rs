//! Error types

use crate::clock::Step;
use std::time::Duration;
use thiserror::Error;

/// Boxed error raised by an operation.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Why a group did not finish normally.
#[derive(Debug, Error)]
pub enum GroupError {
    /// The wall-clock bound elapsed before the group drained.
    #[error("group timed out after {0:?}")]
    Timeout(Duration),

    /// The first operation to fail. Later failures are discarded.
    #[error("operation at step {step} failed: {source}")]
    Operation {
        step: Step,
        #[source]
        source: BoxError,
    },

    /// More jobs ran than the configured limit allows.
    #[error("drain exceeded the limit of {0} jobs")]
    JobLimitExceeded(usize),
}

impl GroupError {
    /// Whether the group was stopped by its wall-clock bound.
    pub fn is_timeout(&self) -> bool {
        matches!(self, GroupError::Timeout(_))
    }
}

/// Result type for group operations.
pub type Result<T> = std::result::Result<T, GroupError>;
