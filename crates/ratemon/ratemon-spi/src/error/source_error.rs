//! Data-source error types.

use thiserror::Error;

use crate::model::RunId;

/// Failures reported by a [`RateSource`](crate::contract::RateSource).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    #[error("Run {0} not found")]
    RunNotFound(RunId),

    #[error("No trigger key for run {0}")]
    NoTriggerKey(RunId),

    #[error("Connectivity error: {0}")]
    Connectivity(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),
}
