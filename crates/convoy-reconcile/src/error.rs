//! Reconciler error types.

use thiserror::Error;

/// Errors that can occur while reconciling a service.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("no reconciler running for service: {0}")]
    ServiceNotRunning(String),

    #[error("service spec missing from store: {0}")]
    SpecMissing(String),

    #[error("reconciler not accepting commands: {0}")]
    CommandRejected(String),

    #[error("state store error: {0}")]
    State(#[from] convoy_state::StateError),
}

pub type ReconcileResult<T> = Result<T, ReconcileError>;
