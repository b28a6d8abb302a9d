//! Crate-level error type.
//!
//! Mirrors the error-kind table in the execution-core specification: one
//! variant per kind the scheduler, pool, and executor can raise. Connector
//! failures are carried as values inside `ExecutionLog`/`Result`, not as
//! this error type — only the plumbing around a trigger raises `FlowError`.

use uuid::Uuid;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, FlowError>;

#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    /// The caller's root context was cancelled during a suspension point.
    #[error("context cancelled")]
    ContextCancelled,

    /// Storage read of an absent entity.
    #[error("not found: {0}")]
    NotFound(String),

    /// A required parameter had no supplied value and no default.
    #[error("missing required parameter: {0}")]
    MissingParameter(String),

    /// A connector declared a credential requirement not present in storage.
    #[error("missing credential for service: {0}")]
    MissingCredential(String),

    /// A workflow or chain step referenced an unregistered action kind.
    #[error("unknown action kind: {0}")]
    UnknownAction(String),

    /// The worker pool's bounded queue rejected a submission.
    #[error("queue full")]
    QueueFull,

    /// `Submit` was called after `Shutdown` began.
    #[error("pool stopped")]
    PoolStopped,

    /// A connector returned `status = failed` or the transport itself failed.
    #[error("connector failed: {0}")]
    ConnectorFailed(String),

    /// `AppendLog` itself failed; the external side effect has already
    /// happened, so this is logged rather than surfaced to the caller.
    #[error("persistence failed: {0}")]
    Persistence(String),

    /// Storage-layer failure not covered by a more specific kind.
    #[error("storage error: {0}")]
    Storage(String),

    /// Startup or other unrecoverable failure with no typed handling path.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl FlowError {
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound(id.into())
    }

    pub fn not_found_id(id: Uuid) -> Self {
        Self::NotFound(id.to_string())
    }
}
