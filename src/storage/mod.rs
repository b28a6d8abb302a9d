//! Storage contract consumed by the scheduler, executor, and (outside this
//! crate) the API collaborator.
//!
//! Every method takes a `CancellationToken` as its first argument and must
//! fail with [`StoreError::Cancelled`] when it trips mid-call. Implementors
//! guarantee serializability per single call; no multi-call transactions are
//! required by the core.

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::InMemoryStorage;
#[cfg(feature = "postgres")]
pub use postgres::PostgresStorage;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::model::{Credential, ExecutionLog, Workflow};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("context cancelled")]
    Cancelled,

    #[error("not found: {0}")]
    NotFound(Uuid),

    #[error("credential not found for {owner_id}/{service_name}")]
    CredentialNotFound {
        owner_id: String,
        service_name: String,
    },

    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// The capability interface the scheduler, executor, and external API all
/// consume.
#[async_trait]
pub trait Storage: Send + Sync + 'static {
    async fn get_workflow(
        &self,
        cancel: &CancellationToken,
        id: Uuid,
    ) -> Result<Workflow, StoreError>;

    /// Every workflow with `trigger_kind = schedule AND is_active = true`,
    /// ordered ascending by id. The scheduler's sole source of truth.
    async fn list_active_scheduled(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<Workflow>, StoreError>;

    async fn create_workflow(
        &self,
        cancel: &CancellationToken,
        workflow: Workflow,
    ) -> Result<(), StoreError>;

    async fn update_workflow(
        &self,
        cancel: &CancellationToken,
        workflow: Workflow,
    ) -> Result<(), StoreError>;

    async fn delete_workflow(
        &self,
        cancel: &CancellationToken,
        id: Uuid,
    ) -> Result<(), StoreError>;

    /// Atomic update of the one mutable field outside `is_active`.
    async fn set_last_triggered(
        &self,
        cancel: &CancellationToken,
        id: Uuid,
        timestamp: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn get_credential(
        &self,
        cancel: &CancellationToken,
        owner_id: &str,
        service_name: &str,
    ) -> Result<Credential, StoreError>;

    async fn append_log(
        &self,
        cancel: &CancellationToken,
        log: ExecutionLog,
    ) -> Result<(), StoreError>;
}

/// Returns `Err(StoreError::Cancelled)` if `cancel` has already tripped.
/// Called at the top of every storage method, matching the contract that
/// cancellation is checked at every suspension point.
pub(crate) fn check_cancelled(cancel: &CancellationToken) -> Result<(), StoreError> {
    if cancel.is_cancelled() {
        Err(StoreError::Cancelled)
    } else {
        Ok(())
    }
}
