//! In-memory `Storage` implementation.
//!
//! The first-class test double required by the storage contract: every
//! operation is backed by plain `HashMap`s behind a `tokio::sync::RwLock`,
//! enough to make the scheduler, pool, and executor fully testable without a
//! database.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::{check_cancelled, Storage, StoreError};
use crate::model::{Credential, ExecutionLog, Workflow};

#[derive(Default)]
struct Inner {
    workflows: HashMap<Uuid, Workflow>,
    credentials: HashMap<(String, String), Credential>,
    logs: Vec<ExecutionLog>,
}

/// In-memory implementation of [`Storage`]. Cheap to clone via `Arc`; not
/// itself `Clone` since callers should share one instance.
#[derive(Default)]
pub struct InMemoryStorage {
    inner: RwLock<Inner>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test/seeding helper: insert a credential bundle directly.
    pub async fn seed_credential(&self, credential: Credential) {
        let mut inner = self.inner.write().await;
        inner.credentials.insert(
            (credential.owner_id.clone(), credential.service_name.clone()),
            credential,
        );
    }

    /// Test helper: snapshot of appended logs, in append order.
    pub async fn logs(&self) -> Vec<ExecutionLog> {
        self.inner.read().await.logs.clone()
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn get_workflow(
        &self,
        cancel: &CancellationToken,
        id: Uuid,
    ) -> Result<Workflow, StoreError> {
        check_cancelled(cancel)?;
        self.inner
            .read()
            .await
            .workflows
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    async fn list_active_scheduled(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<Workflow>, StoreError> {
        check_cancelled(cancel)?;
        let mut workflows: Vec<Workflow> = self
            .inner
            .read()
            .await
            .workflows
            .values()
            .filter(|w| {
                w.is_active && matches!(w.trigger_kind, crate::model::TriggerKind::Schedule)
            })
            .cloned()
            .collect();
        workflows.sort_by_key(|w| w.id);
        Ok(workflows)
    }

    async fn create_workflow(
        &self,
        cancel: &CancellationToken,
        workflow: Workflow,
    ) -> Result<(), StoreError> {
        check_cancelled(cancel)?;
        self.inner
            .write()
            .await
            .workflows
            .insert(workflow.id, workflow);
        Ok(())
    }

    async fn update_workflow(
        &self,
        cancel: &CancellationToken,
        workflow: Workflow,
    ) -> Result<(), StoreError> {
        check_cancelled(cancel)?;
        let mut inner = self.inner.write().await;
        if !inner.workflows.contains_key(&workflow.id) {
            return Err(StoreError::NotFound(workflow.id));
        }
        inner.workflows.insert(workflow.id, workflow);
        Ok(())
    }

    async fn delete_workflow(
        &self,
        cancel: &CancellationToken,
        id: Uuid,
    ) -> Result<(), StoreError> {
        check_cancelled(cancel)?;
        self.inner
            .write()
            .await
            .workflows
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound(id))
    }

    async fn set_last_triggered(
        &self,
        cancel: &CancellationToken,
        id: Uuid,
        timestamp: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        check_cancelled(cancel)?;
        let mut inner = self.inner.write().await;
        let workflow = inner.workflows.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        workflow.last_triggered_at = Some(timestamp);
        Ok(())
    }

    async fn get_credential(
        &self,
        cancel: &CancellationToken,
        owner_id: &str,
        service_name: &str,
    ) -> Result<Credential, StoreError> {
        check_cancelled(cancel)?;
        self.inner
            .read()
            .await
            .credentials
            .get(&(owner_id.to_string(), service_name.to_string()))
            .cloned()
            .ok_or_else(|| StoreError::CredentialNotFound {
                owner_id: owner_id.to_string(),
                service_name: service_name.to_string(),
            })
    }

    async fn append_log(
        &self,
        cancel: &CancellationToken,
        log: ExecutionLog,
    ) -> Result<(), StoreError> {
        check_cancelled(cancel)?;
        self.inner.write().await.logs.push(log);
        Ok(())
    }
}
