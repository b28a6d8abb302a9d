//! PostgreSQL-backed [`Storage`] implementation.
//!
//! Schema (the single authoritative schema the core requires; additive
//! columns that don't break existing readers are fine):
//!
//! ```sql
//! CREATE TABLE workflows (
//!     id                      UUID PRIMARY KEY,
//!     owner_id                TEXT NOT NULL,
//!     tenant_id               TEXT NOT NULL,
//!     name                    TEXT NOT NULL,
//!     trigger_kind            TEXT NOT NULL,
//!     action_kind             TEXT NOT NULL,
//!     config                  JSONB NOT NULL,
//!     chain                   JSONB NOT NULL DEFAULT '[]',
//!     parameters              JSONB NOT NULL DEFAULT '[]',
//!     is_active               BOOLEAN NOT NULL DEFAULT true,
//!     last_triggered_at       TIMESTAMPTZ,
//!     interval_seconds        BIGINT,
//!     execution_timeout_seconds BIGINT,
//!     created_at              TIMESTAMPTZ NOT NULL DEFAULT now()
//! );
//!
//! CREATE TABLE credentials (
//!     owner_id        TEXT NOT NULL,
//!     service_name    TEXT NOT NULL,
//!     secret_bundle   JSONB NOT NULL,
//!     PRIMARY KEY (owner_id, service_name)
//! );
//!
//! CREATE TABLE execution_logs (
//!     id              UUID PRIMARY KEY,
//!     workflow_id     UUID NOT NULL,
//!     status          TEXT NOT NULL,
//!     message         TEXT NOT NULL,
//!     detail          JSONB NOT NULL,
//!     started_at      TIMESTAMPTZ NOT NULL,
//!     completed_at    TIMESTAMPTZ NOT NULL
//! );
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument};
use uuid::Uuid;

use super::{check_cancelled, Storage, StoreError};
use crate::model::{
    ChainStep, Credential, ExecutionLog, ExecutionStatus, ParameterSpec, TriggerKind, Workflow,
};

/// PostgreSQL implementation of [`Storage`], backed by a connection pool.
#[derive(Clone)]
pub struct PostgresStorage {
    pool: PgPool,
}

impl PostgresStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// `SELECT 1`, used by the lifecycle controller after opening the pool.
    pub async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(|e| StoreError::Database(e.to_string()))
    }
}

fn trigger_kind_to_str(kind: TriggerKind) -> &'static str {
    match kind {
        TriggerKind::Webhook => "webhook",
        TriggerKind::Schedule => "schedule",
    }
}

fn trigger_kind_from_str(s: &str) -> Result<TriggerKind, StoreError> {
    match s {
        "webhook" => Ok(TriggerKind::Webhook),
        "schedule" => Ok(TriggerKind::Schedule),
        other => Err(StoreError::Serialization(format!(
            "unknown trigger_kind: {other}"
        ))),
    }
}

fn status_to_str(status: ExecutionStatus) -> &'static str {
    match status {
        ExecutionStatus::Success => "success",
        ExecutionStatus::Failed => "failed",
        ExecutionStatus::Cancelled => "cancelled",
        ExecutionStatus::Partial => "partial",
    }
}

fn row_to_workflow(row: &sqlx::postgres::PgRow) -> Result<Workflow, StoreError> {
    let chain: serde_json::Value = row.try_get("chain").map_err(db_err)?;
    let parameters: serde_json::Value = row.try_get("parameters").map_err(db_err)?;
    let chain: Vec<ChainStep> =
        serde_json::from_value(chain).map_err(|e| StoreError::Serialization(e.to_string()))?;
    let parameters: Vec<ParameterSpec> = serde_json::from_value(parameters)
        .map_err(|e| StoreError::Serialization(e.to_string()))?;
    let trigger_kind: String = row.try_get("trigger_kind").map_err(db_err)?;

    Ok(Workflow {
        id: row.try_get("id").map_err(db_err)?,
        owner_id: row.try_get("owner_id").map_err(db_err)?,
        tenant_id: row.try_get("tenant_id").map_err(db_err)?,
        name: row.try_get("name").map_err(db_err)?,
        trigger_kind: trigger_kind_from_str(&trigger_kind)?,
        action_kind: row.try_get("action_kind").map_err(db_err)?,
        config: row.try_get("config").map_err(db_err)?,
        chain,
        parameters,
        is_active: row.try_get("is_active").map_err(db_err)?,
        last_triggered_at: row.try_get("last_triggered_at").map_err(db_err)?,
        interval_seconds: row.try_get("interval_seconds").map_err(db_err)?,
        execution_timeout_seconds: row
            .try_get::<Option<i64>, _>("execution_timeout_seconds")
            .map_err(db_err)?
            .map(|v| v as u64),
        created_at: row.try_get("created_at").map_err(db_err)?,
    })
}

fn db_err(e: sqlx::Error) -> StoreError {
    StoreError::Database(e.to_string())
}

#[async_trait]
impl Storage for PostgresStorage {
    #[instrument(skip(self, cancel))]
    async fn get_workflow(
        &self,
        cancel: &CancellationToken,
        id: Uuid,
    ) -> Result<Workflow, StoreError> {
        check_cancelled(cancel)?;
        let row = sqlx::query("SELECT * FROM workflows WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                error!("get_workflow failed: {}", e);
                db_err(e)
            })?
            .ok_or(StoreError::NotFound(id))?;
        row_to_workflow(&row)
    }

    async fn list_active_scheduled(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<Workflow>, StoreError> {
        check_cancelled(cancel)?;
        let rows = sqlx::query(
            "SELECT * FROM workflows WHERE trigger_kind = 'schedule' AND is_active = true ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter().map(row_to_workflow).collect()
    }

    async fn create_workflow(
        &self,
        cancel: &CancellationToken,
        workflow: Workflow,
    ) -> Result<(), StoreError> {
        check_cancelled(cancel)?;
        let chain = serde_json::to_value(&workflow.chain)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let parameters = serde_json::to_value(&workflow.parameters)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO workflows
                (id, owner_id, tenant_id, name, trigger_kind, action_kind, config, chain,
                 parameters, is_active, last_triggered_at, interval_seconds,
                 execution_timeout_seconds, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(workflow.id)
        .bind(&workflow.owner_id)
        .bind(&workflow.tenant_id)
        .bind(&workflow.name)
        .bind(trigger_kind_to_str(workflow.trigger_kind))
        .bind(&workflow.action_kind)
        .bind(&workflow.config)
        .bind(chain)
        .bind(parameters)
        .bind(workflow.is_active)
        .bind(workflow.last_triggered_at)
        .bind(workflow.interval_seconds)
        .bind(workflow.execution_timeout_seconds.map(|v| v as i64))
        .bind(workflow.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        debug!(workflow_id = %workflow.id, "created workflow");
        Ok(())
    }

    async fn update_workflow(
        &self,
        cancel: &CancellationToken,
        workflow: Workflow,
    ) -> Result<(), StoreError> {
        check_cancelled(cancel)?;
        let chain = serde_json::to_value(&workflow.chain)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let parameters = serde_json::to_value(&workflow.parameters)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        let result = sqlx::query(
            r#"
            UPDATE workflows SET
                owner_id = $2, tenant_id = $3, name = $4, trigger_kind = $5, action_kind = $6,
                config = $7, chain = $8, parameters = $9, is_active = $10,
                last_triggered_at = $11, interval_seconds = $12, execution_timeout_seconds = $13
            WHERE id = $1
            "#,
        )
        .bind(workflow.id)
        .bind(&workflow.owner_id)
        .bind(&workflow.tenant_id)
        .bind(&workflow.name)
        .bind(trigger_kind_to_str(workflow.trigger_kind))
        .bind(&workflow.action_kind)
        .bind(&workflow.config)
        .bind(chain)
        .bind(parameters)
        .bind(workflow.is_active)
        .bind(workflow.last_triggered_at)
        .bind(workflow.interval_seconds)
        .bind(workflow.execution_timeout_seconds.map(|v| v as i64))
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(workflow.id));
        }
        Ok(())
    }

    async fn delete_workflow(
        &self,
        cancel: &CancellationToken,
        id: Uuid,
    ) -> Result<(), StoreError> {
        check_cancelled(cancel)?;
        let result = sqlx::query("DELETE FROM workflows WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    async fn set_last_triggered(
        &self,
        cancel: &CancellationToken,
        id: Uuid,
        timestamp: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        check_cancelled(cancel)?;
        let result = sqlx::query("UPDATE workflows SET last_triggered_at = $2 WHERE id = $1")
            .bind(id)
            .bind(timestamp)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    async fn get_credential(
        &self,
        cancel: &CancellationToken,
        owner_id: &str,
        service_name: &str,
    ) -> Result<Credential, StoreError> {
        check_cancelled(cancel)?;
        let row = sqlx::query(
            "SELECT owner_id, service_name, secret_bundle FROM credentials WHERE owner_id = $1 AND service_name = $2",
        )
        .bind(owner_id)
        .bind(service_name)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .ok_or_else(|| StoreError::CredentialNotFound {
            owner_id: owner_id.to_string(),
            service_name: service_name.to_string(),
        })?;

        Ok(Credential {
            owner_id: row.try_get("owner_id").map_err(db_err)?,
            service_name: row.try_get("service_name").map_err(db_err)?,
            secret_bundle: row.try_get("secret_bundle").map_err(db_err)?,
        })
    }

    async fn append_log(
        &self,
        cancel: &CancellationToken,
        log: ExecutionLog,
    ) -> Result<(), StoreError> {
        check_cancelled(cancel)?;
        sqlx::query(
            r#"
            INSERT INTO execution_logs
                (id, workflow_id, status, message, detail, started_at, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(log.id)
        .bind(log.workflow_id)
        .bind(status_to_str(log.status))
        .bind(&log.message)
        .bind(&log.detail)
        .bind(log.started_at)
        .bind(log.completed_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }
}
