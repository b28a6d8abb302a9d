//! Persistent and materialized data model.
//!
//! `Workflow`, `ChainStep`, and `ParameterSpec` are the persistent aggregate;
//! `TriggerPayload` and `StepOutput` are materialized at dispatch time and
//! never stored directly.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// How a workflow is set off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Webhook,
    Schedule,
}

/// Declared type of a [`ParameterSpec`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterType {
    String,
    Number,
    Boolean,
    Object,
    Array,
}

/// One step in a workflow's optional follow-up chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainStep {
    pub action_kind: String,
    /// May contain `{{ dotted.path }}` template expressions.
    pub config: Value,
    pub use_previous_output: bool,
}

/// Declared input parameter for a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ParameterType,
    pub required: bool,
    pub default: Option<Value>,
    #[serde(default)]
    pub description: String,
}

/// Maximum chain length, per the data-model invariant.
pub const MAX_CHAIN_LEN: usize = 10;

/// The persistent definition of a trigger, a primary action, and an
/// optional chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: Uuid,
    pub owner_id: String,
    pub tenant_id: String,
    pub name: String,
    pub trigger_kind: TriggerKind,
    pub action_kind: String,
    pub config: Value,
    #[serde(default)]
    pub chain: Vec<ChainStep>,
    #[serde(default)]
    pub parameters: Vec<ParameterSpec>,
    pub is_active: bool,
    pub last_triggered_at: Option<DateTime<Utc>>,
    /// Required iff `trigger_kind == Schedule`; must be >= 60.
    pub interval_seconds: Option<i64>,
    /// Per-workflow override of the default 30s connector timeout.
    pub execution_timeout_seconds: Option<u64>,
    pub created_at: DateTime<Utc>,
}

impl Workflow {
    /// Whether this workflow is due given `now`, per spec.md §4.2 step 2.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.last_triggered_at {
            Some(last) => match self.interval_seconds {
                Some(secs) => now >= last + chrono::Duration::seconds(secs),
                None => false,
            },
            // `last_triggered_at` null => due = -infinity, always due.
            None => true,
        }
    }
}

/// A decrypted credential bundle, keyed by `(owner_id, service_name)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub owner_id: String,
    pub service_name: String,
    pub secret_bundle: Value,
}

/// Terminal status of one completed trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    Failed,
    Cancelled,
    Partial,
}

/// One append-only row in the durable execution log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionLog {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub status: ExecutionStatus,
    pub message: String,
    pub detail: Value,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

/// Where a trigger originated, carried on [`TriggerPayload`] metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
    Webhook,
    Scheduled,
}

/// External payload supplied to a `Trigger`/`DryRun` call: resolved
/// parameters plus whatever the caller attached (webhook body, or
/// `{scheduled_at: now}` from the scheduler).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TriggerPayload {
    #[serde(default)]
    pub parameters: HashMap<String, Value>,
    #[serde(default)]
    pub input: Value,
}

/// Result returned by a single connector invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorResult {
    pub status: ConnectorStatus,
    pub message: String,
    pub data: Value,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectorStatus {
    Success,
    Failed,
    Cancelled,
}

/// Output of a `DryRun` call: never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DryRunResult {
    pub success: bool,
    pub message: String,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
    pub data: Value,
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_workflow() -> Workflow {
        Workflow {
            id: Uuid::now_v7(),
            owner_id: "owner-1".into(),
            tenant_id: "tenant-1".into(),
            name: "test".into(),
            trigger_kind: TriggerKind::Schedule,
            action_kind: "echo".into(),
            config: serde_json::json!({}),
            chain: vec![],
            parameters: vec![],
            is_active: true,
            last_triggered_at: None,
            interval_seconds: Some(60),
            execution_timeout_seconds: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn due_when_never_triggered() {
        let wf = base_workflow();
        assert!(wf.is_due(Utc::now()));
    }

    #[test]
    fn not_due_before_interval_elapses() {
        let mut wf = base_workflow();
        wf.last_triggered_at = Some(Utc::now());
        assert!(!wf.is_due(Utc::now()));
    }

    #[test]
    fn due_after_interval_elapses() {
        let mut wf = base_workflow();
        wf.last_triggered_at = Some(Utc::now() - chrono::Duration::seconds(61));
        assert!(wf.is_due(Utc::now()));
    }
}
