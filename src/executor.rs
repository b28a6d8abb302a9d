//! Stateless driver that runs one workflow trigger end to end: parameter
//! materialization, template substitution, the primary action, the chain,
//! and a single aggregate [`ExecutionLog`].

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::FutureExt;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::connectors::{CredentialRequirement, ConnectorRegistry};
use crate::error::{FlowError, Result};
use crate::model::{
    ChainStep, ConnectorResult, ConnectorStatus, Credential, DryRunResult, ExecutionLog,
    ExecutionStatus, ParameterSpec, ParameterType, TriggerPayload, TriggerSource, Workflow,
};
use crate::storage::Storage;

const DEFAULT_EXECUTION_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Trigger,
    DryRun,
}

impl Mode {
    fn as_str(self) -> &'static str {
        match self {
            Mode::Trigger => "trigger",
            Mode::DryRun => "dry_run",
        }
    }
}

/// Drives single-trigger execution. Stateless aside from its storage and
/// connector registry handles; safe to share across many concurrent
/// triggers.
#[derive(Clone)]
pub struct Executor {
    storage: Arc<dyn Storage>,
    connectors: ConnectorRegistry,
    default_timeout: Duration,
}

impl Executor {
    pub fn new(storage: Arc<dyn Storage>, connectors: ConnectorRegistry) -> Self {
        Self {
            storage,
            connectors,
            default_timeout: DEFAULT_EXECUTION_TIMEOUT,
        }
    }

    /// Override the `execution_timeout_seconds` fallback used for
    /// workflows that don't set their own per-workflow override. Used to
    /// thread the `EngineConfig`-recognized `execution_timeout_seconds`
    /// option through from the lifecycle controller.
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Run `workflow` to completion, append the resulting log, and return
    /// it. Recovers panics anywhere inside, turning them into a `failed`
    /// log entry identifying the phase that panicked.
    #[instrument(skip(self, cancel, workflow, payload), fields(workflow_id = %workflow.id, trace_id))]
    pub async fn trigger(
        &self,
        cancel: CancellationToken,
        workflow: Workflow,
        payload: TriggerPayload,
        source: TriggerSource,
    ) -> Result<ExecutionLog> {
        let trace_id = Uuid::now_v7();
        tracing::Span::current().record("trace_id", trace_id.to_string());

        let owner_id = workflow.owner_id.clone();
        let tenant_id = workflow.tenant_id.clone();
        let workflow_id = workflow.id;
        let started_at = Utc::now();
        let start = Instant::now();

        let run = AssertUnwindSafe(self.run(cancel, &workflow, &payload, source, Mode::Trigger))
            .catch_unwind()
            .await;

        let (status, message, detail) = match run {
            Ok(outcome) => outcome,
            Err(panic) => {
                let phase = panic_phase(&panic);
                error!(%workflow_id, phase, "trigger panicked; recording failed log");
                (
                    ExecutionStatus::Failed,
                    format!("internal error during {phase}"),
                    json!({ "panic_phase": phase }),
                )
            }
        };

        let log = ExecutionLog {
            id: Uuid::now_v7(),
            workflow_id,
            status,
            message,
            detail,
            started_at,
            completed_at: Utc::now(),
        };

        if let Err(e) = self
            .storage
            .append_log(&CancellationToken::new(), log.clone())
            .await
        {
            // The side effects have already happened; this is a fallback
            // record, not a surfaced error.
            error!(%workflow_id, error = %e, "failed to persist execution log");
        }

        info!(
            %workflow_id,
            %owner_id,
            %tenant_id,
            status = ?log.status,
            duration_ms = start.elapsed().as_millis() as u64,
            mode = Mode::Trigger.as_str(),
            %trace_id,
            "trigger completed"
        );

        Ok(log)
    }

    /// Like `trigger`, but synchronous to the caller, never persists
    /// anything, and never advances `last_triggered_at`.
    #[instrument(skip(self, cancel, workflow, payload), fields(workflow_id = %workflow.id, trace_id))]
    pub async fn dry_run(
        &self,
        cancel: CancellationToken,
        workflow: Workflow,
        payload: TriggerPayload,
    ) -> Result<DryRunResult> {
        let trace_id = Uuid::now_v7();
        tracing::Span::current().record("trace_id", trace_id.to_string());

        let owner_id = workflow.owner_id.clone();
        let tenant_id = workflow.tenant_id.clone();
        let workflow_id = workflow.id;
        let started = Instant::now();
        let timestamp = Utc::now();

        let run = AssertUnwindSafe(self.run(
            cancel,
            &workflow,
            &payload,
            TriggerSource::Webhook,
            Mode::DryRun,
        ))
        .catch_unwind()
        .await;

        let (status, message, detail) = match run {
            Ok(outcome) => outcome,
            Err(panic) => {
                let phase = panic_phase(&panic);
                (
                    ExecutionStatus::Failed,
                    format!("internal error during {phase}"),
                    json!({ "panic_phase": phase }),
                )
            }
        };

        let success = status == ExecutionStatus::Success;
        let duration_ms = started.elapsed().as_millis() as u64;

        info!(
            %workflow_id,
            %owner_id,
            %tenant_id,
            status = ?status,
            duration_ms,
            mode = Mode::DryRun.as_str(),
            %trace_id,
            "dry run completed"
        );

        Ok(DryRunResult {
            success,
            message: message.clone(),
            duration_ms,
            timestamp,
            data: detail,
            error: if success { String::new() } else { message },
        })
    }

    /// The shared execution algorithm behind `trigger` and `dry_run`.
    /// Returns `(status, message, detail)`.
    async fn run(
        &self,
        cancel: CancellationToken,
        workflow: &Workflow,
        payload: &TriggerPayload,
        source: TriggerSource,
        mode: Mode,
    ) -> (ExecutionStatus, String, Value) {
        // 1. Parameter materialization.
        let params = match resolve_parameters(&workflow.parameters, &payload.parameters) {
            Ok(params) => params,
            Err(FlowError::MissingParameter(name)) => {
                return (
                    ExecutionStatus::Failed,
                    format!("missing required parameter: {name}"),
                    json!({ "phase": "parameters" }),
                );
            }
            Err(e) => {
                return (
                    ExecutionStatus::Failed,
                    e.to_string(),
                    json!({ "phase": "parameters" }),
                )
            }
        };

        // 2. Trigger document assembly.
        let trigger_doc = json!({
            "runtime": {
                "params": params,
                "workflow_id": workflow.id,
                "triggered_at": Utc::now().to_rfc3339(),
                "source": match source {
                    TriggerSource::Webhook => "webhook",
                    TriggerSource::Scheduled => "scheduled",
                },
            },
            "input": payload.input,
        });

        let timeout = workflow
            .execution_timeout_seconds
            .map(Duration::from_secs)
            .unwrap_or(self.default_timeout);

        if cancel.is_cancelled() {
            return (
                ExecutionStatus::Cancelled,
                "cancelled before primary action".to_string(),
                json!({ "phase": "primary", "chain_count": workflow.chain.len() }),
            );
        }

        // 3-5. Template substitution, credential lookup, primary invocation.
        let primary = self
            .invoke(
                &cancel,
                timeout,
                &workflow.action_kind,
                &workflow.config,
                &trigger_doc,
                &workflow.owner_id,
                mode,
            )
            .await;

        let primary_result = match primary {
            Ok(result) => result,
            Err(e) => {
                return (
                    ExecutionStatus::Failed,
                    e.to_string(),
                    json!({ "phase": "primary", "chain_count": workflow.chain.len() }),
                )
            }
        };

        if primary_result.status == ConnectorStatus::Cancelled {
            return (
                ExecutionStatus::Cancelled,
                "cancelled during primary action".to_string(),
                json!({
                    "primary": primary_result,
                    "chain_count": workflow.chain.len(),
                }),
            );
        }

        let primary_failed = primary_result.status == ConnectorStatus::Failed;

        // 6. Chain execution. `previous_output` tracks the immediately
        // preceding step's data (starting as the primary's), so a step with
        // `use_previous_output` pipes from the step before it, not always
        // the primary.
        let mut chain_results = Vec::with_capacity(workflow.chain.len());
        let mut chain_succeeded = 0usize;
        let mut chain_cancelled = false;
        let mut previous_output = primary_result.data.clone();

        for (index, step) in workflow.chain.iter().enumerate() {
            if cancel.is_cancelled() {
                chain_cancelled = true;
                chain_results.push(json!({
                    "index": index,
                    "action_kind": step.action_kind,
                    "status": "cancelled",
                    "message": "cancelled before step ran",
                }));
                continue;
            }

            let root = if step.use_previous_output {
                &previous_output
            } else {
                &trigger_doc
            };

            let step_result = self
                .invoke(
                    &cancel,
                    timeout,
                    &step.action_kind,
                    &step.config,
                    root,
                    &workflow.owner_id,
                    mode,
                )
                .await;

            let step_result = match step_result {
                Ok(result) => result,
                Err(e) => ConnectorResult {
                    status: ConnectorStatus::Failed,
                    message: e.to_string(),
                    data: Value::Null,
                    duration_ms: 0,
                },
            };

            match step_result.status {
                ConnectorStatus::Success => chain_succeeded += 1,
                ConnectorStatus::Cancelled => chain_cancelled = true,
                ConnectorStatus::Failed => {}
            }

            chain_results.push(json!({
                "index": index,
                "action_kind": step.action_kind,
                "status": step_result.status,
                "message": step_result.message,
                "duration_ms": step_result.duration_ms,
            }));

            previous_output = step_result.data;
        }

        let chain_total = workflow.chain.len();
        let detail = json!({
            "primary": primary_result,
            "chain_results": chain_results,
            "chain_count": chain_total,
        });

        // 7. Aggregate outcome.
        let status = if chain_cancelled {
            ExecutionStatus::Cancelled
        } else if primary_failed {
            ExecutionStatus::Failed
        } else if chain_succeeded < chain_total {
            ExecutionStatus::Partial
        } else {
            ExecutionStatus::Success
        };

        let message = format!(
            "{}. Chain: {}/{}",
            match status {
                ExecutionStatus::Success => "primary action succeeded",
                ExecutionStatus::Failed => "primary action failed",
                ExecutionStatus::Cancelled => "execution cancelled",
                ExecutionStatus::Partial => "primary succeeded, chain partially failed",
            },
            chain_succeeded,
            chain_total,
        );

        (status, message, detail)
    }

    /// Resolve template + credential, then invoke a single connector under
    /// the per-step timeout.
    async fn invoke(
        &self,
        cancel: &CancellationToken,
        timeout: Duration,
        action_kind: &str,
        raw_config: &Value,
        template_root: &Value,
        owner_id: &str,
        mode: Mode,
    ) -> Result<ConnectorResult> {
        let connector = self
            .connectors
            .get(action_kind)
            .ok_or_else(|| FlowError::UnknownAction(action_kind.to_string()))?;

        let stringified =
            serde_json::to_string(raw_config).map_err(|e| FlowError::Other(e.into()))?;
        let substituted = crate::template::substitute(&stringified, template_root);
        let effective_config: Value = serde_json::from_str(&substituted)
            .map_err(|e| FlowError::Other(anyhow::anyhow!("invalid config after substitution: {e}")))?;

        let credential = match connector.credential_requirement() {
            CredentialRequirement::None => None,
            CredentialRequirement::Required { service_name } => {
                let cred = self
                    .storage
                    .get_credential(cancel, owner_id, &service_name)
                    .await
                    .map_err(|_| FlowError::MissingCredential(service_name.clone()))?;
                Some(cred)
            }
        };

        let fut = connector.invoke(
            cancel.clone(),
            &effective_config,
            credential.as_ref(),
            template_root,
        );

        match tokio::time::timeout(timeout, fut).await {
            Ok(result) => {
                if mode == Mode::DryRun {
                    tracing::debug!(action_kind, "dry-run invocation complete");
                }
                Ok(result)
            }
            Err(_) => {
                warn!(action_kind, "connector invocation timed out");
                Ok(ConnectorResult {
                    status: ConnectorStatus::Failed,
                    message: format!("{action_kind} timed out after {timeout:?}"),
                    data: Value::Null,
                    duration_ms: timeout.as_millis() as u64,
                })
            }
        }
    }
}

fn panic_phase(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown".to_string()
    }
}

/// Resolve declared parameters against a supplied map, applying defaults
/// and strict type coercion.
fn resolve_parameters(
    specs: &[ParameterSpec],
    supplied: &std::collections::HashMap<String, Value>,
) -> Result<std::collections::HashMap<String, Value>> {
    let mut resolved = std::collections::HashMap::with_capacity(specs.len());
    for spec in specs {
        let value = match supplied.get(&spec.name) {
            Some(Value::Null) | None => {
                if let Some(default) = &spec.default {
                    default.clone()
                } else if spec.required {
                    return Err(FlowError::MissingParameter(spec.name.clone()));
                } else {
                    continue;
                }
            }
            Some(value) => value.clone(),
        };
        resolved.insert(spec.name.clone(), coerce(&spec.param_type, value)?);
    }
    Ok(resolved)
}

/// Strict coercion: no implicit number<->string conversion; booleans accept
/// only literal `true`/`false`; objects/arrays pass through unchanged.
fn coerce(param_type: &ParameterType, value: Value) -> Result<Value> {
    let ok = match (param_type, &value) {
        (ParameterType::String, Value::String(_)) => true,
        (ParameterType::Number, Value::Number(_)) => true,
        (ParameterType::Boolean, Value::Bool(_)) => true,
        (ParameterType::Object, Value::Object(_)) => true,
        (ParameterType::Array, Value::Array(_)) => true,
        _ => false,
    };
    if ok {
        Ok(value)
    } else {
        Err(FlowError::Other(anyhow::anyhow!(
            "parameter type mismatch: expected {:?}, got {value}",
            param_type
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectors::Connector;
    use crate::model::{ChainStep, TriggerKind};
    use crate::storage::InMemoryStorage;
    use std::collections::HashMap;

    fn base_workflow(action_kind: &str, config: Value) -> Workflow {
        Workflow {
            id: Uuid::now_v7(),
            owner_id: "owner-1".into(),
            tenant_id: "tenant-1".into(),
            name: "wf".into(),
            trigger_kind: TriggerKind::Webhook,
            action_kind: action_kind.into(),
            config,
            chain: vec![],
            parameters: vec![],
            is_active: true,
            last_triggered_at: None,
            interval_seconds: None,
            execution_timeout_seconds: None,
            created_at: Utc::now(),
        }
    }

    fn executor() -> Executor {
        Executor::new(
            Arc::new(InMemoryStorage::new()),
            ConnectorRegistry::with_builtins(),
        )
    }

    #[tokio::test]
    async fn webhook_one_action_success() {
        let exec = executor();
        let workflow = base_workflow("echo", json!({"msg": "hi {{input.name}}"}));
        let mut payload = TriggerPayload::default();
        payload.input = json!({"name": "ada"});

        let log = exec
            .trigger(CancellationToken::new(), workflow, payload, TriggerSource::Webhook)
            .await
            .unwrap();

        assert_eq!(log.status, ExecutionStatus::Success);
        assert_eq!(log.detail["primary"]["data"]["msg"], "hi ada");
        assert_eq!(log.detail["chain_count"], 0);
    }

    #[tokio::test]
    async fn scheduled_chain_with_data_piping() {
        let exec = executor();
        let mut workflow = base_workflow("weather", json!({"city": "London"}));
        workflow.chain = vec![ChainStep {
            action_kind: "notify".into(),
            config: json!({"text": "{{name}}:{{main.temp}}"}),
            use_previous_output: true,
        }];

        let log = exec
            .trigger(
                CancellationToken::new(),
                workflow,
                TriggerPayload::default(),
                TriggerSource::Scheduled,
            )
            .await
            .unwrap();

        assert_eq!(log.status, ExecutionStatus::Success);
        assert!(log.message.contains("Chain: 1/1"));
    }

    /// Records the template root it was invoked with, so a test can assert
    /// which step's output actually reached a later chain step.
    struct CaptureRootConnector {
        seen: Arc<tokio::sync::Mutex<Vec<Value>>>,
    }

    #[async_trait::async_trait]
    impl Connector for CaptureRootConnector {
        fn action_kind(&self) -> &str {
            "capture_root"
        }

        async fn invoke(
            &self,
            _cancel: CancellationToken,
            _config: &Value,
            _credential: Option<&Credential>,
            input: &Value,
        ) -> ConnectorResult {
            self.seen.lock().await.push(input.clone());
            ConnectorResult {
                status: ConnectorStatus::Success,
                message: "captured".into(),
                data: json!({"captured": true}),
                duration_ms: 0,
            }
        }
    }

    #[tokio::test]
    async fn chain_step_pipes_from_preceding_step_not_primary() {
        let seen = Arc::new(tokio::sync::Mutex::new(Vec::new()));
        let connectors = ConnectorRegistry::builder()
            .register(Arc::new(crate::connectors::EchoConnector))
            .register(Arc::new(CaptureRootConnector { seen: seen.clone() }))
            .build();
        let exec = Executor::new(Arc::new(InMemoryStorage::new()), connectors);

        let mut workflow = base_workflow("echo", json!({"msg": "primary"}));
        workflow.chain = vec![
            ChainStep {
                action_kind: "echo".into(),
                config: json!({"msg": "step0"}),
                use_previous_output: false,
            },
            ChainStep {
                action_kind: "capture_root".into(),
                config: json!({}),
                use_previous_output: true,
            },
        ];

        let log = exec
            .trigger(
                CancellationToken::new(),
                workflow,
                TriggerPayload::default(),
                TriggerSource::Webhook,
            )
            .await
            .unwrap();

        assert_eq!(log.status, ExecutionStatus::Success);
        let captured = seen.lock().await;
        assert_eq!(captured.len(), 1);
        // Must see step 0's output ("step0"), never the primary's ("primary").
        assert_eq!(captured[0], json!({"msg": "step0"}));
    }

    struct SleepConnector {
        delay: Duration,
    }

    #[async_trait::async_trait]
    impl Connector for SleepConnector {
        fn action_kind(&self) -> &str {
            "sleep"
        }

        async fn invoke(
            &self,
            _cancel: CancellationToken,
            _config: &Value,
            _credential: Option<&Credential>,
            _input: &Value,
        ) -> ConnectorResult {
            tokio::time::sleep(self.delay).await;
            ConnectorResult {
                status: ConnectorStatus::Success,
                message: "woke up".into(),
                data: json!({}),
                duration_ms: self.delay.as_millis() as u64,
            }
        }
    }

    #[tokio::test]
    async fn configured_default_timeout_is_honored() {
        let connectors = ConnectorRegistry::builder()
            .register(Arc::new(SleepConnector {
                delay: Duration::from_millis(100),
            }))
            .build();
        let exec = Executor::new(Arc::new(InMemoryStorage::new()), connectors)
            .with_default_timeout(Duration::from_millis(20));
        let workflow = base_workflow("sleep", json!({}));

        let log = exec
            .trigger(
                CancellationToken::new(),
                workflow,
                TriggerPayload::default(),
                TriggerSource::Webhook,
            )
            .await
            .unwrap();

        // Without the configured override this would fall back to the 30s
        // built-in default and the sleep would succeed well within it.
        assert_eq!(log.status, ExecutionStatus::Failed);
        assert!(log.detail["primary"]["message"]
            .as_str()
            .unwrap()
            .contains("timed out"));
    }

    #[tokio::test]
    async fn chain_partial_failure_is_reported() {
        let exec = executor();
        let mut workflow = base_workflow("echo", json!({"msg": "ok"}));
        workflow.chain = vec![ChainStep {
            action_kind: "weather".into(),
            config: json!({}), // missing `city` => connector reports failed
            use_previous_output: false,
        }];

        let log = exec
            .trigger(
                CancellationToken::new(),
                workflow,
                TriggerPayload::default(),
                TriggerSource::Webhook,
            )
            .await
            .unwrap();

        assert_eq!(log.status, ExecutionStatus::Partial);
    }

    #[tokio::test]
    async fn missing_required_parameter_fails_before_invocation() {
        let exec = executor();
        let mut workflow = base_workflow("echo", json!({}));
        workflow.parameters = vec![ParameterSpec {
            name: "user".into(),
            param_type: ParameterType::String,
            required: true,
            default: None,
            description: String::new(),
        }];

        let log = exec
            .trigger(
                CancellationToken::new(),
                workflow,
                TriggerPayload::default(),
                TriggerSource::Webhook,
            )
            .await
            .unwrap();

        assert_eq!(log.status, ExecutionStatus::Failed);
        assert!(log.message.contains("user"));
    }

    #[tokio::test]
    async fn parameter_default_matches_explicit_value() {
        let spec = vec![ParameterSpec {
            name: "p".into(),
            param_type: ParameterType::String,
            required: true,
            default: Some(json!("fallback")),
            description: String::new(),
        }];

        let omitted = resolve_parameters(&spec, &HashMap::new()).unwrap();
        let mut supplied = HashMap::new();
        supplied.insert("p".to_string(), json!("fallback"));
        let explicit = resolve_parameters(&spec, &supplied).unwrap();

        assert_eq!(omitted, explicit);
    }

    #[tokio::test]
    async fn cancellation_before_primary_yields_cancelled_and_no_invocation() {
        let exec = executor();
        let workflow = base_workflow("echo", json!({}));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let log = exec
            .trigger(cancel, workflow, TriggerPayload::default(), TriggerSource::Webhook)
            .await
            .unwrap();

        assert_eq!(log.status, ExecutionStatus::Cancelled);
        assert!(log.detail.get("primary").is_none());
    }

    #[tokio::test]
    async fn dry_run_never_appends_to_the_log() {
        let storage = Arc::new(InMemoryStorage::new());
        let exec = Executor::new(storage.clone(), ConnectorRegistry::with_builtins());
        let workflow = base_workflow("echo", json!({"msg": "hi"}));

        let result = exec
            .dry_run(CancellationToken::new(), workflow, TriggerPayload::default())
            .await
            .unwrap();

        assert!(result.success);
        assert!(storage.logs().await.is_empty());
    }

    #[tokio::test]
    async fn unknown_action_kind_is_a_failed_log_not_a_panic() {
        let exec = executor();
        let workflow = base_workflow("nonexistent", json!({}));

        let log = exec
            .trigger(
                CancellationToken::new(),
                workflow,
                TriggerPayload::default(),
                TriggerSource::Webhook,
            )
            .await
            .unwrap();

        assert_eq!(log.status, ExecutionStatus::Failed);
    }
}
