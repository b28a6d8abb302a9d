//! End-to-end scenarios from the execution-core testable-properties list,
//! run against `InMemoryStorage` and the reference connectors.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use flowcore::prelude::*;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

fn workflow(action_kind: &str, config: Value) -> Workflow {
    Workflow {
        id: Uuid::now_v7(),
        owner_id: "owner-1".into(),
        tenant_id: "tenant-1".into(),
        name: "scenario".into(),
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

fn payload(input: Value) -> TriggerPayload {
    TriggerPayload {
        parameters: Default::default(),
        input,
    }
}

/// Always fails with a fixed message, modeling a webhook returning 401.
struct AlwaysFailConnector;

#[async_trait]
impl Connector for AlwaysFailConnector {
    fn action_kind(&self) -> &str {
        "always_fail"
    }

    async fn invoke(
        &self,
        _cancel: CancellationToken,
        _config: &Value,
        _credential: Option<&Credential>,
        _input: &Value,
    ) -> ConnectorResult {
        ConnectorResult {
            status: ConnectorStatus::Failed,
            message: "webhook 401".into(),
            data: Value::Null,
            duration_ms: 0,
        }
    }
}

/// Succeeds, then trips the cancellation token it was handed as a side
/// effect — models an external shutdown signal landing between two chain
/// steps.
struct CancelAfterSuccessConnector;

#[async_trait]
impl Connector for CancelAfterSuccessConnector {
    fn action_kind(&self) -> &str {
        "cancel_after_success"
    }

    async fn invoke(
        &self,
        cancel: CancellationToken,
        _config: &Value,
        _credential: Option<&Credential>,
        _input: &Value,
    ) -> ConnectorResult {
        let started = Instant::now();
        cancel.cancel();
        ConnectorResult {
            status: ConnectorStatus::Success,
            message: "ran before cancellation landed".into(),
            data: json!({}),
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }
}

#[tokio::test]
async fn scenario_1_webhook_one_action_success() {
    let storage = Arc::new(InMemoryStorage::new());
    let executor = Executor::new(storage, ConnectorRegistry::with_builtins());

    let wf = workflow("echo", json!({"msg": "hi {{input.name}}"}));
    let log = executor
        .trigger(
            CancellationToken::new(),
            wf,
            payload(json!({"name": "ada"})),
            TriggerSource::Webhook,
        )
        .await
        .unwrap();

    assert_eq!(log.status, ExecutionStatus::Success);
    assert_eq!(log.detail["primary"]["data"]["msg"], "hi ada");
    assert_eq!(log.detail["chain_count"], 0);
}

#[tokio::test]
async fn scenario_2_scheduled_chain_with_data_piping() {
    let storage = Arc::new(InMemoryStorage::new());
    let executor = Executor::new(storage, ConnectorRegistry::with_builtins());

    let mut wf = workflow("weather", json!({"city": "London"}));
    wf.trigger_kind = TriggerKind::Schedule;
    wf.interval_seconds = Some(60);
    wf.chain = vec![ChainStep {
        action_kind: "notify".into(),
        config: json!({"text": "{{name}}:{{main.temp}}"}),
        use_previous_output: true,
    }];

    let log = executor
        .trigger(
            CancellationToken::new(),
            wf,
            payload(Value::Null),
            TriggerSource::Scheduled,
        )
        .await
        .unwrap();

    assert_eq!(log.status, ExecutionStatus::Success);
    assert!(log.message.contains("Chain: 1/1"));
}

#[tokio::test]
async fn scenario_3_chain_partial_failure_still_updates_last_triggered() {
    let storage = Arc::new(InMemoryStorage::new());
    let connectors = ConnectorRegistry::builder()
        .register(Arc::new(flowcore::connectors::WeatherConnector))
        .register(Arc::new(AlwaysFailConnector))
        .build();
    let executor = Executor::new(storage.clone(), connectors);

    let mut wf = workflow("weather", json!({"city": "London"}));
    wf.chain = vec![ChainStep {
        action_kind: "always_fail".into(),
        config: json!({}),
        use_previous_output: false,
    }];
    storage
        .create_workflow(&CancellationToken::new(), wf.clone())
        .await
        .unwrap();
    storage
        .set_last_triggered(&CancellationToken::new(), wf.id, Utc::now())
        .await
        .unwrap();

    let log = executor
        .trigger(CancellationToken::new(), wf.clone(), payload(Value::Null), TriggerSource::Webhook)
        .await
        .unwrap();

    assert_eq!(log.status, ExecutionStatus::Partial);
    assert_eq!(log.detail["chain_results"][0]["status"], "failed");
    assert_eq!(log.detail["chain_results"][0]["message"], "webhook 401");

    let stored = storage
        .get_workflow(&CancellationToken::new(), wf.id)
        .await
        .unwrap();
    assert!(stored.last_triggered_at.is_some());
}

#[tokio::test]
async fn scenario_4_missing_required_parameter() {
    let storage = Arc::new(InMemoryStorage::new());
    let executor = Executor::new(storage, ConnectorRegistry::with_builtins());

    let mut wf = workflow("echo", json!({"msg": "hi"}));
    wf.parameters = vec![ParameterSpec {
        name: "user".into(),
        param_type: ParameterType::String,
        required: true,
        default: None,
        description: String::new(),
    }];

    let log = executor
        .trigger(CancellationToken::new(), wf, payload(Value::Null), TriggerSource::Webhook)
        .await
        .unwrap();

    assert_eq!(log.status, ExecutionStatus::Failed);
    assert!(log.message.contains("user"));
    assert!(log.detail.get("primary").is_none(), "connector must never be invoked");
}

#[tokio::test]
async fn scenario_5_cancellation_mid_chain() {
    let storage = Arc::new(InMemoryStorage::new());
    let connectors = ConnectorRegistry::builder()
        .register(Arc::new(flowcore::connectors::EchoConnector))
        .register(Arc::new(CancelAfterSuccessConnector))
        .build();
    let executor = Executor::new(storage, connectors);

    let mut wf = workflow("echo", json!({"msg": "primary"}));
    wf.chain = vec![
        ChainStep {
            action_kind: "cancel_after_success".into(),
            config: json!({}),
            use_previous_output: false,
        },
        ChainStep {
            action_kind: "echo".into(),
            config: json!({"msg": "never runs"}),
            use_previous_output: false,
        },
    ];

    let log = executor
        .trigger(CancellationToken::new(), wf, payload(Value::Null), TriggerSource::Webhook)
        .await
        .unwrap();

    assert_eq!(log.status, ExecutionStatus::Cancelled);
    assert_eq!(log.detail["primary"]["status"], "success");
    assert_eq!(log.detail["chain_results"][0]["status"], "success");
    assert_eq!(log.detail["chain_results"][1]["status"], "cancelled");
}

#[tokio::test]
async fn scenario_6_backpressure_matches_pool_unit_test() {
    use flowcore::pool::{Job, SubmitPolicy, WorkerPoolConfig};
    use std::time::Duration;

    let pool = WorkerPool::new(WorkerPoolConfig {
        worker_count: 2,
        queue_capacity: 3,
        submit_policy: SubmitPolicy::DropAndLog,
        ..Default::default()
    });
    pool.start().await;

    let mut rejected = 0;
    for _ in 0..10 {
        let job: Job = Box::pin(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
        });
        if pool.submit(job).await.is_err() {
            rejected += 1;
        }
    }

    assert_eq!(rejected, 5);
}

#[tokio::test]
async fn dry_run_never_persists_or_advances_schedule() {
    let storage = Arc::new(InMemoryStorage::new());
    let executor = Executor::new(storage.clone(), ConnectorRegistry::with_builtins());

    let mut wf = workflow("echo", json!({"msg": "hi"}));
    wf.trigger_kind = TriggerKind::Schedule;
    wf.interval_seconds = Some(60);
    storage
        .create_workflow(&CancellationToken::new(), wf.clone())
        .await
        .unwrap();

    let result = executor
        .dry_run(CancellationToken::new(), wf.clone(), payload(Value::Null))
        .await
        .unwrap();

    assert!(result.success);
    assert!(storage.logs().await.is_empty());
    let stored = storage
        .get_workflow(&CancellationToken::new(), wf.id)
        .await
        .unwrap();
    assert!(stored.last_triggered_at.is_none());
}
