//! `notify` connector: delivers a `text` config field somewhere. Logs the
//! message always; if `webhook_url` is present in config, also POSTs the
//! text there. Illustrates the credential-aware, timeout-respecting shape
//! real connectors must follow.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{cancelled, failed, success, CredentialRequirement};
use crate::connectors::Connector;
use crate::model::{ConnectorResult, Credential};

pub struct NotifyConnector {
    client: reqwest::Client,
}

impl Default for NotifyConnector {
    fn default() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .expect("reqwest client builds with static config"),
        }
    }
}

#[async_trait]
impl Connector for NotifyConnector {
    fn action_kind(&self) -> &str {
        "notify"
    }

    fn credential_requirement(&self) -> CredentialRequirement {
        CredentialRequirement::None
    }

    async fn invoke(
        &self,
        cancel: CancellationToken,
        config: &Value,
        _credential: Option<&Credential>,
        _input: &Value,
    ) -> ConnectorResult {
        let started = Instant::now();
        if cancel.is_cancelled() {
            return cancelled(started, "cancelled before notify ran");
        }

        let Some(text) = config.get("text").and_then(Value::as_str) else {
            return failed(started, "missing required config key: text");
        };

        info!(notify.text = %text, "notify connector delivering message");

        let Some(url) = config.get("webhook_url").and_then(Value::as_str) else {
            return success(started, "logged notification", serde_json::json!({"text": text}));
        };

        let send = self
            .client
            .post(url)
            .json(&serde_json::json!({"text": text}));

        tokio::select! {
            _ = cancel.cancelled() => cancelled(started, "cancelled while delivering webhook"),
            result = send.send() => match result {
                Ok(resp) if resp.status().is_success() => {
                    success(started, "delivered webhook notification", serde_json::json!({"text": text}))
                }
                Ok(resp) => failed(started, format!("webhook {}", resp.status())),
                Err(e) => failed(started, format!("webhook request failed: {e}")),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ConnectorStatus;
    use serde_json::json;

    #[tokio::test]
    async fn logs_without_webhook_url() {
        let connector = NotifyConnector::default();
        let result = connector
            .invoke(
                CancellationToken::new(),
                &json!({"text": "London:15"}),
                None,
                &Value::Null,
            )
            .await;
        assert_eq!(result.status, ConnectorStatus::Success);
        assert_eq!(result.data["text"], "London:15");
    }

    #[tokio::test]
    async fn missing_text_is_failure() {
        let connector = NotifyConnector::default();
        let result = connector
            .invoke(CancellationToken::new(), &json!({}), None, &Value::Null)
            .await;
        assert_eq!(result.status, ConnectorStatus::Failed);
    }
}
