//! `echo` connector: returns its resolved config verbatim as `data`.
//!
//! The simplest possible connector; useful as a smoke test and as the
//! primary action in minimal workflows.

use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::{cancelled, success, Connector};
use crate::model::{ConnectorResult, Credential};

pub struct EchoConnector;

#[async_trait]
impl Connector for EchoConnector {
    fn action_kind(&self) -> &str {
        "echo"
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
            return cancelled(started, "cancelled before echo ran");
        }
        success(started, "echoed config", config.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ConnectorStatus;
    use serde_json::json;

    #[tokio::test]
    async fn echoes_config_back_as_data() {
        let connector = EchoConnector;
        let cfg = json!({"msg": "hi ada"});
        let result = connector
            .invoke(CancellationToken::new(), &cfg, None, &Value::Null)
            .await;
        assert_eq!(result.status, ConnectorStatus::Success);
        assert_eq!(result.data, cfg);
    }

    #[tokio::test]
    async fn respects_pre_cancelled_token() {
        let connector = EchoConnector;
        let token = CancellationToken::new();
        token.cancel();
        let result = connector
            .invoke(token, &json!({}), None, &Value::Null)
            .await;
        assert_eq!(result.status, ConnectorStatus::Cancelled);
    }
}
