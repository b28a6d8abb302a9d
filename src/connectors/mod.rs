//! Connector contract and registry.
//!
//! A connector is a registered, stateless function keyed by `action_kind`.
//! Connectors never panic for ordinary failures (missing config, transport
//! errors) — those are reported as `ConnectorStatus::Failed` values.

mod echo;
mod notify;
mod weather;

pub use echo::EchoConnector;
pub use notify::NotifyConnector;
pub use weather::WeatherConnector;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::model::{ConnectorResult, ConnectorStatus, Credential};

/// Whether a connector needs a credential, and if so for which service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialRequirement {
    None,
    Required { service_name: String },
}

/// A single external interaction, keyed by `action_kind`.
#[async_trait]
pub trait Connector: Send + Sync {
    /// The name this connector is registered under.
    fn action_kind(&self) -> &str;

    /// Whether this connector needs a credential and for which service.
    fn credential_requirement(&self) -> CredentialRequirement {
        CredentialRequirement::None
    }

    /// Invoke the connector. Must honor `cancel` for any blocking work and
    /// must never mutate `config`, `credential`, or `input`.
    async fn invoke(
        &self,
        cancel: CancellationToken,
        config: &Value,
        credential: Option<&Credential>,
        input: &Value,
    ) -> ConnectorResult;
}

/// Helper for connectors to build a timed, successful result.
pub fn success(started: Instant, message: impl Into<String>, data: Value) -> ConnectorResult {
    ConnectorResult {
        status: ConnectorStatus::Success,
        message: message.into(),
        data,
        duration_ms: started.elapsed().as_millis() as u64,
    }
}

/// Helper for connectors to build a timed, failed result. Never panics;
/// this is how connectors report ordinary failures.
pub fn failed(started: Instant, message: impl Into<String>) -> ConnectorResult {
    ConnectorResult {
        status: ConnectorStatus::Failed,
        message: message.into(),
        data: Value::Null,
        duration_ms: started.elapsed().as_millis() as u64,
    }
}

/// Helper for connectors to report cancellation.
pub fn cancelled(started: Instant, message: impl Into<String>) -> ConnectorResult {
    ConnectorResult {
        status: ConnectorStatus::Cancelled,
        message: message.into(),
        data: Value::Null,
        duration_ms: started.elapsed().as_millis() as u64,
    }
}

/// Immutable, constructed-once-at-startup registry of connectors.
#[derive(Clone, Default)]
pub struct ConnectorRegistry {
    connectors: Arc<HashMap<String, Arc<dyn Connector>>>,
}

impl ConnectorRegistry {
    pub fn builder() -> ConnectorRegistryBuilder {
        ConnectorRegistryBuilder::default()
    }

    /// The default registry: the three reference connectors.
    pub fn with_builtins() -> Self {
        Self::builder()
            .register(Arc::new(EchoConnector))
            .register(Arc::new(WeatherConnector))
            .register(Arc::new(NotifyConnector::default()))
            .build()
    }

    pub fn get(&self, action_kind: &str) -> Option<Arc<dyn Connector>> {
        self.connectors.get(action_kind).cloned()
    }

    pub fn contains(&self, action_kind: &str) -> bool {
        self.connectors.contains_key(action_kind)
    }
}

#[derive(Default)]
pub struct ConnectorRegistryBuilder {
    connectors: HashMap<String, Arc<dyn Connector>>,
}

impl ConnectorRegistryBuilder {
    pub fn register(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connectors
            .insert(connector.action_kind().to_string(), connector);
        self
    }

    pub fn build(self) -> ConnectorRegistry {
        ConnectorRegistry {
            connectors: Arc::new(self.connectors),
        }
    }
}
