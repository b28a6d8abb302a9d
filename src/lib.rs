//! # Workflow Execution Core
//!
//! The scheduler, worker pool, executor, and storage contract that drive
//! integration workflows: a trigger fires a primary action, optionally
//! followed by a chain of dependent actions. HTTP/API surface, credential
//! encryption, identity, individual connector bodies beyond the three
//! reference connectors, log shipping, and deployment are external
//! collaborators this crate does not provide.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌───────────┐     ┌──────────┐
//! │  Scheduler   │────▶│ WorkerPool │────▶│ Executor │
//! └─────────────┘     └───────────┘     └────┬─────┘
//!                                             │
//!                       ┌─────────────────────┼─────────────────────┐
//!                       ▼                     ▼                     ▼
//!               ConnectorRegistry      template::substitute     Storage
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use flowcore::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     lifecycle::init_tracing();
//!     let config = EngineConfig::from_env();
//!     let engine = Engine::start(config).await?;
//!     engine.run_until_signal().await
//! }
//! ```

pub mod config;
pub mod connectors;
pub mod error;
pub mod executor;
pub mod lifecycle;
pub mod model;
pub mod pool;
pub mod scheduler;
pub mod storage;
pub mod template;

/// Prelude for common imports.
pub mod prelude {
    pub use crate::config::EngineConfig;
    pub use crate::connectors::{Connector, ConnectorRegistry, CredentialRequirement};
    pub use crate::error::{FlowError, Result};
    pub use crate::executor::Executor;
    pub use crate::lifecycle::Engine;
    pub use crate::model::{
        ChainStep, ConnectorResult, ConnectorStatus, Credential, DryRunResult, ExecutionLog,
        ExecutionStatus, ParameterSpec, ParameterType, TriggerKind, TriggerPayload, TriggerSource,
        Workflow,
    };
    pub use crate::pool::{SubmitPolicy, WorkerPool, WorkerPoolConfig};
    pub use crate::scheduler::{Scheduler, SchedulerConfig};
    pub use crate::storage::{InMemoryStorage, Storage, StoreError};
}

// Re-export key types at crate root, matching the teacher's convention.
pub use config::EngineConfig;
pub use connectors::{Connector, ConnectorRegistry};
pub use error::{FlowError, Result};
pub use executor::Executor;
pub use lifecycle::Engine;
pub use model::{ExecutionLog, ExecutionStatus, TriggerPayload, Workflow};
pub use pool::{SubmitPolicy, WorkerPool, WorkerPoolConfig};
pub use scheduler::Scheduler;
pub use storage::{InMemoryStorage, Storage, StoreError};
