//! Container runtime seam.
//!
//! The lifecycle manager only talks to [`ContainerRuntime`]; the production
//! implementation shells out to the docker CLI (see `docker.rs`) and tests
//! substitute an in-memory fake.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: i32,
        stderr: String,
    },

    #[error("unexpected runtime output: {0}")]
    UnexpectedOutput(String),
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Everything needed to create one compute unit.
#[derive(Debug, Clone)]
pub struct UnitSpec {
    pub name: String,
    pub image: String,
    /// Primary (isolated) network.
    pub network: String,
    /// Networks joined after creation.
    pub extra_networks: Vec<String>,
    pub memory_mb: u64,
    pub cpu_share: f64,
    pub labels: BTreeMap<String, String>,
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerSummary {
    pub id: String,
    pub name: String,
    pub state: String,
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn network_exists(&self, name: &str) -> RuntimeResult<bool>;

    async fn create_network(&self, name: &str, labels: &BTreeMap<String, String>)
        -> RuntimeResult<()>;

    async fn remove_network(&self, name: &str) -> RuntimeResult<()>;

    /// Create (but do not start) a container. Returns the runtime id.
    async fn create_container(&self, spec: &UnitSpec) -> RuntimeResult<String>;

    async fn start_container(&self, id: &str) -> RuntimeResult<()>;

    async fn stop_container(&self, id: &str, grace: Duration) -> RuntimeResult<()>;

    async fn remove_container(&self, id: &str, force: bool) -> RuntimeResult<()>;

    /// Live state string (`running`, `exited`, ...), or `None` if the runtime
    /// has no such container.
    async fn container_status(&self, id: &str) -> RuntimeResult<Option<String>>;

    /// Containers carrying `label` (`key=value`).
    async fn list_containers(&self, label: &str) -> RuntimeResult<Vec<ContainerSummary>>;
}
