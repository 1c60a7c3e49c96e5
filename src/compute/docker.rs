//! Docker / Podman CLI runtime.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::compute::runtime::{
    ContainerRuntime, ContainerSummary, RuntimeError, RuntimeResult, UnitSpec,
};

/// Drives a docker-compatible CLI (`docker` or `podman`).
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: String,
}

impl DockerCli {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    async fn run(&self, args: &[String]) -> RuntimeResult<String> {
        let command = format!("{} {}", self.binary, args.first().map(String::as_str).unwrap_or(""));
        debug!(binary = %self.binary, args = ?args, "Invoking container runtime");

        let output = Command::new(&self.binary)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| RuntimeError::Spawn {
                command: command.clone(),
                source,
            })?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            Err(RuntimeError::CommandFailed {
                command,
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

fn is_missing(err: &RuntimeError) -> bool {
    match err {
        RuntimeError::CommandFailed { stderr, .. } => {
            let stderr = stderr.to_ascii_lowercase();
            stderr.contains("no such") || stderr.contains("not found")
        }
        _ => false,
    }
}

fn label_args(labels: &BTreeMap<String, String>) -> Vec<String> {
    labels
        .iter()
        .flat_map(|(k, v)| ["--label".to_string(), format!("{k}={v}")])
        .collect()
}

/// `docker create` arguments for a unit.
pub fn create_args(spec: &UnitSpec) -> Vec<String> {
    let mut args = vec![
        "create".to_string(),
        "--name".to_string(),
        spec.name.clone(),
        "--memory".to_string(),
        format!("{}m", spec.memory_mb),
        "--cpus".to_string(),
        spec.cpu_share.to_string(),
        "--network".to_string(),
        spec.network.clone(),
        "--restart".to_string(),
        "no".to_string(),
        "--rm".to_string(),
    ];
    args.extend(label_args(&spec.labels));
    for (k, v) in &spec.env {
        args.push("--env".to_string());
        args.push(format!("{k}={v}"));
    }
    args.push(spec.image.clone());
    args
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn network_exists(&self, name: &str) -> RuntimeResult<bool> {
        let out = self
            .run(&[
                "network".into(),
                "ls".into(),
                "--filter".into(),
                format!("name=^{name}$"),
                "--format".into(),
                "{{.Name}}".into(),
            ])
            .await?;
        Ok(out.lines().any(|line| line.trim() == name))
    }

    async fn create_network(
        &self,
        name: &str,
        labels: &BTreeMap<String, String>,
    ) -> RuntimeResult<()> {
        let mut args = vec!["network".to_string(), "create".to_string()];
        args.extend(label_args(labels));
        args.push(name.to_string());
        self.run(&args).await.map(|_| ())
    }

    async fn remove_network(&self, name: &str) -> RuntimeResult<()> {
        self.run(&["network".into(), "rm".into(), name.into()])
            .await
            .map(|_| ())
    }

    async fn create_container(&self, spec: &UnitSpec) -> RuntimeResult<String> {
        let id = self.run(&create_args(spec)).await?;
        if id.is_empty() {
            return Err(RuntimeError::UnexpectedOutput(
                "create returned no container id".to_string(),
            ));
        }

        for network in &spec.extra_networks {
            let connect = self
                .run(&[
                    "network".into(),
                    "connect".into(),
                    network.clone(),
                    id.clone(),
                ])
                .await;
            if let Err(e) = connect {
                warn!(container = %id, network = %network, error = %e, "Network attach failed, removing container");
                let _ = self.remove_container(&id, true).await;
                return Err(e);
            }
        }
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> RuntimeResult<()> {
        self.run(&["start".into(), id.into()]).await.map(|_| ())
    }

    async fn stop_container(&self, id: &str, grace: Duration) -> RuntimeResult<()> {
        self.run(&[
            "stop".into(),
            "--time".into(),
            grace.as_secs().to_string(),
            id.into(),
        ])
        .await
        .map(|_| ())
    }

    async fn remove_container(&self, id: &str, force: bool) -> RuntimeResult<()> {
        let mut args = vec!["rm".to_string()];
        if force {
            args.push("--force".to_string());
        }
        args.push(id.to_string());
        match self.run(&args).await {
            Err(e) if is_missing(&e) => Ok(()),
            other => other.map(|_| ()),
        }
    }

    async fn container_status(&self, id: &str) -> RuntimeResult<Option<String>> {
        let result = self
            .run(&[
                "inspect".into(),
                "--format".into(),
                "{{.State.Status}}".into(),
                id.into(),
            ])
            .await;
        match result {
            Ok(status) => Ok(Some(status)),
            Err(e) if is_missing(&e) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn list_containers(&self, label: &str) -> RuntimeResult<Vec<ContainerSummary>> {
        let out = self
            .run(&[
                "ps".into(),
                "--all".into(),
                "--filter".into(),
                format!("label={label}"),
                "--format".into(),
                "{{.ID}}\t{{.Names}}\t{{.State}}".into(),
            ])
            .await?;

        out.lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                let mut fields = line.split('\t');
                match (fields.next(), fields.next(), fields.next()) {
                    (Some(id), Some(name), Some(state)) => Ok(ContainerSummary {
                        id: id.to_string(),
                        name: name.to_string(),
                        state: state.to_string(),
                    }),
                    _ => Err(RuntimeError::UnexpectedOutput(line.to_string())),
                }
            })
            .collect()
    }
}
