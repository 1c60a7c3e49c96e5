//! Per-tenant compute unit lifecycle.
//!
//! # Responsibilities
//! - Provision at most one isolated, resource-capped unit per user
//! - Terminate units and best-effort remove their isolated network
//! - Report live runtime status
//! - Reap units idle past the configured threshold
//!
//! # Design Decisions
//! - Every mutation for a user runs under that user's async mutex, so the
//!   "exists? else create" sequence in `provision` cannot interleave
//! - Idle age uses `tokio::time::Instant`; reporting timestamps use `chrono`

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{broadcast, Mutex};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::compute::ids::UnitIds;
use crate::compute::runtime::{ContainerRuntime, RuntimeError, UnitSpec};
use crate::config::ComputeConfig;
use crate::observability::metrics;

pub const LABEL_KIND: &str = "inference-relay.kind";
pub const LABEL_USER_ID: &str = "inference-relay.user-id";
pub const LABEL_CREATED_AT: &str = "inference-relay.created-at";

const KIND_UNIT: &str = "compute-unit";
const KIND_NETWORK: &str = "compute-network";

#[derive(Debug, Error)]
pub enum ComputeError {
    #[error("no compute unit for user {0}")]
    NotFound(String),

    #[error("{0}")]
    Runtime(String),
}

impl From<RuntimeError> for ComputeError {
    fn from(err: RuntimeError) -> Self {
        ComputeError::Runtime(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum UnitStatus {
    NotFound,
    Running,
    Stopped,
    Error,
}

impl UnitStatus {
    fn from_runtime(state: &str) -> Self {
        match state {
            "running" | "restarting" => UnitStatus::Running,
            "created" | "exited" | "paused" | "removing" | "stopped" => UnitStatus::Stopped,
            _ => UnitStatus::Error,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComputeUnit {
    pub user_id: String,
    pub unit_id: String,
    pub network_name: String,
    pub container_id: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub status: UnitStatus,
    #[serde(skip)]
    idle_since: Instant,
}

impl ComputeUnit {
    fn touch(&mut self) {
        self.last_activity = Utc::now();
        self.idle_since = Instant::now();
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub status: UnitStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<ComputeUnit>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminateOutcome {
    pub terminated: bool,
    pub network_removed: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BulkTermination {
    pub attempted: usize,
    pub terminated: usize,
    pub failed: usize,
}

pub struct ComputeManager {
    runtime: Arc<dyn ContainerRuntime>,
    settings: ComputeConfig,
    units: DashMap<String, ComputeUnit>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl ComputeManager {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, settings: ComputeConfig) -> Self {
        Self {
            runtime,
            settings,
            units: DashMap::new(),
            locks: DashMap::new(),
        }
    }

    fn user_lock(&self, user_id: &str) -> Arc<Mutex<()>> {
        self.locks.entry(user_id.to_string()).or_default().clone()
    }

    fn labels(kind: &str, user_id: &str, created_at: DateTime<Utc>) -> BTreeMap<String, String> {
        BTreeMap::from([
            (LABEL_KIND.to_string(), kind.to_string()),
            (LABEL_USER_ID.to_string(), user_id.to_string()),
            (LABEL_CREATED_AT.to_string(), created_at.to_rfc3339()),
        ])
    }

    /// Return the user's unit, creating it if none exists.
    pub async fn provision(&self, user_id: &str) -> Result<ComputeUnit, ComputeError> {
        let lock = self.user_lock(user_id);
        let _held = lock.lock().await;

        if let Some(existing) = self.units.get(user_id) {
            debug!(user_id = %user_id, unit_id = %existing.unit_id, "Compute unit already provisioned");
            return Ok(existing.clone());
        }

        let result = self.create_unit(user_id).await;
        let outcome = if result.is_ok() { "ok" } else { "error" };
        metrics::record_compute_operation("provision", outcome);
        let unit = result?;

        self.units.insert(user_id.to_string(), unit.clone());
        metrics::set_compute_units(self.units.len());
        info!(
            user_id = %user_id,
            unit_id = %unit.unit_id,
            network = %unit.network_name,
            "Compute unit provisioned"
        );
        Ok(unit)
    }

    async fn create_unit(&self, user_id: &str) -> Result<ComputeUnit, ComputeError> {
        let ids = UnitIds::derive(user_id);
        let created_at = Utc::now();

        if !self.runtime.network_exists(&ids.network_name).await? {
            self.runtime
                .create_network(
                    &ids.network_name,
                    &Self::labels(KIND_NETWORK, user_id, created_at),
                )
                .await?;
        }

        let spec = UnitSpec {
            name: ids.unit_name.clone(),
            image: self.settings.image.clone(),
            network: ids.network_name.clone(),
            extra_networks: vec![self.settings.control_network.clone()],
            memory_mb: self.settings.memory_mb,
            cpu_share: self.settings.cpu_share,
            labels: Self::labels(KIND_UNIT, user_id, created_at),
            env: BTreeMap::from([("RELAY_USER_ID".to_string(), user_id.to_string())]),
        };
        let container_id = self.runtime.create_container(&spec).await?;

        if let Err(e) = self.runtime.start_container(&container_id).await {
            warn!(user_id = %user_id, error = %e, "Compute unit failed to start, removing");
            let _ = self.runtime.remove_container(&container_id, true).await;
            return Err(e.into());
        }

        Ok(ComputeUnit {
            user_id: user_id.to_string(),
            unit_id: ids.unit_name,
            network_name: ids.network_name,
            container_id,
            created_at,
            last_activity: created_at,
            status: UnitStatus::Running,
            idle_since: Instant::now(),
        })
    }

    /// Stop the user's unit and remove its isolated network.
    ///
    /// A failed network removal is reported in the outcome, not returned as an error.
    pub async fn terminate(&self, user_id: &str) -> Result<TerminateOutcome, ComputeError> {
        let lock = self.user_lock(user_id);
        let result = {
            let _held = lock.lock().await;
            self.terminate_locked(user_id).await
        };
        drop(lock);
        self.release_lock(user_id);
        result
    }

    /// Forget the user's lock unless another task still holds a handle to it.
    fn release_lock(&self, user_id: &str) {
        self.locks
            .remove_if(user_id, |_, lock| Arc::strong_count(lock) == 1);
    }

    async fn terminate_locked(&self, user_id: &str) -> Result<TerminateOutcome, ComputeError> {
        let unit = self
            .units
            .get(user_id)
            .map(|u| u.clone())
            .ok_or_else(|| ComputeError::NotFound(user_id.to_string()))?;

        if let Err(e) = self
            .runtime
            .stop_container(&unit.container_id, self.settings.stop_grace())
            .await
        {
            // Already gone (auto-removed) counts as stopped.
            if !matches!(self.runtime.container_status(&unit.container_id).await, Ok(None)) {
                metrics::record_compute_operation("terminate", "error");
                return Err(e.into());
            }
        }
        if let Err(e) = self.runtime.remove_container(&unit.container_id, true).await {
            debug!(container = %unit.container_id, error = %e, "Container removal after stop failed");
        }

        self.units.remove(user_id);
        metrics::set_compute_units(self.units.len());
        metrics::record_compute_operation("terminate", "ok");

        let network_removed = match self.runtime.remove_network(&unit.network_name).await {
            Ok(()) => true,
            Err(e) => {
                warn!(user_id = %user_id, network = %unit.network_name, error = %e, "Network removal failed");
                false
            }
        };

        info!(user_id = %user_id, unit_id = %unit.unit_id, network_removed, "Compute unit terminated");
        Ok(TerminateOutcome {
            terminated: true,
            network_removed,
        })
    }

    /// Live status straight from the runtime.
    pub async fn status(&self, user_id: &str) -> StatusReport {
        let Some(unit) = self.units.get(user_id).map(|u| u.clone()) else {
            return StatusReport {
                status: UnitStatus::NotFound,
                unit: None,
            };
        };

        let status = match self.runtime.container_status(&unit.container_id).await {
            Ok(Some(state)) => UnitStatus::from_runtime(&state),
            Ok(None) => {
                self.units
                    .remove_if(user_id, |_, u| u.container_id == unit.container_id);
                metrics::set_compute_units(self.units.len());
                info!(user_id = %user_id, "Compute unit vanished from runtime, record dropped");
                return StatusReport {
                    status: UnitStatus::NotFound,
                    unit: None,
                };
            }
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "Status query failed");
                UnitStatus::Error
            }
        };

        let unit = self.units.get_mut(user_id).map(|mut u| {
            u.status = status;
            u.clone()
        });
        StatusReport { status, unit }
    }

    /// Refresh the unit's activity clock. Returns false if the user has no unit.
    pub fn touch(&self, user_id: &str) -> bool {
        match self.units.get_mut(user_id) {
            Some(mut unit) => {
                unit.touch();
                true
            }
            None => false,
        }
    }

    /// Terminate every unit. Failures are logged and counted; the batch continues.
    pub async fn terminate_all(&self) -> BulkTermination {
        let users: Vec<String> = self.units.iter().map(|e| e.key().clone()).collect();
        let mut report = BulkTermination {
            attempted: users.len(),
            ..BulkTermination::default()
        };

        for user_id in users {
            match self.terminate(&user_id).await {
                Ok(_) => report.terminated += 1,
                Err(ComputeError::NotFound(_)) => report.attempted -= 1,
                Err(e) => {
                    error!(user_id = %user_id, error = %e, "Bulk termination failed for unit");
                    report.failed += 1;
                }
            }
        }

        info!(
            attempted = report.attempted,
            terminated = report.terminated,
            failed = report.failed,
            "Bulk termination finished"
        );
        report
    }

    /// Terminate units idle for at least the configured timeout.
    ///
    /// Returns the users whose units were reaped.
    pub async fn reap_idle(&self) -> Vec<String> {
        let idle_timeout = self.settings.idle_timeout();
        let idle: Vec<String> = self
            .units
            .iter()
            .filter(|e| e.idle_since.elapsed() >= idle_timeout)
            .map(|e| e.key().clone())
            .collect();

        let mut reaped = Vec::new();
        for user_id in idle {
            // Activity may have arrived since the scan.
            let still_idle = self
                .units
                .get(&user_id)
                .is_some_and(|u| u.idle_since.elapsed() >= idle_timeout);
            if !still_idle {
                continue;
            }
            match self.terminate(&user_id).await {
                Ok(_) => {
                    info!(user_id = %user_id, "Idle compute unit reaped");
                    reaped.push(user_id);
                }
                Err(e) => warn!(user_id = %user_id, error = %e, "Idle reap failed"),
            }
        }
        reaped
    }

    /// Remove labelled containers this process does not track.
    pub async fn cleanup_orphans(&self) -> Result<usize, ComputeError> {
        let label = format!("{LABEL_KIND}={KIND_UNIT}");
        let found = self.runtime.list_containers(&label).await?;

        let mut removed = 0;
        for container in found {
            let tracked = self
                .units
                .iter()
                .any(|u| u.container_id == container.id || u.unit_id == container.name);
            if tracked {
                continue;
            }
            match self.runtime.remove_container(&container.id, true).await {
                Ok(()) => removed += 1,
                Err(e) => warn!(container = %container.id, error = %e, "Orphan removal failed"),
            }
        }
        if removed > 0 {
            info!(removed, "Removed orphaned compute units");
        }
        Ok(removed)
    }

    pub fn units(&self) -> Vec<ComputeUnit> {
        self.units.iter().map(|e| e.value().clone()).collect()
    }

    pub fn unit_count(&self) -> usize {
        self.units.len()
    }

    /// Idle reaper loop. Runs until shutdown is signalled.
    pub async fn run_reaper(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = interval(self.settings.reap_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            interval_secs = self.settings.reap_interval_secs,
            idle_timeout_secs = self.settings.idle_timeout_secs,
            "Idle reaper started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.reap_idle().await;
                }
                _ = shutdown.recv() => {
                    info!("Idle reaper stopping");
                    break;
                }
            }
        }
    }
}
