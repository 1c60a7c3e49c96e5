//! Startup orchestration.
//!
//! # Responsibilities
//! - Build every subsystem from the validated config, in dependency order
//! - Start the background loops (tunnel prober, stale sweep, idle reaper)
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - The container runtime is injected so tests can run without docker

use std::sync::Arc;

use thiserror::Error;

use crate::bridge::BridgeRegistry;
use crate::compute::{ComputeManager, ContainerRuntime};
use crate::config::GatewayConfig;
use crate::lifecycle::shutdown::{BackgroundTasks, Shutdown};
use crate::relay::TunnelRelay;
use crate::security::{AuthContext, AuthError};
use crate::tunnels::{run_stale_sweep, TunnelProber, TunnelRegistry};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("auth setup failed: {0}")]
    Auth(#[from] AuthError),

    #[error("probe client setup failed: {0}")]
    ProbeClient(#[from] reqwest::Error),
}

/// Every long-lived service, shared by the HTTP layer and background loops.
#[derive(Clone)]
pub struct Services {
    pub config: Arc<GatewayConfig>,
    pub auth: Arc<AuthContext>,
    pub bridges: Arc<BridgeRegistry>,
    pub relay: Arc<TunnelRelay>,
    pub compute: Arc<ComputeManager>,
    pub tunnels: Arc<TunnelRegistry>,
}

impl Services {
    pub fn build(
        config: GatewayConfig,
        runtime: Arc<dyn ContainerRuntime>,
    ) -> Result<Self, StartupError> {
        let auth = Arc::new(AuthContext::from_config(&config.auth)?);
        let bridges = Arc::new(BridgeRegistry::new(config.bridge.request_timeout()));
        let relay = Arc::new(TunnelRelay::new());
        let compute = Arc::new(ComputeManager::new(runtime, config.compute.clone()));
        let tunnels = Arc::new(TunnelRegistry::new(config.tunnels.clone()));

        Ok(Self {
            config: Arc::new(config),
            auth,
            bridges,
            relay,
            compute,
            tunnels,
        })
    }

    /// Spawn the periodic loops. They exit when `shutdown` fires.
    pub fn start_background(&self, shutdown: &Shutdown) -> Result<BackgroundTasks, StartupError> {
        let mut tasks = BackgroundTasks::new(shutdown.clone());

        let prober = TunnelProber::new(self.tunnels.clone(), self.config.tunnels.clone())?;
        tasks.push("tunnel-prober", tokio::spawn(prober.run(shutdown.subscribe())));

        tasks.push(
            "stale-sweep",
            tokio::spawn(run_stale_sweep(
                self.tunnels.clone(),
                self.config.tunnels.sweep_interval(),
                shutdown.subscribe(),
            )),
        );

        tasks.push(
            "idle-reaper",
            tokio::spawn(self.compute.clone().run_reaper(shutdown.subscribe())),
        );

        tracing::info!(tasks = tasks.len(), "Background tasks started");
        Ok(tasks)
    }
}
