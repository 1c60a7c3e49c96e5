//! Background tunnel maintenance.
//!
//! # Responsibilities
//! - Periodically probe every registered tunnel's public URL
//! - Periodically delete registrations whose heartbeat went stale
//!
//! # Design Decisions
//! - Any HTTP response below 500 counts as reachable; the probe only asks
//!   whether the tunnel forwards traffic, not whether the model is happy
//! - Probes for different tunnels run concurrently so one slow tunnel does
//!   not delay the rest

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use tokio::sync::broadcast;
use tokio::time::{self, MissedTickBehavior};

use crate::config::TunnelConfig;
use crate::observability::metrics;
use crate::tunnels::registry::TunnelRegistry;

pub struct TunnelProber {
    registry: Arc<TunnelRegistry>,
    settings: TunnelConfig,
    client: reqwest::Client,
}

impl TunnelProber {
    pub fn new(registry: Arc<TunnelRegistry>, settings: TunnelConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(settings.probe_timeout())
            .user_agent(concat!("inference-relay-probe/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            registry,
            settings,
            client,
        })
    }

    async fn probe(&self, tunnel_id: &str, url: &str) -> (bool, Duration) {
        let start = Instant::now();
        let reachable = match self.client.head(url).send().await {
            Ok(response) => {
                let ok = response.status().as_u16() < 500;
                if !ok {
                    tracing::debug!(tunnel_id = %tunnel_id, status = %response.status(), "Probe got server error");
                }
                ok
            }
            Err(e) => {
                tracing::debug!(tunnel_id = %tunnel_id, error = %e, "Probe failed");
                false
            }
        };
        (reachable, start.elapsed())
    }

    /// Probe every registered tunnel once.
    pub async fn probe_all(&self) {
        let targets = self.registry.probe_targets();
        let probes = targets.iter().map(|(tunnel_id, url)| async move {
            let (reachable, elapsed) = self.probe(tunnel_id, url).await;
            metrics::record_tunnel_probe(reachable, elapsed);
            self.registry.record_probe(tunnel_id, reachable, elapsed);
        });
        join_all(probes).await;
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            interval_secs = self.settings.probe_interval_secs,
            threshold = self.settings.unhealthy_threshold,
            "Tunnel prober starting"
        );

        let mut ticker = time::interval(self.settings.probe_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.probe_all().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Tunnel prober received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}

/// Stale-registration sweep loop.
pub async fn run_stale_sweep(
    registry: Arc<TunnelRegistry>,
    every: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let removed = registry.sweep_stale();
                if !removed.is_empty() {
                    tracing::info!(count = removed.len(), "Stale sweep removed tunnels");
                }
            }
            _ = shutdown.recv() => {
                tracing::info!("Stale sweep received shutdown signal, exiting loop");
                break;
            }
        }
    }
}
