//! Public tunnel registry.
//!
//! # Responsibilities
//! - Validate and store one tunnel registration per user
//! - Serve discovery with the latest health snapshot
//! - Heartbeat, unregister and the stale sweep
//! - Record probe results and apply the unhealthy threshold
//!
//! # State Transitions
//! ```text
//! healthy → unhealthy: consecutive_failures >= unhealthy_threshold
//! unhealthy → healthy: one successful probe
//! registered → deleted: unregister, or heartbeat age > heartbeat_timeout (sweep)
//! ```

use std::net::IpAddr;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use url::{Host, Url};

use crate::config::TunnelConfig;
use crate::observability::metrics;
use crate::tunnels::types::{
    Discovery, TunnelError, TunnelHealth, TunnelInfo, TunnelMetadata, TunnelRegistration,
    TunnelView,
};

const TUNNEL_ID_HEX_LEN: usize = 16;

pub struct TunnelRegistry {
    registrations: DashMap<String, TunnelRegistration>,
    health: DashMap<String, TunnelHealth>,
    settings: TunnelConfig,
}

/// Hosts the prober must never be pointed at. Only literals and `localhost`
/// are recognised; names are not resolved here.
fn is_internal_host(host: &Host<&str>) -> bool {
    match host {
        Host::Domain(domain) => {
            let domain = domain.to_ascii_lowercase();
            domain == "localhost" || domain.ends_with(".localhost")
        }
        Host::Ipv4(ip) => {
            ip.is_loopback()
                || ip.is_private()
                || ip.is_link_local()
                || ip.is_unspecified()
                || ip.is_broadcast()
        }
        Host::Ipv6(ip) => {
            let first = ip.segments()[0];
            ip.is_loopback()
                || ip.is_unspecified()
                || (first & 0xfe00) == 0xfc00
                || (first & 0xffc0) == 0xfe80
                || ip.to_ipv4_mapped().is_some_and(|v4| is_internal_host(&Host::Ipv4(v4)))
        }
    }
}

fn validate(info: &TunnelInfo, allow_internal_public: bool) -> Result<(), TunnelError> {
    let public = Url::parse(info.public_url.trim())
        .map_err(|e| TunnelError::Validation(format!("publicUrl is not a valid URL: {e}")))?;
    let Some(public_host) = public.host().filter(|_| matches!(public.scheme(), "http" | "https"))
    else {
        return Err(TunnelError::Validation(
            "publicUrl must be an http(s) URL with a host".to_string(),
        ));
    };
    if !allow_internal_public && is_internal_host(&public_host) {
        return Err(TunnelError::Validation(
            "publicUrl must not point at a loopback, private or link-local host".to_string(),
        ));
    }

    let local = Url::parse(info.local_url.trim())
        .map_err(|e| TunnelError::Validation(format!("localUrl is not a valid URL: {e}")))?;
    let loopback = match local.host() {
        Some(Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
        Some(Host::Ipv4(ip)) => IpAddr::V4(ip).is_loopback(),
        Some(Host::Ipv6(ip)) => IpAddr::V6(ip).is_loopback(),
        None => false,
    };
    if !loopback {
        return Err(TunnelError::Validation(
            "localUrl must point at a loopback address".to_string(),
        ));
    }

    if info.share_token.trim().is_empty() {
        return Err(TunnelError::Validation("shareToken is required".to_string()));
    }
    Ok(())
}

fn tunnel_id(user_id: &str, public_url: &str) -> String {
    let now = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    let digest = Sha256::digest(format!("{user_id}|{public_url}|{now}").as_bytes());
    hex::encode(digest)[..TUNNEL_ID_HEX_LEN].to_string()
}

impl TunnelRegistry {
    pub fn new(settings: TunnelConfig) -> Self {
        Self {
            registrations: DashMap::new(),
            health: DashMap::new(),
            settings,
        }
    }

    fn is_stale(&self, registration: &TunnelRegistration) -> bool {
        registration.heartbeat_at.elapsed() > self.settings.heartbeat_timeout()
    }

    /// Register (or replace) the user's tunnel. Returns the new tunnel id.
    pub fn register(&self, user_id: &str, info: TunnelInfo) -> Result<String, TunnelError> {
        validate(&info, self.settings.allow_internal_public_urls)?;

        let now = Utc::now();
        let public_url = info.public_url.trim().to_string();
        let tunnel_id = tunnel_id(user_id, &public_url);
        let registration = TunnelRegistration {
            tunnel_id: tunnel_id.clone(),
            user_id: user_id.to_string(),
            public_url,
            local_url: info.local_url.trim().to_string(),
            share_token: info.share_token,
            protocol: info.protocol.unwrap_or_else(|| "http".to_string()),
            registered_at: now,
            last_heartbeat: now,
            metadata: TunnelMetadata {
                agent: info.agent,
                version: info.version,
                platform: info.platform,
            },
            heartbeat_at: Instant::now(),
        };

        self.health
            .insert(tunnel_id.clone(), TunnelHealth::new(&tunnel_id));
        if let Some(previous) = self.registrations.insert(user_id.to_string(), registration) {
            self.health.remove(&previous.tunnel_id);
            debug!(user_id = %user_id, replaced = %previous.tunnel_id, "Prior tunnel replaced");
        }
        metrics::set_tunnel_registrations(self.registrations.len());

        info!(user_id = %user_id, tunnel_id = %tunnel_id, "Tunnel registered");
        Ok(tunnel_id)
    }

    /// Current, non-stale registration plus health.
    pub fn discover(&self, user_id: &str) -> Discovery {
        let registration = self
            .registrations
            .get(user_id)
            .filter(|r| !self.is_stale(r))
            .map(|r| r.clone());

        match registration {
            Some(registration) => {
                let health = self
                    .health
                    .get(&registration.tunnel_id)
                    .map(|h| h.clone());
                Discovery {
                    available: true,
                    tunnel_info: Some(TunnelView {
                        registration,
                        health,
                    }),
                }
            }
            None => Discovery {
                available: false,
                tunnel_info: None,
            },
        }
    }

    /// Refresh the heartbeat of the user's current tunnel.
    pub fn heartbeat(&self, user_id: &str, tunnel_id: &str) -> Result<(), TunnelError> {
        let mut registration = self
            .registrations
            .get_mut(user_id)
            .ok_or_else(|| TunnelError::NotFound(user_id.to_string()))?;
        if registration.tunnel_id != tunnel_id {
            return Err(TunnelError::Conflict {
                presented: tunnel_id.to_string(),
            });
        }
        registration.last_heartbeat = Utc::now();
        registration.heartbeat_at = Instant::now();
        Ok(())
    }

    pub fn unregister(&self, user_id: &str, tunnel_id: &str) -> Result<(), TunnelError> {
        match self
            .registrations
            .remove_if(user_id, |_, r| r.tunnel_id == tunnel_id)
        {
            Some((_, removed)) => {
                self.health.remove(&removed.tunnel_id);
                metrics::set_tunnel_registrations(self.registrations.len());
                info!(user_id = %user_id, tunnel_id = %tunnel_id, "Tunnel unregistered");
                Ok(())
            }
            None if self.registrations.contains_key(user_id) => Err(TunnelError::Conflict {
                presented: tunnel_id.to_string(),
            }),
            None => Err(TunnelError::NotFound(user_id.to_string())),
        }
    }

    pub fn health(&self, tunnel_id: &str) -> Option<TunnelHealth> {
        self.health.get(tunnel_id).map(|h| h.clone())
    }

    /// `(tunnel_id, public_url)` for every registration.
    pub fn probe_targets(&self) -> Vec<(String, String)> {
        self.registrations
            .iter()
            .map(|r| (r.tunnel_id.clone(), r.public_url.clone()))
            .collect()
    }

    /// Apply one probe result. Results for tunnels no longer registered are ignored.
    pub fn record_probe(&self, tunnel_id: &str, reachable: bool, elapsed: Duration) {
        let Some(mut health) = self.health.get_mut(tunnel_id) else {
            return;
        };
        health.last_check = Some(Utc::now());
        health.response_time_ms = Some(elapsed.as_millis() as u64);

        if reachable {
            if !health.is_healthy {
                info!(tunnel_id = %tunnel_id, "Tunnel reachable again");
            }
            health.consecutive_failures = 0;
            health.is_healthy = true;
        } else {
            health.consecutive_failures += 1;
            if health.is_healthy && health.consecutive_failures >= self.settings.unhealthy_threshold {
                health.is_healthy = false;
                warn!(
                    tunnel_id = %tunnel_id,
                    failures = health.consecutive_failures,
                    "Tunnel marked unhealthy"
                );
            }
        }
    }

    /// Delete every registration whose heartbeat is older than the timeout.
    ///
    /// Returns the affected user ids.
    pub fn sweep_stale(&self) -> Vec<String> {
        let candidates: Vec<String> = self
            .registrations
            .iter()
            .filter(|r| self.is_stale(r))
            .map(|r| r.key().clone())
            .collect();

        let mut removed = Vec::new();
        for user_id in candidates {
            if let Some((_, registration)) =
                self.registrations.remove_if(&user_id, |_, r| self.is_stale(r))
            {
                self.health.remove(&registration.tunnel_id);
                info!(user_id = %user_id, tunnel_id = %registration.tunnel_id, "Stale tunnel removed");
                removed.push(user_id);
            }
        }
        if !removed.is_empty() {
            metrics::set_tunnel_registrations(self.registrations.len());
        }
        removed
    }

    pub fn registrations(&self) -> Vec<TunnelView> {
        self.registrations
            .iter()
            .map(|r| TunnelView {
                registration: r.clone(),
                health: self.health(&r.tunnel_id),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }
}
