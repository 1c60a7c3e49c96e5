//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router with every control-plane and websocket route
//! - Wire up middleware (tracing, request id, body limit, authentication)
//! - Serve on a plain listener or with rustls, shutting down on signal

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::State,
    middleware,
    routing::{any, get, post},
    Json, Router,
};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::{
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::admin;
use crate::bridge::BridgeRegistry;
use crate::compute::ComputeManager;
use crate::config::{GatewayConfig, TlsConfig};
use crate::http::{compute, proxy, tunnels, websocket};
use crate::lifecycle::Services;
use crate::relay::TunnelRelay;
use crate::security::{require_user, AuthContext};
use crate::tunnels::TunnelRegistry;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub auth: Arc<AuthContext>,
    pub bridges: Arc<BridgeRegistry>,
    pub relay: Arc<TunnelRelay>,
    pub compute: Arc<ComputeManager>,
    pub tunnels: Arc<TunnelRegistry>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(services: &Services) -> Self {
        Self {
            config: services.config.clone(),
            auth: services.auth.clone(),
            bridges: services.bridges.clone(),
            relay: services.relay.clone(),
            compute: services.compute.clone(),
            tunnels: services.tunnels.clone(),
            started_at: Instant::now(),
        }
    }
}

/// HTTP server for the control plane.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    pub fn new(services: &Services) -> Self {
        let state = AppState::new(services);
        Self {
            router: Self::build_router(state),
        }
    }

    /// Build the Axum router with all middleware layers.
    pub fn build_router(state: AppState) -> Router {
        let user_routes = Router::new()
            .route("/ws/bridge", get(websocket::bridge_upgrade))
            .route("/ws/tunnel", get(websocket::tunnel_upgrade))
            .route("/api/bridge/proxy/{*path}", any(proxy::proxy_request))
            .route("/api/bridge/status", get(proxy::bridge_status))
            .route("/api/tunnels/register", post(tunnels::register))
            .route("/api/tunnels/discover", get(tunnels::discover_own))
            .route("/api/tunnels/heartbeat", post(tunnels::heartbeat))
            .route("/api/tunnels/unregister", post(tunnels::unregister))
            .route("/api/tunnels/{tunnel_id}/health", get(tunnels::health))
            .route("/api/compute/provision", post(compute::provision))
            .route("/api/compute/terminate", post(compute::terminate))
            .route("/api/compute/status", get(compute::status))
            .route("/api/compute/activity", post(compute::activity))
            .route_layer(middleware::from_fn_with_state(
                state.auth.clone(),
                require_user,
            ));

        // Compute units authenticate with the service key instead of a user token.
        let service_routes = Router::new().route(
            "/api/tunnels/discover/{user_id}",
            get(tunnels::discover_for_service),
        );

        let mut router = Router::new()
            .route("/health", get(health))
            .merge(user_routes)
            .merge(service_routes);
        if state.config.admin.enabled {
            router = router.merge(admin::router(state.clone()));
        }

        router
            .with_state(state.clone())
            .layer(RequestBodyLimitLayer::new(state.config.listener.max_body_bytes))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Run the server, accepting connections on the given listener.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        axum::serve(
            listener,
            self.router
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Run with TLS terminated by rustls.
    pub async fn run_tls(
        self,
        addr: SocketAddr,
        tls: &TlsConfig,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let rustls =
            axum_server::tls_rustls::RustlsConfig::from_pem_file(&tls.cert_path, &tls.key_path)
                .await?;
        let handle = axum_server::Handle::new();

        let stopper = handle.clone();
        tokio::spawn(async move {
            let _ = shutdown.recv().await;
            stopper.graceful_shutdown(Some(Duration::from_secs(10)));
        });

        tracing::info!(address = %addr, "HTTPS server starting");
        axum_server::bind_rustls(addr, rustls)
            .handle(handle)
            .serve(
                self.router
                    .into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await?;

        tracing::info!("HTTPS server stopped");
        Ok(())
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthBody {
    status: &'static str,
    version: &'static str,
    uptime_secs: u64,
}

async fn health(State(state): State<AppState>) -> Json<HealthBody> {
    Json(HealthBody {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.started_at.elapsed().as_secs(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::DockerCli;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn services(admin: bool) -> Services {
        let mut config = GatewayConfig::default();
        config.auth.hs256_secret = Some("unit-secret".to_string());
        config.admin.enabled = admin;
        config.admin.api_key = "unit-admin-key".to_string();
        Services::build(config, Arc::new(DockerCli::new("docker"))).unwrap()
    }

    #[tokio::test]
    async fn health_is_public_and_carries_request_id() {
        let router = HttpServer::new(&services(false)).router();
        let resp = router
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        assert!(resp.headers().contains_key("x-request-id"));
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn user_routes_reject_missing_token() {
        let router = HttpServer::new(&services(false)).router();
        let resp = router
            .oneshot(Request::get("/api/compute/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn admin_routes_mount_only_when_enabled() {
        let request = || {
            Request::get("/admin/status")
                .header("authorization", "Bearer unit-admin-key")
                .body(Body::empty())
                .unwrap()
        };

        let disabled = HttpServer::new(&services(false)).router();
        assert_eq!(
            disabled.oneshot(request()).await.unwrap().status(),
            StatusCode::NOT_FOUND
        );

        let enabled = HttpServer::new(&services(true)).router();
        assert_eq!(enabled.oneshot(request()).await.unwrap().status(), StatusCode::OK);
    }
}
