//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use inference_relay::compute::{ContainerRuntime, ContainerSummary, RuntimeResult, UnitSpec};
use inference_relay::config::GatewayConfig;
use inference_relay::security::Claims;
use inference_relay::{HttpServer, Services, Shutdown};
use jsonwebtoken::{encode, EncodingKey, Header};
use relay_sdk::ControlPlaneClient;
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

pub const SECRET: &str = "integration-secret";
pub const SERVICE_KEY: &str = "integration-service-key";
pub const ADMIN_KEY: &str = "integration-admin-key";

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub fn mint_token(user_id: &str) -> String {
    let claims = Claims {
        sub: user_id.to_string(),
        iss: None,
        aud: None,
        exp: chrono::Utc::now().timestamp() + 3600,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap()
}

pub fn test_config() -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.auth.hs256_secret = Some(SECRET.to_string());
    config.auth.service_key = Some(SERVICE_KEY.to_string());
    config.admin.enabled = true;
    config.admin.api_key = ADMIN_KEY.to_string();
    config
}

/// In-memory container runtime.
#[derive(Default)]
pub struct FakeRuntime {
    containers: Mutex<HashMap<String, (String, String)>>,
    networks: Mutex<HashSet<String>>,
    creates: AtomicUsize,
}

impl FakeRuntime {
    pub fn container_count(&self) -> usize {
        self.containers.lock().unwrap().len()
    }

    pub fn network_count(&self) -> usize {
        self.networks.lock().unwrap().len()
    }

    pub fn create_calls(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn network_exists(&self, name: &str) -> RuntimeResult<bool> {
        Ok(self.networks.lock().unwrap().contains(name))
    }

    async fn create_network(&self, name: &str, _: &BTreeMap<String, String>) -> RuntimeResult<()> {
        self.networks.lock().unwrap().insert(name.to_string());
        Ok(())
    }

    async fn remove_network(&self, name: &str) -> RuntimeResult<()> {
        self.networks.lock().unwrap().remove(name);
        Ok(())
    }

    async fn create_container(&self, spec: &UnitSpec) -> RuntimeResult<String> {
        // Widen the race window for concurrent provisioning.
        tokio::time::sleep(Duration::from_millis(20)).await;
        let n = self.creates.fetch_add(1, Ordering::SeqCst);
        let id = format!("fake-{n}");
        self.containers
            .lock()
            .unwrap()
            .insert(id.clone(), (spec.name.clone(), "created".to_string()));
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> RuntimeResult<()> {
        if let Some(entry) = self.containers.lock().unwrap().get_mut(id) {
            entry.1 = "running".to_string();
        }
        Ok(())
    }

    async fn stop_container(&self, id: &str, _: Duration) -> RuntimeResult<()> {
        self.containers.lock().unwrap().remove(id);
        Ok(())
    }

    async fn remove_container(&self, id: &str, _: bool) -> RuntimeResult<()> {
        self.containers.lock().unwrap().remove(id);
        Ok(())
    }

    async fn container_status(&self, id: &str) -> RuntimeResult<Option<String>> {
        Ok(self
            .containers
            .lock()
            .unwrap()
            .get(id)
            .map(|(_, state)| state.clone()))
    }

    async fn list_containers(&self, _: &str) -> RuntimeResult<Vec<ContainerSummary>> {
        Ok(self
            .containers
            .lock()
            .unwrap()
            .iter()
            .map(|(id, (name, state))| ContainerSummary {
                id: id.clone(),
                name: name.clone(),
                state: state.clone(),
            })
            .collect())
    }
}

/// A gateway served on an ephemeral port, stopped on drop.
pub struct TestGateway {
    pub addr: SocketAddr,
    pub services: Services,
    pub runtime: Arc<FakeRuntime>,
    shutdown: Shutdown,
}

impl TestGateway {
    pub async fn start() -> Self {
        Self::start_with(|_| {}).await
    }

    pub async fn start_with(customize: impl FnOnce(&mut GatewayConfig)) -> Self {
        let mut config = test_config();
        customize(&mut config);

        let runtime = Arc::new(FakeRuntime::default());
        let services = Services::build(config, runtime.clone()).unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = Shutdown::new();
        let server = HttpServer::new(&services);
        let rx = shutdown.subscribe();
        tokio::spawn(async move {
            let _ = server.run(listener, rx).await;
        });

        Self {
            addr,
            services,
            runtime,
            shutdown,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn ws_url(&self, path: &str) -> String {
        format!("ws://{}{}", self.addr, path)
    }

    pub fn sdk(&self, user_id: &str) -> ControlPlaneClient {
        ControlPlaneClient::new(&self.url(""), &mint_token(user_id))
    }

    /// Open a websocket authenticated with an `Authorization` header.
    pub async fn ws_connect(&self, path: &str, user_id: &str) -> WsStream {
        let mut request = self.ws_url(path).into_client_request().unwrap();
        request.headers_mut().insert(
            "authorization",
            format!("Bearer {}", mint_token(user_id)).parse().unwrap(),
        );
        let (ws, _) = connect_async(request).await.unwrap();
        ws
    }

    /// Open a websocket authenticated with `?token=`.
    pub async fn ws_connect_query(&self, path: &str, user_id: &str) -> WsStream {
        let url = format!("{}?token={}", self.ws_url(path), mint_token(user_id));
        let (ws, _) = connect_async(url).await.unwrap();
        ws
    }
}

impl Drop for TestGateway {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

pub async fn send_json(ws: &mut WsStream, value: Value) {
    ws.send(Message::text(value.to_string())).await.unwrap();
}

/// Next text frame as JSON, skipping control frames.
pub async fn next_json(ws: &mut WsStream) -> Value {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => {
                    return serde_json::from_str::<Value>(text.as_str()).unwrap()
                }
                Some(Ok(_)) => continue,
                other => panic!("socket ended: {other:?}"),
            }
        }
    })
    .await
    .expect("no frame within 5s")
}

/// Poll `check` until it holds or two seconds pass.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}
