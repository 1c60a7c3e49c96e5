//! Bridge websocket and proxied request flow.

mod common;

use common::{eventually, mint_token, next_json, send_json, TestGateway};
use futures_util::SinkExt;
use serde_json::{json, Value};

#[tokio::test]
async fn proxied_request_round_trips_through_bridge() {
    let gateway = TestGateway::start().await;
    let mut bridge = gateway.ws_connect("/ws/bridge", "alice").await;

    let ack = next_json(&mut bridge).await;
    assert_eq!(ack["type"], "auth");
    assert_eq!(ack["data"]["userId"], "alice");

    tokio::spawn(async move {
        loop {
            let frame = next_json(&mut bridge).await;
            if frame["type"] != "request" {
                continue;
            }
            let path = frame["data"]["path"].as_str().unwrap().to_string();
            let body = frame["data"]["body"].clone();
            send_json(
                &mut bridge,
                json!({
                    "type": "response",
                    "id": frame["id"],
                    "data": {
                        "status": 201,
                        "headers": {"x-seen-path": path, "content-type": "application/json"},
                        "body": body,
                    }
                }),
            )
            .await;
        }
    });

    let resp = reqwest::Client::new()
        .post(gateway.url("/api/bridge/proxy/api/chat?stream=false"))
        .bearer_auth(mint_token("alice"))
        .body(r#"{"model":"llama"}"#)
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 201);
    assert_eq!(resp.headers()["x-seen-path"], "/api/chat?stream=false");
    assert_eq!(resp.text().await.unwrap(), r#"{"model":"llama"}"#);
    assert_eq!(gateway.services.bridges.pending_count(), 0);
}

#[tokio::test]
async fn proxy_without_bridge_is_not_found() {
    let gateway = TestGateway::start().await;

    let resp = reqwest::Client::new()
        .get(gateway.url("/api/bridge/proxy/api/tags"))
        .bearer_auth(mint_token("nobody"))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn bridge_error_reply_is_bad_gateway() {
    let gateway = TestGateway::start().await;
    let mut bridge = gateway.ws_connect("/ws/bridge", "alice").await;
    next_json(&mut bridge).await;

    tokio::spawn(async move {
        let frame = next_json(&mut bridge).await;
        send_json(
            &mut bridge,
            json!({"type": "response", "id": frame["id"], "error": "connection refused"}),
        )
        .await;
        // Keep the socket open until the test ends.
        let _ = next_json(&mut bridge).await;
    });

    let resp = reqwest::Client::new()
        .get(gateway.url("/api/bridge/proxy/api/tags"))
        .bearer_auth(mint_token("alice"))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 502);
}

#[tokio::test]
async fn bridge_disconnect_fails_pending_request() {
    let gateway = TestGateway::start().await;
    let mut bridge = gateway.ws_connect("/ws/bridge", "alice").await;
    next_json(&mut bridge).await;

    tokio::spawn(async move {
        let frame = next_json(&mut bridge).await;
        assert_eq!(frame["type"], "request");
        bridge.close(None).await.unwrap();
    });

    let resp = reqwest::Client::new()
        .get(gateway.url("/api/bridge/proxy/api/tags"))
        .bearer_auth(mint_token("alice"))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 503);
    assert_eq!(gateway.services.bridges.pending_count(), 0);
    let bridges = gateway.services.bridges.clone();
    assert!(eventually(|| !bridges.is_connected("alice")).await);
}

#[tokio::test]
async fn silent_bridge_times_out() {
    let gateway = TestGateway::start_with(|c| c.bridge.request_timeout_secs = 1).await;
    let mut bridge = gateway.ws_connect("/ws/bridge", "alice").await;
    next_json(&mut bridge).await;

    let resp = reqwest::Client::new()
        .get(gateway.url("/api/bridge/proxy/api/tags"))
        .bearer_auth(mint_token("alice"))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 504);
    assert_eq!(gateway.services.bridges.pending_count(), 0);
    drop(bridge);
}

#[tokio::test]
async fn bridge_ping_is_answered_and_status_lists_connection() {
    let gateway = TestGateway::start().await;
    let mut bridge = gateway.ws_connect_query("/ws/bridge", "alice").await;
    next_json(&mut bridge).await;

    send_json(&mut bridge, json!({"type": "ping", "id": "p1"})).await;
    let pong = next_json(&mut bridge).await;
    assert_eq!(pong["type"], "pong");
    assert_eq!(pong["id"], "p1");

    let status: Value = reqwest::Client::new()
        .get(gateway.url("/api/bridge/status"))
        .bearer_auth(mint_token("alice"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["connected"], true);
    assert_eq!(status["connections"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn unauthenticated_upgrade_is_refused() {
    let gateway = TestGateway::start().await;
    let result = tokio_tungstenite::connect_async(gateway.ws_url("/ws/bridge")).await;
    assert!(result.is_err());

    let bad = format!("{}?token=not-a-jwt", gateway.ws_url("/ws/bridge"));
    assert!(tokio_tungstenite::connect_async(bad).await.is_err());
    assert_eq!(gateway.services.bridges.connection_count(), 0);
}
