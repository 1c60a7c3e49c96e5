//! Encrypted tunnel relay between a device and a container endpoint.

mod common;

use common::{eventually, next_json, send_json, TestGateway, WsStream};
use futures_util::SinkExt;
use inference_relay::crypto::EphemeralKeyPair;
use serde_json::json;

async fn exchange(ws: &mut WsStream, keys: &EphemeralKeyPair, role: &str) {
    send_json(
        ws,
        json!({"type": "keyExchange", "publicKey": keys.public_key_base64(), "role": role}),
    )
    .await;
}

#[tokio::test]
async fn endpoints_pair_and_relay_ciphertext() {
    let gateway = TestGateway::start().await;
    let device_keys = EphemeralKeyPair::generate();
    let container_keys = EphemeralKeyPair::generate();

    let mut device = gateway.ws_connect("/ws/tunnel", "alice").await;
    let mut container = gateway.ws_connect_query("/ws/tunnel", "alice").await;
    exchange(&mut container, &container_keys, "container").await;
    exchange(&mut device, &device_keys, "device").await;

    let at_device = next_json(&mut device).await;
    let at_container = next_json(&mut container).await;
    assert_eq!(at_device["type"], "sessionEstablished");
    assert_eq!(at_container["type"], "sessionEstablished");
    assert_eq!(at_device["sessionId"], at_container["sessionId"]);
    assert_eq!(at_device["publicKey"], container_keys.public_key_base64());
    assert_eq!(at_container["publicKey"], device_keys.public_key_base64());

    let device_cipher = device_keys
        .derive_session(at_device["publicKey"].as_str().unwrap())
        .unwrap();
    let container_cipher = container_keys
        .derive_session(at_container["publicKey"].as_str().unwrap())
        .unwrap();

    let envelope = device_cipher.seal(b"GET /api/tags").unwrap();
    send_json(
        &mut device,
        json!({"type": "encryptedData", "encryptedData": envelope}),
    )
    .await;

    let relayed = next_json(&mut container).await;
    assert_eq!(relayed["type"], "encryptedData");
    assert_eq!(relayed["encryptedData"], envelope);
    let plaintext = container_cipher
        .open(relayed["encryptedData"].as_str().unwrap())
        .unwrap();
    assert_eq!(plaintext, b"GET /api/tags");

    let reply = container_cipher.seal(b"{\"models\":[]}").unwrap();
    send_json(
        &mut container,
        json!({"type": "encryptedData", "encryptedData": reply, "sessionId": relayed["sessionId"]}),
    )
    .await;
    let back = next_json(&mut device).await;
    assert_eq!(
        device_cipher.open(back["encryptedData"].as_str().unwrap()).unwrap(),
        b"{\"models\":[]}"
    );
}

#[tokio::test]
async fn users_never_pair_across_tenants() {
    let gateway = TestGateway::start().await;
    let mut alice = gateway.ws_connect("/ws/tunnel", "alice").await;
    let mut bob = gateway.ws_connect("/ws/tunnel", "bob").await;

    exchange(&mut alice, &EphemeralKeyPair::generate(), "device").await;
    exchange(&mut bob, &EphemeralKeyPair::generate(), "container").await;

    send_json(&mut bob, json!({"type": "ping"})).await;
    assert_eq!(next_json(&mut bob).await["type"], "pong");
    send_json(&mut alice, json!({"type": "ping"})).await;
    assert_eq!(next_json(&mut alice).await["type"], "pong");
    assert_eq!(gateway.services.relay.stats().sessions, 0);
}

#[tokio::test]
async fn mismatched_user_and_bad_frames_get_errors() {
    let gateway = TestGateway::start().await;
    let mut ws = gateway.ws_connect("/ws/tunnel", "alice").await;

    send_json(
        &mut ws,
        json!({
            "type": "keyExchange",
            "publicKey": EphemeralKeyPair::generate().public_key_base64(),
            "userId": "mallory"
        }),
    )
    .await;
    assert_eq!(next_json(&mut ws).await["type"], "error");

    send_json(&mut ws, json!({"type": "keyExchange", "publicKey": "c2hvcnQ="})).await;
    assert_eq!(next_json(&mut ws).await["type"], "error");

    send_json(&mut ws, json!({"type": "teleport"})).await;
    let reply = next_json(&mut ws).await;
    assert_eq!(reply["type"], "error");
    assert_eq!(reply["message"], "malformed frame");
}

#[tokio::test]
async fn survivor_repairs_with_a_new_counterpart() {
    let gateway = TestGateway::start().await;
    let device_keys = EphemeralKeyPair::generate();

    let mut device = gateway.ws_connect("/ws/tunnel", "alice").await;
    exchange(&mut device, &device_keys, "device").await;

    let mut first = gateway.ws_connect("/ws/tunnel", "alice").await;
    exchange(&mut first, &EphemeralKeyPair::generate(), "container").await;
    let established = next_json(&mut device).await;
    assert_eq!(established["type"], "sessionEstablished");
    next_json(&mut first).await;

    first.close(None).await.unwrap();
    let relay = gateway.services.relay.clone();
    assert!(eventually(|| relay.stats().sessions == 0).await);

    let second_keys = EphemeralKeyPair::generate();
    let mut second = gateway.ws_connect("/ws/tunnel", "alice").await;
    exchange(&mut second, &second_keys, "container").await;

    let again = next_json(&mut device).await;
    assert_eq!(again["type"], "sessionEstablished");
    assert_eq!(again["publicKey"], second_keys.public_key_base64());
    assert_ne!(again["sessionId"], established["sessionId"]);
    assert_eq!(next_json(&mut second).await["type"], "sessionEstablished");
}
