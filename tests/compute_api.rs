//! Compute unit routes and admin surface against the in-memory runtime.

mod common;

use common::{TestGateway, ADMIN_KEY};
use serde_json::Value;

#[tokio::test]
async fn provision_is_idempotent_under_concurrency() {
    let gateway = TestGateway::start().await;
    let alice = gateway.sdk("alice");

    let (a, b) = tokio::join!(alice.provision(), alice.provision());
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(a.container_id, b.container_id);
    assert_eq!(a.status, "running");
    assert_eq!(gateway.runtime.create_calls(), 1);
    assert_eq!(gateway.services.compute.unit_count(), 1);

    let status = alice.compute_status().await.unwrap();
    assert_eq!(status.status, "running");
    assert_eq!(status.unit.unwrap().unit_id, a.unit_id);
}

#[tokio::test]
async fn terminate_removes_unit_and_network() {
    let gateway = TestGateway::start().await;
    let alice = gateway.sdk("alice");

    alice.provision().await.unwrap();
    assert_eq!(gateway.runtime.network_count(), 1);

    let outcome = alice.terminate().await.unwrap();
    assert!(outcome.terminated);
    assert!(outcome.network_removed);
    assert_eq!(gateway.runtime.container_count(), 0);
    assert_eq!(gateway.runtime.network_count(), 0);

    assert_eq!(alice.compute_status().await.unwrap().status, "not-found");
    assert_eq!(alice.terminate().await.unwrap_err().status(), Some(404));
}

#[tokio::test]
async fn activity_requires_a_unit() {
    let gateway = TestGateway::start().await;
    let alice = gateway.sdk("alice");

    assert_eq!(alice.touch().await.unwrap_err().status(), Some(404));
    alice.provision().await.unwrap();
    alice.touch().await.unwrap();
}

#[tokio::test]
async fn tenants_get_separate_units() {
    let gateway = TestGateway::start().await;
    let alice = gateway.sdk("alice").provision().await.unwrap();
    let bob = gateway.sdk("bob").provision().await.unwrap();

    assert_ne!(alice.unit_id, bob.unit_id);
    assert_ne!(alice.network_name, bob.network_name);
    assert_eq!(gateway.runtime.container_count(), 2);
}

#[tokio::test]
async fn admin_routes_report_and_bulk_terminate() {
    let gateway = TestGateway::start().await;
    gateway.sdk("alice").provision().await.unwrap();
    gateway.sdk("bob").provision().await.unwrap();
    let client = reqwest::Client::new();

    let denied = client.get(gateway.url("/admin/status")).send().await.unwrap();
    assert_eq!(denied.status(), 401);

    let status: Value = client
        .get(gateway.url("/admin/status"))
        .bearer_auth(ADMIN_KEY)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["computeUnits"], 2);
    assert_eq!(status["bridgeConnections"], 0);

    let result: Value = client
        .post(gateway.url("/admin/compute/terminate-all"))
        .bearer_auth(ADMIN_KEY)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(result["attempted"], 2);
    assert_eq!(result["terminated"], 2);
    assert_eq!(result["failed"], 0);
    assert_eq!(gateway.services.compute.unit_count(), 0);
}

#[tokio::test]
async fn health_endpoint_is_public() {
    let gateway = TestGateway::start().await;
    let body: Value = reqwest::get(gateway.url("/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
}
