// Control-plane surface tests: a real listener on an ephemeral port,
// driven with reqwest.

use std::net::SocketAddr;

use serde_json::{json, Value};

use lorasim_core::Pool;

async fn spawn_server() -> (SocketAddr, reqwest::Client) {
    let pool = Pool::new();
    let app = lorasim_server::router(pool);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (addr, reqwest::Client::new())
}

fn url(addr: SocketAddr, path: &str) -> String {
    format!("http://{addr}{path}")
}

#[tokio::test]
async fn network_server_crud_roundtrip() {
    let (addr, client) = spawn_server().await;

    // Empty listing to start.
    let response = client.get(url(addr, "/network-servers")).send().await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.json::<Value>().await.unwrap(), json!([]));

    // Create.
    let response = client
        .post(url(addr, "/network-servers"))
        .json(&json!({"name": "test", "config": {"type": "generic"}}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["name"], "test");
    assert_eq!(body["deviceCount"], 0);
    assert_eq!(body["gatewayCount"], 0);

    // Duplicate name conflicts.
    let response = client
        .post(url(addr, "/network-servers"))
        .json(&json!({"name": "test", "config": {"type": "generic"}}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 409);

    // Fetch and delete.
    let response = client.get(url(addr, "/network-servers/test")).send().await.unwrap();
    assert_eq!(response.status(), 200);
    let response = client
        .delete(url(addr, "/network-servers/test"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 204);
    let response = client.get(url(addr, "/network-servers/test")).send().await.unwrap();
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn device_lifecycle_over_http() {
    let (addr, client) = spawn_server().await;
    client
        .post(url(addr, "/network-servers"))
        .json(&json!({"name": "ns", "config": {"type": "generic"}}))
        .send()
        .await
        .unwrap();

    // Bad EUI text is a 400.
    let response = client
        .post(url(addr, "/network-servers/ns/devices"))
        .json(&json!({
            "devEui": "zz",
            "joinEui": "1112131415161718",
            "appKey": "00112233445566778899aabbccddeeff"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    // Create with optional session state.
    let response = client
        .post(url(addr, "/network-servers/ns/devices"))
        .json(&json!({
            "devEui": "0102030405060708",
            "joinEui": "1112131415161718",
            "appKey": "00112233445566778899aabbccddeeff",
            "devNonce": 100,
            "devAddr": "01020304",
            "latitude": 45.0,
            "longitude": 9.0
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["devEui"], "0102030405060708");
    assert_eq!(body["devNonce"], 100);
    assert_eq!(body["devAddr"], "01020304");
    assert_eq!(body["location"]["latitude"], 45.0);

    // Duplicate EUI conflicts.
    let response = client
        .post(url(addr, "/network-servers/ns/devices"))
        .json(&json!({
            "devEui": "0102030405060708",
            "joinEui": "1112131415161718",
            "appKey": "00112233445566778899aabbccddeeff"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 409);

    // Join advances the nonce even with no gateway connected.
    let response = client
        .post(url(addr, "/network-servers/ns/devices/0102030405060708/join"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 204);
    let listing: Value = client
        .get(url(addr, "/network-servers/ns/devices"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listing[0]["devNonce"], 101);

    // Uplink entry point works and bumps FCntUp.
    let response = client
        .post(url(addr, "/network-servers/ns/devices/0102030405060708/uplink"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 204);

    // Remove, then the device is gone.
    let response = client
        .delete(url(addr, "/network-servers/ns/devices/0102030405060708"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 204);
    let response = client
        .get(url(addr, "/network-servers/ns/devices/0102030405060708"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn gateway_routes_validate_state() {
    let (addr, client) = spawn_server().await;
    client
        .post(url(addr, "/network-servers"))
        .json(&json!({"name": "ns", "config": {"type": "generic"}}))
        .send()
        .await
        .unwrap();

    let response = client
        .post(url(addr, "/network-servers/ns/gateways"))
        .json(&json!({
            "eui": "aabbccddeeff0011",
            "discoveryUri": "ws://127.0.0.1:9"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["eui"], "aabbccddeeff0011");
    assert_eq!(body["dataState"], "disconnected");

    // Disconnecting a never-connected gateway conflicts.
    let response = client
        .post(url(addr, "/network-servers/ns/gateways/aabbccddeeff0011/disconnect"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 409);

    // Unknown network server and unknown gateway are 404s.
    let response = client
        .get(url(addr, "/network-servers/nope/gateways"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
    let response = client
        .get(url(addr, "/network-servers/ns/gateways/0000000000000001"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
}
