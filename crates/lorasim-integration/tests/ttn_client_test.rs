// Integration tests for `TtnClient` using wiremock.

use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use lorasim_integration::{Integration, TtnClient};

async fn setup() -> (MockServer, TtnClient) {
    let server = MockServer::start().await;
    let client = TtnClient::new(&server.uri(), "NNSXS.TESTKEY").unwrap();
    (server, client)
}

#[tokio::test]
async fn gateways_carry_bearer_headers() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/v3/gateways"))
        .and(header("Authorization", "Bearer NNSXS.TESTKEY"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "gateways": [
                {
                    "ids": {"gateway_id": "test-gw", "eui": "AABBCCDDEEFF0011"},
                    "antennas": [
                        {"location": {"latitude": 52.37, "longitude": 4.89}}
                    ]
                },
                {"ids": {"gateway_id": "no-eui"}}
            ]
        })))
        .mount(&server)
        .await;

    let gateways = client.list_gateways().await.unwrap();
    assert_eq!(gateways.len(), 1);
    let gw = &gateways[0];
    assert_eq!(gw.eui.to_string(), "aabbccddeeff0011");
    // The API key follows the gateway to its LNS dial.
    assert_eq!(
        gw.headers,
        vec![("Authorization".to_string(), "Bearer NNSXS.TESTKEY".to_string())]
    );
    assert!(gw.location.is_some());
}

#[tokio::test]
async fn devices_traverse_applications_and_tolerate_missing_session() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/v3/applications"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "applications": [{"ids": {"application_id": "app1"}}]
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/v3/applications/app1/devices"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "end_devices": [{
                "ids": {
                    "device_id": "dev-1",
                    "dev_eui": "0102030405060708",
                    "join_eui": "1112131415161718"
                },
                "locations": {
                    "user": {"latitude": 48.85, "longitude": 2.35},
                    "frm-payload": {"latitude": 1.0, "longitude": 1.0}
                }
            }]
        })))
        .mount(&server)
        .await;

    // NS registry has a session; AS/JS reads are forbidden.
    Mock::given(method("GET"))
        .and(path("/api/v3/ns/applications/app1/devices/dev-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "session": {
                "dev_addr": "260B1234",
                "keys": {"nwk_s_enc_key": {"key": "00112233445566778899AABBCCDDEEFF"}},
                "last_f_cnt_up": 10,
                "last_n_f_cnt_down": 3
            }
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v3/as/applications/app1/devices/dev-1"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let devices = client.list_devices().await.unwrap();
    assert_eq!(devices.len(), 1);
    let dev = &devices[0];
    assert_eq!(dev.dev_eui.to_string(), "0102030405060708");
    assert_eq!(dev.join_eui.to_string(), "1112131415161718");
    assert_eq!(dev.dev_addr.to_string(), "260b1234");
    assert_eq!(dev.nwk_s_key.to_string(), "00112233445566778899aabbccddeeff");
    assert_eq!(dev.fcnt_up, 10);
    assert_eq!(dev.fcnt_dn, 3);
    // AS read failed mid-way, so the app session key stays zero.
    assert!(dev.app_s_key.is_zero());
    // Operator-set location wins over frm-payload.
    assert_eq!(dev.location.unwrap().latitude, 48.85);
}
