#![allow(clippy::unwrap_used)]
// Integration tests for `BridgeClient` and N-UPnP discovery using wiremock.

use secrecy::ExposeSecret;
use serde_json::json;
use url::Url;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use hueflux_api::discovery::NupnpDiscovery;
use hueflux_api::{BridgeClient, Error, GroupLightState, Registration};

// ── Helpers ─────────────────────────────────────────────────────────

async fn setup() -> (MockServer, BridgeClient) {
    let server = MockServer::start().await;
    let base_url = Url::parse(&format!("{}/", server.uri())).unwrap();
    let client = BridgeClient::with_client(reqwest::Client::new(), base_url);
    (server, client)
}

const USER: &str = "8h5fWwLNnoqdXNK2ByHYtDOOM0aUPyhvAvl4VMz5";

// ── Config ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_small_config() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/config"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "Philips hue",
            "bridgeid": "001788FFFE1FFD08",
            "modelid": "BSB002",
            "apiversion": "1.41.0",
            "swversion": "1941132080",
            "mac": "00:17:88:1f:fd:08"
        })))
        .mount(&server)
        .await;

    let config = client.small_config().await.unwrap();
    assert_eq!(config.bridge_id, "001788FFFE1FFD08");
    assert_eq!(config.model_id, "BSB002");
    assert_eq!(config.api_version, "1.41.0");
    // Plain HTTP never yields a certificate.
    assert!(client.certificate_fingerprint().is_none());
}

// ── Push-link ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_register_pending_until_link_button() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/api"))
        .and(body_partial_json(json!({ "generateclientkey": true })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "error": { "type": 101, "address": "", "description": "link button not pressed" }
        }])))
        .mount(&server)
        .await;

    let outcome = client.register("hueflux#test").await.unwrap();
    assert!(matches!(outcome, Registration::Pending));
}

#[tokio::test]
async fn test_register_granted() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/api"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "success": { "username": USER, "clientkey": "E3B550C65F78022EFD9E52E28378583" }
        }])))
        .mount(&server)
        .await;

    match client.register("hueflux#test").await.unwrap() {
        Registration::Granted(creds) => {
            assert_eq!(creds.username, USER);
            assert_eq!(creds.client_key.expose_secret(), "E3B550C65F78022EFD9E52E28378583");
        }
        Registration::Pending => panic!("expected granted registration"),
    }
}

#[tokio::test]
async fn test_register_other_error() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/api"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "error": { "type": 7, "address": "/devicetype", "description": "invalid value" }
        }])))
        .mount(&server)
        .await;

    let result = client.register("x").await;
    assert!(
        matches!(result, Err(Error::BridgeApi { code: 7, .. })),
        "expected BridgeApi error, got: {result:?}"
    );
}

// ── Groups ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_groups_filters_entertainment_and_sorts() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path(format!("/api/{USER}/groups")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "10": {
                "name": "Living", "type": "Entertainment", "lights": ["1"],
                "locations": { "1": [0.0, 1.0, 0.0] }
            },
            "2": {
                "name": "TV", "type": "Entertainment", "lights": ["4", "5"],
                "locations": { "4": [-1.0, 1.0, 0.0], "5": [1.0, 1.0, 0.0] },
                "stream": { "active": false, "owner": null },
                "action": { "on": true, "bri": 120 }
            },
            "3": { "name": "Kitchen", "type": "Room", "lights": ["6"] }
        })))
        .mount(&server)
        .await;

    let groups = client.groups(USER).await.unwrap();
    let ids: Vec<&str> = groups.iter().map(|g| g.id.as_str()).collect();
    assert_eq!(ids, vec!["2", "10"]);
    assert_eq!(groups[0].lights.len(), 2);
    assert_eq!(
        groups[0].light_state,
        Some(GroupLightState {
            on: true,
            brightness: 120
        })
    );
    assert_eq!(groups[1].light_state, None);
}

#[tokio::test]
async fn test_groups_unauthorized_user() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/bogus/groups"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "error": { "type": 1, "address": "/", "description": "unauthorized user" }
        }])))
        .mount(&server)
        .await;

    let result = client.groups("bogus").await;
    assert!(matches!(result, Err(ref e) if e.is_unauthorized()), "got: {result:?}");
}

#[tokio::test]
async fn test_set_streaming() {
    let (server, client) = setup().await;

    Mock::given(method("PUT"))
        .and(path(format!("/api/{USER}/groups/2")))
        .and(body_partial_json(json!({ "stream": { "active": true } })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "success": { "/groups/2/stream/active": true }
        }])))
        .expect(1)
        .mount(&server)
        .await;

    client.set_streaming(USER, "2", true).await.unwrap();
}

#[tokio::test]
async fn test_server_error_is_transient() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/config"))
        .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
        .mount(&server)
        .await;

    let err = client.small_config().await.unwrap_err();
    assert!(err.is_transient(), "got: {err:?}");
}

// ── N-UPnP ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_nupnp_discovery() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": "001788FFFE1FFD08", "internalipaddress": "192.168.1.2", "port": 443 }
        ])))
        .mount(&server)
        .await;

    let discovery = NupnpDiscovery::with_client(
        reqwest::Client::new(),
        Url::parse(&format!("{}/", server.uri())).unwrap(),
    );
    let bridges = discovery.discover().await.unwrap();
    assert_eq!(bridges.len(), 1);
    assert_eq!(bridges[0].id.as_deref(), Some("001788fffe1ffd08"));
    assert_eq!(bridges[0].address, "192.168.1.2");
}
