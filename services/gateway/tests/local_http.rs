//! Local HTTP server end-to-end: route registration, redirect, statuses.

mod common;

use common::{fixture, table};
use gateway::local_http;

async fn start_server() -> (common::Fixture, std::net::SocketAddr) {
    let fx = fixture();
    let table = table(&fx);
    let addr = local_http::start("127.0.0.1:0", table).await.unwrap();
    (fx, addr)
}

#[tokio::test]
async fn echo_round_trips_over_http() {
    let (_fx, addr) = start_server().await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("http://{addr}/api/echo"))
        .body("Hello World!")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(
        response.headers()["content-type"].to_str().unwrap(),
        "application/json"
    );
    assert_eq!(response.text().await.unwrap(), r#"{"echo":"Hello World!"}"#);
}

#[tokio::test]
async fn root_redirects_to_system_info() {
    let (_fx, addr) = start_server().await;
    // reqwest follows the redirect by default.
    let response = reqwest::get(format!("http://{addr}/")).await.unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let json: serde_json::Value = response.json().await.unwrap();
    assert_eq!(json["zap"]["deviceId"], "egw-test-001");
}

#[tokio::test]
async fn wifi_path_serves_all_three_verbs() {
    let (fx, addr) = start_server().await;
    let client = reqwest::Client::new();
    let url = format!("http://{addr}/api/wifi");

    let get = client.get(&url).send().await.unwrap();
    assert_eq!(get.status().as_u16(), 200);

    let post = client
        .post(&url)
        .body(r#"{"ssid":"HomeNet","psk":"pw"}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(post.status().as_u16(), 200);
    assert!(fx.state.wifi.is_connected());

    let delete = client.delete(&url).send().await.unwrap();
    assert_eq!(delete.status().as_u16(), 200);
    assert!(fx.state.creds.load().is_none());
}

#[tokio::test]
async fn handler_status_codes_pass_through() {
    let (_fx, addr) = start_server().await;
    let client = reqwest::Client::new();

    // Missing credentials -> 400 from the handler.
    let response = client
        .post(format!("http://{addr}/api/wifi"))
        .body("{}")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 400);

    // No reading yet -> 404 from the handler.
    let response = reqwest::get(format!("http://{addr}/api/data/p1/obis"))
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 404);
}

#[tokio::test]
async fn unregistered_paths_are_not_served() {
    let (_fx, addr) = start_server().await;
    let response = reqwest::get(format!("http://{addr}/api/nothing"))
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 404);

    // Wrong verb on a registered path.
    let client = reqwest::Client::new();
    let response = client
        .get(format!("http://{addr}/api/echo"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 405);
}
