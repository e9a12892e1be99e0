#![allow(dead_code)]

use deyecloud_rs::api;
use deyecloud_rs::config::Settings;
use deyecloud_rs::coordinator::{Coordinator, CoordinatorOptions};
use deyecloud_rs::model::{Api, Credentials};
use deyecloud_rs::session::SessionManager;
use secrecy::SecretString;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockBuilder, MockServer, ResponseTemplate};

pub const MARGIN: Duration = Duration::from_secs(60);

pub fn api(server: &MockServer) -> Api {
    api::api(server.uri(), Duration::from_secs(5)).unwrap()
}

pub fn credentials(server: &MockServer) -> Credentials {
    Credentials {
        api_url: server.uri(),
        app_id: "app".to_string(),
        app_secret: SecretString::from("app-secret".to_string()),
        email: "owner@example.com".to_string(),
        password: SecretString::from("hunter2".to_string()),
    }
}

pub fn settings(server: &MockServer) -> Settings {
    Settings {
        region: "eu".to_string(),
        api_url: Some(server.uri()),
        app_id: "app".to_string(),
        app_secret: SecretString::from("app-secret".to_string()),
        email: "owner@example.com".to_string(),
        password: SecretString::from("hunter2".to_string()),
        interval: 60,
        failure_threshold: 3,
        timeout: 5,
        token_refresh_margin: 60,
    }
}

pub fn session(server: &MockServer) -> Arc<SessionManager> {
    Arc::new(SessionManager::new(api(server), credentials(server), MARGIN))
}

pub fn coordinator(server: &MockServer, failure_threshold: u32) -> Arc<Coordinator> {
    Arc::new(Coordinator::new(
        session(server),
        api(server),
        CoordinatorOptions::new(Duration::from_secs(60), failure_threshold),
    ))
}

/// A successful API response carrying `body`'s fields.
pub fn ok(mut body: Value) -> ResponseTemplate {
    body["code"] = json!("1000000");
    body["msg"] = json!("success");
    body["success"] = json!(true);
    ResponseTemplate::new(200).set_body_json(body)
}

/// An HTTP 200 response carrying an API error code.
pub fn api_error(code: &str, msg: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "code": code,
        "msg": msg,
        "success": false,
    }))
}

pub fn login() -> MockBuilder {
    Mock::given(method("POST"))
        .and(path("/account/token"))
        .and(query_param("appId", "app"))
}

pub fn token(access_token: &str, expires_in: u64) -> ResponseTemplate {
    ok(json!({
        "accessToken": access_token,
        "tokenType": "bearer",
        "expiresIn": expires_in.to_string(),
    }))
}

pub async fn mount_login(server: &MockServer) {
    login()
        .respond_with(token("token-1", 5_183_999))
        .mount(server)
        .await;
}

pub fn station_list() -> MockBuilder {
    Mock::given(method("POST")).and(path("/station/list"))
}

pub fn station_latest(station_id: &str) -> MockBuilder {
    Mock::given(method("POST"))
        .and(path("/station/latest"))
        .and(body_partial_json(json!({ "stationId": station_id })))
}

pub fn station_devices(station_id: &str) -> MockBuilder {
    Mock::given(method("POST"))
        .and(path("/station/device"))
        .and(body_partial_json(json!({ "stationIds": [station_id] })))
}

pub fn device_latest(serials: &[&str]) -> MockBuilder {
    Mock::given(method("POST"))
        .and(path("/device/latest"))
        .and(body_partial_json(json!({ "deviceList": serials })))
}

pub fn stations(ids: &[&str]) -> ResponseTemplate {
    let list: Vec<Value> = ids
        .iter()
        .map(|id| json!({ "id": id, "name": format!("Site {}", id) }))
        .collect();
    ok(json!({ "total": ids.len(), "stationList": list }))
}

pub fn devices(station_id: &str, serials: &[&str]) -> ResponseTemplate {
    let list: Vec<Value> = serials
        .iter()
        .map(|sn| json!({ "deviceSn": sn, "deviceType": "INVERTER", "stationId": station_id }))
        .collect();
    ok(json!({ "total": serials.len(), "deviceListItems": list }))
}

/// Latest data for `serials`, each reporting `batterySOC`.
pub fn device_data(serials: &[&str], soc: i64) -> ResponseTemplate {
    let list: Vec<Value> = serials
        .iter()
        .map(|sn| {
            json!({
                "deviceSn": sn,
                "collectionTime": 1_700_000_000,
                "dataList": [
                    { "key": "batterySOC", "value": soc.to_string(), "unit": "%" },
                    { "key": "workMode", "value": "SELLING_FIRST" },
                ],
            })
        })
        .collect();
    ok(json!({ "deviceDataList": list }))
}

/// One station "S1" (12.5 kWh today) with one device "D1" (80% battery).
pub async fn mount_catalog(server: &MockServer) {
    station_list()
        .respond_with(stations(&["S1"]))
        .mount(server)
        .await;
    station_latest("S1")
        .respond_with(ok(json!({
            "generationValue": 12.5,
            "generationPower": 3200,
            "lastUpdateTime": 1_700_000_000,
        })))
        .mount(server)
        .await;
    station_devices("S1")
        .respond_with(devices("S1", &["D1"]))
        .mount(server)
        .await;
    device_latest(&["D1"])
        .respond_with(device_data(&["D1"], 80))
        .mount(server)
        .await;
}
