mod common;

use actix_web::{
    App,
    http::StatusCode,
    test,
    web::{self, Data},
};
use common::*;
use hotspot_ui::{api::Api, hotspot::Configuration, services::apply::RecoveryPolicy};
use serde_json::{Value, json};
use std::{net::SocketAddr, sync::Arc, time::Duration};

type TestApi = Api<FakeApplier, MemoryStore, FakeStatus, FakeDevices>;

fn api(stored: Configuration, trust_proxy_headers: bool) -> (TestApi, Harness) {
    let harness = Harness::with(
        stored,
        RecoveryPolicy {
            interval: Duration::from_millis(10),
            window: Duration::from_secs(2),
        },
        Duration::ZERO,
    );

    let api = Api {
        coordinator: harness.coordinator.clone(),
        prober: harness.prober.clone(),
        store: Arc::new(harness.store.clone()),
        devices: Arc::new(FakeDevices(vec!["wlan0".to_string()])),
        risk: harness.risk.clone(),
        trust_proxy_headers,
    };

    (api, harness)
}

macro_rules! service {
    ($api:expr) => {
        test::init_service(
            App::new()
                .app_data(Data::new($api))
                .route("/settings", web::get().to(TestApi::settings))
                .route("/settings", web::put().to(TestApi::apply_settings))
                .route("/status", web::get().to(TestApi::status))
                .route("/devices", web::get().to(TestApi::devices))
                .route("/apply/history", web::get().to(TestApi::apply_history)),
        )
        .await
    };
}

fn peer(ip: &str) -> SocketAddr {
    SocketAddr::new(ip.parse().unwrap(), 50123)
}

fn settings_body(channel: i64) -> Value {
    json!({
        "configuration": {
            "radio": { "enabled": true, "device": "wlan0", "channel": channel },
            "profiles": [{ "id": "party", "ssid": "Party" }]
        }
    })
}

fn stored_hotspot() -> Configuration {
    serde_json::from_value(settings_body(1)["configuration"].clone()).unwrap()
}

#[actix_web::test]
async fn hotspot_client_confirms_channel_change() {
    let (api, harness) = api(stored_hotspot(), false);
    let app = service!(api);

    let req = test::TestRequest::put()
        .uri("/settings")
        .peer_addr(peer(HOTSPOT_CLIENT))
        .set_json(settings_body(6))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);

    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["state"], "pendingConfirmation");
    assert_eq!(body["change"]["kind"], "disruptive");
    assert_eq!(harness.store.saves(), 0);

    let mut confirmed = settings_body(6);
    confirmed["confirmed"] = json!(true);
    let req = test::TestRequest::put()
        .uri("/settings")
        .peer_addr(peer(HOTSPOT_CLIENT))
        .set_json(confirmed)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["state"], "applied");
    assert_eq!(body["status"]["running"], true);
    assert_eq!(harness.store.stored().radio.channel, 6);
    assert_eq!(harness.store.saves(), 1);
}

#[actix_web::test]
async fn invalid_settings_list_offending_fields() {
    let (api, harness) = api(Configuration::default(), false);
    let app = service!(api);

    let req = test::TestRequest::put()
        .uri("/settings")
        .peer_addr(peer(WIRED_CLIENT))
        .set_json(json!({
            "configuration": {
                "radio": { "enabled": true, "device": "", "channel": 14 },
                "profiles": [{ "ssid": "Party", "passphrase": "short" }]
            }
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let body: Value = test::read_body_json(resp).await;
    let fields: Vec<_> = body["errors"]
        .as_array()
        .unwrap()
        .iter()
        .map(|error| error["field"].as_str().unwrap().to_string())
        .collect();
    assert!(fields.contains(&"radio.device".to_string()));
    assert!(fields.contains(&"radio.channel".to_string()));
    assert!(fields.contains(&"profiles[0].passphrase".to_string()));
    assert_eq!(harness.applier.calls(), 0);
}

#[actix_web::test]
async fn channel_beyond_byte_range_is_a_field_error() {
    let (api, _harness) = api(Configuration::default(), false);
    let app = service!(api);

    for channel in [256, -1] {
        let req = test::TestRequest::put()
            .uri("/settings")
            .peer_addr(peer(WIRED_CLIENT))
            .set_json(settings_body(channel))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY, "{channel}");

        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["errors"][0]["field"], "radio.channel", "{channel}");
    }
}

#[actix_web::test]
async fn failed_apply_is_bad_gateway() {
    let (api, harness) = api(stored_hotspot(), false);
    harness.applier.fail();
    let app = service!(api);

    let req = test::TestRequest::put()
        .uri("/settings")
        .peer_addr(peer(WIRED_CLIENT))
        .set_json(settings_body(6))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);

    let req = test::TestRequest::get().uri("/apply/history").to_request();
    let history: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(history[0]["state"], "failed");
    assert_eq!(history[0]["device"], "wlan0");
}

#[actix_web::test]
async fn forwarded_address_is_used_only_when_trusted() {
    for (trusted, expected) in [(true, StatusCode::CONFLICT), (false, StatusCode::OK)] {
        let (api, _harness) = api(stored_hotspot(), trusted);
        let app = service!(api);

        let req = test::TestRequest::put()
            .uri("/settings")
            .peer_addr(peer("127.0.0.1"))
            .insert_header(("X-Forwarded-For", HOTSPOT_CLIENT))
            .set_json(settings_body(6))
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), expected, "trusted: {trusted}");
    }
}

#[actix_web::test]
async fn settings_view_flags_hotspot_session() {
    let (api, _harness) = api(stored_hotspot(), false);
    let app = service!(api);

    let req = test::TestRequest::get()
        .uri("/settings")
        .peer_addr(peer(HOTSPOT_CLIENT))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;

    assert_eq!(body["connectedThroughHotspot"], true);
    assert_eq!(body["configuration"]["radio"]["channel"], 1);
    assert_eq!(body["devices"]["devices"], json!(["wlan0"]));
    assert_eq!(body["devices"]["deviceMissing"], false);
    assert_eq!(body["status"]["mode"], "fast");
}

#[actix_web::test]
async fn status_probe_modes() {
    let (api, _harness) = api(stored_hotspot(), false);
    let app = service!(api);

    let req = test::TestRequest::get().uri("/status").to_request();
    let fast: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(fast["mode"], "fast");
    assert_eq!(fast["running"], true);

    let req = test::TestRequest::get().uri("/status?mode=full").to_request();
    let full: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(full["mode"], "full");
    assert_eq!(full["detail"]["link:mode"], "AP");
    assert_eq!(full["detail"]["profile:Party"], "not broadcasting");

    let req = test::TestRequest::get().uri("/status?mode=deep").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn device_listing_reports_missing_device() {
    let mut stored = stored_hotspot();
    stored.radio.device = "wlan1".to_string();
    let (api, _harness) = api(stored, false);
    let app = service!(api);

    let req = test::TestRequest::get().uri("/devices").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;

    assert_eq!(body["devices"], json!(["wlan0"]));
    assert_eq!(body["deviceMissing"], true);
}
