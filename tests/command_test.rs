mod common;

use common::{api_error, login, mount_login, ok, token};
use deyecloud_rs::command::CommandDispatcher;
use deyecloud_rs::model::{Command, ControlCommand, EnergyPattern, WorkMode};
use deyecloud_rs::session::SessionManager;
use deyecloud_rs::Error;
use serde_json::json;
use std::sync::Arc;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn dispatcher(server: &MockServer) -> (CommandDispatcher, Arc<SessionManager>) {
    let session = common::session(server);
    (
        CommandDispatcher::new(common::api(server), Arc::clone(&session)),
        session,
    )
}

#[tokio::test]
async fn work_mode_is_sent_with_bearer_token() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    Mock::given(method("POST"))
        .and(path("/order/sys/workMode/update"))
        .and(header("authorization", "Bearer token-1"))
        .and(body_json(json!({
            "deviceSn": "SN1",
            "workMode": "ZERO_EXPORT_TO_CT",
        })))
        .respond_with(ok(json!({ "orderId": 7 })))
        .expect(1)
        .mount(&server)
        .await;
    let (dispatcher, _) = dispatcher(&server);

    dispatcher
        .issue(&ControlCommand::new(
            "SN1",
            Command::WorkMode(WorkMode::ZeroExportToCt),
        ))
        .await
        .unwrap();
}

#[tokio::test]
async fn each_capability_hits_its_endpoint() {
    let server = MockServer::start().await;
    mount_login(&server).await;

    let cases = [
        (
            Command::ChargeMode(true),
            "/order/battery/modeControl",
            json!({ "deviceSn": "SN1", "chargeMode": true }),
        ),
        (
            Command::SolarSell(true),
            "/order/sys/solarSell/control",
            json!({ "deviceSn": "SN1", "action": "on" }),
        ),
        (
            Command::EnergyPattern(EnergyPattern::BatteryFirst),
            "/order/sys/energyPattern/update",
            json!({ "deviceSn": "SN1", "energyPattern": "BATTERY_FIRST" }),
        ),
        (
            Command::MaxSellPower(5000),
            "/order/sys/power/update",
            json!({ "deviceSn": "SN1", "powerType": "MAX_SELL_POWER", "value": 5000 }),
        ),
        (
            Command::MaxChargeCurrent(60),
            "/order/battery/parameter/update",
            json!({ "deviceSn": "SN1", "parameterType": "MAX_CHARGE_CURRENT", "value": 60 }),
        ),
    ];
    for (_, endpoint, body) in &cases {
        Mock::given(method("POST"))
            .and(path(*endpoint))
            .and(body_json(body))
            .respond_with(ok(json!({ "orderId": 1 })))
            .expect(1)
            .mount(&server)
            .await;
    }
    let (dispatcher, _) = dispatcher(&server);

    for (command, _, _) in cases {
        dispatcher
            .issue(&ControlCommand::new("SN1", command))
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn rejected_command_is_a_command_error() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    Mock::given(method("POST"))
        .and(path("/order/battery/modeControl"))
        .respond_with(api_error("2101040", "device offline"))
        .mount(&server)
        .await;
    let (dispatcher, session) = dispatcher(&server);

    let error = dispatcher
        .issue(&ControlCommand::new("SN1", Command::ChargeMode(false)))
        .await
        .unwrap_err();

    match &error {
        Error::Command {
            device_sn,
            command,
            reason,
        } => {
            assert_eq!("SN1", device_sn);
            assert_eq!("charge mode", *command);
            assert!(matches!(**reason, Error::Api { ref code, .. } if code == "2101040"));
        }
        other => panic!("unexpected {:?}", other),
    }
    assert!(!error.is_auth());
    assert!(session.has_valid_token());
}

#[tokio::test]
async fn out_of_range_value_never_reaches_the_api() {
    let server = MockServer::start().await;
    login()
        .respond_with(token("token-1", 3600))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ok(json!({})))
        .expect(0)
        .mount(&server)
        .await;
    let (dispatcher, _) = dispatcher(&server);

    let error = dispatcher
        .issue(&ControlCommand::new("SN1", Command::MaxDischargeCurrent(500)))
        .await
        .unwrap_err();
    assert!(matches!(error, Error::InvalidCommand(_)), "got: {:?}", error);
}

#[tokio::test]
async fn unauthorized_command_drops_the_token() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    Mock::given(method("POST"))
        .and(path("/order/sys/solarSell/control"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    let (dispatcher, session) = dispatcher(&server);

    let error = dispatcher
        .issue(&ControlCommand::new("SN1", Command::SolarSell(false)))
        .await
        .unwrap_err();

    assert!(error.is_auth(), "got: {:?}", error);
    assert!(!session.has_valid_token());
}
