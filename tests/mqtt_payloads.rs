// Wire-format tests for the discovery and state topics. Payloads are built
// through the public builders and inspected as plain JSON, independent of
// how the hub consumes them.

use alarmdealer2mqtt_lib::alarmdealer::SystemStatus;
use alarmdealer2mqtt_lib::mqtt::{attributes_payload, discovery_payload, state_payload};
use serde_json::json;

fn status_with(raw: &str, connected: bool) -> SystemStatus {
    serde_json::from_value(json!({
        "status": raw,
        "connected": connected,
        "last_update": "2026-08-30T12:00:00Z",
    }))
    .expect("valid status snapshot")
}

#[test]
fn discovery_without_code() {
    let payload = discovery_payload("AlarmDealer", false, "alarmdealer2mqtt/alarmdealer");
    assert_eq!(payload["name"], "AlarmDealer");
    assert_eq!(payload["unique_id"], "alarmdealer_panel");
    assert_eq!(payload["code_arm_required"], false);
    assert_eq!(payload["code_disarm_required"], false);
    assert_eq!(
        payload["command_topic"],
        "alarmdealer2mqtt/alarmdealer/command"
    );
    assert_eq!(payload["state_topic"], "alarmdealer2mqtt/alarmdealer/state");
    assert_eq!(
        payload["availability"][0]["topic"],
        "alarmdealer2mqtt/alarmdealer/availability"
    );
    assert_eq!(
        payload["json_attributes_topic"],
        "alarmdealer2mqtt/alarmdealer/attributes"
    );
    assert!(payload.get("code").is_none());
    assert!(payload.get("command_template").is_none());
    assert_eq!(payload["device"]["mf"], "AlarmDealer");
}

#[test]
fn discovery_with_code_enables_pin_gate() {
    let payload = discovery_payload("Lake House Panel", true, "alarmdealer2mqtt/lake_house_panel");
    assert_eq!(payload["unique_id"], "lake_house_panel_panel");
    assert_eq!(payload["code_arm_required"], true);
    assert_eq!(payload["code_disarm_required"], true);
    assert_eq!(payload["code"], "REMOTE_CODE");
    let template = payload["command_template"].as_str().expect("template set");
    assert!(template.contains("{{ action }}"));
    assert!(template.contains("{{ code }}"));
}

#[test]
fn state_payload_maps_known_statuses() {
    let cases = [
        ("System is Ready to Arm", "disarmed"),
        ("System Armed in Stay Mode", "armed_home"),
        ("System Armed in Away Mode", "armed_away"),
        ("FC Trouble", "unknown"),
    ];
    for (raw, expected) in cases {
        let payload = state_payload(&status_with(raw, true));
        assert_eq!(payload["state"], expected, "for raw status {:?}", raw);
    }
}

#[test]
fn attributes_expose_raw_status() {
    let status = status_with("System Armed in Stay Mode", true);
    let payload = attributes_payload(&status);
    assert_eq!(payload["status"], "System Armed in Stay Mode");
    assert_eq!(payload["connected"], true);
    assert!(payload["last_updated"].is_string());
}
