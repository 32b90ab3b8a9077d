use log::{debug, error, info, warn};
use rand::prelude::*;
use rumqttc::{AsyncClient, Event, EventLoop, LastWill, MqttOptions, QoS};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::{collections::HashMap, env::var, fs, sync::LazyLock, time::Duration};

use crate::alarmdealer::SystemStatus;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MQTTConfiguration {
    broker: String,
    port: u16,
    user: String,
    password: String,
    discovery_topic: String,
    pub topic_prefix: String,
}

const MQTT_CONFIG_FILE: &str = "data/mqtt.json";
pub static MQTT_CONFIG: LazyLock<MQTTConfiguration> = LazyLock::new(|| {
    let mqtt_broker = var("MQTT_BROKER");
    let mqtt_port = var("MQTT_PORT");
    let mqtt_user = var("MQTT_USER");
    let mqtt_password = var("MQTT_PASSWORD");
    let mqtt_discovery_topic = var("MQTT_DISCOVERY_TOPIC");
    let mqtt_topic_prefix = var("MQTT_TOPIC_PREFIX");
    if mqtt_broker.is_ok() && mqtt_port.is_ok() {
        let mqtt_config = MQTTConfiguration {
            broker: mqtt_broker.unwrap(),
            port: mqtt_port.unwrap().parse().unwrap_or(1883),
            user: mqtt_user.unwrap_or("".to_string()),
            password: mqtt_password.unwrap_or("".to_string()),
            discovery_topic: mqtt_discovery_topic.unwrap_or("homeassistant".to_string()),
            topic_prefix: mqtt_topic_prefix.unwrap_or("alarmdealer2mqtt".to_string()),
        };
        match serde_json::to_string(&mqtt_config) {
            Ok(content) => {
                if let Err(e) = fs::write(MQTT_CONFIG_FILE, content) {
                    error!("Failed to save MQTT configuration file: {}", e);
                }
            }
            Err(e) => {
                error!("Failed to serialize MQTT configuration: {}", e);
            }
        }
        mqtt_config
    } else {
        match fs::read_to_string(MQTT_CONFIG_FILE) {
            Ok(content) => match serde_json::from_str::<MQTTConfiguration>(&content) {
                Ok(config) => config,
                Err(e) => {
                    error!("Failed to parse MQTT configuration file: {}", e);
                    MQTTConfiguration::fallback()
                }
            },
            Err(e) => {
                error!("Failed to read MQTT configuration file: {}", e);
                MQTTConfiguration::fallback()
            }
        }
    }
});

impl MQTTConfiguration {
    fn fallback() -> Self {
        MQTTConfiguration {
            broker: "localhost".to_string(),
            port: 1883,
            user: "".to_string(),
            password: "".to_string(),
            discovery_topic: "homeassistant".to_string(),
            topic_prefix: "alarmdealer2mqtt".to_string(),
        }
    }
}

pub const QOS: QoS = QoS::AtMostOnce;

/// Availability topic under a bridge topic prefix. The same topic feeds the
/// discovery payload, the state publishes, and the broker last-will, so the
/// hub always watches the topic the broker writes to.
pub fn availability_topic(topic_prefix: &str) -> String {
    format!("{}/availability", topic_prefix)
}

pub async fn setup(topic_prefix: &str) -> Result<(AsyncClient, EventLoop), Box<dyn std::error::Error>> {
    info!("Setting up MQTT client");
    // randomize the client id 6 alphanumeric characters
    let id: String = rand::rng()
        .sample_iter(rand::distr::Alphanumeric)
        .take(6)
        .map(char::from)
        .collect();
    let id = format!("alarmdealer2mqtt-{}", id);
    let mut mqttoptions = MqttOptions::new(id, &*MQTT_CONFIG.broker, MQTT_CONFIG.port);
    mqttoptions.set_keep_alive(Duration::from_secs(10));
    mqttoptions.set_credentials(&*MQTT_CONFIG.user, &*MQTT_CONFIG.password);
    // The in-process offline publish on shutdown is only queued; the will
    // makes the broker mark the panel offline once the connection drops.
    mqttoptions.set_last_will(LastWill::new(
        availability_topic(topic_prefix),
        "offline",
        QOS,
        true,
    ));

    let (client, eventloop) = AsyncClient::new(mqttoptions, 10);
    info!("Connected to MQTT broker");
    Ok((client, eventloop))
}

pub async fn parse_payload(event: Event) -> Result<Value, Box<dyn std::error::Error>> {
    match event {
        Event::Incoming(incoming) => match incoming {
            rumqttc::Packet::Publish(publish) => {
                debug!("Received message on topic: {}", publish.topic);
                debug!("Payload: {:?}", publish.payload);
                let payload = String::from_utf8_lossy(&publish.payload);
                let value: Value = json!({
                    "topic": publish.topic,
                    "payload": payload,
                });
                Ok(value)
            }
            _ => Ok(Value::Null),
        },
        _ => Ok(Value::Null),
    }
}

/// Commands accepted on the command topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanelCommand {
    ArmHome,
    ArmAway,
    Disarm,
}

impl PanelCommand {
    pub fn action_name(&self) -> &'static str {
        match self {
            PanelCommand::ArmHome => "arming home",
            PanelCommand::ArmAway => "arming away",
            PanelCommand::Disarm => "disarming",
        }
    }
    fn from_action(action: &str) -> Option<Self> {
        match action {
            "ARM_HOME" => Some(PanelCommand::ArmHome),
            "ARM_AWAY" => Some(PanelCommand::ArmAway),
            "DISARM" => Some(PanelCommand::Disarm),
            _ => None,
        }
    }
}

/// Parse a command payload. The payload is either a bare action string, or
/// (when the hub prompts for a code) a JSON object `{"action", "code"}`
/// produced by the discovery command template.
pub fn parse_command(payload: &str) -> Option<(PanelCommand, Option<String>)> {
    if let Ok(value) = serde_json::from_str::<Value>(payload) {
        if value.is_object() {
            let command = PanelCommand::from_action(value["action"].as_str()?)?;
            let code = value["code"]
                .as_str()
                .filter(|c| !c.is_empty() && *c != "None")
                .map(|c| c.to_string());
            return Some((command, code));
        }
    }
    PanelCommand::from_action(payload.trim()).map(|command| (command, None))
}

/// The optional PIN gate: commands pass when no code is configured, or when
/// the supplied code matches the configured one.
pub fn validate_code(configured: Option<&str>, given: Option<&str>, action: &str) -> bool {
    let check = match configured {
        None => true,
        Some(configured) => given == Some(configured),
    };
    if !check {
        warn!("Wrong code entered for {}", action);
    }
    check
}

/// Topic-safe identifier derived from the configured panel name.
pub fn slugify(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_us = false;
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
            last_us = false;
        } else if !last_us && !out.is_empty() {
            out.push('_');
            last_us = true;
        }
    }
    let out = out.trim_matches('_').to_string();
    if out.is_empty() {
        "alarmdealer".to_string()
    } else {
        out
    }
}

pub fn discovery_payload(name: &str, code_required: bool, topic_prefix: &str) -> Value {
    let slug = slugify(name);
    let device = json!({
        "ids": slug,
        "name": name,
        "sw": "ALARMDEALER2MQTT 0.1",
        "mdl": "Web Portal Keypad",
        "mf": "AlarmDealer",
    });
    let availability = json!(
        [{"topic": availability_topic(topic_prefix), "value_template": "{{ value }}"}]
    );
    let mut payload = json!({
        "availability": availability,
        "name": name,
        "unique_id": format!("{}_panel", slug),
        "code_arm_required": code_required,
        "code_disarm_required": code_required,
        "code_trigger_required": false,
        "command_topic": format!("{}/command", topic_prefix),
        "icon": "mdi:shield",
        "state_topic": format!("{}/state", topic_prefix),
        "value_template": "{{ value_json.state if (value_json is defined and value_json.state is defined) else None }}",
        "supported_features": ["arm_home", "arm_away"],
        "json_attributes_topic": format!("{}/attributes", topic_prefix),
        "json_attributes_template": "{{ value }}",
        "device": device,
    });
    if code_required {
        // The hub prompts for the code and the bridge validates it.
        payload["code"] = json!("REMOTE_CODE");
        payload["command_template"] =
            json!("{\"action\": \"{{ action }}\", \"code\": \"{{ code }}\"}");
    }
    payload
}

pub fn attributes_payload(alarm_status: &SystemStatus) -> Value {
    json!({
        "status": alarm_status.status(),
        "connected": alarm_status.connected(),
        "last_updated": alarm_status.last_update(),
    })
}

pub fn state_payload(alarm_status: &SystemStatus) -> Value {
    json!({
        "state": alarm_status.state().wire_name(),
    })
}

pub async fn publish_discovery(
    client: &AsyncClient,
    alarm_status: &SystemStatus,
    name: &str,
    code_required: bool,
    topic_prefix: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    info!("Publishing discovery");
    let slug = slugify(name);
    let mut payload_map: HashMap<String, String> = HashMap::new();
    payload_map.insert(
        availability_topic(topic_prefix),
        if alarm_status.connected() {
            "online"
        } else {
            "offline"
        }
        .to_string(),
    );
    payload_map.insert(
        format!(
            "{}/alarm_control_panel/{}_{}/config",
            &*MQTT_CONFIG.discovery_topic, &slug, "panel"
        ),
        discovery_payload(name, code_required, topic_prefix).to_string(),
    );
    for (topic, payload) in payload_map.iter() {
        debug!("Publishing: {} => {}", topic, payload);
        match client.publish(topic, QOS, true, payload.to_string()).await {
            Ok(_) => {
                debug!("Published: {} => {}", topic, payload);
            }
            Err(e) => {
                error!("Failed to publish discovery: {}", e);
            }
        }
    }
    info!("Discovery published");
    Ok(())
}

pub async fn publish_state(
    client: &AsyncClient,
    alarm_status: &SystemStatus,
    topic_prefix: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    info!("Publishing state");
    let mut payload_map: HashMap<String, String> = HashMap::new();
    payload_map.insert(
        availability_topic(topic_prefix),
        if alarm_status.connected() {
            "online"
        } else {
            "offline"
        }
        .to_string(),
    );
    payload_map.insert(
        format!("{}/attributes", topic_prefix),
        attributes_payload(alarm_status).to_string(),
    );
    payload_map.insert(
        format!("{}/state", topic_prefix),
        state_payload(alarm_status).to_string(),
    );
    for (topic, payload) in payload_map.iter() {
        debug!("Publishing: {} => {}", topic, payload);
        match client.publish(topic, QOS, true, payload.to_string()).await {
            Ok(_) => {
                debug!("Published: {} => {}", topic, payload);
            }
            Err(e) => {
                error!("Failed to publish state: {}", e);
            }
        }
    }
    info!("State published");
    Ok(())
}

pub async fn publish_offline(
    client: &AsyncClient,
    topic_prefix: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    client
        .publish(availability_topic(topic_prefix), QOS, true, "offline")
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_actions() {
        assert_eq!(parse_command("ARM_HOME"), Some((PanelCommand::ArmHome, None)));
        assert_eq!(parse_command("ARM_AWAY"), Some((PanelCommand::ArmAway, None)));
        assert_eq!(parse_command("DISARM"), Some((PanelCommand::Disarm, None)));
        assert_eq!(parse_command("PANIC"), None);
    }

    #[test]
    fn parses_templated_payload_with_code() {
        assert_eq!(
            parse_command("{\"action\": \"DISARM\", \"code\": \"1234\"}"),
            Some((PanelCommand::Disarm, Some("1234".to_string())))
        );
        // The hub renders an absent code as "None" through the template.
        assert_eq!(
            parse_command("{\"action\": \"ARM_AWAY\", \"code\": \"None\"}"),
            Some((PanelCommand::ArmAway, None))
        );
        assert_eq!(parse_command("{\"code\": \"1234\"}"), None);
    }

    #[test]
    fn code_gate_open_without_configured_code() {
        assert!(validate_code(None, None, "disarming"));
        assert!(validate_code(None, Some("9999"), "disarming"));
    }

    #[test]
    fn code_gate_requires_exact_match() {
        assert!(validate_code(Some("1234"), Some("1234"), "arming home"));
        assert!(!validate_code(Some("1234"), Some("4321"), "arming home"));
        assert!(!validate_code(Some("1234"), None, "arming home"));
    }

    #[test]
    fn will_topic_matches_published_availability() {
        // The discovery payload points the hub at the same topic the
        // broker's last-will writes to.
        let prefix = "alarmdealer2mqtt/alarmdealer";
        let advertised = discovery_payload("AlarmDealer", false, prefix)["availability"][0]
            ["topic"]
            .as_str()
            .map(|t| t.to_string());
        assert_eq!(advertised.as_deref(), Some(availability_topic(prefix).as_str()));
        assert_eq!(
            availability_topic(prefix),
            "alarmdealer2mqtt/alarmdealer/availability"
        );
    }

    #[test]
    fn slugifies_names() {
        assert_eq!(slugify("AlarmDealer"), "alarmdealer");
        assert_eq!(slugify("Lake House Panel"), "lake_house_panel");
        assert_eq!(slugify("  ??  "), "alarmdealer");
    }
}
