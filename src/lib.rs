#![recursion_limit = "256"]
pub mod alarmdealer;
pub mod logging;
pub mod mqtt;
pub mod scrape;

use alarmdealer::{PanelState, System, SystemStatus};
use log::{error, info};
use mqtt::{
    parse_command, parse_payload, publish_discovery, publish_offline, publish_state,
    setup as mqtt_setup, slugify, validate_code, PanelCommand, MQTT_CONFIG, QOS,
};
use std::{env::var, sync::LazyLock, time::Duration};
use tokio::{signal, sync::Mutex, time};

static REFRESH_INTERVAL: LazyLock<u64> = LazyLock::new(|| {
    var("REFRESH_INTERVAL")
        .unwrap_or("10".to_string())
        .parse()
        .unwrap_or(10)
});
static PANEL_NAME: LazyLock<String> =
    LazyLock::new(|| var("PANEL_NAME").unwrap_or("AlarmDealer".to_string()));
static USER_CODE: LazyLock<Option<String>> =
    LazyLock::new(|| var("USERCODE").ok().filter(|code| !code.is_empty()));
static MQTT_PUBLISH: LazyLock<Mutex<bool>> = LazyLock::new(|| Mutex::new(false));
static MQTT_CLIENT: LazyLock<Mutex<Option<rumqttc::AsyncClient>>> =
    LazyLock::new(|| Mutex::new(None));
static ALARM_SYSTEM: LazyLock<Mutex<Option<System>>> = LazyLock::new(|| Mutex::new(None));
static ALARM_SYSTEM_STATUS: LazyLock<Mutex<SystemStatus>> =
    LazyLock::new(|| Mutex::new(SystemStatus::default()));

fn topic_prefix() -> String {
    format!("{}/{}", &*MQTT_CONFIG.topic_prefix, slugify(&PANEL_NAME))
}

#[tokio::main]
pub async fn run() {
    let topic_prefix = topic_prefix();
    let (main_client, mut eventloop) = match mqtt_setup(&topic_prefix).await {
        Ok(pair) => pair,
        Err(e) => {
            error!("Failed to set up MQTT client: {}", e);
            panic!("Failed to set up MQTT client");
        }
    };
    *MQTT_CLIENT.lock().await = Some(main_client);
    setup().await;
    let alarm_status_clone = ALARM_SYSTEM_STATUS.lock().await.clone();
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(event) => {
                    handle_event(event).await;
                }
                Err(e) => {
                    error!("Error: {:?}", e);
                }
            }
        }
    });
    {
        let mutex_client = MQTT_CLIENT.lock().await;
        let client = mutex_client.as_ref().unwrap();
        match publish_discovery(
            client,
            &alarm_status_clone,
            &PANEL_NAME,
            USER_CODE.is_some(),
            &topic_prefix,
        )
        .await
        {
            Ok(_) => {
                info!("Discovery published");
            }
            Err(e) => {
                error!("Failed to publish discovery: {}", e);
            }
        }
        match client
            .subscribe(format!("{}/command", topic_prefix), QOS)
            .await
        {
            Ok(_) => info!("Subscribed to command topic"),
            Err(e) => {
                error!("Failed to subscribe to command topic: {}", e);
            }
        };
    }

    tokio::select! {
        _ = async {
            loop {
                update_alarm_system().await;
                if *MQTT_PUBLISH.lock().await {
                    publish_alarm_status().await;
                    *MQTT_PUBLISH.lock().await = false;
                }
                time::sleep(Duration::from_secs(*REFRESH_INTERVAL)).await;
            }
        } => {}
        _ = signal::ctrl_c() => {
            shutdown().await;
        }
    }
}

async fn setup() {
    let hostname = var("BASE_URL").unwrap_or_else(|_| {
        error!("No base URL found, use default");
        "www.alarmdealer.com".to_string()
    });
    let username = var("USERNAME").unwrap_or_else(|_| {
        error!("No username found, exiting");
        panic!("No username found");
    });
    let password = var("PASSWORD").unwrap_or_else(|_| {
        error!("No password found, exiting");
        panic!("No password found");
    });
    let mut alarm_system = System::new(&hostname, &username, &password);
    if let Err(e) = alarm_system.login().await {
        error!("Failed to log into alarmdealer.com, check credentials: {}", e);
        panic!("Failed to log into alarmdealer.com");
    }
    alarm_system.update_status().await;
    *ALARM_SYSTEM_STATUS.lock().await = alarm_system.get_status();
    *ALARM_SYSTEM.lock().await = Some(alarm_system);
    *MQTT_PUBLISH.lock().await = true;
}

async fn handle_event(event: rumqttc::Event) {
    let topic_prefix = topic_prefix();
    let payload = match parse_payload(event).await {
        Ok(payload) => payload,
        Err(e) => {
            error!("Failed to parse event: {}", e);
            return;
        }
    };
    if payload.is_null() {
        return;
    }
    match payload["topic"].as_str() {
        Some(topic) => {
            if topic == format!("{}/command", topic_prefix) {
                match payload["payload"].as_str() {
                    Some(payload) => match parse_command(payload) {
                        Some((command, code)) => {
                            handle_command(command, code.as_deref()).await;
                        }
                        None => {
                            error!("Unknown command payload: {}", payload);
                        }
                    },
                    None => {
                        error!("No payload found");
                    }
                }
            }
        }
        None => {
            error!("No topic found");
        }
    }
}

async fn handle_command(command: PanelCommand, code: Option<&str>) {
    let current_state = ALARM_SYSTEM_STATUS.lock().await.state();
    let target_state = match command {
        PanelCommand::ArmHome => PanelState::ArmedHome,
        PanelCommand::ArmAway => PanelState::ArmedAway,
        PanelCommand::Disarm => PanelState::Disarmed,
    };
    if current_state == target_state {
        info!("Already {}", target_state.wire_name());
        return;
    }
    if !validate_code(USER_CODE.as_deref(), code, command.action_name()) {
        return;
    }
    let mut alarm_system_lock = ALARM_SYSTEM.lock().await;
    let alarm_system = alarm_system_lock.as_mut().unwrap();
    let result = match command {
        PanelCommand::ArmHome => alarm_system.arm_home().await,
        PanelCommand::ArmAway => alarm_system.arm_away().await,
        PanelCommand::Disarm => alarm_system.disarm(code).await,
    };
    match result {
        Ok(_) => {
            info!("AlarmDealer alarm {}", command.action_name());
        }
        Err(e) => {
            error!("Failed {}: {}", command.action_name(), e);
        }
    }
    drop(alarm_system_lock);
    update_alarm_system().await;
    *MQTT_PUBLISH.lock().await = true;
}

async fn update_alarm_system() {
    info!("Updating alarm system");
    let mut alarm_system = ALARM_SYSTEM.lock().await;
    let alarm_system = alarm_system.as_mut().unwrap();
    alarm_system.update_status().await;
    let status = alarm_system.get_status();
    let mut snapshot = ALARM_SYSTEM_STATUS.lock().await;
    let dirty = status.changed_from(&snapshot);
    *snapshot = status;
    if dirty {
        *MQTT_PUBLISH.lock().await = true;
    }
}

async fn publish_alarm_status() {
    let alarm_status_lock = ALARM_SYSTEM_STATUS.lock().await;
    let topic_prefix = topic_prefix();
    let mutex_client = MQTT_CLIENT.lock().await;
    match mutex_client.as_ref() {
        Some(client) => {
            match publish_state(client, &alarm_status_lock, &topic_prefix).await {
                Ok(_) => {
                    info!("State published");
                }
                Err(e) => {
                    error!("Failed to publish state: {}", e);
                }
            };
        }
        None => {
            error!("No MQTT client available");
        }
    }
    drop(alarm_status_lock);
    drop(mutex_client);
}

async fn shutdown() {
    info!("Shutting down");
    let topic_prefix = topic_prefix();
    let mutex_client = MQTT_CLIENT.lock().await;
    if let Some(client) = mutex_client.as_ref() {
        if let Err(e) = publish_offline(client, &topic_prefix).await {
            error!("Failed to publish offline availability: {}", e);
        }
    }
    drop(mutex_client);
    let mut alarm_system_lock = ALARM_SYSTEM.lock().await;
    if let Some(alarm_system) = alarm_system_lock.as_mut() {
        alarm_system.logout().await;
    }
}
