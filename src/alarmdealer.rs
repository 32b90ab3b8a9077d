use chrono::prelude::*;
use log::{debug, error, info};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::scrape;

pub const STATUS_READY: &str = "System is Ready to Arm";
pub const STATUS_ARMED_STAY: &str = "System Armed in Stay Mode";
pub const STATUS_ARMED_AWAY: &str = "System Armed in Away Mode";

/// The four states the portal's status line maps onto. Anything the keypad
/// shows besides the three known strings (trouble messages, countdowns,
/// zone faults) lands on `Unknown`.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum PanelState {
    Disarmed,
    ArmedHome,
    ArmedAway,
    Unknown,
}

impl PanelState {
    pub fn from_status(status: &str) -> Self {
        if status == STATUS_READY {
            PanelState::Disarmed
        } else if status == STATUS_ARMED_STAY {
            PanelState::ArmedHome
        } else if status == STATUS_ARMED_AWAY {
            PanelState::ArmedAway
        } else {
            PanelState::Unknown
        }
    }

    /// State name as published on the state topic.
    pub fn wire_name(&self) -> &'static str {
        match self {
            PanelState::Disarmed => "disarmed",
            PanelState::ArmedHome => "armed_home",
            PanelState::ArmedAway => "armed_away",
            PanelState::Unknown => "unknown",
        }
    }
}

/// Keypad events the portal accepts.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum KeypadEvent {
    ArmStay,
    ArmAway,
    Disarm,
}

impl KeypadEvent {
    fn form_value(&self) -> &'static str {
        match self {
            KeypadEvent::ArmStay => "arm_stay",
            KeypadEvent::ArmAway => "arm_away",
            KeypadEvent::Disarm => "disarm",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SystemStatus {
    status: Option<String>,
    connected: bool,
    last_update: DateTime<Utc>,
}

impl SystemStatus {
    pub fn default() -> Self {
        SystemStatus {
            status: None,
            connected: false,
            last_update: Utc::now(),
        }
    }
    /// Raw keypad text, exposed as a diagnostic attribute.
    pub fn status(&self) -> String {
        self.status.clone().unwrap_or("".to_string())
    }
    pub fn state(&self) -> PanelState {
        match &self.status {
            Some(status) => PanelState::from_status(status),
            None => PanelState::Unknown,
        }
    }
    pub fn connected(&self) -> bool {
        self.connected
    }
    pub fn last_update(&self) -> DateTime<Utc> {
        self.last_update
    }
    /// Whether the observed panel facts differ from a previous snapshot.
    /// The update timestamp moves every poll and is not an observation.
    pub fn changed_from(&self, previous: &SystemStatus) -> bool {
        self.status != previous.status || self.connected != previous.connected
    }
}

pub struct System {
    portal: Portal,
    status: Option<String>,
    connected: bool,
    last_update: DateTime<Utc>,
}

impl System {
    pub fn new(hostname: &str, username: &str, password: &str) -> Self {
        System {
            portal: Portal::new(hostname, username, password),
            status: None,
            connected: false,
            last_update: Utc::now(),
        }
    }

    pub fn get_status(&self) -> SystemStatus {
        SystemStatus {
            status: self.status.clone(),
            connected: self.connected,
            last_update: self.last_update,
        }
    }

    pub async fn login(&mut self) -> Result<(), String> {
        self.portal.login().await?;
        self.connected = true;
        Ok(())
    }

    pub async fn logout(&mut self) {
        match self.portal.logout().await {
            Ok(_) => {
                info!("Logged out of the portal");
            }
            Err(e) => {
                error!("Failed to log out: {}", e);
            }
        }
        self.connected = false;
    }

    pub async fn update_status(&mut self) {
        match self.fetch_status().await {
            Ok(status) => {
                if self.status.as_deref() != Some(status.as_str()) {
                    info!("Panel status changed to: {}", status);
                }
                self.status = Some(status);
                self.connected = true;
                self.last_update = Utc::now();
                debug!("Status updated");
            }
            Err(e) => {
                error!("Failed to get status: {}", e);
                self.connected = false;
            }
        }
    }

    pub async fn arm_home(&mut self) -> Result<(), String> {
        self.send_event(KeypadEvent::ArmStay, None).await
    }

    pub async fn arm_away(&mut self) -> Result<(), String> {
        self.send_event(KeypadEvent::ArmAway, None).await
    }

    pub async fn disarm(&mut self, code: Option<&str>) -> Result<(), String> {
        self.send_event(KeypadEvent::Disarm, code).await
    }

    async fn send_event(&mut self, event: KeypadEvent, code: Option<&str>) -> Result<(), String> {
        if !self.portal.is_logged_in().await {
            self.portal.login().await?;
        }
        self.portal.keypad_event(event, code).await
    }

    // The keypad page bounces back to the login form when the server-side
    // session has expired, so a 200 response is not enough on its own.
    async fn fetch_status(&mut self) -> Result<String, String> {
        let mut page = classify_keypad_page(&self.portal.keypad_page().await?);
        if page == KeypadPage::LoggedOut {
            debug!("Session expired, logging in again");
            self.portal.login().await?;
            page = classify_keypad_page(&self.portal.keypad_page().await?);
        }
        match page {
            KeypadPage::Status(text) => Ok(text),
            KeypadPage::LoggedOut => Err("Session rejected by the portal".to_string()),
            KeypadPage::Missing => Err("Keypad display not found in portal page".to_string()),
        }
    }
}

/// What a keypad page response turned out to be.
#[derive(Debug, Clone, PartialEq, Eq)]
enum KeypadPage {
    /// Authenticated page with the status line.
    Status(String),
    /// Bounced to the login form; the session has expired.
    LoggedOut,
    /// Authenticated page without a readable display.
    Missing,
}

fn classify_keypad_page(body: &str) -> KeypadPage {
    if !Portal::is_authenticated(body) {
        return KeypadPage::LoggedOut;
    }
    match scrape::led_display_text(body) {
        Some(text) => KeypadPage::Status(text),
        None => KeypadPage::Missing,
    }
}

struct Portal {
    user_agent: String,
    username: String,
    password: String,
    url_login: String,
    url_keypad: String,
    url_event: String,
    url_logout: String,
    client: Client,
}

impl Portal {
    fn new(hostname: &str, username: &str, password: &str) -> Self {
        let base = format!("https://{}/index.php", hostname);
        let client = match Client::builder().cookie_store(true).build() {
            Ok(client) => client,
            Err(e) => {
                error!("Failed to build HTTP client: {}", e);
                panic!("Failed to build HTTP client");
            }
        };
        Portal {
            user_agent: "alarmdealer2mqtt/0.1".to_string(),
            username: username.to_string(),
            password: password.to_string(),
            url_login: format!("{}?action=login", base),
            url_keypad: format!("{}?action=keypad", base),
            url_event: format!("{}?action=keypad_event", base),
            url_logout: format!("{}?action=logout", base),
            client,
        }
    }

    fn is_authenticated(body: &str) -> bool {
        body.contains("led_display") && !body.contains("name=\"user_pass\"")
    }

    async fn send_get(&self, url: &str) -> Result<String, String> {
        debug!("Sending GET request to {}", url);
        let res = self
            .client
            .get(url)
            .header("User-Agent", &self.user_agent)
            .send()
            .await;
        match res {
            Ok(res) => {
                let status = res.status();
                debug!("Response status: {}", status);
                if status != 200 {
                    error!("Failed to get response: {}", status);
                    return Err("Failed to get response".to_string());
                }
                match res.text().await {
                    Ok(body) => Ok(body),
                    Err(e) => {
                        error!("Failed to read response: {}", e);
                        Err("Failed to read response".to_string())
                    }
                }
            }
            Err(e) => {
                error!("Failed to send request: {}", e);
                Err("Failed to send request".to_string())
            }
        }
    }

    async fn send_post_form(&self, url: &str, form: &[(&str, &str)]) -> Result<String, String> {
        debug!("Sending POST request to {}", url);
        let res = self
            .client
            .post(url)
            .header("User-Agent", &self.user_agent)
            .form(form)
            .send()
            .await;
        match res {
            Ok(res) => {
                let status = res.status();
                debug!("Response status: {}", status);
                if status != 200 {
                    error!("Failed to get response: {}", status);
                    return Err("Failed to get response".to_string());
                }
                match res.text().await {
                    Ok(body) => Ok(body),
                    Err(e) => {
                        error!("Failed to read response: {}", e);
                        Err("Failed to read response".to_string())
                    }
                }
            }
            Err(e) => {
                error!("Failed to send request: {}", e);
                Err("Failed to send request".to_string())
            }
        }
    }

    async fn login(&mut self) -> Result<(), String> {
        let form = [
            ("user_name", self.username.as_str()),
            ("user_pass", self.password.as_str()),
        ];
        let body = self.send_post_form(&self.url_login, &form).await?;
        if Portal::is_authenticated(&body) {
            info!("Login successful");
            Ok(())
        } else {
            Err("Login rejected by the portal".to_string())
        }
    }

    async fn is_logged_in(&self) -> bool {
        match self.keypad_page().await {
            Ok(body) => Portal::is_authenticated(&body),
            Err(_) => false,
        }
    }

    async fn keypad_page(&self) -> Result<String, String> {
        self.send_get(&self.url_keypad).await
    }

    async fn keypad_event(&self, event: KeypadEvent, code: Option<&str>) -> Result<(), String> {
        let mut form = vec![("event", event.form_value())];
        if let Some(code) = code {
            form.push(("code", code));
        }
        self.send_post_form(&self.url_event, &form).await?;
        info!("Keypad event sent: {}", event.form_value());
        Ok(())
    }

    async fn logout(&self) -> Result<(), String> {
        self.send_get(&self.url_logout).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_known_status_strings() {
        assert_eq!(PanelState::from_status(STATUS_READY), PanelState::Disarmed);
        assert_eq!(PanelState::from_status(STATUS_ARMED_STAY), PanelState::ArmedHome);
        assert_eq!(PanelState::from_status(STATUS_ARMED_AWAY), PanelState::ArmedAway);
    }

    #[test]
    fn unknown_status_maps_to_unknown() {
        assert_eq!(PanelState::from_status("Zone 3 Open"), PanelState::Unknown);
        assert_eq!(PanelState::from_status(""), PanelState::Unknown);
    }

    #[test]
    fn status_match_is_exact() {
        // Direct string equality, no normalization at this layer.
        assert_eq!(
            PanelState::from_status("system is ready to arm"),
            PanelState::Unknown
        );
        assert_eq!(
            PanelState::from_status("System is Ready to Arm "),
            PanelState::Unknown
        );
    }

    #[test]
    fn wire_names() {
        assert_eq!(PanelState::Disarmed.wire_name(), "disarmed");
        assert_eq!(PanelState::ArmedHome.wire_name(), "armed_home");
        assert_eq!(PanelState::ArmedAway.wire_name(), "armed_away");
        assert_eq!(PanelState::Unknown.wire_name(), "unknown");
    }

    #[test]
    fn keypad_event_form_values() {
        assert_eq!(KeypadEvent::ArmStay.form_value(), "arm_stay");
        assert_eq!(KeypadEvent::ArmAway.form_value(), "arm_away");
        assert_eq!(KeypadEvent::Disarm.form_value(), "disarm");
    }

    #[test]
    fn default_status_is_unknown_and_offline() {
        let status = SystemStatus::default();
        assert_eq!(status.state(), PanelState::Unknown);
        assert_eq!(status.status(), "");
        assert!(!status.connected());
    }

    #[test]
    fn login_page_is_not_authenticated() {
        let login = "<form><input name=\"user_name\"><input name=\"user_pass\"></form>";
        assert!(!Portal::is_authenticated(login));
        let keypad = "<div id=\"led_display\">System is Ready to Arm</div>";
        assert!(Portal::is_authenticated(keypad));
    }

    #[test]
    fn expired_session_page_triggers_relogin() {
        // An expired session serves the login form with a 200, which is the
        // branch that makes fetch_status log in again and refetch.
        let login = "<html><form><input name=\"user_name\"><input name=\"user_pass\"></form></html>";
        assert_eq!(classify_keypad_page(login), KeypadPage::LoggedOut);
    }

    #[test]
    fn authenticated_page_yields_status() {
        let keypad = "<body><div id=\"led_display\"><span>System Armed in Stay Mode</span></div></body>";
        assert_eq!(
            classify_keypad_page(keypad),
            KeypadPage::Status("System Armed in Stay Mode".to_string())
        );
    }

    #[test]
    fn authenticated_page_without_display_text_is_missing() {
        let keypad = "<body><div id=\"led_display\">   </div></body>";
        assert_eq!(classify_keypad_page(keypad), KeypadPage::Missing);
    }

    #[test]
    fn snapshot_change_detection() {
        let mut previous = SystemStatus::default();
        let mut current = SystemStatus::default();
        assert!(!current.changed_from(&previous));
        current.status = Some(STATUS_READY.to_string());
        current.connected = true;
        assert!(current.changed_from(&previous));
        previous.status = Some(STATUS_READY.to_string());
        previous.connected = true;
        // Only the poll timestamp differs.
        current.last_update = Utc::now();
        assert!(!current.changed_from(&previous));
    }
}
