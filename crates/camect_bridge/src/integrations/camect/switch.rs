//! Switches controlling per-camera alerts and the hub mode.

use std::sync::Arc;
use std::sync::RwLock;
use std::sync::Weak;

use tracing::info;

use super::camera::CameraRecord;
use super::camera::SharedRecord;
use super::client::run_blocking;
use super::client::HubApi;
use super::hub::HubSession;
use super::hub::Mode;
use super::read;
use super::write;
use super::COMMAND_REASON;
use crate::engine::Entity;
use crate::error::ApiError;
use crate::error::CommandError;

type VendorCommand<A> = fn(&A, &str, &str) -> Result<(), ApiError>;

/// On while the hub sends alerts for the camera
pub struct AlertSwitch<A: HubApi> {
    entity_id: String,
    unique_id: String,
    record: Weak<RwLock<CameraRecord>>,
    session: Weak<HubSession<A>>,
}

impl<A: HubApi> AlertSwitch<A> {
    pub fn new(record: &SharedRecord, session: &Arc<HubSession<A>>) -> Self {
        let unique_id = format!("{}_alerts", read(record).unique_id());
        Self {
            entity_id: format!("switch.{}", unique_id),
            unique_id,
            record: Arc::downgrade(record),
            session: Arc::downgrade(session),
        }
    }

    pub fn is_on(&self) -> bool {
        self.record
            .upgrade()
            .is_some_and(|record| read(&record).motion_detection_enabled())
    }

    pub async fn turn_on(&self) -> Result<(), CommandError> {
        self.set_alerts(true).await
    }

    pub async fn turn_off(&self) -> Result<(), CommandError> {
        self.set_alerts(false).await
    }

    async fn set_alerts(&self, enabled: bool) -> Result<(), CommandError> {
        let detached = || CommandError::Detached(self.entity_id.clone());
        let record = self.record.upgrade().ok_or_else(detached)?;
        let session = self.session.upgrade().ok_or_else(detached)?;
        let cam_id = read(&record).device_id.clone();

        let (command, call): (&'static str, VendorCommand<A>) = if enabled {
            ("enable alert", A::enable_alert)
        } else {
            ("disable alert", A::disable_alert)
        };
        let id = cam_id.clone();
        run_blocking(session.api(), move |api| call(api, &id, COMMAND_REASON))
            .await
            .map_err(|source| CommandError::Api { command, source })?;

        let observers = {
            let mut guard = write(&record);
            guard.is_alert_disabled = !enabled;
            guard.observers()
        };
        info!(
            "[{}] Alerts for camera {} {}",
            session.entry_id(),
            cam_id,
            if enabled { "enabled" } else { "disabled" }
        );
        // The camera's motion_detection attribute follows the same flag
        for entity_id in observers {
            session.mark_dirty(&entity_id).await;
        }
        Ok(())
    }
}

impl<A: HubApi> Entity for AlertSwitch<A> {
    fn entity_id(&self) -> &str {
        &self.entity_id
    }

    fn unique_id(&self) -> &str {
        &self.unique_id
    }

    fn name(&self) -> String {
        match self.record.upgrade() {
            Some(record) => format!("{} Alerts", read(&record).name),
            None => self.entity_id.clone(),
        }
    }

    fn platform(&self) -> &'static str {
        "switch"
    }

    fn available(&self) -> bool {
        self.record
            .upgrade()
            .is_some_and(|record| read(&record).available())
    }

    fn icon(&self) -> Option<&'static str> {
        if self.is_on() {
            Some("mdi:bell")
        } else {
            Some("mdi:bell-cancel")
        }
    }

    fn state_json(&self) -> serde_json::Value {
        serde_json::json!({ "state": if self.is_on() { "on" } else { "off" } })
    }
}

/// On while the hub is in `default` mode; off means `home`
pub struct ModeSwitch<A: HubApi> {
    entity_id: String,
    unique_id: String,
    session: Weak<HubSession<A>>,
}

impl<A: HubApi> ModeSwitch<A> {
    pub fn new(session: &Arc<HubSession<A>>) -> Self {
        let unique_id = format!("{}_mode", session.id());
        Self {
            entity_id: format!("switch.{}", unique_id),
            unique_id,
            session: Arc::downgrade(session),
        }
    }

    pub fn is_on(&self) -> bool {
        self.session
            .upgrade()
            .is_some_and(|session| session.mode() == Mode::Default)
    }

    pub async fn turn_on(&self) -> Result<(), CommandError> {
        self.set_mode(Mode::Default).await
    }

    pub async fn turn_off(&self) -> Result<(), CommandError> {
        self.set_mode(Mode::Home).await
    }

    async fn set_mode(&self, mode: Mode) -> Result<(), CommandError> {
        let session = self
            .session
            .upgrade()
            .ok_or_else(|| CommandError::Detached(self.entity_id.clone()))?;
        session.set_mode(mode).await
    }
}

impl<A: HubApi> Entity for ModeSwitch<A> {
    fn entity_id(&self) -> &str {
        &self.entity_id
    }

    fn unique_id(&self) -> &str {
        &self.unique_id
    }

    fn name(&self) -> String {
        match self.session.upgrade() {
            Some(session) => format!("{} Mode", session.name()),
            None => self.entity_id.clone(),
        }
    }

    fn platform(&self) -> &'static str {
        "switch"
    }

    fn available(&self) -> bool {
        self.session.strong_count() > 0
    }

    fn icon(&self) -> Option<&'static str> {
        if self.is_on() {
            Some("mdi:shield-check")
        } else {
            Some("mdi:home")
        }
    }

    fn state_json(&self) -> serde_json::Value {
        serde_json::json!({ "state": if self.is_on() { "on" } else { "off" } })
    }

    fn attributes(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut attributes = serde_json::Map::new();
        if let Some(session) = self.session.upgrade() {
            attributes.insert("mode".to_string(), session.mode().to_string().into());
        }
        attributes
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;
    use crate::config::Config;
    use crate::engine::FromIntegrationMessage;
    use crate::integrations::camect::client::mock;
    use crate::integrations::camect::client::mock::Call;
    use crate::integrations::camect::client::mock::MockConnector;
    use crate::integrations::camect::client::mock::MockHub;

    async fn session(
        mode: &str,
    ) -> (
        MockHub,
        Arc<HubSession<MockHub>>,
        mpsc::Receiver<FromIntegrationMessage>,
    ) {
        let config: Config = "[hubs.home]\nusername = \"admin\"\npassword = \"secret\""
            .parse()
            .unwrap();
        let hub = MockHub::new(mock::hub_info(mode), vec![mock::camera_info("cam1")]);
        let connector = Arc::new(MockConnector {
            hub: hub.clone(),
            refuse: None,
        });
        let (tx, rx) = mpsc::channel(64);
        let session = HubSession::initialize("home", &config.hubs["home"], connector, tx)
            .await
            .unwrap();
        session.discover_cameras().await.unwrap();
        (hub, session, rx)
    }

    fn updated(rx: &mut mpsc::Receiver<FromIntegrationMessage>) -> Vec<String> {
        let mut ids = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            if let FromIntegrationMessage::EntityUpdated { entity_id } = msg {
                ids.push(entity_id);
            }
        }
        ids
    }

    #[tokio::test]
    async fn test_alert_switch_turn_off() {
        let (hub, session, mut rx) = session("default").await;
        let record = session.cameras()[0].clone();
        let switch = AlertSwitch::new(&record, &session);
        write(&record).alert_switches.push(switch.entity_id().to_string());

        assert_eq!(switch.entity_id(), "switch.camect_hub1_cam1_alerts");
        assert!(switch.is_on());
        assert_eq!(switch.icon(), Some("mdi:bell"));

        switch.turn_off().await.unwrap();

        assert!(hub.calls().contains(&Call::DisableAlert(
            "cam1".to_string(),
            COMMAND_REASON.to_string()
        )));
        assert!(!switch.is_on());
        assert_eq!(switch.icon(), Some("mdi:bell-cancel"));
        assert_eq!(switch.state_json()["state"], "off");
        assert_eq!(
            updated(&mut rx),
            vec!["camera.camect_hub1_cam1", "switch.camect_hub1_cam1_alerts"]
        );

        switch.turn_on().await.unwrap();
        assert!(hub.calls().contains(&Call::EnableAlert(
            "cam1".to_string(),
            COMMAND_REASON.to_string()
        )));
        assert!(switch.is_on());
    }

    #[tokio::test]
    async fn test_alert_switch_failure_keeps_state() {
        let (hub, session, mut rx) = session("default").await;
        let record = session.cameras()[0].clone();
        let switch = AlertSwitch::new(&record, &session);
        hub.fail_commands(true);

        let result = switch.turn_off().await;

        assert!(matches!(
            result,
            Err(CommandError::Api {
                command: "disable alert",
                ..
            })
        ));
        assert!(switch.is_on());
        assert!(updated(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_alert_switch_availability() {
        let (_hub, session, _rx) = session("default").await;
        let record = session.cameras()[0].clone();
        let switch = AlertSwitch::new(&record, &session);

        assert!(switch.available());
        write(&record).offline = true;
        assert!(!switch.available());
        assert_eq!(switch.name(), "Camera cam1 Alerts");
    }

    #[tokio::test]
    async fn test_mode_switch() {
        let (hub, session, mut rx) = session("default").await;
        let switch = ModeSwitch::new(&session);
        session.register_mode_observer(switch.entity_id());

        assert_eq!(switch.entity_id(), "switch.camect_hub1_mode");
        assert_eq!(switch.name(), "Home Hub Mode");
        assert!(switch.is_on());
        assert_eq!(switch.icon(), Some("mdi:shield-check"));

        switch.turn_off().await.unwrap();
        assert!(hub
            .calls()
            .contains(&Call::SetMode(Mode::Home, COMMAND_REASON.to_string())));
        assert!(!switch.is_on());
        assert_eq!(switch.icon(), Some("mdi:home"));
        assert_eq!(switch.attributes()["mode"], "home");
        assert_eq!(updated(&mut rx), vec!["switch.camect_hub1_mode"]);

        switch.turn_on().await.unwrap();
        assert!(switch.is_on());
    }

    #[tokio::test]
    async fn test_switches_detached_after_teardown() {
        let (_hub, session, _rx) = session("home").await;
        let record = session.cameras()[0].clone();
        let alerts = AlertSwitch::new(&record, &session);
        let mode = ModeSwitch::new(&session);
        drop(record);
        drop(session);

        assert!(!mode.available());
        assert!(!mode.is_on());
        assert!(matches!(mode.turn_on().await, Err(CommandError::Detached(_))));
        assert!(!alerts.available());
        assert!(matches!(
            alerts.turn_on().await,
            Err(CommandError::Detached(_))
        ));
    }
}
