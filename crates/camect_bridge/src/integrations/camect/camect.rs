use std::collections::HashMap;
use std::error::Error;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::binary_sensor::MotionSensor;
use super::camera::Camera;
use super::client::HubConnector;
use super::hub::HubClaim;
use super::hub::HubClaims;
use super::hub::HubSession;
use super::read;
use super::switch::AlertSwitch;
use super::switch::ModeSwitch;
use super::write;
use super::DOMAIN;
use crate::config::HubConfig;
use crate::engine::BoxError;
use crate::engine::Entity;
use crate::engine::FromIntegrationMessage;
use crate::engine::FromIntegrationSender;
use crate::engine::Integration;
use crate::engine::SharedEntity;
use crate::engine::ToIntegrationMessage;
use crate::error::CommandError;
use crate::error::ConnectError;

fn boxed<E: Error + Send + 'static>(e: E) -> Box<dyn Error + Send> {
    Box::new(e)
}

/// Camect integration for one configured hub
///
/// Setup connects to the hub, discovers its cameras and reports one camera, one alert switch
/// and one motion sensor per camera plus a mode switch for the hub. Push events from the hub
/// are handled by the session; a background task polls the hub every scan interval.
pub struct CamectIntegration<K: HubConnector> {
    name: String,
    entry_id: String,
    config: HubConfig,
    connector: Arc<K>,
    session: Option<Arc<HubSession<K::Api>>>,
    claims: HubClaims,
    /// This entry's hold on its hub id, between setup and shutdown
    claim: Option<HubClaim>,
    cameras: HashMap<String, Arc<Camera<K::Api>>>,
    alert_switches: HashMap<String, Arc<AlertSwitch<K::Api>>>,
    motion_sensors: HashMap<String, Arc<MotionSensor>>,
    mode_switch: Option<Arc<ModeSwitch<K::Api>>>,
    /// Every entity reported to the engine, in discovery order
    entity_ids: Vec<String>,
    to_engine: Option<FromIntegrationSender>,
    /// Handle to the periodic refresh task
    refresh_task: Option<JoinHandle<()>>,
}

impl<K: HubConnector> CamectIntegration<K> {
    pub fn new(entry_id: &str, config: &HubConfig, connector: K) -> Self {
        Self {
            name: format!("{}.{}", DOMAIN, entry_id),
            entry_id: entry_id.to_string(),
            config: config.clone(),
            connector: Arc::new(connector),
            session: None,
            claims: HubClaims::default(),
            claim: None,
            cameras: HashMap::new(),
            alert_switches: HashMap::new(),
            motion_sensors: HashMap::new(),
            mode_switch: None,
            entity_ids: Vec::new(),
            to_engine: None,
            refresh_task: None,
        }
    }

    /// Share hub claims with the other entries so each hub is set up by one of them
    pub fn with_claims(mut self, claims: HubClaims) -> Self {
        self.claims = claims;
        self
    }

    /// The live hub session, between setup and shutdown
    pub fn session(&self) -> Option<&Arc<HubSession<K::Api>>> {
        self.session.as_ref()
    }

    async fn report(&self, msg: FromIntegrationMessage) {
        if let Some(tx) = &self.to_engine {
            if let Err(e) = tx.send(msg).await {
                warn!("[{}] Failed to report to engine: {}", self.entry_id, e);
            }
        }
    }

    async fn report_entity(&mut self, entity: SharedEntity, device_id: &str) {
        let entity_id = entity.entity_id().to_string();
        debug!("[{}] Reporting entity {}", self.entry_id, entity_id);
        self.entity_ids.push(entity_id.clone());
        self.report(FromIntegrationMessage::EntityDiscovered {
            entity_id,
            entity,
            device_id: Some(device_id.to_string()),
            integration_name: self.name.clone(),
        })
        .await;
    }

    /// Build the views for the hub and every discovered camera and link them to their records
    async fn create_entities(&mut self, session: &Arc<HubSession<K::Api>>) {
        let hub_device_id = session.id().to_string();

        let mode_switch = Arc::new(ModeSwitch::new(session));
        session.register_mode_observer(mode_switch.entity_id());
        self.mode_switch = Some(mode_switch.clone());
        self.report_entity(mode_switch, &hub_device_id).await;

        for record in session.cameras() {
            let device = read(&record).device(&hub_device_id);
            let device_id = device.id.clone();
            self.report(FromIntegrationMessage::DeviceRegistered {
                device,
                integration_name: self.name.clone(),
            })
            .await;

            let camera = Arc::new(Camera::new(&record, session.api().clone()));
            let alert_switch = Arc::new(AlertSwitch::new(&record, session));
            let motion_sensor = Arc::new(MotionSensor::new(&record));
            {
                let mut guard = write(&record);
                guard
                    .alert_switches
                    .push(alert_switch.entity_id().to_string());
                guard
                    .motion_sensors
                    .push(motion_sensor.entity_id().to_string());
            }

            self.cameras
                .insert(camera.entity_id().to_string(), camera.clone());
            self.alert_switches.insert(
                alert_switch.entity_id().to_string(),
                alert_switch.clone(),
            );
            self.motion_sensors.insert(
                motion_sensor.entity_id().to_string(),
                motion_sensor.clone(),
            );

            self.report_entity(camera, &device_id).await;
            self.report_entity(alert_switch, &device_id).await;
            self.report_entity(motion_sensor, &device_id).await;
        }
    }

    fn spawn_refresh_task(&mut self, session: &Arc<HubSession<K::Api>>) {
        let session = Arc::downgrade(session);
        let entry_id = self.entry_id.clone();
        let period = self.config.scan_interval();

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately and setup has just read everything
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(session) = session.upgrade() else {
                    break;
                };
                debug!("[{}] Polling hub", entry_id);
                if let Err(e) = session.refresh().await {
                    warn!("[{}] Failed to refresh hub: {}", entry_id, e);
                }
            }
        });
        self.refresh_task = Some(task);
    }

    async fn turn(&self, entity_id: &str, on: bool) -> Result<(), CommandError> {
        if let Some(mode_switch) = self
            .mode_switch
            .as_ref()
            .filter(|switch| switch.entity_id() == entity_id)
        {
            return if on {
                mode_switch.turn_on().await
            } else {
                mode_switch.turn_off().await
            };
        }

        let alert_switch = self
            .alert_switches
            .get(entity_id)
            .ok_or_else(|| CommandError::UnknownEntity(entity_id.to_string()))?;
        if on {
            alert_switch.turn_on().await
        } else {
            alert_switch.turn_off().await
        }
    }

    async fn snapshot(
        &self,
        entity_id: &str,
        width: Option<u32>,
        height: Option<u32>,
    ) -> Result<Vec<u8>, CommandError> {
        let camera = self
            .cameras
            .get(entity_id)
            .ok_or_else(|| CommandError::UnknownEntity(entity_id.to_string()))?;
        camera.snapshot(width, height).await
    }

    async fn refresh(&self) -> Result<(), BoxError> {
        let session = self.session.as_ref().ok_or(CommandError::SessionClosed)?;
        session.refresh().await?;
        Ok(())
    }
}

#[async_trait]
impl<K: HubConnector> Integration for CamectIntegration<K> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn setup(&mut self, tx: FromIntegrationSender) -> Result<(), Box<dyn Error + Send>> {
        self.to_engine = Some(tx.clone());

        let session = HubSession::initialize(
            &self.entry_id,
            &self.config,
            self.connector.clone(),
            tx,
        )
        .await
        .map_err(boxed)?;

        let Some(claim) = self.claims.claim(session.hub_id()) else {
            warn!(
                "[{}] Hub {} is already set up by another entry",
                self.entry_id,
                session.hub_id()
            );
            return Err(boxed(ConnectError::AlreadyConfigured {
                hub_id: session.hub_id().to_string(),
            }));
        };
        // Released again if setup fails from here on
        self.claim = Some(claim);

        self.report(FromIntegrationMessage::DeviceRegistered {
            device: session.device(),
            integration_name: self.name.clone(),
        })
        .await;

        if let Err(e) = session.discover_cameras().await {
            self.claim = None;
            return Err(boxed(e));
        }
        self.create_entities(&session).await;
        self.spawn_refresh_task(&session);
        self.session = Some(session);

        info!(
            "[{}] Camect integration ready with {} cameras",
            self.entry_id,
            self.cameras.len()
        );
        Ok(())
    }

    async fn handle_message(
        &mut self,
        msg: ToIntegrationMessage,
    ) -> Result<(), Box<dyn Error + Send>> {
        match msg {
            ToIntegrationMessage::Turn {
                entity_id,
                on,
                reply,
            } => {
                info!(
                    "[{}] Handling turn {} for {}",
                    self.entry_id,
                    if on { "on" } else { "off" },
                    entity_id
                );
                let result = self.turn(&entity_id, on).await;
                if let Err(e) = &result {
                    warn!("[{}] Command for {} failed: {}", self.entry_id, entity_id, e);
                }
                let _ = reply.send(result.map_err(|e| Box::new(e) as BoxError));
            }
            ToIntegrationMessage::Snapshot {
                entity_id,
                width,
                height,
                reply,
            } => {
                debug!("[{}] Handling snapshot for {}", self.entry_id, entity_id);
                let result = self.snapshot(&entity_id, width, height).await;
                let _ = reply.send(result.map_err(|e| Box::new(e) as BoxError));
            }
            ToIntegrationMessage::Refresh { reply } => {
                let _ = reply.send(self.refresh().await);
            }
        }
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), Box<dyn Error + Send>> {
        info!("[{}] Camect integration shutting down", self.entry_id);

        if let Some(task) = self.refresh_task.take() {
            task.abort();
        }

        for entity_id in std::mem::take(&mut self.entity_ids) {
            self.report(FromIntegrationMessage::EntityRemoved { entity_id })
                .await;
        }

        self.cameras.clear();
        self.alert_switches.clear();
        self.motion_sensors.clear();
        self.mode_switch = None;
        // Dropping the last strong handle stops the event task
        self.session = None;
        self.claim = None;
        Ok(())
    }
}
