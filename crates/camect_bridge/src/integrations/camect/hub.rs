//! Session with a single Camect hub.

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::RwLock;

use chrono::DateTime;
use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::camera::CameraRecord;
use super::camera::SharedRecord;
use super::client::run_blocking;
use super::client::HubApi;
use super::client::HubConnector;
use super::client::HubInfo;
use super::event::EventKind;
use super::event::VendorEvent;
use super::read;
use super::write;
use super::COMMAND_REASON;
use super::DOMAIN;
use super::HUB_MODEL;
use super::HUB_SW_VERSION;
use super::MANUFACTURER;
use crate::config::HubConfig;
use crate::engine::Device;
use crate::engine::FromIntegrationMessage;
use crate::engine::FromIntegrationSender;
use crate::error::ApiError;
use crate::error::CommandError;
use crate::error::ConnectError;

/// Hub-wide alerting posture
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[strum(serialize_all = "lowercase")]
pub enum Mode {
    #[default]
    Default,
    Home,
}

impl Mode {
    /// Map whatever the hub reports onto a known mode; unknown values count as `default`
    pub fn normalize(raw: &str) -> Self {
        raw.parse().unwrap_or_default()
    }
}

/// Hub metadata shared with the views that display it
#[derive(Debug, Clone)]
pub struct HubState {
    pub info: HubInfo,
    pub name: String,
    pub mode: Mode,
    pub local_https_url: String,
}

/// Hub ids that already have a live integration, shared between config entries so the same
/// hub is only set up once
#[derive(Debug, Clone, Default)]
pub struct HubClaims(Arc<Mutex<HashSet<String>>>);

impl HubClaims {
    /// Claim `hub_id` for one entry. `None` when another entry holds it.
    pub fn claim(&self, hub_id: &str) -> Option<HubClaim> {
        let inserted = self
            .0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(hub_id.to_string());
        inserted.then(|| HubClaim {
            claims: self.clone(),
            hub_id: hub_id.to_string(),
        })
    }

    pub fn is_claimed(&self, hub_id: &str) -> bool {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(hub_id)
    }
}

/// Held for as long as an entry owns its hub; dropping it releases the hub id
#[derive(Debug)]
pub struct HubClaim {
    claims: HubClaims,
    hub_id: String,
}

impl HubClaim {
    pub fn hub_id(&self) -> &str {
        &self.hub_id
    }
}

impl Drop for HubClaim {
    fn drop(&mut self) {
        self.claims
            .0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.hub_id);
    }
}

/// Owns the connection to one hub, its cameras and the listeners on its mode.
pub struct HubSession<A: HubApi> {
    entry_id: String,
    api: Arc<A>,
    endpoint: String,
    hub_id: String,
    /// `camect_<hub id>`, also the hub's device id
    id: String,
    entity_id: String,
    state: RwLock<HubState>,
    cameras: RwLock<Vec<SharedRecord>>,
    mode_observers: RwLock<Vec<String>>,
    to_engine: FromIntegrationSender,
    event_task: Mutex<Option<JoinHandle<()>>>,
}

impl<A: HubApi> HubSession<A> {
    /// Connect to the hub, fetch its metadata and start listening for push events.
    ///
    /// Any connection or authentication failure is returned; the caller aborts setup.
    pub async fn initialize<K>(
        entry_id: &str,
        config: &HubConfig,
        connector: Arc<K>,
        to_engine: FromIntegrationSender,
    ) -> Result<Arc<Self>, ConnectError>
    where
        K: HubConnector<Api = A>,
    {
        let endpoint = config.endpoint();
        info!("[{}] Connecting to Camect hub at {}", entry_id, endpoint);

        let api = {
            let endpoint = endpoint.clone();
            let username = config.username.clone();
            let password = config.password.clone();
            tokio::task::spawn_blocking(move || connector.connect(&endpoint, &username, &password))
                .await
                .unwrap_or_else(|e| Err(ApiError::other(format!("blocking task failed: {}", e))))
        }
        .map_err(|source| ConnectError::Connect {
            endpoint: endpoint.clone(),
            source,
        })?;
        let api = Arc::new(api);

        let info = run_blocking(&api, |api| api.get_info())
            .await
            .map_err(ConnectError::Info)?;

        let id = format!("{}_{}", DOMAIN, info.id);
        let local_https_url = info
            .local_https_url
            .clone()
            .filter(|url| !url.is_empty())
            .unwrap_or_else(|| config.default_local_url());
        let state = HubState {
            name: info.name.clone(),
            mode: Mode::normalize(&info.mode),
            local_https_url,
            info,
        };

        let session = Arc::new(Self {
            entry_id: entry_id.to_string(),
            api,
            endpoint,
            hub_id: state.info.id.clone(),
            entity_id: format!("{}.{}", DOMAIN, id),
            id,
            state: RwLock::new(state),
            cameras: RwLock::new(Vec::new()),
            mode_observers: RwLock::new(Vec::new()),
            to_engine,
            event_task: Mutex::new(None),
        });
        session.listen();

        info!(
            "[{}] Connected to hub {} ({}), mode {}",
            entry_id,
            session.name(),
            session.hub_id,
            session.mode()
        );
        Ok(session)
    }

    /// Register the single push-event listener with the vendor client.
    ///
    /// The listener runs on a vendor thread and only hands the raw event over to a channel; a
    /// task on the runtime drains it, so events are handled one at a time. The task waits for
    /// room on the engine channel, so a busy engine slows the hub down instead of losing updates.
    fn listen(self: &Arc<Self>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<serde_json::Value>();
        self.api.add_event_listener(Box::new(move |raw| {
            // Receiver gone means the session was torn down
            let _ = tx.send(raw);
        }));

        let session = Arc::downgrade(self);
        let entry_id = self.entry_id.clone();
        let to_engine = self.to_engine.clone();
        let task = tokio::spawn(async move {
            while let Some(raw) = rx.recv().await {
                let Some(session) = session.upgrade() else {
                    break;
                };
                // A panic here would end the task and lose every later event
                let handled =
                    std::panic::catch_unwind(AssertUnwindSafe(|| session.handle_raw_event(raw)));
                // The session is not kept alive while waiting on the engine
                drop(session);
                let Ok(outbound) = handled else {
                    error!("[{}] Panic while handling hub event, continuing", entry_id);
                    continue;
                };
                deliver(&to_engine, &entry_id, outbound).await;
            }
            debug!("[{}] Hub event task exiting", entry_id);
        });

        *self
            .event_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(task);
    }

    pub fn entry_id(&self) -> &str {
        &self.entry_id
    }

    pub fn api(&self) -> &Arc<A> {
        &self.api
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Vendor-assigned hub id
    pub fn hub_id(&self) -> &str {
        &self.hub_id
    }

    /// `camect_<hub id>`
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    pub fn name(&self) -> String {
        read(&self.state).name.clone()
    }

    pub fn mode(&self) -> Mode {
        read(&self.state).mode
    }

    pub fn local_https_url(&self) -> String {
        read(&self.state).local_https_url.clone()
    }

    pub fn cameras(&self) -> Vec<SharedRecord> {
        read(&self.cameras).clone()
    }

    /// Device entry for the hub itself
    pub fn device(&self) -> Device {
        let state = read(&self.state);
        let mut device = Device::new(self.id.clone(), state.name.clone());
        device.identifiers.push((DOMAIN.to_string(), self.id.clone()));
        device.manufacturer = Some(MANUFACTURER.to_string());
        device.model = Some(HUB_MODEL.to_string());
        device.sw_version = Some(HUB_SW_VERSION.to_string());
        device.configuration_url = Some(state.local_https_url.clone());
        device
    }

    pub fn register_mode_observer(&self, entity_id: &str) {
        let mut observers = write(&self.mode_observers);
        if !observers.iter().any(|id| id == entity_id) {
            observers.push(entity_id.to_string());
        }
    }

    /// Re-fetch hub metadata. Observers are not notified.
    pub async fn refresh_info(&self) -> Result<HubInfo, ApiError> {
        let info = run_blocking(&self.api, |api| api.get_info()).await?;
        {
            let mut state = write(&self.state);
            state.name = info.name.clone();
            state.info = info.clone();
        }
        Ok(info)
    }

    /// Normalize the last fetched mode into the session's mode. Observers are not notified.
    pub fn refresh_mode(&self) -> Mode {
        let mut state = write(&self.state);
        state.mode = Mode::normalize(&state.info.mode);
        state.mode
    }

    /// Fetch the camera list once and create a record for every camera
    pub async fn discover_cameras(&self) -> Result<Vec<SharedRecord>, ConnectError> {
        let infos = run_blocking(&self.api, |api| api.list_cameras())
            .await
            .map_err(ConnectError::Discovery)?;

        let records: Vec<SharedRecord> = infos
            .iter()
            .map(|info| Arc::new(RwLock::new(CameraRecord::new(&self.hub_id, info))))
            .collect();
        write(&self.cameras).extend(records.iter().cloned());

        info!("[{}] Discovered {} cameras", self.entry_id, records.len());
        Ok(records)
    }

    /// Re-read camera metadata and update the matching records
    pub async fn refresh_cameras(&self) -> Result<(), ApiError> {
        let infos = run_blocking(&self.api, |api| api.list_cameras()).await?;

        let mut dirty = Vec::new();
        for record in self.cameras() {
            let mut guard = write(&record);
            if let Some(info) = infos.iter().find(|info| guard.matches(&info.id)) {
                guard.apply_info(info);
                dirty.extend(guard.observers());
            }
        }
        self.mark_all_dirty(dirty).await;
        Ok(())
    }

    /// Periodic poll: hub metadata, mode and cameras
    pub async fn refresh(&self) -> Result<(), ApiError> {
        self.refresh_info().await?;
        self.refresh_mode();
        self.mark_mode_observers_dirty().await;
        self.refresh_cameras().await
    }

    /// Switch the hub's mode, then mirror it locally
    pub async fn set_mode(&self, mode: Mode) -> Result<(), CommandError> {
        run_blocking(&self.api, move |api| api.set_mode(mode, COMMAND_REASON))
            .await
            .map_err(|source| CommandError::Api {
                command: "set mode",
                source,
            })?;

        {
            let mut state = write(&self.state);
            state.mode = mode;
            state.info.mode = mode.to_string();
        }
        info!("[{}] Hub mode set to {}", self.entry_id, mode);
        self.mark_mode_observers_dirty().await;
        Ok(())
    }

    /// Decode and handle a raw push event. Malformed events are logged and dropped.
    ///
    /// Returns the messages the event produced for the engine; the caller delivers them.
    pub fn handle_raw_event(&self, raw: serde_json::Value) -> Vec<FromIntegrationMessage> {
        match VendorEvent::from_value(raw) {
            Ok(event) => self.handle_event(event),
            Err(e) => {
                warn!("[{}] Discarding malformed hub event: {}", self.entry_id, e);
                Vec::new()
            }
        }
    }

    /// Classify a push event and fan it out to the matching records and views
    pub fn handle_event(&self, event: VendorEvent) -> Vec<FromIntegrationMessage> {
        self.handle_event_at(event, Utc::now())
    }

    pub fn handle_event_at(
        &self,
        event: VendorEvent,
        now: DateTime<Utc>,
    ) -> Vec<FromIntegrationMessage> {
        match event.kind() {
            EventKind::Mode => self.handle_mode_event(&event),
            EventKind::Alert => {
                let mut dirty = Vec::new();
                let mut sensors = Vec::new();
                for record in self.matching_cameras(&event) {
                    let mut guard = write(&record);
                    guard.record_motion(now, event.detected_obj.as_deref());
                    dirty.push(guard.entity_id());
                    sensors.extend(guard.motion_sensors.iter().cloned());
                }
                debug!(
                    "[{}] Alert from {}: {}",
                    self.entry_id,
                    event.camera_label(),
                    event.detected_object()
                );
                dirty.extend(sensors);
                let mut outbound = updates(dirty);
                outbound.push(self.domain_event(EventKind::Alert, &event));
                outbound
            }
            kind @ (EventKind::CameraOffline | EventKind::CameraOnline) => {
                let offline = kind == EventKind::CameraOffline;
                info!(
                    "[{}] Camera {} (ID {}) {}",
                    self.entry_id,
                    event.camera_label(),
                    event.camera_id().unwrap_or_default(),
                    if offline { "went offline" } else { "came online" }
                );

                let mut dirty = Vec::new();
                for record in self.matching_cameras(&event) {
                    let mut guard = write(&record);
                    guard.offline = offline;
                    dirty.extend(guard.observers());
                }
                let mut outbound = updates(dirty);
                outbound.push(self.domain_event(kind, &event));
                outbound
            }
            EventKind::Unrecognized => {
                warn!(
                    "[{}] Got an unhandled event type from Camect: {}",
                    self.entry_id, event.raw
                );
                Vec::new()
            }
        }
    }

    fn handle_mode_event(&self, event: &VendorEvent) -> Vec<FromIntegrationMessage> {
        let desc = event.desc.as_deref().unwrap_or_default();
        let Ok(mode) = desc.parse::<Mode>() else {
            warn!(
                "[{}] Received mode change event to unknown mode: {}",
                self.entry_id, desc
            );
            return Vec::new();
        };

        let changed = {
            let mut state = write(&self.state);
            if state.mode == mode {
                false
            } else {
                state.mode = mode;
                state.info.mode = mode.to_string();
                true
            }
        };

        if changed {
            info!("[{}] Hub mode changed to {}", self.entry_id, mode);
            updates(read(&self.mode_observers).clone())
        } else {
            // The hub repeats the current mode whenever a scheduled alert change fires
            debug!("[{}] Ignoring mode event for unchanged mode {}", self.entry_id, mode);
            Vec::new()
        }
    }

    fn matching_cameras(&self, event: &VendorEvent) -> Vec<SharedRecord> {
        let Some(cam_id) = event.camera_id() else {
            return Vec::new();
        };
        read(&self.cameras)
            .iter()
            .filter(|record| read(record).matches(cam_id))
            .cloned()
            .collect()
    }

    /// Bus message for a classified event
    fn domain_event(&self, kind: EventKind, event: &VendorEvent) -> FromIntegrationMessage {
        let device_id = match event.camera_id() {
            Some(cam_id) => format!("camera.{}_{}", self.id, cam_id),
            None => self.entity_id.clone(),
        };
        let bus_event = event.to_bus_event(kind, &device_id);
        info!(
            "[{}] Firing camera event to bus: {}",
            self.entry_id, bus_event.data
        );
        FromIntegrationMessage::Bus(bus_event)
    }

    /// Forward a classified event to the engine bus. Nothing is acknowledged.
    pub async fn emit_domain_event(&self, kind: EventKind, event: &VendorEvent) {
        let msg = self.domain_event(kind, event);
        deliver(&self.to_engine, &self.entry_id, vec![msg]).await;
    }

    /// Tell the engine an entity's displayed state may be stale
    pub async fn mark_dirty(&self, entity_id: &str) {
        self.mark_all_dirty(vec![entity_id.to_string()]).await;
    }

    async fn mark_all_dirty(&self, entity_ids: Vec<String>) {
        deliver(&self.to_engine, &self.entry_id, updates(entity_ids)).await;
    }

    async fn mark_mode_observers_dirty(&self) {
        let observers = read(&self.mode_observers).clone();
        self.mark_all_dirty(observers).await;
    }
}

/// Send messages to the engine in order, waiting for channel capacity
async fn deliver(
    to_engine: &FromIntegrationSender,
    entry_id: &str,
    messages: Vec<FromIntegrationMessage>,
) {
    for msg in messages {
        if let Err(e) = to_engine.send(msg).await {
            // Closed channel means the engine is gone
            warn!("[{}] Failed to send to engine: {}", entry_id, e);
            return;
        }
    }
}

fn updates(entity_ids: impl IntoIterator<Item = String>) -> Vec<FromIntegrationMessage> {
    entity_ids
        .into_iter()
        .map(|entity_id| FromIntegrationMessage::EntityUpdated { entity_id })
        .collect()
}

impl<A: HubApi> Drop for HubSession<A> {
    fn drop(&mut self) {
        let task = self
            .event_task
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.abort();
        }
    }
}
