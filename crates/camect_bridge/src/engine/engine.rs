use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;

use arc_swap::ArcSwap;
use chrono::Utc;
use tokio::sync::broadcast;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::device::Device;
use super::entity::SharedEntity;
use super::event::Event;
use super::integration::BoxError;
use super::integration::FromIntegrationReceiver;
use super::integration::FromIntegrationSender;
use super::integration::Integration;
use super::integration::ToIntegrationSender;
use super::message::FromIntegrationMessage;
use super::message::ToIntegrationMessage;
use super::state::EntityState;
use super::state::State;

/// Bridge host engine
///
/// This structure handles the flow of events from integrations, routes commands to the
/// integration that owns the target entity, and maintains a view of the world with State.
pub struct Engine {
    /// Centralized state snapshot (readers load the Arc, writer stores a new one)
    state: ArcSwap<State>,

    /// Entities reported by integrations, re-read on every update
    entities: Mutex<HashMap<String, SharedEntity>>,

    /// Devices reported by integrations
    devices: Mutex<HashMap<String, (Device, String)>>,

    /// Map of entity_id -> integration name for routing messages
    entity_integration_map: Mutex<HashMap<String, String>>,

    /// Communication channels to integrations (for commands)
    integration_channels: Mutex<HashMap<String, ToIntegrationSender>>,

    /// Receive messages from integrations (events)
    message_rx: tokio::sync::Mutex<FromIntegrationReceiver>,

    /// Sender for integrations to report events back to the engine
    message_tx: FromIntegrationSender,

    /// Event bus for automations and other observers
    bus: broadcast::Sender<Event>,

    /// Handles for integration tasks
    integration_handles: Mutex<HashMap<String, JoinHandle<()>>>,
}

/// Capacity for the integration→engine message channel
/// Provides backpressure when integrations send faster than the engine can process
const FROM_INTEGRATION_CHANNEL_SIZE: usize = 1024;

/// Events buffered per bus subscriber before it starts lagging
const BUS_CAPACITY: usize = 256;

fn locked<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn not_found(message: String) -> BoxError {
    Box::new(std::io::Error::new(std::io::ErrorKind::NotFound, message))
}

impl Engine {
    /// Create a new Engine instance
    pub fn new() -> Self {
        let (message_tx, message_rx) = mpsc::channel(FROM_INTEGRATION_CHANNEL_SIZE);
        let (bus, _) = broadcast::channel(BUS_CAPACITY);
        Self {
            state: ArcSwap::new(Arc::default()),
            entities: Mutex::new(HashMap::new()),
            devices: Mutex::new(HashMap::new()),
            entity_integration_map: Mutex::new(HashMap::new()),
            integration_channels: Mutex::new(HashMap::new()),
            message_rx: tokio::sync::Mutex::new(message_rx),
            message_tx,
            bus,
            integration_handles: Mutex::new(HashMap::new()),
        }
    }

    /// Register an integration with the engine
    ///
    /// This spawns the integration in a background task, wires up channels,
    /// and starts its setup process. The returned receiver resolves once setup
    /// has finished, carrying the setup error if there was one.
    pub fn register_integration(
        &self,
        name: String,
        mut integration: Box<dyn Integration>,
    ) -> oneshot::Receiver<Result<(), String>> {
        let (to_integration_tx, mut to_integration_rx) = mpsc::unbounded_channel();
        let from_integration_tx = self.message_tx.clone();
        let (setup_tx, setup_rx) = oneshot::channel();

        locked(&self.integration_channels).insert(name.clone(), to_integration_tx);

        // Spawn integration task
        let task_name = name.clone();
        let handle = tokio::spawn(async move {
            let name = task_name;

            // Setup integration (gives it the sender for events)
            if let Err(e) = integration.setup(from_integration_tx).await {
                warn!("Integration '{}' setup failed: {}", name, e);
                let _ = setup_tx.send(Err(e.to_string()));
                return;
            }
            let _ = setup_tx.send(Ok(()));

            // Process commands from engine
            while let Some(msg) = to_integration_rx.recv().await {
                if let Err(e) = integration.handle_message(msg).await {
                    warn!("Integration '{}' failed to handle message: {}", name, e);
                }
            }

            if let Err(e) = integration.shutdown().await {
                warn!("Integration '{}' shutdown failed: {}", name, e);
            }
        });

        locked(&self.integration_handles).insert(name, handle);
        setup_rx
    }

    /// Unload an integration
    ///
    /// Closing its command channel lets the integration task drain, shut down and exit.
    /// Entities and devices it owned are dropped from the engine.
    pub async fn unload(&self, name: &str) -> Result<(), BoxError> {
        let sender = locked(&self.integration_channels).remove(name);
        if sender.is_none() {
            return Err(not_found(format!("Integration not found: {}", name)));
        }
        drop(sender);

        let handle = locked(&self.integration_handles).remove(name);
        if let Some(handle) = handle {
            handle.await?;
        }

        let owned: Vec<String> = locked(&self.entity_integration_map)
            .iter()
            .filter(|(_, integration)| integration.as_str() == name)
            .map(|(entity_id, _)| entity_id.clone())
            .collect();
        for entity_id in owned {
            self.remove_entity(&entity_id);
        }
        locked(&self.devices).retain(|_, (_, integration)| integration != name);

        info!("Integration '{}' unloaded", name);
        Ok(())
    }

    /// Subscribe to the engine's event bus
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.bus.subscribe()
    }

    /// Get a snapshot of the current engine state.
    ///
    /// Clones the `Arc` (atomic refcount bump), essentially free.
    pub fn state_snapshot(&self) -> Arc<State> {
        self.state.load_full()
    }

    /// Look up a registered device
    pub fn device(&self, device_id: &str) -> Option<Device> {
        locked(&self.devices)
            .get(device_id)
            .map(|(device, _)| device.clone())
    }

    /// Turn a switch-like entity on
    pub async fn turn_on(&self, entity_id: &str) -> Result<(), BoxError> {
        self.turn(entity_id, true).await
    }

    /// Turn a switch-like entity off
    pub async fn turn_off(&self, entity_id: &str) -> Result<(), BoxError> {
        self.turn(entity_id, false).await
    }

    async fn turn(&self, entity_id: &str, on: bool) -> Result<(), BoxError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(ToIntegrationMessage::Turn {
            entity_id: entity_id.to_string(),
            on,
            reply,
        })?;
        rx.await?
    }

    /// Fetch a still image from a camera entity
    pub async fn snapshot(
        &self,
        entity_id: &str,
        width: Option<u32>,
        height: Option<u32>,
    ) -> Result<Vec<u8>, BoxError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(ToIntegrationMessage::Snapshot {
            entity_id: entity_id.to_string(),
            width,
            height,
            reply,
        })?;
        rx.await?
    }

    /// Ask an integration to re-read its devices now
    pub async fn refresh(&self, integration_name: &str) -> Result<(), BoxError> {
        let (reply, rx) = oneshot::channel();
        self.send_to(integration_name, ToIntegrationMessage::Refresh { reply })?;
        rx.await?
    }

    /// Send a command to an integration
    ///
    /// Routes the command to the appropriate integration based on entity_id.
    pub fn send_command(&self, msg: ToIntegrationMessage) -> Result<(), BoxError> {
        let entity_id = msg
            .entity_id()
            .ok_or_else(|| not_found("Command has no target entity".to_string()))?
            .to_string();

        // Route to the integration that owns this entity
        let integration_name = locked(&self.entity_integration_map)
            .get(&entity_id)
            .cloned()
            .ok_or_else(|| not_found(format!("No integration found for entity: {}", entity_id)))?;

        self.send_to(&integration_name, msg)
    }

    fn send_to(&self, integration_name: &str, msg: ToIntegrationMessage) -> Result<(), BoxError> {
        let channels = locked(&self.integration_channels);
        let tx = channels.get(integration_name).ok_or_else(|| {
            not_found(format!("Integration channel not found: {}", integration_name))
        })?;

        tx.send(msg).map_err(|_| -> BoxError {
            Box::new(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                format!("Integration '{}' is not running", integration_name),
            ))
        })
    }

    /// Run the engine's main event loop
    ///
    /// Processes incoming events from integrations and updates state.
    pub async fn run(&self) {
        info!("Engine starting");

        // Main event loop - only receives FromIntegration messages
        let mut rx = self.message_rx.lock().await;
        while let Some(msg) = rx.recv().await {
            self.handle_event(msg);
        }

        info!("Engine shutting down");
    }

    /// Handle an event from an integration
    fn handle_event(&self, msg: FromIntegrationMessage) {
        match msg {
            FromIntegrationMessage::DeviceRegistered {
                device,
                integration_name,
            } => {
                info!("Device registered: {} (from {})", device.id, integration_name);
                locked(&self.devices).insert(device.id.clone(), (device, integration_name));
            }
            FromIntegrationMessage::EntityDiscovered {
                entity_id,
                entity,
                device_id,
                integration_name,
            } => {
                info!(
                    "Entity discovered: {} (from {})",
                    entity_id, integration_name
                );

                if let Some(device_id) = device_id {
                    match locked(&self.devices).get_mut(&device_id) {
                        Some((device, _)) => device.add_entity(entity_id.clone()),
                        None => warn!("Entity {} refers to unknown device {}", entity_id, device_id),
                    }
                }

                // Record which integration owns this entity for command routing.
                locked(&self.entity_integration_map).insert(entity_id.clone(), integration_name);
                locked(&self.entities).insert(entity_id.clone(), entity);

                self.refresh_entity_state(&entity_id);
            }
            FromIntegrationMessage::EntityRemoved { entity_id } => {
                info!("Entity removed: {}", entity_id);
                self.remove_entity(&entity_id);
            }
            FromIntegrationMessage::EntityUpdated { entity_id } => {
                self.refresh_entity_state(&entity_id);
            }
            FromIntegrationMessage::Bus(event) => {
                debug!("Bus event: {}", event.event_type);
                // No subscribers is fine, the event is fire-and-forget
                let _ = self.bus.send(Event::Bus(event));
            }
        }
    }

    /// Re-read an entity and store its state if it changed
    fn refresh_entity_state(&self, entity_id: &str) {
        let entity = match locked(&self.entities).get(entity_id) {
            Some(entity) => entity.clone(),
            None => {
                debug!("Update for unknown entity: {}", entity_id);
                return;
            }
        };

        let reading = EntityState {
            platform: entity.platform().to_string(),
            name: entity.name(),
            available: entity.available(),
            icon: entity.icon().map(str::to_string),
            state: entity.state_json(),
            attributes: entity.attributes(),
            last_updated: Utc::now(),
        };

        let current = self.state.load();
        if current
            .get(entity_id)
            .is_some_and(|previous| previous.same_as(&reading))
        {
            return;
        }

        debug!("State changed: {} -> {}", entity_id, reading.state);
        let mut state = State::clone(&current);
        state
            .entities
            .insert(entity_id.to_string(), reading.clone());
        self.state.store(Arc::new(state));

        let _ = self.bus.send(Event::StateChanged {
            entity_id: entity_id.to_string(),
            state: reading,
        });
    }

    fn remove_entity(&self, entity_id: &str) {
        locked(&self.entities).remove(entity_id);
        locked(&self.entity_integration_map).remove(entity_id);
        for (device, _) in locked(&self.devices).values_mut() {
            device.remove_entity(entity_id);
        }

        let current = self.state.load();
        if current.get(entity_id).is_some() {
            let mut state = State::clone(&current);
            state.entities.remove(entity_id);
            self.state.store(Arc::new(state));
            let _ = self.bus.send(Event::EntityRemoved {
                entity_id: entity_id.to_string(),
            });
        }
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Entity;

    struct FixedEntity {
        id: String,
        on: std::sync::atomic::AtomicBool,
    }

    impl Entity for FixedEntity {
        fn entity_id(&self) -> &str {
            &self.id
        }

        fn unique_id(&self) -> &str {
            &self.id
        }

        fn name(&self) -> String {
            "Fixed".to_string()
        }

        fn platform(&self) -> &'static str {
            "switch"
        }

        fn state_json(&self) -> serde_json::Value {
            serde_json::json!({ "on": self.on.load(std::sync::atomic::Ordering::SeqCst) })
        }
    }

    fn discover(engine: &Engine, entity: SharedEntity) {
        engine.handle_event(FromIntegrationMessage::EntityDiscovered {
            entity_id: entity.entity_id().to_string(),
            entity,
            device_id: None,
            integration_name: "test".to_string(),
        });
    }

    #[test]
    fn test_discovery_reads_initial_state() {
        let engine = Engine::new();
        let entity = Arc::new(FixedEntity {
            id: "switch.fixed".to_string(),
            on: true.into(),
        });
        discover(&engine, entity);

        let state = engine.state_snapshot();
        let reading = state.get("switch.fixed").unwrap();
        assert_eq!(reading.platform, "switch");
        assert_eq!(reading.state["on"], true);
        assert!(reading.available);
    }

    #[test]
    fn test_update_publishes_only_on_change() {
        let engine = Engine::new();
        let entity = Arc::new(FixedEntity {
            id: "switch.fixed".to_string(),
            on: false.into(),
        });
        discover(&engine, entity.clone());
        let mut bus = engine.subscribe();

        engine.handle_event(FromIntegrationMessage::EntityUpdated {
            entity_id: "switch.fixed".to_string(),
        });
        assert!(bus.try_recv().is_err());

        entity.on.store(true, std::sync::atomic::Ordering::SeqCst);
        engine.handle_event(FromIntegrationMessage::EntityUpdated {
            entity_id: "switch.fixed".to_string(),
        });
        match bus.try_recv().unwrap() {
            Event::StateChanged { entity_id, state } => {
                assert_eq!(entity_id, "switch.fixed");
                assert_eq!(state.state["on"], true);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_entity_removed_clears_state_and_device() {
        let engine = Engine::new();
        engine.handle_event(FromIntegrationMessage::DeviceRegistered {
            device: Device::new("dev".to_string(), "Device".to_string()),
            integration_name: "test".to_string(),
        });
        engine.handle_event(FromIntegrationMessage::EntityDiscovered {
            entity_id: "switch.fixed".to_string(),
            entity: Arc::new(FixedEntity {
                id: "switch.fixed".to_string(),
                on: false.into(),
            }),
            device_id: Some("dev".to_string()),
            integration_name: "test".to_string(),
        });
        assert_eq!(engine.device("dev").unwrap().entity_ids, vec!["switch.fixed"]);

        engine.handle_event(FromIntegrationMessage::EntityRemoved {
            entity_id: "switch.fixed".to_string(),
        });
        assert!(engine.state_snapshot().get("switch.fixed").is_none());
        assert!(engine.device("dev").unwrap().entity_ids.is_empty());
    }

    #[test]
    fn test_send_command_unknown_entity() {
        let engine = Engine::new();
        let (reply, _rx) = oneshot::channel();
        let result = engine.send_command(ToIntegrationMessage::Turn {
            entity_id: "switch.missing".to_string(),
            on: true,
            reply,
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_bus_event_forwarded() {
        let engine = Engine::new();
        let mut bus = engine.subscribe();
        engine.handle_event(FromIntegrationMessage::Bus(crate::engine::BusEvent {
            event_type: "camect_event".to_string(),
            data: serde_json::json!({ "type": "alert" }),
        }));
        match bus.try_recv().unwrap() {
            Event::Bus(event) => assert_eq!(event.data["type"], "alert"),
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
