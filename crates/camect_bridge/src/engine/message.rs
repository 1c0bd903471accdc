//! Type-safe message system for the bridge host
//!
//! Messages are split by direction to enforce correct usage at compile time:
//! - `FromIntegrationMessage`: Events from integrations to the engine
//! - `ToIntegrationMessage`: Commands from the engine to integrations

use tokio::sync::oneshot;

use super::device::Device;
use super::entity::SharedEntity;
use super::event::BusEvent;
use super::integration::BoxError;

/// Reply channel for a command; the integration sends exactly one result
pub type Reply<T> = oneshot::Sender<Result<T, BoxError>>;

/// Messages FROM integrations TO the engine (events/state updates)
pub enum FromIntegrationMessage {
    /// A device was registered (hub, camera, ...)
    DeviceRegistered {
        device: Device,
        integration_name: String,
    },

    /// An entity was discovered and registered
    EntityDiscovered {
        entity_id: String,
        entity: SharedEntity,
        device_id: Option<String>,
        integration_name: String,
    },

    /// An entity was removed (integration unloaded, etc.)
    EntityRemoved { entity_id: String },

    /// An entity's displayed state may be stale; the engine re-reads it
    EntityUpdated { entity_id: String },

    /// Fire an event on the engine's bus
    Bus(BusEvent),
}

impl std::fmt::Debug for FromIntegrationMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FromIntegrationMessage::DeviceRegistered {
                device,
                integration_name,
            } => f
                .debug_struct("DeviceRegistered")
                .field("device", &device.id)
                .field("integration_name", integration_name)
                .finish(),
            FromIntegrationMessage::EntityDiscovered {
                entity_id,
                device_id,
                integration_name,
                ..
            } => f
                .debug_struct("EntityDiscovered")
                .field("entity_id", entity_id)
                .field("device_id", device_id)
                .field("integration_name", integration_name)
                .field("entity", &"<entity>")
                .finish(),
            FromIntegrationMessage::EntityRemoved { entity_id } => f
                .debug_struct("EntityRemoved")
                .field("entity_id", entity_id)
                .finish(),
            FromIntegrationMessage::EntityUpdated { entity_id } => f
                .debug_struct("EntityUpdated")
                .field("entity_id", entity_id)
                .finish(),
            FromIntegrationMessage::Bus(event) => f.debug_tuple("Bus").field(event).finish(),
        }
    }
}

/// Messages FROM the engine TO integrations (commands)
#[derive(Debug)]
pub enum ToIntegrationMessage {
    /// Turn a switch-like entity on or off
    Turn {
        entity_id: String,
        on: bool,
        reply: Reply<()>,
    },

    /// Fetch a still image from a camera entity
    Snapshot {
        entity_id: String,
        width: Option<u32>,
        height: Option<u32>,
        reply: Reply<Vec<u8>>,
    },

    /// Re-read everything from the device now instead of waiting for the next poll
    Refresh { reply: Reply<()> },
}

impl ToIntegrationMessage {
    /// Entity the command targets, if any
    pub fn entity_id(&self) -> Option<&str> {
        match self {
            ToIntegrationMessage::Turn { entity_id, .. }
            | ToIntegrationMessage::Snapshot { entity_id, .. } => Some(entity_id),
            ToIntegrationMessage::Refresh { .. } => None,
        }
    }
}
