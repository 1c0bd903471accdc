use serde::Serialize;

use super::state::EntityState;

/// Automation-level events.
///
/// Distinct from `FromIntegrationMessage` (transport-level). The engine converts
/// `FromIntegrationMessage` into `Event` at the boundary and publishes it on its bus.
#[derive(Debug, Clone)]
pub enum Event {
    StateChanged {
        entity_id: String,
        state: EntityState,
    },
    EntityRemoved {
        entity_id: String,
    },
    Bus(BusEvent),
}

/// A free-form event fired by an integration for downstream automations.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BusEvent {
    pub event_type: String,
    pub data: serde_json::Value,
}
