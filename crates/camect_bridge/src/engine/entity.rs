//! Entity abstraction for the bridge host
//!
//! All entities (cameras, switches, sensors) implement the Entity trait. The engine keeps a
//! shared handle to every discovered entity and re-reads it whenever the owning integration
//! reports it as updated.

use std::sync::Arc;

/// Shared handle the engine holds for every discovered entity
pub type SharedEntity = Arc<dyn Entity>;

/// Base trait that all entities must implement
pub trait Entity: Send + Sync {
    /// Entity ID (e.g. "switch.camect_abc_mode")
    fn entity_id(&self) -> &str;

    /// Stable unique identifier, independent of renames
    fn unique_id(&self) -> &str;

    /// Human-friendly name
    fn name(&self) -> String;

    /// Return the platform type of this entity (e.g. "camera", "switch")
    fn platform(&self) -> &'static str;

    /// Whether the entity is currently able to report a meaningful state
    fn available(&self) -> bool {
        true
    }

    /// MDI icon name, if the entity picks one based on its state
    fn icon(&self) -> Option<&'static str> {
        None
    }

    /// Serialize current state to JSON for Engine storage
    fn state_json(&self) -> serde_json::Value;

    /// Extra state attributes
    fn attributes(&self) -> serde_json::Map<String, serde_json::Value> {
        serde_json::Map::new()
    }
}
