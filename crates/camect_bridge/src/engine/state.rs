use std::collections::HashMap;

use chrono::DateTime;
use chrono::Utc;
use serde::Serialize;

/// Last known state of one entity, as read from the entity itself.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityState {
    pub platform: String,
    pub name: String,
    pub available: bool,
    pub icon: Option<String>,
    pub state: serde_json::Value,
    pub attributes: serde_json::Map<String, serde_json::Value>,
    pub last_updated: DateTime<Utc>,
}

impl EntityState {
    /// Whether two readings describe the same state, ignoring when they were taken
    pub fn same_as(&self, other: &EntityState) -> bool {
        self.platform == other.platform
            && self.name == other.name
            && self.available == other.available
            && self.icon == other.icon
            && self.state == other.state
            && self.attributes == other.attributes
    }
}

/// Centralized snapshot of the entire engine state.
#[derive(Debug, Clone, Default, Serialize)]
pub struct State {
    pub entities: HashMap<String, EntityState>,
}

impl State {
    pub fn get(&self, entity_id: &str) -> Option<&EntityState> {
        self.entities.get(entity_id)
    }
}
