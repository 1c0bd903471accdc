use std::sync::Arc;
use std::sync::RwLock;
use std::sync::Weak;

use chrono::DateTime;
use chrono::Utc;

use super::camera::CameraRecord;
use super::camera::SharedRecord;
use super::read;
use crate::engine::Entity;

/// Device class reported for every motion sensor
pub const DEVICE_CLASS: &str = "motion";

/// Motion presence for one camera, derived from the time of its last alert
pub struct MotionSensor {
    entity_id: String,
    unique_id: String,
    record: Weak<RwLock<CameraRecord>>,
}

impl MotionSensor {
    pub fn new(record: &SharedRecord) -> Self {
        let unique_id = format!("{}_motion", read(record).unique_id());
        Self {
            entity_id: format!("binary_sensor.{}", unique_id),
            unique_id,
            record: Arc::downgrade(record),
        }
    }

    /// Whether motion was seen within the window, evaluated now
    pub fn is_active(&self) -> bool {
        self.is_active_at(Utc::now())
    }

    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.record
            .upgrade()
            .is_some_and(|record| read(&record).motion_active(now))
    }

    fn detected_obj(&self) -> Option<String> {
        let record = self.record.upgrade()?;
        let obj = read(&record).last_detected_obj.clone();
        Some(obj)
    }
}

impl Entity for MotionSensor {
    fn entity_id(&self) -> &str {
        &self.entity_id
    }

    fn unique_id(&self) -> &str {
        &self.unique_id
    }

    fn name(&self) -> String {
        match self.record.upgrade() {
            Some(record) => format!("{} Motion", read(&record).name),
            None => self.entity_id.clone(),
        }
    }

    fn platform(&self) -> &'static str {
        "binary_sensor"
    }

    fn available(&self) -> bool {
        self.record
            .upgrade()
            .is_some_and(|record| read(&record).available())
    }

    fn icon(&self) -> Option<&'static str> {
        if self.is_active() {
            Some("mdi:motion-sensor")
        } else {
            Some("mdi:motion-sensor-off")
        }
    }

    fn state_json(&self) -> serde_json::Value {
        let state = if self.is_active() { "on" } else { "off" };
        serde_json::json!({ "state": state })
    }

    fn attributes(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut attributes = serde_json::Map::new();
        attributes.insert("device_class".to_string(), DEVICE_CLASS.into());
        if let Some(obj) = self.detected_obj() {
            attributes.insert("detected_obj".to_string(), obj.into());
        }
        attributes
    }
}
