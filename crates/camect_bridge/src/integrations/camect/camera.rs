//! Cameras connected to a Camect hub.

use std::sync::Arc;
use std::sync::RwLock;
use std::sync::Weak;

use chrono::DateTime;
use chrono::TimeDelta;
use chrono::Utc;

use super::client::run_blocking;
use super::client::CameraInfo;
use super::client::HubApi;
use super::event::UNKNOWN_OBJECT;
use super::read;
use super::DOMAIN;
use crate::engine::Device;
use crate::engine::Entity;
use crate::error::CommandError;

/// How long after an alert a camera still counts as seeing motion
pub const MOTION_WINDOW_SECS: i64 = 20;

/// Camera records are owned by the hub session; views only hold weak handles.
pub type SharedRecord = Arc<RwLock<CameraRecord>>;

/// Mirror of one camera's state on the hub
#[derive(Debug, Clone, PartialEq)]
pub struct CameraRecord {
    /// Vendor camera id
    pub device_id: String,
    hub_id: String,
    pub name: String,
    pub make: String,
    pub model: String,
    pub url: String,
    pub width: u32,
    pub height: u32,
    pub is_alert_disabled: bool,
    /// Vendor-reported disabled flag
    pub disabled: bool,
    /// Tracked from online/offline push events
    pub offline: bool,
    pub last_motion: Option<DateTime<Utc>>,
    pub last_detected_obj: String,
    /// Entity ids of the alert switches observing this camera
    pub alert_switches: Vec<String>,
    /// Entity ids of the motion sensors observing this camera
    pub motion_sensors: Vec<String>,
}

impl CameraRecord {
    pub fn new(hub_id: &str, info: &CameraInfo) -> Self {
        let mut record = Self {
            device_id: info.id.clone(),
            hub_id: hub_id.to_string(),
            name: String::new(),
            make: String::new(),
            model: String::new(),
            url: String::new(),
            width: 0,
            height: 0,
            is_alert_disabled: false,
            disabled: false,
            offline: false,
            last_motion: None,
            last_detected_obj: String::new(),
            alert_switches: Vec::new(),
            motion_sensors: Vec::new(),
        };
        record.apply_info(info);
        record
    }

    /// Copy the vendor-owned fields from a fresh camera listing
    pub fn apply_info(&mut self, info: &CameraInfo) {
        self.name = info.name.clone();
        self.make = info.make.clone().unwrap_or_default();
        self.model = info.model.clone().unwrap_or_default();
        self.url = info.url.clone();
        self.width = info.width;
        self.height = info.height;
        self.is_alert_disabled = info.is_alert_disabled;
        self.disabled = info.disabled;
    }

    pub fn unique_id(&self) -> String {
        format!("{}_{}_{}", DOMAIN, self.hub_id, self.device_id)
    }

    pub fn entity_id(&self) -> String {
        format!("camera.{}", self.unique_id())
    }

    /// Whether an id reported by the hub refers to this camera.
    ///
    /// The hub sometimes reports composite ids that embed the hub id, so this is a substring
    /// match rather than equality.
    pub fn matches(&self, reported_id: &str) -> bool {
        !reported_id.is_empty() && reported_id.contains(self.device_id.as_str())
    }

    pub fn enabled(&self) -> bool {
        !self.disabled
    }

    /// Single availability predicate every view of this camera goes through
    pub fn available(&self) -> bool {
        self.enabled() && !self.offline
    }

    pub fn is_streaming(&self) -> bool {
        self.available()
    }

    pub fn is_recording(&self) -> bool {
        self.available()
    }

    pub fn is_on(&self) -> bool {
        self.available()
    }

    pub fn motion_detection_enabled(&self) -> bool {
        !self.is_alert_disabled
    }

    /// True while the last alert is less than [`MOTION_WINDOW_SECS`] old
    pub fn motion_active(&self, now: DateTime<Utc>) -> bool {
        match self.last_motion {
            Some(last) => now - last < TimeDelta::seconds(MOTION_WINDOW_SECS),
            None => false,
        }
    }

    pub fn record_motion(&mut self, now: DateTime<Utc>, detected_obj: Option<&str>) {
        self.last_motion = Some(now);
        self.last_detected_obj = detected_obj
            .filter(|obj| !obj.is_empty())
            .unwrap_or(UNKNOWN_OBJECT)
            .to_string();
    }

    /// The camera entity plus every view linked to it
    pub fn observers(&self) -> Vec<String> {
        let mut ids = vec![self.entity_id()];
        ids.extend(self.alert_switches.iter().cloned());
        ids.extend(self.motion_sensors.iter().cloned());
        ids
    }

    /// Device entry for this camera, reached through its hub
    pub fn device(&self, hub_device_id: &str) -> Device {
        let mut device = Device::new(self.entity_id(), self.name.clone());
        device.identifiers.push((DOMAIN.to_string(), self.entity_id()));
        device.manufacturer = Some(self.make.clone());
        device.model = Some(self.model.clone());
        device.via_device = Some(hub_device_id.to_string());
        device
    }
}

/// Camera entity backed by a [`CameraRecord`]
pub struct Camera<A: HubApi> {
    entity_id: String,
    unique_id: String,
    record: Weak<RwLock<CameraRecord>>,
    api: Arc<A>,
}

impl<A: HubApi> Camera<A> {
    pub fn new(record: &SharedRecord, api: Arc<A>) -> Self {
        let (entity_id, unique_id) = {
            let record = read(record);
            (record.entity_id(), record.unique_id())
        };
        Self {
            entity_id,
            unique_id,
            record: Arc::downgrade(record),
            api,
        }
    }

    fn with_record<T>(&self, f: impl FnOnce(&CameraRecord) -> T) -> Option<T> {
        self.record.upgrade().map(|record| {
            let guard = read(&record);
            f(&guard)
        })
    }

    /// Fetch a still image. Missing dimensions default to the camera's reported size.
    pub async fn snapshot(
        &self,
        width: Option<u32>,
        height: Option<u32>,
    ) -> Result<Vec<u8>, CommandError> {
        let (cam_id, width, height) = self
            .with_record(|r| {
                (
                    r.device_id.clone(),
                    width.unwrap_or(r.width),
                    height.unwrap_or(r.height),
                )
            })
            .ok_or_else(|| CommandError::Detached(self.entity_id.clone()))?;

        run_blocking(&self.api, move |api| {
            api.snapshot_camera(&cam_id, width, height)
        })
        .await
        .map_err(|source| CommandError::Api {
            command: "snapshot camera",
            source,
        })
    }
}

impl<A: HubApi> Entity for Camera<A> {
    fn entity_id(&self) -> &str {
        &self.entity_id
    }

    fn unique_id(&self) -> &str {
        &self.unique_id
    }

    fn name(&self) -> String {
        self.with_record(|r| r.name.clone())
            .unwrap_or_else(|| self.entity_id.clone())
    }

    fn platform(&self) -> &'static str {
        "camera"
    }

    fn available(&self) -> bool {
        self.with_record(CameraRecord::available).unwrap_or(false)
    }

    fn state_json(&self) -> serde_json::Value {
        let state = self
            .with_record(|r| if r.is_recording() { "recording" } else { "idle" })
            .unwrap_or("unavailable");
        serde_json::json!({ "state": state })
    }

    fn attributes(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut attributes = serde_json::Map::new();
        self.with_record(|r| {
            attributes.insert("brand".to_string(), r.make.clone().into());
            attributes.insert("model".to_string(), r.model.clone().into());
            attributes.insert(
                "motion_detection".to_string(),
                r.motion_detection_enabled().into(),
            );
            attributes.insert("last_detected_obj".to_string(), r.last_detected_obj.clone().into());
        });
        attributes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrations::camect::client::mock;
    use crate::integrations::camect::client::mock::Call;
    use crate::integrations::camect::client::mock::MockHub;
    use crate::integrations::camect::write;

    fn record(id: &str) -> CameraRecord {
        CameraRecord::new("hub1", &mock::camera_info(id))
    }

    fn at(secs: i64, millis: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
            + TimeDelta::seconds(secs)
            + TimeDelta::milliseconds(millis)
    }

    #[test]
    fn test_new_record_defaults() {
        let mut info = mock::camera_info("cam1");
        info.make = None;
        let record = CameraRecord::new("hub1", &info);
        assert_eq!(record.make, "");
        assert_eq!(record.model, "");
        assert!(!record.offline);
        assert_eq!(record.last_motion, None);
        assert_eq!(record.last_detected_obj, "");
        assert_eq!(record.unique_id(), "camect_hub1_cam1");
        assert_eq!(record.entity_id(), "camera.camect_hub1_cam1");
    }

    #[test]
    fn test_availability_truth_table() {
        for (disabled, offline) in [(false, false), (false, true), (true, false), (true, true)] {
            let mut record = record("cam1");
            record.disabled = disabled;
            record.offline = offline;
            let expected = !disabled && !offline;
            assert_eq!(record.available(), expected);
            assert_eq!(record.is_streaming(), expected);
            assert_eq!(record.is_recording(), expected);
            assert_eq!(record.is_on(), expected);
        }
    }

    #[test]
    fn test_availability_after_refresh() {
        let mut record = record("cam1");
        record.offline = true;
        let mut info = mock::camera_info("cam1");
        info.disabled = false;
        record.apply_info(&info);
        // a metadata refresh does not clear the offline flag
        assert!(!record.available());
        assert_eq!(record.available(), record.enabled() && !record.offline);
    }

    #[test]
    fn test_motion_window_boundaries() {
        let mut record = record("cam1");
        assert!(!record.motion_active(at(0, 0)));

        record.record_motion(at(0, 0), Some("person"));
        assert!(record.motion_active(at(0, 0)));
        assert!(record.motion_active(at(19, 999)));
        assert!(!record.motion_active(at(20, 0)));
        assert!(!record.motion_active(at(20, 1)));
    }

    #[test]
    fn test_record_motion_unknown_object() {
        let mut record = record("cam1");
        record.record_motion(at(0, 0), None);
        assert_eq!(record.last_detected_obj, UNKNOWN_OBJECT);
        assert_eq!(record.last_motion, Some(at(0, 0)));
    }

    #[test]
    fn test_matches_substring() {
        let record = record("cam456");
        assert!(record.matches("cam456"));
        assert!(record.matches("hub123-cam456"));
        assert!(!record.matches("cam45"));
        assert!(!record.matches(""));
    }

    #[test]
    fn test_device_via_hub() {
        let device = record("cam1").device("camect_hub1");
        assert_eq!(device.id, "camera.camect_hub1_cam1");
        assert_eq!(device.via_device.as_deref(), Some("camect_hub1"));
        assert_eq!(device.manufacturer.as_deref(), Some("Reolink"));
    }

    #[tokio::test]
    async fn test_camera_entity_reads_record() {
        let hub = Arc::new(MockHub::new(mock::hub_info("default"), Vec::new()));
        let shared: SharedRecord = Arc::new(RwLock::new(record("cam1")));
        let camera = Camera::new(&shared, hub.clone());

        assert_eq!(camera.entity_id(), "camera.camect_hub1_cam1");
        assert_eq!(camera.name(), "Camera cam1");
        assert!(camera.available());
        assert_eq!(camera.state_json()["state"], "recording");

        write(&shared).offline = true;
        assert!(!camera.available());
        assert_eq!(camera.state_json()["state"], "idle");

        write(&shared).offline = false;
        write(&shared).disabled = true;
        assert_eq!(camera.state_json()["state"], "idle");

        drop(shared);
        assert!(!camera.available());
        assert_eq!(camera.state_json()["state"], "unavailable");
        assert_eq!(camera.name(), "camera.camect_hub1_cam1");
        assert!(matches!(
            camera.snapshot(None, None).await,
            Err(CommandError::Detached(_))
        ));
    }

    #[tokio::test]
    async fn test_snapshot_defaults_to_reported_size() {
        let hub = Arc::new(MockHub::new(mock::hub_info("default"), Vec::new()));
        let shared: SharedRecord = Arc::new(RwLock::new(record("cam1")));
        let camera = Camera::new(&shared, hub.clone());

        let image = camera.snapshot(None, Some(360)).await.unwrap();
        assert!(!image.is_empty());
        assert_eq!(
            hub.calls(),
            vec![Call::Snapshot("cam1".to_string(), 1920, 360)]
        );
    }
}
