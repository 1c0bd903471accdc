//! Push events coming from the hub and the bus events they turn into.

use serde::Deserialize;

use crate::engine::BusEvent;
use crate::error::MalformedEvent;

/// Event type fired on the engine bus for every forwarded hub event
pub const BUS_EVENT_TYPE: &str = "camect_event";

/// Label recorded when an alert does not name the detected object
pub const UNKNOWN_OBJECT: &str = "unknown";

/// Classification of a push event by its `type` field
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum EventKind {
    Mode,
    Alert,
    CameraOffline,
    CameraOnline,
    Unrecognized,
}

impl EventKind {
    /// Classify a vendor event type.
    ///
    /// The hub's type strings are free text. Matching is by substring, first match wins, in the
    /// order mode, alert, offline, online. "offline" must be checked before "online" since the
    /// former contains the latter.
    pub fn classify(event_type: &str) -> Self {
        if event_type.contains("mode") {
            EventKind::Mode
        } else if event_type.contains("alert") {
            EventKind::Alert
        } else if event_type.contains("offline") {
            EventKind::CameraOffline
        } else if event_type.contains("online") {
            EventKind::CameraOnline
        } else {
            EventKind::Unrecognized
        }
    }
}

/// A push event from the hub
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct VendorEvent {
    #[serde(rename = "type")]
    pub event_type: String,

    /// New mode for mode events
    #[serde(default)]
    pub desc: Option<String>,

    /// Camera identifier, possibly a composite that embeds the hub id
    #[serde(default)]
    pub cam_id: Option<String>,

    /// Display name, only used for logging
    #[serde(default)]
    pub cam_name: Option<String>,

    #[serde(default)]
    pub detected_obj: Option<String>,

    /// The event exactly as received
    #[serde(skip)]
    pub raw: serde_json::Value,
}

impl VendorEvent {
    pub fn from_value(raw: serde_json::Value) -> Result<Self, MalformedEvent> {
        if !raw.is_object() {
            return Err(MalformedEvent::NotAnObject(raw));
        }
        let mut event: VendorEvent = serde_json::from_value(raw.clone())?;
        event.raw = raw;
        Ok(event)
    }

    pub fn kind(&self) -> EventKind {
        EventKind::classify(&self.event_type)
    }

    /// Camera id reported by the event; an empty id names no camera
    pub fn camera_id(&self) -> Option<&str> {
        self.cam_id.as_deref().filter(|id| !id.is_empty())
    }

    /// Detected object label, falling back to [`UNKNOWN_OBJECT`]
    pub fn detected_object(&self) -> &str {
        self.detected_obj
            .as_deref()
            .filter(|obj| !obj.is_empty())
            .unwrap_or(UNKNOWN_OBJECT)
    }

    /// Name to use in log lines
    pub fn camera_label(&self) -> &str {
        self.cam_name
            .as_deref()
            .or(self.camera_id())
            .unwrap_or("<unknown camera>")
    }

    /// Build the bus event forwarded for this hub event
    ///
    /// `device_id` is the entity the event is about: the camera entity when the event names a
    /// camera, the hub otherwise.
    pub fn to_bus_event(&self, kind: EventKind, device_id: &str) -> BusEvent {
        BusEvent {
            event_type: BUS_EVENT_TYPE.to_string(),
            data: serde_json::json!({
                "device_id": device_id,
                "type": kind.as_ref(),
                "raw_data": self.raw.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_priority() {
        assert_eq!(EventKind::classify("mode"), EventKind::Mode);
        assert_eq!(EventKind::classify("alert"), EventKind::Alert);
        assert_eq!(EventKind::classify("camera_offline"), EventKind::CameraOffline);
        assert_eq!(EventKind::classify("camera_online"), EventKind::CameraOnline);
        // mode wins over everything else
        assert_eq!(EventKind::classify("mode_alert"), EventKind::Mode);
        assert_eq!(EventKind::classify("alert_offline"), EventKind::Alert);
        assert_eq!(EventKind::classify("heartbeat"), EventKind::Unrecognized);
        assert_eq!(EventKind::classify("ALERT"), EventKind::Unrecognized);
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(EventKind::Alert.as_ref(), "alert");
        assert_eq!(EventKind::CameraOffline.as_ref(), "camera_offline");
        assert_eq!(EventKind::CameraOnline.to_string(), "camera_online");
    }

    #[test]
    fn test_from_value() {
        let raw = serde_json::json!({
            "type": "alert",
            "cam_id": "cam1",
            "cam_name": "Porch",
            "detected_obj": ["person"],
        });
        // detected_obj must be a string
        assert!(VendorEvent::from_value(raw).is_err());

        let raw = serde_json::json!({
            "type": "alert",
            "cam_id": "cam1",
            "cam_name": "Porch",
            "url": "https://hub/alert/1",
        });
        let event = VendorEvent::from_value(raw.clone()).unwrap();
        assert_eq!(event.kind(), EventKind::Alert);
        assert_eq!(event.camera_id(), Some("cam1"));
        assert_eq!(event.detected_object(), UNKNOWN_OBJECT);
        assert_eq!(event.raw, raw);
    }

    #[test]
    fn test_from_value_rejects_non_objects() {
        assert!(matches!(
            VendorEvent::from_value(serde_json::json!("alert")),
            Err(MalformedEvent::NotAnObject(_))
        ));
        assert!(matches!(
            VendorEvent::from_value(serde_json::json!({ "desc": "home" })),
            Err(MalformedEvent::Decode(_))
        ));
    }

    #[test]
    fn test_empty_ids_and_labels() {
        let event = VendorEvent::from_value(serde_json::json!({
            "type": "alert",
            "cam_id": "",
            "detected_obj": "",
        }))
        .unwrap();
        assert_eq!(event.camera_id(), None);
        assert_eq!(event.detected_object(), UNKNOWN_OBJECT);
        assert_eq!(event.camera_label(), "<unknown camera>");
    }

    #[test]
    fn test_bus_event_payload() {
        let event = VendorEvent::from_value(serde_json::json!({
            "type": "camera_offline",
            "cam_id": "cam1",
        }))
        .unwrap();
        let bus = event.to_bus_event(EventKind::CameraOffline, "camera.camect_hub1_cam1");
        assert_eq!(bus.event_type, BUS_EVENT_TYPE);
        insta::assert_snapshot!(
            serde_json::to_string(&bus.data).unwrap(),
            @r#"{"device_id":"camera.camect_hub1_cam1","raw_data":"{\"cam_id\":\"cam1\",\"type\":\"camera_offline\"}","type":"camera_offline"}"#
        );
    }
}
