//! The vendor hub client seam.
//!
//! The Camect client itself (HTTPS API, event websocket) is provided by the embedding host. It
//! is blocking: every call made from async code goes through [`run_blocking`].

use std::sync::Arc;

use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;

use super::hub::Mode;
use crate::error::ApiError;

/// Callback invoked by the vendor client for every push event, on a vendor-owned thread
pub type EventListener = Box<dyn Fn(serde_json::Value) + Send + Sync>;

/// Hub metadata as reported by the vendor client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HubInfo {
    pub id: String,
    pub name: String,
    /// Raw mode string; anything other than `default`/`home` is treated as `default`
    #[serde(default)]
    pub mode: String,
    #[serde(default)]
    pub local_https_url: Option<String>,
}

/// One camera as reported by the vendor client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraInfo {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub make: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: String,
    #[serde(deserialize_with = "number_or_string")]
    pub width: u32,
    #[serde(deserialize_with = "number_or_string")]
    pub height: u32,
    #[serde(default)]
    pub is_alert_disabled: bool,
    #[serde(default)]
    pub disabled: bool,
}

/// The hub reports dimensions either as numbers or as numeric strings
fn number_or_string<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Dimension {
        Number(u32),
        Text(String),
    }

    match Dimension::deserialize(deserializer)? {
        Dimension::Number(n) => Ok(n),
        Dimension::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// Blocking operations offered by a connected hub client
pub trait HubApi: Send + Sync + 'static {
    fn get_info(&self) -> Result<HubInfo, ApiError>;

    fn list_cameras(&self) -> Result<Vec<CameraInfo>, ApiError>;

    fn set_mode(&self, mode: Mode, reason: &str) -> Result<(), ApiError>;

    fn enable_alert(&self, cam_id: &str, reason: &str) -> Result<(), ApiError>;

    fn disable_alert(&self, cam_id: &str, reason: &str) -> Result<(), ApiError>;

    /// JPEG bytes of a still image at the requested size
    fn snapshot_camera(&self, cam_id: &str, width: u32, height: u32) -> Result<Vec<u8>, ApiError>;

    /// Register a push-event callback. The client delivers its events serially.
    fn add_event_listener(&self, listener: EventListener);
}

/// Opens authenticated connections to a hub
pub trait HubConnector: Send + Sync + 'static {
    type Api: HubApi;

    /// Connect to `endpoint` (`host:port`). Blocking.
    fn connect(&self, endpoint: &str, username: &str, password: &str)
        -> Result<Self::Api, ApiError>;
}

/// Run a blocking vendor call on the blocking thread pool and wait for it
pub(crate) async fn run_blocking<A, T, F>(api: &Arc<A>, call: F) -> Result<T, ApiError>
where
    A: HubApi,
    T: Send + 'static,
    F: FnOnce(&A) -> Result<T, ApiError> + Send + 'static,
{
    let api = api.clone();
    tokio::task::spawn_blocking(move || call(&api))
        .await
        .map_err(|e| ApiError::other(format!("blocking task failed: {}", e)))?
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_camera_info_dimensions_as_strings() {
        let json = serde_json::json!({
            "id": "cam1",
            "name": "Porch",
            "make": null,
            "url": "rtsp://10.0.0.2/porch",
            "width": "1280",
            "height": 720,
            "is_alert_disabled": true,
            "disabled": false
        });
        let info: CameraInfo = serde_json::from_value(json).unwrap();
        assert_eq!(info.width, 1280);
        assert_eq!(info.height, 720);
        assert_eq!(info.make, None);
        assert!(info.is_alert_disabled);
    }

    #[test]
    fn test_camera_info_bad_dimension() {
        let json = serde_json::json!({
            "id": "cam1",
            "name": "Porch",
            "width": "wide",
            "height": 720
        });
        assert!(serde_json::from_value::<CameraInfo>(json).is_err());
    }

    #[test]
    fn test_hub_info_optional_fields() {
        let json = serde_json::json!({ "id": "abc", "name": "Hub" });
        let info: HubInfo = serde_json::from_value(json).unwrap();
        assert_eq!(info.mode, "");
        assert_eq!(info.local_https_url, None);
    }

    #[tokio::test]
    async fn test_run_blocking_returns_result() {
        let hub = Arc::new(mock::MockHub::new(mock::hub_info("home"), Vec::new()));
        let info = run_blocking(&hub, |api| api.get_info()).await.unwrap();
        assert_eq!(info.id, "hub1");
        assert_eq!(hub.calls(), vec![mock::Call::GetInfo]);
    }
}
