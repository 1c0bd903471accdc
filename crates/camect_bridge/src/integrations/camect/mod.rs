mod binary_sensor;
#[allow(clippy::module_inception)]
mod camect;
mod camera;
mod client;
mod event;
mod hub;
mod switch;

use std::sync::PoisonError;
use std::sync::RwLock;
use std::sync::RwLockReadGuard;
use std::sync::RwLockWriteGuard;

use tokio::sync::oneshot;
use tracing::info;

pub use binary_sensor::MotionSensor;
pub use camect::CamectIntegration;
pub use camera::Camera;
pub use camera::CameraRecord;
pub use camera::SharedRecord;
pub use camera::MOTION_WINDOW_SECS;
pub use client::CameraInfo;
pub use client::EventListener;
pub use client::HubApi;
pub use client::HubConnector;
pub use client::HubInfo;
pub use event::EventKind;
pub use event::VendorEvent;
pub use event::BUS_EVENT_TYPE;
pub use hub::HubClaim;
pub use hub::HubClaims;
pub use hub::HubSession;
pub use hub::HubState;
pub use hub::Mode;
pub use switch::AlertSwitch;
pub use switch::ModeSwitch;

use crate::config::Config;
use crate::config::HubConfig;
use crate::engine::Engine;
use crate::engine::Integration;

pub const DOMAIN: &str = "camect";
pub const MANUFACTURER: &str = "Camect";
pub const HUB_MODEL: &str = "Camect Hub";
pub const HUB_SW_VERSION: &str = "1.0";

/// Reason string sent with every write command so the hub's log shows who made the change
pub const COMMAND_REASON: &str = "camect_bridge";

// Poisoned locks are recovered; the guarded data stays usable after a panicking reader.

pub(crate) fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// Register one integration per enabled hub in `config`.
///
/// Setup runs in the background; each receiver resolves once that hub's setup has finished,
/// carrying the setup error if it failed. Entries that resolve to the same hub share one
/// [`HubClaims`], so only the first of them sets up.
pub fn register_hubs<K, F>(
    engine: &Engine,
    config: &Config,
    mut connector: F,
) -> Vec<(String, oneshot::Receiver<Result<(), String>>)>
where
    K: HubConnector,
    F: FnMut(&str, &HubConfig) -> K,
{
    let claims = HubClaims::default();
    config
        .enabled_hubs()
        .into_iter()
        .map(|(entry_id, hub)| {
            let connector = connector(entry_id.as_str(), hub);
            let integration =
                CamectIntegration::new(entry_id, hub, connector).with_claims(claims.clone());
            let name = integration.name().to_string();
            info!("Registering Camect hub {} at {}", name, hub.endpoint());
            let setup = engine.register_integration(name.clone(), Box::new(integration));
            (name, setup)
        })
        .collect()
}
