//! Bridge between Camect camera hubs and a home-automation engine.
//!
//! The [`Engine`] holds entities, devices and a state snapshot, and publishes changes on a
//! broadcast bus. [`CamectIntegration`] connects to one hub through a host-provided
//! [`HubConnector`], reports the hub's cameras, alert switches, motion sensors and mode switch
//! to the engine, and keeps them current from the hub's push events.

pub mod config;
mod engine;
pub mod error;
mod integrations;
pub mod logging;

pub use config::Config;
pub use config::HubConfig;
pub use config::LogLevel;
pub use engine::BoxError;
pub use engine::BusEvent;
pub use engine::Device;
pub use engine::Engine;
pub use engine::Entity;
pub use engine::EntityState;
pub use engine::Event;
pub use engine::FromIntegrationMessage;
pub use engine::FromIntegrationSender;
pub use engine::Integration;
pub use engine::SharedEntity;
pub use engine::State;
pub use engine::ToIntegrationMessage;
pub use integrations::camect;
pub use integrations::camect::register_hubs;
pub use integrations::camect::CamectIntegration;
pub use integrations::camect::CameraInfo;
pub use integrations::camect::EventListener;
pub use integrations::camect::HubApi;
pub use integrations::camect::HubConnector;
pub use integrations::camect::HubInfo;
pub use integrations::camect::Mode;
