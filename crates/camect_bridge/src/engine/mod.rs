mod device;
#[allow(clippy::module_inception)]
mod engine;
mod entity;
mod event;
mod integration;
mod message;
pub mod state;

pub use device::Device;
pub use engine::Engine;
pub use entity::Entity;
pub use entity::SharedEntity;
pub use event::BusEvent;
pub use event::Event;
pub use integration::BoxError;
pub use integration::FromIntegrationSender;
pub use integration::Integration;
pub use message::FromIntegrationMessage;
pub use message::ToIntegrationMessage;
pub use state::EntityState;
pub use state::State;
