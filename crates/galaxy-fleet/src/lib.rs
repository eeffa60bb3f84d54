//! Device fleet management (§4): registry, WebSocket transport, heartbeat,
//! reconnect, per-device queueing, and the [`fleet::FleetManager`] facade
//! that composes them.

pub mod error;
pub mod fleet;
pub mod heartbeat;
pub mod queue;
pub mod reconnect;
pub mod registry;
pub mod transport;

pub mod prelude {
    pub use crate::error::{FleetError, FleetResult};
    pub use crate::fleet::{FleetConfig, FleetManager};
    pub use crate::registry::DeviceRegistry;
    pub use crate::transport::WebSocketTransport;
}
