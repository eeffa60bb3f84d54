//! Per-crate error enum, following the workspace's one-thiserror-enum-per-crate
//! convention.

use galaxy_shared::error::GalaxyError;
use galaxy_shared::ids::DeviceId;
use thiserror::Error;

pub type FleetResult<T> = Result<T, FleetError>;

#[derive(Debug, Error)]
pub enum FleetError {
    #[error(transparent)]
    Galaxy(#[from] GalaxyError),

    #[error("device {0} is not connected")]
    NotConnected(DeviceId),

    #[error("device {0} already has a live reconnect worker")]
    ReconnectAlreadyRunning(DeviceId),

    #[error("invalid device url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("no reply received for correlation id {0} before the timeout")]
    RequestTimeout(String),
}
