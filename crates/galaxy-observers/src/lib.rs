//! Bus-driven observers (§4.10): components that subscribe to the shared
//! [`galaxy_shared::bus::EventBus`] purely to report on the system, never to
//! drive it. Neither module here holds orchestration state of its own.

pub mod metrics;
pub mod snapshot;

pub mod prelude {
    pub use crate::metrics::{MetricsObserver, MetricsSnapshot};
    pub use crate::snapshot::{SnapshotBroadcaster, SnapshotSink};
}
