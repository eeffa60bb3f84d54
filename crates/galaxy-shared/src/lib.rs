//! Types and the event bus shared by every crate in the Galaxy workspace.
//!
//! This crate holds no behavior beyond the bus itself: device/task/
//! dependency structs are pure data, the error and config types are plain
//! enums/structs, and `Planner`/`DeviceTransport` are trait seams with no
//! default implementation. Behavior (registries, the constellation DAG, the
//! orchestrator loop, transport) lives in `galaxy-fleet` and
//! `galaxy-orchestration`, which both depend on this crate rather than on
//! each other.

pub mod bus;
pub mod config;
pub mod device;
pub mod error;
pub mod event;
pub mod ids;
pub mod planner;
pub mod protocol;
pub mod status;
pub mod task;

pub mod prelude {
    pub use crate::bus::{EventBus, Observer, ObserverId};
    pub use crate::config::{DeviceConfig, GalaxyConfig};
    pub use crate::device::Device;
    pub use crate::error::{GalaxyError, GalaxyResult};
    pub use crate::event::{
        AgentEvent, AttributeBag, ConstellationEvent, ConstellationStatistics, DeviceEvent, Event,
        EventKind, TaskEvent,
    };
    pub use crate::ids::{ConstellationId, DependencyId, DeviceId, TaskId};
    pub use crate::planner::{DeviceTransport, Planner};
    pub use crate::protocol::{Envelope, ErrorCategory, ExecutionResult, WireMessage};
    pub use crate::status::{ConstellationState, DependencyKind, DeviceStatus, Priority, TaskStatus};
    pub use crate::task::{Dependency, Task};
}
