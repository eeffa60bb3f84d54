//! Composition root for the Galaxy runtime: wires `galaxy-fleet`'s
//! `FleetManager` into `galaxy-orchestration`'s [`TaskDispatcher`]/
//! [`DeviceDirectory`] trait seams and re-exports the public surface of the
//! four library crates under one name.
//!
//! `galaxy-orchestration` never depends on `galaxy-fleet` outside of tests
//! (see `orchestrator.rs`'s module doc) precisely so that this crate is the
//! only place the two are wired together.

use std::sync::Arc;

use async_trait::async_trait;
use galaxy_fleet::fleet::FleetManager;
use galaxy_orchestration::orchestrator::{DeviceDirectory, TaskDispatcher};
use galaxy_shared::device::Device;
use galaxy_shared::error::GalaxyError;
use galaxy_shared::ids::{DeviceId, TaskId};
use galaxy_shared::protocol::ExecutionResult;
use serde_json::Value;

pub mod prelude {
    pub use galaxy_fleet::fleet::{FleetConfig, FleetManager};
    pub use galaxy_observers::prelude::*;
    pub use galaxy_orchestration::prelude::*;
    pub use galaxy_shared::bus::{EventBus, Observer, ObserverId};
    pub use galaxy_shared::config::{DeviceConfig, GalaxyConfig};
    pub use galaxy_shared::error::{GalaxyError, GalaxyResult};
    pub use galaxy_shared::event::{Event, EventKind};
    pub use galaxy_shared::ids::{ConstellationId, DependencyId, DeviceId, TaskId};
    pub use galaxy_shared::planner::{DeviceTransport, Planner};

    pub use crate::{FleetDirectory, FleetDispatcher};
}

/// Adapts a live [`FleetManager`] to [`TaskDispatcher`] (§4.9). The method
/// signatures already match exactly, so this is the one-line forward
/// `fleet.rs`'s doc comment promises.
pub struct FleetDispatcher {
    fleet: Arc<FleetManager>,
}

impl FleetDispatcher {
    pub fn new(fleet: Arc<FleetManager>) -> Self {
        Self { fleet }
    }
}

#[async_trait]
impl TaskDispatcher for FleetDispatcher {
    async fn assign_task_to_device(
        &self,
        device_id: &DeviceId,
        task_id: TaskId,
        description: String,
        parameters: Value,
        timeout_s: f64,
    ) -> Result<ExecutionResult, GalaxyError> {
        self.fleet
            .assign_task_to_device(device_id, task_id, description, parameters, timeout_s)
            .await
    }
}

/// Adapts a live [`FleetManager`]'s registry to [`DeviceDirectory`].
pub struct FleetDirectory {
    fleet: Arc<FleetManager>,
}

impl FleetDirectory {
    pub fn new(fleet: Arc<FleetManager>) -> Self {
        Self { fleet }
    }
}

#[async_trait]
impl DeviceDirectory for FleetDirectory {
    async fn snapshot(&self) -> Vec<Device> {
        self.fleet.registry().snapshot()
    }
}
