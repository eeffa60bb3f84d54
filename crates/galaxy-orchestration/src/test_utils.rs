//! In-memory test doubles for [`TaskDispatcher`]/[`DeviceDirectory`], plus a
//! fake planner observer, gated behind `test-utils` so scenario tests under
//! `tests/` and the facade crate can drive the orchestrator loop without a
//! real fleet or a real planning agent. Mirrors the teacher's `test-utils`
//! feature convention for exposing fixtures across crate boundaries.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use galaxy_shared::bus::{EventBus, Observer};
use galaxy_shared::device::Device;
use galaxy_shared::error::GalaxyError;
use galaxy_shared::event::{ConstellationEvent, Event};
use galaxy_shared::ids::{DeviceId, TaskId};
use galaxy_shared::protocol::ExecutionResult;
use galaxy_shared::status::{ConstellationState, DeviceStatus, TaskStatus};
use serde_json::Value;

use crate::constellation::Constellation;
use crate::orchestrator::{DeviceDirectory, TaskDispatcher};

/// A `TaskDispatcher` whose per-task outcome is scripted ahead of time;
/// tasks with no scripted outcome succeed trivially against a synthetic
/// device. Records dispatch order so scenario tests can assert on it.
#[derive(Default)]
pub struct ScriptedDispatcher {
    outcomes: StdMutex<HashMap<TaskId, ExecutionResult>>,
    calls: StdMutex<Vec<TaskId>>,
}

impl ScriptedDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-registers the result `task_id` should resolve to.
    pub fn script(&self, task_id: TaskId, outcome: ExecutionResult) {
        self.outcomes.lock().unwrap().insert(task_id, outcome);
    }

    /// Task ids in the order `assign_task_to_device` was called, not the
    /// order they resolved in.
    pub fn calls(&self) -> Vec<TaskId> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl TaskDispatcher for ScriptedDispatcher {
    async fn assign_task_to_device(
        &self,
        device_id: &DeviceId,
        task_id: TaskId,
        _description: String,
        _parameters: Value,
        _timeout_s: f64,
    ) -> Result<ExecutionResult, GalaxyError> {
        self.calls.lock().unwrap().push(task_id.clone());
        let outcome = self
            .outcomes
            .lock()
            .unwrap()
            .remove(&task_id)
            .unwrap_or_else(|| ExecutionResult::success(task_id.clone(), Value::Null, device_id.clone()));
        Ok(outcome)
    }
}

/// A fixed snapshot of devices, all `IDLE`, for `AssignmentStrategy`s like
/// [`crate::orchestrator::RoundRobinStrategy`] to choose among.
pub struct FixedDirectory(Vec<Device>);

impl FixedDirectory {
    pub fn new(device_ids: impl IntoIterator<Item = DeviceId>) -> Self {
        Self(
            device_ids
                .into_iter()
                .map(|id| {
                    let mut device = Device::new(id, "ws://test", "linux", vec![], HashMap::new(), 5);
                    device.status = DeviceStatus::Idle;
                    device
                })
                .collect(),
        )
    }
}

#[async_trait]
impl DeviceDirectory for FixedDirectory {
    async fn snapshot(&self) -> Vec<Device> {
        self.0.clone()
    }
}

/// A fake planner: on `TASK_COMPLETED`/`TASK_FAILED` for `trigger_task_id`,
/// publishes `CONSTELLATION_MODIFIED` carrying `revised`. Registering this
/// as a bus observer stands in for an external planner reacting to task
/// completion (the "Dynamic edit" scenario); simply never registering it
/// stands in for a planner that stays silent (the "Silent planner" scenario).
pub struct RevisingPlanner {
    trigger_task_id: TaskId,
    revised: Constellation,
    bus: Arc<EventBus>,
}

impl RevisingPlanner {
    pub fn new(trigger_task_id: TaskId, revised: Constellation, bus: Arc<EventBus>) -> Self {
        Self { trigger_task_id, revised, bus }
    }
}

#[async_trait]
impl Observer for RevisingPlanner {
    async fn on_event(&self, event: &Event) {
        let Event::Task(task_event) = event else { return };
        if task_event.task_id != self.trigger_task_id {
            return;
        }
        if !matches!(task_event.status, TaskStatus::Completed | TaskStatus::Failed) {
            return;
        }
        let new_constellation = serde_json::to_value(&self.revised)
            .expect("constellation fixtures in tests always serialize");
        self.bus
            .publish(Event::Constellation(ConstellationEvent {
                source_id: "planner".to_string(),
                timestamp: chrono::Utc::now(),
                constellation_id: self.revised.id.clone(),
                state: ConstellationState::Executing,
                newly_ready_tasks: None,
                on_task_id: vec![self.trigger_task_id.clone()],
                new_constellation: Some(new_constellation),
                modification_type: Some("dynamic_edit".to_string()),
                statistics: None,
                data: Default::default(),
            }))
            .await;
    }
}
