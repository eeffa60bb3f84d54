//! The orchestrator loop (§4.7): drives one constellation to a terminal
//! state while respecting the synchronizer barrier. Grounded on the
//! original's `orchestrator.py` control flow and expressed with the
//! collaborator-struct / heavy `tracing` instrumentation style of the
//! teacher's `tasker-orchestration/src/orchestration/lifecycle` handlers.
//!
//! `galaxy-orchestration` never depends on `galaxy-fleet` directly (only as
//! a dev-dependency, for its own tests) — [`TaskDispatcher`] and
//! [`DeviceDirectory`] are the trait seams a composition root (the workspace
//! facade crate) implements against the real `FleetManager`/`DeviceRegistry`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use galaxy_shared::bus::{EventBus, Observer};
use galaxy_shared::device::Device;
use galaxy_shared::error::GalaxyError;
use galaxy_shared::event::{ConstellationEvent, Event, EventKind, TaskEvent};
use galaxy_shared::ids::{DeviceId, TaskId};
use galaxy_shared::protocol::ExecutionResult;
use galaxy_shared::status::{ConstellationState, DeviceStatus, TaskStatus};
use serde_json::Value;

use crate::constellation::Constellation;
use crate::error::{OrchestrationError, OrchestrationResult};
use crate::synchronizer::ModificationSynchronizer;

/// The fleet-manager-facing dispatch seam (§4.9 `assign_task_to_device`).
/// Mirrors `FleetManager::assign_task_to_device`'s signature exactly so the
/// composition root's adapter is a one-line forward.
#[async_trait]
pub trait TaskDispatcher: Send + Sync {
    async fn assign_task_to_device(
        &self,
        device_id: &DeviceId,
        task_id: TaskId,
        description: String,
        parameters: Value,
        timeout_s: f64,
    ) -> Result<ExecutionResult, GalaxyError>;
}

/// The registry-facing assignment seam. Mirrors `DeviceRegistry::snapshot`.
#[async_trait]
pub trait DeviceDirectory: Send + Sync {
    async fn snapshot(&self) -> Vec<Device>;
}

/// Chooses a device for a task with no manual assignment (§4.7 "Assignment
/// strategies").
#[async_trait]
pub trait AssignmentStrategy: Send + Sync {
    async fn choose(&self, task_id: &TaskId, devices: &[Device]) -> Option<DeviceId>;
}

/// Round-robins across every device currently IDLE or CONNECTED, satisfying
/// §4.7's "at least round-robin" floor. Devices without a usable status are
/// skipped rather than counted against the cursor, so a flaky device
/// doesn't bias subsequent picks toward its neighbors.
pub struct RoundRobinStrategy {
    cursor: AtomicUsize,
}

impl RoundRobinStrategy {
    pub fn new() -> Self {
        Self { cursor: AtomicUsize::new(0) }
    }
}

impl Default for RoundRobinStrategy {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AssignmentStrategy for RoundRobinStrategy {
    async fn choose(&self, _task_id: &TaskId, devices: &[Device]) -> Option<DeviceId> {
        let candidates: Vec<&Device> = devices
            .iter()
            .filter(|device| matches!(device.status, DeviceStatus::Idle | DeviceStatus::Connected))
            .collect();
        if candidates.is_empty() {
            return None;
        }
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % candidates.len();
        Some(candidates[index].id.clone())
    }
}

/// Tunables for one orchestrator run.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub modification_timeout: Duration,
    pub default_task_timeout_s: f64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            modification_timeout: Duration::from_secs(600),
            default_task_timeout_s: 300.0,
        }
    }
}

/// Drives one `Constellation` to completion. Constructed fresh per
/// constellation run; not reused across runs.
pub struct Orchestrator {
    dispatcher: Arc<dyn TaskDispatcher>,
    directory: Arc<dyn DeviceDirectory>,
    strategy: Option<Arc<dyn AssignmentStrategy>>,
    manual_assignments: HashMap<TaskId, DeviceId>,
    synchronizer: Arc<ModificationSynchronizer>,
    bus: Arc<EventBus>,
    config: OrchestratorConfig,
    cancelled: Arc<AtomicBool>,
    source_id: String,
}

struct TaskOutcome {
    task_id: TaskId,
    success: bool,
    result: Option<Value>,
    error: Option<String>,
}

impl Orchestrator {
    pub fn new(
        dispatcher: Arc<dyn TaskDispatcher>,
        directory: Arc<dyn DeviceDirectory>,
        strategy: Option<Arc<dyn AssignmentStrategy>>,
        manual_assignments: HashMap<TaskId, DeviceId>,
        bus: Arc<EventBus>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            dispatcher,
            directory,
            strategy,
            manual_assignments,
            synchronizer: Arc::new(ModificationSynchronizer::new(config.modification_timeout)),
            bus,
            config,
            cancelled: Arc::new(AtomicBool::new(false)),
            source_id: "orchestrator".to_string(),
        }
    }

    /// Requests cancellation. Checked at the top of each loop iteration
    /// (§4.7 step 1); in-flight executions are drained, not aborted, since
    /// an `ExecutionResult` in flight still needs to resolve the oneshot the
    /// fleet's queue worker is holding.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn synchronizer(&self) -> &Arc<ModificationSynchronizer> {
        &self.synchronizer
    }

    /// Resolves the device for `task_id`: the manual map wins if present,
    /// otherwise the assignment strategy is consulted against a fresh
    /// directory snapshot. A task with neither is a validation error (§4.7
    /// "A task with no assignment and no strategy is a validation error").
    async fn resolve_device(&self, task_id: &TaskId) -> OrchestrationResult<DeviceId> {
        if let Some(device_id) = self.manual_assignments.get(task_id) {
            return Ok(device_id.clone());
        }
        let Some(strategy) = &self.strategy else {
            return Err(OrchestrationError::Galaxy(GalaxyError::NoAssignment(task_id.clone())));
        };
        let devices = self.directory.snapshot().await;
        strategy
            .choose(task_id, &devices)
            .ok_or_else(|| OrchestrationError::Galaxy(GalaxyError::NoCapableDevice(Vec::new())))
    }

    async fn publish(&self, event: Event) {
        self.bus.publish(event).await;
    }

    /// Runs the loop to completion (§4.7). `started_constellation` seeds the
    /// synchronizer's captured reference before the loop begins so the very
    /// first barrier wait has something to merge against even if the
    /// planner never publishes an edit.
    pub async fn run(&self, mut local: Constellation) -> OrchestrationResult<Constellation> {
        let start = Instant::now();
        self.synchronizer
            .on_constellation_started(local.id.clone(), local.clone())
            .await;
        // The synchronizer learns about planner edits only through the bus
        // (§9 "Cyclic references"); it never gets a direct pointer here.
        let mut modified_kinds = std::collections::HashSet::new();
        modified_kinds.insert(EventKind::ConstellationModified);
        let modification_observer_id = self
            .bus
            .subscribe(Arc::clone(&self.synchronizer) as Arc<dyn Observer>, Some(modified_kinds))
            .await;
        // Published with CREATED so `Event::kind()` maps it to
        // CONSTELLATION_STARTED; the in-memory state is advanced to
        // EXECUTING right after, independently of what the event carries.
        self.publish(Event::Constellation(ConstellationEvent {
            source_id: self.source_id.clone(),
            timestamp: chrono::Utc::now(),
            constellation_id: local.id.clone(),
            state: ConstellationState::Created,
            newly_ready_tasks: Some(local.ready_tasks()),
            on_task_id: Vec::new(),
            new_constellation: None,
            modification_type: None,
            statistics: None,
            data: Default::default(),
        }))
        .await;
        local.set_state(ConstellationState::Executing);

        let mut in_flight: FuturesUnordered<
            std::pin::Pin<Box<dyn std::future::Future<Output = TaskOutcome> + Send>>,
        > = FuturesUnordered::new();
        let mut dispatched: std::collections::HashSet<TaskId> = std::collections::HashSet::new();
        let mut cancelled_exit = false;

        loop {
            if self.cancelled.load(Ordering::SeqCst) {
                cancelled_exit = true;
                break;
            }

            if !self.synchronizer.wait_for_pending_modifications().await {
                tracing::warn!(
                    constellation_id = %local.id,
                    "orchestrator proceeded past the modification barrier after its safety timeout"
                );
            }

            local = self.synchronizer.merge(local).await;

            let (valid, errors) = local.validate();
            if !valid {
                return Err(OrchestrationError::Galaxy(GalaxyError::InvalidConstellation(errors)));
            }

            let ready: Vec<TaskId> =
                local.ready_tasks().into_iter().filter(|id| !dispatched.contains(id)).collect();

            for task_id in ready {
                let device_id = match self.resolve_device(&task_id).await {
                    Ok(device_id) => device_id,
                    Err(err) => return Err(err),
                };
                local.mark_task_started(&task_id)?;
                dispatched.insert(task_id.clone());

                self.publish(Event::Task(TaskEvent {
                    source_id: self.source_id.clone(),
                    timestamp: chrono::Utc::now(),
                    task_id: task_id.clone(),
                    status: TaskStatus::Running,
                    result: None,
                    error: None,
                    newly_ready_tasks: Vec::new(),
                    data: Default::default(),
                }))
                .await;

                let description = local
                    .tasks()
                    .get(&task_id)
                    .map(|task| task.description.clone())
                    .unwrap_or_default();
                let dispatcher = Arc::clone(&self.dispatcher);
                let timeout_s = self.config.default_task_timeout_s;
                let unit_task_id = task_id.clone();

                in_flight.push(Box::pin(async move {
                    let outcome = dispatcher
                        .assign_task_to_device(&device_id, unit_task_id.clone(), description, Value::Null, timeout_s)
                        .await;
                    match outcome {
                        Ok(result) => TaskOutcome {
                            task_id: unit_task_id,
                            success: result.status == TaskStatus::Completed,
                            result: result.result,
                            error: result.error,
                        },
                        Err(err) => TaskOutcome {
                            task_id: unit_task_id,
                            success: false,
                            result: None,
                            error: Some(err.to_string()),
                        },
                    }
                }));
            }

            if in_flight.is_empty() {
                if local.is_complete() {
                    break;
                }
                // No ready task and nothing in flight but the constellation
                // isn't complete: every remaining task is WAITING_DEPENDENCY
                // on something only a planner edit can resolve. Yield
                // briefly rather than spin the barrier wait, which returns
                // immediately once its own pending set is empty.
                tokio::time::sleep(Duration::from_millis(20)).await;
                continue;
            }

            if let Some(resolved) = in_flight.next().await {
                dispatched.remove(&resolved.task_id);
                let newly_ready =
                    local.mark_task_completed(&resolved.task_id, resolved.success, resolved.result.clone(), resolved.error.clone())?;

                self.synchronizer.on_task_resolved(resolved.task_id.clone());
                self.publish(Event::Task(TaskEvent {
                    source_id: self.source_id.clone(),
                    timestamp: chrono::Utc::now(),
                    task_id: resolved.task_id,
                    status: if resolved.success { TaskStatus::Completed } else { TaskStatus::Failed },
                    result: resolved.result,
                    error: resolved.error,
                    newly_ready_tasks: newly_ready,
                    data: Default::default(),
                }))
                .await;
            }
        }

        if cancelled_exit {
            while in_flight.next().await.is_some() {}
            local.set_state(ConstellationState::Cancelled);
        } else {
            let stats = local.statistics();
            local.set_state(if stats.total == 0 || stats.completed > 0 {
                ConstellationState::Completed
            } else {
                ConstellationState::Failed
            });
        }

        let statistics = local.statistics();
        self.publish(Event::Constellation(ConstellationEvent {
            source_id: self.source_id.clone(),
            timestamp: chrono::Utc::now(),
            constellation_id: local.id.clone(),
            state: local.state,
            newly_ready_tasks: None,
            on_task_id: Vec::new(),
            new_constellation: None,
            modification_type: None,
            statistics: Some(galaxy_shared::event::ConstellationStatistics {
                duration_ms: start.elapsed().as_millis() as u64,
                ..statistics
            }),
            data: Default::default(),
        }))
        .await;

        self.bus.unsubscribe(modification_observer_id).await;
        Ok(local)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use galaxy_shared::ids::ConstellationId;
    use galaxy_shared::status::DependencyKind;
    use galaxy_shared::task::{Dependency, Task};
    use std::sync::Mutex as StdMutex;

    struct StubDispatcher {
        outcomes: StdMutex<HashMap<TaskId, ExecutionResult>>,
    }

    #[async_trait]
    impl TaskDispatcher for StubDispatcher {
        async fn assign_task_to_device(
            &self,
            _device_id: &DeviceId,
            task_id: TaskId,
            _description: String,
            _parameters: Value,
            _timeout_s: f64,
        ) -> Result<ExecutionResult, GalaxyError> {
            let outcome = self
                .outcomes
                .lock()
                .unwrap()
                .remove(&task_id)
                .unwrap_or_else(|| ExecutionResult::success(task_id.clone(), Value::Null, DeviceId::new("d1")));
            Ok(outcome)
        }
    }

    struct StubDirectory;

    #[async_trait]
    impl DeviceDirectory for StubDirectory {
        async fn snapshot(&self) -> Vec<Device> {
            vec![Device::new(DeviceId::new("d1"), "ws://x", "linux", vec![], HashMap::new(), 5)
                .assigned_status(DeviceStatus::Idle)]
        }
    }

    trait DeviceAssignExt {
        fn assigned_status(self, status: DeviceStatus) -> Self;
    }

    impl DeviceAssignExt for Device {
        fn assigned_status(mut self, status: DeviceStatus) -> Self {
            self.status = status;
            self
        }
    }

    fn task(id: &str) -> Task {
        Task::new(TaskId::new(id), id, format!("do {id}"))
    }

    #[tokio::test]
    async fn linear_chain_runs_to_completion_via_round_robin() {
        let mut constellation = Constellation::new(ConstellationId::new("c1"));
        constellation.add_task(task("a"));
        constellation.add_task(task("b"));
        constellation
            .add_dependency(Dependency::new(
                galaxy_shared::ids::DependencyId::new("e1"),
                TaskId::new("a"),
                TaskId::new("b"),
                DependencyKind::SuccessOnly,
            ))
            .unwrap();

        let orchestrator = Orchestrator::new(
            Arc::new(StubDispatcher { outcomes: StdMutex::new(HashMap::new()) }),
            Arc::new(StubDirectory),
            Some(Arc::new(RoundRobinStrategy::new())),
            HashMap::new(),
            Arc::new(EventBus::new()),
            OrchestratorConfig::default(),
        );

        let finished = orchestrator.run(constellation).await.unwrap();
        assert_eq!(finished.state, ConstellationState::Completed);
        assert_eq!(finished.statistics().completed, 2);
    }

    #[tokio::test]
    async fn task_with_no_assignment_and_no_strategy_is_a_validation_error() {
        let mut constellation = Constellation::new(ConstellationId::new("c1"));
        constellation.add_task(task("a"));

        let orchestrator = Orchestrator::new(
            Arc::new(StubDispatcher { outcomes: StdMutex::new(HashMap::new()) }),
            Arc::new(StubDirectory),
            None,
            HashMap::new(),
            Arc::new(EventBus::new()),
            OrchestratorConfig::default(),
        );

        let result = orchestrator.run(constellation).await;
        assert!(matches!(result, Err(OrchestrationError::Galaxy(GalaxyError::NoAssignment(_)))));
    }

    #[tokio::test]
    async fn cancellation_marks_the_constellation_cancelled() {
        let mut constellation = Constellation::new(ConstellationId::new("c1"));
        constellation.add_task(task("a"));

        let orchestrator = Orchestrator::new(
            Arc::new(StubDispatcher { outcomes: StdMutex::new(HashMap::new()) }),
            Arc::new(StubDirectory),
            Some(Arc::new(RoundRobinStrategy::new())),
            HashMap::new(),
            Arc::new(EventBus::new()),
            OrchestratorConfig::default(),
        );
        orchestrator.cancel();

        let finished = orchestrator.run(constellation).await.unwrap();
        assert_eq!(finished.state, ConstellationState::Cancelled);
    }
}
