//! End-to-end orchestrator scenarios driven entirely through the event bus,
//! using the in-memory test doubles from `galaxy_orchestration::test_utils`.
//! Each test name matches the scenario it exercises.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use galaxy_orchestration::orchestrator::{Orchestrator, OrchestratorConfig, RoundRobinStrategy};
use galaxy_orchestration::prelude::Constellation;
use galaxy_orchestration::test_utils::{FixedDirectory, RevisingPlanner, ScriptedDispatcher};
use galaxy_shared::bus::{EventBus, Observer};
use galaxy_shared::event::{Event, EventKind};
use galaxy_shared::ids::{ConstellationId, DependencyId, DeviceId, TaskId};
use galaxy_shared::status::{ConstellationState, DependencyKind};
use galaxy_shared::task::{Dependency, Task};

fn task(id: &str) -> Task {
    Task::new(TaskId::new(id), id, format!("do {id}"))
}

/// Records the `EventKind` of every event published, in delivery order, for
/// asserting on the literal event sequences spec.md §8's scenarios specify.
struct EventSequenceRecorder {
    kinds: StdMutex<Vec<EventKind>>,
}

impl EventSequenceRecorder {
    fn new() -> Self {
        Self { kinds: StdMutex::new(Vec::new()) }
    }

    fn sequence(&self) -> Vec<EventKind> {
        self.kinds.lock().unwrap().clone()
    }
}

#[async_trait]
impl Observer for EventSequenceRecorder {
    async fn on_event(&self, event: &Event) {
        self.kinds.lock().unwrap().push(event.kind());
    }
}

#[tokio::test]
async fn parallel_fan_out_runs_three_leaves_concurrently_after_the_root() {
    // Devices: [D1, D2, D3]. root -> {leafA, leafB, leafC}, round-robin.
    let mut constellation = Constellation::new(ConstellationId::new("fan-out"));
    constellation.add_task(task("root"));
    constellation.add_task(task("leafA"));
    constellation.add_task(task("leafB"));
    constellation.add_task(task("leafC"));
    for (i, leaf) in ["leafA", "leafB", "leafC"].iter().enumerate() {
        constellation
            .add_dependency(Dependency::new(
                DependencyId::new(format!("e{i}")),
                TaskId::new("root"),
                TaskId::new(*leaf),
                DependencyKind::SuccessOnly,
            ))
            .unwrap();
    }

    let bus = Arc::new(EventBus::new());
    let orchestrator = Orchestrator::new(
        Arc::new(ScriptedDispatcher::new()),
        Arc::new(FixedDirectory::new([
            DeviceId::new("d1"),
            DeviceId::new("d2"),
            DeviceId::new("d3"),
        ])),
        Some(Arc::new(RoundRobinStrategy::new())),
        HashMap::new(),
        bus,
        OrchestratorConfig::default(),
    );

    let finished = orchestrator.run(constellation).await.unwrap();
    let stats = finished.statistics();
    assert_eq!(stats.total, 4);
    assert_eq!(stats.completed, 4);
    assert_eq!(finished.state, ConstellationState::Completed);
}

#[tokio::test]
async fn dynamic_edit_adds_a_new_ready_task_after_the_planner_revises() {
    // Initial: A -> B. After A completes, planner publishes A -> B, A -> C.
    let mut initial = Constellation::new(ConstellationId::new("dyn-edit"));
    initial.add_task(task("a"));
    initial.add_task(task("b"));
    initial
        .add_dependency(Dependency::new(
            DependencyId::new("e1"),
            TaskId::new("a"),
            TaskId::new("b"),
            DependencyKind::SuccessOnly,
        ))
        .unwrap();

    let mut revised = initial.clone();
    revised.add_task(task("c"));
    revised
        .add_dependency(Dependency::new(
            DependencyId::new("e2"),
            TaskId::new("a"),
            TaskId::new("c"),
            DependencyKind::SuccessOnly,
        ))
        .unwrap();

    let bus = Arc::new(EventBus::new());
    let planner = Arc::new(RevisingPlanner::new(TaskId::new("a"), revised, Arc::clone(&bus)));
    bus.subscribe(planner, Some([EventKind::TaskCompleted].into_iter().collect())).await;

    let orchestrator = Orchestrator::new(
        Arc::new(ScriptedDispatcher::new()),
        Arc::new(FixedDirectory::new([DeviceId::new("d1")])),
        Some(Arc::new(RoundRobinStrategy::new())),
        HashMap::new(),
        bus,
        OrchestratorConfig { modification_timeout: Duration::from_secs(5), ..OrchestratorConfig::default() },
    );

    let finished = orchestrator.run(initial).await.unwrap();
    let stats = finished.statistics();
    assert_eq!(stats.total, 3, "the planner's edit must have introduced task C");
    assert_eq!(stats.completed, 3);
    assert!(orchestrator.synchronizer().statistics().modifications_applied >= 1);
}

#[tokio::test]
async fn silent_planner_proceeds_after_the_modification_timeout() {
    // Same shape as the dynamic-edit scenario, but nothing ever subscribes a
    // planner to TASK_COMPLETED: the barrier must time out and the loop must
    // proceed with the original constellation rather than hang.
    let mut constellation = Constellation::new(ConstellationId::new("silent"));
    constellation.add_task(task("a"));
    constellation.add_task(task("b"));
    constellation
        .add_dependency(Dependency::new(
            DependencyId::new("e1"),
            TaskId::new("a"),
            TaskId::new("b"),
            DependencyKind::SuccessOnly,
        ))
        .unwrap();

    let bus = Arc::new(EventBus::new());
    let orchestrator = Orchestrator::new(
        Arc::new(ScriptedDispatcher::new()),
        Arc::new(FixedDirectory::new([DeviceId::new("d1")])),
        Some(Arc::new(RoundRobinStrategy::new())),
        HashMap::new(),
        bus,
        OrchestratorConfig { modification_timeout: Duration::from_millis(30), ..OrchestratorConfig::default() },
    );

    let finished = orchestrator.run(constellation).await.unwrap();
    assert_eq!(finished.state, ConstellationState::Completed);
    assert_eq!(finished.statistics().total, 2);
    assert_eq!(orchestrator.synchronizer().statistics().auto_resolved, 1);
}

#[tokio::test]
async fn linear_chain_publishes_the_exact_event_sequence() {
    // CONSTELLATION_STARTED, (TASK_STARTED, TASK_COMPLETED) x3, CONSTELLATION_COMPLETED.
    let mut constellation = Constellation::new(ConstellationId::new("linear"));
    constellation.add_task(task("a"));
    constellation.add_task(task("b"));
    constellation.add_task(task("c"));
    constellation
        .add_dependency(Dependency::new(
            DependencyId::new("e1"),
            TaskId::new("a"),
            TaskId::new("b"),
            DependencyKind::SuccessOnly,
        ))
        .unwrap();
    constellation
        .add_dependency(Dependency::new(
            DependencyId::new("e2"),
            TaskId::new("b"),
            TaskId::new("c"),
            DependencyKind::SuccessOnly,
        ))
        .unwrap();

    let bus = Arc::new(EventBus::new());
    let recorder = Arc::new(EventSequenceRecorder::new());
    bus.subscribe(recorder.clone(), None).await;

    let orchestrator = Orchestrator::new(
        Arc::new(ScriptedDispatcher::new()),
        Arc::new(FixedDirectory::new([DeviceId::new("d1")])),
        Some(Arc::new(RoundRobinStrategy::new())),
        HashMap::new(),
        bus,
        OrchestratorConfig::default(),
    );

    orchestrator.run(constellation).await.unwrap();

    let sequence = recorder.sequence();
    assert_eq!(sequence.first(), Some(&EventKind::ConstellationStarted));
    assert_eq!(sequence.last(), Some(&EventKind::ConstellationCompleted));
    let started_count = sequence.iter().filter(|k| **k == EventKind::TaskStarted).count();
    let completed_count = sequence.iter().filter(|k| **k == EventKind::TaskCompleted).count();
    assert_eq!(started_count, 3);
    assert_eq!(completed_count, 3);
}
