//! Wires a real `FleetManager` (not a test double) into the orchestrator via
//! `galaxy_core`'s adapters. No live device process backs these tests, so
//! they're scoped to behavior the real transport exhibits without one: a
//! refused connection and the orchestrator's reaction to a fleet with no
//! currently-assignable device. Scenarios that need an actual peer
//! (disconnect mid-task, queue ordering under real traffic) are covered at
//! the fleet crate's own unit-test level instead (see `DESIGN.md`).

use std::collections::HashMap;
use std::sync::Arc;

use galaxy_core::prelude::*;
use galaxy_shared::status::DeviceStatus;
use galaxy_shared::task::Task;

#[tokio::test]
async fn connecting_to_an_unreachable_device_leaves_it_disconnected() {
    let bus = Arc::new(EventBus::new());
    let fleet = FleetManager::new(Arc::clone(&bus), FleetConfig::default());

    // Port 0 is never a live listener; the connect attempt fails fast
    // rather than hanging, so this test has no real network dependency.
    let device_id = DeviceId::new("unreachable");
    let result = fleet
        .register_device(device_id.clone(), "ws://127.0.0.1:0", "linux", vec![], HashMap::new(), 5, true)
        .await;

    assert!(result.is_err(), "connecting to a closed port must surface as an error, not hang");
    let device = fleet.registry().get(&device_id).unwrap();
    assert_eq!(device.status, DeviceStatus::Disconnected);

    fleet.shutdown().await;
}

#[tokio::test]
async fn orchestrator_fails_validation_when_no_device_is_assignable() {
    let bus = Arc::new(EventBus::new());
    let fleet = FleetManager::new(Arc::clone(&bus), FleetConfig::default());

    let device_id = DeviceId::new("unreachable");
    let _ = fleet
        .register_device(device_id, "ws://127.0.0.1:0", "linux", vec![], HashMap::new(), 5, true)
        .await;

    let mut constellation = Constellation::new(ConstellationId::new("c1"));
    constellation.add_task(Task::new(TaskId::new("only"), "only", "do it".to_string()));

    let orchestrator = Orchestrator::new(
        Arc::new(FleetDispatcher::new(Arc::clone(&fleet))),
        Arc::new(FleetDirectory::new(Arc::clone(&fleet))),
        Some(Arc::new(RoundRobinStrategy::new())),
        HashMap::new(),
        Arc::clone(&bus),
        OrchestratorConfig::default(),
    );

    let result = orchestrator.run(constellation).await;
    assert!(matches!(result, Err(OrchestrationError::Galaxy(GalaxyError::NoCapableDevice(_)))));

    fleet.shutdown().await;
}
