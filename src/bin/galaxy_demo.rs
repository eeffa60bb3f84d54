//! Standalone demo binary for running a constellation against a small
//! fixed fleet from the command line. Not a production entry point — the
//! real front door is whatever hosts the `Planner` and Web UI (§1
//! Non-goals) and links against this crate as a library.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use galaxy_core::prelude::*;
use galaxy_observers::prelude::{MetricsObserver, SnapshotBroadcaster, SnapshotSink};
use galaxy_shared::status::DependencyKind;
use galaxy_shared::task::{Dependency, Task};

/// Runs a small demo constellation against one or more WebSocket device
/// endpoints, printing task and constellation events to stdout as they
/// arrive.
#[derive(Debug, Parser)]
#[command(name = "galaxy-demo", version, about)]
struct Args {
    /// Device WebSocket URL; repeat to register more than one device.
    #[arg(long = "device", required = true)]
    devices: Vec<String>,

    /// Description text passed to each demo task's one step.
    #[arg(long, default_value = "noop")]
    task_description: String,

    /// Number of independent tasks to run in parallel across the fleet.
    #[arg(long, default_value_t = 1)]
    tasks: usize,

    /// Seconds to wait for the modification barrier before proceeding
    /// without a planner edit.
    #[arg(long, default_value_t = 30)]
    modification_timeout_s: u64,
}

struct StdoutSink;

#[async_trait::async_trait]
impl SnapshotSink for StdoutSink {
    async fn on_snapshot(&self, event: Arc<galaxy_shared::event::DeviceEvent>) {
        info!(device_id = %event.device_id, status = ?event.status, "device snapshot");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("galaxy_core=info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    info!("Starting galaxy-demo");
    info!("   Version: {}", env!("CARGO_PKG_VERSION"));
    info!(devices = args.devices.len(), "registering fleet");

    let bus = Arc::new(EventBus::new());
    let fleet = FleetManager::new(Arc::clone(&bus), FleetConfig::default());

    let metrics = Arc::new(MetricsObserver::new());
    bus.subscribe(Arc::clone(&metrics) as Arc<dyn Observer>, None).await;

    let snapshots = Arc::new(SnapshotBroadcaster::new(64));
    snapshots.subscribe(Arc::new(StdoutSink));
    bus.subscribe(Arc::clone(&snapshots) as Arc<dyn Observer>, None).await;

    for (index, url) in args.devices.iter().enumerate() {
        let device_id = DeviceId::new(format!("device-{index}"));
        if let Err(error) = fleet
            .register_device(device_id.clone(), url.clone(), "unknown", vec![], HashMap::new(), 5, true)
            .await
        {
            error!(%device_id, %error, "failed to register device, continuing with the rest of the fleet");
        }
    }

    let mut constellation = Constellation::new(ConstellationId::new("demo"));
    for i in 0..args.tasks.max(1) {
        let task_id = TaskId::new(format!("task-{i}"));
        constellation.add_task(Task::new(task_id, format!("task-{i}"), args.task_description.clone()));
    }
    // A purely cosmetic linear chain when the demo asks for more than one
    // task, so the fan-out/barrier machinery has something to exercise.
    for i in 1..args.tasks {
        constellation
            .add_dependency(Dependency::new(
                DependencyId::new(format!("e{i}")),
                TaskId::new(format!("task-{}", i - 1)),
                TaskId::new(format!("task-{i}")),
                DependencyKind::SuccessOnly,
            ))
            .ok();
    }

    let orchestrator = Arc::new(Orchestrator::new(
        Arc::new(FleetDispatcher::new(Arc::clone(&fleet))),
        Arc::new(FleetDirectory::new(Arc::clone(&fleet))),
        Some(Arc::new(RoundRobinStrategy::new())),
        HashMap::new(),
        Arc::clone(&bus),
        OrchestratorConfig {
            modification_timeout: Duration::from_secs(args.modification_timeout_s),
            ..OrchestratorConfig::default()
        },
    ));

    info!("   Press Ctrl+C to cancel the run early");

    let mut handle = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move { orchestrator.run(constellation).await })
    };

    let run = tokio::select! {
        result = &mut handle => result,
        _ = shutdown_signal() => {
            info!("cancellation requested, draining in-flight tasks");
            orchestrator.cancel();
            handle.await
        }
    };

    let run = match run {
        Ok(inner) => inner.map_err(|err| err.to_string()),
        Err(join_err) => Err(join_err.to_string()),
    };

    match run {
        Ok(finished) => {
            let stats = finished.statistics();
            info!(
                state = ?finished.state,
                total = stats.total,
                completed = stats.completed,
                failed = stats.failed,
                "constellation finished"
            );
        }
        Err(error) => {
            error!(%error, "constellation run failed");
        }
    }

    info!(snapshot = ?metrics.snapshot(), "final metrics");

    fleet.shutdown().await;
    info!("galaxy-demo shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C"),
        _ = terminate => info!("received SIGTERM"),
    }
}
