//! Per-device task queue (§4.5): FIFO ordering, at-most-one-in-flight.
//!
//! Grounded on `device_manager.py`'s `TaskQueueManager` / `assign_task_to_device`
//! (enqueue-if-busy, dequeue-and-dispatch-next on completion) but expressed as
//! a worker loop per device rather than a callback chain: `assign` always
//! pushes onto the device's queue and lazily spawns a single drain worker if
//! none is already running for that device. The worker is the one place that
//! ever calls `DeviceTransport::send_task`, which is what gives the at-most-
//! one-in-flight guarantee without an explicit busy flag to race on.

use std::collections::VecDeque;
use std::sync::Arc;

use galaxy_shared::ids::{DeviceId, TaskId};
use galaxy_shared::planner::DeviceTransport;
use galaxy_shared::protocol::ExecutionResult;
use serde_json::Value;
use tokio::sync::{oneshot, Mutex};

use crate::registry::DeviceRegistry;

struct QueuedTask {
    task_id: TaskId,
    description: String,
    parameters: Value,
    timeout_s: f64,
    respond: oneshot::Sender<ExecutionResult>,
}

#[derive(Default)]
struct DeviceQueue {
    pending: VecDeque<QueuedTask>,
    worker_running: bool,
}

/// Enforces FIFO, at-most-one-in-flight dispatch per device.
pub struct PerDeviceQueue {
    transport: Arc<dyn DeviceTransport>,
    registry: Arc<DeviceRegistry>,
    queues: dashmap::DashMap<DeviceId, Arc<Mutex<DeviceQueue>>>,
}

impl PerDeviceQueue {
    pub fn new(transport: Arc<dyn DeviceTransport>, registry: Arc<DeviceRegistry>) -> Self {
        Self {
            transport,
            registry,
            queues: dashmap::DashMap::new(),
        }
    }

    fn queue_for(&self, device_id: &DeviceId) -> Arc<Mutex<DeviceQueue>> {
        Arc::clone(
            self.queues
                .entry(device_id.clone())
                .or_insert_with(|| Arc::new(Mutex::new(DeviceQueue::default())))
                .value(),
        )
    }

    /// Appends `task` to `device_id`'s queue and returns a future resolving
    /// to its `ExecutionResult`. If the device was idle, the task starts
    /// immediately; otherwise it waits behind whatever is already queued.
    /// Two calls `A` then `B` for the same device observe `A` dispatched
    /// before `B` (§4.5 ordering).
    pub async fn assign(
        &self,
        device_id: DeviceId,
        task_id: TaskId,
        description: String,
        parameters: Value,
        timeout_s: f64,
    ) -> oneshot::Receiver<ExecutionResult> {
        let (tx, rx) = oneshot::channel();
        let queue = self.queue_for(&device_id);

        let should_spawn = {
            let mut state = queue.lock().await;
            state.pending.push_back(QueuedTask {
                task_id,
                description,
                parameters,
                timeout_s,
                respond: tx,
            });
            if state.worker_running {
                false
            } else {
                state.worker_running = true;
                true
            }
        };

        if should_spawn {
            let transport = Arc::clone(&self.transport);
            let registry = Arc::clone(&self.registry);
            let queue = Arc::clone(&queue);
            let id = device_id.clone();
            tokio::spawn(async move {
                drain(id, transport, registry, queue).await;
            });
        }

        rx
    }

    /// Resolves every queued and in-flight future for `device_id` to a
    /// connection-error `ExecutionResult` and empties its queue (§4.5 "On
    /// device disconnection"). The task the worker is *currently* executing
    /// is left alone: `DeviceTransport::send_task` already surfaces a
    /// connection failure for it once the transport notices the drop, so
    /// the worker loop picks that up on its own and then drains the rest of
    /// the queue exactly like this method does.
    pub async fn cancel_all_for_device(&self, device_id: &DeviceId) {
        if let Some(queue) = self.queues.get(device_id) {
            let mut state = queue.lock().await;
            while let Some(task) = state.pending.pop_front() {
                let _ = task
                    .respond
                    .send(ExecutionResult::connection_failure(task.task_id, Some(device_id.clone())));
            }
        }
    }

    pub fn queue_len(&self, device_id: &DeviceId) -> usize {
        self.queues
            .get(device_id)
            .map(|queue| queue.try_lock().map(|state| state.pending.len()).unwrap_or(0))
            .unwrap_or(0)
    }
}

async fn drain(
    device_id: DeviceId,
    transport: Arc<dyn DeviceTransport>,
    registry: Arc<DeviceRegistry>,
    queue: Arc<Mutex<DeviceQueue>>,
) {
    loop {
        let next = {
            let mut state = queue.lock().await;
            match state.pending.pop_front() {
                Some(task) => Some(task),
                None => {
                    state.worker_running = false;
                    None
                }
            }
        };

        let Some(task) = next else { break };

        let _ = registry.set_busy(&device_id, task.task_id.clone());
        let result = transport
            .send_task(&device_id, task.task_id.clone(), &task.description, task.parameters, task.timeout_s)
            .await;
        let _ = registry.set_idle(&device_id);
        let _ = task.respond.send(result);
    }
}
