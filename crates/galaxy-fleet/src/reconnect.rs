//! Reconnect worker (§4.4). At most one live worker per device; fixed delay
//! between attempts; independent retry counter from the initial-connection
//! counter (§9 Open Question — two-counter model).
//!
//! Grounded on `device_manager.py::_schedule_reconnection`/`_reconnect_device`:
//! schedule-if-absent, sleep-then-attempt loop, reset on success, FAILED
//! status when `max_retries` is exhausted.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use galaxy_shared::ids::DeviceId;
use galaxy_shared::status::DeviceStatus;
use tokio::task::JoinHandle;

use crate::error::{FleetError, FleetResult};
use crate::registry::DeviceRegistry;

/// The piece of `connect_device` a reconnect worker needs to retry. Kept
/// separate from `DeviceTransport::connect` because the worker also needs
/// the registry's `server_url`, which the trait-level `connect` doesn't
/// carry (see the note on `WebSocketTransport::connect`).
#[async_trait::async_trait]
pub trait Reconnector: Send + Sync {
    async fn attempt_connect(&self, device_id: &DeviceId) -> bool;
}

/// Schedules and tracks reconnect workers, one per device.
pub struct ReconnectScheduler {
    registry: Arc<DeviceRegistry>,
    reconnector: Arc<dyn Reconnector>,
    delay: Duration,
    workers: Arc<DashMap<DeviceId, JoinHandle<()>>>,
}

impl ReconnectScheduler {
    pub fn new(registry: Arc<DeviceRegistry>, reconnector: Arc<dyn Reconnector>, delay: Duration) -> Self {
        Self {
            registry,
            reconnector,
            delay,
            workers: Arc::new(DashMap::new()),
        }
    }

    /// Schedules a reconnect worker for `device_id` unless one is already
    /// running (§4.4 "only one reconnect worker per device may be live").
    pub fn schedule(&self, device_id: DeviceId) -> FleetResult<()> {
        if self.workers.contains_key(&device_id) {
            return Err(FleetError::ReconnectAlreadyRunning(device_id));
        }

        let registry = Arc::clone(&self.registry);
        let reconnector = Arc::clone(&self.reconnector);
        let delay = self.delay;
        let id = device_id.clone();
        let workers = Arc::clone(&self.workers);

        let handle = tokio::spawn(async move {
            run_reconnect_loop(id.clone(), registry, reconnector, delay).await;
            // The loop above always returns on its own, either on success or
            // once `max_retries` is exhausted; no one else removes this
            // worker's slot, so it has to clean up after itself here.
            workers.remove(&id);
        });

        self.workers.insert(device_id, handle);
        Ok(())
    }

    pub fn is_running(&self, device_id: &DeviceId) -> bool {
        self.workers.contains_key(device_id)
    }

    /// Cancels every live reconnect worker (§5 shutdown path).
    pub fn cancel_all(&self) {
        for entry in self.workers.iter() {
            entry.value().abort();
        }
        self.workers.clear();
    }
}

async fn run_reconnect_loop(
    device_id: DeviceId,
    registry: Arc<DeviceRegistry>,
    reconnector: Arc<dyn Reconnector>,
    delay: Duration,
) {
    let max_retries = match registry.get(&device_id) {
        Ok(device) => device.max_retries,
        Err(_) => {
            tracing::error!(%device_id, "reconnect worker started for an unregistered device");
            return;
        }
    };

    // This worker's own attempt counter, independent of
    // `Device::connection_attempts` (§9 two-counter model).
    let mut attempt: u32 = 0;
    while attempt < max_retries {
        tokio::time::sleep(delay).await;
        attempt += 1;
        tracing::info!(%device_id, attempt, max_retries, "reconnect attempt");

        if reconnector.attempt_connect(&device_id).await {
            tracing::info!(%device_id, attempt, "reconnected successfully");
            let _ = registry.reset_attempts(&device_id);
            return;
        }
        tracing::info!(%device_id, attempt, max_retries, "reconnect attempt failed, will retry");
    }

    tracing::error!(%device_id, max_retries, "exhausted reconnect attempts, giving up");
    let _ = registry.set_status(&device_id, DeviceStatus::Failed);
}
