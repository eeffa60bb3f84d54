//! Fleet manager facade (§4.9): composes the registry, transport, heartbeat,
//! reconnect, and per-device queues into the single surface
//! `galaxy-orchestration` dispatches through. Grounded on
//! `device_manager.py::ConstellationDeviceManager` as the composition root —
//! `register_device`/`connect_device`/`disconnect_device`/
//! `assign_task_to_device`/`shutdown` mirror its public method names.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use galaxy_shared::bus::EventBus;
use galaxy_shared::error::{GalaxyError, GalaxyResult};
use galaxy_shared::event::{DeviceEvent, Event};
use galaxy_shared::ids::{DeviceId, TaskId};
use galaxy_shared::protocol::ExecutionResult;
use galaxy_shared::status::DeviceStatus;
use serde_json::Value;

use crate::heartbeat::{HeartbeatManager, HeartbeatSink};
use crate::queue::PerDeviceQueue;
use crate::reconnect::{Reconnector, ReconnectScheduler};
use crate::registry::DeviceRegistry;
use crate::transport::{TransportEventSink, WebSocketTransport};

/// Tunables the facade needs that aren't already on `galaxy_shared::config::GalaxyConfig`
/// (kept separate so `galaxy-fleet` doesn't need to depend on the whole
/// config surface just to read three numbers).
#[derive(Debug, Clone, Copy)]
pub struct FleetConfig {
    pub heartbeat_interval: Duration,
    pub heartbeat_missed_limit: u32,
    pub reconnect_delay: Duration,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs_f64(30.0),
            heartbeat_missed_limit: 3,
            reconnect_delay: Duration::from_secs_f64(5.0),
        }
    }
}

/// Thin composition of every `galaxy-fleet` subcomponent behind one surface.
pub struct FleetManager {
    registry: Arc<DeviceRegistry>,
    transport: Arc<WebSocketTransport>,
    heartbeat: Arc<HeartbeatManager>,
    reconnect: Arc<ReconnectScheduler>,
    queue: Arc<PerDeviceQueue>,
    bus: Arc<EventBus>,
}

/// `WebSocketTransport` needs its `TransportEventSink` at construction time,
/// but that sink (`FleetEventSink`) needs a `Weak<WebSocketTransport>` back-
/// reference to ping/reconnect through. Breaks the chicken-and-egg problem
/// with a cell filled in once the transport exists, rather than a cyclic
/// `Arc` or placeholder implementations that would need retrofitting.
#[derive(Default)]
struct DeferredSink {
    inner: once_cell::sync::OnceCell<Arc<FleetEventSink>>,
}

impl DeferredSink {
    fn resolve(&self) -> Option<&Arc<FleetEventSink>> {
        self.inner.get()
    }
}

#[async_trait::async_trait]
impl TransportEventSink for DeferredSink {
    async fn on_disconnected(&self, device_id: DeviceId) {
        if let Some(sink) = self.resolve() {
            sink.on_disconnected(device_id).await;
        }
    }

    async fn on_device_info(&self, device_id: DeviceId, message: galaxy_shared::protocol::WireMessage) {
        if let Some(sink) = self.resolve() {
            sink.on_device_info(device_id, message).await;
        }
    }

    async fn on_heartbeat_ack(&self, device_id: DeviceId, sequence: u64) {
        if let Some(sink) = self.resolve() {
            sink.on_heartbeat_ack(device_id, sequence).await;
        }
    }

    async fn on_task_progress(&self, device_id: DeviceId, task_id: TaskId, progress: Option<Value>) {
        if let Some(sink) = self.resolve() {
            sink.on_task_progress(device_id, task_id, progress).await;
        }
    }
}

/// Routes transport/heartbeat callbacks back into the facade: disconnection
/// clears the queue and schedules a reconnect worker; a missed-heartbeat
/// limit is treated identically to a transport-level drop (§4.4).
///
/// `reconnect`/`heartbeat` face the same construction-order problem as
/// `DeferredSink` above, the other direction: the scheduler/manager need
/// this sink as their `Reconnector`/`HeartbeatSink` delegate, so they can't
/// be built before the sink exists, but the sink needs to call into them.
/// Resolved the same way — a cell filled in once they exist — rather than
/// building two throwaway instances that would diverge from the real ones.
struct FleetEventSink {
    registry: Arc<DeviceRegistry>,
    reconnect: once_cell::sync::OnceCell<Arc<ReconnectScheduler>>,
    queue: Arc<PerDeviceQueue>,
    bus: Arc<EventBus>,
    heartbeat: once_cell::sync::OnceCell<Arc<HeartbeatManager>>,
    transport: std::sync::Weak<WebSocketTransport>,
}

impl FleetEventSink {
    async fn handle_disconnection(&self, device_id: DeviceId) {
        if let Some(heartbeat) = self.heartbeat.get() {
            heartbeat.stop(&device_id);
        }
        if self.registry.set_status(&device_id, DeviceStatus::Disconnected).is_err() {
            return;
        }
        self.queue.cancel_all_for_device(&device_id).await;
        publish_device_event(&self.bus, &self.registry, &device_id, "transport.disconnected").await;
        if let Some(reconnect) = self.reconnect.get() {
            // Already-running is expected here: a device can report both a
            // missed heartbeat and a transport drop for the same outage.
            let _ = reconnect.schedule(device_id);
        }
    }
}

#[async_trait::async_trait]
impl TransportEventSink for FleetEventSink {
    async fn on_disconnected(&self, device_id: DeviceId) {
        self.handle_disconnection(device_id).await;
    }

    async fn on_device_info(&self, device_id: DeviceId, _message: galaxy_shared::protocol::WireMessage) {
        tracing::debug!(%device_id, "device info push received");
    }

    async fn on_heartbeat_ack(&self, device_id: DeviceId, sequence: u64) {
        tracing::trace!(%device_id, sequence, "heartbeat ack (server push)");
    }

    async fn on_task_progress(&self, device_id: DeviceId, task_id: TaskId, _progress: Option<Value>) {
        tracing::trace!(%device_id, %task_id, "task progress");
    }
}

#[async_trait::async_trait]
impl HeartbeatSink for FleetEventSink {
    async fn send_ping(&self, device_id: &DeviceId, sequence: u64) -> bool {
        let Some(transport) = self.transport.upgrade() else { return false };
        if !transport.is_connected(device_id).await {
            return false;
        }
        transport.ping(device_id, sequence, std::time::Duration::from_secs(10)).await
    }

    async fn on_missed(&self, device_id: DeviceId) {
        self.handle_disconnection(device_id).await;
    }
}

#[async_trait::async_trait]
impl Reconnector for FleetEventSink {
    async fn attempt_connect(&self, device_id: &DeviceId) -> bool {
        let Some(transport) = self.transport.upgrade() else { return false };
        let Ok(device) = self.registry.get(device_id) else { return false };
        match transport.connect_to(device_id, &device.server_url).await {
            Ok(()) => {
                let _ = self.registry.set_status(device_id, DeviceStatus::Idle);
                if let Some(heartbeat) = self.heartbeat.get() {
                    heartbeat.start(device_id.clone());
                }
                publish_device_event(&self.bus, &self.registry, device_id, "reconnect.succeeded").await;
                true
            }
            Err(error) => {
                tracing::debug!(%device_id, %error, "reconnect attempt failed");
                false
            }
        }
    }
}

async fn publish_device_event(bus: &EventBus, registry: &DeviceRegistry, device_id: &DeviceId, reason: &str) {
    let Ok(device) = registry.get(device_id) else { return };
    let all_devices = registry.snapshot();
    let mut data = HashMap::new();
    data.insert("reason".to_string(), Value::String(reason.to_string()));
    bus.publish(Event::Device(DeviceEvent {
        source_id: "galaxy-fleet".to_string(),
        timestamp: chrono::Utc::now(),
        device_id: device_id.clone(),
        status: device.status,
        device_info: device,
        all_devices,
        data,
    }))
    .await;
}

impl FleetManager {
    /// Constructs a fleet manager from scratch. `bus` is shared with every
    /// other component in the session (§9 "no global event bus").
    pub fn new(bus: Arc<EventBus>, config: FleetConfig) -> Arc<Self> {
        let registry = Arc::new(DeviceRegistry::new());
        let deferred_sink = Arc::new(DeferredSink::default());
        let transport = Arc::new(WebSocketTransport::new(deferred_sink.clone()));

        let queue = Arc::new(PerDeviceQueue::new(Arc::clone(&transport), Arc::clone(&registry)));
        let sink = Arc::new(FleetEventSink {
            registry: Arc::clone(&registry),
            // Filled in below once `reconnect`/`heartbeat` exist.
            reconnect: once_cell::sync::OnceCell::new(),
            queue: Arc::clone(&queue),
            bus: Arc::clone(&bus),
            heartbeat: once_cell::sync::OnceCell::new(),
            transport: Arc::downgrade(&transport),
        });
        deferred_sink
            .inner
            .set(Arc::clone(&sink))
            .unwrap_or_else(|_| unreachable!("DeferredSink is only filled once, here"));

        // `sink` already exists, so the scheduler/manager can take it as
        // their delegate directly; the sink's own cells are then sealed with
        // these same instances, giving `FleetEventSink` and `FleetManager`
        // exactly one `ReconnectScheduler`/`HeartbeatManager` each instead of
        // two copies that would drift apart.
        let reconnect = Arc::new(ReconnectScheduler::new(Arc::clone(&registry), Arc::clone(&sink), config.reconnect_delay));
        sink.reconnect
            .set(Arc::clone(&reconnect))
            .unwrap_or_else(|_| unreachable!("sink.reconnect is only filled once, here"));

        let heartbeat = Arc::new(HeartbeatManager::new(
            Arc::clone(&registry),
            Arc::clone(&sink),
            config.heartbeat_interval,
            config.heartbeat_missed_limit,
        ));
        sink.heartbeat
            .set(Arc::clone(&heartbeat))
            .unwrap_or_else(|_| unreachable!("sink.heartbeat is only filled once, here"));

        Arc::new(Self {
            registry,
            transport,
            heartbeat,
            reconnect,
            queue,
            bus,
        })
    }

    /// Registers a device, optionally connecting immediately (§4.2, §6.3
    /// `DeviceConfig::auto_connect`).
    pub async fn register_device(
        &self,
        id: DeviceId,
        server_url: impl Into<String>,
        os: impl Into<String>,
        capabilities: Vec<String>,
        metadata: HashMap<String, String>,
        max_retries: u32,
        auto_connect: bool,
    ) -> GalaxyResult<()> {
        self.registry
            .register(id.clone(), server_url, os, capabilities, metadata, max_retries);
        if auto_connect {
            self.connect_device(&id).await?;
        }
        Ok(())
    }

    pub async fn connect_device(&self, device_id: &DeviceId) -> GalaxyResult<()> {
        let device = self.registry.get(device_id)?;
        self.registry.set_status(device_id, DeviceStatus::Connecting)?;
        self.registry.increment_attempts(device_id)?;

        match self.transport.connect_to(device_id, &device.server_url).await {
            Ok(()) => {
                self.registry.set_status(device_id, DeviceStatus::Idle)?;
                self.heartbeat.start(device_id.clone());
                publish_device_event(&self.bus, &self.registry, device_id, "connected").await;
                Ok(())
            }
            Err(error) => {
                self.registry.set_status(device_id, DeviceStatus::Disconnected)?;
                // Already-running is fine here too: a concurrent
                // `connect_device` call for the same device may have lost
                // the race and scheduled first.
                let _ = self.reconnect.schedule(device_id.clone());
                Err(GalaxyError::InvalidConfig(format!("connect {device_id} failed: {error}")))
            }
        }
    }

    pub async fn disconnect_device(&self, device_id: &DeviceId) -> GalaxyResult<()> {
        self.heartbeat.stop(device_id);
        self.queue.cancel_all_for_device(device_id).await;
        let _ = self.transport.disconnect(device_id).await;
        self.registry.set_status(device_id, DeviceStatus::Disconnected)?;
        publish_device_event(&self.bus, &self.registry, device_id, "disconnected").await;
        Ok(())
    }

    /// Dispatches `task_id` to `device_id`, queuing it if the device is busy
    /// (§4.5). Never raises for transport failures — the returned
    /// `ExecutionResult` carries FAILED + `error_category` instead.
    pub async fn assign_task_to_device(
        &self,
        device_id: &DeviceId,
        task_id: TaskId,
        description: String,
        parameters: Value,
        timeout_s: f64,
    ) -> GalaxyResult<ExecutionResult> {
        if !self.registry.is_registered(device_id) {
            return Err(GalaxyError::DeviceNotFound(device_id.clone()));
        }
        let receiver = self
            .queue
            .assign(device_id.clone(), task_id.clone(), description, parameters, timeout_s)
            .await;
        Ok(receiver
            .await
            .unwrap_or_else(|_| ExecutionResult::connection_failure(task_id, Some(device_id.clone()))))
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    /// Tears down every connection, stops every ticker and reconnect worker,
    /// and resolves any still-queued futures to FAILED (§5 shutdown path).
    pub async fn shutdown(&self) {
        self.heartbeat.stop_all();
        self.reconnect.cancel_all();
        for device in self.registry.snapshot() {
            self.queue.cancel_all_for_device(&device.id).await;
            let _ = self.transport.disconnect(&device.id).await;
        }
    }
}
