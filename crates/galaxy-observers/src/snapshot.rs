//! Snapshot broadcaster (§4.10): re-publishes every device-lifecycle event's
//! attached registry snapshot to external transports (the Web UI's
//! WebSocket fan-out, a metrics exporter). Must never block upstream
//! publishers — a slow consumer is dropped from the set rather than let its
//! backlog apply backpressure to the event bus.
//!
//! `tokio::sync::broadcast` is the natural fit: `Sender::send` never blocks
//! and a receiver that falls too far behind gets `RecvError::Lagged` instead
//! of stalling the sender. This broadcaster goes one step further than the
//! bare channel and actually drops a forwarder once it lags past a small
//! threshold, matching spec.md §4.10's "slow consumers are dropped from its
//! set" literally rather than leaving it to each consumer to notice its own
//! `Lagged` errors.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use galaxy_shared::bus::Observer;
use galaxy_shared::event::{DeviceEvent, Event};
use tokio::sync::broadcast;

/// Consumes forwarded device snapshots. Implemented externally by whatever
/// owns the outbound transport (a Web UI WebSocket connection, a metrics
/// exporter's ingest queue).
#[async_trait]
pub trait SnapshotSink: Send + Sync {
    async fn on_snapshot(&self, event: Arc<DeviceEvent>);
}

/// How many consecutive `Lagged` errors a forwarder tolerates before it gives
/// up on its sink and exits, removing that consumer from the broadcast set.
const LAG_TOLERANCE: u32 = 3;

/// Non-blocking fan-out of [`DeviceEvent`] snapshots to any number of
/// external sinks.
pub struct SnapshotBroadcaster {
    sender: broadcast::Sender<Arc<DeviceEvent>>,
    active_sinks: Arc<AtomicUsize>,
}

impl SnapshotBroadcaster {
    /// `capacity` bounds how many unconsumed snapshots a receiver may lag
    /// behind before it starts missing events (and eventually gets dropped).
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            active_sinks: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Registers `sink` and spawns the forwarder task that drives it. The
    /// task exits (and is not replaced) once `sink` falls behind by more
    /// than [`LAG_TOLERANCE`] consecutive lag errors, or once this
    /// broadcaster is dropped.
    pub fn subscribe(&self, sink: Arc<dyn SnapshotSink>) {
        let mut receiver = self.sender.subscribe();
        let active_sinks = Arc::clone(&self.active_sinks);
        active_sinks.fetch_add(1, Ordering::Relaxed);

        tokio::spawn(async move {
            let mut consecutive_lags = 0u32;
            loop {
                match receiver.recv().await {
                    Ok(event) => {
                        consecutive_lags = 0;
                        sink.on_snapshot(event).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        consecutive_lags += 1;
                        tracing::warn!(skipped, consecutive_lags, "snapshot consumer is lagging");
                        if consecutive_lags >= LAG_TOLERANCE {
                            tracing::warn!("dropping a snapshot consumer that could not keep up");
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            active_sinks.fetch_sub(1, Ordering::Relaxed);
        });
    }

    pub fn active_sink_count(&self) -> usize {
        self.active_sinks.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Observer for SnapshotBroadcaster {
    async fn on_event(&self, event: &Event) {
        if let Event::Device(device_event) = event {
            // `send` returns `Err` only when there are zero receivers; that
            // is the expected steady state before any sink has subscribed
            // and is not a failure worth logging.
            let _ = self.sender.send(Arc::new(device_event.clone()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use galaxy_shared::device::Device;
    use galaxy_shared::ids::DeviceId;
    use galaxy_shared::status::DeviceStatus;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;
    use tokio::sync::Notify;

    fn device_event() -> Event {
        let device = Device::new(DeviceId::new("d1"), "ws://x", "linux", vec![], HashMap::new(), 5);
        Event::Device(DeviceEvent {
            source_id: "fleet".to_string(),
            timestamp: chrono::Utc::now(),
            device_id: DeviceId::new("d1"),
            status: DeviceStatus::Idle,
            device_info: device.clone(),
            all_devices: vec![device],
            data: Default::default(),
        })
    }

    struct RecordingSink {
        received: StdMutex<Vec<DeviceId>>,
        notify: Arc<Notify>,
    }

    #[async_trait]
    impl SnapshotSink for RecordingSink {
        async fn on_snapshot(&self, event: Arc<DeviceEvent>) {
            self.received.lock().unwrap().push(event.device_id.clone());
            self.notify.notify_one();
        }
    }

    #[tokio::test]
    async fn forwards_device_events_to_subscribed_sinks() {
        let broadcaster = SnapshotBroadcaster::new(16);
        let notify = Arc::new(Notify::new());
        let sink = Arc::new(RecordingSink { received: StdMutex::new(vec![]), notify: Arc::clone(&notify) });
        broadcaster.subscribe(sink.clone());

        broadcaster.on_event(&device_event()).await;
        notify.notified().await;

        assert_eq!(sink.received.lock().unwrap().as_slice(), [DeviceId::new("d1")]);
    }

    #[tokio::test]
    async fn non_device_events_are_ignored() {
        let broadcaster = SnapshotBroadcaster::new(16);
        let sink = Arc::new(RecordingSink { received: StdMutex::new(vec![]), notify: Arc::new(Notify::new()) });
        broadcaster.subscribe(sink.clone());

        let agent_event = Event::Agent(galaxy_shared::event::AgentEvent {
            source_id: "planner".to_string(),
            timestamp: chrono::Utc::now(),
            agent_event_type: "thought".to_string(),
            data: Default::default(),
        });
        broadcaster.on_event(&agent_event).await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(sink.received.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn a_sink_that_lags_past_tolerance_is_dropped_from_the_set() {
        let broadcaster = SnapshotBroadcaster::new(1);
        // A sink that never consumes; it will lag and eventually be dropped.
        struct SlowSink;
        #[async_trait]
        impl SnapshotSink for SlowSink {
            async fn on_snapshot(&self, _event: Arc<DeviceEvent>) {
                tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
            }
        }
        broadcaster.subscribe(Arc::new(SlowSink));
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert_eq!(broadcaster.active_sink_count(), 1);

        for _ in 0..(LAG_TOLERANCE as usize + 2) {
            broadcaster.on_event(&device_event()).await;
        }
        tokio::time::timeout(std::time::Duration::from_secs(2), async {
            while broadcaster.active_sink_count() != 0 {
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("lagging sink should eventually be dropped");
    }
}
