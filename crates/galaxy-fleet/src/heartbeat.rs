//! Liveness monitoring (§4.4). One ticker per CONNECTED device; missing `N`
//! consecutive replies is treated exactly like a transport error and routed
//! through the same disconnection path.
//!
//! Grounded on `device_manager.py`'s `HeartbeatManager` (start/stop one timer
//! per device, record the reply instant in the registry) but made explicit
//! about the consecutive-miss count, which the Python original tracked
//! implicitly via a last-reply timestamp comparison.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use galaxy_shared::ids::DeviceId;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::registry::DeviceRegistry;

/// Callback invoked when a device misses `missed_heartbeat_limit` consecutive
/// heartbeat replies. Playing the same role `WebSocketTransport`'s
/// `TransportEventSink::on_disconnected` plays for transport-level drops.
#[async_trait::async_trait]
pub trait HeartbeatSink: Send + Sync {
    async fn send_ping(&self, device_id: &DeviceId, sequence: u64) -> bool;
    async fn on_missed(&self, device_id: DeviceId);
}

struct Ticker {
    handle: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

/// Owns one periodic ping ticker per CONNECTED device.
pub struct HeartbeatManager {
    registry: Arc<DeviceRegistry>,
    sink: Arc<dyn HeartbeatSink>,
    interval: Duration,
    missed_limit: u32,
    tickers: Arc<DashMap<DeviceId, Ticker>>,
}

impl HeartbeatManager {
    pub fn new(
        registry: Arc<DeviceRegistry>,
        sink: Arc<dyn HeartbeatSink>,
        interval: Duration,
        missed_limit: u32,
    ) -> Self {
        Self {
            registry,
            sink,
            interval,
            missed_limit,
            tickers: Arc::new(DashMap::new()),
        }
    }

    /// Starts a ticker for `device_id`. A no-op if one is already running.
    pub fn start(&self, device_id: DeviceId) {
        if self.tickers.contains_key(&device_id) {
            return;
        }
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let registry = Arc::clone(&self.registry);
        let sink = Arc::clone(&self.sink);
        let interval = self.interval;
        let missed_limit = self.missed_limit;
        let id = device_id.clone();
        let tickers = Arc::clone(&self.tickers);

        let handle = tokio::spawn(async move {
            let consecutive_misses = AtomicU32::new(0);
            let mut sequence: u64 = 0;
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // first tick fires immediately; skip it

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown_rx.changed() => break,
                }
                if *shutdown_rx.borrow() {
                    break;
                }

                sequence += 1;
                let replied = sink.send_ping(&id, sequence).await;
                if replied {
                    consecutive_misses.store(0, Ordering::SeqCst);
                    let _ = registry.note_heartbeat(&id, Utc::now());
                } else {
                    let misses = consecutive_misses.fetch_add(1, Ordering::SeqCst) + 1;
                    tracing::warn!(device_id = %id, misses, missed_limit, "heartbeat reply missed");
                    if misses >= missed_limit {
                        sink.on_missed(id.clone()).await;
                        break;
                    }
                }
            }

            // Reached only when the loop above gives up on its own, without
            // going through `stop`; nothing else will ever clear this slot.
            tickers.remove(&id);
        });

        self.tickers.insert(
            device_id,
            Ticker {
                handle,
                shutdown: shutdown_tx,
            },
        );
    }

    /// Stops the ticker for `device_id`, if any.
    pub fn stop(&self, device_id: &DeviceId) {
        if let Some((_, ticker)) = self.tickers.remove(device_id) {
            let _ = ticker.shutdown.send(true);
            ticker.handle.abort();
        }
    }

    /// Stops every running ticker (§5 shutdown path).
    pub fn stop_all(&self) {
        let ids: Vec<DeviceId> = self.tickers.iter().map(|entry| entry.key().clone()).collect();
        for id in ids {
            self.stop(&id);
        }
    }

    pub fn is_running(&self, device_id: &DeviceId) -> bool {
        self.tickers.contains_key(device_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    struct CountingSink {
        replies: AtomicUsize,
        should_reply: std::sync::atomic::AtomicBool,
        missed_notify: Arc<Notify>,
    }

    #[async_trait::async_trait]
    impl HeartbeatSink for CountingSink {
        async fn send_ping(&self, _device_id: &DeviceId, _sequence: u64) -> bool {
            self.replies.fetch_add(1, Ordering::SeqCst);
            self.should_reply.load(Ordering::SeqCst)
        }

        async fn on_missed(&self, _device_id: DeviceId) {
            self.missed_notify.notify_one();
        }
    }

    #[tokio::test]
    async fn missed_replies_trigger_on_missed_after_limit() {
        let registry = Arc::new(DeviceRegistry::new());
        let id = DeviceId::new("d1");
        registry.register(id.clone(), "ws://x", "linux", vec![], HashMap::new(), 5);

        let missed_notify = Arc::new(Notify::new());
        let sink = Arc::new(CountingSink {
            replies: AtomicUsize::new(0),
            should_reply: std::sync::atomic::AtomicBool::new(false),
            missed_notify: Arc::clone(&missed_notify),
        });

        let manager = HeartbeatManager::new(registry, sink, Duration::from_millis(5), 2);
        manager.start(id.clone());

        tokio::time::timeout(Duration::from_secs(2), missed_notify.notified())
            .await
            .expect("on_missed should fire once the miss limit is reached");
    }

    #[tokio::test]
    async fn a_ticker_that_hits_the_miss_limit_frees_its_slot_for_restarting() {
        let registry = Arc::new(DeviceRegistry::new());
        let id = DeviceId::new("d1");
        registry.register(id.clone(), "ws://x", "linux", vec![], HashMap::new(), 5);

        let missed_notify = Arc::new(Notify::new());
        let sink = Arc::new(CountingSink {
            replies: AtomicUsize::new(0),
            should_reply: std::sync::atomic::AtomicBool::new(false),
            missed_notify: Arc::clone(&missed_notify),
        });

        let manager = HeartbeatManager::new(registry, sink, Duration::from_millis(5), 2);
        manager.start(id.clone());

        tokio::time::timeout(Duration::from_secs(2), missed_notify.notified())
            .await
            .expect("on_missed should fire once the miss limit is reached");

        tokio::time::timeout(Duration::from_secs(2), async {
            while manager.is_running(&id) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("self-terminated ticker should clear its own slot");

        manager.start(id.clone());
        assert!(manager.is_running(&id));
    }

    #[tokio::test]
    async fn successful_reply_updates_last_heartbeat() {
        let registry = Arc::new(DeviceRegistry::new());
        let id = DeviceId::new("d1");
        registry.register(id.clone(), "ws://x", "linux", vec![], HashMap::new(), 5);

        let sink = Arc::new(CountingSink {
            replies: AtomicUsize::new(0),
            should_reply: std::sync::atomic::AtomicBool::new(true),
            missed_notify: Arc::new(Notify::new()),
        });

        let manager = HeartbeatManager::new(Arc::clone(&registry), sink, Duration::from_millis(5), 3);
        manager.start(id.clone());
        tokio::time::sleep(Duration::from_millis(50)).await;
        manager.stop(&id);

        assert!(registry.get(&id).unwrap().last_heartbeat.is_some());
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_halts_the_ticker() {
        let registry = Arc::new(DeviceRegistry::new());
        let id = DeviceId::new("d1");
        registry.register(id.clone(), "ws://x", "linux", vec![], HashMap::new(), 5);
        let sink = Arc::new(CountingSink {
            replies: AtomicUsize::new(0),
            should_reply: std::sync::atomic::AtomicBool::new(true),
            missed_notify: Arc::new(Notify::new()),
        });
        let manager = HeartbeatManager::new(registry, sink, Duration::from_millis(5), 3);
        manager.start(id.clone());
        assert!(manager.is_running(&id));
        manager.stop(&id);
        manager.stop(&id);
        assert!(!manager.is_running(&id));
    }
}
