//! The event bus (§4.1): the single in-process publish/subscribe channel
//! every other component communicates through. No global singleton — each
//! session constructs its own `EventBus` and hands it to every collaborator
//! (§9 "Global event bus as module-level state").

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::event::{Event, EventKind};

/// Identifies one subscription so it can later be removed with
/// [`EventBus::unsubscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(u64);

/// An event bus subscriber. Implementors must tolerate being called
/// concurrently with other observers and must not assume any particular
/// delivery order relative to them (§4.1, §5).
#[async_trait]
pub trait Observer: Send + Sync {
    async fn on_event(&self, event: &Event);
}

enum Subscription {
    Kinds(HashSet<EventKind>),
    All,
}

impl Subscription {
    fn matches(&self, kind: EventKind) -> bool {
        match self {
            Subscription::Kinds(kinds) => kinds.contains(&kind),
            Subscription::All => true,
        }
    }
}

struct Entry {
    subscription: Subscription,
    observer: Arc<dyn Observer>,
}

/// Typed pub/sub bus. Delivery to observers happens concurrently; a
/// misbehaving observer's panic-free error is logged and never prevents
/// delivery to the others or fails the publisher (§4.1 failure semantics).
#[derive(Default)]
pub struct EventBus {
    next_id: AtomicU64,
    entries: RwLock<HashMap<ObserverId, Entry>>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus").finish_non_exhaustive()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `observer` for a chosen subset of event kinds, or every
    /// kind when `kinds` is `None`.
    pub async fn subscribe(
        &self,
        observer: Arc<dyn Observer>,
        kinds: Option<HashSet<EventKind>>,
    ) -> ObserverId {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let subscription = match kinds {
            Some(kinds) => Subscription::Kinds(kinds),
            None => Subscription::All,
        };
        self.entries
            .write()
            .await
            .insert(id, Entry { subscription, observer });
        id
    }

    /// Removes a subscription. A no-op if `id` is unknown (already
    /// unsubscribed, or never registered).
    pub async fn unsubscribe(&self, id: ObserverId) {
        self.entries.write().await.remove(&id);
    }

    /// Delivers `event` to every currently-subscribed observer whose filter
    /// matches. Observers are snapshotted before dispatch so an observer
    /// that subscribes or unsubscribes from within its own handler — the
    /// bus must remain reentrant — never invalidates this delivery.
    pub async fn publish(&self, event: Event) {
        let kind = event.kind();
        let targets: Vec<Arc<dyn Observer>> = {
            let entries = self.entries.read().await;
            entries
                .values()
                .filter(|entry| entry.subscription.matches(kind))
                .map(|entry| Arc::clone(&entry.observer))
                .collect()
        };

        let event = Arc::new(event);
        let mut handles = Vec::with_capacity(targets.len());
        for observer in targets {
            let event = Arc::clone(&event);
            handles.push(tokio::spawn(async move {
                observer.on_event(&event).await;
            }));
        }
        for handle in handles {
            if let Err(err) = handle.await {
                tracing::warn!(error = %err, "event observer task panicked; delivery to others was unaffected");
            }
        }
    }

    pub async fn subscriber_count(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::AgentEvent;
    use std::sync::Mutex as StdMutex;

    struct RecordingObserver {
        received: StdMutex<Vec<EventKind>>,
    }

    #[async_trait]
    impl Observer for RecordingObserver {
        async fn on_event(&self, event: &Event) {
            self.received.lock().unwrap().push(event.kind());
        }
    }

    fn agent_event() -> Event {
        Event::Agent(AgentEvent {
            source_id: "planner".to_string(),
            timestamp: chrono::Utc::now(),
            agent_event_type: "thought".to_string(),
            data: Default::default(),
        })
    }

    #[tokio::test]
    async fn publish_delivers_to_matching_subscribers_only() {
        let bus = EventBus::new();
        let matching = Arc::new(RecordingObserver { received: StdMutex::new(vec![]) });
        let mut kinds = HashSet::new();
        kinds.insert(EventKind::Agent);
        bus.subscribe(matching.clone(), Some(kinds)).await;

        let non_matching = Arc::new(RecordingObserver { received: StdMutex::new(vec![]) });
        let mut other_kinds = HashSet::new();
        other_kinds.insert(EventKind::TaskStarted);
        bus.subscribe(non_matching.clone(), Some(other_kinds)).await;

        bus.publish(agent_event()).await;

        assert_eq!(matching.received.lock().unwrap().as_slice(), [EventKind::Agent]);
        assert!(non_matching.received.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unsubscribe_stops_future_delivery() {
        let bus = EventBus::new();
        let observer = Arc::new(RecordingObserver { received: StdMutex::new(vec![]) });
        let id = bus.subscribe(observer.clone(), None).await;
        bus.unsubscribe(id).await;
        bus.publish(agent_event()).await;
        assert!(observer.received.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn subscribe_all_receives_every_kind() {
        let bus = EventBus::new();
        let observer = Arc::new(RecordingObserver { received: StdMutex::new(vec![]) });
        bus.subscribe(observer.clone(), None).await;
        bus.publish(agent_event()).await;
        assert_eq!(observer.received.lock().unwrap().len(), 1);
    }
}
