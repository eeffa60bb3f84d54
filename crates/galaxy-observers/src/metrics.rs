//! Metrics observer (§4.10): a pure accumulator over the event bus, read by
//! external reporters (the CLI's status bar, the Web UI's stats panel).
//!
//! Grounded on the teacher's `orchestration_statistics.rs`: atomic counters
//! for the cheap totals, a `Mutex<VecDeque<Duration>>` for the handful of
//! metrics that need a recent-window average (task durations). Unlike the
//! teacher's `OrchestrationStatistics`, this observer is driven entirely by
//! bus events rather than an explicit `record_*` API, since spec.md §4.10
//! describes it as a subscriber, not a call site every component threads
//! through.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use galaxy_shared::bus::Observer;
use galaxy_shared::event::Event;
use galaxy_shared::status::ConstellationState;

/// How many recent task durations to retain for the rolling average. Older
/// samples are dropped; this bounds memory for a long-running session
/// instead of accumulating every duration ever observed.
const MAX_RECENT_DURATIONS: usize = 500;

/// Per-session counters accumulated from the event bus. Read by external
/// reporters; never mutated by them. Safe to hold behind a plain `Arc` and
/// subscribe directly as an [`Observer`].
#[derive(Debug, Default)]
pub struct MetricsObserver {
    tasks_started: AtomicU64,
    tasks_completed: AtomicU64,
    tasks_failed: AtomicU64,
    constellations_completed: AtomicU64,
    constellations_failed: AtomicU64,
    constellations_cancelled: AtomicU64,
    modifications_observed: AtomicU64,
    total_execution_time_ms: AtomicU64,
    constellation_durations_ms: Mutex<VecDeque<u64>>,
    task_started_at: Mutex<std::collections::HashMap<String, std::time::Instant>>,
}

/// A read-only snapshot of [`MetricsObserver`]'s counters, cheap to clone and
/// serialize for an external reporter.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct MetricsSnapshot {
    pub tasks_started: u64,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub constellations_completed: u64,
    pub constellations_failed: u64,
    pub constellations_cancelled: u64,
    pub modifications_observed: u64,
    pub total_execution_time_ms: u64,
    pub average_task_duration_ms: f64,
}

impl MetricsObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let durations = self.constellation_durations_ms.lock().unwrap_or_else(|p| p.into_inner());
        let average_task_duration_ms = if durations.is_empty() {
            0.0
        } else {
            durations.iter().sum::<u64>() as f64 / durations.len() as f64
        };
        MetricsSnapshot {
            tasks_started: self.tasks_started.load(Ordering::Relaxed),
            tasks_completed: self.tasks_completed.load(Ordering::Relaxed),
            tasks_failed: self.tasks_failed.load(Ordering::Relaxed),
            constellations_completed: self.constellations_completed.load(Ordering::Relaxed),
            constellations_failed: self.constellations_failed.load(Ordering::Relaxed),
            constellations_cancelled: self.constellations_cancelled.load(Ordering::Relaxed),
            modifications_observed: self.modifications_observed.load(Ordering::Relaxed),
            total_execution_time_ms: self.total_execution_time_ms.load(Ordering::Relaxed),
            average_task_duration_ms,
        }
    }

    fn record_task_duration(&self, task_id: &str) {
        let started_at = self.task_started_at.lock().unwrap_or_else(|p| p.into_inner()).remove(task_id);
        let Some(started_at) = started_at else { return };
        let duration = started_at.elapsed();
        let mut durations = self.constellation_durations_ms.lock().unwrap_or_else(|p| p.into_inner());
        durations.push_back(duration.as_millis() as u64);
        if durations.len() > MAX_RECENT_DURATIONS {
            durations.pop_front();
        }
    }
}

#[async_trait]
impl Observer for MetricsObserver {
    async fn on_event(&self, event: &Event) {
        match event {
            Event::Task(task_event) => match task_event.status {
                galaxy_shared::status::TaskStatus::Running => {
                    self.tasks_started.fetch_add(1, Ordering::Relaxed);
                    self.task_started_at
                        .lock()
                        .unwrap_or_else(|p| p.into_inner())
                        .insert(task_event.task_id.as_str().to_string(), std::time::Instant::now());
                }
                galaxy_shared::status::TaskStatus::Completed => {
                    self.tasks_completed.fetch_add(1, Ordering::Relaxed);
                    self.record_task_duration(task_event.task_id.as_str());
                }
                galaxy_shared::status::TaskStatus::Failed | galaxy_shared::status::TaskStatus::Cancelled => {
                    self.tasks_failed.fetch_add(1, Ordering::Relaxed);
                    self.record_task_duration(task_event.task_id.as_str());
                }
                _ => {}
            },
            Event::Constellation(constellation_event) => {
                if constellation_event.new_constellation.is_some() {
                    self.modifications_observed.fetch_add(1, Ordering::Relaxed);
                }
                match constellation_event.state {
                    ConstellationState::Completed => {
                        self.constellations_completed.fetch_add(1, Ordering::Relaxed);
                    }
                    ConstellationState::Failed => {
                        self.constellations_failed.fetch_add(1, Ordering::Relaxed);
                    }
                    ConstellationState::Cancelled => {
                        self.constellations_cancelled.fetch_add(1, Ordering::Relaxed);
                    }
                    _ => {}
                }
                if let Some(stats) = &constellation_event.statistics {
                    self.total_execution_time_ms.fetch_add(stats.duration_ms, Ordering::Relaxed);
                }
            }
            Event::Device(_) | Event::Agent(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use galaxy_shared::event::{ConstellationEvent, ConstellationStatistics, TaskEvent};
    use galaxy_shared::ids::{ConstellationId, TaskId};
    use galaxy_shared::status::TaskStatus;

    fn task_event(task_id: &str, status: TaskStatus) -> Event {
        Event::Task(TaskEvent {
            source_id: "orchestrator".to_string(),
            timestamp: chrono::Utc::now(),
            task_id: TaskId::new(task_id),
            status,
            result: None,
            error: None,
            newly_ready_tasks: vec![],
            data: Default::default(),
        })
    }

    #[tokio::test]
    async fn counts_started_completed_and_failed_tasks() {
        let metrics = MetricsObserver::new();
        metrics.on_event(&task_event("a", TaskStatus::Running)).await;
        metrics.on_event(&task_event("a", TaskStatus::Completed)).await;
        metrics.on_event(&task_event("b", TaskStatus::Running)).await;
        metrics.on_event(&task_event("b", TaskStatus::Failed)).await;

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.tasks_started, 2);
        assert_eq!(snapshot.tasks_completed, 1);
        assert_eq!(snapshot.tasks_failed, 1);
    }

    #[tokio::test]
    async fn tracks_constellation_terminal_states_and_duration() {
        let metrics = MetricsObserver::new();
        let event = Event::Constellation(ConstellationEvent {
            source_id: "orchestrator".to_string(),
            timestamp: chrono::Utc::now(),
            constellation_id: ConstellationId::new("c1"),
            state: galaxy_shared::status::ConstellationState::Completed,
            newly_ready_tasks: None,
            on_task_id: vec![],
            new_constellation: None,
            modification_type: None,
            statistics: Some(ConstellationStatistics { total: 3, completed: 3, failed: 0, cancelled: 0, duration_ms: 250 }),
            data: Default::default(),
        });
        metrics.on_event(&event).await;

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.constellations_completed, 1);
        assert_eq!(snapshot.total_execution_time_ms, 250);
    }

    #[tokio::test]
    async fn modification_events_increment_modifications_observed() {
        let metrics = MetricsObserver::new();
        let event = Event::Constellation(ConstellationEvent {
            source_id: "planner".to_string(),
            timestamp: chrono::Utc::now(),
            constellation_id: ConstellationId::new("c1"),
            state: galaxy_shared::status::ConstellationState::Executing,
            newly_ready_tasks: None,
            on_task_id: vec![TaskId::new("a")],
            new_constellation: Some(serde_json::json!({})),
            modification_type: Some("add_task".to_string()),
            statistics: None,
            data: Default::default(),
        });
        metrics.on_event(&event).await;
        assert_eq!(metrics.snapshot().modifications_observed, 1);
    }
}
