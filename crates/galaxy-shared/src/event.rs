//! Event bus payloads (§3, §6.4).
//!
//! `Event` is a sum type over four variants, each sharing a stable envelope
//! (`kind`, `source_id`, `timestamp`). Attribute bags are opaque
//! `serde_json::Value` maps at this layer, per the "dynamic attribute bags"
//! design note — the component that owns a typed view (the synchronizer for
//! constellation snapshots, the metrics observer for durations) converts
//! immediately on receipt rather than threading the bag further.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::device::Device;
use crate::ids::{ConstellationId, DeviceId, TaskId};
use crate::status::{ConstellationState, DeviceStatus, TaskStatus};

/// Discriminant used for bus subscription filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    TaskStarted,
    TaskCompleted,
    TaskFailed,
    ConstellationStarted,
    ConstellationModified,
    ConstellationCompleted,
    ConstellationFailed,
    ConstellationCancelled,
    DeviceConnected,
    DeviceDisconnected,
    DeviceStatusChanged,
    Agent,
}

pub type AttributeBag = HashMap<String, serde_json::Value>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEvent {
    pub source_id: String,
    pub timestamp: DateTime<Utc>,
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    /// Tasks whose last blocking predecessor just resolved, populated on
    /// `TASK_COMPLETED`/`TASK_FAILED` from `Constellation::mark_task_completed`.
    pub newly_ready_tasks: Vec<TaskId>,
    pub data: AttributeBag,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConstellationEvent {
    pub source_id: String,
    pub timestamp: DateTime<Utc>,
    pub constellation_id: ConstellationId,
    pub state: ConstellationState,
    pub newly_ready_tasks: Option<Vec<TaskId>>,
    /// Completed task ids the edit responds to (planner `CONSTELLATION_MODIFIED`).
    pub on_task_id: Vec<TaskId>,
    /// Opaque serialized `Constellation` — deserialized by the synchronizer,
    /// which is the only component that owns the concrete type.
    pub new_constellation: Option<serde_json::Value>,
    pub modification_type: Option<String>,
    /// Final counts, present on `CONSTELLATION_COMPLETED`/`CONSTELLATION_FAILED`.
    pub statistics: Option<ConstellationStatistics>,
    pub data: AttributeBag,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstellationStatistics {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceEvent {
    pub source_id: String,
    pub timestamp: DateTime<Utc>,
    pub device_id: DeviceId,
    pub status: DeviceStatus,
    /// Snapshot of just this device.
    pub device_info: Device,
    /// Snapshot of the full registry at event time.
    pub all_devices: Vec<Device>,
    pub data: AttributeBag,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentEvent {
    pub source_id: String,
    pub timestamp: DateTime<Utc>,
    /// e.g. "thought", "plan", "response" — inert to the core, re-broadcast
    /// as received from the planner.
    pub agent_event_type: String,
    pub data: AttributeBag,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Event {
    Task(TaskEvent),
    Constellation(ConstellationEvent),
    Device(DeviceEvent),
    Agent(AgentEvent),
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Task(event) => match event.status {
                TaskStatus::Running => EventKind::TaskStarted,
                TaskStatus::Completed => EventKind::TaskCompleted,
                TaskStatus::Failed | TaskStatus::Cancelled => EventKind::TaskFailed,
                TaskStatus::Pending | TaskStatus::WaitingDependency => EventKind::TaskStarted,
            },
            Event::Constellation(event) => match event.state {
                ConstellationState::Created => EventKind::ConstellationStarted,
                ConstellationState::Executing => EventKind::ConstellationModified,
                ConstellationState::Completed => EventKind::ConstellationCompleted,
                ConstellationState::Failed => EventKind::ConstellationFailed,
                ConstellationState::Cancelled => EventKind::ConstellationCancelled,
            },
            Event::Device(event) => match event.status {
                DeviceStatus::Connected | DeviceStatus::Idle | DeviceStatus::Busy => {
                    EventKind::DeviceConnected
                }
                DeviceStatus::Disconnected | DeviceStatus::Failed => EventKind::DeviceDisconnected,
                DeviceStatus::Registered | DeviceStatus::Connecting => {
                    EventKind::DeviceStatusChanged
                }
            },
            Event::Agent(_) => EventKind::Agent,
        }
    }

    pub fn source_id(&self) -> &str {
        match self {
            Event::Task(event) => &event.source_id,
            Event::Constellation(event) => &event.source_id,
            Event::Device(event) => &event.source_id,
            Event::Agent(event) => &event.source_id,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Event::Task(event) => event.timestamp,
            Event::Constellation(event) => event.timestamp,
            Event::Device(event) => event.timestamp,
            Event::Agent(event) => event.timestamp,
        }
    }
}
