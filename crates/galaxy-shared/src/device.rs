//! Pure data shape of a device entry (§3). Behavior (registration,
//! transitions, invariant enforcement) lives in `galaxy-fleet`'s
//! `DeviceRegistry` — this struct is deliberately inert so it can be carried
//! on [`crate::event::Event`] without creating a dependency from
//! `galaxy-shared` back onto `galaxy-fleet`.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{DeviceId, TaskId};
use crate::status::DeviceStatus;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    pub server_url: String,
    pub os: String,
    pub capabilities: Vec<String>,
    pub metadata: HashMap<String, String>,
    pub status: DeviceStatus,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub connection_attempts: u32,
    pub max_retries: u32,
    pub current_task_id: Option<TaskId>,
}

impl Device {
    pub fn new(
        id: DeviceId,
        server_url: impl Into<String>,
        os: impl Into<String>,
        capabilities: Vec<String>,
        metadata: HashMap<String, String>,
        max_retries: u32,
    ) -> Self {
        Self {
            id,
            server_url: server_url.into(),
            os: os.into(),
            capabilities,
            metadata,
            status: DeviceStatus::Registered,
            last_heartbeat: None,
            connection_attempts: 0,
            max_retries,
            current_task_id: None,
        }
    }

    /// `d.status == BUSY ⇔ d.current_task_id != None` (§8).
    pub fn satisfies_busy_invariant(&self) -> bool {
        self.status.requires_current_task() == self.current_task_id.is_some()
    }

    /// `true` if this device declares every capability `required` lists.
    pub fn satisfies_capabilities(&self, required: &[String]) -> bool {
        required.iter().all(|cap| self.capabilities.contains(cap))
    }
}
