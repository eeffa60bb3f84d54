//! Authoritative, in-memory directory of devices (§4.2). Pure data and state
//! transitions; no I/O. Single owner discipline (§5) is provided by
//! `DashMap`'s per-shard locking rather than a crate-wide mutex, mirroring
//! how the teacher's worker-side state maps use `dashmap` for concurrent
//! single-writer-per-key access.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use galaxy_shared::device::Device;
use galaxy_shared::error::{GalaxyError, GalaxyResult};
use galaxy_shared::ids::{DeviceId, TaskId};
use galaxy_shared::status::DeviceStatus;
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: DashMap<DeviceId, Device>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent: re-registering an existing id updates its descriptor in
    /// place rather than erroring or creating a duplicate.
    pub fn register(
        &self,
        id: DeviceId,
        server_url: impl Into<String>,
        os: impl Into<String>,
        capabilities: Vec<String>,
        metadata: HashMap<String, String>,
        max_retries: u32,
    ) {
        let server_url = server_url.into();
        let os = os.into();
        match self.devices.get_mut(&id) {
            Some(mut existing) => {
                existing.server_url = server_url;
                existing.os = os;
                existing.capabilities = capabilities;
                existing.metadata = metadata;
                existing.max_retries = max_retries;
            }
            None => {
                self.devices
                    .insert(id.clone(), Device::new(id, server_url, os, capabilities, metadata, max_retries));
            }
        }
    }

    pub fn set_status(&self, id: &DeviceId, status: DeviceStatus) -> GalaxyResult<()> {
        let mut device = self.devices.get_mut(id).ok_or_else(|| GalaxyError::DeviceNotFound(id.clone()))?;
        device.status = status;
        if !status.requires_current_task() {
            device.current_task_id = None;
        }
        Ok(())
    }

    pub fn set_idle(&self, id: &DeviceId) -> GalaxyResult<()> {
        let mut device = self.devices.get_mut(id).ok_or_else(|| GalaxyError::DeviceNotFound(id.clone()))?;
        device.status = DeviceStatus::Idle;
        device.current_task_id = None;
        Ok(())
    }

    pub fn set_busy(&self, id: &DeviceId, task_id: TaskId) -> GalaxyResult<()> {
        let mut device = self.devices.get_mut(id).ok_or_else(|| GalaxyError::DeviceNotFound(id.clone()))?;
        device.status = DeviceStatus::Busy;
        device.current_task_id = Some(task_id);
        Ok(())
    }

    pub fn increment_attempts(&self, id: &DeviceId) -> GalaxyResult<u32> {
        let mut device = self.devices.get_mut(id).ok_or_else(|| GalaxyError::DeviceNotFound(id.clone()))?;
        device.connection_attempts += 1;
        Ok(device.connection_attempts)
    }

    pub fn reset_attempts(&self, id: &DeviceId) -> GalaxyResult<()> {
        let mut device = self.devices.get_mut(id).ok_or_else(|| GalaxyError::DeviceNotFound(id.clone()))?;
        device.connection_attempts = 0;
        Ok(())
    }

    pub fn note_heartbeat(&self, id: &DeviceId, now: DateTime<Utc>) -> GalaxyResult<()> {
        let mut device = self.devices.get_mut(id).ok_or_else(|| GalaxyError::DeviceNotFound(id.clone()))?;
        device.last_heartbeat = Some(now);
        Ok(())
    }

    pub fn get(&self, id: &DeviceId) -> GalaxyResult<Device> {
        self.devices
            .get(id)
            .map(|entry| entry.clone())
            .ok_or_else(|| GalaxyError::DeviceNotFound(id.clone()))
    }

    pub fn is_registered(&self, id: &DeviceId) -> bool {
        self.devices.contains_key(id)
    }

    /// All devices, optionally filtered to those currently able to accept
    /// work (CONNECTED, IDLE, or BUSY).
    pub fn list(&self, connected_only: bool) -> Vec<Device> {
        self.devices
            .iter()
            .filter(|entry| {
                !connected_only
                    || matches!(
                        entry.status,
                        DeviceStatus::Connected | DeviceStatus::Idle | DeviceStatus::Busy
                    )
            })
            .map(|entry| entry.clone())
            .collect()
    }

    /// A deep-enough copy of the whole registry for observers (§4.2).
    pub fn snapshot(&self) -> Vec<Device> {
        self.list(false)
    }
}
