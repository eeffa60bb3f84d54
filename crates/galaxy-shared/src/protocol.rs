//! Device wire protocol (§6.1) and the `ExecutionResult` value type that
//! crosses the transport boundary in place of an exception (§7).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ids::{DeviceId, TaskId};
use crate::status::TaskStatus;

/// Envelope every wire message travels in: `{ kind, correlation_id, payload }`.
/// `kind` is carried by serde's internal tag on [`WireMessage`] itself; this
/// struct is the framing the transport actually writes to the socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub correlation_id: String,
    pub message: WireMessage,
}

impl Envelope {
    pub fn new(message: WireMessage) -> Self {
        Self {
            correlation_id: Uuid::new_v4().to_string(),
            message,
        }
    }

    pub fn with_correlation_id(correlation_id: impl Into<String>, message: WireMessage) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            message,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum WireMessage {
    /// orchestrator -> device: session identifier.
    Register { session_id: String },
    /// device -> orchestrator: accepted/rejected.
    RegisterAck { accepted: bool, reason: Option<String> },
    /// orchestrator -> device.
    DeviceInfoRequest,
    /// device -> orchestrator: OS, capabilities, metadata.
    DeviceInfo {
        os: String,
        capabilities: Vec<String>,
        metadata: HashMap<String, String>,
    },
    /// orchestrator -> device: sequence, timestamp.
    Heartbeat { sequence: u64, timestamp: DateTime<Utc> },
    /// device -> orchestrator: sequence.
    HeartbeatAck { sequence: u64 },
    /// orchestrator -> device: task id, description, parameters, timeout.
    TaskRequest {
        task_id: TaskId,
        description: String,
        parameters: serde_json::Value,
        timeout_s: f64,
    },
    /// device -> orchestrator: task id, terminal status, result or error, metadata.
    TaskResult {
        task_id: TaskId,
        status: TaskStatus,
        result: Option<serde_json::Value>,
        error: Option<String>,
        metadata: HashMap<String, String>,
    },
    /// device -> orchestrator: task id, opaque progress payload.
    TaskProgress {
        task_id: TaskId,
        progress: Option<serde_json::Value>,
    },
}

/// Category of a FAILED `ExecutionResult`, distinguishing transport failures
/// the fleet manager should retry from failures the device itself reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    ConnectionError,
    TimeoutError,
    GeneralError,
}

/// Produced by device transport for one dispatched task. Never raised as an
/// exception across the transport boundary (§4.3, §7) — always a value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub device_id: Option<DeviceId>,
    pub disconnected: bool,
    pub error_category: Option<ErrorCategory>,
}

impl ExecutionResult {
    pub fn success(task_id: TaskId, result: serde_json::Value, device_id: DeviceId) -> Self {
        Self {
            task_id,
            status: TaskStatus::Completed,
            result: Some(result),
            error: None,
            device_id: Some(device_id),
            disconnected: false,
            error_category: None,
        }
    }

    pub fn device_reported_failure(
        task_id: TaskId,
        error: impl Into<String>,
        device_id: DeviceId,
    ) -> Self {
        Self {
            task_id,
            status: TaskStatus::Failed,
            result: None,
            error: Some(error.into()),
            device_id: Some(device_id),
            disconnected: false,
            error_category: Some(ErrorCategory::GeneralError),
        }
    }

    pub fn connection_failure(task_id: TaskId, device_id: Option<DeviceId>) -> Self {
        Self {
            task_id,
            status: TaskStatus::Failed,
            result: None,
            error: Some("connection lost before the task completed".to_string()),
            device_id,
            disconnected: true,
            error_category: Some(ErrorCategory::ConnectionError),
        }
    }

    pub fn timeout_failure(task_id: TaskId, device_id: Option<DeviceId>) -> Self {
        Self {
            task_id,
            status: TaskStatus::Failed,
            result: None,
            error: Some("task timed out waiting for a reply".to_string()),
            device_id,
            disconnected: false,
            error_category: Some(ErrorCategory::TimeoutError),
        }
    }
}
