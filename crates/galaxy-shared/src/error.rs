//! Shared error taxonomy.
//!
//! Only validation errors are raised synchronously (§7 of the distilled
//! design). Connection, timeout, and execution failures never reach this
//! type — they surface as values via [`crate::protocol::ExecutionResult`].

use thiserror::Error;

use crate::ids::{DependencyId, DeviceId, TaskId};

/// Result alias for fallible operations across the workspace.
pub type GalaxyResult<T> = Result<T, GalaxyError>;

/// Validation and boundary errors raised synchronously by the core's public
/// APIs (registry, constellation, orchestrator).
#[derive(Debug, Error)]
pub enum GalaxyError {
    #[error("device not found: {0}")]
    DeviceNotFound(DeviceId),

    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("dependency not found: {0}")]
    DependencyNotFound(DependencyId),

    #[error("dependency {dependency} would introduce a cycle via task {via}")]
    CycleDetected { dependency: DependencyId, via: TaskId },

    #[error("task {0} has no assigned device and no assignment strategy was provided")]
    NoAssignment(TaskId),

    #[error("task {task} assigned to unknown device {device}")]
    UnknownAssignment { task: TaskId, device: DeviceId },

    #[error("no device satisfies the required capabilities: {0:?}")]
    NoCapableDevice(Vec<String>),

    #[error("constellation validation failed: {0:?}")]
    InvalidConstellation(Vec<String>),

    #[error("cannot mutate task {0}: it has already reached a terminal state")]
    TerminalTaskMutation(TaskId),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
