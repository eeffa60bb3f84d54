//! Trait seams the core consumes but never implements (§1, §6.2, §4.3).
//! Living here, rather than in `galaxy-orchestration` or `galaxy-fleet`,
//! lets both depend on the interface without depending on each other's
//! concrete implementation.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::GalaxyResult;
use crate::event::TaskEvent;
use crate::ids::{DeviceId, TaskId};
use crate::protocol::ExecutionResult;

/// Produces and revises the constellation. Implemented externally by an
/// LLM-backed planning agent; the core only calls it at the two points
/// spec.md names.
///
/// `Constellation` itself lives in `galaxy-orchestration`, one layer above
/// this trait, so the return type here is the same opaque `serde_json::Value`
/// form events carry it in — callers deserialize into the concrete type.
#[async_trait]
pub trait Planner: Send + Sync {
    /// Called once at session start to produce the initial constellation.
    async fn plan(&self, request_text: &str) -> GalaxyResult<Value>;

    /// Called when the planner chooses to revise the DAG in response to a
    /// task completion or failure. Returning `Ok(None)` means "no edit" —
    /// the orchestrator proceeds with the existing structure.
    async fn revise(&self, trigger: &TaskEvent) -> GalaxyResult<Option<Value>>;
}

/// The transport seam `galaxy-fleet`'s WebSocket implementation satisfies
/// (§4.3). Defined here so `galaxy-orchestration` can dispatch tasks without
/// depending on `galaxy-fleet`'s concrete transport.
#[async_trait]
pub trait DeviceTransport: Send + Sync {
    /// Performs the connect handshake; returns once the device is ready to
    /// receive tasks.
    async fn connect(&self, device_id: &DeviceId) -> GalaxyResult<()>;

    /// Suspends until the peer returns a terminal status or the transport
    /// fails. Never raises — failures are FAILED `ExecutionResult`s.
    async fn send_task(
        &self,
        device_id: &DeviceId,
        task_id: TaskId,
        description: &str,
        parameters: Value,
        timeout_s: f64,
    ) -> ExecutionResult;

    /// Tears down the stream gracefully.
    async fn disconnect(&self, device_id: &DeviceId) -> GalaxyResult<()>;

    /// Liveness view; does not perform I/O.
    async fn is_connected(&self, device_id: &DeviceId) -> bool;
}
