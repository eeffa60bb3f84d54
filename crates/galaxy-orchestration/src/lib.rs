//! Constellation orchestration (§3, §4.6-§4.8): the DAG model, the
//! modification synchronizer, and the orchestrator loop that drives a
//! constellation to completion.
//!
//! This crate never depends on `galaxy-fleet` outside of tests — see
//! [`orchestrator::TaskDispatcher`] and [`orchestrator::DeviceDirectory`].

pub mod constellation;
pub mod error;
pub mod orchestrator;
pub mod synchronizer;

#[cfg(feature = "test-utils")]
pub mod test_utils;

pub mod prelude {
    pub use crate::constellation::Constellation;
    pub use crate::error::{OrchestrationError, OrchestrationResult};
    pub use crate::orchestrator::{
        AssignmentStrategy, DeviceDirectory, Orchestrator, OrchestratorConfig, RoundRobinStrategy,
        TaskDispatcher,
    };
    pub use crate::synchronizer::{ModificationSynchronizer, SynchronizerStatistics};
}
