//! Per-crate error enum, following the workspace's one-thiserror-enum-per-crate
//! convention. Most failures the constellation model and synchronizer raise
//! are already covered by [`GalaxyError`]'s validation variants; this enum
//! only adds what's specific to the orchestration loop itself.

use galaxy_shared::error::GalaxyError;
use thiserror::Error;

pub type OrchestrationResult<T> = Result<T, OrchestrationError>;

#[derive(Debug, Error)]
pub enum OrchestrationError {
    #[error(transparent)]
    Galaxy(#[from] GalaxyError),

    #[error("failed to (de)serialize a constellation carried on the event bus: {0}")]
    Serialization(#[from] serde_json::Error),
}
