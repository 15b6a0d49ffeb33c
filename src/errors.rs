//! Typed error hierarchy for the stage engine.
//!
//! `EngineError` covers every failure the engine surfaces. Collaborator
//! failures arrive as `anyhow::Error` and are wrapped at the boundary that
//! called the store, so callers can match on what went wrong without caring
//! which backend produced it.

use stageboard_common::{PipelineType, StageId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// The config store could not be reached while loading a registry.
    #[error("Failed to load stages for pipeline '{pipeline}': {source}")]
    ConfigLoad {
        pipeline: PipelineType,
        #[source]
        source: anyhow::Error,
    },

    #[error("A stage with key '{key}' already exists")]
    DuplicateKey { key: String },

    #[error("Invalid stage order: {message}")]
    InvalidOrder { message: String },

    #[error("Unknown stage '{key}'")]
    UnknownStage { key: String },

    #[error("Moving entity '{entity_id}' to '{target}' failed: {reason}")]
    TransitionFailed {
        entity_id: String,
        target: String,
        reason: String,
    },

    #[error("Entity '{id}' is not loaded in this pipeline")]
    EntityNotFound { id: String },

    #[error("Stage {id} not found")]
    StageNotFound { id: StageId },

    #[error("Stage name must not be empty")]
    EmptyDisplayName,

    #[error("Pipeline '{name}' is not configured")]
    UnknownPipeline { name: String },

    #[error("Store error: {0}")]
    Store(#[source] anyhow::Error),
}

impl EngineError {
    /// Failures caused by user input that the editor answers with a message.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            EngineError::DuplicateKey { .. }
                | EngineError::InvalidOrder { .. }
                | EngineError::EmptyDisplayName
        )
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
