use serde::{Deserialize, Serialize};
use serde_json::Value;
use stageboard_common::{Bucket, PipelineType, StageDefinition};

/// Notifications pushed to presentation hosts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum BoardEvent {
    /// Buckets after any entity or registry change, optimistic state included.
    Recomputed {
        pipeline: PipelineType,
        buckets: Vec<Bucket>,
        total_value: f64,
    },
    TransitionStarted {
        pipeline: PipelineType,
        entity_id: String,
        from: Option<String>,
        to: String,
    },
    TransitionConfirmed {
        pipeline: PipelineType,
        entity_id: String,
        stage_key: String,
    },
    /// Persistence failed or timed out and the entity was put back.
    TransitionFailed {
        pipeline: PipelineType,
        entity_id: String,
        attempted: String,
        /// Stage field value the entity shows after the failure.
        restored: Option<Value>,
        message: String,
    },
    RegistryChanged {
        pipeline: PipelineType,
        stages: Vec<StageDefinition>,
    },
    ConfigLoadFailed {
        pipeline: PipelineType,
        message: String,
    },
}

impl BoardEvent {
    pub fn pipeline(&self) -> &PipelineType {
        match self {
            BoardEvent::Recomputed { pipeline, .. }
            | BoardEvent::TransitionStarted { pipeline, .. }
            | BoardEvent::TransitionConfirmed { pipeline, .. }
            | BoardEvent::TransitionFailed { pipeline, .. }
            | BoardEvent::RegistryChanged { pipeline, .. }
            | BoardEvent::ConfigLoadFailed { pipeline, .. } => pipeline,
        }
    }
}
