//! Stage config editor: user-facing CRUD over one pipeline's registry.
//!
//! Input problems come back as [`EditOutcome::Rejected`] with a message a
//! person can read. Store failures stay errors.

use std::sync::Arc;

use stageboard_common::{StageDefinition, StageId, StagePatch};

use super::events::BoardEvent;
use super::state::PipelineState;
use crate::errors::{EngineError, EngineResult};

#[derive(Debug, Clone, PartialEq)]
pub enum EditOutcome<T> {
    Applied(T),
    Rejected { message: String },
}

impl<T> EditOutcome<T> {
    pub fn is_applied(&self) -> bool {
        matches!(self, EditOutcome::Applied(_))
    }

    pub fn applied(self) -> Option<T> {
        match self {
            EditOutcome::Applied(value) => Some(value),
            EditOutcome::Rejected { .. } => None,
        }
    }
}

#[derive(Clone)]
pub struct StageConfigEditor {
    state: Arc<PipelineState>,
}

impl StageConfigEditor {
    pub fn new(state: Arc<PipelineState>) -> Self {
        Self { state }
    }

    pub fn stages(&self) -> Vec<StageDefinition> {
        self.state.registry().snapshot().stages().to_vec()
    }

    pub async fn add_stage(
        &self,
        display_name: &str,
        color: Option<&str>,
    ) -> EngineResult<EditOutcome<StageDefinition>> {
        // Checked locally first so a collision never costs a round trip.
        if let Err(e) = self.state.registry().snapshot().plan_create(display_name, color) {
            return self.settle(Err(e));
        }
        let result = self.state.registry().create(display_name, color).await;
        self.settle(result)
    }

    pub async fn rename(
        &self,
        id: StageId,
        display_name: &str,
    ) -> EngineResult<EditOutcome<StageDefinition>> {
        let patch = StagePatch {
            display_name: Some(display_name.to_string()),
            color: None,
        };
        self.update(id, &patch).await
    }

    pub async fn recolor(&self, id: StageId, color: &str) -> EngineResult<EditOutcome<StageDefinition>> {
        let patch = StagePatch {
            display_name: None,
            color: Some(color.to_string()),
        };
        self.update(id, &patch).await
    }

    pub async fn update(
        &self,
        id: StageId,
        patch: &StagePatch,
    ) -> EngineResult<EditOutcome<StageDefinition>> {
        let result = self.state.registry().update(id, patch).await;
        self.settle(result)
    }

    /// Remove a stage. Entities left pointing at it fall into the first column.
    pub async fn remove(&self, id: StageId) -> EngineResult<EditOutcome<StageDefinition>> {
        let result = self.state.registry().delete(id).await;
        self.settle(result)
    }

    pub async fn reorder(&self, keys: &[String]) -> EngineResult<EditOutcome<Vec<StageDefinition>>> {
        let result = self.state.registry().reorder(keys).await.map(|()| self.stages());
        self.settle(result)
    }

    /// Move one stage to `new_index`, shifting the others.
    pub async fn move_stage(
        &self,
        key: &str,
        new_index: usize,
    ) -> EngineResult<EditOutcome<Vec<StageDefinition>>> {
        let mut keys: Vec<String> = self
            .state
            .registry()
            .snapshot()
            .keys()
            .into_iter()
            .map(str::to_string)
            .collect();
        let Some(from) = keys.iter().position(|k| k == key) else {
            return self.settle(Err(EngineError::InvalidOrder {
                message: format!("key '{}' is not in the registry", key),
            }));
        };
        let moved = keys.remove(from);
        keys.insert(new_index.min(keys.len()), moved);
        self.reorder(&keys).await
    }

    /// Turn validation failures into rejections and announce applied edits.
    fn settle<T>(&self, result: EngineResult<T>) -> EngineResult<EditOutcome<T>> {
        match result {
            Ok(value) => {
                self.state.publish(BoardEvent::RegistryChanged {
                    pipeline: self.state.binding().pipeline.clone(),
                    stages: self.stages(),
                });
                self.state.recompute();
                Ok(EditOutcome::Applied(value))
            }
            Err(e) if e.is_validation() => {
                tracing::debug!(pipeline = %self.state.binding().pipeline, error = %e, "stage edit rejected");
                Ok(EditOutcome::Rejected {
                    message: e.to_string(),
                })
            }
            Err(e) => Err(e),
        }
    }
}
