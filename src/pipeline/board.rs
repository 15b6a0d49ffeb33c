//! Board presentation adapter: columns, cards and drop gestures.
//!
//! This is the only part of the engine that knows about drag-and-drop. A drop
//! becomes exactly one `move_entity` call running in the background.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use stageboard_common::{Entity, PipelineType};
use tokio::task::JoinHandle;

use super::classifier::{UNASSIGNED_STAGE_KEY, total_across_buckets};
use super::registry::DEFAULT_STAGE_COLOR;
use super::state::PipelineState;
use super::transition::{TransitionController, TransitionPhase};
use crate::errors::{EngineError, EngineResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoardView {
    pub pipeline: PipelineType,
    pub columns: Vec<ColumnView>,
    pub total_value: f64,
    /// Non-fatal notice, e.g. stages could not be loaded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub banner: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnView {
    /// The stage key.
    pub id: String,
    pub title: String,
    pub color: String,
    pub order_index: u32,
    pub count: usize,
    pub aggregate_value: f64,
    pub droppable: bool,
    pub cards: Vec<CardView>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardView {
    pub entity_id: String,
    /// Stage key stored on the entity; may differ from the column for orphans.
    pub recorded_stage: Option<String>,
    pub orphan: bool,
    pub value: f64,
    pub phase: TransitionPhase,
    pub entity: Entity,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropGesture {
    pub entity_id: String,
    pub destination_stage_key: String,
}

#[derive(Debug)]
pub enum DropOutcome {
    /// The move is running; the handle resolves once it is reconciled.
    Accepted(JoinHandle<EngineResult<()>>),
    /// Dropped onto the column it already belongs to.
    Unchanged,
    Rejected(EngineError),
}

#[derive(Clone)]
pub struct BoardAdapter {
    state: Arc<PipelineState>,
    controller: TransitionController,
}

impl BoardAdapter {
    pub fn new(state: Arc<PipelineState>, controller: TransitionController) -> Self {
        Self { state, controller }
    }

    pub fn view(&self) -> BoardView {
        let registry = self.state.registry().snapshot();
        let classifier = self.state.classifier();
        let buckets = {
            let entities = self.state.lock_entities();
            classifier.classify(&entities, &registry)
        };
        let total_value = total_across_buckets(&buckets);

        let columns = buckets
            .into_iter()
            .enumerate()
            .map(|(index, bucket)| {
                let stage = registry.get_by_key(&bucket.stage_key);
                let cards = bucket
                    .entities
                    .into_iter()
                    .map(|entity| CardView {
                        entity_id: entity.id.clone(),
                        recorded_stage: entity
                            .stage_key(classifier.stage_field())
                            .map(str::to_string),
                        orphan: classifier.is_orphan(&entity, &registry),
                        value: classifier.value_of(&entity),
                        phase: self.controller.phase(&entity.id),
                        entity,
                    })
                    .collect();
                ColumnView {
                    title: stage
                        .map(|s| s.display_name.clone())
                        .unwrap_or_else(|| "Unassigned".to_string()),
                    color: stage
                        .map(|s| s.color.clone())
                        .unwrap_or_else(|| DEFAULT_STAGE_COLOR.to_string()),
                    order_index: stage.map(|s| s.order_index).unwrap_or(index as u32),
                    droppable: stage.is_some(),
                    count: bucket.count,
                    aggregate_value: bucket.aggregate_value,
                    id: bucket.stage_key,
                    cards,
                }
            })
            .collect();

        BoardView {
            pipeline: self.state.binding().pipeline.clone(),
            columns,
            total_value,
            banner: self.state.banner(),
        }
    }

    /// Validate a drop against the live registry and start the move.
    ///
    /// Returns without waiting for persistence; failures arrive through the
    /// controller's revert path and the `TransitionFailed` event.
    pub fn handle_drop(&self, gesture: DropGesture) -> DropOutcome {
        let DropGesture {
            entity_id,
            destination_stage_key,
        } = gesture;

        if destination_stage_key == UNASSIGNED_STAGE_KEY
            || !self.state.registry().contains_key(&destination_stage_key)
        {
            return DropOutcome::Rejected(EngineError::UnknownStage {
                key: destination_stage_key,
            });
        }
        let Some(entity) = self.state.entity(&entity_id) else {
            return DropOutcome::Rejected(EngineError::EntityNotFound { id: entity_id });
        };
        if entity.stage_key(self.state.classifier().stage_field())
            == Some(destination_stage_key.as_str())
        {
            return DropOutcome::Unchanged;
        }

        tracing::info!(
            pipeline = %self.state.binding().pipeline,
            entity_id = %entity_id,
            destination = %destination_stage_key,
            "drop accepted"
        );
        let controller = self.controller.clone();
        DropOutcome::Accepted(tokio::spawn(async move {
            controller
                .move_entity(&entity_id, &destination_stage_key)
                .await
        }))
    }
}
