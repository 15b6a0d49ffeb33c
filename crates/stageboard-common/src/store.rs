//! Collaborator contracts for persistence.
//!
//! The engine never assumes a transport. Implementations only promise that
//! each call is atomic from the caller's point of view: it lands completely
//! or not at all.

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{
    Entity, EntityFilter, NewStage, PipelineBinding, PipelineType, StageDefinition, StageId,
    StagePatch,
};

/// Remote record store holding the entities of every pipeline.
#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn list_entities(
        &self,
        binding: &PipelineBinding,
        filter: &EntityFilter,
    ) -> Result<Vec<Entity>>;

    /// Write `stage_key` into the binding's stage field of one entity.
    async fn update_entity_stage(
        &self,
        binding: &PipelineBinding,
        entity_id: &str,
        stage_key: &str,
    ) -> Result<()>;
}

/// Remote store holding stage definitions, one independent list per pipeline.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Definitions of one pipeline ordered by `order_index`.
    async fn list_stages(&self, pipeline: &PipelineType) -> Result<Vec<StageDefinition>>;

    async fn create_stage(
        &self,
        pipeline: &PipelineType,
        stage: &NewStage,
    ) -> Result<StageDefinition>;

    async fn update_stage(&self, id: StageId, patch: &StagePatch) -> Result<StageDefinition>;

    /// Remove a definition and close the gap in `order_index` it leaves behind.
    async fn delete_stage(&self, id: StageId) -> Result<()>;

    /// Assign `order_index = position` for every id in `order`.
    async fn reorder_stages(&self, pipeline: &PipelineType, order: &[StageId]) -> Result<()>;
}
