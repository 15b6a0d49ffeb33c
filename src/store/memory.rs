//! In-process collaborator with failure and latency injection.
//!
//! Backs the `memory` storage backend and the engine's tests: a move can be
//! made to fail, the config store can be made unreachable, and every entity
//! update is counted.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::{Result, bail};
use async_trait::async_trait;
use stageboard_common::{
    ConfigStore, Entity, EntityFilter, EntityStore, NewStage, PipelineBinding, PipelineType,
    StageDefinition, StageId, StagePatch,
};

#[derive(Default)]
struct MemoryState {
    next_stage_id: StageId,
    stages: Vec<StageDefinition>,
    entities: BTreeMap<PipelineType, Vec<Entity>>,
}

impl MemoryState {
    fn pipeline_stages(&self, pipeline: &PipelineType) -> Vec<StageDefinition> {
        let mut stages: Vec<StageDefinition> = self
            .stages
            .iter()
            .filter(|s| &s.pipeline == pipeline)
            .cloned()
            .collect();
        stages.sort_by_key(|s| s.order_index);
        stages
    }

    fn find_key(&self, pipeline: &PipelineType, key: &str) -> Option<&StageDefinition> {
        self.stages
            .iter()
            .find(|s| &s.pipeline == pipeline && s.key == key)
    }

    fn push_stage(&mut self, pipeline: &PipelineType, stage: &NewStage) -> StageDefinition {
        self.next_stage_id += 1;
        let definition = StageDefinition {
            id: self.next_stage_id,
            pipeline: pipeline.clone(),
            key: stage.key.clone(),
            display_name: stage.display_name.clone(),
            color: stage.color.clone(),
            order_index: stage.order_index,
            created_at: chrono::Utc::now().to_rfc3339(),
        };
        self.stages.push(definition.clone());
        definition
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    fail_entity_updates: AtomicBool,
    config_unreachable: AtomicBool,
    update_delay_ms: AtomicU64,
    entity_update_calls: AtomicUsize,
    reorder_calls: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a stage directly, appended after the pipeline's existing stages.
    pub fn seed_stage(
        &self,
        pipeline: &PipelineType,
        key: &str,
        display_name: &str,
        color: &str,
    ) -> StageDefinition {
        let mut state = self.lock();
        // Seeding the same key twice returns the existing definition.
        if let Some(existing) = state.find_key(pipeline, key) {
            return existing.clone();
        }
        let order_index = state.pipeline_stages(pipeline).len() as u32;
        let stage = NewStage {
            key: key.to_string(),
            display_name: display_name.to_string(),
            color: color.to_string(),
            order_index,
        };
        state.push_stage(pipeline, &stage)
    }

    /// Insert or replace an entity by id.
    pub fn insert_entity(&self, pipeline: &PipelineType, entity: Entity) {
        let mut state = self.lock();
        let entities = state.entities.entry(pipeline.clone()).or_default();
        match entities.iter_mut().find(|e| e.id == entity.id) {
            Some(existing) => *existing = entity,
            None => entities.push(entity),
        }
    }

    pub fn entities(&self, pipeline: &PipelineType) -> Vec<Entity> {
        self.lock()
            .entities
            .get(pipeline)
            .cloned()
            .unwrap_or_default()
    }

    pub fn entity(&self, pipeline: &PipelineType, id: &str) -> Option<Entity> {
        self.lock()
            .entities
            .get(pipeline)
            .and_then(|list| list.iter().find(|e| e.id == id).cloned())
    }

    pub fn stages(&self, pipeline: &PipelineType) -> Vec<StageDefinition> {
        self.lock().pipeline_stages(pipeline)
    }

    /// Make every subsequent `update_entity_stage` fail.
    pub fn set_fail_entity_updates(&self, fail: bool) {
        self.fail_entity_updates.store(fail, Ordering::SeqCst);
    }

    /// Make every config store call fail as if the store were offline.
    pub fn set_config_unreachable(&self, unreachable: bool) {
        self.config_unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Delay each entity update before it lands (or fails).
    pub fn set_update_delay(&self, delay: Duration) {
        self.update_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn entity_update_calls(&self) -> usize {
        self.entity_update_calls.load(Ordering::SeqCst)
    }

    pub fn reorder_calls(&self) -> usize {
        self.reorder_calls.load(Ordering::SeqCst)
    }

    fn check_config_reachable(&self) -> Result<()> {
        if self.config_unreachable.load(Ordering::SeqCst) {
            bail!("config store unreachable");
        }
        Ok(())
    }
}

#[async_trait]
impl EntityStore for MemoryStore {
    async fn list_entities(
        &self,
        binding: &PipelineBinding,
        filter: &EntityFilter,
    ) -> Result<Vec<Entity>> {
        let entities = self.entities(&binding.pipeline);
        let matching = entities.into_iter().filter(|e| filter.matches(e));
        Ok(match filter.limit {
            Some(limit) => matching.take(limit).collect(),
            None => matching.collect(),
        })
    }

    async fn update_entity_stage(
        &self,
        binding: &PipelineBinding,
        entity_id: &str,
        stage_key: &str,
    ) -> Result<()> {
        self.entity_update_calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.update_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.fail_entity_updates.load(Ordering::SeqCst) {
            bail!("entity store rejected update of '{}'", entity_id);
        }
        let mut state = self.lock();
        let entity = state
            .entities
            .get_mut(&binding.pipeline)
            .and_then(|list| list.iter_mut().find(|e| e.id == entity_id));
        match entity {
            Some(entity) => {
                entity.set_stage_key(&binding.stage_field, stage_key);
                Ok(())
            }
            None => bail!("entity '{}' not found in pipeline '{}'", entity_id, binding.pipeline),
        }
    }
}

#[async_trait]
impl ConfigStore for MemoryStore {
    async fn list_stages(&self, pipeline: &PipelineType) -> Result<Vec<StageDefinition>> {
        self.check_config_reachable()?;
        Ok(self.stages(pipeline))
    }

    async fn create_stage(
        &self,
        pipeline: &PipelineType,
        stage: &NewStage,
    ) -> Result<StageDefinition> {
        self.check_config_reachable()?;
        let mut state = self.lock();
        if state.find_key(pipeline, &stage.key).is_some() {
            bail!("UNIQUE constraint failed: stages.pipeline, stages.key ({})", stage.key);
        }
        Ok(state.push_stage(pipeline, stage))
    }

    async fn update_stage(&self, id: StageId, patch: &StagePatch) -> Result<StageDefinition> {
        self.check_config_reachable()?;
        let mut state = self.lock();
        let Some(stage) = state.stages.iter_mut().find(|s| s.id == id) else {
            bail!("stage {} not found", id);
        };
        if let Some(name) = &patch.display_name {
            stage.display_name = name.trim().to_string();
        }
        if let Some(color) = &patch.color {
            stage.color = color.clone();
        }
        Ok(stage.clone())
    }

    async fn delete_stage(&self, id: StageId) -> Result<()> {
        self.check_config_reachable()?;
        let mut state = self.lock();
        let Some(pos) = state.stages.iter().position(|s| s.id == id) else {
            bail!("stage {} not found", id);
        };
        let removed = state.stages.remove(pos);
        for stage in state
            .stages
            .iter_mut()
            .filter(|s| s.pipeline == removed.pipeline && s.order_index > removed.order_index)
        {
            stage.order_index -= 1;
        }
        Ok(())
    }

    async fn reorder_stages(&self, pipeline: &PipelineType, order: &[StageId]) -> Result<()> {
        self.check_config_reachable()?;
        self.reorder_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.lock();
        for id in order {
            if !state
                .stages
                .iter()
                .any(|s| s.id == *id && &s.pipeline == pipeline)
            {
                bail!("stage {} does not belong to pipeline '{}'", id, pipeline);
            }
        }
        for (index, id) in order.iter().enumerate() {
            if let Some(stage) = state.stages.iter_mut().find(|s| s.id == *id) {
                stage.order_index = index as u32;
            }
        }
        Ok(())
    }
}
