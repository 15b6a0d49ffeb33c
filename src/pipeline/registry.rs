//! Stage registry: the ordered, user-editable stage definitions of one pipeline.
//!
//! [`StageRegistry`] is plain data plus validation. [`RegistryHandle`] shares a
//! live registry between the engine's components and routes every mutation
//! through the [`ConfigStore`] collaborator before applying it locally.
//! Mutations of one pipeline run one at a time, so a plan made against the
//! local registry is still valid when its store call returns.

use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use stageboard_common::{
    ConfigStore, NewStage, PipelineType, StageDefinition, StageId, StagePatch,
};
use tokio::sync::Mutex;

use crate::errors::{EngineError, EngineResult};

/// Color token given to stages created without one.
pub const DEFAULT_STAGE_COLOR: &str = "gray";

/// Derive a stage key from a display name: lowercase, whitespace runs become `_`.
pub fn normalize_key(display_name: &str) -> String {
    display_name
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join("_")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRegistry {
    pipeline: PipelineType,
    stages: Vec<StageDefinition>,
}

impl StageRegistry {
    pub fn empty(pipeline: PipelineType) -> Self {
        Self {
            pipeline,
            stages: Vec::new(),
        }
    }

    /// Build from store rows, ordering by `order_index` and closing any gaps.
    pub fn from_definitions(pipeline: PipelineType, mut stages: Vec<StageDefinition>) -> Self {
        stages.sort_by_key(|s| s.order_index);
        let mut registry = Self { pipeline, stages };
        if !registry.is_dense() {
            tracing::warn!(
                pipeline = %registry.pipeline,
                "stage order_index values were not dense; re-densifying"
            );
            registry.densify();
        }
        registry
    }

    pub fn pipeline(&self) -> &PipelineType {
        &self.pipeline
    }

    pub fn stages(&self) -> &[StageDefinition] {
        &self.stages
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn keys(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.key.as_str()).collect()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.stages.iter().any(|s| s.key == key)
    }

    pub fn get(&self, id: StageId) -> Option<&StageDefinition> {
        self.stages.iter().find(|s| s.id == id)
    }

    pub fn get_by_key(&self, key: &str) -> Option<&StageDefinition> {
        self.stages.iter().find(|s| s.key == key)
    }

    /// The bucket that receives orphan entities.
    pub fn fallback(&self) -> Option<&StageDefinition> {
        self.stages.first()
    }

    /// `order_index` is exactly `0..len` in array order.
    pub fn is_dense(&self) -> bool {
        self.stages
            .iter()
            .enumerate()
            .all(|(i, s)| s.order_index as usize == i)
    }

    fn densify(&mut self) {
        for (i, stage) in self.stages.iter_mut().enumerate() {
            stage.order_index = i as u32;
        }
    }

    /// Validate a new stage and decide its key and position.
    pub fn plan_create(&self, display_name: &str, color: Option<&str>) -> EngineResult<NewStage> {
        let display_name = display_name.trim();
        let key = normalize_key(display_name);
        if key.is_empty() {
            return Err(EngineError::EmptyDisplayName);
        }
        if self.contains_key(&key) {
            return Err(EngineError::DuplicateKey { key });
        }
        let color = color
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .unwrap_or(DEFAULT_STAGE_COLOR);
        Ok(NewStage {
            key,
            display_name: display_name.to_string(),
            color: color.to_string(),
            order_index: self.stages.len() as u32,
        })
    }

    /// Append a persisted definition at the end of the order.
    pub fn insert(&mut self, mut stage: StageDefinition) -> StageDefinition {
        stage.order_index = self.stages.len() as u32;
        self.stages.push(stage.clone());
        stage
    }

    pub fn check_update(&self, id: StageId, patch: &StagePatch) -> EngineResult<()> {
        if self.get(id).is_none() {
            return Err(EngineError::StageNotFound { id });
        }
        if patch
            .display_name
            .as_deref()
            .is_some_and(|name| name.trim().is_empty())
        {
            return Err(EngineError::EmptyDisplayName);
        }
        Ok(())
    }

    /// Apply a rename/recolor; key and position are left alone.
    pub fn apply_update(&mut self, id: StageId, patch: &StagePatch) -> EngineResult<StageDefinition> {
        let stage = self
            .stages
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or(EngineError::StageNotFound { id })?;
        if let Some(name) = &patch.display_name {
            stage.display_name = name.trim().to_string();
        }
        if let Some(color) = &patch.color {
            stage.color = color.clone();
        }
        Ok(stage.clone())
    }

    /// Remove a definition and close the gap in `order_index`.
    pub fn remove(&mut self, id: StageId) -> EngineResult<StageDefinition> {
        let pos = self
            .stages
            .iter()
            .position(|s| s.id == id)
            .ok_or(EngineError::StageNotFound { id })?;
        let removed = self.stages.remove(pos);
        self.densify();
        Ok(removed)
    }

    /// Translate a full key order into stage ids. Partial orders are rejected.
    pub fn plan_reorder(&self, keys: &[String]) -> EngineResult<Vec<StageId>> {
        if keys.len() != self.stages.len() {
            return Err(EngineError::InvalidOrder {
                message: format!(
                    "expected {} keys, got {}",
                    self.stages.len(),
                    keys.len()
                ),
            });
        }
        let mut seen = HashSet::new();
        let mut ids = Vec::with_capacity(keys.len());
        for key in keys {
            if !seen.insert(key.as_str()) {
                return Err(EngineError::InvalidOrder {
                    message: format!("key '{}' appears more than once", key),
                });
            }
            let stage = self.get_by_key(key).ok_or_else(|| EngineError::InvalidOrder {
                message: format!("key '{}' is not in the registry", key),
            })?;
            ids.push(stage.id);
        }
        Ok(ids)
    }

    pub fn is_current_order(&self, keys: &[String]) -> bool {
        keys.len() == self.stages.len() && self.stages.iter().zip(keys).all(|(s, k)| &s.key == k)
    }

    /// Rearrange to the given id order. Ids must come from [`Self::plan_reorder`].
    pub fn apply_reorder(&mut self, ids: &[StageId]) {
        let mut reordered = Vec::with_capacity(self.stages.len());
        for id in ids {
            if let Some(pos) = self.stages.iter().position(|s| s.id == *id) {
                reordered.push(self.stages.remove(pos));
            }
        }
        // Anything not named keeps its relative order at the end.
        reordered.append(&mut self.stages);
        self.stages = reordered;
        self.densify();
    }
}

/// Shared, store-backed access to one pipeline's live registry.
#[derive(Clone)]
pub struct RegistryHandle {
    pipeline: PipelineType,
    inner: Arc<RwLock<StageRegistry>>,
    /// Held from plan to apply by every store-backed mutation.
    edit: Arc<Mutex<()>>,
    store: Arc<dyn ConfigStore>,
}

impl RegistryHandle {
    pub fn new(pipeline: PipelineType, store: Arc<dyn ConfigStore>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(StageRegistry::empty(pipeline.clone()))),
            edit: Arc::new(Mutex::new(())),
            pipeline,
            store,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, StageRegistry> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, StageRegistry> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn pipeline(&self) -> &PipelineType {
        &self.pipeline
    }

    pub fn snapshot(&self) -> StageRegistry {
        self.read().clone()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.read().contains_key(key)
    }

    /// Replace the live registry with the store's current definitions.
    ///
    /// An empty list is a valid answer ("nothing configured yet"); only an
    /// unreachable store is an error.
    pub async fn load(&self) -> EngineResult<Vec<StageDefinition>> {
        let _edit = self.edit.lock().await;
        let stages = self
            .store
            .list_stages(&self.pipeline)
            .await
            .map_err(|source| EngineError::ConfigLoad {
                pipeline: self.pipeline.clone(),
                source,
            })?;
        let registry = StageRegistry::from_definitions(self.pipeline.clone(), stages);
        let loaded = registry.stages().to_vec();
        *self.write() = registry;
        tracing::debug!(pipeline = %self.pipeline, stages = loaded.len(), "registry loaded");
        Ok(loaded)
    }

    /// Forget every definition locally; the store is not touched.
    pub fn reset(&self) {
        *self.write() = StageRegistry::empty(self.pipeline.clone());
    }

    pub async fn create(
        &self,
        display_name: &str,
        color: Option<&str>,
    ) -> EngineResult<StageDefinition> {
        let _edit = self.edit.lock().await;
        let new_stage = self.read().plan_create(display_name, color)?;
        let created = self
            .store
            .create_stage(&self.pipeline, &new_stage)
            .await
            .map_err(EngineError::Store)?;

        let stage = self.write().insert(created);
        tracing::info!(pipeline = %self.pipeline, key = %stage.key, order_index = stage.order_index, "stage created");
        Ok(stage)
    }

    pub async fn update(&self, id: StageId, patch: &StagePatch) -> EngineResult<StageDefinition> {
        let _edit = self.edit.lock().await;
        self.read().check_update(id, patch)?;
        if patch.is_empty() {
            return self
                .read()
                .get(id)
                .cloned()
                .ok_or(EngineError::StageNotFound { id });
        }
        self.store
            .update_stage(id, patch)
            .await
            .map_err(EngineError::Store)?;
        let stage = self.write().apply_update(id, patch)?;
        tracing::info!(pipeline = %self.pipeline, key = %stage.key, "stage updated");
        Ok(stage)
    }

    /// Delete a definition. Entities still pointing at its key become orphans.
    pub async fn delete(&self, id: StageId) -> EngineResult<StageDefinition> {
        let _edit = self.edit.lock().await;
        if self.read().get(id).is_none() {
            return Err(EngineError::StageNotFound { id });
        }
        self.store
            .delete_stage(id)
            .await
            .map_err(EngineError::Store)?;
        let removed = self.write().remove(id)?;
        tracing::info!(pipeline = %self.pipeline, key = %removed.key, "stage deleted");
        Ok(removed)
    }

    pub async fn reorder(&self, keys: &[String]) -> EngineResult<()> {
        let _edit = self.edit.lock().await;
        let ids = {
            let registry = self.read();
            let ids = registry.plan_reorder(keys)?;
            if registry.is_current_order(keys) {
                return Ok(());
            }
            ids
        };
        self.store
            .reorder_stages(&self.pipeline, &ids)
            .await
            .map_err(EngineError::Store)?;
        self.write().apply_reorder(&ids);
        tracing::info!(pipeline = %self.pipeline, order = ?keys, "stages reordered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{BoardDb, DbHandle, MemoryStore};

    fn pipeline() -> PipelineType {
        "sales".parse().unwrap()
    }

    fn stage(id: StageId, key: &str, order_index: u32) -> StageDefinition {
        StageDefinition {
            id,
            pipeline: pipeline(),
            key: key.to_string(),
            display_name: key.to_uppercase(),
            color: "blue".to_string(),
            order_index,
            created_at: "2024-01-01".to_string(),
        }
    }

    fn abc() -> StageRegistry {
        StageRegistry::from_definitions(
            pipeline(),
            vec![stage(1, "a", 0), stage(2, "b", 1), stage(3, "c", 2)],
        )
    }

    fn order(registry: &StageRegistry) -> Vec<(String, u32)> {
        registry
            .stages()
            .iter()
            .map(|s| (s.key.clone(), s.order_index))
            .collect()
    }

    #[test]
    fn normalize_key_lowercases_and_joins_words() {
        assert_eq!(normalize_key("Closed Won"), "closed_won");
        assert_eq!(normalize_key("  In   Review\t"), "in_review");
        assert_eq!(normalize_key("NEW"), "new");
        assert_eq!(normalize_key("   "), "");
    }

    #[test]
    fn from_definitions_sorts_and_densifies() {
        let registry = StageRegistry::from_definitions(
            pipeline(),
            vec![stage(3, "c", 7), stage(1, "a", 0), stage(2, "b", 4)],
        );
        assert_eq!(
            order(&registry),
            vec![("a".into(), 0), ("b".into(), 1), ("c".into(), 2)]
        );
        assert!(registry.is_dense());
    }

    #[test]
    fn plan_create_appends_with_normalized_key() {
        let registry = abc();
        let planned = registry.plan_create("Closed Won", Some("green")).unwrap();
        assert_eq!(planned.key, "closed_won");
        assert_eq!(planned.display_name, "Closed Won");
        assert_eq!(planned.color, "green");
        assert_eq!(planned.order_index, 3);
    }

    #[test]
    fn plan_create_defaults_color() {
        let planned = abc().plan_create("d", None).unwrap();
        assert_eq!(planned.color, DEFAULT_STAGE_COLOR);
    }

    #[test]
    fn plan_create_rejects_collisions_after_normalization() {
        let err = abc().plan_create(" A ", None).unwrap_err();
        assert!(matches!(err, EngineError::DuplicateKey { ref key } if key == "a"));
    }

    #[test]
    fn plan_create_rejects_blank_names() {
        assert!(matches!(
            abc().plan_create("  ", None).unwrap_err(),
            EngineError::EmptyDisplayName
        ));
    }

    #[test]
    fn delete_middle_stage_closes_gap() {
        let mut registry = abc();
        let removed = registry.remove(2).unwrap();
        assert_eq!(removed.key, "b");
        assert_eq!(order(&registry), vec![("a".into(), 0), ("c".into(), 1)]);
    }

    #[test]
    fn remove_unknown_stage_fails() {
        let mut registry = abc();
        assert!(matches!(
            registry.remove(99).unwrap_err(),
            EngineError::StageNotFound { id: 99 }
        ));
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn apply_update_keeps_key_and_position() {
        let mut registry = abc();
        let patch = StagePatch {
            display_name: Some("Bee".into()),
            color: Some("amber".into()),
        };
        let updated = registry.apply_update(2, &patch).unwrap();
        assert_eq!(updated.key, "b");
        assert_eq!(updated.order_index, 1);
        assert_eq!(updated.display_name, "Bee");
        assert_eq!(updated.color, "amber");
    }

    #[test]
    fn check_update_rejects_blank_rename() {
        let patch = StagePatch {
            display_name: Some(" ".into()),
            color: None,
        };
        assert!(matches!(
            abc().check_update(1, &patch).unwrap_err(),
            EngineError::EmptyDisplayName
        ));
    }

    #[test]
    fn reorder_rewrites_every_index() {
        let mut registry = abc();
        let keys: Vec<String> = vec!["c".into(), "a".into(), "b".into()];
        let ids = registry.plan_reorder(&keys).unwrap();
        assert_eq!(ids, vec![3, 1, 2]);
        registry.apply_reorder(&ids);
        assert_eq!(
            order(&registry),
            vec![("c".into(), 0), ("a".into(), 1), ("b".into(), 2)]
        );
    }

    #[test]
    fn reorder_rejects_partial_duplicate_and_unknown_keys() {
        let registry = abc();
        let partial: Vec<String> = vec!["a".into(), "b".into()];
        let duplicate: Vec<String> = vec!["a".into(), "a".into(), "b".into()];
        let unknown: Vec<String> = vec!["a".into(), "b".into(), "z".into()];
        for keys in [partial, duplicate, unknown] {
            assert!(matches!(
                registry.plan_reorder(&keys).unwrap_err(),
                EngineError::InvalidOrder { .. }
            ));
        }
    }

    #[test]
    fn density_holds_across_mixed_operations() {
        let mut registry = StageRegistry::empty(pipeline());
        let mut next_id = 1;
        for name in ["New", "Contacted", "Qualified", "Won", "Lost"] {
            let planned = registry.plan_create(name, None).unwrap();
            registry.insert(stage(next_id, &planned.key, planned.order_index));
            next_id += 1;
            assert!(registry.is_dense());
        }
        registry.remove(3).unwrap();
        assert!(registry.is_dense());
        let keys: Vec<String> = ["lost", "won", "new", "contacted"]
            .iter()
            .map(|k| k.to_string())
            .collect();
        let ids = registry.plan_reorder(&keys).unwrap();
        registry.apply_reorder(&ids);
        assert!(registry.is_dense());
        registry.remove(5).unwrap();
        let planned = registry.plan_create("Nurture", None).unwrap();
        registry.insert(stage(next_id, &planned.key, planned.order_index));
        assert!(registry.is_dense());
        assert_eq!(registry.keys(), vec!["won", "new", "contacted", "nurture"]);
    }

    #[tokio::test]
    async fn handle_create_persists_then_applies() {
        let store = Arc::new(MemoryStore::new());
        let handle = RegistryHandle::new(pipeline(), store.clone());
        handle.load().await.unwrap();

        let created = handle.create("Proposal Sent", Some("teal")).await.unwrap();
        assert_eq!(created.key, "proposal_sent");
        assert_eq!(created.order_index, 0);
        assert!(handle.contains_key("proposal_sent"));
        assert_eq!(store.stages(&pipeline()).len(), 1);
    }

    #[tokio::test]
    async fn handle_duplicate_create_never_reaches_store() {
        let store = Arc::new(MemoryStore::new());
        store.seed_stage(&pipeline(), "new", "New", "blue");
        let handle = RegistryHandle::new(pipeline(), store.clone());
        handle.load().await.unwrap();

        let err = handle.create("new", None).await.unwrap_err();
        assert!(matches!(err, EngineError::DuplicateKey { .. }));
        assert_eq!(store.stages(&pipeline()).len(), 1);
    }

    #[tokio::test]
    async fn handle_load_reports_unreachable_store() {
        let store = Arc::new(MemoryStore::new());
        store.set_config_unreachable(true);
        let handle = RegistryHandle::new(pipeline(), store);
        let err = handle.load().await.unwrap_err();
        assert!(matches!(err, EngineError::ConfigLoad { .. }));
    }

    #[tokio::test]
    async fn handle_load_of_empty_store_is_not_an_error() {
        let handle = RegistryHandle::new(pipeline(), Arc::new(MemoryStore::new()));
        assert!(handle.load().await.unwrap().is_empty());
        assert!(handle.snapshot().is_empty());
    }

    #[tokio::test]
    async fn handle_delete_middle_stage_matches_store() {
        let store = Arc::new(MemoryStore::new());
        store.seed_stage(&pipeline(), "a", "A", "blue");
        let b = store.seed_stage(&pipeline(), "b", "B", "blue");
        store.seed_stage(&pipeline(), "c", "C", "blue");
        let handle = RegistryHandle::new(pipeline(), store.clone());
        handle.load().await.unwrap();

        handle.delete(b.id).await.unwrap();
        assert_eq!(order(&handle.snapshot()), vec![("a".into(), 0), ("c".into(), 1)]);
        let persisted: Vec<(String, u32)> = store
            .stages(&pipeline())
            .into_iter()
            .map(|s| (s.key, s.order_index))
            .collect();
        assert_eq!(persisted, vec![("a".into(), 0), ("c".into(), 1)]);
    }

    #[tokio::test]
    async fn handle_reorder_to_same_order_is_identity() {
        let store = Arc::new(MemoryStore::new());
        store.seed_stage(&pipeline(), "a", "A", "blue");
        store.seed_stage(&pipeline(), "b", "B", "blue");
        let handle = RegistryHandle::new(pipeline(), store.clone());
        handle.load().await.unwrap();

        let before = handle.snapshot();
        let before_json = serde_json::to_string(&before).unwrap();
        handle.reorder(&["a".into(), "b".into()]).await.unwrap();
        let after_json = serde_json::to_string(&handle.snapshot()).unwrap();
        assert_eq!(before_json, after_json);
        assert_eq!(store.reorder_calls(), 0);
    }

    async fn persisted_order(store: &DbHandle) -> Vec<(String, u32)> {
        store
            .list_stages(&pipeline())
            .await
            .unwrap()
            .into_iter()
            .map(|s| (s.key, s.order_index))
            .collect()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_creates_persist_the_local_order() {
        let store = Arc::new(DbHandle::new(BoardDb::new_in_memory().unwrap()));
        let handle = RegistryHandle::new(pipeline(), store.clone());
        handle.load().await.unwrap();

        let (alpha, beta) = tokio::join!(handle.create("Alpha", None), handle.create("Beta", None));
        alpha.unwrap();
        beta.unwrap();

        let local = order(&handle.snapshot());
        assert!(handle.snapshot().is_dense());
        assert_eq!(persisted_order(&store).await, local);
        let indexes: Vec<u32> = local.iter().map(|(_, i)| *i).collect();
        assert_eq!(indexes, vec![0, 1]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_creates_of_one_name_report_duplicate_key() {
        let store = Arc::new(DbHandle::new(BoardDb::new_in_memory().unwrap()));
        let handle = RegistryHandle::new(pipeline(), store.clone());
        handle.load().await.unwrap();

        let (first, second) =
            tokio::join!(handle.create("Alpha", None), handle.create("alpha", None));
        let (created, rejected) = match (first, second) {
            (Ok(stage), Err(err)) | (Err(err), Ok(stage)) => (stage, err),
            other => panic!("Expected one create to win, got {:?}", other),
        };
        assert_eq!(created.key, "alpha");
        assert!(matches!(rejected, EngineError::DuplicateKey { ref key } if key == "alpha"));
        assert_eq!(persisted_order(&store).await, vec![("alpha".into(), 0)]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn create_racing_delete_keeps_store_dense() {
        let store = Arc::new(DbHandle::new(BoardDb::new_in_memory().unwrap()));
        let handle = RegistryHandle::new(pipeline(), store.clone());
        handle.load().await.unwrap();
        let a = handle.create("a", None).await.unwrap();
        handle.create("b", None).await.unwrap();

        let (removed, created) = tokio::join!(handle.delete(a.id), handle.create("c", None));
        removed.unwrap();
        created.unwrap();

        let local = order(&handle.snapshot());
        assert_eq!(local, vec![("b".into(), 0), ("c".into(), 1)]);
        assert_eq!(persisted_order(&store).await, local);
    }

    #[tokio::test]
    async fn handle_update_unknown_stage_fails_before_store() {
        let store = Arc::new(MemoryStore::new());
        let handle = RegistryHandle::new(pipeline(), store);
        handle.load().await.unwrap();
        let patch = StagePatch {
            display_name: Some("x".into()),
            color: None,
        };
        assert!(matches!(
            handle.update(42, &patch).await.unwrap_err(),
            EngineError::StageNotFound { id: 42 }
        ));
    }
}
