//! One engine per pipeline type, built from a binding and two stores.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use stageboard_common::{
    Bucket, ConfigStore, Entity, EntityFilter, EntityStore, PipelineBinding, PipelineType,
    StageDefinition,
};
use tokio::sync::broadcast;

use super::board::BoardAdapter;
use super::classifier::total_across_buckets;
use super::editor::StageConfigEditor;
use super::events::BoardEvent;
use super::presets::StageSeed;
use super::registry::{RegistryHandle, StageRegistry};
use super::state::PipelineState;
use super::transition::{DEFAULT_PERSIST_TIMEOUT, TransitionController};
use crate::errors::{EngineError, EngineResult};

const EVENT_CHANNEL_CAPACITY: usize = 256;

pub struct EngineBuilder {
    binding: PipelineBinding,
    entity_store: Option<Arc<dyn EntityStore>>,
    config_store: Option<Arc<dyn ConfigStore>>,
    persist_timeout: Duration,
    events: Option<broadcast::Sender<BoardEvent>>,
}

impl EngineBuilder {
    pub fn new(binding: PipelineBinding) -> Self {
        Self {
            binding,
            entity_store: None,
            config_store: None,
            persist_timeout: DEFAULT_PERSIST_TIMEOUT,
            events: None,
        }
    }

    /// Use one backend for both entities and stage definitions.
    pub fn stores<S>(mut self, store: Arc<S>) -> Self
    where
        S: EntityStore + ConfigStore + 'static,
    {
        self.entity_store = Some(store.clone() as Arc<dyn EntityStore>);
        self.config_store = Some(store as Arc<dyn ConfigStore>);
        self
    }

    pub fn entity_store(mut self, store: Arc<dyn EntityStore>) -> Self {
        self.entity_store = Some(store);
        self
    }

    pub fn config_store(mut self, store: Arc<dyn ConfigStore>) -> Self {
        self.config_store = Some(store);
        self
    }

    pub fn persist_timeout(mut self, timeout: Duration) -> Self {
        self.persist_timeout = timeout;
        self
    }

    /// Publish into a shared channel instead of a private one.
    pub fn events(mut self, sender: broadcast::Sender<BoardEvent>) -> Self {
        self.events = Some(sender);
        self
    }

    pub fn build(self) -> Result<PipelineEngine> {
        let pipeline = self.binding.pipeline.clone();
        let entity_store = self
            .entity_store
            .with_context(|| format!("No entity store configured for pipeline '{}'", pipeline))?;
        let config_store = self
            .config_store
            .with_context(|| format!("No config store configured for pipeline '{}'", pipeline))?;
        let events = self
            .events
            .unwrap_or_else(|| broadcast::channel(EVENT_CHANNEL_CAPACITY).0);

        let registry = RegistryHandle::new(pipeline, config_store);
        let state = Arc::new(PipelineState::new(self.binding, registry, events));
        let controller =
            TransitionController::new(state.clone(), entity_store.clone(), self.persist_timeout);
        Ok(PipelineEngine {
            state,
            controller,
            entity_store,
        })
    }
}

/// What a refresh found.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RefreshReport {
    pub stages: usize,
    pub entities: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub banner: Option<String>,
}

#[derive(Clone)]
pub struct PipelineEngine {
    state: Arc<PipelineState>,
    controller: TransitionController,
    entity_store: Arc<dyn EntityStore>,
}

impl PipelineEngine {
    pub fn binding(&self) -> &PipelineBinding {
        self.state.binding()
    }

    pub fn pipeline(&self) -> &PipelineType {
        &self.state.binding().pipeline
    }

    /// Reload stage definitions and entities from the stores.
    ///
    /// An unreachable config store is not fatal: the registry is treated as
    /// empty and a banner explains why. Entity store failures are returned.
    pub async fn refresh(&self) -> EngineResult<RefreshReport> {
        let stages = match self.state.registry().load().await {
            Ok(stages) => {
                self.state.set_banner(None);
                stages.len()
            }
            Err(e @ EngineError::ConfigLoad { .. }) => {
                tracing::warn!(pipeline = %self.pipeline(), error = %e, "stage registry unavailable; showing no stages");
                self.state.registry().reset();
                let message = format!("Stages could not be loaded: {}", e);
                self.state.set_banner(Some(message.clone()));
                self.state.publish(BoardEvent::ConfigLoadFailed {
                    pipeline: self.pipeline().clone(),
                    message,
                });
                0
            }
            Err(e) => return Err(e),
        };

        let loaded = self
            .entity_store
            .list_entities(self.binding(), &EntityFilter::default())
            .await
            .map_err(EngineError::Store)?;
        let entities = self.controller.install_entities(loaded);
        self.state.recompute();

        tracing::info!(pipeline = %self.pipeline(), stages, entities, "pipeline refreshed");
        Ok(RefreshReport {
            stages,
            entities,
            banner: self.state.banner(),
        })
    }

    /// Create `seeds` when the pipeline has no stages yet. Returns how many
    /// were created.
    pub async fn ensure_stages(&self, seeds: &[StageSeed]) -> EngineResult<usize> {
        if !self.state.registry().snapshot().is_empty() {
            return Ok(0);
        }
        let mut created = 0;
        for seed in seeds {
            self.state
                .registry()
                .create(&seed.display_name, seed.color.as_deref())
                .await?;
            created += 1;
        }
        if created > 0 {
            self.state.publish(BoardEvent::RegistryChanged {
                pipeline: self.pipeline().clone(),
                stages: self.stages(),
            });
            self.state.recompute();
        }
        Ok(created)
    }

    pub fn buckets(&self) -> Vec<Bucket> {
        self.state.buckets()
    }

    pub fn total_value(&self) -> f64 {
        total_across_buckets(&self.state.buckets())
    }

    pub async fn move_entity(&self, entity_id: &str, target_stage_key: &str) -> EngineResult<()> {
        self.controller.move_entity(entity_id, target_stage_key).await
    }

    pub fn controller(&self) -> &TransitionController {
        &self.controller
    }

    pub fn board(&self) -> BoardAdapter {
        BoardAdapter::new(self.state.clone(), self.controller.clone())
    }

    pub fn editor(&self) -> StageConfigEditor {
        StageConfigEditor::new(self.state.clone())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BoardEvent> {
        self.state.subscribe()
    }

    pub fn entities(&self) -> Vec<Entity> {
        self.state.entities()
    }

    pub fn registry(&self) -> StageRegistry {
        self.state.registry().snapshot()
    }

    pub fn stages(&self) -> Vec<StageDefinition> {
        self.registry().stages().to_vec()
    }

    pub fn banner(&self) -> Option<String> {
        self.state.banner()
    }
}

/// Every configured pipeline, sharing one event channel.
pub struct PipelineHub {
    engines: BTreeMap<PipelineType, PipelineEngine>,
    events: broadcast::Sender<BoardEvent>,
}

impl Default for PipelineHub {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineHub {
    pub fn new() -> Self {
        Self {
            engines: BTreeMap::new(),
            events: broadcast::channel(EVENT_CHANNEL_CAPACITY).0,
        }
    }

    /// Build one engine per binding over a single backend.
    pub fn with_store<S>(
        bindings: impl IntoIterator<Item = PipelineBinding>,
        store: Arc<S>,
        persist_timeout: Duration,
    ) -> Result<Self>
    where
        S: EntityStore + ConfigStore + 'static,
    {
        let mut hub = Self::new();
        for binding in bindings {
            let engine = hub
                .builder(binding)
                .stores(store.clone())
                .persist_timeout(persist_timeout)
                .build()?;
            hub.insert(engine);
        }
        Ok(hub)
    }

    /// A builder already wired to the hub's event channel.
    pub fn builder(&self, binding: PipelineBinding) -> EngineBuilder {
        EngineBuilder::new(binding).events(self.events.clone())
    }

    pub fn insert(&mut self, engine: PipelineEngine) -> Option<PipelineEngine> {
        self.engines.insert(engine.pipeline().clone(), engine)
    }

    pub fn get(&self, pipeline: &str) -> EngineResult<&PipelineEngine> {
        self.engines
            .iter()
            .find(|(name, _)| name.as_str() == pipeline)
            .map(|(_, engine)| engine)
            .ok_or_else(|| EngineError::UnknownPipeline {
                name: pipeline.to_string(),
            })
    }

    pub fn engines(&self) -> impl Iterator<Item = &PipelineEngine> {
        self.engines.values()
    }

    pub fn bindings(&self) -> Vec<PipelineBinding> {
        self.engines.values().map(|e| e.binding().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.engines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }

    /// Refresh every pipeline concurrently. One failing pipeline does not
    /// stop the others.
    pub async fn refresh_all(&self) -> Vec<(PipelineType, EngineResult<RefreshReport>)> {
        let refreshes = self.engines.iter().map(|(name, engine)| async move {
            (name.clone(), engine.refresh().await)
        });
        futures::future::join_all(refreshes).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BoardEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::presets::PRESETS;
    use crate::store::{BoardDb, DbHandle, MemoryStore};
    use serde_json::json;

    fn sales_binding() -> PipelineBinding {
        PipelineBinding::new("sales".parse().unwrap(), "sales_stage").with_value_field("amount")
    }

    #[test]
    fn build_without_stores_fails() {
        let err = EngineBuilder::new(sales_binding()).build().err().unwrap();
        assert!(err.to_string().contains("sales"));
    }

    #[tokio::test]
    async fn refresh_loads_stages_and_entities() {
        let store = Arc::new(MemoryStore::new());
        let sales: PipelineType = "sales".parse().unwrap();
        store.seed_stage(&sales, "new", "New", "blue");
        store.insert_entity(&sales, Entity::new("e1").with_field("sales_stage", "new").with_field("amount", 10));
        let engine = EngineBuilder::new(sales_binding()).stores(store).build().unwrap();

        let report = engine.refresh().await.unwrap();
        assert_eq!(report.stages, 1);
        assert_eq!(report.entities, 1);
        assert!(report.banner.is_none());
        assert_eq!(engine.total_value(), 10.0);
    }

    #[tokio::test]
    async fn unreachable_config_store_becomes_banner() {
        let store = Arc::new(MemoryStore::new());
        let sales: PipelineType = "sales".parse().unwrap();
        store.seed_stage(&sales, "new", "New", "blue");
        store.insert_entity(&sales, Entity::new("e1").with_field("sales_stage", "new"));
        let engine = EngineBuilder::new(sales_binding()).stores(store.clone()).build().unwrap();
        engine.refresh().await.unwrap();
        let mut events = engine.subscribe();

        store.set_config_unreachable(true);
        let report = engine.refresh().await.unwrap();

        assert_eq!(report.stages, 0);
        assert!(report.banner.as_deref().unwrap().contains("could not be loaded"));
        assert!(engine.registry().is_empty());
        assert_eq!(engine.buckets().len(), 1);
        assert_eq!(engine.buckets()[0].count, 1);
        assert!(matches!(events.recv().await.unwrap(), BoardEvent::ConfigLoadFailed { .. }));

        store.set_config_unreachable(false);
        assert!(engine.refresh().await.unwrap().banner.is_none());
    }

    #[tokio::test]
    async fn ensure_stages_only_seeds_empty_pipelines() {
        let store = Arc::new(MemoryStore::new());
        let engine = EngineBuilder::new(sales_binding()).stores(store).build().unwrap();
        engine.refresh().await.unwrap();
        let seeds = vec![StageSeed::new("New", "blue"), StageSeed::new("Won", "green")];

        assert_eq!(engine.ensure_stages(&seeds).await.unwrap(), 2);
        assert_eq!(engine.ensure_stages(&seeds).await.unwrap(), 0);
        let keys: Vec<String> = engine.stages().into_iter().map(|s| s.key).collect();
        assert_eq!(keys, vec!["new", "won"]);
    }

    #[tokio::test]
    async fn hub_routes_by_pipeline_and_shares_events() {
        let store = Arc::new(MemoryStore::new());
        let bindings = PRESETS.iter().filter_map(|p| p.binding());
        let hub = PipelineHub::with_store(bindings, store, DEFAULT_PERSIST_TIMEOUT).unwrap();
        let mut events = hub.subscribe();

        assert_eq!(hub.len(), 6);
        assert!(hub.get("support").is_ok());
        assert!(matches!(
            hub.get("payroll").err().unwrap(),
            EngineError::UnknownPipeline { .. }
        ));

        let results = hub.refresh_all().await;
        assert!(results.iter().all(|(_, r)| r.is_ok()));
        let event = events.recv().await.unwrap();
        assert!(matches!(event, BoardEvent::Recomputed { .. }));
    }

    #[tokio::test]
    async fn pipelines_sharing_a_store_stay_independent() {
        let store = Arc::new(DbHandle::new(BoardDb::new_in_memory().unwrap()));
        let support = PipelineBinding::new("support".parse().unwrap(), "support_stage");
        let mut hub = PipelineHub::new();
        for binding in [sales_binding(), support] {
            let engine = hub.builder(binding).stores(store.clone()).build().unwrap();
            hub.insert(engine);
        }
        hub.refresh_all().await;

        let sales = hub.get("sales").unwrap();
        sales.editor().add_stage("New", None).await.unwrap();
        assert_eq!(sales.stages().len(), 1);
        assert!(hub.get("support").unwrap().stages().is_empty());

        store
            .lock_sync()
            .unwrap()
            .upsert_entity(
                sales.pipeline(),
                &Entity::new("e1").with_field("sales_stage", "new").with_field("amount", json!(42)),
            )
            .unwrap();
        sales.refresh().await.unwrap();
        assert_eq!(sales.total_value(), 42.0);
        assert!(hub.get("support").unwrap().entities().is_empty());
    }
}
