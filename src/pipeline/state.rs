use std::sync::{Mutex, MutexGuard, PoisonError};

use stageboard_common::{Bucket, Entity, PipelineBinding};
use tokio::sync::broadcast;

use super::classifier::{Classifier, total_across_buckets};
use super::events::BoardEvent;
use super::registry::RegistryHandle;

/// Live state of one pipeline shared by the controller, board and editor.
///
/// Locks are only taken for synchronous sections; nothing here is held
/// across an `.await`.
pub struct PipelineState {
    binding: PipelineBinding,
    registry: RegistryHandle,
    classifier: Classifier,
    entities: Mutex<Vec<Entity>>,
    banner: Mutex<Option<String>>,
    events: broadcast::Sender<BoardEvent>,
}

impl PipelineState {
    pub fn new(
        binding: PipelineBinding,
        registry: RegistryHandle,
        events: broadcast::Sender<BoardEvent>,
    ) -> Self {
        Self {
            classifier: Classifier::new(&binding),
            binding,
            registry,
            entities: Mutex::new(Vec::new()),
            banner: Mutex::new(None),
            events,
        }
    }

    pub fn binding(&self) -> &PipelineBinding {
        &self.binding
    }

    pub fn registry(&self) -> &RegistryHandle {
        &self.registry
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    pub(crate) fn lock_entities(&self) -> MutexGuard<'_, Vec<Entity>> {
        self.entities.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn entities(&self) -> Vec<Entity> {
        self.lock_entities().clone()
    }

    pub fn entity(&self, id: &str) -> Option<Entity> {
        self.lock_entities().iter().find(|e| e.id == id).cloned()
    }

    pub fn banner(&self) -> Option<String> {
        self.banner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_banner(&self, banner: Option<String>) {
        *self.banner.lock().unwrap_or_else(PoisonError::into_inner) = banner;
    }

    /// Classify the current collection under the current registry.
    pub fn buckets(&self) -> Vec<Bucket> {
        let registry = self.registry.snapshot();
        let entities = self.lock_entities();
        self.classifier.classify(&entities, &registry)
    }

    /// Reclassify and push the result to every subscriber.
    pub fn recompute(&self) -> Vec<Bucket> {
        let buckets = self.buckets();
        let total_value = total_across_buckets(&buckets);
        tracing::debug!(
            pipeline = %self.binding.pipeline,
            buckets = buckets.len(),
            total_value,
            "recomputed buckets"
        );
        self.publish(BoardEvent::Recomputed {
            pipeline: self.binding.pipeline.clone(),
            buckets: buckets.clone(),
            total_value,
        });
        buckets
    }

    /// Send an event; having no subscribers is not an error.
    pub fn publish(&self, event: BoardEvent) {
        let _ = self.events.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BoardEvent> {
        self.events.subscribe()
    }
}
