//! Transition controller: one entity's move from one stage to another.
//!
//! Each move walks `Idle -> Optimistic -> Idle` on success or
//! `Idle -> Optimistic -> Reverting -> Idle` on failure. The optimistic
//! rewrite is visible to the classifier immediately; the store call is the
//! only suspension point.
//!
//! Overlapping moves of one entity may settle in any order. The entity shows
//! the newest unsettled target, falling back to the last value the store
//! confirmed, so the final state always matches the store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use stageboard_common::{Entity, EntityStore};

use super::events::BoardEvent;
use super::state::PipelineState;
use crate::errors::{EngineError, EngineResult};

/// Default bound on a single persistence round trip.
pub const DEFAULT_PERSIST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionPhase {
    Idle,
    Optimistic,
    Reverting,
}

/// A move of one entity that has not settled yet.
#[derive(Debug, Clone)]
struct PendingMove {
    generation: u64,
    target: String,
}

/// Unsettled moves of one entity.
///
/// The entity shows the target of the newest pending move, or `base` once
/// nothing is pending. `base` only changes when the store confirms a write,
/// so however the moves settle the entity ends on what the store holds.
#[derive(Debug, Clone)]
struct Overlay {
    /// Stage field value the store holds, `None` when it is absent.
    base: Option<Value>,
    /// Oldest first.
    pending: Vec<PendingMove>,
    phase: TransitionPhase,
}

impl Overlay {
    fn shown(&self) -> Option<Value> {
        match self.pending.last() {
            Some(newest) => Some(Value::String(newest.target.clone())),
            None => self.base.clone(),
        }
    }
}

#[derive(Clone)]
pub struct TransitionController {
    state: Arc<PipelineState>,
    store: Arc<dyn EntityStore>,
    overlays: Arc<Mutex<HashMap<String, Overlay>>>,
    next_generation: Arc<AtomicU64>,
    persist_timeout: Duration,
}

impl TransitionController {
    pub fn new(
        state: Arc<PipelineState>,
        store: Arc<dyn EntityStore>,
        persist_timeout: Duration,
    ) -> Self {
        Self {
            state,
            store,
            overlays: Arc::new(Mutex::new(HashMap::new())),
            next_generation: Arc::new(AtomicU64::new(1)),
            persist_timeout,
        }
    }

    fn lock_overlays(&self) -> MutexGuard<'_, HashMap<String, Overlay>> {
        self.overlays.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn persist_timeout(&self) -> Duration {
        self.persist_timeout
    }

    pub fn phase(&self, entity_id: &str) -> TransitionPhase {
        self.lock_overlays()
            .get(entity_id)
            .map(|o| o.phase)
            .unwrap_or(TransitionPhase::Idle)
    }

    /// Number of entities with a move in flight.
    pub fn in_flight(&self) -> usize {
        self.lock_overlays().len()
    }

    /// Move one entity to `target_stage_key`.
    ///
    /// Refused with `UnknownStage` or `EntityNotFound` before any mutation.
    /// Otherwise exactly one optimistic write, one store call and one
    /// reconciliation happen; a failed or timed-out store call restores the
    /// previous stage value and returns `TransitionFailed`.
    pub async fn move_entity(&self, entity_id: &str, target_stage_key: &str) -> EngineResult<()> {
        let binding = self.state.binding().clone();
        if !self.state.registry().contains_key(target_stage_key) {
            return Err(EngineError::UnknownStage {
                key: target_stage_key.to_string(),
            });
        }

        let (generation, previous) = {
            let mut overlays = self.lock_overlays();
            let mut entities = self.state.lock_entities();
            let entity = entities
                .iter_mut()
                .find(|e| e.id == entity_id)
                .ok_or_else(|| EngineError::EntityNotFound {
                    id: entity_id.to_string(),
                })?;
            let previous = entity.field(&binding.stage_field).cloned();
            entity.set_stage_key(&binding.stage_field, target_stage_key);

            let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
            let overlay = overlays
                .entry(entity_id.to_string())
                .or_insert_with(|| Overlay {
                    base: previous.clone(),
                    pending: Vec::new(),
                    phase: TransitionPhase::Optimistic,
                });
            if let Some(older) = overlay.pending.last() {
                tracing::debug!(
                    entity_id,
                    superseded = older.generation,
                    generation,
                    "newer move supersedes in-flight transition"
                );
            }
            overlay.pending.push(PendingMove {
                generation,
                target: target_stage_key.to_string(),
            });
            overlay.phase = TransitionPhase::Optimistic;
            (generation, previous)
        };

        self.state.publish(BoardEvent::TransitionStarted {
            pipeline: binding.pipeline.clone(),
            entity_id: entity_id.to_string(),
            from: previous.as_ref().and_then(Value::as_str).map(str::to_string),
            to: target_stage_key.to_string(),
        });
        self.state.recompute();

        let persisted = tokio::time::timeout(
            self.persist_timeout,
            self.store
                .update_entity_stage(&binding, entity_id, target_stage_key),
        )
        .await;
        let failure = match persisted {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(format!("{:#}", e)),
            Err(_) => Some(format!(
                "no response within {} ms",
                self.persist_timeout.as_millis()
            )),
        };

        let (shown, changed) =
            self.settle(entity_id, generation, target_stage_key, failure.is_none());
        if changed {
            self.state.recompute();
        }

        match failure {
            None => {
                tracing::info!(
                    pipeline = %binding.pipeline,
                    entity_id,
                    stage = target_stage_key,
                    "transition confirmed"
                );
                self.state.publish(BoardEvent::TransitionConfirmed {
                    pipeline: binding.pipeline.clone(),
                    entity_id: entity_id.to_string(),
                    stage_key: target_stage_key.to_string(),
                });
                Ok(())
            }
            Some(reason) => {
                tracing::warn!(
                    pipeline = %binding.pipeline,
                    entity_id,
                    stage = target_stage_key,
                    reverted = changed,
                    error = %reason,
                    "transition failed"
                );
                self.state.publish(BoardEvent::TransitionFailed {
                    pipeline: binding.pipeline.clone(),
                    entity_id: entity_id.to_string(),
                    attempted: target_stage_key.to_string(),
                    restored: shown,
                    message: reason.clone(),
                });
                Err(EngineError::TransitionFailed {
                    entity_id: entity_id.to_string(),
                    target: target_stage_key.to_string(),
                    reason,
                })
            }
        }
    }

    /// Retire one move and put the entity on the value its overlay now
    /// shows. Returns that value and whether the entity changed.
    fn settle(
        &self,
        entity_id: &str,
        generation: u64,
        target: &str,
        persisted: bool,
    ) -> (Option<Value>, bool) {
        let stage_field = &self.state.binding().stage_field;
        let mut overlays = self.lock_overlays();
        let Some(overlay) = overlays.get_mut(entity_id) else {
            let current = self
                .state
                .entity(entity_id)
                .and_then(|e| e.field(stage_field).cloned());
            return (current, false);
        };

        overlay.pending.retain(|m| m.generation != generation);
        if persisted {
            overlay.base = Some(Value::String(target.to_string()));
        }
        let shown = overlay.shown();

        let changed = {
            let mut entities = self.state.lock_entities();
            match entities.iter_mut().find(|e| e.id == entity_id) {
                Some(entity) if entity.field(stage_field) != shown.as_ref() => {
                    entity.restore_field(stage_field, shown.clone());
                    true
                }
                _ => false,
            }
        };

        if overlay.pending.is_empty() {
            overlays.remove(entity_id);
        } else if !persisted && changed {
            // Rolled back onto an older move that is still in flight.
            overlay.phase = TransitionPhase::Reverting;
        }
        (shown, changed)
    }

    /// Install a freshly loaded collection, keeping in-flight moves visible.
    pub fn install_entities(&self, mut loaded: Vec<Entity>) -> usize {
        let stage_field = &self.state.binding().stage_field;
        let overlays = self.lock_overlays();
        for entity in loaded.iter_mut() {
            if let Some(overlay) = overlays.get(&entity.id) {
                entity.restore_field(stage_field, overlay.shown());
            }
        }
        let count = loaded.len();
        *self.state.lock_entities() = loaded;
        count
    }
}
