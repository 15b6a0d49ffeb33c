//! Entity classifier: partitions a loaded collection into per-stage buckets.
//!
//! Classification is a pure function of its inputs. It never fails: entities
//! with a missing or unknown stage land in the first bucket, and malformed
//! values aggregate as zero.

use stageboard_common::{Bucket, Entity, PipelineBinding, coerce_number};

use super::registry::StageRegistry;

/// Key of the single bucket emitted when a pipeline has no stages configured.
/// It never names a real stage and is never a drop target.
pub const UNASSIGNED_STAGE_KEY: &str = "__unassigned";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classifier {
    stage_field: String,
    value_field: Option<String>,
}

impl Classifier {
    pub fn new(binding: &PipelineBinding) -> Self {
        Self {
            stage_field: binding.stage_field.clone(),
            value_field: binding.value_field.clone(),
        }
    }

    pub fn stage_field(&self) -> &str {
        &self.stage_field
    }

    /// Numeric contribution of one entity. Zero when no value field is bound.
    pub fn value_of(&self, entity: &Entity) -> f64 {
        match &self.value_field {
            Some(field) => coerce_number(entity.field(field)),
            None => 0.0,
        }
    }

    /// True when the entity's recorded stage is not a key of `registry`.
    pub fn is_orphan(&self, entity: &Entity, registry: &StageRegistry) -> bool {
        entity
            .stage_key(&self.stage_field)
            .is_none_or(|key| !registry.contains_key(key))
    }

    /// One bucket per stage in registry order; input order is kept inside
    /// every bucket.
    pub fn classify(&self, entities: &[Entity], registry: &StageRegistry) -> Vec<Bucket> {
        if registry.is_empty() {
            let mut bucket = Bucket::empty(UNASSIGNED_STAGE_KEY);
            for entity in entities {
                self.push(&mut bucket, entity);
            }
            return vec![bucket];
        }

        let mut buckets: Vec<Bucket> = registry
            .stages()
            .iter()
            .map(|stage| Bucket::empty(stage.key.clone()))
            .collect();
        for entity in entities {
            let index = entity
                .stage_key(&self.stage_field)
                .and_then(|key| buckets.iter().position(|b| b.stage_key == key))
                .unwrap_or(0);
            self.push(&mut buckets[index], entity);
        }
        buckets
    }

    /// Sum of the value field straight over the entities, bypassing buckets.
    pub fn direct_total(&self, entities: &[Entity]) -> f64 {
        entities.iter().map(|e| self.value_of(e)).sum()
    }

    fn push(&self, bucket: &mut Bucket, entity: &Entity) {
        bucket.aggregate_value += self.value_of(entity);
        bucket.count += 1;
        bucket.entities.push(entity.clone());
    }
}

pub fn total_across_buckets(buckets: &[Bucket]) -> f64 {
    buckets.iter().map(|b| b.aggregate_value).sum()
}
