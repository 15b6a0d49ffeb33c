use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Store-assigned identifier of a stage definition.
pub type StageId = i64;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid pipeline type '{value}': {reason}")]
pub struct InvalidPipelineType {
    pub value: String,
    pub reason: &'static str,
}

/// Identifier scoping one independent stage registry (e.g. `sales`, `support`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PipelineType(String);

impl PipelineType {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for PipelineType {
    type Err = InvalidPipelineType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(InvalidPipelineType {
                value: s.to_string(),
                reason: "must not be empty",
            });
        }
        let valid = s
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-');
        if !valid {
            return Err(InvalidPipelineType {
                value: s.to_string(),
                reason: "only lowercase letters, digits, '_' and '-' are allowed",
            });
        }
        Ok(Self(s.to_string()))
    }
}

impl TryFrom<String> for PipelineType {
    type Error = InvalidPipelineType;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PipelineType> for String {
    fn from(value: PipelineType) -> Self {
        value.0
    }
}

impl fmt::Display for PipelineType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Binds a pipeline type to the two logical entity fields the engine reads.
///
/// Each business domain supplies one of these instead of its own board code:
/// sales entities keep their stage in `sales_stage`, support tickets in
/// `support_stage`, and so on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineBinding {
    pub pipeline: PipelineType,
    pub stage_field: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_field: Option<String>,
}

impl PipelineBinding {
    pub fn new(pipeline: PipelineType, stage_field: impl Into<String>) -> Self {
        Self {
            pipeline,
            stage_field: stage_field.into(),
            value_field: None,
        }
    }

    pub fn with_value_field(mut self, value_field: impl Into<String>) -> Self {
        self.value_field = Some(value_field.into());
        self
    }
}

/// One named, ordered, colored bucket of a pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageDefinition {
    pub id: StageId,
    pub pipeline: PipelineType,
    /// Unique within the pipeline; never changes after creation.
    pub key: String,
    pub display_name: String,
    pub color: String,
    /// Dense, zero-based, equal to the stage's position in its registry.
    pub order_index: u32,
    pub created_at: String,
}

/// A stage about to be persisted. The key and index are decided by the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewStage {
    pub key: String,
    pub display_name: String,
    pub color: String,
    pub order_index: u32,
}

/// Rename and/or recolor. `None` leaves the attribute untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagePatch {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
}

impl StagePatch {
    pub fn is_empty(&self) -> bool {
        self.display_name.is_none() && self.color.is_none()
    }
}

/// A record of any shape that can sit in a pipeline.
///
/// Serialized as a flat JSON object with a mandatory string `id`; every other
/// attribute is opaque to the engine except the binding's stage and value
/// fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Entity {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fields: Map::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// The recorded stage key, if the field holds a string.
    pub fn stage_key(&self, stage_field: &str) -> Option<&str> {
        self.fields.get(stage_field).and_then(Value::as_str)
    }

    pub fn set_stage_key(&mut self, stage_field: &str, key: &str) {
        self.fields
            .insert(stage_field.to_string(), Value::String(key.to_string()));
    }

    /// Put a field back exactly as it was, including "absent".
    pub fn restore_field(&mut self, name: &str, previous: Option<Value>) {
        match previous {
            Some(value) => {
                self.fields.insert(name.to_string(), value);
            }
            None => {
                self.fields.remove(name);
            }
        }
    }

    /// Numeric reading of `field` used for aggregation; malformed values count as zero.
    pub fn numeric_value(&self, field: &str) -> f64 {
        coerce_number(self.fields.get(field))
    }
}

/// Loose numeric coercion: numbers and numeric strings count, anything else is zero.
pub fn coerce_number(value: Option<&Value>) -> f64 {
    let n = match value {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse::<f64>().unwrap_or(0.0),
        _ => 0.0,
    };
    if n.is_finite() { n } else { 0.0 }
}

/// Optional narrowing for `EntityStore::list_entities`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityFilter {
    /// Field name to required value; all pairs must match.
    #[serde(default)]
    pub equals: BTreeMap<String, Value>,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl EntityFilter {
    pub fn field_equals(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.equals.insert(name.into(), value.into());
        self
    }

    pub fn matches(&self, entity: &Entity) -> bool {
        self.equals.iter().all(|(name, expected)| {
            if name == "id" {
                expected.as_str() == Some(entity.id.as_str())
            } else {
                entity.field(name) == Some(expected)
            }
        })
    }
}

/// Derived grouping of entities for one stage at one point in time. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bucket {
    pub stage_key: String,
    pub entities: Vec<Entity>,
    pub count: usize,
    pub aggregate_value: f64,
}

impl Bucket {
    pub fn empty(stage_key: impl Into<String>) -> Self {
        Self {
            stage_key: stage_key.into(),
            entities: Vec::new(),
            count: 0,
            aggregate_value: 0.0,
        }
    }
}
