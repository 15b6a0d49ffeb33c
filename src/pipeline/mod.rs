//! The pipeline stage engine.
//!
//! One generic engine serves every business domain. A domain is nothing more
//! than a [`PipelineBinding`](stageboard_common::PipelineBinding): the
//! pipeline name plus the entity fields holding the stage and the value.
//!
//! ```text
//! StageConfigEditor --> RegistryHandle --(ConfigStore)
//!                            |
//!                            v
//! BoardAdapter --drop--> TransitionController --(EntityStore)
//!      ^                     |
//!      +---- Classifier <----+  (BoardEvent::Recomputed)
//! ```

pub mod board;
pub mod classifier;
pub mod editor;
pub mod engine;
pub mod events;
pub mod presets;
pub mod registry;
pub mod state;
pub mod transition;

pub use board::{BoardAdapter, BoardView, CardView, ColumnView, DropGesture, DropOutcome};
pub use classifier::{Classifier, UNASSIGNED_STAGE_KEY, total_across_buckets};
pub use editor::{EditOutcome, StageConfigEditor};
pub use engine::{EngineBuilder, PipelineEngine, PipelineHub, RefreshReport};
pub use events::BoardEvent;
pub use presets::{PRESETS, Preset, StageSeed};
pub use registry::{DEFAULT_STAGE_COLOR, RegistryHandle, StageRegistry, normalize_key};
pub use state::PipelineState;
pub use transition::{DEFAULT_PERSIST_TIMEOUT, TransitionController, TransitionPhase};
