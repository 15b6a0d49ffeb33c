//! Shared domain types for the stageboard pipeline engine.
//!
//! Everything the engine and its collaborators exchange lives here: pipeline
//! bindings, stage definitions, generic entities, derived buckets, and the
//! async store contracts the engine consumes.

pub mod models;
pub mod store;

pub use models::*;
pub use store::{ConfigStore, EntityStore};
