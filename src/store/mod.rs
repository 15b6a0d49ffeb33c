//! Collaborator implementations of `EntityStore` and `ConfigStore`.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::{BoardDb, DbHandle};
