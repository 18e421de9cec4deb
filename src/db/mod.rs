//! Persistence layer backed by a local libsql (SQLite) database

pub mod store;

pub use store::{MemoryEntry, ResearchStore, StoredPlan};
