//! Convenience persistence layer over SQLite: declared entity models,
//! predicate fetches, find-or-create, and unit-of-work save semantics.
//! This crate is the single source of truth for entity invariants.

pub mod db;
pub mod logging;
pub mod model;
pub mod query;
pub mod repo;
pub mod store;

pub use logging::{default_log_level, init_logging, logging_status};
pub use model::entity::{Entity, EntityId};
pub use model::schema::{AttributeDescription, AttributeKind, EntityDescription, Model, ModelError};
pub use model::value::Value;
pub use query::fetch::{FetchRequest, Section, SortDescriptor};
pub use query::predicate::{CompareOp, Predicate};
pub use query::QueryError;
pub use repo::entity_store::{EntityStore, PendingOp, SqliteEntityStore};
pub use repo::{StoreError, StoreResult};
pub use store::context::Context;
pub use store::stack::{PersistenceStack, StackConfig};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
