//! Domain model: declared schemas, attribute values, entity instances.
//!
//! # Responsibility
//! - Define the validated schema types (`Model`, `EntityDescription`).
//! - Define the runtime record type (`Entity`) and its attribute values.
//!
//! # Invariants
//! - Every entity is identified by a stable `EntityId`.
//! - Attribute writes go through the typed setter and are validated
//!   against the owning description before they reach persistence.

pub mod entity;
pub mod schema;
pub mod value;
