//! Query construction: predicates, sort descriptors, fetch requests.
//!
//! # Responsibility
//! - Describe reads as immutable (entity, predicate, sort) specifications.
//! - Provide matching SQL and in-memory evaluation for every predicate so
//!   pending unit-of-work changes can be overlaid on store results.
//!
//! # Invariants
//! - Unknown attribute keys are rejected before any SQL executes.
//! - Both evaluation paths agree on match semantics.

use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod fetch;
pub mod predicate;

/// Query-construction errors, surfaced before execution.
#[derive(Debug)]
pub enum QueryError {
    UnknownKey { entity: String, key: String },
    MissingSectionKey,
}

impl Display for QueryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownKey { entity, key } => {
                write!(f, "unknown attribute key `{key}` for entity `{entity}`")
            }
            Self::MissingSectionKey => {
                write!(f, "no section key supplied and no default configured")
            }
        }
    }
}

impl Error for QueryError {}
