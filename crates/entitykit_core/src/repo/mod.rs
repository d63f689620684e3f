//! Store backend contracts and SQLite implementation.
//!
//! # Responsibility
//! - Define row-level persistence contracts for entity storage.
//! - Keep SQL details inside this persistence boundary.
//!
//! # Invariants
//! - Read paths reject invalid persisted state instead of masking it.
//! - Batch application is all-or-nothing within one SQL transaction.

use crate::db::DbError;
use crate::model::entity::EntityId;
use crate::model::schema::ModelError;
use crate::query::QueryError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod entity_store;

pub type StoreResult<T> = Result<T, StoreError>;

/// Generic error for entity persistence and query operations.
#[derive(Debug)]
pub enum StoreError {
    /// Underlying SQLite/bootstrap failure.
    Db(DbError),
    /// Schema or attribute validation failure.
    Validation(ModelError),
    /// Query construction failure (bad key or predicate).
    Query(QueryError),
    /// Target row does not exist in the backing store.
    NotFound(EntityId),
    /// Entity type is not declared by the model.
    UnknownEntity(String),
    /// Entity handle is owned by a different unit-of-work context.
    CrossContext(EntityId),
    /// Persisted data cannot be converted to a valid entity.
    InvalidData(String),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::Validation(err) => write!(f, "{err}"),
            Self::Query(err) => write!(f, "{err}"),
            Self::NotFound(id) => write!(f, "entity not found: {id}"),
            Self::UnknownEntity(name) => write!(f, "unknown entity type: `{name}`"),
            Self::CrossContext(id) => write!(
                f,
                "entity {id} is owned by another context; materialize it first"
            ),
            Self::InvalidData(message) => write!(f, "invalid persisted entity data: {message}"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Validation(err) => Some(err),
            Self::Query(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for StoreError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<ModelError> for StoreError {
    fn from(value: ModelError) -> Self {
        Self::Validation(value)
    }
}

impl From<QueryError> for StoreError {
    fn from(value: QueryError) -> Self {
        Self::Query(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}
