//! SQLite storage bootstrap and model schema application.
//!
//! # Responsibility
//! - Open and configure SQLite connections for entity storage.
//! - Derive and apply per-entity table schemas from a validated model.
//!
//! # Invariants
//! - Returned connections have `foreign_keys=ON` and the model schema
//!   fully applied.
//! - A persisted table that disagrees with the model is an error, never
//!   silently altered.

use std::error::Error;
use std::fmt::{Display, Formatter};

mod open;
pub mod schema;

pub use open::{open_connection, open_connection_in_memory};

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug)]
pub enum DbError {
    Sqlite(rusqlite::Error),
    SchemaMismatch { table: String, detail: String },
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::SchemaMismatch { table, detail } => {
                write!(f, "table `{table}` does not match the model: {detail}")
            }
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::SchemaMismatch { .. } => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}
