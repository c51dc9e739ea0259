//! Error types for the profile store.

use thiserror::Error;

/// Errors surfaced by [`crate::db::Database`].
///
/// "Not found" is never an error: lookups return `Ok(None)` instead.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A user with this email already exists.
    #[error("a user with email {0} already exists")]
    DuplicateEmail(String),

    /// The profile's owner does not exist.
    #[error("user {0} not found")]
    UserNotFound(String),

    /// A named migration failed to apply.
    #[error("migration {name} failed: {source}")]
    Migration {
        name: &'static str,
        source: Box<StoreError>,
    },

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),
}

impl StoreError {
    /// True for errors caused by the request rather than the store.
    pub fn is_constraint_violation(&self) -> bool {
        matches!(self, Self::DuplicateEmail(_) | Self::UserNotFound(_))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
