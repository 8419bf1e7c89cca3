//! Storage interface for change-tracked tables
//!
//! A [`VersionedStore`] hands out [`StoreSession`]s. Each upload worker owns
//! one session for its whole life and never shares it; a session runs at
//! most one transaction at a time.
//!
//! Backends:
//! - [`postgres::PgStore`]: one dedicated PostgreSQL connection per session
//! - [`memory::MemoryStore`]: in-process tables, used for dry runs and tests

use async_trait::async_trait;
use thiserror::Error;

use super::types::{ChangeTrackedRecord, KeyProjection, StoredVersion, TargetDescriptor};

pub mod memory;
pub mod postgres;

pub use memory::{MemoryStore, StoredRow};
pub use postgres::PgStore;

/// Storage failures, split by whether a retry can help
#[derive(Debug, Error)]
pub enum StorageError {
    /// Lost or unavailable connection
    #[error("connection error: {0}")]
    Connection(String),

    /// Serialization failure or deadlock; the transaction can be replayed
    #[error("transaction conflict: {0}")]
    Conflict(String),

    /// Table or column missing, or a type the store cannot handle
    #[error("schema error: {0}")]
    Schema(String),

    /// Stored data violates the one-current-row-per-key rule
    #[error("integrity error: {0}")]
    Integrity(String),

    /// Any other rejected statement
    #[error("query failed: {0}")]
    Query(String),
}

impl StorageError {
    /// Whether retrying the same record may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Connection(_) | StorageError::Conflict(_))
    }
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => StorageError::Connection(err.to_string()),
            sqlx::Error::Database(db) => match db.code().as_deref() {
                Some(code) if code.starts_with("08") => StorageError::Connection(err.to_string()),
                // admin_shutdown, too_many_connections
                Some("57P01") | Some("53300") => StorageError::Connection(err.to_string()),
                // serialization_failure, deadlock_detected
                Some("40001") | Some("40P01") => StorageError::Conflict(err.to_string()),
                Some(code) if code.starts_with("42") => StorageError::Schema(err.to_string()),
                _ => StorageError::Query(err.to_string()),
            },
            sqlx::Error::ColumnNotFound(_) | sqlx::Error::TypeNotFound { .. } => {
                StorageError::Schema(err.to_string())
            },
            _ => StorageError::Query(err.to_string()),
        }
    }
}

/// Factory for per-worker sessions
#[async_trait]
pub trait VersionedStore: Send + Sync + 'static {
    type Session: StoreSession + 'static;

    /// Open a session with its own connection
    async fn open_session(&self) -> Result<Self::Session, StorageError>;

    /// Short backend name for logs
    fn backend(&self) -> &'static str;
}

/// One worker's private handle on the store
#[async_trait]
pub trait StoreSession: Send {
    async fn begin(&mut self) -> Result<(), StorageError>;

    /// The current row for `key`, if any
    async fn find_current(
        &mut self,
        target: &TargetDescriptor,
        key: &KeyProjection,
    ) -> Result<Option<StoredVersion>, StorageError>;

    /// Insert a new current row stamped with the record's observation time
    async fn insert_version(
        &mut self,
        target: &TargetDescriptor,
        record: &ChangeTrackedRecord,
    ) -> Result<(), StorageError>;

    /// Overwrite the current row in place; `dwh_valid_from` stays as stored
    async fn update_version(
        &mut self,
        target: &TargetDescriptor,
        record: &ChangeTrackedRecord,
    ) -> Result<(), StorageError>;

    async fn commit(&mut self) -> Result<(), StorageError>;

    async fn rollback(&mut self) -> Result<(), StorageError>;

    /// Bring the session back to a usable state after a transient failure
    async fn reset(&mut self) -> Result<(), StorageError> {
        Ok(())
    }
}
