//! Change-tracked ingestion framework
//!
//! Loads batches of records into versioned tables with a pool of concurrent
//! upload workers. Every row carries a content fingerprint; a row is only
//! written when its content changed since the last load.

pub mod coordinator;
pub mod queue;
pub mod storage;
pub mod types;
pub mod upsert;
pub mod worker;

pub use coordinator::IngestionCoordinator;
pub use queue::{Claim, KeyLane, WorkQueue};
pub use storage::{MemoryStore, PgStore, StorageError, StoreSession, StoredRow, VersionedStore};
pub use types::{
    ChangeTrackedRecord, IngestionConfig, IngestionSummary, KeyProjection, RetryPolicy,
    StoredVersion, TargetDescriptor, UpsertOutcome, WorkerCounters, METADATA_COLUMNS,
};
pub use worker::UploadWorker;
