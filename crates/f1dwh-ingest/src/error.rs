//! Error types for the ingestion crate

use f1dwh_common::DwhError;
use thiserror::Error;

use crate::framework::storage::StorageError;

/// Failure of one ingestion call
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("invalid record for {table}: {reason}")]
    InvalidRecord { table: String, reason: String },

    #[error("storage setup failed: {0}")]
    Setup(#[source] StorageError),

    #[error("upsert into {table} failed for key ({key}) after {attempts} attempt(s): {source}")]
    FatalUpsert {
        table: String,
        key: String,
        attempts: u32,
        #[source]
        source: StorageError,
    },

    #[error("upload worker {worker} for {table} stopped early: {reason}")]
    WorkerDied {
        table: String,
        worker: usize,
        reason: String,
    },
}

impl IngestError {
    /// Key of the record being written when the call failed, if any
    pub fn failed_key(&self) -> Option<&str> {
        match self {
            IngestError::FatalUpsert { key, .. } => Some(key),
            _ => None,
        }
    }
}

/// Failure of a multi-table pipeline run
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("parse stage failed: {0}")]
    Parse(#[from] DwhError),

    #[error("ingest of table {table} failed: {source}")]
    Ingest {
        table: String,
        #[source]
        source: IngestError,
    },
}

pub type Result<T> = std::result::Result<T, IngestError>;
