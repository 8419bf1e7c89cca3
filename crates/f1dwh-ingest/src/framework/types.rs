//! Core types for the change-tracked upsert framework

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use f1dwh_common::fingerprint::fingerprint;
use f1dwh_common::{FieldValue, Record};
use serde::{Deserialize, Serialize};

use crate::error::IngestError;

/// Content fingerprint of the non-metadata columns
pub const DWH_HASH: &str = "dwh_hash";
/// First time a row with this key was inserted; never changed afterwards
pub const DWH_VALID_FROM: &str = "dwh_valid_from";
/// Last time the row content changed
pub const DWH_MODIFIED_AT: &str = "dwh_modified_at";
/// End of validity; null while the row is current
pub const DWH_VALID_TO: &str = "dwh_valid_to";

/// Columns maintained by the loader on every target table
pub const METADATA_COLUMNS: [&str; 4] = [DWH_HASH, DWH_VALID_FROM, DWH_MODIFIED_AT, DWH_VALID_TO];

pub fn is_metadata_column(column: &str) -> bool {
    METADATA_COLUMNS.contains(&column)
}

/// Destination table of an ingestion call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetDescriptor {
    pub table_name: String,

    /// Schema the table lives in; the connection default when absent
    #[serde(default)]
    pub schema: Option<String>,

    /// Ordered columns identifying a row
    pub primary_key_columns: Vec<String>,

    /// Columns to load, in order. Empty means every non-metadata column of
    /// the incoming records.
    #[serde(default)]
    pub columns: Vec<String>,

    /// Columns stored as text even when the source value is numeric.
    /// Numbers are rendered as their integer text, `44.0` becomes `"44"`.
    #[serde(default)]
    pub text_columns: Vec<String>,
}

impl TargetDescriptor {
    pub fn new<I, S>(table_name: impl Into<String>, primary_key_columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            table_name: table_name.into(),
            schema: None,
            primary_key_columns: primary_key_columns.into_iter().map(Into::into).collect(),
            columns: Vec::new(),
            text_columns: Vec::new(),
        }
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn with_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_text_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.text_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// `schema.table`, or just the table name
    pub fn qualified_name(&self) -> String {
        match &self.schema {
            Some(schema) => format!("{}.{}", schema, self.table_name),
            None => self.table_name.clone(),
        }
    }

    /// Check the descriptor itself, before any record is looked at
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.table_name.trim().is_empty() {
            return Err(IngestError::Configuration(
                "target table name is empty".to_string(),
            ));
        }

        if self.primary_key_columns.is_empty() {
            return Err(IngestError::Configuration(format!(
                "target {} has no primary key columns",
                self.qualified_name()
            )));
        }

        for column in self.primary_key_columns.iter().chain(&self.columns) {
            if is_metadata_column(column) {
                return Err(IngestError::Configuration(format!(
                    "target {} lists reserved column {}",
                    self.qualified_name(),
                    column
                )));
            }
        }

        if !self.columns.is_empty() {
            if let Some(missing) = self
                .primary_key_columns
                .iter()
                .find(|pk| !self.columns.contains(pk))
            {
                return Err(IngestError::Configuration(format!(
                    "primary key column {} of {} is not in its column list",
                    missing,
                    self.qualified_name()
                )));
            }
        }

        Ok(())
    }

    fn invalid(&self, reason: String) -> IngestError {
        IngestError::InvalidRecord {
            table: self.qualified_name(),
            reason,
        }
    }

    /// Reduce a record to the loadable columns, in load order
    fn project(&self, record: Record) -> Result<Record, IngestError> {
        if self.columns.is_empty() {
            if !record.columns().iter().any(|c| is_metadata_column(c)) {
                return Ok(record);
            }
            return Ok(Record::from_pairs(
                record
                    .iter()
                    .filter(|(column, _)| !is_metadata_column(column))
                    .map(|(column, value)| (column.to_string(), value.clone())),
            ));
        }

        let columns: Arc<[String]> = self.columns.clone().into();
        let mut values = Vec::with_capacity(columns.len());
        for column in columns.iter() {
            let value = record
                .get(column)
                .ok_or_else(|| self.invalid(format!("record has no column {}", column)))?;
            values.push(value.clone());
        }

        Record::new(columns, values).map_err(|e| self.invalid(e.to_string()))
    }

    /// Project the primary key out of a loadable record
    pub fn key_of(&self, record: &Record) -> Result<KeyProjection, IngestError> {
        let mut values = Vec::with_capacity(self.primary_key_columns.len());
        for column in &self.primary_key_columns {
            match record.get(column) {
                None => {
                    return Err(self.invalid(format!("record has no key column {}", column)));
                },
                Some(FieldValue::Null) => {
                    return Err(self.invalid(format!("key column {} is null", column)));
                },
                Some(value) => values.push(value.clone()),
            }
        }

        Ok(KeyProjection {
            columns: self.primary_key_columns.clone(),
            values,
        })
    }
}

/// Values of the primary-key columns of one record
#[derive(Debug, Clone, PartialEq)]
pub struct KeyProjection {
    pub columns: Vec<String>,
    pub values: Vec<FieldValue>,
}

impl KeyProjection {
    /// Identity used to group records of the same key.
    ///
    /// Built from the canonical rendering, the form values are bound with in
    /// storage, so `1` and `'1'` share a lane just as they share a row.
    pub fn lane_id(&self) -> String {
        let mut id = String::new();
        for value in &self.values {
            id.push_str(&value.to_string());
            id.push('\u{1f}');
        }
        id
    }

    /// Whether `record` carries this key, comparing canonical renderings
    pub fn matches(&self, record: &Record) -> bool {
        self.columns.iter().zip(&self.values).all(|(column, value)| {
            record
                .get(column)
                .is_some_and(|stored| !stored.is_null() && stored.to_string() == value.to_string())
        })
    }
}

impl fmt::Display for KeyProjection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (column, value)) in self.columns.iter().zip(&self.values).enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}={}", column, value)?;
        }
        Ok(())
    }
}

/// A record prepared for upsert: normalised, keyed and fingerprinted
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeTrackedRecord {
    pub record: Record,
    pub key: KeyProjection,
    /// SHA-384 of the non-metadata values, hex encoded
    pub fingerprint: String,
    /// Batch timestamp, shared by every record of one ingestion call
    pub observed_at: DateTime<Utc>,
}

impl ChangeTrackedRecord {
    /// Prepare an incoming record for `target`.
    ///
    /// Steps, in order: project to the loadable columns, replace missing
    /// markers with null, coerce text columns, project the key, fingerprint.
    pub fn prepare(
        record: Record,
        target: &TargetDescriptor,
        observed_at: DateTime<Utc>,
    ) -> Result<Self, IngestError> {
        let mut record = target.project(record)?;
        record.normalize_missing();

        for column in &target.text_columns {
            if let Some(value) = record.get_mut(column) {
                coerce_to_integer_text(value);
            }
        }

        let key = target.key_of(&record)?;
        let fingerprint = fingerprint(record.values());

        Ok(Self {
            record,
            key,
            fingerprint,
            observed_at,
        })
    }
}

fn coerce_to_integer_text(value: &mut FieldValue) {
    let text = match value {
        FieldValue::Integer(i) => i.to_string(),
        FieldValue::Float(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
            (*f as i64).to_string()
        },
        FieldValue::Float(f) => f.to_string(),
        FieldValue::Null | FieldValue::Text(_) => return,
    };
    *value = FieldValue::Text(text);
}

/// What one upsert did to the stored row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    Unchanged,
}

impl UpsertOutcome {
    pub fn is_modified(self) -> bool {
        !matches!(self, UpsertOutcome::Unchanged)
    }
}

/// The current stored version of a key, as far as the upsert needs it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredVersion {
    pub fingerprint: String,
}

/// Per-worker counters, merged by the coordinator
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerCounters {
    pub processed: u64,
    pub modified: u64,
    pub inserted: u64,
    pub updated: u64,
    pub unchanged: u64,
}

impl WorkerCounters {
    pub fn record(&mut self, outcome: UpsertOutcome) {
        self.processed += 1;
        match outcome {
            UpsertOutcome::Inserted => self.inserted += 1,
            UpsertOutcome::Updated => self.updated += 1,
            UpsertOutcome::Unchanged => self.unchanged += 1,
        }
        if outcome.is_modified() {
            self.modified += 1;
        }
    }

    pub fn merge(&mut self, other: &WorkerCounters) {
        self.processed += other.processed;
        self.modified += other.modified;
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
    }
}

/// Result of one successful ingestion call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionSummary {
    pub table: String,
    /// Records upserted, whatever the outcome
    pub processed: u64,
    /// Records whose stored row was inserted or changed
    pub modified: u64,
    pub inserted: u64,
    pub updated: u64,
    pub unchanged: u64,
    pub workers: usize,
    pub elapsed_ms: u64,
}

impl IngestionSummary {
    pub fn empty(table: impl Into<String>) -> Self {
        Self::from_counters(table, WorkerCounters::default(), 0, Duration::ZERO)
    }

    pub fn from_counters(
        table: impl Into<String>,
        counters: WorkerCounters,
        workers: usize,
        elapsed: Duration,
    ) -> Self {
        Self {
            table: table.into(),
            processed: counters.processed,
            modified: counters.modified,
            inserted: counters.inserted,
            updated: counters.updated,
            unchanged: counters.unchanged,
            workers,
            elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

/// Retry budget for transient storage failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per record, including the first
    pub max_attempts: u32,
    /// Pause between attempts
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(1000),
        }
    }
}

/// Configuration for one ingestion call
#[derive(Debug, Clone)]
pub struct IngestionConfig {
    pub upload_workers: usize,
    /// How long a worker waits for the queue lock before trying again
    pub claim_timeout: Duration,
    /// How often the coordinator checks worker liveness
    pub liveness_poll_interval: Duration,
    pub retry: RetryPolicy,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            upload_workers: 20,
            claim_timeout: Duration::from_millis(500),
            liveness_poll_interval: Duration::from_millis(100),
            retry: RetryPolicy::default(),
        }
    }
}
