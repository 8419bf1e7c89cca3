//! In-process store
//!
//! Tables live in a shared map; each session buffers its writes and applies
//! them on commit, so a rolled-back transaction leaves nothing behind.
//! Faults can be injected per key to exercise the retry and failure paths.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use f1dwh_common::Record;
use tokio::sync::Mutex;

use super::{StorageError, StoreSession, VersionedStore};
use crate::framework::types::{ChangeTrackedRecord, KeyProjection, StoredVersion, TargetDescriptor};

/// A stored row with its metadata columns
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRow {
    pub record: Record,
    pub fingerprint: String,
    pub valid_from: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    pub valid_to: Option<DateTime<Utc>>,
}

impl StoredRow {
    fn is_current(&self) -> bool {
        self.valid_to.is_none()
    }
}

#[derive(Debug, Clone, Copy)]
enum Fault {
    Transient { remaining: u32 },
    Fatal,
}

#[derive(Debug, Default)]
struct FaultPlan {
    by_key: HashMap<String, Fault>,
    refuse_sessions: bool,
    latency: Option<Duration>,
}

impl FaultPlan {
    /// Consume the fault registered for `key`, if any
    fn trip(&mut self, key: &KeyProjection) -> Result<(), StorageError> {
        let display = key.to_string();
        match self.by_key.get_mut(&display) {
            Some(Fault::Transient { remaining }) if *remaining > 0 => {
                *remaining -= 1;
                Err(StorageError::Connection(format!(
                    "injected transient failure for {}",
                    display
                )))
            },
            Some(Fault::Fatal) => Err(StorageError::Query(format!(
                "injected fatal failure for {}",
                display
            ))),
            _ => Ok(()),
        }
    }
}

type Tables = HashMap<String, Vec<StoredRow>>;

/// Store keeping every table in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
    faults: Arc<Mutex<FaultPlan>>,
    sessions_opened: Arc<AtomicUsize>,
    writes_committed: Arc<AtomicUsize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail lookups for the key displayed as `key` (e.g. `id=GBR`) with a
    /// transient error, `times` times
    pub async fn inject_transient(&self, key: &str, times: u32) {
        self.faults
            .lock()
            .await
            .by_key
            .insert(key.to_string(), Fault::Transient { remaining: times });
    }

    /// Fail every lookup for `key` with a non-retryable error
    pub async fn inject_fatal(&self, key: &str) {
        self.faults
            .lock()
            .await
            .by_key
            .insert(key.to_string(), Fault::Fatal);
    }

    /// Refuse to open new sessions
    pub async fn refuse_sessions(&self) {
        self.faults.lock().await.refuse_sessions = true;
    }

    /// Delay every lookup, widening the window for concurrent workers
    pub async fn set_latency(&self, latency: Duration) {
        self.faults.lock().await.latency = Some(latency);
    }

    /// Snapshot of all rows of a table, in insertion order
    pub async fn rows(&self, table: &str) -> Vec<StoredRow> {
        self.tables
            .lock()
            .await
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    /// The current row holding `key`
    pub async fn current(&self, table: &str, key: &KeyProjection) -> Option<StoredRow> {
        self.tables
            .lock()
            .await
            .get(table)
            .and_then(|rows| {
                rows.iter()
                    .find(|row| row.is_current() && key.matches(&row.record))
            })
            .cloned()
    }

    pub fn sessions_opened(&self) -> usize {
        self.sessions_opened.load(Ordering::SeqCst)
    }

    /// Inserts and updates made durable so far
    pub fn writes_committed(&self) -> usize {
        self.writes_committed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VersionedStore for MemoryStore {
    type Session = MemorySession;

    async fn open_session(&self) -> Result<Self::Session, StorageError> {
        if self.faults.lock().await.refuse_sessions {
            return Err(StorageError::Connection(
                "memory store refuses new sessions".to_string(),
            ));
        }

        self.sessions_opened.fetch_add(1, Ordering::SeqCst);
        Ok(MemorySession {
            store: self.clone(),
            pending: Vec::new(),
            in_transaction: false,
        })
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

#[derive(Debug)]
enum PendingWrite {
    Insert {
        table: String,
        row: StoredRow,
    },
    Update {
        table: String,
        key: KeyProjection,
        record: Record,
        fingerprint: String,
        modified_at: DateTime<Utc>,
    },
}

/// Session over a [`MemoryStore`]
#[derive(Debug)]
pub struct MemorySession {
    store: MemoryStore,
    pending: Vec<PendingWrite>,
    in_transaction: bool,
}

impl MemorySession {
    fn require_transaction(&self) -> Result<(), StorageError> {
        if self.in_transaction {
            Ok(())
        } else {
            Err(StorageError::Query("no transaction in progress".to_string()))
        }
    }
}

#[async_trait]
impl StoreSession for MemorySession {
    async fn begin(&mut self) -> Result<(), StorageError> {
        if self.in_transaction {
            return Err(StorageError::Query("transaction already in progress".to_string()));
        }
        self.pending.clear();
        self.in_transaction = true;
        Ok(())
    }

    async fn find_current(
        &mut self,
        target: &TargetDescriptor,
        key: &KeyProjection,
    ) -> Result<Option<StoredVersion>, StorageError> {
        self.require_transaction()?;

        let latency = {
            let mut faults = self.store.faults.lock().await;
            faults.trip(key)?;
            faults.latency
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let table = target.qualified_name();
        let tables = self.store.tables.lock().await;
        let mut current = tables
            .get(&table)
            .into_iter()
            .flatten()
            .filter(|row| row.is_current() && key.matches(&row.record));

        let found = current.next();
        if current.next().is_some() {
            return Err(StorageError::Integrity(format!(
                "more than one current row in {} for {}",
                table, key
            )));
        }

        Ok(found.map(|row| StoredVersion {
            fingerprint: row.fingerprint.clone(),
        }))
    }

    async fn insert_version(
        &mut self,
        target: &TargetDescriptor,
        record: &ChangeTrackedRecord,
    ) -> Result<(), StorageError> {
        self.require_transaction()?;
        self.pending.push(PendingWrite::Insert {
            table: target.qualified_name(),
            row: StoredRow {
                record: record.record.clone(),
                fingerprint: record.fingerprint.clone(),
                valid_from: record.observed_at,
                modified_at: record.observed_at,
                valid_to: None,
            },
        });
        Ok(())
    }

    async fn update_version(
        &mut self,
        target: &TargetDescriptor,
        record: &ChangeTrackedRecord,
    ) -> Result<(), StorageError> {
        self.require_transaction()?;
        self.pending.push(PendingWrite::Update {
            table: target.qualified_name(),
            key: record.key.clone(),
            record: record.record.clone(),
            fingerprint: record.fingerprint.clone(),
            modified_at: record.observed_at,
        });
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), StorageError> {
        self.require_transaction()?;

        let mut tables = self.store.tables.lock().await;

        // Every update must find its row before anything is applied
        let missing = self.pending.iter().enumerate().find_map(|(i, write)| {
            let PendingWrite::Update { table, key, .. } = write else {
                return None;
            };
            let stored = tables.get(table).is_some_and(|rows| {
                rows.iter().any(|row| row.is_current() && key.matches(&row.record))
            });
            let inserted_here = self.pending[..i].iter().any(|earlier| {
                matches!(earlier, PendingWrite::Insert { table: t, row } if t == table && key.matches(&row.record))
            });
            (!stored && !inserted_here).then(|| format!("no current row in {} for {}", table, key))
        });
        if let Some(message) = missing {
            self.pending.clear();
            self.in_transaction = false;
            return Err(StorageError::Integrity(message));
        }

        let mut applied = 0;
        for write in self.pending.drain(..) {
            match write {
                PendingWrite::Insert { table, row } => {
                    tables.entry(table).or_default().push(row);
                },
                PendingWrite::Update {
                    table,
                    key,
                    record,
                    fingerprint,
                    modified_at,
                } => {
                    let row = tables.get_mut(&table).and_then(|rows| {
                        rows.iter_mut()
                            .find(|row| row.is_current() && key.matches(&row.record))
                    });
                    if let Some(row) = row {
                        row.record = record;
                        row.fingerprint = fingerprint;
                        row.modified_at = modified_at;
                    }
                },
            }
            applied += 1;
        }

        self.in_transaction = false;
        self.store
            .writes_committed
            .fetch_add(applied, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), StorageError> {
        self.pending.clear();
        self.in_transaction = false;
        Ok(())
    }

    async fn reset(&mut self) -> Result<(), StorageError> {
        self.rollback().await
    }
}
