//! Ingestion coordinator
//!
//! One `ingest` call loads a batch of records into one target table:
//! 1. Prepare: normalise, key and fingerprint every record
//! 2. Enqueue: group records into key lanes on a shared queue
//! 3. Upload: spawn the workers, each with its own store session
//! 4. Supervise: poll worker liveness until every worker has finished
//!
//! The first failure closes the queue; remaining workers finish the lane
//! they hold and exit, and the call returns that failure.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use f1dwh_common::Record;
use tokio::task::JoinHandle;
use tracing::{error, info, Instrument};

use super::queue::WorkQueue;
use super::storage::VersionedStore;
use super::types::{
    ChangeTrackedRecord, IngestionConfig, IngestionSummary, TargetDescriptor, WorkerCounters,
};
use super::worker::UploadWorker;
use crate::error::IngestError;

type WorkerHandle = JoinHandle<Result<WorkerCounters, IngestError>>;

/// Runs ingestion calls against one store
pub struct IngestionCoordinator<S: VersionedStore> {
    store: Arc<S>,
    config: IngestionConfig,
}

impl<S: VersionedStore> IngestionCoordinator<S> {
    pub fn new(store: Arc<S>, config: IngestionConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &IngestionConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Ingest with the configured number of upload workers
    pub async fn ingest_default(
        &self,
        records: Vec<Record>,
        target: &TargetDescriptor,
    ) -> Result<IngestionSummary, IngestError> {
        self.ingest(records, target, self.config.upload_workers).await
    }

    /// Upsert every record into `target` using `worker_count` workers
    pub async fn ingest(
        &self,
        records: Vec<Record>,
        target: &TargetDescriptor,
        worker_count: usize,
    ) -> Result<IngestionSummary, IngestError> {
        if worker_count == 0 {
            return Err(IngestError::Configuration(
                "worker count must be at least 1".to_string(),
            ));
        }
        target.validate()?;

        let table = target.qualified_name();
        if records.is_empty() {
            info!(table = %table, "No records to ingest");
            return Ok(IngestionSummary::empty(table));
        }

        let started = Instant::now();
        let observed_at = Utc::now();
        let tracked = records
            .into_iter()
            .map(|record| ChangeTrackedRecord::prepare(record, target, observed_at))
            .collect::<Result<Vec<_>, _>>()?;

        let queue = Arc::new(WorkQueue::from_records(tracked));
        let lanes = queue.pending_lanes().await;

        // Every session is opened before any work starts
        let mut sessions = Vec::with_capacity(worker_count);
        for _ in 0..worker_count {
            sessions.push(self.store.open_session().await.map_err(IngestError::Setup)?);
        }

        info!(
            table = %table,
            backend = self.store.backend(),
            records = queue.total_records(),
            lanes,
            workers = worker_count,
            "Starting ingestion"
        );

        let target = Arc::new(target.clone());
        let handles: Vec<Option<WorkerHandle>> = sessions
            .into_iter()
            .enumerate()
            .map(|(id, session)| {
                let worker = UploadWorker::new(
                    id,
                    session,
                    Arc::clone(&target),
                    Arc::clone(&queue),
                    self.config.clone(),
                );
                let span = tracing::info_span!("upload_worker", worker = id, table = %table);
                Some(tokio::spawn(worker.run().instrument(span)))
            })
            .collect();

        let counters = self.supervise(handles, &queue, &table).await?;
        let summary = IngestionSummary::from_counters(table, counters, worker_count, started.elapsed());

        info!(
            table = %summary.table,
            processed = summary.processed,
            modified = summary.modified,
            inserted = summary.inserted,
            updated = summary.updated,
            unchanged = summary.unchanged,
            elapsed_ms = summary.elapsed_ms,
            "Ingestion complete"
        );

        Ok(summary)
    }

    /// Wait for every worker, polling liveness at the configured interval
    async fn supervise(
        &self,
        mut handles: Vec<Option<WorkerHandle>>,
        queue: &WorkQueue,
        table: &str,
    ) -> Result<WorkerCounters, IngestError> {
        let mut ticker = tokio::time::interval(self.config.liveness_poll_interval);
        let mut totals = WorkerCounters::default();
        let mut failure: Option<IngestError> = None;
        let mut running = handles.len();

        while running > 0 {
            ticker.tick().await;

            for (worker, slot) in handles.iter_mut().enumerate() {
                let Some(handle) = slot.take_if(|h| h.is_finished()) else {
                    continue;
                };
                running -= 1;

                // A worker only returns Ok after seeing the queue empty, and
                // the queue never grows, so a clean exit always means drained.
                let outcome = match handle.await {
                    Ok(Ok(counters)) => {
                        totals.merge(&counters);
                        continue;
                    },
                    Ok(Err(e)) => e,
                    Err(join_err) => IngestError::WorkerDied {
                        table: table.to_string(),
                        worker,
                        reason: join_err.to_string(),
                    },
                };

                error!(table, worker, error = %outcome, "Upload worker failed");
                if failure.is_none() {
                    let discarded = queue.close().await;
                    if discarded > 0 {
                        info!(table, discarded, "Closed queue after failure");
                    }
                    failure = Some(outcome);
                }
            }
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(totals),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::framework::storage::{MemoryStore, StorageError, StoreSession};
    use crate::framework::types::{KeyProjection, StoredVersion};
    use async_trait::async_trait;
    use f1dwh_common::FieldValue;

    type MemorySession = <MemoryStore as VersionedStore>::Session;

    /// Store whose sessions panic when looking up one key
    struct CrashingStore {
        inner: MemoryStore,
        crash_on: &'static str,
    }

    struct CrashingSession {
        inner: MemorySession,
        crash_on: &'static str,
    }

    #[async_trait]
    impl VersionedStore for CrashingStore {
        type Session = CrashingSession;

        async fn open_session(&self) -> Result<Self::Session, StorageError> {
            Ok(CrashingSession {
                inner: self.inner.open_session().await?,
                crash_on: self.crash_on,
            })
        }

        fn backend(&self) -> &'static str {
            "crashing"
        }
    }

    #[async_trait]
    impl StoreSession for CrashingSession {
        async fn begin(&mut self) -> Result<(), StorageError> {
            self.inner.begin().await
        }

        async fn find_current(
            &mut self,
            target: &TargetDescriptor,
            key: &KeyProjection,
        ) -> Result<Option<StoredVersion>, StorageError> {
            if key.to_string() == self.crash_on {
                panic!("session lost its connection state");
            }
            self.inner.find_current(target, key).await
        }

        async fn insert_version(
            &mut self,
            target: &TargetDescriptor,
            record: &ChangeTrackedRecord,
        ) -> Result<(), StorageError> {
            self.inner.insert_version(target, record).await
        }

        async fn update_version(
            &mut self,
            target: &TargetDescriptor,
            record: &ChangeTrackedRecord,
        ) -> Result<(), StorageError> {
            self.inner.update_version(target, record).await
        }

        async fn commit(&mut self) -> Result<(), StorageError> {
            self.inner.commit().await
        }

        async fn rollback(&mut self) -> Result<(), StorageError> {
            self.inner.rollback().await
        }
    }

    fn coordinator(store: &MemoryStore) -> IngestionCoordinator<MemoryStore> {
        let config = IngestionConfig {
            liveness_poll_interval: std::time::Duration::from_millis(5),
            ..IngestionConfig::default()
        };
        IngestionCoordinator::new(Arc::new(store.clone()), config)
    }

    fn countries() -> Vec<Record> {
        [("GBR", "United Kingdom"), ("DEU", "Germany"), ("ITA", "Italy")]
            .into_iter()
            .map(|(id, name)| Record::from_pairs([("id", FieldValue::from(id)), ("name", FieldValue::from(name))]))
            .collect()
    }

    #[tokio::test]
    async fn test_zero_workers_is_a_configuration_error() {
        let store = MemoryStore::new();
        let target = TargetDescriptor::new("country", ["id"]);
        let err = coordinator(&store).ingest(countries(), &target, 0).await.unwrap_err();
        assert!(matches!(err, IngestError::Configuration(_)));
        assert_eq!(store.sessions_opened(), 0);
    }

    #[tokio::test]
    async fn test_empty_batch_opens_no_sessions() {
        let store = MemoryStore::new();
        let target = TargetDescriptor::new("country", ["id"]);
        let summary = coordinator(&store).ingest(Vec::new(), &target, 4).await.unwrap();
        assert_eq!(summary.processed, 0);
        assert_eq!(summary.modified, 0);
        assert_eq!(store.sessions_opened(), 0);
    }

    #[tokio::test]
    async fn test_setup_failure_before_any_work() {
        let store = MemoryStore::new();
        store.refuse_sessions().await;
        let target = TargetDescriptor::new("country", ["id"]);
        let err = coordinator(&store).ingest(countries(), &target, 2).await.unwrap_err();
        assert!(matches!(err, IngestError::Setup(_)));
        assert!(store.rows("country").await.is_empty());
    }

    #[tokio::test]
    async fn test_ingest_counts() {
        let store = MemoryStore::new();
        let target = TargetDescriptor::new("country", ["id"]);
        let summary = coordinator(&store).ingest(countries(), &target, 2).await.unwrap();
        assert_eq!(summary.processed, 3);
        assert_eq!(summary.inserted, 3);
        assert_eq!(summary.workers, 2);
        assert_eq!(store.sessions_opened(), 2);
    }

    #[tokio::test]
    async fn test_panicking_worker_fails_the_call() {
        let memory = MemoryStore::new();
        let store = CrashingStore {
            inner: memory.clone(),
            crash_on: "id=DEU",
        };
        let config = IngestionConfig {
            liveness_poll_interval: std::time::Duration::from_millis(5),
            ..IngestionConfig::default()
        };
        let coordinator = IngestionCoordinator::new(Arc::new(store), config);
        let target = TargetDescriptor::new("country", ["id"]);

        let err = coordinator.ingest(countries(), &target, 1).await.unwrap_err();
        match err {
            IngestError::WorkerDied { table, worker, reason } => {
                assert_eq!(table, "country");
                assert_eq!(worker, 0);
                assert!(reason.contains("panicked"), "{reason}");
            },
            other => panic!("unexpected error: {other}"),
        }

        // GBR committed before the crash; ITA was never claimed
        let rows = memory.rows("country").await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].record.get("id"), Some(&FieldValue::from("GBR")));
    }
}
