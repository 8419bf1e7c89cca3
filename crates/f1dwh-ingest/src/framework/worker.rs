//! Upload worker
//!
//! A worker owns one store session for its whole life. It claims key lanes
//! from the shared queue and upserts their records one by one, retrying
//! transient storage failures up to the configured budget. Any other failure
//! ends the worker with an error the coordinator turns into a failed call.

use std::sync::Arc;

use tracing::{debug, trace, warn};

use super::queue::{Claim, WorkQueue};
use super::storage::StoreSession;
use super::types::{ChangeTrackedRecord, IngestionConfig, TargetDescriptor, WorkerCounters};
use super::upsert;
use crate::error::IngestError;

pub struct UploadWorker<S: StoreSession> {
    id: usize,
    session: S,
    target: Arc<TargetDescriptor>,
    queue: Arc<WorkQueue>,
    config: IngestionConfig,
    counters: WorkerCounters,
}

impl<S: StoreSession> UploadWorker<S> {
    pub fn new(
        id: usize,
        session: S,
        target: Arc<TargetDescriptor>,
        queue: Arc<WorkQueue>,
        config: IngestionConfig,
    ) -> Self {
        Self {
            id,
            session,
            target,
            queue,
            config,
            counters: WorkerCounters::default(),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Work until the queue is drained
    pub async fn run(mut self) -> Result<WorkerCounters, IngestError> {
        loop {
            match self.queue.claim(self.config.claim_timeout).await {
                Claim::Lane(lane) => {
                    trace!(worker = self.id, key = %lane.key, records = lane.records.len(), "Claimed lane");
                    for record in &lane.records {
                        self.process(record).await?;
                    }
                },
                Claim::TimedOut => continue,
                Claim::Drained => break,
            }
        }

        debug!(
            worker = self.id,
            processed = self.counters.processed,
            modified = self.counters.modified,
            "Worker drained"
        );
        Ok(self.counters)
    }

    async fn process(&mut self, record: &ChangeTrackedRecord) -> Result<(), IngestError> {
        let policy = self.config.retry;
        let mut attempt = 1;

        loop {
            match upsert::apply(&mut self.session, &self.target, record).await {
                Ok(outcome) => {
                    trace!(worker = self.id, key = %record.key, ?outcome, "Upserted");
                    self.counters.record(outcome);
                    return Ok(());
                },
                Err(e) if e.is_transient() && attempt < policy.max_attempts => {
                    warn!(
                        worker = self.id,
                        key = %record.key,
                        attempt,
                        max_attempts = policy.max_attempts,
                        error = %e,
                        "Transient storage failure, retrying"
                    );
                    if let Err(reset_err) = self.session.reset().await {
                        warn!(worker = self.id, error = %reset_err, "Session reset failed");
                    }
                    tokio::time::sleep(policy.backoff).await;
                    attempt += 1;
                },
                Err(source) => {
                    return Err(IngestError::FatalUpsert {
                        table: self.target.qualified_name(),
                        key: record.key.to_string(),
                        attempts: attempt,
                        source,
                    });
                },
            }
        }
    }
}
