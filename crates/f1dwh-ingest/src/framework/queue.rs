//! Shared work queue for upload workers
//!
//! Work is grouped into key lanes: every record of one primary key, in batch
//! order. A lane is claimed whole by a single worker, so two records with the
//! same key are never upserted concurrently and later records win.
//!
//! The queue is filled once before workers start and only ever shrinks.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use tokio::sync::Mutex;

use super::types::{ChangeTrackedRecord, KeyProjection};

/// All records for one primary key
#[derive(Debug, Clone)]
pub struct KeyLane {
    pub key: KeyProjection,
    pub records: Vec<ChangeTrackedRecord>,
}

/// Result of one claim attempt
#[derive(Debug)]
pub enum Claim {
    Lane(KeyLane),
    /// The lock was not acquired in time; the queue may still hold work
    TimedOut,
    /// Nothing left; the worker should exit
    Drained,
}

#[derive(Debug)]
pub struct WorkQueue {
    lanes: Mutex<VecDeque<KeyLane>>,
    total_records: usize,
}

impl WorkQueue {
    /// Group records into lanes, ordered by each key's first appearance
    pub fn from_records(records: Vec<ChangeTrackedRecord>) -> Self {
        let total_records = records.len();
        let mut lanes: Vec<KeyLane> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();

        for record in records {
            match index.get(&record.key.lane_id()) {
                Some(&i) => lanes[i].records.push(record),
                None => {
                    index.insert(record.key.lane_id(), lanes.len());
                    lanes.push(KeyLane {
                        key: record.key.clone(),
                        records: vec![record],
                    });
                },
            }
        }

        Self {
            lanes: Mutex::new(lanes.into()),
            total_records,
        }
    }

    /// Remove the next lane, waiting at most `timeout` for the lock
    pub async fn claim(&self, timeout: Duration) -> Claim {
        match tokio::time::timeout(timeout, self.lanes.lock()).await {
            Ok(mut lanes) => match lanes.pop_front() {
                Some(lane) => Claim::Lane(lane),
                None => Claim::Drained,
            },
            Err(_) => Claim::TimedOut,
        }
    }

    /// Drop all unclaimed lanes, returning how many records were discarded.
    ///
    /// Workers see an empty queue on their next claim and exit.
    pub async fn close(&self) -> usize {
        let mut lanes = self.lanes.lock().await;
        let discarded = lanes.iter().map(|lane| lane.records.len()).sum();
        lanes.clear();
        discarded
    }

    pub async fn pending_lanes(&self) -> usize {
        self.lanes.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.lanes.lock().await.is_empty()
    }

    /// Records the queue was built with
    pub fn total_records(&self) -> usize {
        self.total_records
    }
}
