//! Change-tracked upsert of a single record
//!
//! Inside one transaction: look up the current row for the key, then insert
//! when there is none, update in place when the fingerprint differs, or do
//! nothing when it matches. Any failure rolls the transaction back.

use tracing::warn;

use super::storage::{StorageError, StoreSession};
use super::types::{ChangeTrackedRecord, TargetDescriptor, UpsertOutcome};

/// Apply one record in its own transaction
pub async fn apply<S>(
    session: &mut S,
    target: &TargetDescriptor,
    record: &ChangeTrackedRecord,
) -> Result<UpsertOutcome, StorageError>
where
    S: StoreSession + ?Sized,
{
    session.begin().await?;

    let result = match decide(session, target, record).await {
        Ok(outcome) => session.commit().await.map(|()| outcome),
        Err(e) => Err(e),
    };

    if result.is_err() {
        if let Err(rollback_err) = session.rollback().await {
            warn!(key = %record.key, error = %rollback_err, "Rollback failed");
        }
    }

    result
}

async fn decide<S>(
    session: &mut S,
    target: &TargetDescriptor,
    record: &ChangeTrackedRecord,
) -> Result<UpsertOutcome, StorageError>
where
    S: StoreSession + ?Sized,
{
    match session.find_current(target, &record.key).await? {
        None => {
            session.insert_version(target, record).await?;
            Ok(UpsertOutcome::Inserted)
        },
        Some(stored) if stored.fingerprint == record.fingerprint => Ok(UpsertOutcome::Unchanged),
        Some(_) => {
            session.update_version(target, record).await?;
            Ok(UpsertOutcome::Updated)
        },
    }
}
