//! Shared helpers for the ingestion integration tests

#![allow(dead_code)]

use std::time::Duration;

use f1dwh_common::{FieldValue, Record};
use f1dwh_ingest::framework::{IngestionConfig, RetryPolicy, TargetDescriptor};

/// Initialize tracing for tests
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,f1dwh_ingest=debug")),
        )
        .with_test_writer()
        .try_init();
}

/// Fast timings so retry and liveness paths do not slow the suite down
pub fn fast_config() -> IngestionConfig {
    IngestionConfig {
        upload_workers: 4,
        claim_timeout: Duration::from_millis(50),
        liveness_poll_interval: Duration::from_millis(5),
        retry: RetryPolicy {
            max_attempts: 3,
            backoff: Duration::from_millis(2),
        },
    }
}

pub fn country_target() -> TargetDescriptor {
    TargetDescriptor::new("country", ["id"])
}

pub fn country(id: &str, name: &str) -> Record {
    Record::from_pairs([("id", FieldValue::from(id)), ("name", FieldValue::from(name))])
}

/// `count` distinct driver rows keyed by integer id
pub fn drivers(count: i64) -> Vec<Record> {
    (0..count)
        .map(|i| {
            Record::from_pairs([
                ("id", FieldValue::Integer(i)),
                ("name", FieldValue::from(format!("Driver {}", i))),
                ("permanent_number", FieldValue::Integer(i % 99 + 1)),
            ])
        })
        .collect()
}

pub fn driver_target() -> TargetDescriptor {
    TargetDescriptor::new("driver", ["id"]).with_text_columns(["permanent_number"])
}
