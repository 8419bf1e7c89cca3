//! Ingestion framework tests against the in-memory store
//!
//! Covers change detection across repeated loads, concurrent workers,
//! retry of transient failures and propagation of fatal ones.

mod common;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use common::{country, country_target, driver_target, drivers, fast_config, init_tracing};
use f1dwh_common::{FieldValue, Record};
use f1dwh_ingest::config::TargetRegistry;
use f1dwh_ingest::framework::{
    ChangeTrackedRecord, IngestionCoordinator, MemoryStore, TargetDescriptor,
};
use f1dwh_ingest::pipeline::IngestionPipeline;
use f1dwh_ingest::{IngestError, PipelineError};

fn coordinator(store: &MemoryStore) -> IngestionCoordinator<MemoryStore> {
    IngestionCoordinator::new(Arc::new(store.clone()), fast_config())
}

fn key_of(record: Record, target: &TargetDescriptor) -> f1dwh_ingest::framework::KeyProjection {
    ChangeTrackedRecord::prepare(record, target, Utc::now())
        .expect("valid record")
        .key
}

#[tokio::test]
async fn test_first_load_inserts_everything() -> Result<()> {
    init_tracing();
    let store = MemoryStore::new();

    let summary = coordinator(&store)
        .ingest(
            vec![country("GBR", "United Kingdom"), country("DEU", "Germany")],
            &country_target(),
            2,
        )
        .await?;

    assert_eq!(summary.processed, 2);
    assert_eq!(summary.modified, 2);
    assert_eq!(summary.inserted, 2);

    let rows = store.rows("country").await;
    assert_eq!(rows.len(), 2);
    for row in &rows {
        assert_eq!(row.valid_from, row.modified_at);
        assert!(row.valid_to.is_none());
        assert_eq!(row.fingerprint.len(), 96);
    }
    Ok(())
}

#[tokio::test]
async fn test_reload_of_same_data_changes_nothing() -> Result<()> {
    init_tracing();
    let store = MemoryStore::new();
    let batch = || vec![country("GBR", "United Kingdom"), country("DEU", "Germany")];

    coordinator(&store).ingest(batch(), &country_target(), 2).await?;
    let before = store.rows("country").await;

    let summary = coordinator(&store).ingest(batch(), &country_target(), 2).await?;
    assert_eq!(summary.processed, 2);
    assert_eq!(summary.modified, 0);
    assert_eq!(summary.unchanged, 2);
    assert_eq!(store.rows("country").await, before);
    Ok(())
}

#[tokio::test]
async fn test_changed_row_is_updated_in_place() -> Result<()> {
    init_tracing();
    let store = MemoryStore::new();
    let target = country_target();

    coordinator(&store)
        .ingest(
            vec![country("GBR", "Great Britain"), country("DEU", "Germany")],
            &target,
            2,
        )
        .await?;
    let key = key_of(country("GBR", ""), &target);
    let original = store.current("country", &key).await.expect("GBR stored");

    tokio::time::sleep(Duration::from_millis(5)).await;
    let summary = coordinator(&store)
        .ingest(
            vec![country("GBR", "United Kingdom"), country("DEU", "Germany")],
            &target,
            2,
        )
        .await?;

    assert_eq!(summary.processed, 2);
    assert_eq!(summary.modified, 1);
    assert_eq!(summary.updated, 1);

    let updated = store.current("country", &key).await.expect("GBR stored");
    assert_eq!(updated.record.get("name"), Some(&FieldValue::from("United Kingdom")));
    assert_eq!(updated.valid_from, original.valid_from);
    assert!(updated.modified_at > original.modified_at);
    assert_ne!(updated.fingerprint, original.fingerprint);
    assert_eq!(store.rows("country").await.len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_many_records_few_workers_each_processed_once() -> Result<()> {
    init_tracing();
    let store = MemoryStore::new();
    store.set_latency(Duration::from_micros(200)).await;

    let summary = coordinator(&store).ingest(drivers(500), &driver_target(), 8).await?;

    assert_eq!(summary.processed, 500);
    assert_eq!(summary.inserted, 500);
    assert_eq!(summary.workers, 8);
    assert_eq!(store.writes_committed(), 500);
    assert_eq!(store.rows("driver").await.len(), 500);
    assert_eq!(store.sessions_opened(), 8);
    Ok(())
}

#[tokio::test]
async fn test_more_workers_than_records() -> Result<()> {
    let store = MemoryStore::new();
    let summary = coordinator(&store).ingest(drivers(3), &driver_target(), 16).await?;
    assert_eq!(summary.processed, 3);
    assert_eq!(store.rows("driver").await.len(), 3);
    Ok(())
}

#[tokio::test]
async fn test_text_columns_are_stored_as_integer_text() -> Result<()> {
    let store = MemoryStore::new();
    let record = Record::from_pairs([
        ("id", FieldValue::from("lewis-hamilton")),
        ("permanent_number", FieldValue::Float(44.0)),
    ]);
    coordinator(&store).ingest(vec![record], &driver_target(), 1).await?;

    let rows = store.rows("driver").await;
    assert_eq!(rows[0].record.get("permanent_number"), Some(&FieldValue::from("44")));
    Ok(())
}

#[tokio::test]
async fn test_duplicate_keys_in_one_batch_keep_the_last_record() -> Result<()> {
    init_tracing();
    let store = MemoryStore::new();

    let summary = coordinator(&store)
        .ingest(
            vec![
                country("GBR", "Great Britain"),
                country("DEU", "Germany"),
                country("GBR", "United Kingdom"),
            ],
            &country_target(),
            4,
        )
        .await?;

    assert_eq!(summary.processed, 3);
    assert_eq!(summary.inserted, 2);
    assert_eq!(summary.updated, 1);

    let key = key_of(country("GBR", ""), &country_target());
    let row = store.current("country", &key).await.expect("GBR stored");
    assert_eq!(row.record.get("name"), Some(&FieldValue::from("United Kingdom")));
    assert_eq!(store.rows("country").await.len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_transient_failures_are_retried() -> Result<()> {
    init_tracing();
    let store = MemoryStore::new();
    store.inject_transient("id=GBR", 2).await;

    let summary = coordinator(&store)
        .ingest(
            vec![country("GBR", "United Kingdom"), country("DEU", "Germany")],
            &country_target(),
            2,
        )
        .await?;

    assert_eq!(summary.processed, 2);
    assert_eq!(store.rows("country").await.len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_exhausted_retries_fail_the_call() -> Result<()> {
    init_tracing();
    let store = MemoryStore::new();
    store.inject_transient("id=GBR", 10).await;

    let err = coordinator(&store)
        .ingest(vec![country("GBR", "United Kingdom")], &country_target(), 1)
        .await
        .expect_err("retries exhausted");

    match err {
        IngestError::FatalUpsert {
            table,
            key,
            attempts,
            source,
        } => {
            assert_eq!(table, "country");
            assert_eq!(key, "id=GBR");
            assert_eq!(attempts, 3);
            assert!(source.is_transient());
        },
        other => panic!("unexpected error: {other}"),
    }
    Ok(())
}

#[tokio::test]
async fn test_fatal_failure_stops_all_workers() -> Result<()> {
    init_tracing();
    let store = MemoryStore::new();
    store.inject_fatal("id=250").await;
    store.set_latency(Duration::from_micros(200)).await;

    let result = tokio::time::timeout(
        Duration::from_secs(30),
        coordinator(&store).ingest(drivers(2000), &driver_target(), 4),
    )
    .await
    .expect("ingest returned instead of hanging");

    let err = result.expect_err("fatal failure");
    assert_eq!(err.failed_key(), Some("id=250"));
    assert!(matches!(err, IngestError::FatalUpsert { attempts: 1, .. }));

    // Remaining work was abandoned rather than loaded
    assert!(store.rows("driver").await.len() < 2000);
    Ok(())
}

#[tokio::test]
async fn test_empty_batch_is_a_no_op() -> Result<()> {
    let store = MemoryStore::new();
    let summary = coordinator(&store).ingest(Vec::new(), &country_target(), 4).await?;

    assert_eq!(summary.processed, 0);
    assert_eq!(summary.modified, 0);
    assert_eq!(store.sessions_opened(), 0);
    Ok(())
}

#[tokio::test]
async fn test_invalid_configuration_fails_before_work() -> Result<()> {
    let store = MemoryStore::new();

    let err = coordinator(&store)
        .ingest(vec![country("GBR", "United Kingdom")], &country_target(), 0)
        .await
        .expect_err("zero workers");
    assert!(matches!(err, IngestError::Configuration(_)));

    let no_key = TargetDescriptor::new("country", Vec::<String>::new());
    let err = coordinator(&store)
        .ingest(vec![country("GBR", "United Kingdom")], &no_key, 2)
        .await
        .expect_err("no key");
    assert!(matches!(err, IngestError::Configuration(_)));

    assert_eq!(store.sessions_opened(), 0);
    assert!(store.rows("country").await.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_record_without_key_is_rejected() -> Result<()> {
    let store = MemoryStore::new();
    let record = Record::from_pairs([("name", FieldValue::from("Germany"))]);

    let err = coordinator(&store)
        .ingest(vec![record], &country_target(), 2)
        .await
        .expect_err("missing key");
    assert!(matches!(err, IngestError::InvalidRecord { .. }));
    assert_eq!(store.sessions_opened(), 0);
    Ok(())
}

#[tokio::test]
async fn test_pipeline_dump_reload_is_idempotent() -> Result<()> {
    init_tracing();
    let dump = "INSERT INTO `continent` (`id`, `code`, `name`) VALUES ('europe','EU','Europe');\n\
                INSERT INTO `country` (`id`, `continent_id`, `name`) VALUES ('GBR','europe','United Kingdom'),('DEU','europe','Germany');\n\
                INSERT INTO `chassis` (`id`, `constructor_id`, `name`, `full_name`) VALUES ('bar-007','bar','006','BAR 006');";

    let registry = TargetRegistry::new(vec![
        TargetDescriptor::new("continent", ["id"]),
        TargetDescriptor::new("country", ["id"]),
        TargetDescriptor::new("chassis", ["id"]),
    ])?;
    let store = Arc::new(MemoryStore::new());
    let pipeline = IngestionPipeline::new(Arc::clone(&store), registry, fast_config())?;

    let first = pipeline.run_dump(dump).await?;
    assert_eq!(first.total_processed(), 4);
    assert_eq!(first.total_modified(), 4);

    let chassis = store.rows("chassis").await;
    assert_eq!(chassis[0].record.get("full_name"), Some(&FieldValue::from("BAR 007")));

    let second = pipeline.run_dump(dump).await?;
    assert_eq!(second.total_processed(), 4);
    assert_eq!(second.total_modified(), 0);
    assert_ne!(first.run_id, second.run_id);
    Ok(())
}

#[tokio::test]
async fn test_pipeline_reports_failing_table() -> Result<()> {
    let registry = TargetRegistry::new(vec![country_target()])?;
    let store = Arc::new(MemoryStore::new());
    store.inject_fatal("id=GBR").await;
    let pipeline = IngestionPipeline::new(Arc::clone(&store), registry, fast_config())?;

    let err = pipeline
        .run_dump("INSERT INTO country (id, name) VALUES ('GBR','United Kingdom');")
        .await
        .expect_err("fatal upsert");

    match err {
        PipelineError::Ingest { table, source } => {
            assert_eq!(table, "country");
            assert_eq!(source.failed_key(), Some("id=GBR"));
        },
        other => panic!("unexpected error: {other}"),
    }
    Ok(())
}

#[tokio::test]
async fn test_pipeline_loads_staged_csv() -> Result<()> {
    let dir = tempfile::TempDir::new()?;
    let path = f1dwh_ingest::csv_source::write_table_csv(
        dir.path(),
        "country",
        &[country("GBR", "United Kingdom"), country("ITA", "Italy")],
    )?;

    let registry = TargetRegistry::new(vec![country_target()])?;
    let store = Arc::new(MemoryStore::new());
    let pipeline = IngestionPipeline::new(Arc::clone(&store), registry, fast_config())?;

    let summary = pipeline.run_csv("country", &path).await?;
    assert_eq!(summary.inserted, 2);

    let err = pipeline.run_csv("race", &path).await.expect_err("unregistered");
    assert!(matches!(err, PipelineError::Configuration(_)));
    Ok(())
}

#[tokio::test]
async fn test_staged_csv_and_dump_loads_agree() -> Result<()> {
    init_tracing();
    let dump = "INSERT INTO `chassis` (`id`, `constructor_id`, `name`, `full_name`) VALUES ('bar-007','bar','006','BAR 006');";
    let parsed = f1dwh_ingest::dump::DumpParser::new()?.parse_str(dump);

    let dir = tempfile::TempDir::new()?;
    let path = f1dwh_ingest::csv_source::write_table_csv(
        dir.path(),
        "chassis",
        parsed.table("chassis").expect("chassis table"),
    )?;

    let registry = TargetRegistry::new(vec![TargetDescriptor::new("chassis", ["id"])])?;
    let store = Arc::new(MemoryStore::new());
    let pipeline = IngestionPipeline::new(Arc::clone(&store), registry, fast_config())?;

    let staged = pipeline.run_csv("chassis", &path).await?;
    assert_eq!(staged.inserted, 1);
    let rows = store.rows("chassis").await;
    assert_eq!(rows[0].record.get("name"), Some(&FieldValue::from("007")));

    let reloaded = pipeline.run_dump(dump).await?;
    assert_eq!(reloaded.total_processed(), 1);
    assert_eq!(reloaded.total_modified(), 0);
    Ok(())
}
