//! Dump-to-warehouse pipeline
//!
//! Parses a dump, then ingests every table that has a registered target, in
//! registry order. Parsed tables without a target are reported and skipped.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use f1dwh_common::Record;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::TargetRegistry;
use crate::csv_source::read_table_csv;
use crate::dump::{DumpParser, ParsedDump};
use crate::error::PipelineError;
use crate::framework::{IngestionConfig, IngestionCoordinator, IngestionSummary, VersionedStore};

/// Outcome of one pipeline run
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Per-table results, in load order
    pub tables: Vec<IngestionSummary>,
    /// Parsed tables with no registered target
    pub skipped_tables: Vec<String>,
    pub statements_skipped: usize,
    pub tuples_skipped: usize,
}

impl PipelineReport {
    fn new() -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4(),
            started_at: now,
            finished_at: now,
            tables: Vec::new(),
            skipped_tables: Vec::new(),
            statements_skipped: 0,
            tuples_skipped: 0,
        }
    }

    pub fn total_processed(&self) -> u64 {
        self.tables.iter().map(|t| t.processed).sum()
    }

    pub fn total_modified(&self) -> u64 {
        self.tables.iter().map(|t| t.modified).sum()
    }
}

pub struct IngestionPipeline<S: VersionedStore> {
    coordinator: IngestionCoordinator<S>,
    registry: TargetRegistry,
    parser: DumpParser,
}

impl<S: VersionedStore> IngestionPipeline<S> {
    pub fn new(
        store: Arc<S>,
        registry: TargetRegistry,
        config: IngestionConfig,
    ) -> Result<Self, PipelineError> {
        if registry.is_empty() {
            return Err(PipelineError::Configuration(
                "target registry is empty".to_string(),
            ));
        }

        Ok(Self {
            coordinator: IngestionCoordinator::new(store, config),
            registry,
            parser: DumpParser::new()?,
        })
    }

    pub fn registry(&self) -> &TargetRegistry {
        &self.registry
    }

    /// Parse a dump file and load it
    pub async fn run_dump_file(&self, path: impl AsRef<Path>) -> Result<PipelineReport, PipelineError> {
        let dump = self.parser.parse_file(path).await?;
        self.run_parsed(dump).await
    }

    /// Parse dump text and load it
    pub async fn run_dump(&self, text: &str) -> Result<PipelineReport, PipelineError> {
        let dump = self.parser.parse_str(text);
        self.run_parsed(dump).await
    }

    pub async fn run_parsed(&self, dump: ParsedDump) -> Result<PipelineReport, PipelineError> {
        let mut report = PipelineReport::new();
        report.statements_skipped = dump.statements_skipped;
        report.tuples_skipped = dump.tuples_skipped;

        info!(
            run_id = %report.run_id,
            tables = dump.tables.len(),
            records = dump.total_records(),
            "Starting pipeline run"
        );

        self.load_tables(dump.tables, &mut report).await?;

        report.finished_at = Utc::now();
        info!(
            run_id = %report.run_id,
            tables = report.tables.len(),
            processed = report.total_processed(),
            modified = report.total_modified(),
            skipped_tables = report.skipped_tables.len(),
            "Pipeline run complete"
        );

        Ok(report)
    }

    /// Load one staged CSV file into the target registered for `table`
    pub async fn run_csv(
        &self,
        table: &str,
        path: impl AsRef<Path>,
    ) -> Result<IngestionSummary, PipelineError> {
        let target = self.registry.get(table).ok_or_else(|| {
            PipelineError::Configuration(format!("no target registered for table {}", table))
        })?;

        let path = path.as_ref().to_path_buf();
        let records = tokio::task::spawn_blocking(move || read_table_csv(path))
            .await
            .map_err(|e| PipelineError::Configuration(format!("CSV reader task failed: {}", e)))??;

        self.coordinator
            .ingest_default(records, target)
            .await
            .map_err(|source| PipelineError::Ingest {
                table: table.to_string(),
                source,
            })
    }

    async fn load_tables(
        &self,
        mut tables: BTreeMap<String, Vec<Record>>,
        report: &mut PipelineReport,
    ) -> Result<(), PipelineError> {
        for target in self.registry.iter() {
            let Some(records) = tables.remove(&target.table_name) else {
                continue;
            };

            let summary = self
                .coordinator
                .ingest_default(records, target)
                .await
                .map_err(|source| PipelineError::Ingest {
                    table: target.table_name.clone(),
                    source,
                })?;
            report.tables.push(summary);
        }

        for table in tables.into_keys() {
            warn!(table = %table, "No target registered, skipping table");
            report.skipped_tables.push(table);
        }

        Ok(())
    }
}
