//! F1 DWH Ingest - warehouse loading tool

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use f1dwh_common::logging::{init_logging, LogConfig, LogLevel};
use f1dwh_ingest::config::{IngestConfig, TargetRegistry};
use f1dwh_ingest::csv_source::{table_name_from_path, write_table_csv};
use f1dwh_ingest::dump::DumpParser;
use f1dwh_ingest::framework::{MemoryStore, PgStore, VersionedStore};
use f1dwh_ingest::pipeline::IngestionPipeline;
use serde::Serialize;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "f1dwh-ingest")]
#[command(author, version, about = "F1 warehouse ingestion tool")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Parse a dump and write one CSV per table
    Parse {
        /// SQL dump file
        dump: PathBuf,

        /// Output directory
        #[arg(short, long, default_value = "./data/f1db")]
        out: PathBuf,
    },

    /// Parse a dump and load every registered table
    Load {
        /// SQL dump file
        dump: PathBuf,

        #[command(flatten)]
        target: TargetArgs,
    },

    /// Load one staged CSV file
    LoadCsv {
        /// CSV file with a header row
        csv: PathBuf,

        /// Registered table to load into; defaults to the file name
        #[arg(short, long)]
        table: Option<String>,

        #[command(flatten)]
        target: TargetArgs,
    },
}

#[derive(clap::Args, Debug)]
struct TargetArgs {
    /// Target registry (JSON)
    #[arg(long, default_value = "config/f1db-targets.json")]
    targets: PathBuf,

    /// Upload workers per table, overriding INGEST_UPLOAD_WORKERS
    #[arg(short, long)]
    workers: Option<usize>,

    /// Load into an in-memory store instead of the database
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    // Environment variables take precedence over the flags
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("f1dwh-ingest")
        .build()
        .with_env_overrides()?;

    init_logging(&log_config)?;

    match cli.command {
        Command::Parse { dump, out } => parse(&dump, &out).await,
        Command::Load { dump, target } => {
            let pipeline = build(&target).await?;
            match pipeline {
                Pipeline::Postgres(p) => print_json(&p.run_dump_file(&dump).await?),
                Pipeline::DryRun(p) => print_json(&p.run_dump_file(&dump).await?),
            }
        },
        Command::LoadCsv { csv, table, target } => {
            let table = match table.or_else(|| table_name_from_path(&csv)) {
                Some(table) => table,
                None => anyhow::bail!("cannot infer a table name from {}", csv.display()),
            };
            let pipeline = build(&target).await?;
            match pipeline {
                Pipeline::Postgres(p) => print_json(&p.run_csv(&table, &csv).await?),
                Pipeline::DryRun(p) => print_json(&p.run_csv(&table, &csv).await?),
            }
        },
    }
}

enum Pipeline {
    Postgres(IngestionPipeline<PgStore>),
    DryRun(IngestionPipeline<MemoryStore>),
}

async fn build(args: &TargetArgs) -> Result<Pipeline> {
    let mut config = IngestConfig::from_env()?;
    if let Some(workers) = args.workers {
        config.ingestion.upload_workers = workers;
        config.validate()?;
    }

    let registry = TargetRegistry::load(&args.targets).await?;
    info!(
        targets = registry.len(),
        workers = config.ingestion.upload_workers,
        dry_run = args.dry_run,
        "Loaded target registry"
    );

    if args.dry_run {
        return Ok(Pipeline::DryRun(new_pipeline(MemoryStore::new(), registry, &config)?));
    }

    let store = PgStore::new(config.require_database_url()?);
    Ok(Pipeline::Postgres(new_pipeline(store, registry, &config)?))
}

fn new_pipeline<S: VersionedStore>(
    store: S,
    registry: TargetRegistry,
    config: &IngestConfig,
) -> Result<IngestionPipeline<S>> {
    Ok(IngestionPipeline::new(Arc::new(store), registry, config.ingestion.clone())?)
}

async fn parse(dump: &Path, out: &Path) -> Result<()> {
    let parsed = DumpParser::new()?.parse_file(dump).await?;

    for (table, records) in &parsed.tables {
        let path = write_table_csv(out, table, records)
            .with_context(|| format!("Failed to stage table {}", table))?;
        info!(table = %table, rows = records.len(), path = %path.display(), "Staged table");
    }

    info!(
        tables = parsed.tables.len(),
        records = parsed.total_records(),
        skipped_statements = parsed.statements_skipped,
        skipped_tuples = parsed.tuples_skipped,
        "Parse complete"
    );
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
