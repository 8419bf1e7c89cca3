//! Ingestion configuration
//!
//! Runtime settings come from the environment (a `.env` file is honoured);
//! target tables come from a JSON registry file.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::IngestError;
use crate::framework::{IngestionConfig, RetryPolicy, TargetDescriptor};

// ============================================================================
// Defaults
// ============================================================================

/// Default number of concurrent upload workers per table.
pub const DEFAULT_UPLOAD_WORKERS: usize = 20;

/// Default wait for the queue lock before a worker retries its claim.
pub const DEFAULT_CLAIM_TIMEOUT_MS: u64 = 500;

/// Default interval between worker liveness checks.
pub const DEFAULT_LIVENESS_POLL_MS: u64 = 100;

/// Default attempts per record, the first one included.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default pause between attempts.
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 1000;

/// Ingestion settings loaded from the environment
#[derive(Debug, Clone, Default)]
pub struct IngestConfig {
    /// Warehouse connection string; only required when writing to Postgres
    pub database_url: Option<String>,
    pub ingestion: IngestionConfig,
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> Result<T, IngestError> {
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| {
            IngestError::Configuration(format!("{} has an invalid value: {}", name, raw))
        }),
        Err(_) => Ok(default),
    }
}

impl IngestConfig {
    /// Load configuration from environment and defaults
    ///
    /// Environment variables:
    /// - `DATABASE_URL`
    /// - `INGEST_UPLOAD_WORKERS`
    /// - `INGEST_CLAIM_TIMEOUT_MS`
    /// - `INGEST_LIVENESS_POLL_MS`
    /// - `INGEST_MAX_ATTEMPTS`
    /// - `INGEST_RETRY_BACKOFF_MS`
    pub fn from_env() -> Result<Self, IngestError> {
        dotenvy::dotenv().ok();

        let config = IngestConfig {
            database_url: std::env::var("DATABASE_URL").ok().filter(|url| !url.is_empty()),
            ingestion: IngestionConfig {
                upload_workers: env_or("INGEST_UPLOAD_WORKERS", DEFAULT_UPLOAD_WORKERS)?,
                claim_timeout: Duration::from_millis(env_or(
                    "INGEST_CLAIM_TIMEOUT_MS",
                    DEFAULT_CLAIM_TIMEOUT_MS,
                )?),
                liveness_poll_interval: Duration::from_millis(env_or(
                    "INGEST_LIVENESS_POLL_MS",
                    DEFAULT_LIVENESS_POLL_MS,
                )?),
                retry: RetryPolicy {
                    max_attempts: env_or("INGEST_MAX_ATTEMPTS", DEFAULT_MAX_ATTEMPTS)?,
                    backoff: Duration::from_millis(env_or(
                        "INGEST_RETRY_BACKOFF_MS",
                        DEFAULT_RETRY_BACKOFF_MS,
                    )?),
                },
            },
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), IngestError> {
        let ingestion = &self.ingestion;

        if ingestion.upload_workers == 0 {
            return Err(IngestError::Configuration(
                "upload workers must be greater than 0".to_string(),
            ));
        }

        if ingestion.retry.max_attempts == 0 {
            return Err(IngestError::Configuration(
                "max attempts must be greater than 0".to_string(),
            ));
        }

        if ingestion.liveness_poll_interval.is_zero() {
            return Err(IngestError::Configuration(
                "liveness poll interval must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn require_database_url(&self) -> Result<&str, IngestError> {
        self.database_url
            .as_deref()
            .ok_or_else(|| IngestError::Configuration("DATABASE_URL is not set".to_string()))
    }
}

/// Registered target tables, in load order.
///
/// Order matters: tables referenced by foreign keys come first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetRegistry {
    targets: Vec<TargetDescriptor>,
}

impl TargetRegistry {
    pub fn new(targets: Vec<TargetDescriptor>) -> Result<Self, IngestError> {
        let registry = Self { targets };
        registry.validate()?;
        Ok(registry)
    }

    /// Parse a registry from JSON: `{"targets": [{"table_name": ..., ...}]}`
    pub fn from_json(json: &str) -> Result<Self, IngestError> {
        let registry: TargetRegistry = serde_json::from_str(json)
            .map_err(|e| IngestError::Configuration(format!("invalid target registry: {}", e)))?;
        registry.validate()?;
        Ok(registry)
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self, IngestError> {
        let path = path.as_ref();
        let json = tokio::fs::read_to_string(path).await.map_err(|e| {
            IngestError::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json(&json)
    }

    fn validate(&self) -> Result<(), IngestError> {
        let mut seen = HashSet::new();
        for target in &self.targets {
            target.validate()?;
            if !seen.insert(target.table_name.as_str()) {
                return Err(IngestError::Configuration(format!(
                    "table {} is registered twice",
                    target.table_name
                )));
            }
        }
        Ok(())
    }

    /// Descriptor for a source table name
    pub fn get(&self, table: &str) -> Option<&TargetDescriptor> {
        self.targets.iter().find(|t| t.table_name == table)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TargetDescriptor> {
        self.targets.iter()
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.targets.iter().map(|t| t.table_name.as_str())
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = IngestConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.ingestion.upload_workers, DEFAULT_UPLOAD_WORKERS);
        assert!(config.require_database_url().is_err());
    }

    #[test]
    fn test_zero_workers_rejected() {
        let mut config = IngestConfig::default();
        config.ingestion.upload_workers = 0;
        assert!(matches!(config.validate(), Err(IngestError::Configuration(_))));
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let mut config = IngestConfig::default();
        config.ingestion.retry.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_registry_from_json_keeps_order() {
        let registry = TargetRegistry::from_json(
            r#"{"targets": [
                {"table_name": "continent", "primary_key_columns": ["id"]},
                {"table_name": "driver", "schema": "f1db", "primary_key_columns": ["id"],
                 "text_columns": ["permanent_number"]}
            ]}"#,
        )
        .unwrap();

        assert_eq!(registry.table_names().collect::<Vec<_>>(), vec!["continent", "driver"]);
        let driver = registry.get("driver").unwrap();
        assert_eq!(driver.qualified_name(), "f1db.driver");
        assert_eq!(driver.text_columns, vec!["permanent_number".to_string()]);
        assert!(registry.get("race").is_none());
    }

    #[test]
    fn test_registry_rejects_duplicates_and_bad_targets() {
        let dup = r#"{"targets": [
            {"table_name": "country", "primary_key_columns": ["id"]},
            {"table_name": "country", "primary_key_columns": ["id"]}
        ]}"#;
        assert!(TargetRegistry::from_json(dup).is_err());

        let no_key = r#"{"targets": [{"table_name": "country", "primary_key_columns": []}]}"#;
        assert!(TargetRegistry::from_json(no_key).is_err());

        assert!(TargetRegistry::from_json("not json").is_err());
    }

    #[test]
    fn test_bundled_registry_parses() {
        let json = include_str!("../../../config/f1db-targets.json");
        let registry = TargetRegistry::from_json(json).unwrap();
        assert_eq!(registry.table_names().next(), Some("continent"));
        assert!(registry.get("season_entrant_driver").is_some());
    }
}
