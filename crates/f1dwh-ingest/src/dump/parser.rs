//! f1db SQL dump parser
//!
//! Turns a dump of batched `INSERT INTO <table> (<cols>) VALUES (...), (...);`
//! statements into typed records grouped by table.
//!
//! # Format
//! ```text
//! -- comments, DDL and blank lines are ignored
//! CREATE TABLE country (...);
//! INSERT INTO `country` (`id`, `name`) VALUES ('GBR','United Kingdom'),('DEU','Germany');
//! ```
//!
//! Only lines whose trimmed text starts with `INSERT INTO` are considered.
//! A statement that does not have the expected shape is skipped, never an
//! error: dumps carry statements this loader has no use for.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use f1dwh_common::{DwhError, FieldValue, Record, Result};
use regex::Regex;
use tracing::{debug, info, warn};

use super::patches::patch_known_defect;
use super::scalar::infer_sql_token;
use super::scanner::{split_fields, split_tuples};

const INSERT_KEYWORD: &[u8] = b"INSERT INTO";

/// Tables parsed from one dump
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedDump {
    /// Records per table, in statement order
    pub tables: BTreeMap<String, Vec<Record>>,
    /// Lines that looked like `INSERT INTO` statements
    pub statements_seen: usize,
    /// Statements dropped because their shape was not recognised
    pub statements_skipped: usize,
    /// Tuples dropped because their arity did not match the column list
    pub tuples_skipped: usize,
}

impl ParsedDump {
    pub fn table(&self, name: &str) -> Option<&[Record]> {
        self.tables.get(name).map(Vec::as_slice)
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    pub fn total_records(&self) -> usize {
        self.tables.values().map(Vec::len).sum()
    }
}

/// Parser for f1db `INSERT` dumps
#[derive(Debug, Clone)]
pub struct DumpParser {
    statement: Regex,
    /// When set, statements for other tables are skipped without tuple parsing
    table_filter: Option<HashSet<String>>,
}

impl DumpParser {
    /// Create a parser that keeps every table
    pub fn new() -> Result<Self> {
        let statement = Regex::new(
            r#"(?is)^INSERT\s+INTO\s+(?:[`"]?\w+[`"]?\.)?[`"]?(\w+)[`"]?\s*\((.*?)\)\s*VALUES\s*(.*)$"#,
        )
        .map_err(|e| DwhError::Parse(format!("invalid statement pattern: {}", e)))?;

        Ok(Self {
            statement,
            table_filter: None,
        })
    }

    /// Only keep the named tables
    pub fn with_tables<I, S>(mut self, tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.table_filter = Some(tables.into_iter().map(Into::into).collect());
        self
    }

    fn wants(&self, table: &str) -> bool {
        self.table_filter
            .as_ref()
            .is_none_or(|tables| tables.contains(table))
    }

    /// Read and parse a dump file
    pub async fn parse_file(&self, path: impl AsRef<Path>) -> Result<ParsedDump> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await?;
        info!(path = %path.display(), bytes = content.len(), "Parsing dump file");
        Ok(self.parse_str(&content))
    }

    /// Parse the full text of a dump
    pub fn parse_str(&self, content: &str) -> ParsedDump {
        let mut dump = ParsedDump::default();

        for (line_num, line) in content.lines().enumerate() {
            let trimmed = line.trim();
            if !is_insert_line(trimmed) {
                continue;
            }

            dump.statements_seen += 1;
            if !self.parse_statement(trimmed, line_num + 1, &mut dump) {
                dump.statements_skipped += 1;
            }
        }

        debug!(
            tables = dump.tables.len(),
            records = dump.total_records(),
            statements = dump.statements_seen,
            skipped_statements = dump.statements_skipped,
            skipped_tuples = dump.tuples_skipped,
            "Parsed dump"
        );

        dump
    }

    /// Parse one statement into `dump`; returns false when it was skipped
    fn parse_statement(&self, statement: &str, line_num: usize, dump: &mut ParsedDump) -> bool {
        let Some(caps) = self.statement.captures(statement) else {
            debug!(line = line_num, "Skipping unrecognised INSERT statement");
            return false;
        };

        let table = &caps[1];
        if !self.wants(table) {
            return true;
        }

        let columns: Arc<[String]> = caps[2]
            .split(',')
            .map(|c| c.trim().trim_matches(|ch| ch == '`' || ch == '"').to_string())
            .collect::<Vec<_>>()
            .into();

        if columns.iter().any(String::is_empty) {
            debug!(line = line_num, table, "Skipping statement with an empty column name");
            return false;
        }

        let values_block = caps[3].trim().trim_end_matches(';');
        let tuples = split_tuples(values_block);
        if tuples.is_empty() {
            debug!(line = line_num, table, "Skipping statement without value tuples");
            return false;
        }

        let rows = dump.tables.entry(table.to_string()).or_default();

        for tuple in tuples {
            let mut values: Vec<FieldValue> =
                split_fields(tuple).into_iter().map(infer_sql_token).collect();

            if let Some(patch) = patch_known_defect(&mut values) {
                debug!(line = line_num, table, patch, "Applied known data correction");
            }

            match Record::new(Arc::clone(&columns), values) {
                Ok(record) => rows.push(record),
                Err(e) => {
                    warn!(line = line_num, table, error = %e, "Skipping tuple");
                    dump.tuples_skipped += 1;
                },
            }
        }

        true
    }
}

fn is_insert_line(trimmed: &str) -> bool {
    trimmed.len() >= INSERT_KEYWORD.len()
        && trimmed.as_bytes()[..INSERT_KEYWORD.len()].eq_ignore_ascii_case(INSERT_KEYWORD)
}
