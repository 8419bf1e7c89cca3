//! CSV staging files
//!
//! Parsed tables can be written out as one headered CSV per table and read
//! back for loading. Scraped sources arrive in the same shape.
//!
//! Staged files carry one type per column in the header (`name:text`,
//! `turns:integer`, `length:float`), so text that looks numeric, such as the
//! `007` chassis name, reads back as text. Headers without a type suffix get
//! one type inferred from the whole column: integer when every non-empty
//! cell is an integer, float when every one is numeric, text otherwise.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use f1dwh_common::{DwhError, FieldValue, Record, Result};
use tracing::debug;

use crate::dump::scalar::{is_decimal_token, is_integer_token};

fn csv_error(e: csv::Error) -> DwhError {
    DwhError::Io(e.into())
}

/// Storage type of one staged column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnType {
    Integer,
    Float,
    Text,
}

impl ColumnType {
    fn suffix(self) -> &'static str {
        match self {
            ColumnType::Integer => "integer",
            ColumnType::Float => "float",
            ColumnType::Text => "text",
        }
    }

    fn from_suffix(suffix: &str) -> Option<Self> {
        match suffix {
            "integer" => Some(ColumnType::Integer),
            "float" => Some(ColumnType::Float),
            "text" => Some(ColumnType::Text),
            _ => None,
        }
    }

    /// Type of a column of in-memory values.
    ///
    /// Columns mixing variants are staged as text, which keeps every value's
    /// canonical rendering.
    fn of_values<'a>(values: impl Iterator<Item = &'a FieldValue>) -> Self {
        let mut seen = None;
        for value in values {
            let ty = match value {
                FieldValue::Null => continue,
                FieldValue::Integer(_) => ColumnType::Integer,
                FieldValue::Float(_) => ColumnType::Float,
                FieldValue::Text(_) => ColumnType::Text,
            };
            match seen {
                None => seen = Some(ty),
                Some(prev) if prev == ty => {},
                Some(_) => return ColumnType::Text,
            }
        }
        seen.unwrap_or(ColumnType::Text)
    }

    /// Type of an untyped column of raw cells
    fn of_cells<'a>(cells: impl Iterator<Item = &'a str>) -> Self {
        let mut ty = None;
        for cell in cells.filter(|c| !c.is_empty()) {
            if is_integer_token(cell) && cell.parse::<i64>().is_ok() {
                if ty.is_none() {
                    ty = Some(ColumnType::Integer);
                }
            } else if is_decimal_token(cell) || is_integer_token(cell) {
                ty = Some(ColumnType::Float);
            } else {
                return ColumnType::Text;
            }
        }
        ty.unwrap_or(ColumnType::Text)
    }

    fn parse_cell(self, cell: &str) -> std::result::Result<FieldValue, String> {
        if cell.is_empty() {
            return Ok(FieldValue::Null);
        }
        match self {
            ColumnType::Integer => cell
                .parse::<i64>()
                .map(FieldValue::Integer)
                .map_err(|e| format!("'{}' is not an integer: {}", cell, e)),
            ColumnType::Float => cell
                .parse::<f64>()
                .map(FieldValue::Float)
                .map_err(|e| format!("'{}' is not a float: {}", cell, e)),
            ColumnType::Text => Ok(FieldValue::Text(cell.to_string())),
        }
    }
}

/// Split `name:type` into the column name and its declared type
fn split_header(header: &str) -> (String, Option<ColumnType>) {
    let header = header.trim();
    match header.rsplit_once(':') {
        Some((name, suffix)) => match ColumnType::from_suffix(suffix) {
            Some(ty) => (name.to_string(), Some(ty)),
            None => (header.to_string(), None),
        },
        None => (header.to_string(), None),
    }
}

/// Write `records` to `<dir>/<table>.csv`, returning the file path.
///
/// The header comes from the first record, each column tagged with its type.
/// Nulls are written as empty fields.
pub fn write_table_csv(dir: impl AsRef<Path>, table: &str, records: &[Record]) -> Result<PathBuf> {
    let dir = dir.as_ref();
    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!("{}.csv", table));

    let mut writer = csv::Writer::from_path(&path).map_err(csv_error)?;

    if let Some(first) = records.first() {
        if let Some(bad) = records.iter().find(|r| r.len() != first.len()) {
            return Err(DwhError::ColumnCountMismatch {
                expected: first.len(),
                actual: bad.len(),
            });
        }

        let header = first.columns().iter().enumerate().map(|(i, column)| {
            let ty = ColumnType::of_values(records.iter().map(|r| &r.values()[i]));
            format!("{}:{}", column, ty.suffix())
        });
        writer.write_record(header).map_err(csv_error)?;

        for record in records {
            writer
                .write_record(record.values().iter().map(|v| v.to_string()))
                .map_err(csv_error)?;
        }
    }

    writer.flush()?;
    debug!(path = %path.display(), rows = records.len(), "Wrote table CSV");
    Ok(path)
}

/// Read a headered CSV file into records, typing each column as a whole
pub fn read_table_csv(path: impl AsRef<Path>) -> Result<Vec<Record>> {
    let path = path.as_ref();
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .map_err(csv_error)?;

    let (names, declared): (Vec<String>, Vec<Option<ColumnType>>) =
        reader.headers().map_err(csv_error)?.iter().map(split_header).unzip();
    let columns: Arc<[String]> = names.into();

    let mut rows = Vec::new();
    for (row, result) in reader.records().enumerate() {
        let fields = result.map_err(|e| {
            DwhError::Parse(format!("{} row {}: {}", path.display(), row + 1, e))
        })?;
        rows.push(fields);
    }

    let types: Vec<ColumnType> = declared
        .iter()
        .enumerate()
        .map(|(i, ty)| match ty {
            Some(ty) => *ty,
            None => ColumnType::of_cells(rows.iter().filter_map(|r| r.get(i))),
        })
        .collect();

    let mut records = Vec::with_capacity(rows.len());
    for (row, fields) in rows.iter().enumerate() {
        let values = fields
            .iter()
            .zip(&types)
            .map(|(cell, ty)| ty.parse_cell(cell))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| DwhError::Parse(format!("{} row {}: {}", path.display(), row + 1, e)))?;
        records.push(Record::new(Arc::clone(&columns), values)?);
    }

    debug!(path = %path.display(), rows = records.len(), "Read table CSV");
    Ok(records)
}

/// Table name implied by a staging file name: `circuit.csv` -> `circuit`
pub fn table_name_from_path(path: impl AsRef<Path>) -> Option<String> {
    path.as_ref()
        .file_stem()
        .and_then(|stem| stem.to_str())
        .map(str::to_string)
}
