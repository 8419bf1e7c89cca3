//! Typed scalars and tabular records shared by the parser and the loaders

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{DwhError, Result};

/// Values the upstream loaders treated as "missing" when reading staged files.
///
/// Any text field holding one of these is normalised to [`FieldValue::Null`]
/// before fingerprinting, so absence hashes the same however it was spelled.
pub const MISSING_MARKERS: &[&str] = &[
    "",
    "#N/A",
    "#N/A N/A",
    "#NA",
    "-1.#IND",
    "-1.#QNAN",
    "1.#IND",
    "1.#QNAN",
    "NaN",
    "nan",
    "NULL",
    "null",
];

/// A single typed scalar taken from a dump or a staged CSV file
///
/// Serialises as the bare JSON scalar (`null`, `7`, `5.793`, `"GBR"`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Integer(i64),
    Float(f64),
    Text(String),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Whether this value is one of the sentinel spellings of "missing"
    pub fn is_missing_marker(&self) -> bool {
        match self {
            FieldValue::Null => true,
            FieldValue::Float(f) => f.is_nan(),
            FieldValue::Text(s) => MISSING_MARKERS.contains(&s.as_str()),
            FieldValue::Integer(_) => false,
        }
    }
}

/// Canonical text rendering.
///
/// Used both for fingerprints and for binding values as text in the storage
/// layer. `Null` renders as the empty string; after missing-value
/// normalisation no text value can be empty, so the rendering is unambiguous.
impl std::fmt::Display for FieldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldValue::Null => Ok(()),
            FieldValue::Integer(i) => write!(f, "{}", i),
            FieldValue::Float(v) => write!(f, "{}", v),
            FieldValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Text(s)
    }
}

impl From<i64> for FieldValue {
    fn from(i: i64) -> Self {
        FieldValue::Integer(i)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

/// One row of a table: values in the column order declared by its source.
///
/// Records parsed from the same statement share a single column list.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    columns: Arc<[String]>,
    values: Vec<FieldValue>,
}

impl Record {
    /// Build a record, checking that every column has exactly one value
    pub fn new(columns: Arc<[String]>, values: Vec<FieldValue>) -> Result<Self> {
        if columns.len() != values.len() {
            return Err(DwhError::ColumnCountMismatch {
                expected: columns.len(),
                actual: values.len(),
            });
        }
        Ok(Self { columns, values })
    }

    /// Build a record from `(column, value)` pairs, keeping their order
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<FieldValue>,
    {
        let (columns, values): (Vec<String>, Vec<FieldValue>) =
            pairs.into_iter().map(|(k, v)| (k.into(), v.into())).unzip();
        Self {
            columns: columns.into(),
            values,
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn shared_columns(&self) -> Arc<[String]> {
        Arc::clone(&self.columns)
    }

    pub fn values(&self) -> &[FieldValue] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn position(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }

    pub fn get(&self, column: &str) -> Option<&FieldValue> {
        self.position(column).map(|i| &self.values[i])
    }

    pub fn get_mut(&mut self, column: &str) -> Option<&mut FieldValue> {
        self.position(column).map(move |i| &mut self.values[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.columns
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }

    /// Replace every sentinel "missing" value with an explicit null
    pub fn normalize_missing(&mut self) {
        for value in &mut self.values {
            if value.is_missing_marker() {
                *value = FieldValue::Null;
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_record_rejects_wrong_arity() {
        let columns: Arc<[String]> = vec!["id".to_string(), "name".to_string()].into();
        let err = Record::new(columns, vec![FieldValue::from("GBR")]).unwrap_err();
        assert!(matches!(
            err,
            DwhError::ColumnCountMismatch {
                expected: 2,
                actual: 1
            }
        ));
    }

    #[test]
    fn test_record_lookup_by_column() {
        let record = Record::from_pairs([("id", FieldValue::from("GBR")), ("rank", 3i64.into())]);
        assert_eq!(record.get("id"), Some(&FieldValue::Text("GBR".into())));
        assert_eq!(record.get("rank"), Some(&FieldValue::Integer(3)));
        assert_eq!(record.get("missing"), None);
        assert_eq!(record.columns(), &["id".to_string(), "rank".to_string()]);
    }

    #[test]
    fn test_normalize_missing_markers() {
        let mut record = Record::from_pairs([
            ("a", FieldValue::from("#N/A")),
            ("b", FieldValue::from("null")),
            ("c", FieldValue::Float(f64::NAN)),
            ("d", FieldValue::from("")),
            ("e", FieldValue::from("Monza")),
            ("f", FieldValue::Integer(0)),
        ]);
        record.normalize_missing();

        let values = record.values();
        assert!(values[..4].iter().all(FieldValue::is_null));
        assert_eq!(values[4], FieldValue::from("Monza"));
        assert_eq!(values[5], FieldValue::Integer(0));
    }

    #[test]
    fn test_display_rendering() {
        assert_eq!(FieldValue::Null.to_string(), "");
        assert_eq!(FieldValue::Integer(-12).to_string(), "-12");
        assert_eq!(FieldValue::Float(3.5).to_string(), "3.5");
        assert_eq!(FieldValue::from("V6").to_string(), "V6");
    }

    #[test]
    fn test_field_value_serialises_as_bare_scalar() {
        let values = vec![
            FieldValue::Null,
            FieldValue::Integer(7),
            FieldValue::Float(5.793),
            FieldValue::from("007"),
        ];
        let json = serde_json::to_string(&values).unwrap();
        assert_eq!(json, r#"[null,7,5.793,"007"]"#);

        let back: Vec<FieldValue> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, values);
    }
}
