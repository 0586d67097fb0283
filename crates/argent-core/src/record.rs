//! Typed rows and record batches with canonical business-key encoding.
//!
//! Rows are ordered column → value maps so their serialized form is
//! deterministic regardless of how they were assembled. Business keys are
//! encoded to a canonical, URL-safe string so merge grouping and tie-breaks
//! never depend on in-memory hash ordering.
//!
//! # Canonical Key Encoding
//!
//! ```text
//! KEY_CANONICAL ::= segment ("," segment)*
//! segment       ::= column "=" type_tag ":" encoded_value
//!
//! type_tag ::=
//!   "s" (text)  | "i" (int64)     | "f" (float64) | "b" (bool)
//!   "d" (date)  | "t" (timestamp) | "n" (null)
//!
//! encoded_value ::=
//!   For "s": base64url_no_pad(utf8_bytes)
//!   For "i"/"f": decimal representation
//!   For "b": "true" | "false"
//!   For "d": "YYYY-MM-DD"
//!   For "t": RFC 3339 UTC
//!   For "n": "null"
//! ```
//!
//! Segments follow the configured business-key order, not alphabetical
//! order: the key columns are an ordered set.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Scalar value stored in a row cell.
///
/// Floats are allowed in row data (unlike canonical metadata), but every
/// comparison on them goes through [`FieldValue::total_cmp`] so ordering is
/// total and deterministic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// Explicit null.
    Null,
    /// Boolean value.
    Boolean(bool),
    /// 64-bit signed integer.
    Int64(i64),
    /// 64-bit float.
    Float64(f64),
    /// Calendar date.
    Date(NaiveDate),
    /// UTC timestamp.
    Timestamp(DateTime<Utc>),
    /// Arbitrary text.
    Text(String),
}

impl FieldValue {
    /// Returns the canonical representation with type tag.
    ///
    /// Text values are base64url encoded (no padding) for URL safety.
    #[must_use]
    pub fn canonical_repr(&self) -> String {
        match self {
            Self::Null => "n:null".to_string(),
            Self::Boolean(b) => format!("b:{}", if *b { "true" } else { "false" }),
            Self::Int64(n) => format!("i:{n}"),
            Self::Float64(x) => format!("f:{x}"),
            Self::Date(d) => format!("d:{d}"),
            Self::Timestamp(ts) => format!("t:{}", ts.to_rfc3339_opts(SecondsFormat::Micros, true)),
            Self::Text(s) => format!("s:{}", URL_SAFE_NO_PAD.encode(s.as_bytes())),
        }
    }

    /// Returns true if the value is null.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Total, deterministic ordering across all variants.
    ///
    /// Values of the same type compare naturally (floats via `total_cmp`,
    /// so NaN has a defined place). `Int64` and `Float64` compare
    /// numerically against each other; otherwise differing variants compare
    /// by a fixed type rank. Null sorts first.
    #[must_use]
    pub fn total_cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Null, Self::Null) => Ordering::Equal,
            (Self::Boolean(a), Self::Boolean(b)) => a.cmp(b),
            (Self::Int64(a), Self::Int64(b)) => a.cmp(b),
            (Self::Float64(a), Self::Float64(b)) => a.total_cmp(b),
            #[allow(clippy::cast_precision_loss)]
            (Self::Int64(a), Self::Float64(b)) => (*a as f64).total_cmp(b),
            #[allow(clippy::cast_precision_loss)]
            (Self::Float64(a), Self::Int64(b)) => a.total_cmp(&(*b as f64)),
            (Self::Date(a), Self::Date(b)) => a.cmp(b),
            (Self::Timestamp(a), Self::Timestamp(b)) => a.cmp(b),
            (Self::Text(a), Self::Text(b)) => a.cmp(b),
            _ => self.type_rank().cmp(&other.type_rank()),
        }
    }

    fn type_rank(&self) -> u8 {
        match self {
            Self::Null => 0,
            Self::Boolean(_) => 1,
            Self::Int64(_) | Self::Float64(_) => 2,
            Self::Date(_) => 3,
            Self::Timestamp(_) => 4,
            Self::Text(_) => 5,
        }
    }

    /// Extracts the calendar date carried by this value, if any.
    ///
    /// Dates pass through, timestamps are truncated to their UTC date, and
    /// text is parsed as `YYYY-MM-DD` or RFC 3339. Used to derive
    /// record-time partition values.
    #[must_use]
    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Self::Date(d) => Some(*d),
            Self::Timestamp(ts) => Some(ts.date_naive()),
            Self::Text(s) => s
                .parse::<NaiveDate>()
                .ok()
                .or_else(|| s.parse::<DateTime<Utc>>().ok().map(|ts| ts.date_naive())),
            _ => None,
        }
    }
}

/// One typed row: an ordered column → value map.
///
/// `BTreeMap` keeps columns sorted so serialization (and therefore artifact
/// bytes and checksums) is deterministic.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Row(BTreeMap<String, FieldValue>);

impl Row {
    /// Creates an empty row.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a column value, replacing any previous value.
    pub fn set(&mut self, column: impl Into<String>, value: FieldValue) {
        self.0.insert(column.into(), value);
    }

    /// Builder-style [`Row::set`].
    #[must_use]
    pub fn with(mut self, column: impl Into<String>, value: FieldValue) -> Self {
        self.set(column, value);
        self
    }

    /// Gets a column value.
    #[must_use]
    pub fn get(&self, column: &str) -> Option<&FieldValue> {
        self.0.get(column)
    }

    /// Removes a column, returning its value if present.
    pub fn remove(&mut self, column: &str) -> Option<FieldValue> {
        self.0.remove(column)
    }

    /// Returns true if the row has a non-null value for `column`.
    #[must_use]
    pub fn has_value(&self, column: &str) -> bool {
        self.0.get(column).is_some_and(|v| !v.is_null())
    }

    /// Returns an iterator over (column, value) pairs in column order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &FieldValue)> {
        self.0.iter()
    }

    /// Returns the column names in order.
    pub fn columns(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    /// Number of columns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the row has no columns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Encodes the named key columns into the canonical key string.
    ///
    /// Segments follow `key_columns` order. Missing columns encode as null,
    /// so rows lacking a key column still group deterministically.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidInput` if `key_columns` is empty.
    pub fn canonical_key(&self, key_columns: &[String]) -> Result<String> {
        if key_columns.is_empty() {
            return Err(Error::InvalidInput(
                "canonical key requires at least one key column".into(),
            ));
        }

        Ok(key_columns
            .iter()
            .map(|column| {
                let value = self.0.get(column).unwrap_or(&FieldValue::Null);
                format!("{column}={}", value.canonical_repr())
            })
            .collect::<Vec<_>>()
            .join(","))
    }

    /// Returns a copy of this row without the named column.
    ///
    /// Used to project SCD2 attribute sets (row minus the order column).
    #[must_use]
    pub fn without(&self, column: &str) -> Self {
        let mut projected = self.clone();
        projected.0.remove(column);
        projected
    }
}

impl FromIterator<(String, FieldValue)> for Row {
    fn from_iter<I: IntoIterator<Item = (String, FieldValue)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// An ordered sequence of rows sharing one schema profile version.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordBatch {
    /// Schema profile version the rows were validated against.
    pub schema_version: u64,
    /// The rows, in source order.
    pub rows: Vec<Row>,
}

impl RecordBatch {
    /// Creates a batch from rows at the given schema profile version.
    #[must_use]
    pub fn new(schema_version: u64, rows: Vec<Row>) -> Self {
        Self {
            schema_version,
            rows,
        }
    }

    /// Number of rows in the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns true if the batch holds no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
