// ABOUTME: Row data model shared by extraction, loading and polling
// ABOUTME: Tagged cell values, ordered columns, immutable table snapshots and watermarks

use std::cmp::Ordering;
use std::fmt;

use chrono::NaiveDateTime;
use rust_decimal::Decimal;

/// Timestamp rendering with full microsecond precision.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// A single cell value, tagged at the extraction boundary.
///
/// Everything downstream (literal binding, watermark tracking) switches on
/// the tag rather than inspecting driver types.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Text(String),
    Integer(i64),
    Float(f64),
    /// Exact NUMERIC value; kept apart from `Float` so watermarks stay exact
    Decimal(Decimal),
    Timestamp(NaiveDateTime),
    Binary(Vec<u8>),
    Null,
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Short tag name for logs and error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Text(_) => "text",
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::Decimal(_) => "decimal",
            Value::Timestamp(_) => "timestamp",
            Value::Binary(_) => "binary",
            Value::Null => "null",
        }
    }

    /// Compare two values of the same tag. Values of different tags, and
    /// NULLs, are not comparable.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
            (Value::Integer(a), Value::Integer(b)) => Some(a.cmp(b)),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::Decimal(a), Value::Decimal(b)) => Some(a.cmp(b)),
            (Value::Timestamp(a), Value::Timestamp(b)) => Some(a.cmp(b)),
            (Value::Binary(a), Value::Binary(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Lossless text form, suitable for re-binding as a query parameter.
    ///
    /// Floats use the shortest representation that round-trips, decimals keep
    /// every digit and timestamps keep microseconds. Returns `None` for NULL.
    pub fn to_text(&self) -> Option<String> {
        match self {
            Value::Text(s) => Some(s.clone()),
            Value::Integer(i) => Some(i.to_string()),
            Value::Float(f) => Some(f.to_string()),
            Value::Decimal(d) => Some(d.to_string()),
            Value::Timestamp(ts) => Some(ts.format(TIMESTAMP_FORMAT).to_string()),
            Value::Binary(bytes) => Some(match format_uuid(bytes) {
                Some(uuid) => uuid,
                None => format!("\\x{}", hex(bytes)),
            }),
            Value::Null => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_text() {
            Some(text) => f.write_str(&text),
            None => f.write_str("NULL"),
        }
    }
}

/// Render 16 raw bytes in the canonical 8-4-4-4-12 hyphenated grouping.
///
/// Returns `None` for any other length.
pub fn format_uuid(bytes: &[u8]) -> Option<String> {
    if bytes.len() != 16 {
        return None;
    }
    Some(format!(
        "{}-{}-{}-{}-{}",
        hex(&bytes[0..4]),
        hex(&bytes[4..6]),
        hex(&bytes[6..8]),
        hex(&bytes[8..10]),
        hex(&bytes[10..16])
    ))
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Column metadata as reported by the source catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    /// Source type name, e.g. `integer` or `timestamp without time zone`
    pub declared_type: String,
    pub nullable: bool,
}

impl Column {
    pub fn new(name: impl Into<String>, declared_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            declared_type: declared_type.into(),
            nullable: false,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// True for types whose raw 16-byte values are rendered as UUID text.
    pub fn is_uuid_like(&self) -> bool {
        matches!(self.declared_type.as_str(), "uuid" | "bytea")
    }
}

/// Result of one extraction: ordered columns plus positionally aligned rows.
///
/// Every row has exactly `columns.len()` values. A snapshot is never
/// mutated after the extractor builds it.
#[derive(Debug, Clone, PartialEq)]
pub struct TableSnapshot {
    pub columns: Vec<Column>,
    pub rows: Vec<Vec<Value>>,
}

impl TableSnapshot {
    pub fn new(columns: Vec<Column>, rows: Vec<Vec<Value>>) -> Self {
        Self { columns, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Value of `column` in the last row, if any.
    pub fn last_value(&self, column: usize) -> Option<&Value> {
        self.rows.last().and_then(|row| row.get(column))
    }

    /// Largest non-NULL value of `column` across all rows.
    pub fn max_value(&self, column: usize) -> Option<&Value> {
        self.rows
            .iter()
            .filter_map(|row| row.get(column))
            .filter(|v| !v.is_null())
            .fold(None, |best: Option<&Value>, v| match best {
                Some(b) if b.compare(v) != Some(Ordering::Less) => Some(b),
                _ => Some(v),
            })
    }
}

/// Last delta-column value successfully delivered.
///
/// Kept as a typed value rather than a formatted string so numeric and
/// timestamp watermarks round-trip exactly.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Watermark {
    /// Nothing delivered yet; the next incremental scan reads from the start
    #[default]
    Unset,
    At(Value),
}

impl Watermark {
    /// Parse a user-supplied starting point. Empty text means unset.
    pub fn from_text(text: &str) -> Self {
        if text.trim().is_empty() {
            Watermark::Unset
        } else {
            Watermark::At(Value::Text(text.to_string()))
        }
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            Watermark::Unset => None,
            Watermark::At(v) => Some(v),
        }
    }

    pub fn is_set(&self) -> bool {
        matches!(self, Watermark::At(_))
    }
}

impl fmt::Display for Watermark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Watermark::Unset => f.write_str("beginning"),
            Watermark::At(v) => write!(f, "{}", v),
        }
    }
}
