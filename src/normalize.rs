//! Shape normalization for decoded upload payloads.
//!
//! Uploads arrive as JSON trees of unpredictable shape: a list of records,
//! a column-oriented mapping, a flat mapping, or a bare scalar. This module
//! classifies the payload into one of those shapes and converts it into a
//! canonical [`RowSet`] where every row carries the same column set.
//!
//! Normalization is total: no payload shape produces an error. Inputs that
//! carry no usable data degrade to the empty row set, which callers treat
//! as a soft failure.

use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::sanitize;

/// Column name used when wrapping bare scalars and non-mapping elements.
pub const VALUE_COLUMN: &str = "value";

/// One field value in one row.
///
/// Nested mappings and sequences are kept as their canonical JSON text
/// rather than flattened, so irregular documents do not explode the column
/// set.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    Nested(String),
}

impl Cell {
    /// Converts a JSON leaf into a cell. Nested structures are serialized
    /// to their canonical text form.
    pub fn from_value(value: &Value) -> Cell {
        match value {
            Value::Null => Cell::Null,
            Value::Bool(b) => Cell::Boolean(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Cell::Integer(i)
                } else {
                    Cell::Float(n.as_f64().unwrap_or_default())
                }
            }
            Value::String(s) => Cell::Text(s.clone()),
            Value::Array(_) | Value::Object(_) => {
                Cell::Nested(serde_json::to_string(value).unwrap_or_default())
            }
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }
}

/// Canonical row set: ordered columns plus rows of equal width.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl RowSet {
    pub fn empty() -> Self {
        RowSet::default()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Renders every row as a storage-safe JSON record.
    pub fn to_records(&self) -> Vec<Value> {
        self.rows
            .iter()
            .map(|row| sanitize::record(&self.columns, row))
            .collect()
    }
}

/// The four payload shapes the normalizer understands, selected by an
/// explicit classifier rather than scattered type checks.
#[derive(Debug)]
enum PayloadShape<'a> {
    RowList(&'a [Value]),
    ColumnMap(&'a Map<String, Value>),
    ScalarMap(&'a Map<String, Value>),
    Primitive(&'a Value),
    Empty,
}

fn classify(payload: &Value) -> PayloadShape<'_> {
    match payload {
        Value::Null => PayloadShape::Empty,
        Value::Array(items) => PayloadShape::RowList(items),
        Value::Object(map) if map.is_empty() => PayloadShape::Empty,
        Value::Object(map) => {
            if map.values().any(Value::is_array) {
                PayloadShape::ColumnMap(map)
            } else {
                PayloadShape::ScalarMap(map)
            }
        }
        other => PayloadShape::Primitive(other),
    }
}

/// Converts a decoded payload of unknown shape into a canonical row set.
/// Never fails; unusable input yields the empty row set.
pub fn normalize(payload: &Value) -> RowSet {
    match classify(payload) {
        PayloadShape::RowList(items) => normalize_row_list(items),
        PayloadShape::ColumnMap(map) => normalize_column_map(map),
        PayloadShape::ScalarMap(map) => normalize_scalar_map(map),
        PayloadShape::Primitive(value) => normalize_primitive(value),
        PayloadShape::Empty => RowSet::empty(),
    }
}

/// Each element becomes a row. Non-mapping elements are wrapped under a
/// `value` column. The column set is the union of all field names in
/// first-seen order; missing fields are padded with null.
fn normalize_row_list(items: &[Value]) -> RowSet {
    let mut columns: Vec<String> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut sparse_rows: Vec<Vec<(usize, Cell)>> = Vec::with_capacity(items.len());

    let mut column_index = |columns: &mut Vec<String>, name: &str| -> usize {
        if let Some(idx) = index.get(name) {
            return *idx;
        }
        let idx = columns.len();
        columns.push(name.to_string());
        index.insert(name.to_string(), idx);
        idx
    };

    for item in items {
        let mut sparse = Vec::new();
        match item {
            Value::Object(map) => {
                for (name, value) in map {
                    let idx = column_index(&mut columns, name);
                    sparse.push((idx, Cell::from_value(value)));
                }
            }
            other => {
                let idx = column_index(&mut columns, VALUE_COLUMN);
                sparse.push((idx, Cell::from_value(other)));
            }
        }
        sparse_rows.push(sparse);
    }

    let rows = sparse_rows
        .into_iter()
        .map(|sparse| {
            let mut row = vec![Cell::Null; columns.len()];
            for (idx, cell) in sparse {
                row[idx] = cell;
            }
            row
        })
        .collect();

    RowSet { columns, rows }
}

/// Row count is the longest sequence; shorter sequences are right-padded
/// with null. Scalar fields occupy the first row only.
fn normalize_column_map(map: &Map<String, Value>) -> RowSet {
    let max_len = map
        .values()
        .filter_map(|v| v.as_array().map(|a| a.len()))
        .max()
        .unwrap_or(1);

    let columns: Vec<String> = map.keys().cloned().collect();
    let mut rows = Vec::with_capacity(max_len);
    for row_idx in 0..max_len {
        let row = map
            .values()
            .map(|value| match value {
                Value::Array(items) => items.get(row_idx).map(Cell::from_value).unwrap_or(Cell::Null),
                scalar if row_idx == 0 => Cell::from_value(scalar),
                _ => Cell::Null,
            })
            .collect();
        rows.push(row);
    }

    RowSet { columns, rows }
}

/// A mapping with no sequences is a single row.
fn normalize_scalar_map(map: &Map<String, Value>) -> RowSet {
    let columns: Vec<String> = map.keys().cloned().collect();
    let row = map.values().map(Cell::from_value).collect();
    RowSet {
        columns,
        rows: vec![row],
    }
}

/// A bare scalar becomes a one-row, one-column row set.
fn normalize_primitive(value: &Value) -> RowSet {
    RowSet {
        columns: vec![VALUE_COLUMN.to_string()],
        rows: vec![vec![Cell::from_value(value)]],
    }
}
