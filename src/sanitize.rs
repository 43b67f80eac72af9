//! Storage boundary sanitization.
//!
//! Everything handed to the persistence layer passes through here first.
//! Cells become native JSON scalars, the not-a-number sentinel and the
//! infinities become null, and nested text is restored to structure so the
//! backend stores documents rather than opaque strings. Unrecognized leaves
//! pass through unchanged.

use serde_json::{Map, Number, Value};

use crate::normalize::Cell;

/// Converts one cell into its storage-safe JSON form.
pub fn cell_to_storage(cell: &Cell) -> Value {
    match cell {
        Cell::Null => Value::Null,
        Cell::Boolean(b) => Value::Bool(*b),
        Cell::Integer(i) => Value::Number(Number::from(*i)),
        Cell::Float(f) => Number::from_f64(*f).map(Value::Number).unwrap_or(Value::Null),
        Cell::Text(s) => Value::String(s.clone()),
        Cell::Nested(text) => match serde_json::from_str::<Value>(text) {
            Ok(parsed) => sanitize(parsed),
            Err(_) => Value::String(text.clone()),
        },
    }
}

/// Builds a sanitized JSON record from one row.
pub fn record(columns: &[String], row: &[Cell]) -> Value {
    let mut map = Map::with_capacity(columns.len());
    for (idx, name) in columns.iter().enumerate() {
        let cell = row.get(idx).unwrap_or(&Cell::Null);
        map.insert(name.clone(), cell_to_storage(cell));
    }
    Value::Object(map)
}

/// Recursively rewrites a value tree so every leaf is storage-safe.
/// Mappings and sequences are walked; scalar leaves pass through unchanged.
pub fn sanitize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            Value::Object(map.into_iter().map(|(k, v)| (k, sanitize(v))).collect())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sanitize).collect()),
        leaf => leaf,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn non_finite_floats_become_null() {
        assert_eq!(cell_to_storage(&Cell::Float(f64::NAN)), Value::Null);
        assert_eq!(cell_to_storage(&Cell::Float(f64::INFINITY)), Value::Null);
        assert_eq!(cell_to_storage(&Cell::Float(1.5)), json!(1.5));
    }

    #[test]
    fn nested_text_is_restored_to_structure() {
        let cell = Cell::Nested("{\"x\":[1,2]}".into());
        assert_eq!(cell_to_storage(&cell), json!({"x": [1, 2]}));
    }

    #[test]
    fn unparseable_nested_text_passes_through_as_string() {
        let cell = Cell::Nested("{broken".into());
        assert_eq!(cell_to_storage(&cell), json!("{broken"));
    }

    #[test]
    fn record_fills_short_rows_with_null() {
        let columns = vec!["a".to_string(), "b".to_string()];
        let row = vec![Cell::Integer(1)];
        assert_eq!(record(&columns, &row), json!({"a": 1, "b": null}));
    }

    #[test]
    fn sanitize_recurses_through_containers() {
        let tree = json!({"a": [{"b": 1}], "c": "x"});
        assert_eq!(sanitize(tree.clone()), tree);
    }
}
