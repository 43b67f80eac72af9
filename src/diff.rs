//! Field-level schema diffing.
//!
//! Historical schema documents come in several layouts: the canonical
//! descriptor (fields as a list), a legacy mapping of field name to
//! descriptor, or a descriptor buried under a `raw_schema` wrapper. Every
//! input is first canonicalized into one name-to-signature map; the diff
//! itself only ever sees that one representation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::schema::{FieldDescriptor, FieldType, SchemaDescriptor};

/// The comparable part of a field: type plus nullability.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct FieldSignature {
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub nullable: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FieldChange {
    pub name: String,
    pub old: FieldSignature,
    pub new: FieldSignature,
}

/// Added, removed, and changed fields between two schemas, with the field
/// counts of each side for quick-glance reporting. Fields unchanged in both
/// type and nullability are omitted entirely.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchemaDiff {
    pub added: Vec<FieldDescriptor>,
    pub removed: Vec<FieldDescriptor>,
    pub changed: Vec<FieldChange>,
    pub old_count: usize,
    pub new_count: usize,
}

impl SchemaDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}

fn signature_from_meta(meta: &Value) -> FieldSignature {
    let field_type = meta
        .get("type")
        .and_then(Value::as_str)
        .and_then(|token| token.parse::<FieldType>().ok())
        .unwrap_or(FieldType::String);
    let nullable = meta.get("nullable").and_then(Value::as_bool).unwrap_or(true);
    FieldSignature {
        field_type,
        nullable,
    }
}

fn name_from_meta(meta: &Value) -> String {
    meta.get("name")
        .or_else(|| meta.get("path"))
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string()
}

fn fields_from_list(entries: &[Value]) -> BTreeMap<String, FieldSignature> {
    entries
        .iter()
        .filter(|entry| entry.is_object())
        .map(|entry| (name_from_meta(entry), signature_from_meta(entry)))
        .collect()
}

fn fields_from_map(entries: &serde_json::Map<String, Value>) -> BTreeMap<String, FieldSignature> {
    entries
        .iter()
        .map(|(name, meta)| {
            let signature = if meta.is_object() {
                signature_from_meta(meta)
            } else {
                // Bare value: the legacy store kept `name: "integer"` pairs.
                FieldSignature {
                    field_type: meta
                        .as_str()
                        .and_then(|token| token.parse::<FieldType>().ok())
                        .unwrap_or(FieldType::String),
                    nullable: true,
                }
            };
            (name.clone(), signature)
        })
        .collect()
}

/// Canonicalizes any known schema layout into a name-to-signature map,
/// trying each layout in a fixed order and keeping the first that yields at
/// least one field. Unrecognizable input canonicalizes to zero fields.
pub fn canonicalize_fields(schema: &Value) -> BTreeMap<String, FieldSignature> {
    if let Some(entries) = schema.get("fields").and_then(Value::as_array) {
        let fields = fields_from_list(entries);
        if !fields.is_empty() {
            return fields;
        }
    }
    if let Some(entries) = schema.get("fields").and_then(Value::as_object) {
        let fields = fields_from_map(entries);
        if !fields.is_empty() {
            return fields;
        }
    }
    if let Some(entries) = schema
        .get("raw_schema")
        .and_then(|raw| raw.get("fields"))
        .and_then(Value::as_array)
    {
        let fields = fields_from_list(entries);
        if !fields.is_empty() {
            return fields;
        }
    }
    BTreeMap::new()
}

fn descriptor_fields(descriptor: &SchemaDescriptor) -> BTreeMap<String, FieldSignature> {
    descriptor
        .fields
        .iter()
        .map(|field| {
            (
                field.name.clone(),
                FieldSignature {
                    field_type: field.field_type,
                    nullable: field.nullable,
                },
            )
        })
        .collect()
}

fn diff_maps(
    old: BTreeMap<String, FieldSignature>,
    new: BTreeMap<String, FieldSignature>,
) -> SchemaDiff {
    let added = new
        .iter()
        .filter(|(name, _)| !old.contains_key(*name))
        .map(|(name, signature)| FieldDescriptor {
            name: name.clone(),
            field_type: signature.field_type,
            nullable: signature.nullable,
        })
        .collect();

    let removed = old
        .iter()
        .filter(|(name, _)| !new.contains_key(*name))
        .map(|(name, signature)| FieldDescriptor {
            name: name.clone(),
            field_type: signature.field_type,
            nullable: signature.nullable,
        })
        .collect();

    let changed = old
        .iter()
        .filter_map(|(name, old_signature)| {
            let new_signature = new.get(name)?;
            (new_signature != old_signature).then(|| FieldChange {
                name: name.clone(),
                old: *old_signature,
                new: *new_signature,
            })
        })
        .collect();

    SchemaDiff {
        added,
        removed,
        changed,
        old_count: old.len(),
        new_count: new.len(),
    }
}

/// Diffs two schema documents in any known layout. A missing `old` means
/// every field of `new` counts as added.
pub fn diff(old: Option<&Value>, new: &Value) -> SchemaDiff {
    let old_fields = old.map(canonicalize_fields).unwrap_or_default();
    let new_fields = canonicalize_fields(new);
    diff_maps(old_fields, new_fields)
}

/// Typed convenience over [`diff`] for descriptors already in canonical
/// form. Collapsed to a boolean via [`SchemaDiff::is_empty`], this is the
/// evolution tracker's change predicate.
pub fn diff_descriptors(old: Option<&SchemaDescriptor>, new: &SchemaDescriptor) -> SchemaDiff {
    let old_fields = old.map(descriptor_fields).unwrap_or_default();
    diff_maps(old_fields, descriptor_fields(new))
}
