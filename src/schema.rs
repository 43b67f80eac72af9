//! Schema model and type inference.
//!
//! This module owns the [`FieldType`] enum (6 supported data types),
//! [`FieldDescriptor`] per-field metadata, the versioned [`SchemaDescriptor`],
//! and the inference engine that classifies every column of a canonical
//! row set.
//!
//! ## Responsibilities
//!
//! - Strict-to-loose type classification (object, boolean, integer, float,
//!   date, string) driven by candidate falsification
//! - Nullability detection from observed null cells
//! - JSON descriptor loading and saving via `serde_json`
//! - Deterministic output: the same row set always produces the same
//!   descriptor, field order included

use std::{fmt, fs::File, io::BufReader, path::Path, str::FromStr};

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::normalize::{Cell, RowSet};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Integer,
    Float,
    Boolean,
    Date,
    Object,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Integer => "integer",
            FieldType::Float => "float",
            FieldType::Boolean => "boolean",
            FieldType::Date => "date",
            FieldType::Object => "object",
        }
    }

    pub fn variants() -> &'static [&'static str] {
        &["string", "integer", "float", "boolean", "date", "object"]
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for FieldType {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "string" | "str" | "text" => Ok(FieldType::String),
            "integer" | "int" => Ok(FieldType::Integer),
            "float" | "double" | "number" => Ok(FieldType::Float),
            "boolean" | "bool" => Ok(FieldType::Boolean),
            "date" | "datetime" | "timestamp" => Ok(FieldType::Date),
            "object" | "dict" | "map" => Ok(FieldType::Object),
            _ => Err(anyhow!(
                "Unknown field type '{value}'. Supported types: {}",
                FieldType::variants().join(", ")
            )),
        }
    }
}

/// One field of a schema. Identity across versions is `name` alone,
/// case-sensitive.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub nullable: bool,
}

/// A schema for one source at one point in time. Immutable once persisted;
/// a detected change produces a new descriptor with the next version.
///
/// `created_at` stays `None` on inference candidates and is stamped by the
/// evolution tracker when a version is recorded, so inference output is
/// byte-for-byte reproducible.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchemaDescriptor {
    pub source_id: String,
    pub version: u32,
    pub fields: Vec<FieldDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    pub row_count: usize,
}

impl SchemaDescriptor {
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file =
            File::create(path).with_context(|| format!("Creating schema file {path:?}"))?;
        serde_json::to_writer_pretty(file, self).context("Writing schema JSON")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Opening schema file {path:?}"))?;
        let reader = BufReader::new(file);
        let descriptor = serde_json::from_reader(reader).context("Parsing schema JSON")?;
        Ok(descriptor)
    }
}

pub fn parse_boolean_literal(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "t" | "yes" | "y" => Some(true),
        "false" | "f" | "no" | "n" => Some(false),
        _ => None,
    }
}

pub fn parse_naive_date(value: &str) -> Result<NaiveDate> {
    const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y", "%m/%d/%Y", "%Y/%m/%d", "%d-%m-%Y"];
    for fmt in DATE_FORMATS {
        if let Ok(parsed) = NaiveDate::parse_from_str(value, fmt) {
            return Ok(parsed);
        }
    }
    Err(anyhow!("Failed to parse '{value}' as date"))
}

pub fn parse_naive_datetime(value: &str) -> Result<NaiveDateTime> {
    const DATETIME_FORMATS: &[&str] = &[
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%d/%m/%Y %H:%M:%S",
        "%m/%d/%Y %H:%M:%S",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M",
    ];
    for fmt in DATETIME_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(value, fmt) {
            return Ok(parsed);
        }
    }
    Err(anyhow!("Failed to parse '{value}' as datetime"))
}

fn is_date_literal(value: &str) -> bool {
    parse_naive_date(value).is_ok() || parse_naive_datetime(value).is_ok()
}

/// Per-column type candidate. Every variant starts possible and observed
/// cells knock variants out; `decide` walks the surviving candidates from
/// strictest to loosest.
#[derive(Debug, Clone)]
struct TypeCandidate {
    non_null: usize,
    saw_null: bool,
    possible_object: bool,
    possible_boolean: bool,
    possible_integer: bool,
    possible_float: bool,
    possible_date: bool,
}

impl TypeCandidate {
    fn new() -> Self {
        Self {
            non_null: 0,
            saw_null: false,
            possible_object: true,
            possible_boolean: true,
            possible_integer: true,
            possible_float: true,
            possible_date: true,
        }
    }

    fn observe(&mut self, cell: &Cell) {
        match cell {
            Cell::Null => {
                self.saw_null = true;
                return;
            }
            Cell::Boolean(_) => {
                self.possible_object = false;
                self.possible_integer = false;
                self.possible_float = false;
                self.possible_date = false;
            }
            Cell::Integer(_) => {
                self.possible_object = false;
                self.possible_boolean = false;
                self.possible_date = false;
            }
            Cell::Float(_) => {
                self.possible_object = false;
                self.possible_boolean = false;
                self.possible_integer = false;
                self.possible_date = false;
            }
            Cell::Text(text) => {
                self.possible_object = false;
                let trimmed = text.trim();
                if parse_boolean_literal(trimmed).is_none() {
                    self.possible_boolean = false;
                }
                if trimmed.parse::<i64>().is_err() {
                    self.possible_integer = false;
                }
                if trimmed.parse::<f64>().is_err() {
                    self.possible_float = false;
                }
                if !is_date_literal(trimmed) {
                    self.possible_date = false;
                }
            }
            Cell::Nested(_) => {
                self.possible_boolean = false;
                self.possible_integer = false;
                self.possible_float = false;
                self.possible_date = false;
            }
        }
        self.non_null += 1;
    }

    fn decide(&self) -> FieldType {
        if self.non_null == 0 {
            return FieldType::String;
        }
        if self.possible_object {
            FieldType::Object
        } else if self.possible_boolean {
            FieldType::Boolean
        } else if self.possible_integer {
            FieldType::Integer
        } else if self.possible_float {
            FieldType::Float
        } else if self.possible_date {
            FieldType::Date
        } else {
            FieldType::String
        }
    }

    fn nullable(&self) -> bool {
        self.saw_null
    }
}

/// Derives a schema descriptor from a canonical row set. Never fails: an
/// empty row set yields zero fields with `row_count` 0.
pub fn generate(rows: &RowSet, source_id: &str) -> SchemaDescriptor {
    let mut candidates = vec![TypeCandidate::new(); rows.column_count()];
    for row in &rows.rows {
        for (idx, cell) in row.iter().enumerate().take(candidates.len()) {
            candidates[idx].observe(cell);
        }
    }

    let fields = rows
        .columns
        .iter()
        .zip(&candidates)
        .map(|(name, candidate)| FieldDescriptor {
            name: name.clone(),
            field_type: candidate.decide(),
            nullable: candidate.nullable(),
        })
        .collect();

    SchemaDescriptor {
        source_id: source_id.to_string(),
        version: 1,
        fields,
        created_at: None,
        row_count: rows.row_count(),
    }
}
