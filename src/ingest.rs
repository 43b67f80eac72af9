//! End-to-end ingest pipeline for a single upload.
//!
//! Read through the registry, normalize, infer a schema, and record it
//! with the evolution tracker. Tracking failure is recoverable: the upload
//! proceeds with an unversioned schema rather than aborting.

use std::{fs::File, path::Path};

use anyhow::{Context, Result};
use log::{info, warn};

use crate::{
    cli::IngestArgs,
    diff,
    evolution::SchemaEvolution,
    readers::{self, ReadOptions},
    schema,
};

/// Derives a source identifier from the upload filename: the file stem
/// with spaces replaced by underscores.
pub fn source_id_for(path: &Path, explicit: Option<&str>) -> String {
    if let Some(source) = explicit {
        return source.to_string();
    }
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("upload")
        .replace(' ', "_")
}

pub fn execute(args: &IngestArgs) -> Result<()> {
    let source_id = source_id_for(&args.input, args.source.as_deref());
    let options = ReadOptions {
        delimiter: args.delimiter,
        encoding: args.input_encoding.clone(),
    };

    info!("Ingesting '{}' as source '{}'", args.input.display(), source_id);
    let rows = readers::read_upload(&args.input, &options)?;
    if rows.is_empty() {
        warn!(
            "No rows produced from {:?}; nothing to track for '{}'",
            args.input, source_id
        );
        return Ok(());
    }

    let candidate = schema::generate(&rows, &source_id);
    let tracker = SchemaEvolution::with_directory(&args.store);
    let previous = if args.diff {
        match tracker.latest(&source_id) {
            Ok(previous) => previous,
            Err(err) => {
                warn!("Loading previous schema for '{source_id}' failed: {err:#}");
                None
            }
        }
    } else {
        None
    };

    let recorded = match tracker.track(&source_id, candidate) {
        Ok(descriptor) => descriptor,
        Err(err) => {
            warn!("Schema evolution tracking failed: {err}");
            err.into_candidate()
        }
    };

    if recorded.created_at.is_some() {
        info!(
            "Source '{}' is at schema version {} ({} field(s), {} row(s))",
            source_id,
            recorded.version,
            recorded.fields.len(),
            recorded.row_count
        );
    } else {
        info!(
            "Source '{}' proceeding unversioned ({} field(s), {} row(s))",
            source_id,
            recorded.fields.len(),
            recorded.row_count
        );
    }

    if args.diff {
        let result = diff::diff_descriptors(previous.as_ref(), &recorded);
        print_diff_summary(&result);
    }

    if let Some(records_path) = &args.records {
        write_records(&rows.to_records(), records_path)?;
        info!(
            "Wrote {} sanitized record(s) to {:?}",
            rows.row_count(),
            records_path
        );
    }

    Ok(())
}

pub fn print_diff_summary(result: &diff::SchemaDiff) {
    if result.is_empty() {
        println!(
            "No field changes ({} -> {} field(s))",
            result.old_count, result.new_count
        );
        return;
    }
    println!(
        "Fields: {} -> {} (+{} / -{} / ~{})",
        result.old_count,
        result.new_count,
        result.added.len(),
        result.removed.len(),
        result.changed.len()
    );
    for field in &result.added {
        println!(
            "  + {} ({}{})",
            field.name,
            field.field_type,
            if field.nullable { ", nullable" } else { "" }
        );
    }
    for field in &result.removed {
        println!("  - {} ({})", field.name, field.field_type);
    }
    for change in &result.changed {
        println!(
            "  ~ {}: {}{} -> {}{}",
            change.name,
            change.old.field_type,
            if change.old.nullable { "?" } else { "" },
            change.new.field_type,
            if change.new.nullable { "?" } else { "" }
        );
    }
}

fn write_records(records: &[serde_json::Value], path: &Path) -> Result<()> {
    let file = File::create(path).with_context(|| format!("Creating records file {path:?}"))?;
    serde_json::to_writer_pretty(file, records).context("Writing records JSON")
}
