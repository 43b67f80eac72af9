pub mod cli;
pub mod diff;
pub mod evolution;
pub mod ingest;
pub mod io_utils;
pub mod normalize;
pub mod readers;
pub mod sanitize;
pub mod schema;

use std::{env, fs::File, sync::OnceLock};

use anyhow::{Context, Result};
use clap::Parser;
use itertools::Itertools;
use log::{LevelFilter, info, warn};

use crate::cli::{Cli, Commands};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("schema_drift", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Ingest(args) => ingest::execute(&args),
        Commands::Normalize(args) => handle_normalize(&args),
        Commands::Infer(args) => handle_infer(&args),
        Commands::History(args) => handle_history(&args),
        Commands::Diff(args) => handle_diff(&args),
    }
}

fn handle_normalize(args: &cli::NormalizeArgs) -> Result<()> {
    let options = readers::ReadOptions {
        delimiter: args.delimiter,
        encoding: args.input_encoding.clone(),
    };
    let rows = readers::read_upload(&args.input, &options)?;
    if rows.is_empty() {
        warn!("No rows produced from {:?}", args.input);
    }
    let records = rows.to_records();
    match &args.output {
        Some(path) => {
            let file =
                File::create(path).with_context(|| format!("Creating output file {path:?}"))?;
            serde_json::to_writer_pretty(file, &records).context("Writing row-set JSON")?;
            info!(
                "Wrote {} record(s) across {} column(s) to {:?}",
                rows.row_count(),
                rows.column_count(),
                path
            );
        }
        None => {
            let rendered =
                serde_json::to_string_pretty(&records).context("Rendering row-set JSON")?;
            println!("{rendered}");
        }
    }
    Ok(())
}

fn handle_infer(args: &cli::InferArgs) -> Result<()> {
    let source_id = ingest::source_id_for(&args.input, args.source.as_deref());
    let options = readers::ReadOptions {
        delimiter: args.delimiter,
        encoding: args.input_encoding.clone(),
    };
    let rows = readers::read_upload(&args.input, &options)?;
    if rows.is_empty() {
        warn!("No rows produced from {:?}; inferring an empty schema", args.input);
    }
    let descriptor = schema::generate(&rows, &source_id);
    descriptor
        .save(&args.output)
        .with_context(|| format!("Writing schema to {:?}", args.output))?;
    info!(
        "Inferred schema for {} field(s) written to {:?}",
        descriptor.fields.len(),
        args.output
    );
    Ok(())
}

fn handle_history(args: &cli::HistoryArgs) -> Result<()> {
    let tracker = evolution::SchemaEvolution::with_directory(&args.store);
    let history = tracker
        .history(&args.source)
        .with_context(|| format!("Loading schema history for '{}'", args.source))?;

    if args.json {
        let rendered =
            serde_json::to_string_pretty(&history).context("Rendering history JSON")?;
        println!("{rendered}");
        return Ok(());
    }

    if history.is_empty() {
        println!("No schema versions recorded for '{}'", args.source);
        return Ok(());
    }
    for descriptor in &history.versions {
        let fields = descriptor
            .fields
            .iter()
            .map(|field| format!("{}:{}", field.name, field.field_type))
            .join(", ");
        let created = descriptor
            .created_at
            .map(|ts| ts.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "v{} [{}] {} row(s): {}",
            descriptor.version, created, descriptor.row_count, fields
        );
    }
    Ok(())
}

fn handle_diff(args: &cli::DiffArgs) -> Result<()> {
    let old = match &args.old {
        Some(path) => Some(load_schema_value(path)?),
        None => None,
    };
    let new = load_schema_value(&args.new)?;
    let result = diff::diff(old.as_ref(), &new);

    if args.json {
        let rendered = serde_json::to_string_pretty(&result).context("Rendering diff JSON")?;
        println!("{rendered}");
    } else {
        ingest::print_diff_summary(&result);
    }
    Ok(())
}

fn load_schema_value(path: &std::path::Path) -> Result<serde_json::Value> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Reading schema file {path:?}"))?;
    serde_json::from_str(&contents).with_context(|| format!("Parsing schema file {path:?}"))
}
