use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(author, version, about = "Normalize uploads, infer schemas, and track schema drift", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the full pipeline for one upload: read, normalize, infer, and version
    Ingest(IngestArgs),
    /// Normalize an upload into its canonical row-set records
    Normalize(NormalizeArgs),
    /// Infer a schema descriptor from an upload without recording a version
    Infer(InferArgs),
    /// List the recorded schema versions for a source
    History(HistoryArgs),
    /// Diff two schema files, accepting legacy schema layouts on either side
    Diff(DiffArgs),
}

#[derive(Debug, Args)]
pub struct IngestArgs {
    /// Upload file to ingest
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// Source identifier (defaults to the file stem, spaces replaced with '_')
    #[arg(short = 's', long = "source")]
    pub source: Option<String>,
    /// Directory holding per-source schema histories
    #[arg(long, default_value = "schemas")]
    pub store: PathBuf,
    /// Print the field-level diff against the previously recorded version
    #[arg(long)]
    pub diff: bool,
    /// Write sanitized records JSON to this path
    #[arg(long)]
    pub records: Option<PathBuf>,
    /// Delimiter character for delimited uploads (supports ',', 'tab', ';', '|')
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Character encoding of the input file (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
}

#[derive(Debug, Args)]
pub struct NormalizeArgs {
    /// Upload file to normalize
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// Output JSON file (stdout if omitted)
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,
    /// Delimiter character for delimited uploads (supports ',', 'tab', ';', '|')
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Character encoding of the input file (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
}

#[derive(Debug, Args)]
pub struct InferArgs {
    /// Upload file to inspect
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// Destination schema descriptor path
    #[arg(short = 'o', long = "output")]
    pub output: PathBuf,
    /// Source identifier (defaults to the file stem, spaces replaced with '_')
    #[arg(short = 's', long = "source")]
    pub source: Option<String>,
    /// Delimiter character for delimited uploads (supports ',', 'tab', ';', '|')
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Character encoding of the input file (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
}

#[derive(Debug, Args)]
pub struct HistoryArgs {
    /// Source identifier to list versions for
    #[arg(short = 's', long = "source")]
    pub source: String,
    /// Directory holding per-source schema histories
    #[arg(long, default_value = "schemas")]
    pub store: PathBuf,
    /// Emit the full history as JSON instead of a summary
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct DiffArgs {
    /// Previous schema file (omit to treat every field as added)
    #[arg(long)]
    pub old: Option<PathBuf>,
    /// Current schema file
    #[arg(long)]
    pub new: PathBuf,
    /// Emit the diff as JSON instead of a summary
    #[arg(long)]
    pub json: bool,
}

pub fn parse_delimiter(value: &str) -> Result<u8, String> {
    match value {
        "tab" | "\t" => Ok(b'\t'),
        "comma" | "," => Ok(b','),
        "|" | "pipe" => Ok(b'|'),
        ";" | "semicolon" => Ok(b';'),
        other => {
            let mut chars = other.chars();
            let first = chars
                .next()
                .ok_or_else(|| "Delimiter cannot be empty".to_string())?;
            if chars.next().is_some() {
                return Err("Delimiter must be a single character".to_string());
            }
            if !first.is_ascii() {
                return Err("Delimiter must be ASCII".to_string());
            }
            Ok(first as u8)
        }
    }
}
