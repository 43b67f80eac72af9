//! Upload reader registry and extraction fallback chain.
//!
//! Each supported file extension maps to a reader that produces a
//! canonical [`RowSet`]. Ambiguous formats (plain text, markdown) route
//! through a [`FallbackChain`]: a priority-ordered list of candidate
//! readers tried until one yields a non-empty row set. Exhausting every
//! candidate is not an error; the chain degrades to the empty row set and
//! leaves a diagnostic in the log.

use std::{fs, path::Path};

use anyhow::{Context, Result, bail};
use log::{debug, warn};

use crate::{
    io_utils,
    normalize::{self, Cell, RowSet},
};

/// Per-upload reading options. `None` fields fall back to extension-based
/// defaults.
#[derive(Debug, Clone, Default)]
pub struct ReadOptions {
    pub delimiter: Option<u8>,
    pub encoding: Option<String>,
}

type ReaderFn = fn(&Path, &ReadOptions) -> Result<RowSet>;

/// Priority-ordered reader candidates behind one interface, iterated with
/// first-success semantics. A candidate succeeds when it returns a
/// non-empty row set without an error.
pub struct FallbackChain {
    candidates: Vec<(&'static str, ReaderFn)>,
}

impl FallbackChain {
    pub fn new(candidates: Vec<(&'static str, ReaderFn)>) -> Self {
        Self { candidates }
    }

    /// Resolves an upload through the chain. Never fails: if every
    /// candidate errors or comes back empty, the result is the empty row
    /// set and the pipeline proceeds with "no data produced".
    pub fn resolve(&self, path: &Path, options: &ReadOptions) -> RowSet {
        for (name, reader) in &self.candidates {
            match reader(path, options) {
                Ok(rows) if !rows.is_empty() => {
                    debug!(
                        "Reader '{name}' produced {} row(s) for {path:?}",
                        rows.row_count()
                    );
                    return rows;
                }
                Ok(_) => debug!("Reader '{name}' produced no rows for {path:?}"),
                Err(err) => warn!("Reader '{name}' failed for {path:?}: {err:#}"),
            }
        }
        warn!("All readers exhausted for {path:?}; producing an empty row set");
        RowSet::empty()
    }
}

/// Chain configuration for text-like uploads: structured candidates come
/// before the loose line reader.
pub fn text_chain() -> FallbackChain {
    FallbackChain::new(vec![
        ("json", read_json),
        ("delimited", read_delimited),
        ("lines", read_lines),
    ])
}

/// Reads one upload through the registry. Known formats that fail to
/// produce rows degrade to the empty row set; only an unregistered
/// extension is an error.
pub fn read_upload(path: &Path, options: &ReadOptions) -> Result<RowSet> {
    let ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();

    match ext.as_str() {
        "json" => Ok(read_json(path, options).unwrap_or_else(|err| {
            warn!("JSON read failed for {path:?}: {err:#}");
            RowSet::empty()
        })),
        "csv" | "tsv" => Ok(read_delimited(path, options).unwrap_or_else(|err| {
            warn!("Delimited read failed for {path:?}: {err:#}");
            RowSet::empty()
        })),
        "txt" | "md" => Ok(text_chain().resolve(path, options)),
        other => bail!("No reader registered for extension '{other}'"),
    }
}

/// JSON uploads delegate shape handling to the normalizer.
pub fn read_json(path: &Path, _options: &ReadOptions) -> Result<RowSet> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("Reading JSON file {path:?}"))?;
    let payload: serde_json::Value =
        serde_json::from_str(&contents).with_context(|| format!("Parsing JSON file {path:?}"))?;
    Ok(normalize::normalize(&payload))
}

/// CSV/TSV uploads: the header row names the columns, empty fields become
/// null, and every cell stays text for the inference ladder to classify.
pub fn read_delimited(path: &Path, options: &ReadOptions) -> Result<RowSet> {
    let delimiter = io_utils::resolve_input_delimiter(path, options.delimiter);
    let encoding = io_utils::resolve_encoding(options.encoding.as_deref())?;
    let mut reader = io_utils::open_csv_reader(path, delimiter)?;
    let columns = io_utils::reader_headers(&mut reader, encoding)?;

    let mut rows = Vec::new();
    let mut record = csv::ByteRecord::new();
    while reader
        .read_byte_record(&mut record)
        .with_context(|| format!("Reading delimited record from {path:?}"))?
    {
        let mut row = Vec::with_capacity(columns.len());
        for field in record.iter().take(columns.len()) {
            if field.is_empty() {
                row.push(Cell::Null);
                continue;
            }
            row.push(Cell::Text(io_utils::decode_bytes(field, encoding)?));
        }
        while row.len() < columns.len() {
            row.push(Cell::Null);
        }
        rows.push(row);
    }

    Ok(RowSet { columns, rows })
}

/// Loose fallback for plain text: one `value` column, one row per
/// non-empty line.
pub fn read_lines(path: &Path, options: &ReadOptions) -> Result<RowSet> {
    let encoding = io_utils::resolve_encoding(options.encoding.as_deref())?;
    let bytes = fs::read(path).with_context(|| format!("Reading text file {path:?}"))?;
    let contents = io_utils::decode_bytes(&bytes, encoding)?;

    let rows: Vec<Vec<Cell>> = contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| vec![Cell::Text(line.to_string())])
        .collect();

    if rows.is_empty() {
        return Ok(RowSet::empty());
    }
    Ok(RowSet {
        columns: vec![normalize::VALUE_COLUMN.to_string()],
        rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &tempfile::TempDir, name: &str, contents: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut file = fs::File::create(&path).expect("create test file");
        file.write_all(contents.as_bytes()).expect("write test file");
        path
    }

    #[test]
    fn unregistered_extension_is_an_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = write_file(&dir, "upload.parquet", "");
        let err = read_upload(&path, &ReadOptions::default()).unwrap_err();
        assert!(err.to_string().contains("No reader registered"));
    }

    #[test]
    fn malformed_json_degrades_to_empty() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = write_file(&dir, "upload.json", "{broken");
        let rows = read_upload(&path, &ReadOptions::default()).expect("soft failure");
        assert!(rows.is_empty());
    }

    #[test]
    fn delimited_read_maps_empty_fields_to_null() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = write_file(&dir, "upload.csv", "a,b\n1,\n2,x\n");
        let rows = read_upload(&path, &ReadOptions::default()).expect("read csv");
        assert_eq!(rows.columns, vec!["a", "b"]);
        assert_eq!(rows.rows[0][1], Cell::Null);
        assert_eq!(rows.rows[1][1], Cell::Text("x".into()));
    }

    #[test]
    fn text_chain_prefers_json_over_lines() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = write_file(&dir, "upload.txt", "[{\"a\": 1}]");
        let rows = read_upload(&path, &ReadOptions::default()).expect("read txt");
        assert_eq!(rows.columns, vec!["a"]);
    }

    #[test]
    fn text_chain_falls_back_to_lines() {
        let dir = tempfile::tempdir().expect("temp dir");
        // A single line is header-only to the delimited reader, so the
        // chain has to fall through to the line reader.
        let path = write_file(&dir, "upload.txt", "just one line\n");
        let rows = read_upload(&path, &ReadOptions::default()).expect("read txt");
        assert_eq!(rows.columns, vec!["value"]);
        assert_eq!(rows.rows.len(), 1);
    }
}
