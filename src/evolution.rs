//! Per-source schema version history.
//!
//! [`SchemaEvolution`] owns the append-only version history of every
//! source. It is constructed once at startup with an injected history
//! store and passed by reference to callers; the read-compare-append
//! sequence is serialized per source through a lock table, so concurrent
//! uploads for the same source can never both observe the same latest
//! version and both append its successor. Distinct sources proceed
//! independently.

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use anyhow::{Context, Result};
use chrono::Utc;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{diff, schema::SchemaDescriptor};

/// Store reads and writes are retried this many times before the failure
/// surfaces to the caller.
pub const MAX_STORE_ATTEMPTS: usize = 3;

/// Ordered version history for one source: versions strictly increase by 1
/// starting at 1, with no gaps and no rewrites.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaHistory {
    pub source_id: String,
    pub versions: Vec<SchemaDescriptor>,
}

impl SchemaHistory {
    pub fn new(source_id: &str) -> Self {
        Self {
            source_id: source_id.to_string(),
            versions: Vec::new(),
        }
    }

    pub fn latest(&self) -> Option<&SchemaDescriptor> {
        self.versions.last()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }
}

/// Recoverable tracking failure. Carries the source and the candidate
/// descriptor so the caller may proceed with an in-memory, unversioned
/// schema instead of aborting the upload.
#[derive(Debug, Error)]
pub enum TrackError {
    #[error("schema store unavailable for source '{source_id}' after {attempts} attempt(s): {source}")]
    Persistence {
        source_id: String,
        candidate: Box<SchemaDescriptor>,
        attempts: usize,
        #[source]
        source: anyhow::Error,
    },
}

impl TrackError {
    /// Recovers the candidate descriptor for unversioned use.
    pub fn into_candidate(self) -> SchemaDescriptor {
        match self {
            TrackError::Persistence { candidate, .. } => *candidate,
        }
    }
}

/// Persistence capability for schema histories.
pub trait HistoryStore: Send + Sync {
    /// Loads the history for a source; a source never seen before loads as
    /// an empty history, not an error.
    fn load(&self, source_id: &str) -> Result<SchemaHistory>;

    /// Appends one descriptor to a source's history.
    fn append(&self, source_id: &str, descriptor: &SchemaDescriptor) -> Result<()>;
}

/// File-backed store: one pretty-printed JSON history document per source
/// under the store root.
pub struct DirStore {
    root: PathBuf,
}

impl DirStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn history_path(&self, source_id: &str) -> PathBuf {
        self.root.join(format!("{source_id}.json"))
    }
}

impl HistoryStore for DirStore {
    fn load(&self, source_id: &str) -> Result<SchemaHistory> {
        let path = self.history_path(source_id);
        if !path.exists() {
            return Ok(SchemaHistory::new(source_id));
        }
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Reading schema history {path:?}"))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Parsing schema history {path:?}"))
    }

    fn append(&self, source_id: &str, descriptor: &SchemaDescriptor) -> Result<()> {
        fs::create_dir_all(&self.root)
            .with_context(|| format!("Creating schema store {:?}", self.root))?;
        let mut history = self.load(source_id)?;
        history.versions.push(descriptor.clone());
        let path = self.history_path(source_id);
        let contents =
            serde_json::to_string_pretty(&history).context("Serializing schema history")?;
        fs::write(&path, contents).with_context(|| format!("Writing schema history {path:?}"))
    }
}

/// In-memory store for tests and for callers that opt out of durable
/// history.
#[derive(Default)]
pub struct MemoryStore {
    histories: Mutex<HashMap<String, SchemaHistory>>,
}

impl HistoryStore for MemoryStore {
    fn load(&self, source_id: &str) -> Result<SchemaHistory> {
        let histories = self.histories.lock().unwrap_or_else(|e| e.into_inner());
        Ok(histories
            .get(source_id)
            .cloned()
            .unwrap_or_else(|| SchemaHistory::new(source_id)))
    }

    fn append(&self, source_id: &str, descriptor: &SchemaDescriptor) -> Result<()> {
        let mut histories = self.histories.lock().unwrap_or_else(|e| e.into_inner());
        histories
            .entry(source_id.to_string())
            .or_insert_with(|| SchemaHistory::new(source_id))
            .versions
            .push(descriptor.clone());
        Ok(())
    }
}

/// Schema evolution tracker: assigns version numbers and keeps the
/// append-only history, one critical section per source.
pub struct SchemaEvolution {
    store: Box<dyn HistoryStore>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SchemaEvolution {
    pub fn new(store: Box<dyn HistoryStore>) -> Self {
        Self {
            store,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_directory(root: impl AsRef<Path>) -> Self {
        Self::new(Box::new(DirStore::new(root.as_ref())))
    }

    fn source_lock(&self, source_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .entry(source_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Records `candidate` for `source_id` and returns the descriptor that
    /// now represents the source's latest schema.
    ///
    /// If the candidate is structurally equal to the latest stored version
    /// (same field names, types, and nullability; order is not compared),
    /// the stored descriptor is returned unchanged and no version is
    /// created. Otherwise the candidate is persisted as `latest + 1`.
    pub fn track(
        &self,
        source_id: &str,
        candidate: SchemaDescriptor,
    ) -> Result<SchemaDescriptor, TrackError> {
        let lock = self.source_lock(source_id);
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());

        let history = match self.load_with_retry(source_id) {
            Ok(history) => history,
            Err(source) => {
                return Err(TrackError::Persistence {
                    source_id: source_id.to_string(),
                    candidate: Box::new(candidate),
                    attempts: MAX_STORE_ATTEMPTS,
                    source,
                });
            }
        };

        if let Some(latest) = history.latest()
            && diff::diff_descriptors(Some(latest), &candidate).is_empty()
        {
            debug!(
                "Schema for '{}' unchanged; keeping version {}",
                source_id, latest.version
            );
            return Ok(latest.clone());
        }

        let mut descriptor = candidate.clone();
        descriptor.version = history.latest().map(|l| l.version + 1).unwrap_or(1);
        descriptor.created_at = Some(Utc::now());

        if let Err(source) = self.append_with_retry(source_id, &descriptor) {
            return Err(TrackError::Persistence {
                source_id: source_id.to_string(),
                candidate: Box::new(candidate),
                attempts: MAX_STORE_ATTEMPTS,
                source,
            });
        }

        info!(
            "Schema version {} recorded for '{}' ({} field(s), {} row(s))",
            descriptor.version,
            source_id,
            descriptor.fields.len(),
            descriptor.row_count
        );
        Ok(descriptor)
    }

    /// Full version history for a source; empty if the source was never
    /// tracked.
    pub fn history(&self, source_id: &str) -> Result<SchemaHistory> {
        self.load_with_retry(source_id)
    }

    /// Latest recorded descriptor for a source, if any.
    pub fn latest(&self, source_id: &str) -> Result<Option<SchemaDescriptor>> {
        let mut history = self.load_with_retry(source_id)?;
        Ok(history.versions.pop())
    }

    fn load_with_retry(&self, source_id: &str) -> Result<SchemaHistory> {
        for attempt in 1..MAX_STORE_ATTEMPTS {
            match self.store.load(source_id) {
                Ok(history) => return Ok(history),
                Err(err) => warn!(
                    "Loading schema history for '{source_id}' failed \
                     (attempt {attempt}/{MAX_STORE_ATTEMPTS}): {err:#}"
                ),
            }
        }
        self.store.load(source_id)
    }

    fn append_with_retry(&self, source_id: &str, descriptor: &SchemaDescriptor) -> Result<()> {
        for attempt in 1..MAX_STORE_ATTEMPTS {
            match self.store.append(source_id, descriptor) {
                Ok(()) => return Ok(()),
                Err(err) => warn!(
                    "Appending schema version {} for '{source_id}' failed \
                     (attempt {attempt}/{MAX_STORE_ATTEMPTS}): {err:#}",
                    descriptor.version
                ),
            }
        }
        self.store.append(source_id, descriptor)
    }
}
