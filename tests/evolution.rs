mod common;

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};
use std::thread;

use anyhow::{Result, anyhow};
use schema_drift::evolution::{
    HistoryStore, MAX_STORE_ATTEMPTS, MemoryStore, SchemaEvolution, SchemaHistory, TrackError,
};
use schema_drift::normalize::normalize;
use schema_drift::schema::{self, FieldDescriptor, FieldType, SchemaDescriptor};
use serde_json::json;

use common::TestWorkspace;

fn candidate(source_id: &str, fields: &[(&str, FieldType)]) -> SchemaDescriptor {
    SchemaDescriptor {
        source_id: source_id.to_string(),
        version: 1,
        fields: fields
            .iter()
            .map(|(name, field_type)| FieldDescriptor {
                name: name.to_string(),
                field_type: *field_type,
                nullable: false,
            })
            .collect(),
        created_at: None,
        row_count: 1,
    }
}

#[test]
fn first_upload_records_version_one() {
    let tracker = SchemaEvolution::new(Box::<MemoryStore>::default());
    let recorded = tracker
        .track("orders", candidate("orders", &[("a", FieldType::Integer)]))
        .expect("track");
    assert_eq!(recorded.version, 1);
    assert!(recorded.created_at.is_some());
}

#[test]
fn schema_change_assigns_the_next_version() {
    let workspace = TestWorkspace::new();
    let tracker = SchemaEvolution::with_directory(workspace.store());

    let v1 = tracker
        .track("orders", candidate("orders", &[("a", FieldType::Integer)]))
        .expect("track v1");
    assert_eq!(v1.version, 1);

    let v2 = tracker
        .track(
            "orders",
            candidate(
                "orders",
                &[("a", FieldType::Integer), ("b", FieldType::String)],
            ),
        )
        .expect("track v2");
    assert_eq!(v2.version, 2);

    let history = tracker.history("orders").expect("history");
    assert_eq!(history.versions.len(), 2);
}

#[test]
fn unchanged_schema_is_idempotent() {
    let workspace = TestWorkspace::new();
    let tracker = SchemaEvolution::with_directory(workspace.store());

    let first = tracker
        .track("orders", candidate("orders", &[("a", FieldType::Integer)]))
        .expect("first track");
    let second = tracker
        .track("orders", candidate("orders", &[("a", FieldType::Integer)]))
        .expect("second track");

    assert_eq!(second.version, first.version);
    assert_eq!(second.created_at, first.created_at);
    let history = tracker.history("orders").expect("history");
    assert_eq!(history.versions.len(), 1);
}

#[test]
fn field_order_alone_does_not_create_a_version() {
    let tracker = SchemaEvolution::new(Box::<MemoryStore>::default());
    tracker
        .track(
            "orders",
            candidate(
                "orders",
                &[("a", FieldType::Integer), ("b", FieldType::String)],
            ),
        )
        .expect("track v1");
    let reordered = tracker
        .track(
            "orders",
            candidate(
                "orders",
                &[("b", FieldType::String), ("a", FieldType::Integer)],
            ),
        )
        .expect("track reordered");
    assert_eq!(reordered.version, 1);
}

#[test]
fn distinct_sources_version_independently() {
    let tracker = SchemaEvolution::new(Box::<MemoryStore>::default());
    let orders = tracker
        .track("orders", candidate("orders", &[("a", FieldType::Integer)]))
        .expect("orders");
    let users = tracker
        .track("users", candidate("users", &[("name", FieldType::String)]))
        .expect("users");
    assert_eq!(orders.version, 1);
    assert_eq!(users.version, 1);
}

#[test]
fn generated_schemas_flow_through_tracking() {
    let workspace = TestWorkspace::new();
    let tracker = SchemaEvolution::with_directory(workspace.store());

    let first = normalize(&json!([{"a": 1}]));
    let v1 = tracker
        .track("s", schema::generate(&first, "s"))
        .expect("v1");
    assert_eq!(v1.version, 1);

    let second = normalize(&json!([{"a": 2, "b": "x"}]));
    let v2 = tracker
        .track("s", schema::generate(&second, "s"))
        .expect("v2");
    assert_eq!(v2.version, 2);

    let third = normalize(&json!([{"a": 3, "b": "y"}]));
    let unchanged = tracker
        .track("s", schema::generate(&third, "s"))
        .expect("unchanged");
    assert_eq!(unchanged.version, 2);
    assert_eq!(unchanged.created_at, v2.created_at);
}

#[test]
fn concurrent_tracking_never_skips_or_reuses_versions() {
    const WRITERS: usize = 8;

    let workspace = TestWorkspace::new();
    let tracker = Arc::new(SchemaEvolution::with_directory(workspace.store()));

    thread::scope(|scope| {
        for writer in 0..WRITERS {
            let tracker = Arc::clone(&tracker);
            scope.spawn(move || {
                let field = format!("field_{writer}");
                tracker
                    .track(
                        "shared",
                        candidate("shared", &[(field.as_str(), FieldType::Integer)]),
                    )
                    .expect("concurrent track");
            });
        }
    });

    let history = tracker.history("shared").expect("history");
    let versions: Vec<u32> = history.versions.iter().map(|d| d.version).collect();
    assert_eq!(versions, (1..=WRITERS as u32).collect::<Vec<_>>());
}

/// Store that fails a configurable number of loads before recovering.
struct FlakyStore {
    inner: MemoryStore,
    failures_left: AtomicUsize,
}

impl FlakyStore {
    fn failing(times: usize) -> Self {
        Self {
            inner: MemoryStore::default(),
            failures_left: AtomicUsize::new(times),
        }
    }
}

impl HistoryStore for FlakyStore {
    fn load(&self, source_id: &str) -> Result<SchemaHistory> {
        if self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| {
                left.checked_sub(1)
            })
            .is_ok()
        {
            return Err(anyhow!("store offline"));
        }
        self.inner.load(source_id)
    }

    fn append(&self, source_id: &str, descriptor: &SchemaDescriptor) -> Result<()> {
        self.inner.append(source_id, descriptor)
    }
}

#[test]
fn transient_store_failures_are_retried() {
    let store = FlakyStore::failing(MAX_STORE_ATTEMPTS - 1);
    let tracker = SchemaEvolution::new(Box::new(store));
    let recorded = tracker
        .track("orders", candidate("orders", &[("a", FieldType::Integer)]))
        .expect("recovered after retries");
    assert_eq!(recorded.version, 1);
}

#[test]
fn exhausted_store_surfaces_a_recoverable_error() {
    let store = FlakyStore::failing(usize::MAX);
    let tracker = SchemaEvolution::new(Box::new(store));
    let err = tracker
        .track("orders", candidate("orders", &[("a", FieldType::Integer)]))
        .expect_err("store never recovers");

    let TrackError::Persistence {
        source_id,
        attempts,
        ..
    } = &err;
    assert_eq!(source_id, "orders");
    assert_eq!(*attempts, MAX_STORE_ATTEMPTS);

    // The caller can still proceed with the unversioned candidate.
    let candidate = err.into_candidate();
    assert!(candidate.created_at.is_none());
    assert_eq!(candidate.fields.len(), 1);
}

#[test]
fn histories_survive_a_tracker_restart() {
    let workspace = TestWorkspace::new();
    {
        let tracker = SchemaEvolution::with_directory(workspace.store());
        tracker
            .track("orders", candidate("orders", &[("a", FieldType::Integer)]))
            .expect("track");
    }
    let tracker = SchemaEvolution::with_directory(workspace.store());
    let latest = tracker.latest("orders").expect("latest").expect("present");
    assert_eq!(latest.version, 1);
}
