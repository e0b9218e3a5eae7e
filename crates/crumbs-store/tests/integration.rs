//! Integration tests for the crumbs-store crate.
//!
//! Every test attaches a real backend to a temporary data directory and
//! checks both what the tables return and what ends up in the log files.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crumbs_core::{
    Crumb, CrumbState, EntityError, Link, LinkType, Metadata, Property, Record, Stash, StashType,
    TableName, Trail, TrailState, Value, ValueType,
};
use crumbs_store::{
    Backend, Config, Filter, SqliteBackend, StoreError, SyncConfig, SyncStrategy, WarningKind,
};
use serde_json::json;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("crumbs_store=debug")
        .try_init();
}

fn attached(dir: &Path, sync: SyncConfig) -> SqliteBackend {
    init_tracing();
    let backend = SqliteBackend::new();
    backend
        .attach(&Config::new(dir).with_sync(sync))
        .unwrap();
    backend
}

fn line_count(dir: &Path, file: &str) -> usize {
    fs::read_to_string(dir.join(file))
        .unwrap()
        .lines()
        .filter(|line| !line.trim().is_empty())
        .count()
}

fn filter(value: serde_json::Value) -> Filter {
    match value {
        serde_json::Value::Object(map) => map,
        other => panic!("not an object: {other}"),
    }
}

fn property_id(backend: &SqliteBackend, name: &str) -> String {
    let properties = backend.get_table("properties").unwrap();
    let found = properties
        .fetch(Some(&filter(json!({ "name": name }))))
        .unwrap();
    assert_eq!(found.len(), 1, "property {name} not found");
    found[0].id().to_string()
}

// ═══════════════════════════════════════════════════════════════════════
//  Lifecycle
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn attach_provisions_directory_and_seeds() {
    let dir = tempfile::tempdir().unwrap();
    let data = dir.path().join("nested").join("data");
    let backend = attached(&data, SyncConfig::immediate());

    for file in [
        "crumbs.jsonl",
        "trails.jsonl",
        "links.jsonl",
        "properties.jsonl",
        "categories.jsonl",
        "crumb_properties.jsonl",
        "metadata.jsonl",
        "stashes.jsonl",
        "stash_history.jsonl",
    ] {
        assert!(data.join(file).exists(), "{file} missing");
    }
    assert!(data.join("cupboard.db").exists());
    assert_eq!(line_count(&data, "properties.jsonl"), 5);
    assert_eq!(line_count(&data, "categories.jsonl"), 9);
    assert_eq!(backend.sync_strategy().unwrap(), SyncStrategy::Immediate);
    assert!(backend.load_warnings().unwrap().is_empty());
}

#[test]
fn second_attach_does_not_reseed() {
    let dir = tempfile::tempdir().unwrap();
    let backend = attached(dir.path(), SyncConfig::immediate());
    backend.detach().unwrap();
    backend
        .attach(&Config::new(dir.path()).with_sync(SyncConfig::immediate()))
        .unwrap();

    let properties = backend.get_table("properties").unwrap();
    assert_eq!(properties.fetch(None).unwrap().len(), 5);
    assert_eq!(line_count(dir.path(), "properties.jsonl"), 5);
}

#[test]
fn attach_twice_fails_and_detach_twice_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    let backend = attached(dir.path(), SyncConfig::immediate());
    assert!(matches!(
        backend.attach(&Config::new(dir.path())),
        Err(StoreError::AlreadyAttached)
    ));

    backend.detach().unwrap();
    backend.detach().unwrap();
    assert!(!backend.is_attached());
}

#[test]
fn get_table_returns_the_same_accessor() {
    let dir = tempfile::tempdir().unwrap();
    let backend = attached(dir.path(), SyncConfig::immediate());

    for name in TableName::ALL {
        let first = backend.get_table(name.as_str()).unwrap();
        let second = backend.get_table(name.as_str()).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.name(), name);
    }
    assert!(matches!(
        backend.get_table("categories"),
        Err(StoreError::TableNotFound(name)) if name == "categories"
    ));
}

#[test]
fn accessor_from_previous_attach_stays_detached() {
    let dir = tempfile::tempdir().unwrap();
    let backend = attached(dir.path(), SyncConfig::immediate());
    let stale = backend.get_table("crumbs").unwrap();
    let id = stale.set("", Crumb::new("kept").into()).unwrap();

    backend.detach().unwrap();
    assert!(matches!(stale.get(&id), Err(StoreError::Detached)));

    backend
        .attach(&Config::new(dir.path()).with_sync(SyncConfig::immediate()))
        .unwrap();
    assert!(matches!(stale.get(&id), Err(StoreError::Detached)));
    assert!(matches!(
        stale.set("", Crumb::new("lost").into()),
        Err(StoreError::Detached)
    ));

    let fresh = backend.get_table("crumbs").unwrap();
    assert!(!Arc::ptr_eq(&stale, &fresh));
    assert_eq!(fresh.get_as::<Crumb>(&id).unwrap().name, "kept");
}

#[test]
fn in_memory_cache_leaves_no_database_file() {
    let dir = tempfile::tempdir().unwrap();
    init_tracing();
    let backend = SqliteBackend::new();
    backend
        .attach(&Config::new(dir.path()).with_cache_in_memory(true))
        .unwrap();
    let crumbs = backend.get_table("crumbs").unwrap();
    crumbs.set("", Crumb::new("ephemeral cache").into()).unwrap();
    backend.detach().unwrap();

    assert!(!dir.path().join("cupboard.db").exists());
    assert_eq!(line_count(dir.path(), "crumbs.jsonl"), 1);
}

// ═══════════════════════════════════════════════════════════════════════
//  Crumbs and properties
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn new_crumb_is_draft_with_every_property() {
    let dir = tempfile::tempdir().unwrap();
    let backend = attached(dir.path(), SyncConfig::immediate());
    let crumbs = backend.get_table("crumbs").unwrap();

    let mut crumb = Crumb::new("Test");
    crumb.state = CrumbState::Ready;
    let id = crumbs.set("", crumb.into()).unwrap();
    assert!(!id.is_empty());

    let stored: Crumb = crumbs.get_as(&id).unwrap();
    assert_eq!(stored.state, CrumbState::Draft);
    assert_eq!(stored.properties.len(), 5);

    let labels = property_id(&backend, "labels");
    assert_eq!(stored.properties[&labels], Value::List(Vec::new()));
    let priority = property_id(&backend, "priority");
    assert_eq!(stored.properties[&priority], Value::Absent);

    assert_eq!(line_count(dir.path(), "crumbs.jsonl"), 1);
    assert_eq!(line_count(dir.path(), "crumb_properties.jsonl"), 5);
}

#[test]
fn pebble_requires_taken() {
    let dir = tempfile::tempdir().unwrap();
    let backend = attached(dir.path(), SyncConfig::immediate());
    let crumbs = backend.get_table("crumbs").unwrap();
    let id = crumbs.set("", Crumb::new("ship it").into()).unwrap();

    let mut crumb: Crumb = crumbs.get_as(&id).unwrap();
    assert!(matches!(
        crumb.pebble(),
        Err(EntityError::InvalidTransition { .. })
    ));

    crumb.set_state("taken").unwrap();
    crumb.pebble().unwrap();
    crumbs.set(&id, crumb.into()).unwrap();
    assert_eq!(
        crumbs.get_as::<Crumb>(&id).unwrap().state,
        CrumbState::Pebble
    );
}

#[test]
fn dust_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let backend = attached(dir.path(), SyncConfig::immediate());
    let crumbs = backend.get_table("crumbs").unwrap();
    let id = crumbs.set("", Crumb::new("abandon me").into()).unwrap();

    for _ in 0..2 {
        let mut crumb: Crumb = crumbs.get_as(&id).unwrap();
        crumb.dust();
        crumbs.set(&id, crumb.into()).unwrap();
        assert_eq!(crumbs.get_as::<Crumb>(&id).unwrap().state, CrumbState::Dust);
    }
}

#[test]
fn new_property_is_backfilled_on_existing_crumbs() {
    let dir = tempfile::tempdir().unwrap();
    let backend = attached(dir.path(), SyncConfig::immediate());
    let crumbs = backend.get_table("crumbs").unwrap();
    let ids: Vec<String> = ["a", "b", "c"]
        .into_iter()
        .map(|name| crumbs.set("", Crumb::new(name).into()).unwrap())
        .collect();

    let properties = backend.get_table("properties").unwrap();
    let estimate = properties
        .set("", Property::new("estimate", "story points", ValueType::Integer).into())
        .unwrap();

    for id in &ids {
        let crumb: Crumb = crumbs.get_as(id).unwrap();
        assert_eq!(crumb.properties[&estimate], Value::Integer(0));
    }
    assert_eq!(line_count(dir.path(), "crumb_properties.jsonl"), 3 * 6);
}

#[test]
fn property_values_are_checked_on_store() {
    let dir = tempfile::tempdir().unwrap();
    let backend = attached(dir.path(), SyncConfig::immediate());
    let crumbs = backend.get_table("crumbs").unwrap();
    let priority = property_id(&backend, "priority");
    let owner = property_id(&backend, "owner");

    let high = backend
        .get_categories(&priority)
        .unwrap()
        .into_iter()
        .find(|c| c.name == "high")
        .unwrap();

    let mut crumb = Crumb::new("triage");
    crumb
        .properties
        .insert(priority.clone(), Value::Text(high.id.clone()));
    crumb
        .properties
        .insert(owner.clone(), Value::Text("ana".into()));
    let id = crumbs.set("", crumb.into()).unwrap();

    let stored: Crumb = crumbs.get_as(&id).unwrap();
    assert_eq!(stored.properties[&priority], Value::Text(high.id));
    assert_eq!(stored.properties[&owner], Value::Text("ana".into()));

    let mut bad = stored.clone();
    bad.properties
        .insert(priority.clone(), Value::Text("no-such-category".into()));
    assert!(matches!(
        crumbs.set(&id, bad.into()),
        Err(StoreError::Entity(EntityError::InvalidCategory { .. }))
    ));

    let mut unknown = stored;
    unknown
        .properties
        .insert("no-such-property".into(), Value::Text("x".into()));
    assert!(matches!(
        crumbs.set(&id, unknown.into()),
        Err(StoreError::Entity(EntityError::PropertyNotFound(_)))
    ));
}

#[test]
fn timestamps_in_list_properties_survive_reattach() {
    let dir = tempfile::tempdir().unwrap();
    let backend = attached(dir.path(), SyncConfig::immediate());
    let crumbs = backend.get_table("crumbs").unwrap();
    let labels = property_id(&backend, "labels");

    let due = chrono::DateTime::parse_from_rfc3339("2025-03-04T05:06:07.123456Z")
        .unwrap()
        .with_timezone(&chrono::Utc);
    let value = Value::List(vec![
        Value::Timestamp(due),
        Value::Text("2025-03-04T05:06:07Z".into()),
    ]);

    let mut crumb = Crumb::new("dated");
    crumb.properties.insert(labels.clone(), value.clone());
    let id = crumbs.set("", crumb.into()).unwrap();
    assert_eq!(crumbs.get_as::<Crumb>(&id).unwrap().properties[&labels], value);

    backend.detach().unwrap();
    backend
        .attach(&Config::new(dir.path()).with_sync(SyncConfig::immediate()))
        .unwrap();
    let crumbs = backend.get_table("crumbs").unwrap();
    assert_eq!(crumbs.get_as::<Crumb>(&id).unwrap().properties[&labels], value);
}

#[test]
fn fetch_filters_by_state() {
    let dir = tempfile::tempdir().unwrap();
    let backend = attached(dir.path(), SyncConfig::immediate());
    let crumbs = backend.get_table("crumbs").unwrap();

    crumbs.set("", Crumb::new("still a draft").into()).unwrap();
    let mut ready = Vec::new();
    for name in ["one", "two"] {
        let id = crumbs.set("", Crumb::new(name).into()).unwrap();
        let mut crumb: Crumb = crumbs.get_as(&id).unwrap();
        crumb.set_state("ready").unwrap();
        crumbs.set(&id, crumb.into()).unwrap();
        ready.push(id);
    }

    let found = crumbs
        .fetch(Some(&filter(json!({ "states": ["ready"] }))))
        .unwrap();
    let mut ids: Vec<String> = found.iter().map(|r| r.id().to_string()).collect();
    ids.sort();
    ready.sort();
    assert_eq!(ids, ready);

    assert_eq!(crumbs.fetch(None).unwrap().len(), 3);
    assert!(crumbs
        .fetch(Some(&filter(json!({ "states": [] }))))
        .unwrap()
        .is_empty());
    assert!(matches!(
        crumbs.fetch(Some(&filter(json!({ "states": ["sideways"] })))),
        Err(StoreError::InvalidFilter(_))
    ));
    assert!(matches!(
        crumbs.fetch(Some(&filter(json!({ "color": "red" })))),
        Err(StoreError::InvalidFilter(_))
    ));
}

#[test]
fn set_rejects_record_for_another_table() {
    let dir = tempfile::tempdir().unwrap();
    let backend = attached(dir.path(), SyncConfig::immediate());
    let crumbs = backend.get_table("crumbs").unwrap();

    assert!(matches!(
        crumbs.set("", Trail::new().into()),
        Err(StoreError::InvalidData {
            table: TableName::Crumbs,
            found: TableName::Trails,
        })
    ));
    assert!(matches!(crumbs.get(""), Err(StoreError::InvalidId)));
    assert!(matches!(
        crumbs.get("missing"),
        Err(StoreError::NotFound { entity: "crumb", .. })
    ));
    assert!(matches!(
        crumbs.delete("missing"),
        Err(StoreError::NotFound { .. })
    ));
    assert_eq!(line_count(dir.path(), "crumbs.jsonl"), 0);
}

#[test]
fn categories_are_ordered_and_checked() {
    let dir = tempfile::tempdir().unwrap();
    let backend = attached(dir.path(), SyncConfig::immediate());
    let priority = property_id(&backend, "priority");

    let names: Vec<String> = backend
        .get_categories(&priority)
        .unwrap()
        .into_iter()
        .map(|c| c.name)
        .collect();
    assert_eq!(names, ["highest", "high", "medium", "low", "lowest"]);

    let urgent = backend.define_category(&priority, "urgent", -1).unwrap();
    assert!(!urgent.id.is_empty());
    assert_eq!(backend.get_categories(&priority).unwrap()[0].name, "urgent");
    assert_eq!(line_count(dir.path(), "categories.jsonl"), 10);

    assert!(matches!(
        backend.define_category(&priority, "urgent", 7),
        Err(StoreError::DuplicateName { .. })
    ));
    let owner = property_id(&backend, "owner");
    assert!(matches!(
        backend.define_category(&owner, "alice", 0),
        Err(StoreError::Entity(EntityError::TypeMismatch { .. }))
    ));
    assert!(backend.get_categories("no-such-property").unwrap().is_empty());
}

// ═══════════════════════════════════════════════════════════════════════
//  Trails, links, metadata
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn trail_lifecycle_is_enforced() {
    let dir = tempfile::tempdir().unwrap();
    let backend = attached(dir.path(), SyncConfig::immediate());
    let trails = backend.get_table("trails").unwrap();
    let id = trails.set("", Trail::new().into()).unwrap();

    let mut trail: Trail = trails.get_as(&id).unwrap();
    trail.transition("active").unwrap();
    trails.set(&id, trail.clone().into()).unwrap();

    trail.complete().unwrap();
    trails.set(&id, trail.into()).unwrap();
    let done: Trail = trails.get_as(&id).unwrap();
    assert_eq!(done.state, TrailState::Completed);
    assert!(done.completed_at.is_some());

    // A terminal trail cannot be stored back into an earlier state.
    let mut rewound = done;
    rewound.state = TrailState::Active;
    rewound.completed_at = None;
    assert!(matches!(
        trails.set(&id, rewound.into()),
        Err(StoreError::Entity(EntityError::InvalidTransition { .. }))
    ));

    let completed = trails
        .fetch(Some(&filter(json!({ "states": ["completed"] }))))
        .unwrap();
    assert_eq!(completed.len(), 1);
}

#[test]
fn links_and_metadata_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let backend = attached(dir.path(), SyncConfig::immediate());
    let crumbs = backend.get_table("crumbs").unwrap();
    let parent = crumbs.set("", Crumb::new("epic").into()).unwrap();
    let child = crumbs.set("", Crumb::new("story").into()).unwrap();

    let links = backend.get_table("links").unwrap();
    let link_id = links
        .set("", Link::new(LinkType::ChildOf, &child, &parent).into())
        .unwrap();
    let link: Link = links.get_as(&link_id).unwrap();
    assert_eq!((link.from_id.as_str(), link.to_id.as_str()), (child.as_str(), parent.as_str()));

    let metadata = backend.get_table("metadata").unwrap();
    let note = metadata
        .set("", Metadata::new("comments", &child, "needs review").into())
        .unwrap();
    assert_eq!(
        metadata.get_as::<Metadata>(&note).unwrap().content,
        "needs review"
    );
    assert!(matches!(
        metadata.set("", Metadata::new("comments", "ghost", "hello").into()),
        Err(StoreError::NotFound { entity: "crumb", .. })
    ));

    // Deleting the crumb takes its metadata with it.
    crumbs.delete(&child).unwrap();
    assert!(matches!(
        metadata.get(&note),
        Err(StoreError::NotFound { .. })
    ));
    assert_eq!(line_count(dir.path(), "metadata.jsonl"), 0);
    assert_eq!(line_count(dir.path(), "links.jsonl"), 1);
}

// ═══════════════════════════════════════════════════════════════════════
//  Stashes
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn lock_is_exclusive_and_reentrant() {
    let dir = tempfile::tempdir().unwrap();
    let backend = attached(dir.path(), SyncConfig::immediate());
    let stashes = backend.get_table("stashes").unwrap();
    let id = stashes
        .set("", Stash::new("deploy-lock", StashType::Lock).into())
        .unwrap();

    let mut lock: Stash = stashes.get_as(&id).unwrap();
    lock.acquire("w1").unwrap();
    stashes.set(&id, lock.into()).unwrap();

    let mut lock: Stash = stashes.get_as(&id).unwrap();
    assert_eq!(lock.lock_holder(), Some("w1"));
    assert!(matches!(
        lock.acquire("w2"),
        Err(EntityError::LockHeld { holder }) if holder == "w1"
    ));
    assert!(matches!(
        lock.release("w2"),
        Err(EntityError::NotLockHolder { .. })
    ));

    let acquired_at = lock.value["acquired_at"].clone();
    lock.acquire("w1").unwrap();
    assert_eq!(lock.value["acquired_at"], acquired_at);
    lock.release("w1").unwrap();
    stashes.set(&id, lock.into()).unwrap();
    assert_eq!(stashes.get_as::<Stash>(&id).unwrap().lock_holder(), None);
}

#[test]
fn counter_history_records_every_version() {
    let dir = tempfile::tempdir().unwrap();
    let backend = attached(dir.path(), SyncConfig::immediate());
    let stashes = backend.get_table("stashes").unwrap();
    let id = stashes
        .set("", Stash::new("builds", StashType::Counter).into())
        .unwrap();

    let original: Stash = stashes.get_as(&id).unwrap();
    assert_eq!(original.version, 1);

    for delta in [2, 3] {
        let mut counter: Stash = stashes.get_as(&id).unwrap();
        counter.increment(delta, Some("ci")).unwrap();
        stashes.set(&id, counter.into()).unwrap();
    }

    let counter: Stash = stashes.get_as(&id).unwrap();
    assert_eq!(counter.counter_value().unwrap(), 5);
    assert_eq!(counter.version, 3);

    let history = backend.stash_history(&id).unwrap();
    let versions: Vec<i64> = history.iter().map(|h| h.version).collect();
    assert_eq!(versions, [1, 2, 3]);
    assert_eq!(history[0].operation, "create");
    assert_eq!(history[2].operation, "increment");
    assert_eq!(line_count(dir.path(), "stash_history.jsonl"), 3);

    // Storing an outdated copy is refused.
    assert!(matches!(
        stashes.set(&id, original.into()),
        Err(StoreError::InvalidField(_))
    ));
    assert!(matches!(backend.stash_history(""), Err(StoreError::InvalidId)));

    assert!(matches!(
        stashes.set("", Stash::new("builds", StashType::Counter).into()),
        Err(StoreError::DuplicateName { .. })
    ));
}

#[test]
fn history_is_contiguous_when_one_set_carries_several_mutations() {
    let dir = tempfile::tempdir().unwrap();
    let backend = attached(dir.path(), SyncConfig::immediate());
    let stashes = backend.get_table("stashes").unwrap();
    let id = stashes
        .set("", Stash::new("deploys", StashType::Counter).into())
        .unwrap();

    let mut counter: Stash = stashes.get_as(&id).unwrap();
    counter.increment(1, Some("ci")).unwrap();
    counter.increment(1, Some("ci")).unwrap();
    stashes.set(&id, counter.into()).unwrap();

    let versions: Vec<i64> = backend
        .stash_history(&id)
        .unwrap()
        .iter()
        .map(|h| h.version)
        .collect();
    assert_eq!(versions, [1, 2, 3]);
    assert_eq!(line_count(dir.path(), "stash_history.jsonl"), 3);

    let mut skipped: Stash = stashes.get_as(&id).unwrap();
    skipped.value = json!(10);
    skipped.version += 2;
    assert!(matches!(
        stashes.set(&id, skipped.into()),
        Err(StoreError::InvalidField(_))
    ));
    assert_eq!(stashes.get_as::<Stash>(&id).unwrap().version, 3);
}

// ═══════════════════════════════════════════════════════════════════════
//  Persistence
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn data_survives_reattach() {
    let dir = tempfile::tempdir().unwrap();
    let backend = attached(dir.path(), SyncConfig::immediate());
    let crumbs = backend.get_table("crumbs").unwrap();
    let stashes = backend.get_table("stashes").unwrap();

    let kept = crumbs.set("", Crumb::new("kept").into()).unwrap();
    let renamed = crumbs.set("", Crumb::new("old name").into()).unwrap();
    let removed = crumbs.set("", Crumb::new("removed").into()).unwrap();

    let mut crumb: Crumb = crumbs.get_as(&renamed).unwrap();
    crumb.name = "new name".into();
    crumbs.set(&renamed, crumb.into()).unwrap();
    crumbs.delete(&removed).unwrap();

    let stash = stashes
        .set("", Stash::new("visits", StashType::Counter).into())
        .unwrap();
    let mut counter: Stash = stashes.get_as(&stash).unwrap();
    counter.increment(1, None).unwrap();
    stashes.set(&stash, counter.into()).unwrap();

    let before: Crumb = crumbs.get_as(&kept).unwrap();
    backend.detach().unwrap();
    backend
        .attach(&Config::new(dir.path()).with_sync(SyncConfig::immediate()))
        .unwrap();

    let crumbs = backend.get_table("crumbs").unwrap();
    let after: Crumb = crumbs.get_as(&kept).unwrap();
    assert_eq!(after, before);
    assert_eq!(crumbs.get_as::<Crumb>(&renamed).unwrap().name, "new name");
    assert!(matches!(
        crumbs.get(&removed),
        Err(StoreError::NotFound { .. })
    ));

    let stashes = backend.get_table("stashes").unwrap();
    let counter: Stash = stashes.get_as(&stash).unwrap();
    assert_eq!(counter.counter_value().unwrap(), 1);
    assert_eq!(backend.stash_history(&stash).unwrap().len(), 2);
    assert!(backend.load_warnings().unwrap().is_empty());
}

#[test]
fn bad_lines_are_skipped_with_warnings() {
    let dir = tempfile::tempdir().unwrap();
    let crumbs_file = [
        r#"{"id":"c1","name":"first","state":"ready","created_at":"2024-01-01T00:00:00Z","updated_at":"2024-01-01T00:00:00Z","estimate":3}"#,
        "this is not json",
        "",
        r#"{"id":"c2","name":"second","state":"sideways","created_at":"2024-01-01T00:00:00Z","updated_at":"2024-01-01T00:00:00Z"}"#,
    ]
    .join("\n");
    fs::write(dir.path().join("crumbs.jsonl"), crumbs_file).unwrap();

    let backend = attached(dir.path(), SyncConfig::immediate());
    let crumbs = backend.get_table("crumbs").unwrap();

    let first: Crumb = crumbs.get_as("c1").unwrap();
    assert_eq!(first.state, CrumbState::Ready);
    assert_eq!(first.properties.len(), 5);
    assert!(matches!(crumbs.get("c2"), Err(StoreError::NotFound { .. })));

    let warnings = backend.load_warnings().unwrap();
    assert_eq!(warnings.len(), 2, "{warnings:?}");
    assert!(warnings.iter().all(|w| w.file == "crumbs.jsonl"));
    assert_eq!(warnings[0].line, Some(2));
    assert_eq!(warnings[0].kind, WarningKind::Malformed);
    assert_eq!(warnings[1].line, Some(4));
}

#[test]
fn orphaned_rows_are_dropped_on_load() {
    let dir = tempfile::tempdir().unwrap();
    let backend = attached(dir.path(), SyncConfig::immediate());
    let crumbs = backend.get_table("crumbs").unwrap();
    let id = crumbs.set("", Crumb::new("annotated").into()).unwrap();
    let metadata = backend.get_table("metadata").unwrap();
    metadata
        .set("", Metadata::new("comments", &id, "hello").into())
        .unwrap();
    backend.detach().unwrap();

    // Drop the crumb from its log behind the store's back.
    fs::write(dir.path().join("crumbs.jsonl"), "").unwrap();

    backend
        .attach(&Config::new(dir.path()).with_sync(SyncConfig::immediate()))
        .unwrap();
    let metadata = backend.get_table("metadata").unwrap();
    assert!(metadata.fetch(None).unwrap().is_empty());
    let warnings = backend.load_warnings().unwrap();
    assert!(warnings.iter().any(|w| w.kind == WarningKind::Orphaned));
}

#[test]
fn on_close_writes_only_at_detach() {
    let dir = tempfile::tempdir().unwrap();
    let backend = attached(dir.path(), SyncConfig::on_close());
    assert_eq!(backend.sync_strategy().unwrap(), SyncStrategy::OnClose);
    let crumbs = backend.get_table("crumbs").unwrap();
    for name in ["a", "b"] {
        crumbs.set("", Crumb::new(name).into()).unwrap();
    }
    assert_eq!(line_count(dir.path(), "crumbs.jsonl"), 0);

    backend.detach().unwrap();
    assert_eq!(line_count(dir.path(), "crumbs.jsonl"), 2);
    assert_eq!(line_count(dir.path(), "crumb_properties.jsonl"), 10);
}

#[test]
fn batch_flushes_on_size() {
    let dir = tempfile::tempdir().unwrap();
    let backend = attached(dir.path(), SyncConfig::batch(3, 60_000));
    let crumbs = backend.get_table("crumbs").unwrap();

    crumbs.set("", Crumb::new("one").into()).unwrap();
    crumbs.set("", Crumb::new("two").into()).unwrap();
    assert_eq!(line_count(dir.path(), "crumbs.jsonl"), 0);

    crumbs.set("", Crumb::new("three").into()).unwrap();
    assert_eq!(line_count(dir.path(), "crumbs.jsonl"), 3);

    crumbs.set("", Crumb::new("four").into()).unwrap();
    backend.detach().unwrap();
    assert_eq!(line_count(dir.path(), "crumbs.jsonl"), 4);
}

#[test]
fn batch_flushes_on_interval() {
    let dir = tempfile::tempdir().unwrap();
    let backend = attached(dir.path(), SyncConfig::batch(1_000, 50));
    let crumbs = backend.get_table("crumbs").unwrap();
    crumbs.set("", Crumb::new("eventually").into()).unwrap();

    let mut written = 0;
    for _ in 0..100 {
        thread::sleep(Duration::from_millis(20));
        written = line_count(dir.path(), "crumbs.jsonl");
        if written == 1 {
            break;
        }
    }
    assert_eq!(written, 1);
    backend.detach().unwrap();
}

#[test]
fn dropping_the_backend_flushes() {
    let dir = tempfile::tempdir().unwrap();
    {
        let backend = attached(dir.path(), SyncConfig::on_close());
        let trails = backend.get_table("trails").unwrap();
        trails.set("", Trail::new().into()).unwrap();
    }
    assert_eq!(line_count(dir.path(), "trails.jsonl"), 1);
}

#[test]
fn records_convert_through_the_sum_type() {
    let dir = tempfile::tempdir().unwrap();
    let backend = attached(dir.path(), SyncConfig::immediate());
    let properties = backend.get_table("properties").unwrap();

    let all = properties.fetch(None).unwrap();
    assert!(all.iter().all(|r| matches!(r, Record::Property(_))));
    let id = all[0].id().to_string();
    assert!(matches!(
        properties.get_as::<Crumb>(&id),
        Err(StoreError::InvalidData {
            table: TableName::Properties,
            found: TableName::Properties,
        })
    ));
}
