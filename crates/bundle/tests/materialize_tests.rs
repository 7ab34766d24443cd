//! Episode materialization against a real span log
//!
//! 1. Only true descendant steps are exported, ranked by start time
//! 2. The archive extracts to the same files under the episode name
//! 3. Re-materializing an unchanged log is byte-identical
//! 4. Empty episodes still produce a directory and an openable archive
//! 5. Broken parent chains surface as errors

use std::fs;
use std::path::Path;
use std::sync::Arc;

use agenttrace_bundle::{
    step_file_name, EpisodeArchiveReader, EpisodeBundler, Materializer, ARCHIVE_EXTENSION,
};
use agenttrace_core::{
    AttributeValue, Attributes, Error, ScopeKind, SpanRecord, SpanStatus, ATTR_EXPERIMENT,
    ATTR_NAME, ATTR_SCOPE_KIND,
};
use agenttrace_durability::{DurabilityMode, SpanStore};
use tempfile::TempDir;

// ============================================================================
// Test Helpers
// ============================================================================

const TRACE: u64 = 900;

fn scoped(
    span_id: u64,
    parent: Option<u64>,
    kind: Option<ScopeKind>,
    start: Option<i64>,
) -> SpanRecord {
    let mut attributes = Attributes::new();
    if let Some(kind) = kind {
        attributes.insert(ATTR_SCOPE_KIND.to_string(), kind.as_str().into());
    }
    SpanRecord {
        trace_id: TRACE,
        span_id,
        parent_span_id: parent,
        name: format!("span-{}", span_id),
        attributes,
        start_time: start,
        end_time: start.map(|s| s + 1),
        status: SpanStatus::Ok,
    }
}

fn episode(span_id: u64, parent: Option<u64>, name: &str, experiment: &str) -> SpanRecord {
    let mut record = scoped(span_id, parent, Some(ScopeKind::Episode), Some(0));
    record
        .attributes
        .insert(ATTR_NAME.to_string(), AttributeValue::from(name));
    record
        .attributes
        .insert(ATTR_EXPERIMENT.to_string(), AttributeValue::from(experiment));
    record
}

fn step(span_id: u64, parent: u64, start: Option<i64>, action: &str) -> SpanRecord {
    let mut record = scoped(span_id, Some(parent), Some(ScopeKind::Step), start);
    record
        .attributes
        .insert("action".to_string(), AttributeValue::from(action));
    record
}

fn open_store(dir: &TempDir) -> Arc<SpanStore> {
    Arc::new(SpanStore::open(dir.path(), DurabilityMode::Strict).unwrap())
}

fn step_files(dir: &Path) -> Vec<String> {
    let mut names: Vec<_> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|n| n.starts_with("step_"))
        .collect();
    names.sort();
    names
}

// ============================================================================
// Selection and ordering
// ============================================================================

#[test]
fn test_exports_only_descendant_steps_in_start_order() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);

    let ep = episode(10, Some(1), "episode_0", "exp");
    let other_ep = episode(20, Some(1), "episode_1", "exp");
    store
        .append_all(&[
            // descendants: direct and via an untyped intermediate span
            step(11, 10, Some(300), "c"),
            step(12, 10, Some(100), "a"),
            scoped(13, Some(10), None, Some(150)),
            step(14, 13, Some(200), "b"),
            // unrelated: another episode, an orphan, a non-step child
            step(21, 20, Some(50), "x"),
            step(22, 999, Some(60), "y"),
            scoped(15, Some(10), None, Some(10)),
            other_ep.clone(),
            ep.clone(),
        ])
        .unwrap();

    let bundler = EpisodeBundler::new(Arc::clone(&store));
    let bundle = bundler.materialize(&ep).unwrap();

    assert_eq!(bundle.step_count, 3);
    assert_eq!(bundle.directory, dir.path().join("exp").join("episode_0"));
    assert_eq!(
        step_files(&bundle.directory),
        vec!["step_0.json", "step_1.json", "step_2.json"]
    );

    let actions: Vec<String> = (0..3)
        .map(|rank| {
            let data = fs::read(bundle.directory.join(step_file_name(rank))).unwrap();
            let record: SpanRecord = serde_json::from_slice(&data).unwrap();
            record.attributes["action"].to_string()
        })
        .collect();
    assert_eq!(actions, vec!["a", "b", "c"]);
}

#[test]
fn test_missing_start_time_sorts_first() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let ep = episode(10, None, "ep", "exp");
    store
        .append_all(&[
            step(11, 10, Some(5), "timed"),
            step(12, 10, None, "untimed"),
            ep.clone(),
        ])
        .unwrap();

    let bundle = EpisodeBundler::new(store).materialize(&ep).unwrap();
    let steps = EpisodeArchiveReader::read_steps(&bundle.archive).unwrap();

    assert_eq!(steps.len(), 2);
    assert_eq!(steps[0].span_id, 12);
    assert_eq!(steps[1].span_id, 11);
}

#[test]
fn test_steps_in_other_trace_are_excluded() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let ep = episode(10, None, "ep", "exp");
    let mut foreign = step(11, 10, Some(1), "foreign");
    foreign.trace_id = TRACE + 1;
    store.append_all(&[foreign, ep.clone()]).unwrap();

    let bundle = EpisodeBundler::new(store).materialize(&ep).unwrap();
    assert_eq!(bundle.step_count, 0);
}

// ============================================================================
// Archive
// ============================================================================

#[test]
fn test_archive_matches_directory() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let ep = episode(10, None, "episode_0", "exp");
    let steps: Vec<_> = (0..4)
        .map(|i| step(100 + i, 10, Some(i as i64), "act"))
        .collect();
    store.append_all(&steps).unwrap();
    store.append(&ep).unwrap();

    let bundle = EpisodeBundler::new(store).materialize(&ep).unwrap();

    assert_eq!(
        bundle.archive,
        dir.path()
            .join("exp")
            .join(format!("episode_0.{}", ARCHIVE_EXTENSION))
    );
    assert_eq!(bundle.archive, dir.path().join("exp").join("episode_0.zip"));
    let entries = EpisodeArchiveReader::read_entries(&bundle.archive).unwrap();
    assert_eq!(entries.len(), 4);
    for rank in 0..4 {
        let key = format!("episode_0/{}", step_file_name(rank));
        let on_disk = fs::read(bundle.directory.join(step_file_name(rank))).unwrap();
        assert_eq!(entries[&key], on_disk);
    }
}

#[test]
fn test_zero_steps_gives_empty_bundle() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let ep = episode(10, None, "lonely", "exp");
    store.append(&ep).unwrap();

    let bundle = EpisodeBundler::new(store).materialize(&ep).unwrap();

    assert_eq!(bundle.step_count, 0);
    assert!(bundle.directory.is_dir());
    assert!(step_files(&bundle.directory).is_empty());
    assert!(EpisodeArchiveReader::read_entries(&bundle.archive)
        .unwrap()
        .is_empty());
    assert_eq!(
        EpisodeArchiveReader::directories(&bundle.archive).unwrap(),
        vec!["lonely".to_string()]
    );
}

#[test]
fn test_rematerialize_is_byte_identical() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let ep = episode(10, None, "ep", "exp");
    store
        .append_all(&[
            step(11, 10, Some(1), "a"),
            step(12, 10, Some(2), "b"),
            ep.clone(),
        ])
        .unwrap();
    let bundler = EpisodeBundler::new(store);

    let first = bundler.materialize(&ep).unwrap();
    let first_step = fs::read(first.directory.join("step_1.json")).unwrap();
    let first_archive = fs::read(&first.archive).unwrap();

    let second = bundler.materialize(&ep).unwrap();
    assert_eq!(first, second);
    assert_eq!(step_files(&second.directory).len(), 2);
    assert_eq!(
        fs::read(second.directory.join("step_1.json")).unwrap(),
        first_step
    );
    assert_eq!(fs::read(&second.archive).unwrap(), first_archive);
}

// ============================================================================
// Naming
// ============================================================================

#[test]
fn test_names_fall_back() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    // No name or experiment attribute: span name and "default" are used
    let ep = scoped(10, None, Some(ScopeKind::Episode), Some(0));
    store.append(&ep).unwrap();

    let bundle = EpisodeBundler::new(store).materialize(&ep).unwrap();

    assert_eq!(bundle.experiment, "default");
    assert_eq!(bundle.episode, "span-10");
    assert!(dir.path().join("default").join("span-10").is_dir());
}

#[test]
fn test_explicit_run_root() {
    let log_dir = TempDir::new().unwrap();
    let out_dir = TempDir::new().unwrap();
    let store = open_store(&log_dir);
    let ep = episode(10, None, "ep", "exp");
    store.append(&ep).unwrap();

    let bundler = EpisodeBundler::with_run_root(store, out_dir.path()).compression_level(1);
    let bundle = bundler.materialize(&ep).unwrap();

    assert_eq!(bundler.run_root(), out_dir.path());
    assert!(bundle.archive.starts_with(out_dir.path()));
}

#[test]
fn test_path_like_episode_name_rejected() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let ep = episode(10, None, "../escape", "exp");
    store.append(&ep).unwrap();

    let result = EpisodeBundler::new(store).materialize(&ep);
    assert!(matches!(result, Err(Error::Materialization { .. })));
    assert!(!dir.path().join("escape").exists());
}

// ============================================================================
// Failures
// ============================================================================

#[test]
fn test_parent_cycle_fails_materialization() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let ep = episode(10, None, "ep", "exp");
    store
        .append_all(&[step(11, 12, Some(1), "a"), step(12, 11, Some(2), "b"), ep.clone()])
        .unwrap();

    let result = EpisodeBundler::new(store).materialize(&ep);
    assert!(matches!(result, Err(Error::AncestryCycle { .. })));
}

#[test]
fn test_corrupt_log_fails_materialization() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let ep = episode(10, None, "ep", "exp");
    store.append(&ep).unwrap();
    fs::write(store.path(), b"garbage\n").unwrap();

    let result = EpisodeBundler::new(store).materialize(&ep);
    assert!(matches!(result, Err(Error::Corrupt { line: 1, .. })));
}
