use std::fs;
use std::time::Duration;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;
use tempfile::TempDir;

use svtplay_category::app::{self, Orchestrator, ProgressEvent, ProgressSink, RunOptions};
use svtplay_category::cancel::CancelToken;
use svtplay_category::domain::{DiscoveredItem, ItemId};
use svtplay_category::downloader::Downloader;
use svtplay_category::error::CategoryError;
use svtplay_category::ledger::FailureState;
use svtplay_category::store::{FileStateStore, StatePaths, StateStore};

struct NoopSink;

impl ProgressSink for NoopSink {
    fn event(&self, _event: ProgressEvent) {}
}

struct AlwaysFails;

impl Downloader for AlwaysFails {
    fn download(&self, _id: &ItemId) -> Result<(), CategoryError> {
        Err(CategoryError::Download("svtplay-dl exited with code 1".to_string()))
    }
}

fn id(value: &str) -> ItemId {
    value.parse().unwrap()
}

fn file_store() -> (TempDir, StatePaths, FileStateStore) {
    let temp = tempfile::tempdir().unwrap();
    let dir = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    let paths = StatePaths::in_dir(&dir);
    let store = FileStateStore::new(paths.clone());
    (temp, paths, store)
}

#[test]
fn missing_files_load_as_empty_state() {
    let (_temp, _paths, store) = file_store();
    let state = store.load().unwrap();
    assert!(state.seen.is_empty());
    assert!(state.episodes.is_empty());
    assert!(state.ledger.is_empty());
    assert!(state.series.is_empty());
}

#[test]
fn mark_then_unmark_restores_seen_file() {
    let (_temp, paths, store) = file_store();
    fs::write(
        paths.seen.as_std_path(),
        "https://www.svtplay.se/video/a\nhttps://www.svtplay.se/video/b\n",
    )
    .unwrap();
    let before = fs::read(paths.seen.as_std_path()).unwrap();

    let series = id("https://www.svtplay.se/serie");
    let marked = app::mark_complete(&store, &series).unwrap();
    assert!(marked.changed);
    assert!(store.load_seen().unwrap().contains(&series));

    let unmarked = app::unmark_complete(&store, &series).unwrap();
    assert!(unmarked.changed);
    assert_eq!(fs::read(paths.seen.as_std_path()).unwrap(), before);
}

#[test]
fn marking_twice_is_a_no_op() {
    let (_temp, paths, store) = file_store();
    let series = id("https://www.svtplay.se/serie");
    app::mark_complete(&store, &series).unwrap();
    let again = app::mark_complete(&store, &series).unwrap();
    assert!(!again.changed);
    assert_eq!(
        fs::read_to_string(paths.seen.as_std_path()).unwrap(),
        "https://www.svtplay.se/serie\n"
    );
}

#[test]
fn unmarking_unknown_id_leaves_file_absent() {
    let (_temp, paths, store) = file_store();
    let result = app::unmark_complete(&store, &id("https://www.svtplay.se/x")).unwrap();
    assert!(!result.changed);
    assert!(!paths.seen.as_std_path().exists());
}

#[test]
fn corrupt_ledger_is_an_error() {
    let (_temp, paths, store) = file_store();
    fs::write(paths.ledger.as_std_path(), "{ not json").unwrap();
    assert_matches!(store.load(), Err(CategoryError::StateCorrupt { .. }));
}

#[test]
fn blank_lines_are_ignored() {
    let (_temp, paths, store) = file_store();
    fs::write(paths.episodes.as_std_path(), "\nhttps://a/e1\n\n  \nhttps://a/e2\n").unwrap();
    let episodes = store.load_episodes().unwrap();
    assert_eq!(episodes.len(), 2);
    assert!(episodes.contains(&id("https://a/e2")));
}

#[test]
fn escalation_survives_restarts() {
    let (_temp, paths, store) = file_store();
    let items = vec![DiscoveredItem::standalone(id("https://www.svtplay.se/video/a"))];
    let options = RunOptions {
        delay: Duration::ZERO,
        ..RunOptions::default()
    };

    for expected in [
        FailureState::Failing(1),
        FailureState::Failing(2),
        FailureState::Permanent,
    ] {
        let restarted = FileStateStore::new(paths.clone());
        let mut orchestrator = Orchestrator::new(
            restarted.load().unwrap(),
            restarted,
            AlwaysFails,
            CancelToken::new(),
            options.clone(),
        );
        orchestrator.run(&items, &NoopSink).unwrap();
        assert_eq!(store.load_ledger().unwrap().state(&items[0].id), expected);
    }

    let ledger = fs::read_to_string(paths.ledger.as_std_path()).unwrap();
    let value: serde_json::Value = serde_json::from_str(&ledger).unwrap();
    let record = &value["https://www.svtplay.se/video/a"];
    assert_eq!(record["consecutive_run_failures"], 3);
    assert_eq!(record["permanent"], true);
    assert_eq!(
        record["last_error"],
        "download failed: svtplay-dl exited with code 1"
    );
}
