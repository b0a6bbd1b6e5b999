use std::cell::RefCell;
use std::collections::HashSet;
use std::fs;
use std::io::{self, Write};
use std::rc::Rc;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tempfile::Builder;

use crate::domain::ItemId;
use crate::error::CategoryError;
use crate::ledger::ErrorLedger;
use crate::staleness::StalenessTracker;

/// Insertion-ordered set of item ids, persisted one id per line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdSet {
    order: Vec<ItemId>,
    members: HashSet<ItemId>,
}

impl IdSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: &ItemId) -> bool {
        self.members.contains(id)
    }

    /// Returns `false` when the id was already present.
    pub fn add(&mut self, id: ItemId) -> bool {
        if !self.members.insert(id.clone()) {
            return false;
        }
        self.order.push(id);
        true
    }

    /// Returns `false` when the id was not present.
    pub fn remove(&mut self, id: &ItemId) -> bool {
        if !self.members.remove(id) {
            return false;
        }
        self.order.retain(|entry| entry != id);
        true
    }

    pub fn iter(&self) -> impl Iterator<Item = &ItemId> {
        self.order.iter()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn parse_lines(content: &str) -> Result<Self, CategoryError> {
        let mut set = Self::new();
        for line in content.lines().filter(|line| !line.trim().is_empty()) {
            set.add(line.parse()?);
        }
        Ok(set)
    }

    pub fn to_lines(&self) -> String {
        let mut out = String::new();
        for id in &self.order {
            out.push_str(id.as_str());
            out.push('\n');
        }
        out
    }
}

impl FromIterator<ItemId> for IdSet {
    fn from_iter<T: IntoIterator<Item = ItemId>>(iter: T) -> Self {
        let mut set = Self::new();
        for id in iter {
            set.add(id);
        }
        set
    }
}

/// Everything one run reads and mutates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunState {
    pub seen: IdSet,
    pub episodes: IdSet,
    pub ledger: ErrorLedger,
    pub series: StalenessTracker,
}

/// Durable backing for the four stores.
///
/// Every save must leave the previous content intact if it fails midway.
pub trait StateStore {
    fn load_seen(&self) -> Result<IdSet, CategoryError>;
    fn load_episodes(&self) -> Result<IdSet, CategoryError>;
    fn load_ledger(&self) -> Result<ErrorLedger, CategoryError>;
    fn load_series(&self) -> Result<StalenessTracker, CategoryError>;

    fn save_seen(&self, seen: &IdSet) -> Result<(), CategoryError>;
    fn save_episodes(&self, episodes: &IdSet) -> Result<(), CategoryError>;
    fn save_ledger(&self, ledger: &ErrorLedger) -> Result<(), CategoryError>;
    fn save_series(&self, series: &StalenessTracker) -> Result<(), CategoryError>;

    fn load(&self) -> Result<RunState, CategoryError> {
        Ok(RunState {
            seen: self.load_seen()?,
            episodes: self.load_episodes()?,
            ledger: self.load_ledger()?,
            series: self.load_series()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatePaths {
    pub seen: Utf8PathBuf,
    pub episodes: Utf8PathBuf,
    pub ledger: Utf8PathBuf,
    pub series: Utf8PathBuf,
}

impl StatePaths {
    pub fn in_dir(dir: &Utf8Path) -> Self {
        Self {
            seen: dir.join("seen_urls.txt"),
            episodes: dir.join("seen_episodes.txt"),
            ledger: dir.join("errors.json"),
            series: dir.join("series_state.json"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FileStateStore {
    paths: StatePaths,
}

impl FileStateStore {
    pub fn new(paths: StatePaths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &StatePaths {
        &self.paths
    }

    fn read_optional(path: &Utf8Path) -> Result<Option<String>, CategoryError> {
        match fs::read_to_string(path.as_std_path()) {
            Ok(content) => Ok(Some(content)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) if err.kind() == io::ErrorKind::InvalidData => {
                Err(CategoryError::StateCorrupt {
                    path: path.as_std_path().to_path_buf(),
                    message: "file is not valid UTF-8".to_string(),
                })
            }
            Err(err) => Err(CategoryError::StateRead {
                path: path.as_std_path().to_path_buf(),
                message: err.to_string(),
            }),
        }
    }

    fn load_lines(path: &Utf8Path) -> Result<IdSet, CategoryError> {
        let Some(content) = Self::read_optional(path)? else {
            return Ok(IdSet::new());
        };
        IdSet::parse_lines(&content).map_err(|err| CategoryError::StateCorrupt {
            path: path.as_std_path().to_path_buf(),
            message: err.to_string(),
        })
    }

    fn load_json<T: DeserializeOwned + Default>(path: &Utf8Path) -> Result<T, CategoryError> {
        let Some(content) = Self::read_optional(path)? else {
            return Ok(T::default());
        };
        serde_json::from_str(&content).map_err(|err| CategoryError::StateCorrupt {
            path: path.as_std_path().to_path_buf(),
            message: err.to_string(),
        })
    }

    fn save_json<T: Serialize>(path: &Utf8Path, value: &T) -> Result<(), CategoryError> {
        let mut content = serde_json::to_vec_pretty(value).map_err(|err| {
            CategoryError::StateWrite {
                path: path.as_std_path().to_path_buf(),
                message: err.to_string(),
            }
        })?;
        content.push(b'\n');
        write_atomic(path, &content)
    }
}

impl StateStore for FileStateStore {
    fn load_seen(&self) -> Result<IdSet, CategoryError> {
        Self::load_lines(&self.paths.seen)
    }

    fn load_episodes(&self) -> Result<IdSet, CategoryError> {
        Self::load_lines(&self.paths.episodes)
    }

    fn load_ledger(&self) -> Result<ErrorLedger, CategoryError> {
        Self::load_json(&self.paths.ledger)
    }

    fn load_series(&self) -> Result<StalenessTracker, CategoryError> {
        Self::load_json(&self.paths.series)
    }

    fn save_seen(&self, seen: &IdSet) -> Result<(), CategoryError> {
        write_atomic(&self.paths.seen, seen.to_lines().as_bytes())
    }

    fn save_episodes(&self, episodes: &IdSet) -> Result<(), CategoryError> {
        write_atomic(&self.paths.episodes, episodes.to_lines().as_bytes())
    }

    fn save_ledger(&self, ledger: &ErrorLedger) -> Result<(), CategoryError> {
        Self::save_json(&self.paths.ledger, ledger)
    }

    fn save_series(&self, series: &StalenessTracker) -> Result<(), CategoryError> {
        Self::save_json(&self.paths.series, series)
    }
}

/// Writes `content` to a temp file next to `path`, then renames it over `path`.
pub fn write_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), CategoryError> {
    let write_err = |message: String| CategoryError::StateWrite {
        path: path.as_std_path().to_path_buf(),
        message,
    };
    let parent = match path.parent() {
        Some(parent) if !parent.as_str().is_empty() => parent.to_path_buf(),
        _ => Utf8PathBuf::from("."),
    };
    fs::create_dir_all(parent.as_std_path()).map_err(|err| write_err(err.to_string()))?;
    let mut temp = Builder::new()
        .prefix(".svtplay-category")
        .suffix(".tmp")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| write_err(err.to_string()))?;
    temp.write_all(content)
        .map_err(|err| write_err(err.to_string()))?;
    temp.as_file()
        .sync_all()
        .map_err(|err| write_err(err.to_string()))?;
    temp.persist(path.as_std_path())
        .map_err(|err| write_err(err.error.to_string()))?;
    Ok(())
}

/// Save counters kept by [`MemoryStateStore`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveCounts {
    pub seen: usize,
    pub episodes: usize,
    pub ledger: usize,
    pub series: usize,
}

impl SaveCounts {
    pub fn total(&self) -> usize {
        self.seen + self.episodes + self.ledger + self.series
    }
}

#[derive(Debug, Default)]
struct MemoryInner {
    state: RunState,
    saves: SaveCounts,
}

/// In-memory [`StateStore`]; clones share the same state.
#[derive(Debug, Clone, Default)]
pub struct MemoryStateStore {
    inner: Rc<RefCell<MemoryInner>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: RunState) -> Self {
        Self {
            inner: Rc::new(RefCell::new(MemoryInner {
                state,
                saves: SaveCounts::default(),
            })),
        }
    }

    pub fn snapshot(&self) -> RunState {
        self.inner.borrow().state.clone()
    }

    pub fn saves(&self) -> SaveCounts {
        self.inner.borrow().saves
    }
}

impl StateStore for MemoryStateStore {
    fn load_seen(&self) -> Result<IdSet, CategoryError> {
        Ok(self.inner.borrow().state.seen.clone())
    }

    fn load_episodes(&self) -> Result<IdSet, CategoryError> {
        Ok(self.inner.borrow().state.episodes.clone())
    }

    fn load_ledger(&self) -> Result<ErrorLedger, CategoryError> {
        Ok(self.inner.borrow().state.ledger.clone())
    }

    fn load_series(&self) -> Result<StalenessTracker, CategoryError> {
        Ok(self.inner.borrow().state.series.clone())
    }

    fn save_seen(&self, seen: &IdSet) -> Result<(), CategoryError> {
        let mut inner = self.inner.borrow_mut();
        inner.state.seen = seen.clone();
        inner.saves.seen += 1;
        Ok(())
    }

    fn save_episodes(&self, episodes: &IdSet) -> Result<(), CategoryError> {
        let mut inner = self.inner.borrow_mut();
        inner.state.episodes = episodes.clone();
        inner.saves.episodes += 1;
        Ok(())
    }

    fn save_ledger(&self, ledger: &ErrorLedger) -> Result<(), CategoryError> {
        let mut inner = self.inner.borrow_mut();
        inner.state.ledger = ledger.clone();
        inner.saves.ledger += 1;
        Ok(())
    }

    fn save_series(&self, series: &StalenessTracker) -> Result<(), CategoryError> {
        let mut inner = self.inner.borrow_mut();
        inner.state.series = series.clone();
        inner.saves.series += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use chrono::Utc;

    use super::*;

    fn id(value: &str) -> ItemId {
        value.parse().unwrap()
    }

    fn temp_store() -> (tempfile::TempDir, FileStateStore) {
        let temp = tempfile::tempdir().unwrap();
        let dir = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let store = FileStateStore::new(StatePaths::in_dir(&dir));
        (temp, store)
    }

    #[test]
    fn id_set_keeps_insertion_order() {
        let mut set = IdSet::new();
        assert!(set.add(id("b")));
        assert!(set.add(id("a")));
        assert!(!set.add(id("b")));
        assert_eq!(set.to_lines(), "b\na\n");
        assert!(set.remove(&id("b")));
        assert!(!set.remove(&id("b")));
        assert_eq!(set.to_lines(), "a\n");
    }

    #[test]
    fn parse_lines_skips_blanks() {
        let set = IdSet::parse_lines("a\n\n  b  \n\n").unwrap();
        assert_eq!(set.len(), 2);
        assert!(set.contains(&id("b")));
    }

    #[test]
    fn missing_files_load_empty() {
        let (_temp, store) = temp_store();
        let state = store.load().unwrap();
        assert_eq!(state, RunState::default());
    }

    #[test]
    fn saved_state_reloads() {
        let (_temp, store) = temp_store();
        let mut state = RunState::default();
        state.seen.add(id("A"));
        state.episodes.add(id("S/e1"));
        state.ledger.record_failure(&id("B"), "exit 1", Utc::now());

        store.save_seen(&state.seen).unwrap();
        store.save_episodes(&state.episodes).unwrap();
        store.save_ledger(&state.ledger).unwrap();
        store.save_series(&state.series).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded, state);
        let raw = fs::read_to_string(store.paths().ledger.as_std_path()).unwrap();
        assert!(raw.contains("\"consecutive_run_failures\": 1"));
    }

    #[test]
    fn corrupt_json_is_an_error() {
        let (_temp, store) = temp_store();
        fs::write(store.paths().ledger.as_std_path(), "{not json").unwrap();
        let err = store.load().unwrap_err();
        assert_matches!(err, CategoryError::StateCorrupt { .. });
    }

    #[test]
    fn blank_json_store_is_an_error() {
        let (_temp, store) = temp_store();
        fs::write(store.paths().ledger.as_std_path(), "").unwrap();
        assert_matches!(store.load_ledger(), Err(CategoryError::StateCorrupt { .. }));
        fs::write(store.paths().series.as_std_path(), "  \n").unwrap();
        assert_matches!(store.load_series(), Err(CategoryError::StateCorrupt { .. }));
    }

    #[test]
    fn non_utf8_line_store_is_an_error() {
        let (_temp, store) = temp_store();
        fs::write(store.paths().seen.as_std_path(), [0xff, 0xfe, b'\n']).unwrap();
        let err = store.load_seen().unwrap_err();
        assert_matches!(err, CategoryError::StateCorrupt { .. });
    }

    #[test]
    fn atomic_write_leaves_no_temp_files() {
        let (temp, store) = temp_store();
        let mut seen = IdSet::new();
        seen.add(id("A"));
        store.save_seen(&seen).unwrap();
        store.save_seen(&seen).unwrap();
        let names: Vec<_> = fs::read_dir(temp.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["seen_urls.txt".to_string()]);
    }

    #[test]
    fn memory_store_counts_saves() {
        let store = MemoryStateStore::new();
        let clone = store.clone();
        clone.save_seen(&IdSet::from_iter([id("A")])).unwrap();
        assert_eq!(store.saves().seen, 1);
        assert!(store.snapshot().seen.contains(&id("A")));
    }
}
