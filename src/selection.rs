use crate::data::CategoryId;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Remembers which favorites category each user last selected.
///
/// Backed by a plain string key-value store; failures to persist are logged
/// and never surface to callers.
pub trait SelectionStore: Send + Sync {
    fn selected(&self, user_id: &str) -> Option<CategoryId>;
    fn set_selected(&self, user_id: &str, category: Option<CategoryId>);
}

fn storage_key(user_id: &str) -> String {
    format!("favorites.selected_category:{user_id}")
}

#[derive(Debug, Default)]
pub struct MemorySelectionStore {
    values: RwLock<BTreeMap<String, String>>,
}

impl MemorySelectionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SelectionStore for MemorySelectionStore {
    fn selected(&self, user_id: &str) -> Option<CategoryId> {
        let guard = self.values.read();
        parse_selection(guard.get(&storage_key(user_id)))
    }

    fn set_selected(&self, user_id: &str, category: Option<CategoryId>) {
        let mut guard = self.values.write();
        apply_selection(&mut guard, user_id, category);
    }
}

/// Selection store persisted as a JSON object of string values.
#[derive(Debug)]
pub struct JsonFileSelectionStore {
    path: PathBuf,
    values: RwLock<BTreeMap<String, String>>,
}

impl JsonFileSelectionStore {
    /// Opens the store, starting empty when the file is missing or unreadable.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let values = match read_values(&path) {
            Ok(values) => values,
            Err(err) if err.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => {
                warn!(error = %err, path = %path.display(), "ignoring unreadable selection store");
                BTreeMap::new()
            }
        };
        Self {
            path,
            values: RwLock::new(values),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SelectionStore for JsonFileSelectionStore {
    fn selected(&self, user_id: &str) -> Option<CategoryId> {
        let guard = self.values.read();
        parse_selection(guard.get(&storage_key(user_id)))
    }

    fn set_selected(&self, user_id: &str, category: Option<CategoryId>) {
        let mut guard = self.values.write();
        apply_selection(&mut guard, user_id, category);
        let snapshot = guard.clone();
        drop(guard);
        if let Err(err) = write_values(&self.path, &snapshot) {
            warn!(error = %err, path = %self.path.display(), "failed to persist category selection");
        }
    }
}

fn parse_selection(raw: Option<&String>) -> Option<CategoryId> {
    let raw = raw?;
    match raw.parse() {
        Ok(id) => Some(id),
        Err(_) => {
            warn!(value = %raw, "discarding malformed category selection");
            None
        }
    }
}

fn apply_selection(values: &mut BTreeMap<String, String>, user_id: &str, category: Option<CategoryId>) {
    let key = storage_key(user_id);
    match category {
        Some(id) => {
            values.insert(key, id.to_string());
        }
        None => {
            values.remove(&key);
        }
    }
}

fn read_values(path: &Path) -> io::Result<BTreeMap<String, String>> {
    let bytes = fs::read(path)?;
    serde_json::from_slice(&bytes).map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
}

fn write_values(path: &Path, values: &BTreeMap<String, String>) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let bytes = serde_json::to_vec_pretty(values)
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
    fs::write(path, bytes)
}
