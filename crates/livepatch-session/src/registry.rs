//! Bidirectional script id / local path store.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use livepatch_core::{FileWatcher, ScriptId};

/// One script the engine reported, resolved to a local path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptRecord {
    /// Engine-assigned id.
    pub script_id: ScriptId,
    /// Normalized local path.
    pub path: PathBuf,
    /// URL as reported by the engine.
    pub url: String,
    /// The URL was served over HTTP.
    pub remote_served: bool,
}

/// What happened to the watch side of a freshly recorded script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Path exists and was handed to the watcher.
    Watched,
    /// Path does not exist locally; not watched.
    Missing,
    /// Path exists but there is no watcher (one-shot mode) or it refused the path.
    Unwatched,
}

/// Two maps kept in lockstep: id → record and path → id.
///
/// Every `record` updates both directions, evicting stale entries on either
/// side, so `by_id[k].path == p` iff `by_path[p] == k`.
#[derive(Debug, Default)]
pub struct ScriptRegistry {
    by_id: HashMap<ScriptId, ScriptRecord>,
    by_path: HashMap<PathBuf, ScriptId>,
}

impl ScriptRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a record, then watch its path if it exists.
    pub fn record(
        &mut self,
        record: ScriptRecord,
        watcher: Option<&mut (dyn FileWatcher + '_)>,
    ) -> RecordOutcome {
        let script_id = record.script_id.clone();
        let path = record.path.clone();
        let url = record.url.clone();
        self.insert(record);

        if !path.exists() {
            tracing::warn!(%script_id, path = %path.display(), %url, "{} not exist!", path.display());
            return RecordOutcome::Missing;
        }

        let Some(watcher) = watcher else {
            tracing::debug!(%script_id, path = %path.display(), "recorded without watcher");
            return RecordOutcome::Unwatched;
        };

        match watcher.add_path(&path) {
            Ok(()) => {
                tracing::info!(%script_id, path = %path.display(), %url, "{} watched", path.display());
                RecordOutcome::Watched
            }
            Err(e) => {
                tracing::warn!(%script_id, path = %path.display(), "failed to watch: {e}");
                RecordOutcome::Unwatched
            }
        }
    }

    /// Insert or overwrite both directions without touching the filesystem.
    pub fn insert(&mut self, record: ScriptRecord) {
        if let Some(old) = self.by_id.remove(&record.script_id) {
            if self.by_path.get(&old.path) == Some(&record.script_id) {
                self.by_path.remove(&old.path);
            }
        }
        if let Some(old_id) = self.by_path.remove(&record.path) {
            self.by_id.remove(&old_id);
        }

        self.by_path.insert(record.path.clone(), record.script_id.clone());
        self.by_id.insert(record.script_id.clone(), record);
    }

    /// Script id currently mapped to `path`.
    #[must_use]
    pub fn lookup_by_path(&self, path: &Path) -> Option<&ScriptId> {
        self.by_path.get(path)
    }

    /// Local path currently mapped to `script_id`.
    #[must_use]
    pub fn lookup_by_id(&self, script_id: &ScriptId) -> Option<&Path> {
        self.by_id.get(script_id).map(|r| r.path.as_path())
    }

    /// Full record for the script mapped to `path`.
    #[must_use]
    pub fn record_for_path(&self, path: &Path) -> Option<&ScriptRecord> {
        self.by_path.get(path).and_then(|id| self.by_id.get(id))
    }

    /// Number of tracked scripts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Whether nothing is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Drop every record.
    pub fn clear(&mut self) {
        self.by_id.clear();
        self.by_path.clear();
    }

    /// Iterate over all records.
    pub fn iter(&self) -> impl Iterator<Item = &ScriptRecord> {
        self.by_id.values()
    }
}
