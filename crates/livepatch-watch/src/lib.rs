//! File watching for live script patching.
//!
//! Files are watched through their parent directory so editors that save by
//! writing a temp file and renaming it over the original keep being seen.
//! Only paths explicitly added are reported.

use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    sync::Arc,
};

use globset::{Glob, GlobMatcher};
use livepatch_core::{FileWatcher, WatchError, WatcherFactory};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher, event::ModifyKind};
use parking_lot::Mutex;
use tokio::sync::mpsc;

/// Creates [`NotifyWatcher`]s sharing one ignore pattern.
#[derive(Debug, Clone, Default)]
pub struct NotifyWatcherFactory {
    ignore: Option<GlobMatcher>,
}

impl NotifyWatcherFactory {
    /// Create a factory. Paths matching `ignore` are never watched.
    ///
    /// # Errors
    /// Returns [`WatchError::InvalidPattern`] if `ignore` is not a valid glob.
    pub fn new(ignore: Option<&str>) -> Result<Self, WatchError> {
        let ignore = ignore
            .map(|pattern| {
                Glob::new(pattern)
                    .map(|glob| glob.compile_matcher())
                    .map_err(|e| WatchError::InvalidPattern(e.to_string()))
            })
            .transpose()?;
        Ok(Self { ignore })
    }
}

impl WatcherFactory for NotifyWatcherFactory {
    fn watch(
        &self,
        paths: Vec<PathBuf>,
        changes: mpsc::UnboundedSender<PathBuf>,
    ) -> Result<Box<dyn FileWatcher>, WatchError> {
        let files: Arc<Mutex<HashSet<PathBuf>>> = Arc::default();

        let tracked = Arc::clone(&files);
        let backend = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            match res {
                Ok(event) => {
                    for path in changed_paths(&event) {
                        if tracked.lock().contains(&path) {
                            let _ = changes.send(path);
                        }
                    }
                }
                Err(e) => tracing::warn!("watch error: {e}"),
            }
        })
        .map_err(|e| WatchError::Backend(e.to_string()))?;

        let mut watcher = NotifyWatcher {
            backend: Some(backend),
            files,
            dirs: HashSet::new(),
            ignore: self.ignore.clone(),
        };
        for path in &paths {
            watcher.add_path(path)?;
        }
        Ok(Box::new(watcher))
    }
}

/// A `notify` watcher over a growing set of files.
pub struct NotifyWatcher {
    backend: Option<RecommendedWatcher>,
    files: Arc<Mutex<HashSet<PathBuf>>>,
    dirs: HashSet<PathBuf>,
    ignore: Option<GlobMatcher>,
}

impl NotifyWatcher {
    fn is_ignored(&self, path: &Path) -> bool {
        self.ignore.as_ref().is_some_and(|m| {
            m.is_match(path) || path.file_name().is_some_and(|name| m.is_match(name))
        })
    }
}

impl FileWatcher for NotifyWatcher {
    fn add_path(&mut self, path: &Path) -> Result<(), WatchError> {
        if self.is_ignored(path) {
            tracing::debug!(path = %path.display(), "ignored by pattern");
            return Ok(());
        }
        let Some(backend) = self.backend.as_mut() else {
            return Ok(());
        };

        let dir = path.parent().unwrap_or(path).to_path_buf();
        if !self.dirs.contains(&dir) {
            backend
                .watch(&dir, RecursiveMode::NonRecursive)
                .map_err(|e| WatchError::Backend(e.to_string()))?;
            self.dirs.insert(dir);
        }
        self.files.lock().insert(path.to_path_buf());
        Ok(())
    }

    fn close(&mut self) {
        if self.backend.take().is_some() {
            tracing::debug!(files = self.files.lock().len(), "watcher closed");
        }
        self.files.lock().clear();
        self.dirs.clear();
    }
}

/// Paths in `event` whose contents may have changed.
///
/// Metadata-only modifications (mtime, chmod) and removals are not changes.
#[must_use]
pub fn changed_paths(event: &notify::Event) -> Vec<PathBuf> {
    match event.kind {
        EventKind::Create(_) => event.paths.clone(),
        EventKind::Modify(ModifyKind::Metadata(_)) => Vec::new(),
        EventKind::Modify(_) => event.paths.clone(),
        _ => Vec::new(),
    }
}
