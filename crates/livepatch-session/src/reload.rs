//! Pushing changed file contents into the running engine.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
};

use livepatch_core::{
    EngineFlavor, Inspector, ProtocolError, ScriptId, resolver::normalize_path,
    source::prepare_source,
};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::ScriptRegistry;

/// Why a reload did not patch anything.
#[derive(Debug, thiserror::Error)]
pub enum ReloadError {
    #[error("Remote not connected, not ready for {}", .0.display())]
    NotConnected(PathBuf),
    #[error("Can not find scriptId for {}", .0.display())]
    UnknownScript(PathBuf),
    #[error("Reload of script({script_id}):{} failed: {source}", .path.display())]
    Patch {
        script_id: ScriptId,
        path: PathBuf,
        source: ProtocolError,
    },
}

/// Result of one reload request.
#[derive(Debug)]
pub enum ReloadOutcome {
    /// `setScriptSource` was issued and acknowledged.
    Patched { script_id: ScriptId, ack: Value },
    /// The engine already holds this exact text.
    Unchanged { script_id: ScriptId },
    /// Nothing was patched; the reason has been logged.
    Skipped(ReloadError),
}

impl ReloadOutcome {
    /// Whether a patch command went out and succeeded.
    #[must_use]
    pub const fn is_patched(&self) -> bool {
        matches!(self, Self::Patched { .. })
    }
}

/// The pieces of a live session a reload needs.
#[derive(Clone, Copy)]
pub struct ReloadTarget<'a> {
    /// Flavor detected at attach.
    pub flavor: EngineFlavor,
    /// Protocol session.
    pub inspector: &'a dyn Inspector,
    /// Scripts known to this session.
    pub registry: &'a Mutex<ScriptRegistry>,
}

/// Decides what text to push for a changed file and pushes it.
///
/// Reloads of the same path are serialized so the
/// get-compare-set sequence cannot interleave with itself.
pub struct ReloadEngine {
    force_cjs: bool,
    in_flight: Mutex<HashMap<PathBuf, Arc<AsyncMutex<()>>>>,
}

/// Holds one path's reload slot; forgets the slot when nobody else wants it.
struct PathSlot<'a> {
    in_flight: &'a Mutex<HashMap<PathBuf, Arc<AsyncMutex<()>>>>,
    path: PathBuf,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for PathSlot<'_> {
    fn drop(&mut self) {
        let mut in_flight = self.in_flight.lock();
        drop(self.guard.take());
        // Waiters clone the lock under the map lock, so a count of one means idle.
        if in_flight
            .get(&self.path)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            in_flight.remove(&self.path);
        }
    }
}

impl ReloadEngine {
    /// Create an engine.
    #[must_use]
    pub fn new(force_cjs: bool) -> Self {
        Self {
            force_cjs,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    async fn serialize(&self, path: &Path) -> PathSlot<'_> {
        let lock = Arc::clone(self.in_flight.lock().entry(path.to_path_buf()).or_default());
        let guard = lock.lock_owned().await;
        PathSlot {
            in_flight: &self.in_flight,
            path: path.to_path_buf(),
            guard: Some(guard),
        }
    }

    /// Push `source` for `path` into the session, if it is tracked and differs.
    ///
    /// Never fails: every problem is logged and reported as
    /// [`ReloadOutcome::Skipped`]. There is no retry; the next file change
    /// triggers the next attempt.
    pub async fn reload(
        &self,
        target: Option<ReloadTarget<'_>>,
        path: &Path,
        source: &str,
    ) -> ReloadOutcome {
        let path = normalize_path(path);

        let Some(target) = target else {
            tracing::warn!(
                path = %path.display(),
                "remote not connected, not ready for {}, retry later!",
                path.display()
            );
            return ReloadOutcome::Skipped(ReloadError::NotConnected(path));
        };

        let Some(record) = target.registry.lock().record_for_path(&path).cloned() else {
            tracing::debug!(path = %path.display(), "can not find scriptId for {}", path.display());
            return ReloadOutcome::Skipped(ReloadError::UnknownScript(path));
        };
        let script_id = record.script_id;

        let _slot = self.serialize(&path).await;

        tracing::debug!(%script_id, path = %path.display(), "reloading");
        let update = prepare_source(
            target.flavor,
            &path,
            record.remote_served,
            self.force_cjs,
            source,
        );

        let current = match target.inspector.get_script_source(&script_id).await {
            Ok(text) => text,
            Err(e) => return patch_failed(script_id, path, e),
        };
        if current == update {
            tracing::debug!(%script_id, path = %path.display(), "source not changed, skip");
            return ReloadOutcome::Unchanged { script_id };
        }

        match target.inspector.set_script_source(&script_id, &update).await {
            Ok(ack) => {
                tracing::info!(
                    %script_id,
                    path = %path.display(),
                    response = %ack,
                    "reloaded {}",
                    path.display()
                );
                ReloadOutcome::Patched { script_id, ack }
            }
            Err(e) => patch_failed(script_id, path, e),
        }
    }
}

fn patch_failed(script_id: ScriptId, path: PathBuf, source: ProtocolError) -> ReloadOutcome {
    tracing::error!(
        %script_id,
        path = %path.display(),
        "RELOAD_SOURCE_FAIL: {source}, script({script_id}):{}",
        path.display()
    );
    ReloadOutcome::Skipped(ReloadError::Patch {
        script_id,
        path,
        source,
    })
}
