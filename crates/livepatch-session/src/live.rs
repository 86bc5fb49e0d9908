//! An attached session and the resources it owns.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use livepatch_core::{
    EngineFlavor, FileWatcher, Inspector, InspectorEvent, ReloadConfig, ResolveError, ScriptId,
    resolve,
};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::{ScriptRecord, ScriptRegistry, reload::ReloadTarget};

/// Host and port of the engine's inspector endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Everything held while attached. Dropped as a whole on teardown.
pub(crate) struct LiveSession {
    pub id: Uuid,
    pub endpoint: Endpoint,
    pub flavor: EngineFlavor,
    pub inspector: Arc<dyn Inspector>,
    pub registry: Mutex<ScriptRegistry>,
    watcher: Mutex<Option<Box<dyn FileWatcher>>>,
    resume_on_pause: AtomicBool,
    pump: Mutex<Option<JoinHandle<()>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl LiveSession {
    pub fn new(
        endpoint: Endpoint,
        flavor: EngineFlavor,
        inspector: Arc<dyn Inspector>,
        watcher: Option<Box<dyn FileWatcher>>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            endpoint,
            flavor,
            inspector,
            registry: Mutex::new(ScriptRegistry::new()),
            watcher: Mutex::new(watcher),
            resume_on_pause: AtomicBool::new(flavor == EngineFlavor::GenericHost),
            pump: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn target(&self) -> ReloadTarget<'_> {
        ReloadTarget {
            flavor: self.flavor,
            inspector: self.inspector.as_ref(),
            registry: &self.registry,
        }
    }

    /// Apply one protocol event. `Disconnected` is the caller's business.
    pub async fn apply(&self, event: InspectorEvent, config: &ReloadConfig) {
        match event {
            InspectorEvent::ScriptParsed { script_id, url }
            | InspectorEvent::ScriptFailedToParse { script_id, url } => {
                self.track(script_id, url, config);
            }
            InspectorEvent::Paused => {
                if self.resume_on_pause.swap(false, Ordering::SeqCst) {
                    tracing::debug!(session = %self.id, "paused on attach, resuming");
                    if let Err(e) = self.inspector.resume().await {
                        tracing::warn!(session = %self.id, "resume failed: {e}");
                    }
                }
            }
            InspectorEvent::Disconnected => {}
        }
    }

    /// Resolve a reported script and record it.
    pub fn track(&self, script_id: ScriptId, url: String, config: &ReloadConfig) {
        let resolved = match resolve(&url, self.flavor, &config.root_mapping, &config.local_root) {
            Ok(resolved) => resolved,
            Err(e @ ResolveError::Malformed { .. }) => {
                tracing::warn!(%script_id, %url, "skipping script: {e}");
                return;
            }
            Err(e) => {
                tracing::debug!(%script_id, %url, "skipping script: {e}");
                return;
            }
        };

        tracing::debug!(%script_id, path = %resolved.path.display(), "{} loaded", resolved.path.display());
        let record = ScriptRecord {
            script_id,
            path: resolved.path,
            url,
            remote_served: resolved.remote_served,
        };

        let mut watcher = self.watcher.lock();
        self.registry.lock().record(record, watcher.as_deref_mut());
    }

    pub fn set_pump(&self, handle: JoinHandle<()>) {
        *self.pump.lock() = Some(handle);
    }

    /// Forget the pump handle so `release` does not abort the running pump.
    pub fn detach_pump(&self) {
        self.pump.lock().take();
    }

    pub fn add_task(&self, handle: JoinHandle<()>) {
        self.tasks.lock().push(handle);
    }

    /// Stop background tasks, close the watcher, drop the registry, close the transport.
    pub async fn release(&self) {
        if let Some(pump) = self.pump.lock().take() {
            pump.abort();
        }
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        if let Some(mut watcher) = self.watcher.lock().take() {
            watcher.close();
        }
        self.registry.lock().clear();

        if let Err(e) = self.inspector.close().await {
            tracing::debug!(session = %self.id, "error closing inspector: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockInspector;

    fn session() -> LiveSession {
        let endpoint = Endpoint {
            host: "127.0.0.1".into(),
            port: 9229,
        };
        LiveSession::new(endpoint, EngineFlavor::Generic, Arc::new(MockInspector::new()), None)
    }

    #[test]
    fn test_unresolvable_urls_are_not_recorded() {
        let live = session();
        let config = ReloadConfig::new("/local");

        live.track(ScriptId::new("1"), "not a url".into(), &config);
        live.track(ScriptId::new("2"), String::new(), &config);
        live.track(ScriptId::new("3"), "node:internal/main".into(), &config);

        let registry = live.registry.lock();
        assert!(registry.lookup_by_id(&ScriptId::new("1")).is_none());
        assert!(registry.lookup_by_id(&ScriptId::new("2")).is_none());
        assert!(registry.lookup_by_id(&ScriptId::new("3")).is_none());
    }

    #[test]
    fn test_missing_file_is_recorded_without_watching() {
        let live = session();
        let config = ReloadConfig::new("/local");

        live.track(ScriptId::new("4"), "file:///local/gone.js".into(), &config);
        assert_eq!(
            live.registry.lock().lookup_by_id(&ScriptId::new("4")),
            Some(std::path::Path::new("/local/gone.js"))
        );
    }
}
