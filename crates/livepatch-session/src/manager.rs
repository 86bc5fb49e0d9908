//! Connection manager: attach, reconnect, and route file changes into reloads.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use futures::future::BoxFuture;
use livepatch_core::{
    Connector, EngineFlavor, Inspector, InspectorEvent, ProtocolError, ReloadConfig, ScriptId,
    Subscription, WatchError, WatcherFactory, resolver::normalize_path,
};
use parking_lot::Mutex;
use tokio::{
    sync::{Notify, mpsc},
    task::JoinHandle,
};

use crate::{
    ReloadEngine, ReloadOutcome, SessionState,
    live::{Endpoint, LiveSession},
    state::InvalidTransition,
};

/// Errors surfaced to `connect` callers.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Session already active for {host}:{port}")]
    Conflict { host: String, port: u16 },
    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),
}

/// Why an attach attempt failed. Always retried, never surfaced.
#[derive(Debug, thiserror::Error)]
pub enum AttachError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Watch(#[from] WatchError),
}

/// A single file push performed right after attach, followed by close.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateTask {
    pub path: PathBuf,
    pub content: String,
}

/// How a `connect` call ended.
#[derive(Debug)]
pub enum ConnectOutcome {
    /// Attached and watching local files.
    Watching,
    /// Attached, pushed the queued update task, and closed.
    Updated(ReloadOutcome),
    /// Attach failed; another attempt is scheduled.
    RetryScheduled,
    /// `close` was called while the attempt was in flight.
    Cancelled,
}

struct PendingReconnect {
    generation: u64,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct ManagerState {
    phase: SessionState,
    live: Option<Arc<LiveSession>>,
    endpoint: Option<Endpoint>,
    update_task: Option<UpdateTask>,
    reconnect: Option<PendingReconnect>,
    next_reconnect: u64,
    /// Set by `close`, cleared by the next explicit `connect`. No retry is
    /// scheduled while set, even by a teardown already in flight.
    shutdown_requested: bool,
}

impl ManagerState {
    fn step(&mut self, to: SessionState) {
        if let Err(e) = self.phase.transition(to) {
            tracing::error!("{e}");
        }
    }

    fn cancel_reconnect(&mut self) {
        if let Some(pending) = self.reconnect.take() {
            tracing::debug!(generation = pending.generation, "cancelling scheduled reconnect");
            pending.handle.abort();
        }
    }
}

struct Attached {
    live: Arc<LiveSession>,
    events: Subscription,
    changes: Option<mpsc::UnboundedReceiver<PathBuf>>,
}

struct Inner {
    connector: Arc<dyn Connector>,
    watchers: Arc<dyn WatcherFactory>,
    config: ReloadConfig,
    engine: ReloadEngine,
    state: Mutex<ManagerState>,
    update_done: Notify,
}

/// Owns at most one session against one engine endpoint.
///
/// Cheap to clone; clones share the same session.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    /// Create a manager. Nothing is attached until [`connect`](Self::connect).
    #[must_use]
    pub fn new(
        connector: Arc<dyn Connector>,
        watchers: Arc<dyn WatcherFactory>,
        config: ReloadConfig,
    ) -> Self {
        let engine = ReloadEngine::new(config.force_cjs);
        Self {
            inner: Arc::new(Inner {
                connector,
                watchers,
                config,
                engine,
                state: Mutex::new(ManagerState::default()),
                update_done: Notify::new(),
            }),
        }
    }

    /// Attach to `host:port`.
    ///
    /// Attach failures are not errors: they are logged and a retry is
    /// scheduled, reported as [`ConnectOutcome::RetryScheduled`].
    ///
    /// # Errors
    /// Returns [`SessionError::Conflict`] if a session is attached,
    /// attaching or still closing.
    pub async fn connect(&self, host: &str, port: u16) -> Result<ConnectOutcome, SessionError> {
        let endpoint = Endpoint {
            host: host.to_owned(),
            port,
        };
        self.inner.begin_attempt(&endpoint, true)?;
        Ok(Arc::clone(&self.inner).run_attempt(endpoint).await)
    }

    /// Release the session and cancel any scheduled reconnect. Idempotent.
    pub async fn close(&self) {
        let live = {
            let mut state = self.inner.state.lock();
            state.shutdown_requested = true;
            state.cancel_reconnect();
            match state.phase {
                SessionState::Idle | SessionState::Closing => return,
                SessionState::Attaching => {
                    // The in-flight attempt sees Closing and cleans up.
                    state.step(SessionState::Closing);
                    return;
                }
                SessionState::Attached => {
                    state.step(SessionState::Closing);
                    state.live.take()
                }
            }
        };

        if let Some(live) = live {
            live.release().await;
            tracing::info!(endpoint = %live.endpoint, "session closed");
        }
        self.inner.finish_close();
    }

    /// Push `source` for `path` into the attached engine.
    pub async fn reload(&self, path: &Path, source: &str) -> ReloadOutcome {
        self.inner.reload(path, source).await
    }

    /// Queue a one-shot push, replacing any earlier one.
    ///
    /// While queued, the next successful attach does not watch files; it
    /// pushes this content once and closes.
    pub fn set_update_task(&self, path: impl Into<PathBuf>, content: impl Into<String>) {
        self.inner.state.lock().update_task = Some(UpdateTask {
            path: path.into(),
            content: content.into(),
        });
    }

    /// Resolve once a queued update task has been pushed and the session closed.
    pub async fn wait_for_update(&self) {
        self.inner.update_done.notified().await;
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.inner.state.lock().phase
    }

    /// Flavor of the attached engine.
    #[must_use]
    pub fn flavor(&self) -> Option<EngineFlavor> {
        self.inner.state.lock().live.as_ref().map(|l| l.flavor)
    }

    /// Script id the attached engine uses for `path`.
    #[must_use]
    pub fn script_for(&self, path: &Path) -> Option<ScriptId> {
        let live = self.inner.current()?;
        let path = normalize_path(path);
        live.registry.lock().lookup_by_path(&path).cloned()
    }
}

impl Inner {
    /// Move Idle -> Attaching. `explicit` is false for timer-driven retries,
    /// which give way to a requested shutdown.
    fn begin_attempt(&self, endpoint: &Endpoint, explicit: bool) -> Result<bool, SessionError> {
        let mut state = self.state.lock();
        if !explicit && state.shutdown_requested {
            return Ok(false);
        }
        if state.phase != SessionState::Idle {
            tracing::warn!(%endpoint, phase = %state.phase, "connect rejected, session already active");
            return Err(SessionError::Conflict {
                host: endpoint.host.clone(),
                port: endpoint.port,
            });
        }
        state.phase.transition(SessionState::Attaching)?;
        state.endpoint = Some(endpoint.clone());
        state.shutdown_requested = false;
        state.cancel_reconnect();
        Ok(true)
    }

    async fn run_attempt(self: Arc<Self>, endpoint: Endpoint) -> ConnectOutcome {
        tracing::info!(%endpoint, "connecting {endpoint} ...");
        match self.attach(&endpoint).await {
            Ok(attached) => self.on_attached(attached).await,
            Err(e) => {
                tracing::error!(%endpoint, "CONNECT_FAIL: {e}");
                self.on_attach_failed(endpoint)
            }
        }
    }

    /// Boxed so the reconnect timer can re-enter the attach path.
    fn reconnect(self: Arc<Self>, endpoint: Endpoint) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            match self.begin_attempt(&endpoint, false) {
                Ok(true) => {
                    self.run_attempt(endpoint).await;
                }
                Ok(false) => tracing::debug!(%endpoint, "reconnect skipped, session was closed"),
                Err(e) => tracing::debug!(%endpoint, "reconnect skipped: {e}"),
            }
        })
    }

    async fn attach(&self, endpoint: &Endpoint) -> Result<Attached, AttachError> {
        let version = self.connector.probe(&endpoint.host, endpoint.port).await?;
        let flavor = version.flavor();
        tracing::debug!(browser = %version.browser, %flavor, "engine detected");

        let inspector = self.connector.attach(&endpoint.host, endpoint.port).await?;
        let events = inspector.subscribe();

        let update_mode = self.state.lock().update_task.is_some();
        let (watcher, changes) = if update_mode {
            (None, None)
        } else {
            let (tx, rx) = mpsc::unbounded_channel();
            match self.watchers.watch(Vec::new(), tx) {
                Ok(watcher) => (Some(watcher), Some(rx)),
                Err(e) => {
                    if let Err(close_err) = inspector.close().await {
                        tracing::debug!(%endpoint, "error closing inspector: {close_err}");
                    }
                    return Err(e.into());
                }
            }
        };

        let live = Arc::new(LiveSession::new(endpoint.clone(), flavor, inspector, watcher));
        if let Err(e) = self.enable(live.inspector.as_ref(), flavor).await {
            live.release().await;
            return Err(e.into());
        }

        Ok(Attached {
            live,
            events,
            changes,
        })
    }

    async fn enable(&self, inspector: &dyn Inspector, flavor: EngineFlavor) -> Result<(), ProtocolError> {
        inspector.enable_runtime().await?;
        inspector
            .enable_debugger(self.config.max_scripts_cache_size)
            .await?;
        if flavor == EngineFlavor::GenericHost {
            // setScriptSource only takes effect on node with the profiler on.
            inspector.enable_profiler().await?;
            inspector.run_if_waiting_for_debugger().await?;
        }
        Ok(())
    }

    async fn on_attached(self: Arc<Self>, attached: Attached) -> ConnectOutcome {
        let Attached {
            live,
            mut events,
            changes,
        } = attached;

        // Scripts reported while enabling are already queued.
        while let Some(event) = events.try_recv() {
            if event == InspectorEvent::Disconnected {
                tracing::error!(endpoint = %live.endpoint, "CONNECT_FAIL: disconnected during attach");
                live.release().await;
                return self.on_attach_failed(live.endpoint.clone());
            }
            live.apply(event, &self.config).await;
        }

        let (proceed, update_task) = {
            let mut state = self.state.lock();
            if state.phase == SessionState::Attaching {
                state.step(SessionState::Attached);
                state.live = Some(Arc::clone(&live));
                (true, state.update_task.take())
            } else {
                (false, None)
            }
        };
        if !proceed {
            live.release().await;
            self.finish_close();
            tracing::info!(endpoint = %live.endpoint, "attach cancelled");
            return ConnectOutcome::Cancelled;
        }
        tracing::info!(endpoint = %live.endpoint, session = %live.id, flavor = %live.flavor, "connected.");

        let pump = tokio::spawn(Arc::clone(&self).pump(Arc::clone(&live), events));
        live.set_pump(pump);

        if let Some(task) = update_task {
            let outcome = self
                .engine
                .reload(Some(live.target()), &task.path, &task.content)
                .await;
            self.close_session(&live).await;
            self.update_done.notify_one();
            return ConnectOutcome::Updated(outcome);
        }

        if let Some(changes) = changes {
            let watch = tokio::spawn(Arc::clone(&self).watch_changes(changes));
            live.add_task(watch);
        }
        ConnectOutcome::Watching
    }

    fn on_attach_failed(self: &Arc<Self>, endpoint: Endpoint) -> ConnectOutcome {
        let mut state = self.state.lock();
        if state.phase == SessionState::Closing {
            state.step(SessionState::Idle);
            return ConnectOutcome::Cancelled;
        }
        state.step(SessionState::Closing);
        state.step(SessionState::Idle);
        if state.shutdown_requested {
            return ConnectOutcome::Cancelled;
        }
        self.schedule_reconnect(&mut state, endpoint, self.config.connect_retry_delay);
        ConnectOutcome::RetryScheduled
    }

    async fn pump(self: Arc<Self>, live: Arc<LiveSession>, mut events: Subscription) {
        while let Some(event) = events.recv().await {
            if event == InspectorEvent::Disconnected {
                break;
            }
            live.apply(event, &self.config).await;
        }
        self.on_lost(&live).await;
    }

    async fn on_lost(self: &Arc<Self>, live: &Arc<LiveSession>) {
        if !self.take_live(live) {
            return;
        }
        tracing::info!(endpoint = %live.endpoint, session = %live.id, "disconnected");

        // Running on the pump itself; do not abort it.
        live.detach_pump();
        live.release().await;

        let mut state = self.state.lock();
        state.step(SessionState::Idle);
        if state.shutdown_requested {
            tracing::debug!(endpoint = %live.endpoint, "closed during teardown, not reconnecting");
            return;
        }
        let endpoint = state.endpoint.clone().unwrap_or_else(|| live.endpoint.clone());
        self.schedule_reconnect(&mut state, endpoint, self.config.disconnect_retry_delay);
    }

    async fn close_session(&self, live: &Arc<LiveSession>) {
        if self.take_live(live) {
            live.release().await;
            self.finish_close();
            tracing::info!(endpoint = %live.endpoint, "session closed");
        }
    }

    /// Move Attached -> Closing if `live` is still the current session.
    fn take_live(&self, live: &LiveSession) -> bool {
        let mut state = self.state.lock();
        let current = state.live.as_ref().is_some_and(|l| l.id == live.id);
        if !current || state.phase != SessionState::Attached {
            return false;
        }
        state.step(SessionState::Closing);
        state.live = None;
        true
    }

    fn finish_close(&self) {
        let mut state = self.state.lock();
        if state.phase == SessionState::Closing {
            state.step(SessionState::Idle);
        }
    }

    fn schedule_reconnect(self: &Arc<Self>, state: &mut ManagerState, endpoint: Endpoint, delay: Duration) {
        state.cancel_reconnect();
        state.next_reconnect += 1;
        let generation = state.next_reconnect;
        tracing::info!(%endpoint, "retry connect after {} seconds", delay.as_secs_f32());

        let this = Arc::clone(self);
        let timer = tokio::time::sleep(delay);
        let handle = tokio::spawn(async move {
            timer.await;
            if this.claim_reconnect(generation) {
                Self::reconnect(this, endpoint).await;
            }
        });
        state.reconnect = Some(PendingReconnect { generation, handle });
    }

    /// Whether the timer with `generation` is still the scheduled one.
    fn claim_reconnect(&self, generation: u64) -> bool {
        let mut state = self.state.lock();
        if state.reconnect.as_ref().map(|p| p.generation) != Some(generation) {
            return false;
        }
        state.reconnect = None;
        true
    }

    fn current(&self) -> Option<Arc<LiveSession>> {
        let state = self.state.lock();
        if state.phase == SessionState::Attached {
            state.live.clone()
        } else {
            None
        }
    }

    async fn reload(&self, path: &Path, source: &str) -> ReloadOutcome {
        let live = self.current();
        self.engine
            .reload(live.as_deref().map(LiveSession::target), path, source)
            .await
    }

    async fn watch_changes(self: Arc<Self>, mut changes: mpsc::UnboundedReceiver<PathBuf>) {
        while let Some(path) = changes.recv().await {
            let path = match std::path::absolute(&path) {
                Ok(path) => path,
                Err(e) => {
                    tracing::warn!(path = %path.display(), "cannot resolve changed path: {e}");
                    continue;
                }
            };
            let source = match tokio::fs::read_to_string(&path).await {
                Ok(source) => source,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    tracing::debug!(path = %path.display(), "{} removed", path.display());
                    continue;
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), "read failed: {e}");
                    continue;
                }
            };
            tracing::debug!(path = %path.display(), "{} changed", path.display());

            let this = Arc::clone(&self);
            tokio::spawn(async move {
                this.reload(&path, &source).await;
            });
        }
    }
}
