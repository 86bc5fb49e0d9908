//! Scripted collaborators for session tests.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use livepatch_core::{
    Connector, EventHub, FileWatcher, Inspector, InspectorEvent, ProtocolError, ScriptId,
    Subscription, VersionInfo, WatchError, WatcherFactory,
};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::{Notify, mpsc};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    EnableRuntime,
    EnableDebugger(u64),
    EnableProfiler,
    RunIfWaitingForDebugger,
    Resume,
    GetScriptSource(String),
    SetScriptSource(String, String),
    Close,
}

/// In-memory engine: holds script sources and records every command.
pub struct MockInspector {
    hub: EventHub,
    sources: Mutex<HashMap<ScriptId, String>>,
    calls: Mutex<Vec<Call>>,
    replay: Mutex<Vec<InspectorEvent>>,
    fail_set: AtomicBool,
    fail_enable: AtomicBool,
    close_delay: Mutex<Option<Duration>>,
    closed: AtomicBool,
}

impl MockInspector {
    pub fn new() -> Self {
        Self {
            hub: EventHub::new(),
            sources: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            replay: Mutex::new(Vec::new()),
            fail_set: AtomicBool::new(false),
            fail_enable: AtomicBool::new(false),
            close_delay: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    pub fn set_source(&self, id: &str, text: &str) {
        self.sources.lock().insert(ScriptId::new(id), text.to_owned());
    }

    pub fn source(&self, id: &str) -> Option<String> {
        self.sources.lock().get(&ScriptId::new(id)).cloned()
    }

    /// Events published while `Debugger.enable` is in flight.
    pub fn replay_on_enable(&self, events: Vec<InspectorEvent>) {
        *self.replay.lock() = events;
    }

    pub fn fail_set_source(&self, fail: bool) {
        self.fail_set.store(fail, Ordering::SeqCst);
    }

    pub fn fail_enable(&self, fail: bool) {
        self.fail_enable.store(fail, Ordering::SeqCst);
    }

    /// Make `close` take `delay` to finish, like a socket draining.
    pub fn slow_close(&self, delay: Duration) {
        *self.close_delay.lock() = Some(delay);
    }

    pub fn emit(&self, event: &InspectorEvent) {
        self.hub.publish(event);
    }

    /// Simulate the engine going away.
    pub fn disconnect(&self) {
        self.hub.publish(&InspectorEvent::Disconnected);
        self.hub.close();
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn set_calls(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, Call::SetScriptSource(..)))
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn push(&self, call: Call) {
        self.calls.lock().push(call);
    }
}

#[async_trait]
impl Inspector for MockInspector {
    fn subscribe(&self) -> Subscription {
        self.hub.subscribe()
    }

    async fn enable_runtime(&self) -> Result<(), ProtocolError> {
        self.push(Call::EnableRuntime);
        Ok(())
    }

    async fn enable_debugger(&self, max_scripts_cache_size: u64) -> Result<(), ProtocolError> {
        self.push(Call::EnableDebugger(max_scripts_cache_size));
        if self.fail_enable.load(Ordering::SeqCst) {
            return Err(ProtocolError::Remote {
                code: -32000,
                message: "Debugger agent is not enabled".into(),
            });
        }
        let replay = std::mem::take(&mut *self.replay.lock());
        for event in &replay {
            self.hub.publish(event);
        }
        Ok(())
    }

    async fn enable_profiler(&self) -> Result<(), ProtocolError> {
        self.push(Call::EnableProfiler);
        Ok(())
    }

    async fn run_if_waiting_for_debugger(&self) -> Result<(), ProtocolError> {
        self.push(Call::RunIfWaitingForDebugger);
        Ok(())
    }

    async fn resume(&self) -> Result<(), ProtocolError> {
        self.push(Call::Resume);
        Ok(())
    }

    async fn get_script_source(&self, script_id: &ScriptId) -> Result<String, ProtocolError> {
        self.push(Call::GetScriptSource(script_id.to_string()));
        tokio::task::yield_now().await;
        self.sources
            .lock()
            .get(script_id)
            .cloned()
            .ok_or_else(|| ProtocolError::Remote {
                code: -32000,
                message: "No script for id".into(),
            })
    }

    async fn set_script_source(
        &self,
        script_id: &ScriptId,
        source: &str,
    ) -> Result<Value, ProtocolError> {
        self.push(Call::SetScriptSource(script_id.to_string(), source.to_owned()));
        tokio::task::yield_now().await;
        if self.fail_set.load(Ordering::SeqCst) {
            return Err(ProtocolError::ChannelClosed);
        }
        self.sources.lock().insert(script_id.clone(), source.to_owned());
        Ok(json!({ "status": "Ok" }))
    }

    async fn close(&self) -> Result<(), ProtocolError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.push(Call::Close);
            self.hub.close();
        }
        let delay = *self.close_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }
}

/// Connector handing out a fresh [`MockInspector`] per attach.
pub struct MockConnector {
    browser: String,
    probe_failures: AtomicUsize,
    probes: Mutex<Vec<(String, u16)>>,
    inspectors: Mutex<Vec<Arc<MockInspector>>>,
    setup: Mutex<Option<Box<dyn Fn(&MockInspector) + Send + Sync>>>,
    hold: Mutex<Option<Arc<Notify>>>,
}

impl MockConnector {
    pub fn new(browser: &str) -> Arc<Self> {
        Arc::new(Self {
            browser: browser.to_owned(),
            probe_failures: AtomicUsize::new(0),
            probes: Mutex::new(Vec::new()),
            inspectors: Mutex::new(Vec::new()),
            setup: Mutex::new(None),
            hold: Mutex::new(None),
        })
    }

    /// Fail the next `n` probes.
    pub fn fail_probes(&self, n: usize) {
        self.probe_failures.store(n, Ordering::SeqCst);
    }

    /// Configure each new inspector before it is handed out.
    pub fn on_attach(&self, f: impl Fn(&MockInspector) + Send + Sync + 'static) {
        *self.setup.lock() = Some(Box::new(f));
    }

    /// Block probes until the returned notify fires.
    pub fn hold_probes(&self) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        *self.hold.lock() = Some(Arc::clone(&notify));
        notify
    }

    pub fn probes(&self) -> Vec<(String, u16)> {
        self.probes.lock().clone()
    }

    pub fn inspector(&self, n: usize) -> Arc<MockInspector> {
        Arc::clone(&self.inspectors.lock()[n])
    }

    pub fn attach_count(&self) -> usize {
        self.inspectors.lock().len()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn probe(&self, host: &str, port: u16) -> Result<VersionInfo, ProtocolError> {
        self.probes.lock().push((host.to_owned(), port));
        let hold = self.hold.lock().clone();
        if let Some(hold) = hold {
            hold.notified().await;
        }
        let remaining = self.probe_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.probe_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(ProtocolError::Probe("connection refused".into()));
        }
        Ok(VersionInfo {
            browser: self.browser.clone(),
            protocol_version: Some("1.3".into()),
        })
    }

    async fn attach(&self, _host: &str, _port: u16) -> Result<Arc<dyn Inspector>, ProtocolError> {
        let inspector = Arc::new(MockInspector::new());
        if let Some(setup) = self.setup.lock().as_ref() {
            setup(inspector.as_ref());
        }
        self.inspectors.lock().push(Arc::clone(&inspector));
        Ok(inspector)
    }
}

#[derive(Debug, Default)]
pub struct WatchLog {
    pub added: Vec<PathBuf>,
    pub closed: bool,
}

struct MockWatcher {
    log: Arc<Mutex<WatchLog>>,
}

impl FileWatcher for MockWatcher {
    fn add_path(&mut self, path: &Path) -> Result<(), WatchError> {
        self.log.lock().added.push(path.to_path_buf());
        Ok(())
    }

    fn close(&mut self) {
        self.log.lock().closed = true;
    }
}

/// Watcher factory that lets tests inject change notifications.
#[derive(Default)]
pub struct MockWatchers {
    watchers: Mutex<Vec<(Arc<Mutex<WatchLog>>, mpsc::UnboundedSender<PathBuf>)>>,
}

impl MockWatchers {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn count(&self) -> usize {
        self.watchers.lock().len()
    }

    pub fn log(&self, n: usize) -> Arc<Mutex<WatchLog>> {
        Arc::clone(&self.watchers.lock()[n].0)
    }

    /// Report a change through the most recent watcher.
    pub fn change(&self, path: &Path) {
        if let Some((_, tx)) = self.watchers.lock().last() {
            let _ = tx.send(path.to_path_buf());
        }
    }
}

impl WatcherFactory for MockWatchers {
    fn watch(
        &self,
        paths: Vec<PathBuf>,
        changes: mpsc::UnboundedSender<PathBuf>,
    ) -> Result<Box<dyn FileWatcher>, WatchError> {
        let log = Arc::new(Mutex::new(WatchLog {
            added: paths,
            closed: false,
        }));
        self.watchers.lock().push((Arc::clone(&log), changes));
        Ok(Box::new(MockWatcher { log }))
    }
}
