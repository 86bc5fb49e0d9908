//! Core traits for the inspector, connector and file-watch collaborators.

use std::{
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::Subscription;

/// Opaque script identifier assigned by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScriptId(String);

impl ScriptId {
    /// Wrap a raw protocol id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw protocol id.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScriptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ScriptId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Kind of engine behind the endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineFlavor {
    /// Anything that reports real URLs and needs no extra setup.
    #[default]
    Generic,
    /// A standalone host (node.js) that needs the profiler enabled for
    /// live edits to take effect and may be paused waiting for a debugger.
    GenericHost,
    /// An embedded script host (Puerts) whose URLs are already local paths
    /// and whose CommonJS modules must be wrapped before patching.
    Embedded,
}

impl EngineFlavor {
    /// Detect the flavor from the `Browser` field of the version probe.
    #[must_use]
    pub fn detect(browser: &str) -> Self {
        if browser.contains("Puerts") {
            Self::Embedded
        } else if browser.contains("node.js") {
            Self::GenericHost
        } else {
            Self::Generic
        }
    }

    /// Whether reported URLs are already local paths.
    #[must_use]
    pub const fn urls_are_paths(self) -> bool {
        matches!(self, Self::Embedded)
    }
}

impl fmt::Display for EngineFlavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Generic => "generic",
            Self::GenericHost => "generic-host",
            Self::Embedded => "embedded",
        })
    }
}

/// Result of the capability probe.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionInfo {
    /// Engine identifier, e.g. `node.js/v20.11.0` or `Puerts/v1.0`.
    #[serde(rename = "Browser", default)]
    pub browser: String,
    /// Protocol version string.
    #[serde(rename = "Protocol-Version", default)]
    pub protocol_version: Option<String>,
}

impl VersionInfo {
    /// Flavor implied by the engine identifier.
    #[must_use]
    pub fn flavor(&self) -> EngineFlavor {
        EngineFlavor::detect(&self.browser)
    }
}

/// Errors from the debug-protocol collaborator.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Probe failed: {0}")]
    Probe(String),
    #[error("WebSocket error: {0}")]
    WebSocket(String),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Remote error {code}: {message}")]
    Remote { code: i64, message: String },
    #[error("No inspectable targets")]
    NoTarget,
    #[error("Session channel closed")]
    ChannelClosed,
}

/// Errors from the file-watch collaborator.
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("Watcher error: {0}")]
    Backend(String),
    #[error("Invalid ignore pattern: {0}")]
    InvalidPattern(String),
}

/// A live debug-protocol session.
///
/// Implementations must deliver events to subscribers in wire order, and
/// must deliver any event received before a command response before that
/// command's future resolves.
#[async_trait]
pub trait Inspector: Send + Sync {
    /// Subscribe to typed events. The stream ends when the session closes.
    fn subscribe(&self) -> Subscription;

    /// `Runtime.enable`.
    async fn enable_runtime(&self) -> Result<(), ProtocolError>;

    /// `Debugger.enable` with a source cache ceiling.
    async fn enable_debugger(&self, max_scripts_cache_size: u64) -> Result<(), ProtocolError>;

    /// `Profiler.enable`.
    async fn enable_profiler(&self) -> Result<(), ProtocolError>;

    /// `Runtime.runIfWaitingForDebugger`.
    async fn run_if_waiting_for_debugger(&self) -> Result<(), ProtocolError>;

    /// `Debugger.resume`.
    async fn resume(&self) -> Result<(), ProtocolError>;

    /// `Debugger.getScriptSource`.
    async fn get_script_source(&self, script_id: &ScriptId) -> Result<String, ProtocolError>;

    /// `Debugger.setScriptSource`, returning the raw acknowledgment.
    async fn set_script_source(
        &self,
        script_id: &ScriptId,
        source: &str,
    ) -> Result<Value, ProtocolError>;

    /// Close the session. Closing twice is a no-op.
    async fn close(&self) -> Result<(), ProtocolError>;
}

/// Opens sessions against an endpoint.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Probe the endpoint for its engine identifier.
    async fn probe(&self, host: &str, port: u16) -> Result<VersionInfo, ProtocolError>;

    /// Attach to the endpoint.
    async fn attach(&self, host: &str, port: u16) -> Result<Arc<dyn Inspector>, ProtocolError>;
}

/// An active file watcher.
pub trait FileWatcher: Send {
    /// Start watching one more file.
    ///
    /// # Errors
    /// Returns error if the backend refuses the path.
    fn add_path(&mut self, path: &Path) -> Result<(), WatchError>;

    /// Stop watching everything. Further calls are no-ops.
    fn close(&mut self);
}

/// Creates watchers that report changed paths on a channel.
pub trait WatcherFactory: Send + Sync {
    /// Start a watcher over `paths`, sending each changed path to `changes`.
    ///
    /// # Errors
    /// Returns error if the backend cannot be initialised.
    fn watch(
        &self,
        paths: Vec<PathBuf>,
        changes: mpsc::UnboundedSender<PathBuf>,
    ) -> Result<Box<dyn FileWatcher>, WatchError>;
}
