//! Core abstractions for pushing local source edits into a running script engine.
//!
//! This crate provides the fundamental building blocks:
//! - `ReloadConfig` / `RootMapping` - How engine paths map onto the local tree
//! - `resolver` - Turning a protocol-reported script URL into a local path
//! - `source` - Deciding what text to push for a changed file
//! - `EventHub` - Typed fan-out of inspector events to subscribers
//! - Inspector, connector and file-watch traits

pub mod config;
pub mod events;
pub mod resolver;
pub mod source;
pub mod traits;

pub use config::{ReloadConfig, RootMapping, RootPair};
pub use events::{EventHub, InspectorEvent, Subscription};
pub use resolver::{PathStyle, ResolveError, ResolvedScript, resolve};
pub use traits::{
    Connector, EngineFlavor, FileWatcher, Inspector, ProtocolError, ScriptId, VersionInfo,
    WatchError, WatcherFactory,
};
