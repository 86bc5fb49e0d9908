//! Session orchestration for live script patching.
//!
//! Provides:
//! - `ConnectionManager` - Attach, reconnect and route file changes
//! - `ScriptRegistry` - Bidirectional script id / local path store
//! - `ReloadEngine` - Decide what to push and push it
//! - `SessionState` - Explicit session lifecycle

mod live;
pub mod manager;
pub mod registry;
pub mod reload;
pub mod state;

#[cfg(test)]
mod mock;

pub use manager::{AttachError, ConnectOutcome, ConnectionManager, SessionError, UpdateTask};
pub use registry::{RecordOutcome, ScriptRecord, ScriptRegistry};
pub use reload::{ReloadEngine, ReloadError, ReloadOutcome, ReloadTarget};
pub use state::{InvalidTransition, SessionState};
