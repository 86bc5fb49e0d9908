//! Chrome DevTools Protocol transport.
//!
//! Provides:
//! - Wire protocol (JSON requests, responses and events)
//! - HTTP target discovery (`/json/version`, `/json/list`)
//! - WebSocket inspector client

pub mod discovery;
pub mod protocol;
pub mod websocket;

pub use discovery::{Discovery, TargetInfo, pick_target};
pub use websocket::{CdpClient, CdpConnector};
