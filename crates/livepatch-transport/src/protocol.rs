//! Wire protocol for the inspector WebSocket.

use livepatch_core::{InspectorEvent, ProtocolError, ScriptId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const RUNTIME_ENABLE: &str = "Runtime.enable";
pub const RUNTIME_RUN_IF_WAITING: &str = "Runtime.runIfWaitingForDebugger";
pub const DEBUGGER_ENABLE: &str = "Debugger.enable";
pub const DEBUGGER_RESUME: &str = "Debugger.resume";
pub const DEBUGGER_GET_SCRIPT_SOURCE: &str = "Debugger.getScriptSource";
pub const DEBUGGER_SET_SCRIPT_SOURCE: &str = "Debugger.setScriptSource";
pub const PROFILER_ENABLE: &str = "Profiler.enable";

/// Command sent to the engine.
#[derive(Debug, Clone, Serialize)]
pub struct Request<'a> {
    pub id: u64,
    pub method: &'a str,
    pub params: Value,
}

/// Reply to a [`Request`], correlated by `id`.
#[derive(Debug, Clone, Deserialize)]
pub struct Response {
    pub id: u64,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<ErrorPayload>,
}

/// CDP error object.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorPayload {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<String>,
}

/// Unsolicited notification from the engine.
#[derive(Debug, Clone, Deserialize)]
pub struct Event {
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

/// Anything that can arrive on the socket.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Message {
    /// Has an `id`.
    Response(Response),
    /// Has a `method` and no `id`.
    Event(Event),
    /// Forward-compatible catch-all.
    Unknown(Value),
}

impl Response {
    /// Split into the command result or a remote error.
    ///
    /// # Errors
    /// Returns [`ProtocolError::Remote`] if the engine rejected the command.
    pub fn into_result(self) -> Result<Value, ProtocolError> {
        match self.error {
            Some(error) => {
                let message = match error.data {
                    Some(data) => format!("{} ({data})", error.message),
                    None => error.message,
                };
                Err(ProtocolError::Remote {
                    code: error.code,
                    message,
                })
            }
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScriptParsedParams {
    script_id: ScriptId,
    #[serde(default)]
    url: String,
}

impl Event {
    /// Typed form of the events the session cares about.
    ///
    /// # Errors
    /// Returns error if a known event carries malformed params.
    pub fn to_inspector_event(&self) -> Result<Option<InspectorEvent>, serde_json::Error> {
        let event = match self.method.as_str() {
            "Debugger.scriptParsed" => {
                let p: ScriptParsedParams = serde_json::from_value(self.params.clone())?;
                InspectorEvent::ScriptParsed {
                    script_id: p.script_id,
                    url: p.url,
                }
            }
            "Debugger.scriptFailedToParse" => {
                let p: ScriptParsedParams = serde_json::from_value(self.params.clone())?;
                InspectorEvent::ScriptFailedToParse {
                    script_id: p.script_id,
                    url: p.url,
                }
            }
            "Debugger.paused" => InspectorEvent::Paused,
            _ => return Ok(None),
        };
        Ok(Some(event))
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnableDebuggerParams {
    pub max_scripts_cache_size: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GetScriptSourceParams<'a> {
    pub script_id: &'a ScriptId,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetScriptSourceResult {
    pub script_source: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetScriptSourceParams<'a> {
    pub script_id: &'a ScriptId,
    pub script_source: &'a str,
}
