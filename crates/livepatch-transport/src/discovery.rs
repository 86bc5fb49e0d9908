//! HTTP endpoint discovery: engine version and inspectable targets.

use std::time::Duration;

use livepatch_core::{ProtocolError, VersionInfo};
use serde::{Deserialize, Serialize};

/// One entry of `/json/list`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetInfo {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub web_socket_debugger_url: Option<String>,
}

/// Pick the WebSocket URL to attach to.
///
/// First `page` target with a debugger URL, else the first target with one.
///
/// # Errors
/// Returns [`ProtocolError::NoTarget`] if no target exposes a debugger URL.
pub fn pick_target(targets: &[TargetInfo]) -> Result<&str, ProtocolError> {
    let attachable = || {
        targets
            .iter()
            .filter_map(|t| t.web_socket_debugger_url.as_deref().map(|url| (t, url)))
    };
    attachable()
        .find(|(t, _)| t.kind == "page")
        .or_else(|| attachable().next())
        .map(|(_, url)| url)
        .ok_or(ProtocolError::NoTarget)
}

/// Thin client for the inspector's HTTP endpoints.
#[derive(Debug, Clone)]
pub struct Discovery {
    client: reqwest::Client,
}

impl Discovery {
    /// Build a client.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be initialised.
    pub fn new() -> Result<Self, ProtocolError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| ProtocolError::Probe(e.to_string()))?;
        Ok(Self { client })
    }

    /// `GET /json/version`.
    ///
    /// # Errors
    /// Returns error if the endpoint is unreachable or replies garbage.
    pub async fn version(&self, host: &str, port: u16) -> Result<VersionInfo, ProtocolError> {
        self.get_json(&endpoint(host, port, "/json/version")).await
    }

    /// `GET /json/list`.
    ///
    /// # Errors
    /// Returns error if the endpoint is unreachable or replies garbage.
    pub async fn targets(&self, host: &str, port: u16) -> Result<Vec<TargetInfo>, ProtocolError> {
        self.get_json(&endpoint(host, port, "/json/list")).await
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, ProtocolError> {
        tracing::debug!(%url, "GET");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| ProtocolError::Probe(e.to_string()))?;
        let body = response
            .text()
            .await
            .map_err(|e| ProtocolError::Probe(e.to_string()))?;
        Ok(serde_json::from_str(&body)?)
    }
}

fn endpoint(host: &str, port: u16, path: &str) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("http://[{host}]:{port}{path}")
    } else {
        format!("http://{host}:{port}{path}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(kind: &str, ws: Option<&str>) -> TargetInfo {
        TargetInfo {
            kind: kind.into(),
            web_socket_debugger_url: ws.map(Into::into),
            ..TargetInfo::default()
        }
    }

    #[test]
    fn test_page_target_preferred() {
        let targets = [
            target("node", Some("ws://a")),
            target("page", None),
            target("page", Some("ws://b")),
        ];
        assert_eq!(pick_target(&targets).unwrap(), "ws://b");
    }

    #[test]
    fn test_falls_back_to_first_attachable() {
        let targets = [target("worker", None), target("node", Some("ws://n"))];
        assert_eq!(pick_target(&targets).unwrap(), "ws://n");
    }

    #[test]
    fn test_no_target() {
        assert!(matches!(pick_target(&[]), Err(ProtocolError::NoTarget)));
        assert!(matches!(
            pick_target(&[target("page", None)]),
            Err(ProtocolError::NoTarget)
        ));
    }

    #[test]
    fn test_node_list_parses() {
        let body = r#"[{
            "description": "node.js instance",
            "devtoolsFrontendUrl": "devtools://devtools/bundled/js_app.html?ws=127.0.0.1:9229/abc",
            "id": "abc",
            "title": "app.js",
            "type": "node",
            "url": "file:///srv/app.js",
            "webSocketDebuggerUrl": "ws://127.0.0.1:9229/abc"
        }]"#;
        let targets: Vec<TargetInfo> = serde_json::from_str(body).unwrap();
        assert_eq!(targets[0].kind, "node");
        assert_eq!(pick_target(&targets).unwrap(), "ws://127.0.0.1:9229/abc");
    }

    #[test]
    fn test_version_flavor() {
        let info: VersionInfo =
            serde_json::from_str(r#"{"Browser":"node.js/v20.11.0","Protocol-Version":"1.1"}"#).unwrap();
        assert_eq!(info.flavor(), livepatch_core::EngineFlavor::GenericHost);
    }

    #[test]
    fn test_endpoint_brackets_ipv6() {
        assert_eq!(endpoint("::1", 9229, "/json/list"), "http://[::1]:9229/json/list");
        assert_eq!(
            endpoint("127.0.0.1", 9222, "/json/version"),
            "http://127.0.0.1:9222/json/version"
        );
    }
}
