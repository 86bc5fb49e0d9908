//! WebSocket inspector client.
//!
//! Requests carry sequential ids; each caller parks on a oneshot keyed by
//! that id until the reader task routes the matching response back. Events
//! are published to the [`EventHub`] in wire order by the same reader task,
//! so an event sent before a response is observed before the command
//! future resolves.

use std::{
    collections::HashMap,
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use async_trait::async_trait;
use futures::{Sink, SinkExt, Stream, StreamExt};
use livepatch_core::{
    Connector, EventHub, Inspector, InspectorEvent, ProtocolError, ScriptId, Subscription,
    VersionInfo,
};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Value, json};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tokio_tungstenite::tungstenite::Message as Frame;

use crate::{
    discovery::{Discovery, pick_target},
    protocol::{self, Message, Request},
};

type Pending = HashMap<u64, oneshot::Sender<Result<Value, ProtocolError>>>;

struct Shared {
    pending: Mutex<Pending>,
    hub: EventHub,
    closed: AtomicBool,
}

impl Shared {
    fn dispatch(&self, text: &str) {
        match serde_json::from_str::<Message>(text) {
            Ok(Message::Response(response)) => {
                let Some(tx) = self.pending.lock().remove(&response.id) else {
                    tracing::debug!(id = response.id, "response for unknown request");
                    return;
                };
                let _ = tx.send(response.into_result());
            }
            Ok(Message::Event(event)) => match event.to_inspector_event() {
                Ok(Some(event)) => self.hub.publish(&event),
                Ok(None) => {}
                Err(e) => tracing::warn!(method = %event.method, "malformed event: {e}"),
            },
            Ok(Message::Unknown(value)) => {
                tracing::debug!("ignoring unknown message: {value}");
            }
            Err(e) => tracing::warn!("undecodable message: {e}"),
        }
    }

    /// Fail every in-flight request and end every subscription.
    fn shutdown(&self, lost: bool) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        for (_, tx) in self.pending.lock().drain() {
            let _ = tx.send(Err(ProtocolError::ChannelClosed));
        }
        if lost {
            self.hub.publish(&InspectorEvent::Disconnected);
        }
        self.hub.close();
    }
}

/// An attached inspector session over one WebSocket.
pub struct CdpClient {
    next_id: AtomicU64,
    shared: Arc<Shared>,
    outbound: mpsc::UnboundedSender<Frame>,
    reader: Mutex<Option<JoinHandle<()>>>,
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl CdpClient {
    /// Open a WebSocket to `ws_url`.
    ///
    /// # Errors
    /// Returns error if the handshake fails.
    pub async fn connect(ws_url: &str) -> Result<Self, ProtocolError> {
        let (stream, _) = tokio_tungstenite::connect_async(ws_url)
            .await
            .map_err(|e| ProtocolError::WebSocket(e.to_string()))?;
        let (sink, source) = stream.split();
        Ok(Self::from_parts(sink, source))
    }

    /// Run the client over an already-split frame sink and source.
    pub fn from_parts<S, R, E>(sink: S, source: R) -> Self
    where
        S: Sink<Frame> + Send + Unpin + 'static,
        S::Error: fmt::Display,
        R: Stream<Item = Result<Frame, E>> + Send + Unpin + 'static,
        E: fmt::Display + 'static,
    {
        let shared = Arc::new(Shared {
            pending: Mutex::new(HashMap::new()),
            hub: EventHub::new(),
            closed: AtomicBool::new(false),
        });
        let (outbound, outbound_rx) = mpsc::unbounded_channel();

        let writer = tokio::spawn(write_frames(sink, outbound_rx));
        let reader = tokio::spawn(read_frames(source, Arc::clone(&shared)));

        Self {
            next_id: AtomicU64::new(1),
            shared,
            outbound,
            reader: Mutex::new(Some(reader)),
            writer: Mutex::new(Some(writer)),
        }
    }

    /// Send one command and wait for its result.
    ///
    /// # Errors
    /// Returns the remote error, or [`ProtocolError::ChannelClosed`] if the
    /// socket goes away first.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, ProtocolError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let text = serde_json::to_string(&Request { id, method, params })?;

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.shared.pending.lock();
            if self.shared.closed.load(Ordering::SeqCst) {
                return Err(ProtocolError::ChannelClosed);
            }
            pending.insert(id, tx);
        }

        tracing::debug!(id, method, "-> {method}");
        if self.outbound.send(Frame::Text(text)).is_err() {
            self.shared.pending.lock().remove(&id);
            return Err(ProtocolError::ChannelClosed);
        }

        rx.await.map_err(|_| ProtocolError::ChannelClosed)?
    }

    async fn call_with<P: Serialize + Sync>(&self, method: &str, params: &P) -> Result<Value, ProtocolError> {
        self.call(method, serde_json::to_value(params)?).await
    }

    /// Whether the socket is gone or was closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }
}

impl Drop for CdpClient {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.get_mut().take() {
            reader.abort();
        }
        if let Some(writer) = self.writer.get_mut().take() {
            writer.abort();
        }
    }
}

async fn write_frames<S>(mut sink: S, mut outbound: mpsc::UnboundedReceiver<Frame>)
where
    S: Sink<Frame> + Unpin,
    S::Error: fmt::Display,
{
    while let Some(frame) = outbound.recv().await {
        let closing = matches!(frame, Frame::Close(_));
        if let Err(e) = sink.send(frame).await {
            tracing::warn!("websocket write error: {e}");
            break;
        }
        if closing {
            break;
        }
    }
}

async fn read_frames<R, E>(mut source: R, shared: Arc<Shared>)
where
    R: Stream<Item = Result<Frame, E>> + Unpin,
    E: fmt::Display,
{
    while let Some(frame) = source.next().await {
        match frame {
            Ok(Frame::Text(text)) => shared.dispatch(&text),
            Ok(Frame::Binary(data)) => match std::str::from_utf8(&data) {
                Ok(text) => shared.dispatch(text),
                Err(e) => tracing::warn!("non-utf8 binary frame: {e}"),
            },
            Ok(Frame::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("websocket read error: {e}");
                break;
            }
        }
    }
    tracing::debug!("websocket closed by peer");
    shared.shutdown(true);
}

#[async_trait]
impl Inspector for CdpClient {
    fn subscribe(&self) -> Subscription {
        self.shared.hub.subscribe()
    }

    async fn enable_runtime(&self) -> Result<(), ProtocolError> {
        self.call(protocol::RUNTIME_ENABLE, json!({})).await.map(drop)
    }

    async fn enable_debugger(&self, max_scripts_cache_size: u64) -> Result<(), ProtocolError> {
        self.call_with(
            protocol::DEBUGGER_ENABLE,
            &protocol::EnableDebuggerParams {
                max_scripts_cache_size,
            },
        )
        .await
        .map(drop)
    }

    async fn enable_profiler(&self) -> Result<(), ProtocolError> {
        self.call(protocol::PROFILER_ENABLE, json!({})).await.map(drop)
    }

    async fn run_if_waiting_for_debugger(&self) -> Result<(), ProtocolError> {
        self.call(protocol::RUNTIME_RUN_IF_WAITING, json!({}))
            .await
            .map(drop)
    }

    async fn resume(&self) -> Result<(), ProtocolError> {
        self.call(protocol::DEBUGGER_RESUME, json!({})).await.map(drop)
    }

    async fn get_script_source(&self, script_id: &ScriptId) -> Result<String, ProtocolError> {
        let result = self
            .call_with(
                protocol::DEBUGGER_GET_SCRIPT_SOURCE,
                &protocol::GetScriptSourceParams { script_id },
            )
            .await?;
        let result: protocol::GetScriptSourceResult = serde_json::from_value(result)?;
        Ok(result.script_source)
    }

    async fn set_script_source(
        &self,
        script_id: &ScriptId,
        source: &str,
    ) -> Result<Value, ProtocolError> {
        self.call_with(
            protocol::DEBUGGER_SET_SCRIPT_SOURCE,
            &protocol::SetScriptSourceParams {
                script_id,
                script_source: source,
            },
        )
        .await
    }

    async fn close(&self) -> Result<(), ProtocolError> {
        if self.is_closed() {
            return Ok(());
        }
        let _ = self.outbound.send(Frame::Close(None));
        self.shared.shutdown(false);
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
        Ok(())
    }
}

/// Discovers targets over HTTP and attaches over WebSocket.
#[derive(Debug, Clone)]
pub struct CdpConnector {
    discovery: Discovery,
}

impl CdpConnector {
    /// Create a connector.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be initialised.
    pub fn new() -> Result<Self, ProtocolError> {
        Ok(Self {
            discovery: Discovery::new()?,
        })
    }
}

#[async_trait]
impl Connector for CdpConnector {
    async fn probe(&self, host: &str, port: u16) -> Result<VersionInfo, ProtocolError> {
        self.discovery.version(host, port).await
    }

    async fn attach(&self, host: &str, port: u16) -> Result<Arc<dyn Inspector>, ProtocolError> {
        let targets = self.discovery.targets(host, port).await?;
        let ws_url = pick_target(&targets)?;
        tracing::debug!(%ws_url, "attaching");
        let client = CdpClient::connect(ws_url).await?;
        Ok(Arc::new(client))
    }
}
