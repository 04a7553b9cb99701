//! One authenticated WebSocket session to one remote audio node.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::common::errors::{Error, Result};
use crate::config::NodeOptions;
use crate::manager::{ManagerContext, ManagerEvent};
use crate::protocol::{InboundMessage, NodeStats, OutgoingMessage};
use crate::rest::RestClient;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Synthetic close code reported when the transport dies without a close
/// handshake.
const CLOSE_ABNORMAL: u16 = 1006;

/// Close reason this client sends on intentional teardown. A close with
/// code 1000 and this exact reason is the only sequence that does not
/// trigger a reconnect.
const DESTROY_REASON: &str = "destroy";

/// A link to a single node.
///
/// The link reconnects itself at a flat interval after any abnormal close or
/// transport error, indefinitely, until [`destroy`](Self::destroy) is
/// called. Inbound frames are demultiplexed to the owning guild's player;
/// every parsed frame is also mirrored to manager subscribers as
/// [`ManagerEvent::Raw`].
pub struct NodeLink {
    me: Weak<NodeLink>,
    options: NodeOptions,
    endpoint: String,
    ordinal: u64,
    ctx: Arc<ManagerContext>,
    sink: tokio::sync::Mutex<Option<WsSink>>,
    connected: AtomicBool,
    stats: parking_lot::RwLock<Option<NodeStats>>,
    resume_key: parking_lot::Mutex<Option<String>>,
    reconnect_pending: AtomicBool,
    shutdown: CancellationToken,
}

impl NodeLink {
    pub(crate) fn new(
        options: NodeOptions,
        ordinal: u64,
        ctx: Arc<ManagerContext>,
    ) -> Arc<Self> {
        let scheme = if options.secure { "wss" } else { "ws" };
        let endpoint = format!("{scheme}://{}:{}", options.host, options.port);
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            options,
            endpoint,
            ordinal,
            ctx,
            sink: tokio::sync::Mutex::new(None),
            connected: AtomicBool::new(false),
            stats: parking_lot::RwLock::new(None),
            resume_key: parking_lot::Mutex::new(None),
            reconnect_pending: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn host(&self) -> &str {
        &self.options.host
    }

    pub fn port(&self) -> u16 {
        self.options.port
    }

    pub fn connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Last stats snapshot pushed by the node, if it has reported yet.
    pub fn stats(&self) -> Option<NodeStats> {
        self.stats.read().clone()
    }

    pub fn normalized_load(&self) -> f64 {
        self.stats
            .read()
            .as_ref()
            .map(NodeStats::normalized_load)
            .unwrap_or(0.0)
    }

    /// REST client against this node's HTTP port, sharing its credentials.
    pub fn rest(&self) -> Result<RestClient> {
        RestClient::new(&self.options)
    }

    pub(crate) fn ordinal(&self) -> u64 {
        self.ordinal
    }

    fn emit(&self, build: impl FnOnce(Arc<NodeLink>) -> ManagerEvent) {
        if let Some(link) = self.me.upgrade() {
            self.ctx.events.emit(build(link));
        }
    }

    /// Opens the transport. A no-op when already connected; rejected once
    /// the link has been destroyed.
    pub async fn open(&self) -> Result<()> {
        if self.connected() {
            return Ok(());
        }
        if self.shutdown.is_cancelled() {
            return Err(Error::NotConnected);
        }

        let request = self.handshake_request()?;
        match connect_async(request).await {
            Ok((stream, _response)) => {
                let (sink, source) = stream.split();
                *self.sink.lock().await = Some(sink);
                self.connected.store(true, Ordering::SeqCst);
                self.reconnect_pending.store(false, Ordering::SeqCst);
                info!(host = %self.options.host, port = self.options.port, "node link established");
                self.emit(ManagerEvent::NodeReady);

                let key = self
                    .resume_key
                    .lock()
                    .clone()
                    .or_else(|| self.ctx.resume_key.clone())
                    .unwrap_or_else(|| self.ctx.user_id.to_string());
                if let Err(e) = self.configure_resuming(&key, self.ctx.resume_timeout).await {
                    warn!(host = %self.options.host, error = %e, "failed to configure session resumption");
                }

                if let Some(link) = self.me.upgrade() {
                    tokio::spawn(async move { link.read_loop(source).await });
                }
                Ok(())
            }
            Err(e) => {
                let message = e.to_string();
                self.emit(|node| ManagerEvent::NodeError { node, message });
                self.schedule_reconnect();
                Err(Error::Transport(e))
            }
        }
    }

    fn handshake_request(
        &self,
    ) -> Result<tokio_tungstenite::tungstenite::handshake::client::Request> {
        let mut request = self.endpoint.as_str().into_client_request()?;
        let header =
            |value: &str| HeaderValue::from_str(value).map_err(|e| Error::Protocol(e.to_string()));
        let headers = request.headers_mut();
        headers.insert("Authorization", header(&self.options.password)?);
        headers.insert("Num-Shards", header(&self.ctx.shards.to_string())?);
        headers.insert("User-Id", header(&self.ctx.user_id.to_string())?);
        if let Some(key) = self.resume_key.lock().as_deref() {
            headers.insert("Resume-Key", header(key)?);
        }
        Ok(request)
    }

    /// Sends a command to the node. Resolves `false` immediately when the
    /// link is down; a transport-level failure is returned as an error and
    /// tips the link into its reconnect loop.
    pub async fn send(&self, message: &OutgoingMessage) -> Result<bool> {
        let json = serde_json::to_string(message)?;
        let mut guard = self.sink.lock().await;
        let Some(sink) = guard.as_mut() else {
            return Ok(false);
        };
        match sink.send(Message::Text(json.into())).await {
            Ok(()) => Ok(true),
            Err(e) => {
                guard.take();
                drop(guard);
                self.connected.store(false, Ordering::SeqCst);
                let message = e.to_string();
                self.emit(|node| ManagerEvent::NodeError { node, message });
                self.schedule_reconnect();
                Err(Error::Transport(e))
            }
        }
    }

    /// Stores `key` for future handshakes and asks the node to keep this
    /// session resumable for `timeout_secs` after a disconnect.
    pub async fn configure_resuming(&self, key: &str, timeout_secs: u64) -> Result<bool> {
        *self.resume_key.lock() = Some(key.to_string());
        self.send(&OutgoingMessage::ConfigureResuming {
            key: key.to_string(),
            timeout: timeout_secs,
        })
        .await
    }

    /// Intentional teardown: cancels any pending reconnect and closes with
    /// 1000/"destroy" so the close handler knows not to resurrect the link.
    /// Returns `false` when the link was already disconnected (the pending
    /// reconnect is still cancelled in that case).
    pub async fn destroy(&self) -> bool {
        self.shutdown.cancel();
        if !self.connected() {
            return false;
        }
        self.connected.store(false, Ordering::SeqCst);
        let mut guard = self.sink.lock().await;
        if let Some(mut sink) = guard.take() {
            let frame = CloseFrame {
                code: CloseCode::Normal,
                reason: DESTROY_REASON.into(),
            };
            let _ = sink.send(Message::Close(Some(frame))).await;
        }
        true
    }

    async fn read_loop(&self, mut source: WsSource) {
        while let Some(frame) = source.next().await {
            match frame {
                Ok(Message::Text(text)) => self.handle_frame(text.as_str()).await,
                Ok(Message::Binary(bytes)) => {
                    let text = String::from_utf8_lossy(&bytes).into_owned();
                    self.handle_frame(&text).await;
                }
                Ok(Message::Close(frame)) => {
                    let (code, reason) = frame
                        .map(|f| (u16::from(f.code), f.reason.to_string()))
                        .unwrap_or((1005, String::new()));
                    self.handle_close(code, &reason).await;
                    return;
                }
                Ok(_) => {}
                Err(e) => {
                    self.handle_error(e).await;
                    return;
                }
            }
        }
        self.handle_close(CLOSE_ABNORMAL, "transport ended").await;
    }

    async fn handle_frame(&self, text: &str) {
        let payload: serde_json::Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(e) => {
                warn!(host = %self.options.host, error = %e, "discarding malformed frame");
                return;
            }
        };

        match serde_json::from_value::<InboundMessage>(payload.clone()) {
            Ok(InboundMessage::Stats(stats)) => {
                *self.stats.write() = Some(stats);
            }
            Ok(InboundMessage::PlayerUpdate { guild_id, state }) => {
                let player = self.ctx.players.get(&guild_id).map(|p| p.value().clone());
                if let Some(player) = player {
                    player.handle_position_update(state);
                }
            }
            Ok(InboundMessage::Event(event)) => {
                let player = self
                    .ctx
                    .players
                    .get(&event.guild_id)
                    .map(|p| p.value().clone());
                if let Some(player) = player {
                    player.handle_remote_event(event).await;
                }
            }
            Err(e) => {
                warn!(host = %self.options.host, error = %e, "unrecognized node message");
            }
        }

        self.emit(|node| ManagerEvent::Raw { node, payload });
    }

    async fn handle_close(&self, code: u16, reason: &str) {
        self.connected.store(false, Ordering::SeqCst);
        self.sink.lock().await.take();
        warn!(host = %self.options.host, code, reason, "node link closed");
        let reason_owned = reason.to_string();
        self.emit(|node| ManagerEvent::NodeDisconnect {
            node,
            code,
            reason: reason_owned,
        });
        if code == 1000 && reason == DESTROY_REASON {
            return;
        }
        self.schedule_reconnect();
    }

    async fn handle_error(&self, err: tokio_tungstenite::tungstenite::Error) {
        self.connected.store(false, Ordering::SeqCst);
        self.sink.lock().await.take();
        let message = err.to_string();
        self.emit(|node| ManagerEvent::NodeError { node, message });
        self.schedule_reconnect();
    }

    /// Arms the flat-interval retry timer. First-one-wins: a trigger while
    /// a timer is already pending is ignored. A destroyed link never
    /// reschedules.
    pub(crate) fn schedule_reconnect(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        if self.reconnect_pending.swap(true, Ordering::SeqCst) {
            return;
        }
        let Some(link) = self.me.upgrade() else {
            return;
        };
        let delay = Duration::from_millis(self.options.reconnect_interval_ms);
        tokio::spawn(async move {
            tokio::select! {
                _ = link.shutdown.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    link.reconnect_pending.store(false, Ordering::SeqCst);
                    // A manual open in the meantime obsoletes this timer.
                    if link.connected() {
                        return;
                    }
                    link.emit(ManagerEvent::NodeReconnecting);
                    if let Err(e) = link.open().await {
                        warn!(host = %link.options.host, error = %e, "reconnect attempt failed");
                    }
                }
            }
        });
    }

    #[cfg(test)]
    pub(crate) fn force_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    #[cfg(test)]
    pub(crate) fn inject_stats(&self, stats: NodeStats) {
        *self.stats.write() = Some(stats);
    }
}

impl std::fmt::Debug for NodeLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeLink")
            .field("host", &self.options.host)
            .field("port", &self.options.port)
            .field("connected", &self.connected())
            .finish()
    }
}
