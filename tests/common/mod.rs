#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::protocol::Message;

use lavabridge::{GatewayBridge, GatewayPacket, GuildId, ManagerEvent, NodeOptions, Result};

pub fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
    });
}

/// In-process stand-in for a remote audio node: accepts WebSocket sessions,
/// records handshake headers and inbound frames, and can push frames or
/// drop the live connection on command.
pub struct MockNode {
    pub addr: SocketAddr,
    host: String,
    headers: Arc<Mutex<Vec<HashMap<String, String>>>>,
    frames: Arc<Mutex<Vec<Value>>>,
    closes: Arc<Mutex<Vec<(u16, String)>>>,
    connections: Arc<AtomicUsize>,
    outbound: flume::Sender<String>,
    drops: flume::Sender<()>,
}

impl MockNode {
    pub async fn spawn() -> Self {
        Self::spawn_on("127.0.0.1").await
    }

    pub async fn spawn_on(host: &str) -> Self {
        let listener = TcpListener::bind(format!("{host}:0")).await.unwrap();
        let addr = listener.local_addr().unwrap();

        let headers: Arc<Mutex<Vec<HashMap<String, String>>>> = Arc::new(Mutex::new(Vec::new()));
        let frames: Arc<Mutex<Vec<Value>>> = Arc::new(Mutex::new(Vec::new()));
        let closes: Arc<Mutex<Vec<(u16, String)>>> = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));
        let (outbound, outbound_rx) = flume::unbounded::<String>();
        let (drops, drops_rx) = flume::unbounded::<()>();

        {
            let headers = headers.clone();
            let frames = frames.clone();
            let closes = closes.clone();
            let connections = connections.clone();
            tokio::spawn(async move {
                loop {
                    let Ok((stream, _)) = listener.accept().await else {
                        return;
                    };
                    connections.fetch_add(1, Ordering::SeqCst);

                    let headers = headers.clone();
                    let accepted = tokio_tungstenite::accept_hdr_async(
                        stream,
                        move |request: &Request, response: Response| {
                            let mut map = HashMap::new();
                            for (name, value) in request.headers() {
                                map.insert(
                                    name.as_str().to_string(),
                                    value.to_str().unwrap_or_default().to_string(),
                                );
                            }
                            headers.lock().push(map);
                            Ok(response)
                        },
                    )
                    .await;
                    let Ok(mut ws) = accepted else {
                        continue;
                    };

                    loop {
                        tokio::select! {
                            message = ws.next() => match message {
                                Some(Ok(Message::Text(text))) => {
                                    if let Ok(value) = serde_json::from_str::<Value>(text.as_str()) {
                                        frames.lock().push(value);
                                    }
                                }
                                Some(Ok(Message::Close(frame))) => {
                                    if let Some(frame) = frame {
                                        closes
                                            .lock()
                                            .push((u16::from(frame.code), frame.reason.to_string()));
                                    }
                                    break;
                                }
                                Some(Ok(_)) => {}
                                _ => break,
                            },
                            text = outbound_rx.recv_async() => match text {
                                Ok(text) => {
                                    let _ = ws.send(Message::Text(text.into())).await;
                                }
                                Err(_) => break,
                            },
                            _ = drops_rx.recv_async() => break,
                        }
                    }
                }
            });
        }

        Self {
            addr,
            host: host.to_string(),
            headers,
            frames,
            closes,
            connections,
            outbound,
            drops,
        }
    }

    /// Node options pointing at this mock, with a short retry interval.
    pub fn options(&self, reconnect_ms: u64) -> NodeOptions {
        let mut options = NodeOptions::new(self.host.clone());
        options.port = self.addr.port();
        options.reconnect_interval_ms = reconnect_ms;
        options
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn send_json(&self, value: Value) {
        self.outbound.send(value.to_string()).unwrap();
    }

    /// Kills the live connection without a close handshake.
    pub fn drop_connection(&self) {
        self.drops.send(()).unwrap();
    }

    pub fn headers(&self) -> Vec<HashMap<String, String>> {
        self.headers.lock().clone()
    }

    pub fn frames(&self) -> Vec<Value> {
        self.frames.lock().clone()
    }

    pub fn frames_with_op(&self, op: &str) -> Vec<Value> {
        self.frames
            .lock()
            .iter()
            .filter(|f| f["op"] == op)
            .cloned()
            .collect()
    }

    pub fn closes(&self) -> Vec<(u16, String)> {
        self.closes.lock().clone()
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

/// Gateway bridge that records every packet instead of delivering it.
pub struct RecordingBridge {
    packets: Mutex<Vec<(GuildId, GatewayPacket)>>,
}

impl RecordingBridge {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            packets: Mutex::new(Vec::new()),
        })
    }

    pub fn packets(&self) -> Vec<(GuildId, GatewayPacket)> {
        self.packets.lock().clone()
    }
}

#[async_trait::async_trait]
impl GatewayBridge for RecordingBridge {
    async fn send_packet(&self, guild_id: &GuildId, packet: GatewayPacket) -> Result<()> {
        self.packets.lock().push((guild_id.clone(), packet));
        Ok(())
    }
}

/// Polls `cond` every 10 ms for up to two seconds.
pub async fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

/// Reads manager events until one matches `pred`.
pub async fn wait_for_event(
    events: &flume::Receiver<ManagerEvent>,
    what: &str,
    mut pred: impl FnMut(&ManagerEvent) -> bool,
) -> ManagerEvent {
    tokio::time::timeout(Duration::from_secs(3), async {
        loop {
            let event = events.recv_async().await.expect("event stream ended");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {what}"))
}
