//! Duplex text transports for the live connection.
//!
//! A [`Transport`] opens a [`Link`]: a pair of unbounded channels carrying raw
//! Engine.IO frames. The connection driver never touches sockets directly, so
//! the same state machine runs over a real WebSocket or over the in-process
//! [`MemoryTransport`].

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

use super::wire::{self, EnginePacket, OpenInfo, SocketPacket};
use crate::errors::SyncError;
use crate::util::lock;

/// An open duplex link. Dropping `outbound` closes the link; `inbound`
/// yields `None` once the peer is gone.
pub struct Link {
    pub outbound: mpsc::UnboundedSender<String>,
    pub inbound: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a fresh link. Each call is one connection attempt.
    async fn open(&self) -> Result<Link, SyncError>;

    /// Human-readable target, used in logs and errors.
    fn target(&self) -> String;
}

// ── WebSocket ────────────────────────────────────────────────────────

/// Socket.IO over a persistent WebSocket (no long-polling fallback).
pub struct WebSocketTransport {
    url: String,
}

impl WebSocketTransport {
    /// Build a transport for an `http(s)://` or `ws(s)://` server base URL.
    pub fn new(base_url: &str) -> Result<Self, SyncError> {
        Ok(Self {
            url: wire::endpoint_url(base_url)?,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn open(&self) -> Result<Link, SyncError> {
        let (socket, _response) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| SyncError::TransportOpen {
                url: self.url.clone(),
                message: e.to_string(),
            })?;

        let (mut sink, mut stream) = socket.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<String>();

        // Writer: ends when every outbound sender is dropped.
        tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                if sink.send(Message::text(frame)).await.is_err() {
                    break;
                }
            }
            // Best-effort close frame
            let _ = sink.close().await;
        });

        // Reader: ends when the socket closes or the link owner goes away.
        tokio::spawn(async move {
            while let Some(msg) = stream.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        if in_tx.send(text.as_str().to_owned()).is_err() {
                            break;
                        }
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {
                        // Ping/Pong frames are answered by tungstenite itself.
                    }
                    Err(e) => {
                        debug!(error = %e, "websocket read failed");
                        break;
                    }
                }
            }
        });

        Ok(Link {
            outbound: out_tx,
            inbound: in_rx,
        })
    }

    fn target(&self) -> String {
        self.url.clone()
    }
}

// ── In-process transport ─────────────────────────────────────────────

/// In-process transport whose server side is driven by a [`MemoryServer`].
///
/// Useful for running the connection state machine deterministically without
/// a network: refuse a number of attempts, accept links, push events, drop
/// links to simulate network loss.
pub struct MemoryTransport {
    shared: Arc<MemoryShared>,
    accepted: mpsc::UnboundedSender<MemoryPeer>,
}

struct MemoryShared {
    attempts: AtomicUsize,
    plan: Mutex<VecDeque<bool>>,
    refuse_rest: Mutex<bool>,
}

/// Server half of a [`MemoryTransport`].
pub struct MemoryServer {
    shared: Arc<MemoryShared>,
    accepted: mpsc::UnboundedReceiver<MemoryPeer>,
}

impl MemoryTransport {
    pub fn pair() -> (MemoryTransport, MemoryServer) {
        let shared = Arc::new(MemoryShared {
            attempts: AtomicUsize::new(0),
            plan: Mutex::new(VecDeque::new()),
            refuse_rest: Mutex::new(false),
        });
        let (tx, rx) = mpsc::unbounded_channel();
        (
            MemoryTransport {
                shared: shared.clone(),
                accepted: tx,
            },
            MemoryServer {
                shared,
                accepted: rx,
            },
        )
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn open(&self) -> Result<Link, SyncError> {
        self.shared.attempts.fetch_add(1, Ordering::SeqCst);

        let planned = lock(&self.shared.plan).pop_front();
        let accept = planned.unwrap_or_else(|| !*lock(&self.shared.refuse_rest));
        if !accept {
            return Err(SyncError::TransportOpen {
                url: self.target(),
                message: "connection refused".to_string(),
            });
        }

        let (client_tx, server_rx) = mpsc::unbounded_channel();
        let (server_tx, client_rx) = mpsc::unbounded_channel();
        let peer = MemoryPeer {
            from_client: server_rx,
            to_client: Some(server_tx),
        };
        self.accepted
            .send(peer)
            .map_err(|_| SyncError::TransportOpen {
                url: self.target(),
                message: "memory server dropped".to_string(),
            })?;

        Ok(Link {
            outbound: client_tx,
            inbound: client_rx,
        })
    }

    fn target(&self) -> String {
        "memory://".to_string()
    }
}

impl MemoryServer {
    /// Refuse the next `n` connection attempts, then accept again.
    pub fn refuse_next(&self, n: usize) {
        let mut plan = lock(&self.shared.plan);
        for _ in 0..n {
            plan.push_back(false);
        }
    }

    /// Refuse every unplanned attempt from now on (`true`) or accept them (`false`).
    pub fn refuse_all(&self, refuse: bool) {
        *lock(&self.shared.refuse_rest) = refuse;
    }

    /// Number of `open()` calls seen so far, accepted or not.
    pub fn attempts(&self) -> usize {
        self.shared.attempts.load(Ordering::SeqCst)
    }

    /// Wait for the next accepted link.
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.accepted.recv().await
    }
}

/// Server end of one accepted in-process link.
pub struct MemoryPeer {
    from_client: mpsc::UnboundedReceiver<String>,
    to_client: Option<mpsc::UnboundedSender<String>>,
}

impl MemoryPeer {
    /// Run the server side of the Engine.IO / Socket.IO handshake.
    pub async fn handshake(&mut self, sid: &str) -> Result<(), SyncError> {
        self.handshake_with(sid, 25_000, 20_000).await
    }

    /// Handshake advertising custom ping timing, in milliseconds.
    pub async fn handshake_with(
        &mut self,
        sid: &str,
        ping_interval: u64,
        ping_timeout: u64,
    ) -> Result<(), SyncError> {
        let info = OpenInfo {
            sid: sid.to_string(),
            upgrades: Vec::new(),
            ping_interval,
            ping_timeout,
            max_payload: Some(1_000_000),
        };
        self.send_raw(EnginePacket::Open(info).encode());

        match self.recv().await.as_deref() {
            Some("40") => {}
            Some(other) => {
                return Err(SyncError::MalformedPacket(format!(
                    "expected connect request, got {}",
                    other
                )));
            }
            None => return Err(SyncError::ClosedDuringHandshake),
        }

        let ack = SocketPacket::Connect {
            namespace: wire::DEFAULT_NAMESPACE.to_string(),
            data: Some(json!({ "sid": sid })),
        };
        self.send_raw(EnginePacket::Message(ack.encode()).encode());
        Ok(())
    }

    /// Reject the socket connection with a connect-error packet.
    pub async fn reject(&mut self, message: &str) {
        let open = OpenInfo {
            sid: "rejected".to_string(),
            upgrades: Vec::new(),
            ping_interval: 25_000,
            ping_timeout: 20_000,
            max_payload: None,
        };
        self.send_raw(EnginePacket::Open(open).encode());
        let _ = self.recv().await;
        let err = SocketPacket::ConnectError {
            namespace: wire::DEFAULT_NAMESPACE.to_string(),
            data: json!({ "message": message }),
        };
        self.send_raw(EnginePacket::Message(err.encode()).encode());
    }

    /// Next raw frame from the client.
    pub async fn recv(&mut self) -> Option<String> {
        self.from_client.recv().await
    }

    /// Next client event, skipping pongs and other control frames.
    pub async fn recv_event(&mut self) -> Option<(String, Value)> {
        while let Some(frame) = self.from_client.recv().await {
            if let Ok(EnginePacket::Message(body)) = EnginePacket::decode(&frame) {
                if let Ok(SocketPacket::Event { name, args, .. }) = SocketPacket::decode(&body) {
                    return Some((name, args.into_iter().next().unwrap_or(Value::Null)));
                }
            }
        }
        None
    }

    /// Every client event already queued, without waiting.
    pub fn drain_events(&mut self) -> Vec<(String, Value)> {
        let mut events = Vec::new();
        while let Ok(frame) = self.from_client.try_recv() {
            if let Ok(EnginePacket::Message(body)) = EnginePacket::decode(&frame) {
                if let Ok(SocketPacket::Event { name, args, .. }) = SocketPacket::decode(&body) {
                    events.push((name, args.into_iter().next().unwrap_or(Value::Null)));
                }
            }
        }
        events
    }

    /// Push a server event to the client.
    pub fn emit(&self, event: &str, payload: Value) -> bool {
        self.send_raw(wire::event_frame(event, payload))
    }

    pub fn send_raw(&self, frame: String) -> bool {
        match &self.to_client {
            Some(tx) => tx.send(frame).is_ok(),
            None => false,
        }
    }

    /// Drop the server side, as a network loss would.
    pub fn close(&mut self) {
        self.to_client = None;
    }
}
