// src/network/mod.rs
pub mod handshake;
pub mod message;

pub use message::{Envelope, Message, WireError};

use anyhow::{bail, Context, Result};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, Notify};
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use uuid::Uuid;

use crate::ledger::now_millis;
use crate::registry::NodeId;

/// Outbound queue depth per peer connection.
const PEER_QUEUE_DEPTH: usize = 128;
const EVENT_QUEUE_DEPTH: usize = 1024;

/// What the transport reports to its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum NetworkEvent {
    PeerConnected { node_id: NodeId, address: String },
    PeerDisconnected { node_id: NodeId },
    /// A PONG arrived from this peer.
    Heartbeat { node_id: NodeId },
    /// Application message from an acknowledged peer.
    Inbound { peer_id: NodeId, envelope: Envelope },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerSummary {
    pub node_id: NodeId,
    pub address: String,
    pub connected_at: i64,
    pub last_seen: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkStats {
    pub node_id: NodeId,
    pub listen_addr: Option<String>,
    pub peer_count: usize,
    pub peers: Vec<PeerSummary>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Inbound,
    Outbound,
}

struct PeerConnection {
    conn_id: Uuid,
    direction: Direction,
    outbound: mpsc::Sender<Envelope>,
    close: Arc<Notify>,
    info: PeerSummary,
}

/// Cloneable handle to the node's transport. Only peers that completed the
/// HANDSHAKE / HANDSHAKE_ACK exchange are present in the peer table.
#[derive(Clone)]
pub struct P2PNetwork {
    node_id: NodeId,
    peers: Arc<Mutex<HashMap<NodeId, PeerConnection>>>,
    listen_addr: Arc<Mutex<Option<SocketAddr>>>,
    events: mpsc::Sender<NetworkEvent>,
    shutdown_tx: broadcast::Sender<()>,
}

impl P2PNetwork {
    pub fn new(node_id: impl Into<NodeId>) -> (Self, mpsc::Receiver<NetworkEvent>) {
        let (events, events_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let (shutdown_tx, _) = broadcast::channel::<()>(1);
        let net = Self {
            node_id: node_id.into(),
            peers: Arc::new(Mutex::new(HashMap::new())),
            listen_addr: Arc::new(Mutex::new(None)),
            events,
            shutdown_tx,
        };
        (net, events_rx)
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.listen_addr.lock()
    }

    /// Bind the listener and start accepting peers in the background.
    pub async fn start(&self, listen_addr: &str) -> Result<SocketAddr> {
        let listener = TcpListener::bind(listen_addr)
            .await
            .with_context(|| format!("binding P2P listener on {}", listen_addr))?;
        let local = listener.local_addr()?;
        *self.listen_addr.lock() = Some(local);
        tracing::info!(node = %self.node_id, addr = %local, "P2P listener started");

        let net = self.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    accepted = listener.accept() => match accepted {
                        Ok((stream, addr)) => {
                            let net = net.clone();
                            tokio::spawn(async move { net.handle_inbound(stream, addr).await });
                        }
                        Err(e) => tracing::warn!("P2P accept error: {}", e),
                    },
                    _ = shutdown_rx.recv() => {
                        tracing::info!("P2P listener shutting down");
                        break;
                    }
                }
            }
        });
        Ok(local)
    }

    async fn handle_inbound(&self, stream: TcpStream, addr: SocketAddr) {
        match handshake::server_handshake(stream, &self.node_id).await {
            Ok((peer_id, framed)) => {
                tracing::info!(peer = %peer_id, addr = %addr, "inbound handshake complete");
                self.register(peer_id, addr.to_string(), Direction::Inbound, framed)
                    .await;
            }
            Err(e) => tracing::warn!("P2P: handshake failed from {}: {}", addr, e),
        }
    }

    /// Dial `address` and complete the handshake. Failures are returned for the caller to retry.
    pub async fn connect_to_peer(&self, address: &str, expected_id: Option<&str>) -> Result<NodeId> {
        let stream = TcpStream::connect(address)
            .await
            .with_context(|| format!("connecting to {}", address))?;
        let (peer_id, framed) = handshake::client_handshake(stream, &self.node_id).await?;
        if let Some(expected) = expected_id {
            if expected != peer_id {
                bail!("peer at {} identified as {}, expected {}", address, peer_id, expected);
            }
        }
        tracing::info!(peer = %peer_id, addr = %address, "outbound handshake complete");
        self.register(peer_id.clone(), address.to_string(), Direction::Outbound, framed)
            .await;
        Ok(peer_id)
    }

    /// Both ends of a pair keep the connection dialed by the smaller node id.
    fn preferred(&self, peer_id: &str, direction: Direction) -> bool {
        match direction {
            Direction::Outbound => self.node_id.as_str() < peer_id,
            Direction::Inbound => peer_id < self.node_id.as_str(),
        }
    }

    /// Install a handshaken connection. A second connection to the same peer
    /// replaces the first unless it loses the dial tie-break, in which case it
    /// is dropped and the existing one stays. Returns whether it was installed.
    async fn register<S>(
        &self,
        peer_id: NodeId,
        address: String,
        direction: Direction,
        framed: Framed<S, LengthDelimitedCodec>,
    ) -> bool
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(PEER_QUEUE_DEPTH);
        let close = Arc::new(Notify::new());
        let conn_id = Uuid::new_v4();
        let now = now_millis();
        let info = PeerSummary {
            node_id: peer_id.clone(),
            address: address.clone(),
            connected_at: now,
            last_seen: now,
        };
        {
            let mut peers = self.peers.lock();
            if let Some(existing) = peers.get(&peer_id) {
                if existing.direction != direction
                    && self.preferred(&peer_id, existing.direction)
                {
                    tracing::debug!(peer = %peer_id, ?direction, "duplicate connection lost the dial tie-break");
                    return false;
                }
            }
            let previous = peers.insert(
                peer_id.clone(),
                PeerConnection {
                    conn_id,
                    direction,
                    outbound: tx,
                    close: close.clone(),
                    info,
                },
            );
            if let Some(old) = previous {
                tracing::debug!(peer = %peer_id, "replacing existing connection");
                old.close.notify_one();
            }
        }

        let _ = self
            .events
            .send(NetworkEvent::PeerConnected {
                node_id: peer_id.clone(),
                address,
            })
            .await;

        let net = self.clone();
        tokio::spawn(async move {
            net.run_connection(peer_id, conn_id, framed, rx, close).await;
        });
        true
    }

    async fn run_connection<S>(
        self,
        peer_id: NodeId,
        conn_id: Uuid,
        framed: Framed<S, LengthDelimitedCodec>,
        mut outbound: mpsc::Receiver<Envelope>,
        close: Arc<Notify>,
    ) where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (mut sink, mut stream) = framed.split();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                queued = outbound.recv() => {
                    let Some(env) = queued else { break };
                    let bytes = match env.encode() {
                        Ok(b) => b,
                        Err(e) => {
                            tracing::warn!(peer = %peer_id, "dropping unencodable message: {}", e);
                            continue;
                        }
                    };
                    if let Err(e) = sink.send(bytes).await {
                        tracing::warn!(peer = %peer_id, "P2P write error: {}", e);
                        break;
                    }
                }
                frame = stream.next() => match frame {
                    Some(Ok(bytes)) => {
                        if let Some(reply) = self.handle_frame(&peer_id, &bytes).await {
                            match reply.encode() {
                                Ok(b) => {
                                    if let Err(e) = sink.send(b).await {
                                        tracing::warn!(peer = %peer_id, "P2P write error: {}", e);
                                        break;
                                    }
                                }
                                Err(e) => tracing::warn!("failed to encode reply: {}", e),
                            }
                        }
                    }
                    Some(Err(e)) => {
                        tracing::warn!(peer = %peer_id, "P2P read error: {}", e);
                        break;
                    }
                    None => break,
                },
                _ = close.notified() => break,
                _ = shutdown_rx.recv() => break,
            }
        }

        let superseded = {
            let mut peers = self.peers.lock();
            match peers.get(&peer_id) {
                Some(p) if p.conn_id == conn_id => {
                    peers.remove(&peer_id);
                    false
                }
                Some(_) => true,
                None => false,
            }
        };
        tracing::info!(peer = %peer_id, "connection closed");
        if !superseded {
            let _ = self
                .events
                .send(NetworkEvent::PeerDisconnected { node_id: peer_id })
                .await;
        }
    }

    /// Handle one inbound frame. Returns a direct reply for PING.
    async fn handle_frame(&self, peer_id: &str, bytes: &[u8]) -> Option<Envelope> {
        let env = match Envelope::decode(bytes) {
            Ok(env) => env,
            Err(e) => {
                tracing::warn!(peer = %peer_id, "dropping malformed frame: {}", e);
                return None;
            }
        };
        match env.message {
            Message::Ping => Some(Envelope::new(self.node_id.clone(), Message::Pong)),
            Message::Pong => {
                if let Some(p) = self.peers.lock().get_mut(peer_id) {
                    p.info.last_seen = now_millis();
                }
                let _ = self
                    .events
                    .send(NetworkEvent::Heartbeat {
                        node_id: peer_id.to_string(),
                    })
                    .await;
                None
            }
            Message::Unknown => {
                tracing::warn!(
                    peer = %peer_id,
                    msg_type = env.raw_type.as_deref().unwrap_or(""),
                    "unknown message type, dropping"
                );
                None
            }
            Message::Handshake { .. } | Message::HandshakeAck { .. } => {
                tracing::debug!(peer = %peer_id, "ignoring repeated handshake");
                None
            }
            _ => {
                let _ = self
                    .events
                    .send(NetworkEvent::Inbound {
                        peer_id: peer_id.to_string(),
                        envelope: env,
                    })
                    .await;
                None
            }
        }
    }

    /// Best-effort fan-out. Returns how many peer queues accepted the message.
    pub fn broadcast(&self, message: Message) -> usize {
        let env = Envelope::new(self.node_id.clone(), message);
        let peers = self.peers.lock();
        let mut sent = 0;
        for (id, peer) in peers.iter() {
            match peer.outbound.try_send(env.clone()) {
                Ok(()) => sent += 1,
                Err(e) => tracing::debug!(peer = %id, "broadcast skipped: {}", e),
            }
        }
        sent
    }

    pub fn send_to(&self, peer_id: &str, message: Message) -> bool {
        let env = Envelope::new(self.node_id.clone(), message);
        match self.peers.lock().get(peer_id) {
            Some(peer) => peer.outbound.try_send(env).is_ok(),
            None => false,
        }
    }

    /// Liveness sweep. Missed PONGs never disconnect a peer.
    pub fn ping_all(&self) -> usize {
        self.broadcast(Message::Ping)
    }

    pub fn disconnect_peer(&self, peer_id: &str) -> bool {
        match self.peers.lock().remove(peer_id) {
            Some(peer) => {
                peer.close.notify_one();
                true
            }
            None => false,
        }
    }

    pub fn is_connected(&self, peer_id: &str) -> bool {
        self.peers.lock().contains_key(peer_id)
    }

    pub fn peer_ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.peers.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn peer_count(&self) -> usize {
        self.peers.lock().len()
    }

    pub fn stats(&self) -> NetworkStats {
        let mut peers: Vec<PeerSummary> = self.peers.lock().values().map(|p| p.info.clone()).collect();
        peers.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        NetworkStats {
            node_id: self.node_id.clone(),
            listen_addr: self.local_addr().map(|a| a.to_string()),
            peer_count: peers.len(),
            peers,
        }
    }

    /// Stop the listener and close every connection.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
        let drained: Vec<PeerConnection> = self.peers.lock().drain().map(|(_, p)| p).collect();
        for peer in drained {
            peer.close.notify_one();
        }
        tracing::info!(node = %self.node_id, "P2P network shut down");
    }
}
