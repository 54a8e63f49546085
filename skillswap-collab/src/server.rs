//! WebSocket relay with topic-per-document routing.
//!
//! ```text
//! ws://host/doc-1 ──┐
//!                   ├── RelayRoom("doc-1") ──▶ every subscriber, sender included
//! ws://host/doc-1 ──┘        │
//!                            └── roster (USER_JOIN / USER_LEAVE)
//! ```
//!
//! The URL path is the topic. The relay holds no document state: frames are
//! validated as edit events and fanned out verbatim. On connect the current
//! roster is replayed as `USER_JOIN` frames, and a connection that drops
//! without leaving gets a synthesised `USER_LEAVE`.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::broadcast::{RelayRoom, RoomManager};
use crate::config::RelayConfig;
use crate::protocol::{EditAction, EditEvent};

type ConnectionResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Relay-wide counters.
#[derive(Debug, Clone, Default)]
pub struct RelayStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub rejected_connections: u64,
    pub total_frames: u64,
    pub invalid_frames: u64,
    pub active_rooms: usize,
}

#[derive(Default)]
struct AtomicRelayStats {
    total_connections: AtomicU64,
    active_connections: AtomicU64,
    rejected_connections: AtomicU64,
    total_frames: AtomicU64,
    invalid_frames: AtomicU64,
}

/// The relay server. Cheap to clone; clones share rooms and stats.
#[derive(Clone)]
pub struct RelayServer {
    config: RelayConfig,
    rooms: Arc<RoomManager>,
    stats: Arc<AtomicRelayStats>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl RelayServer {
    pub fn new(config: RelayConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            rooms: Arc::new(RoomManager::new(config.broadcast_capacity)),
            config,
            stats: Arc::new(AtomicRelayStats::default()),
            shutdown: Arc::new(shutdown),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(RelayConfig::default())
    }

    /// Bind the configured address without accepting yet.
    pub async fn bind(&self) -> std::io::Result<TcpListener> {
        TcpListener::bind(&self.config.bind_addr).await
    }

    /// Bind and serve until [`shutdown`](Self::shutdown).
    pub async fn run(&self) -> std::io::Result<()> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Accept connections on an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> std::io::Result<()> {
        log::info!("Relay listening on {}", listener.local_addr()?);
        let mut shutdown = self.shutdown.subscribe();
        if *shutdown.borrow() {
            return Ok(());
        }

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, addr) = accepted?;
                    log::debug!("New TCP connection from {addr}");
                    let server = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = server.handle_connection(stream, addr).await {
                            log::error!("Connection error from {addr}: {e}");
                        }
                    });
                }
                _ = shutdown.changed() => {
                    log::info!("Relay shutting down");
                    return Ok(());
                }
            }
        }
    }

    /// Stop accepting and close every open connection.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    async fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) -> ConnectionResult {
        let mut path = String::new();
        let capture_path = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
            path = request.uri().path().to_string();
            Ok(response)
        };
        let ws_stream = tokio_tungstenite::accept_hdr_async(stream, capture_path).await?;
        let (mut ws_sender, ws_receiver) = ws_stream.split();

        let Some(topic) = topic_from_path(&path) else {
            log::warn!("Rejecting {addr}: no document id in path {path:?}");
            self.stats.rejected_connections.fetch_add(1, Ordering::Relaxed);
            ws_sender
                .send(close_frame(CloseCode::Policy, "missing document id"))
                .await?;
            return Ok(());
        };

        let connection_id = Uuid::new_v4();
        let Some((room, rx)) = self
            .rooms
            .join(&topic, connection_id, self.config.max_peers_per_room)
            .await
        else {
            log::warn!("Rejecting {addr}: document {topic} is full");
            self.stats.rejected_connections.fetch_add(1, Ordering::Relaxed);
            ws_sender
                .send(close_frame(CloseCode::Again, "document is full"))
                .await?;
            return Ok(());
        };

        self.stats.total_connections.fetch_add(1, Ordering::Relaxed);
        self.stats.active_connections.fetch_add(1, Ordering::Relaxed);
        log::info!("{addr} subscribed to {topic} as {connection_id}");

        let outcome = self
            .pump(&topic, connection_id, &room, rx, ws_sender, ws_receiver)
            .await;

        // Cleanup: synthesise a leave for users that never said goodbye
        if let Some(entry) = room.remove_peer(&connection_id).await {
            if !room.has_user(&entry.user_id).await {
                log::info!("{} dropped from {topic} without leaving", entry.user_id);
                let leave = EditEvent::user_leave(&topic, &entry.user_id, &entry.user_name);
                if let Err(e) = room.broadcast(&leave) {
                    log::error!("Failed to encode synthesised leave: {e}");
                }
            }
        }
        if self.rooms.remove_if_empty(&topic).await {
            log::info!("Room {topic} removed (empty)");
        }
        self.stats.active_connections.fetch_sub(1, Ordering::Relaxed);
        log::info!("Connection {connection_id} from {addr} closed");

        outcome
    }

    async fn pump<S, R>(
        &self,
        topic: &str,
        connection_id: Uuid,
        room: &RelayRoom,
        mut rx: tokio::sync::broadcast::Receiver<Arc<String>>,
        mut ws_sender: S,
        mut ws_receiver: R,
    ) -> ConnectionResult
    where
        S: futures_util::Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
        R: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
            + Unpin,
    {
        // Replay who is already here
        for entry in room.roster().await {
            let join = EditEvent::user_join(topic, &entry.user_id, &entry.user_name);
            ws_sender.send(Message::Text(join.encode()?.into())).await?;
        }

        let mut shutdown = self.shutdown.subscribe();
        if *shutdown.borrow() {
            return Ok(());
        }

        loop {
            tokio::select! {
                msg = ws_receiver.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        match EditEvent::decode(text.as_str()) {
                            Ok(event) if event.document_id == topic => {
                                match event.action {
                                    EditAction::UserJoin => {
                                        room.announce(connection_id, &event.user_id, &event.user_name).await;
                                        log::info!("{} joined {topic}", event.user_id);
                                    }
                                    EditAction::UserLeave => {
                                        room.retire(&connection_id, &event.user_id).await;
                                        log::info!("{} left {topic}", event.user_id);
                                    }
                                    EditAction::Update => {
                                        log::debug!("{} updated {topic} to version {}", event.user_id, event.version);
                                    }
                                    EditAction::CursorMove => {}
                                }
                                self.stats.total_frames.fetch_add(1, Ordering::Relaxed);
                                room.broadcast_raw(Arc::new(text.as_str().to_string()));
                            }
                            Ok(event) => {
                                self.stats.invalid_frames.fetch_add(1, Ordering::Relaxed);
                                log::warn!("Dropping frame for {} sent on topic {topic}", event.document_id);
                            }
                            Err(e) => {
                                self.stats.invalid_frames.fetch_add(1, Ordering::Relaxed);
                                log::warn!("Dropping invalid frame on {topic}: {e}");
                            }
                        }
                    }
                    Some(Ok(Message::Binary(_))) => {
                        self.stats.invalid_frames.fetch_add(1, Ordering::Relaxed);
                        log::warn!("Dropping binary frame on {topic}");
                    }
                    Some(Ok(Message::Close(_))) | None => return Ok(()),
                    Some(Err(e)) => {
                        log::warn!("WebSocket error on {topic}: {e}");
                        return Ok(());
                    }
                    // Pings are answered by tungstenite itself
                    Some(Ok(_)) => {}
                },

                frame = rx.recv() => match frame {
                    Ok(frame) => {
                        ws_sender.send(Message::Text(String::clone(&frame).into())).await?;
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        room.record_lag(skipped);
                        log::warn!("Connection {connection_id} lagged by {skipped} frames on {topic}");
                    }
                    Err(RecvError::Closed) => return Ok(()),
                },

                _ = shutdown.changed() => {
                    let _ = ws_sender.send(close_frame(CloseCode::Away, "relay shutting down")).await;
                    return Ok(());
                }
            }
        }
    }

    pub async fn stats(&self) -> RelayStats {
        RelayStats {
            total_connections: self.stats.total_connections.load(Ordering::Relaxed),
            active_connections: self.stats.active_connections.load(Ordering::Relaxed),
            rejected_connections: self.stats.rejected_connections.load(Ordering::Relaxed),
            total_frames: self.stats.total_frames.load(Ordering::Relaxed),
            invalid_frames: self.stats.invalid_frames.load(Ordering::Relaxed),
            active_rooms: self.rooms.room_count().await,
        }
    }

    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    pub fn rooms(&self) -> &Arc<RoomManager> {
        &self.rooms
    }
}

/// `/doc-1` → `doc-1`. Nested paths keep their inner slashes.
fn topic_from_path(path: &str) -> Option<String> {
    let topic = path.trim_matches('/');
    if topic.is_empty() {
        None
    } else {
        Some(topic.to_string())
    }
}

fn close_frame(code: CloseCode, reason: &'static str) -> Message {
    Message::Close(Some(CloseFrame {
        code,
        reason: reason.to_string().into(),
    }))
}
