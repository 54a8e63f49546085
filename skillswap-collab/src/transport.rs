//! WebSocket transport: one persistent connection per open document.
//!
//! Provides:
//! - Topic subscription by document id (`{relay_url}/{document_id}`)
//! - Explicit `Disconnected → Connecting → Subscribed` lifecycle
//! - Fixed-delay reconnect that always re-subscribes
//! - Ping heartbeats to detect half-open sockets
//! - Fire-and-forget publish
//!
//! ```text
//!           connect ok                 socket error / close / 2 silent beats
//! Connecting ─────────▶ Subscribed ────────────────────────────────┐
//!     ▲                                                            ▼
//!     └───────────── sleep(reconnect_delay) ◀──────────────── Disconnected
//! ```
//!
//! The topic is part of the connection URL, so a successful reconnect is
//! also a resubscription. Callers never need to re-issue `connect`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;

use crate::config::CollabConfig;
use crate::protocol::EditEvent;

/// Connection lifecycle of one document topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Subscribed,
}

/// Delivered to every [`Subscription`] of a document.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Connection (re-)established and topic subscribed
    Subscribed,
    /// A frame from the topic (including our own, the relay fans out to all)
    Event(EditEvent),
    /// Connection lost; a reconnect is scheduled
    Disconnected(String),
}

/// Receiving side of a document topic.
pub struct Subscription {
    document_id: String,
    events: broadcast::Receiver<TransportEvent>,
    state: watch::Receiver<ConnectionState>,
}

impl Subscription {
    /// Next transport event, or `None` once the connection is torn down.
    pub async fn recv(&mut self) -> Option<TransportEvent> {
        loop {
            match self.events.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    log::warn!(
                        "Subscriber for {} lagged, {skipped} events skipped",
                        self.document_id
                    );
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Current connection state of the topic.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Document this subscription listens to.
    pub fn document_id(&self) -> &str {
        &self.document_id
    }
}

struct Connection {
    outgoing_tx: mpsc::Sender<String>,
    events: broadcast::Sender<TransportEvent>,
    state: watch::Receiver<ConnectionState>,
    task: JoinHandle<()>,
    /// Subscriptions handed out and not yet released by `disconnect`.
    subscribers: usize,
}

#[derive(Debug, Clone)]
struct TransportSettings {
    relay_url: String,
    reconnect_delay: Duration,
    heartbeat_interval: Duration,
    outbound_capacity: usize,
}

/// Shared handle to all document connections of this client.
#[derive(Clone)]
pub struct Transport {
    settings: Arc<TransportSettings>,
    connections: Arc<Mutex<HashMap<String, Connection>>>,
}

impl Transport {
    /// Build a transport from the relay settings in `config`.
    ///
    /// Nothing connects until [`connect`](Self::connect).
    pub fn new(config: &CollabConfig) -> Self {
        Self {
            settings: Arc::new(TransportSettings {
                relay_url: config.relay_url.trim_end_matches('/').to_string(),
                reconnect_delay: config.reconnect_delay(),
                heartbeat_interval: config.heartbeat_interval(),
                outbound_capacity: config.outbound_capacity.max(1),
            }),
            connections: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Subscribe to a document topic, opening the connection if needed.
    ///
    /// Idempotent: an open document hands out another receiver on the
    /// existing connection.
    pub async fn connect(&self, document_id: &str) -> Subscription {
        let mut connections = self.connections.lock().await;

        if let Some(conn) = connections.get_mut(document_id) {
            if !conn.task.is_finished() {
                conn.subscribers += 1;
                return Subscription {
                    document_id: document_id.to_string(),
                    events: conn.events.subscribe(),
                    state: conn.state.clone(),
                };
            }
        }

        let (outgoing_tx, outgoing_rx) = mpsc::channel(self.settings.outbound_capacity);
        let (events, events_rx) = broadcast::channel(self.settings.outbound_capacity);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);

        let task = tokio::spawn(run_connection(
            self.settings.clone(),
            document_id.to_string(),
            state_tx,
            outgoing_rx,
            events.clone(),
        ));

        connections.insert(
            document_id.to_string(),
            Connection {
                outgoing_tx,
                events,
                state: state_rx.clone(),
                task,
                subscribers: 1,
            },
        );

        Subscription {
            document_id: document_id.to_string(),
            events: events_rx,
            state: state_rx,
        }
    }

    /// Queue an event for its document topic. Fire-and-forget.
    ///
    /// Returns `false` (after logging) when the event was dropped because
    /// the topic is not subscribed or the outbound queue is full.
    pub async fn publish(&self, event: &EditEvent) -> bool {
        let connections = self.connections.lock().await;
        let Some(conn) = connections.get(&event.document_id) else {
            log::warn!(
                "Dropping {} for {}: no connection",
                event.action.as_str(),
                event.document_id
            );
            return false;
        };

        if *conn.state.borrow() != ConnectionState::Subscribed {
            log::warn!(
                "Dropping {} for {}: not subscribed",
                event.action.as_str(),
                event.document_id
            );
            return false;
        }

        let frame = match event.encode() {
            Ok(frame) => frame,
            Err(e) => {
                log::error!("Dropping {}: {e}", event.action.as_str());
                return false;
            }
        };

        match conn.outgoing_tx.try_send(frame) {
            Ok(()) => true,
            Err(e) => {
                log::warn!(
                    "Dropping {} for {}: {e}",
                    event.action.as_str(),
                    event.document_id
                );
                false
            }
        }
    }

    /// Release one subscription of a document.
    ///
    /// The connection is closed, after flushing queued frames, once its last
    /// subscriber has released it. Other subscribers keep receiving until then.
    pub async fn disconnect(&self, document_id: &str) {
        let mut connections = self.connections.lock().await;
        let Some(conn) = connections.get_mut(document_id) else {
            return;
        };
        conn.subscribers = conn.subscribers.saturating_sub(1);
        if conn.subscribers > 0 {
            log::debug!(
                "Released a subscription of {document_id}, {} remaining",
                conn.subscribers
            );
            return;
        }
        // Dropping the outbound sender lets the task drain and exit.
        connections.remove(document_id);
        log::info!("Disconnecting from {document_id}");
    }

    /// Connection state of `document_id`; `Disconnected` when it is not open.
    pub async fn state(&self, document_id: &str) -> ConnectionState {
        self.connections
            .lock()
            .await
            .get(document_id)
            .map_or(ConnectionState::Disconnected, |c| *c.state.borrow())
    }

    /// Documents with a live connection task.
    pub async fn open_documents(&self) -> Vec<String> {
        self.connections.lock().await.keys().cloned().collect()
    }

    /// Relay base URL, without a trailing slash.
    pub fn relay_url(&self) -> &str {
        &self.settings.relay_url
    }
}

/// Why a live session ended.
enum SessionEnd {
    /// Socket lost; reconnect after the delay.
    Lost(String),
    /// Transport dropped the document; stop for good.
    Shutdown,
}

async fn run_connection(
    settings: Arc<TransportSettings>,
    document_id: String,
    state: watch::Sender<ConnectionState>,
    mut outgoing_rx: mpsc::Receiver<String>,
    events: broadcast::Sender<TransportEvent>,
) {
    let url = format!("{}/{}", settings.relay_url, document_id);

    loop {
        state.send_replace(ConnectionState::Connecting);
        log::debug!("Connecting to {url}");

        let connect = tokio::time::timeout(
            settings.heartbeat_interval * 2,
            tokio_tungstenite::connect_async(url.as_str()),
        )
        .await;

        let end = match connect {
            Ok(Ok((ws_stream, _))) => {
                state.send_replace(ConnectionState::Subscribed);
                log::info!("Subscribed to {document_id}");
                let _ = events.send(TransportEvent::Subscribed);
                run_session(ws_stream, &settings, &document_id, &mut outgoing_rx, &events).await
            }
            Ok(Err(e)) => SessionEnd::Lost(format!("connect failed: {e}")),
            Err(_) => SessionEnd::Lost("connect timed out".to_string()),
        };

        state.send_replace(ConnectionState::Disconnected);
        let reason = match end {
            SessionEnd::Shutdown => {
                log::debug!("Connection task for {document_id} finished");
                return;
            }
            SessionEnd::Lost(reason) => reason,
        };

        log::warn!(
            "Connection to {document_id} lost ({reason}); retrying in {:?}",
            settings.reconnect_delay
        );
        let _ = events.send(TransportEvent::Disconnected(reason));

        let retry_at = Instant::now() + settings.reconnect_delay;
        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(retry_at) => break,
                queued = outgoing_rx.recv() => match queued {
                    Some(_) => log::warn!("Dropping frame for {document_id}: disconnected"),
                    None => return,
                },
            }
        }
    }
}

async fn run_session<S>(
    ws_stream: tokio_tungstenite::WebSocketStream<S>,
    settings: &TransportSettings,
    document_id: &str,
    outgoing_rx: &mut mpsc::Receiver<String>,
    events: &broadcast::Sender<TransportEvent>,
) -> SessionEnd
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let (mut writer, mut reader) = ws_stream.split();

    let mut heartbeat = tokio::time::interval(settings.heartbeat_interval);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    heartbeat.tick().await;
    let silence_limit = settings.heartbeat_interval * 2;
    let mut last_seen = Instant::now();

    loop {
        tokio::select! {
            outgoing = outgoing_rx.recv() => match outgoing {
                Some(frame) => {
                    if let Err(e) = writer.send(Message::Text(frame.into())).await {
                        log::warn!("Publish to {document_id} failed: {e}");
                        return SessionEnd::Lost(format!("send failed: {e}"));
                    }
                }
                None => {
                    let _ = writer.send(Message::Close(None)).await;
                    return SessionEnd::Shutdown;
                }
            },

            incoming = reader.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    last_seen = Instant::now();
                    match EditEvent::decode(text.as_str()) {
                        Ok(event) => {
                            let _ = events.send(TransportEvent::Event(event));
                        }
                        Err(e) => log::warn!("Skipping malformed frame on {document_id}: {e}"),
                    }
                }
                Some(Ok(Message::Close(_))) => {
                    return SessionEnd::Lost("closed by relay".to_string());
                }
                Some(Ok(_)) => last_seen = Instant::now(),
                Some(Err(e)) => return SessionEnd::Lost(e.to_string()),
                None => return SessionEnd::Lost("stream ended".to_string()),
            },

            _ = heartbeat.tick() => {
                if last_seen.elapsed() >= silence_limit {
                    return SessionEnd::Lost("heartbeat timeout".to_string());
                }
                if let Err(e) = writer.send(Message::Ping(Default::default())).await {
                    return SessionEnd::Lost(format!("ping failed: {e}"));
                }
            }
        }
    }
}
