//! Async driver for one collaborative editor.
//!
//! A single task owns the [`CollabSession`] and interleaves three inputs
//! through one `select!`: commands from the host, transport events, and the
//! session's next timer deadline. No state is shared with other tasks, so
//! local and remote edits are never applied concurrently.
//!
//! ```text
//! EditorHandle ──commands──▶ ┌──────────────┐ ──publish──▶ Transport
//!                            │  editor task │ ◀─events──── Subscription
//! EditorHandle ◀──events──── └──────────────┘ ──persist──▶ DocumentStore
//! ```
//!
//! Only loading the document can fail from the host's point of view; all
//! later failures are logged and the session degrades silently.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::CollabConfig;
use crate::error::SyncError;
use crate::identity::{resolve_local_identity, IdentityProvider, UserIdentity};
use crate::presence::CursorView;
use crate::protocol::{CursorRange, EditAction, EditEvent};
use crate::reconciler::Reconciled;
use crate::session::CollabSession;
use crate::store::DocumentStore;
use crate::transport::{ConnectionState, Subscription, Transport, TransportEvent};

const CHANNEL_CAPACITY: usize = 256;

/// Input from whoever hosts the editor.
#[derive(Debug, Clone)]
pub enum EditorCommand {
    /// The editor now shows this full text.
    Edit(String),
    /// Local caret/selection moved.
    MoveCursor(CursorRange),
    /// Leave the document.
    Close,
    /// Leave the document and deactivate it (learning session over).
    EndSession,
}

/// Output towards the host.
#[derive(Debug, Clone, PartialEq)]
pub enum EditorEvent {
    Ready {
        document_id: String,
        content: String,
        version: u64,
    },
    ContentReplaced {
        content: String,
        version: u64,
        by: String,
    },
    RosterChanged(Vec<String>),
    CursorsChanged(Vec<CursorView>),
    Published {
        action: EditAction,
        version: u64,
    },
    Connection(ConnectionState),
    Closed,
}

/// A loaded document bound to its transport subscription, not yet running.
pub struct CollabEditor {
    session: CollabSession,
    session_id: String,
    store: Arc<dyn DocumentStore>,
    transport: Transport,
    subscription: Subscription,
}

impl CollabEditor {
    /// Load (or lazily create) the session's document and subscribe to it.
    ///
    /// A load failure is returned as [`SyncError::Load`] and not retried.
    pub async fn open(
        config: &CollabConfig,
        store: Arc<dyn DocumentStore>,
        transport: Transport,
        identity: &dyn IdentityProvider,
        session_id: &str,
    ) -> Result<Self, SyncError> {
        let user = resolve_local_identity(identity);
        Self::open_as(config, store, transport, user, session_id).await
    }

    /// Same as [`open`](Self::open) with an already resolved identity.
    pub async fn open_as(
        config: &CollabConfig,
        store: Arc<dyn DocumentStore>,
        transport: Transport,
        user: UserIdentity,
        session_id: &str,
    ) -> Result<Self, SyncError> {
        let document = store
            .get_or_create_document(session_id)
            .await
            .map_err(|source| {
                log::error!("Failed to load document for session {session_id}: {source}");
                SyncError::Load {
                    session_id: session_id.to_string(),
                    source,
                }
            })?;

        log::info!(
            "Opened document {} (version {}, {} bytes) as {}",
            document.document_id,
            document.version,
            document.size_in_bytes,
            user.user_id
        );

        let subscription = transport.connect(&document.document_id).await;
        Ok(Self {
            session: CollabSession::new(user, &document, config),
            session_id: session_id.to_string(),
            store,
            transport,
            subscription,
        })
    }

    pub fn document_id(&self) -> &str {
        self.session.document_id()
    }

    pub fn content(&self) -> &str {
        self.session.content()
    }

    pub fn version(&self) -> u64 {
        self.session.version()
    }

    pub fn identity(&self) -> &UserIdentity {
        self.session.identity()
    }

    /// Start the event loop on its own task.
    pub fn spawn(self) -> EditorHandle {
        let (command_tx, command_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let document_id = self.session.document_id().to_string();

        let CollabEditor {
            session,
            session_id,
            store,
            transport,
            subscription,
        } = self;

        let worker = EditorLoop {
            session,
            session_id,
            store,
            transport,
            events: event_tx,
        };
        let task = tokio::spawn(worker.run(command_rx, subscription));

        EditorHandle {
            document_id,
            commands: command_tx,
            events: event_rx,
            task,
        }
    }
}

/// Host side of a running editor.
pub struct EditorHandle {
    document_id: String,
    commands: mpsc::Sender<EditorCommand>,
    events: mpsc::Receiver<EditorEvent>,
    task: JoinHandle<()>,
}

impl EditorHandle {
    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    pub async fn edit(&self, content: impl Into<String>) -> Result<(), SyncError> {
        self.send(EditorCommand::Edit(content.into())).await
    }

    pub async fn move_cursor(&self, index: usize, length: usize) -> Result<(), SyncError> {
        self.send(EditorCommand::MoveCursor(CursorRange::new(index, length)))
            .await
    }

    /// Next event from the editor, `None` once it has shut down.
    pub async fn next_event(&mut self) -> Option<EditorEvent> {
        self.events.recv().await
    }

    /// Leave the document and wait for teardown to finish.
    pub async fn close(self) {
        self.shutdown(EditorCommand::Close).await;
    }

    /// Leave and deactivate the document, then wait for teardown.
    pub async fn end_session(self) {
        self.shutdown(EditorCommand::EndSession).await;
    }

    async fn shutdown(self, command: EditorCommand) {
        let _ = self.commands.send(command).await;
        if let Err(e) = self.task.await {
            log::error!("Editor task for {} failed: {e}", self.document_id);
        }
    }

    async fn send(&self, command: EditorCommand) -> Result<(), SyncError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| SyncError::Closed)
    }
}

struct EditorLoop {
    session: CollabSession,
    session_id: String,
    store: Arc<dyn DocumentStore>,
    transport: Transport,
    events: mpsc::Sender<EditorEvent>,
}

impl EditorLoop {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<EditorCommand>,
        mut subscription: Subscription,
    ) {
        self.emit(EditorEvent::Ready {
            document_id: self.session.document_id().to_string(),
            content: self.session.content().to_string(),
            version: self.session.version(),
        });

        // A shared connection may already be up and will not report it again.
        // Joins are idempotent, so a second announcement is harmless.
        if subscription.state() == ConnectionState::Subscribed {
            self.announce().await;
        }

        loop {
            let deadline = self.session.next_deadline();
            tokio::select! {
                command = commands.recv() => match command {
                    Some(EditorCommand::Edit(content)) => {
                        self.session.local_edit(content, Instant::now());
                    }
                    Some(EditorCommand::MoveCursor(range)) => match self.session.local_cursor(range) {
                        Ok(event) => {
                            self.transport.publish(&event).await;
                        }
                        Err(e) => log::warn!("Could not encode cursor move: {e}"),
                    },
                    Some(EditorCommand::Close) | None => {
                        self.teardown(false).await;
                        break;
                    }
                    Some(EditorCommand::EndSession) => {
                        self.teardown(true).await;
                        break;
                    }
                },

                transport_event = subscription.recv() => match transport_event {
                    Some(TransportEvent::Subscribed) => self.announce().await,
                    Some(TransportEvent::Disconnected(reason)) => {
                        log::warn!("Editor for {} lost its connection: {reason}", self.session.document_id());
                        self.emit(EditorEvent::Connection(ConnectionState::Disconnected));
                    }
                    Some(TransportEvent::Event(event)) => self.on_remote(event),
                    None => {
                        log::warn!("Transport for {} went away", self.session.document_id());
                        self.teardown(false).await;
                        break;
                    }
                },

                _ = sleep_until_deadline(deadline) => self.on_timers(Instant::now()).await,
            }
        }
    }

    async fn announce(&mut self) {
        let join = self.session.join_event();
        self.transport.publish(&join).await;
        self.emit(EditorEvent::Connection(ConnectionState::Subscribed));
    }

    fn on_remote(&mut self, event: EditEvent) {
        match self.session.on_remote(&event, Instant::now()) {
            Reconciled::ContentReplaced { user_id, version } => {
                self.emit(EditorEvent::ContentReplaced {
                    content: self.session.content().to_string(),
                    version,
                    by: user_id,
                });
            }
            Reconciled::CursorMoved { created, .. } => {
                if created {
                    self.emit(EditorEvent::RosterChanged(self.session.presence().roster()));
                }
                self.emit(EditorEvent::CursorsChanged(self.session.presence().cursors()));
            }
            Reconciled::Joined { new: true, .. } => {
                self.emit(EditorEvent::RosterChanged(self.session.presence().roster()));
            }
            Reconciled::Left { known: true, .. } => {
                self.emit(EditorEvent::RosterChanged(self.session.presence().roster()));
                self.emit(EditorEvent::CursorsChanged(self.session.presence().cursors()));
            }
            Reconciled::SelfEcho
            | Reconciled::ForeignDocument
            | Reconciled::CursorSkipped { .. }
            | Reconciled::Joined { .. }
            | Reconciled::Left { .. } => {}
        }
    }

    async fn on_timers(&mut self, now: Instant) {
        let output = self.session.poll_timers(now);

        if let Some(update) = output.update {
            if self.transport.publish(&update).await {
                self.emit(EditorEvent::Published {
                    action: update.action,
                    version: update.version,
                });
            }
            self.persist(update);
        }

        if !output.decayed.is_empty() {
            // Cursor-only collaborators vanish together with their indicator.
            self.emit(EditorEvent::CursorsChanged(self.session.presence().cursors()));
            self.emit(EditorEvent::RosterChanged(self.session.presence().roster()));
        }
    }

    /// Best-effort save of a broadcast snapshot; never blocks the loop.
    fn persist(&self, update: EditEvent) {
        let store = self.store.clone();
        tokio::spawn(async move {
            if let Err(e) = store
                .update_document(&update.document_id, &update.content, update.version)
                .await
            {
                log::warn!(
                    "Failed to persist {} version {}: {e}",
                    update.document_id,
                    update.version
                );
            }
        });
    }

    async fn teardown(&mut self, end_session: bool) {
        let document_id = self.session.document_id().to_string();
        let leave = self.session.leave_event();
        self.transport.publish(&leave).await;
        self.transport.disconnect(&document_id).await;

        if end_session {
            match self.store.deactivate_document(&self.session_id).await {
                Ok(()) => log::info!("Session {} ended", self.session_id),
                Err(e) => log::warn!("Failed to deactivate {document_id}: {e}"),
            }
        }

        log::info!("Closed editor for {document_id}");
        self.emit(EditorEvent::Closed);
    }

    fn emit(&self, event: EditorEvent) {
        if let Err(e) = self.events.try_send(event) {
            log::debug!("Editor event dropped: {e}");
        }
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
