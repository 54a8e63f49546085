//! Sans-IO core of one collaborative editing session.
//!
//! ```text
//! local edit ──▶ DocumentState ──▶ Debouncer ──(poll_timers)──▶ UPDATE
//! inbound    ──▶ Reconciler ──▶ DocumentState / EditorView / PresenceTracker
//! poll_timers ─▶ settle EditorView, sweep decayed cursors
//! ```
//!
//! Nothing here performs I/O or reads a clock. Callers pass `now` and send
//! whatever events come back, which keeps every timing rule testable.

use tokio::time::Instant;

use crate::config::CollabConfig;
use crate::debounce::Debouncer;
use crate::document::{Document, DocumentState};
use crate::error::ProtocolError;
use crate::identity::UserIdentity;
use crate::presence::PresenceTracker;
use crate::protocol::{CursorRange, EditEvent};
use crate::reconciler::{EditorView, Reconciled, Reconciler};

pub struct CollabSession {
    identity: UserIdentity,
    state: DocumentState,
    debounce: Debouncer,
    view: EditorView,
    reconciler: Reconciler,
    presence: PresenceTracker,
}

/// Result of one [`CollabSession::poll_timers`] pass.
#[derive(Debug, Default)]
pub struct TimerOutput {
    /// Debounced snapshot ready to publish.
    pub update: Option<EditEvent>,
    /// Local change capture was re-armed.
    pub settled: bool,
    /// Users whose cursor indicator decayed.
    pub decayed: Vec<String>,
}

impl CollabSession {
    pub fn new(identity: UserIdentity, document: &Document, config: &CollabConfig) -> Self {
        Self {
            reconciler: Reconciler::new(identity.user_id.clone(), config.settle_delay()),
            identity,
            state: DocumentState::load(document),
            debounce: Debouncer::new(config.debounce_delay()),
            view: EditorView::new(),
            presence: PresenceTracker::new(config.cursor_ttl()),
        }
    }

    /// Announcement sent whenever the topic is (re)subscribed.
    pub fn join_event(&self) -> EditEvent {
        EditEvent::user_join(
            self.state.document_id(),
            &self.identity.user_id,
            &self.identity.display_name,
        )
    }

    /// Teardown: clears every pending timer and returns the goodbye event.
    pub fn leave_event(&mut self) -> EditEvent {
        self.debounce.cancel();
        self.view.reset();
        self.presence.clear();
        EditEvent::user_leave(
            self.state.document_id(),
            &self.identity.user_id,
            &self.identity.display_name,
        )
    }

    /// The editor reported new content.
    ///
    /// Returns `false` when the change is editor echo of a remote update
    /// and was ignored: it arrived inside the settle window and carries
    /// exactly the content that update applied.
    pub fn local_edit(&mut self, content: impl Into<String>, now: Instant) -> bool {
        let content = content.into();
        self.view.settle(now);
        if self.view.is_suppressed() && content == self.state.content() {
            log::trace!("Ignoring editor echo of remote update");
            return false;
        }
        self.state.apply_local_edit(content);
        self.debounce.touch(now);
        true
    }

    /// The local caret moved. Returns the event to publish.
    pub fn local_cursor(&mut self, range: CursorRange) -> Result<EditEvent, ProtocolError> {
        self.view.set_selection(range);
        EditEvent::cursor_move(
            self.state.document_id(),
            &self.identity.user_id,
            &self.identity.display_name,
            range,
            self.state.version(),
        )
    }

    /// Apply an event received from the topic.
    pub fn on_remote(&mut self, event: &EditEvent, now: Instant) -> Reconciled {
        self.reconciler.apply(
            event,
            &mut self.state,
            &mut self.view,
            &mut self.presence,
            now,
        )
    }

    /// Earliest instant at which [`poll_timers`](Self::poll_timers) has work.
    pub fn next_deadline(&self) -> Option<Instant> {
        [
            self.debounce.deadline(),
            self.view.settle_deadline(),
            self.presence.next_expiry(),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    /// Run every timer that is due at `now`.
    pub fn poll_timers(&mut self, now: Instant) -> TimerOutput {
        let mut output = TimerOutput::default();

        if self.debounce.fire(now) {
            output.update = self.state.commit_broadcast().map(|(content, version)| {
                EditEvent::update(
                    self.state.document_id(),
                    &self.identity.user_id,
                    &self.identity.display_name,
                    content,
                    version,
                )
            });
            if output.update.is_none() {
                log::debug!("Debounce fired with no net change; nothing sent");
            }
        }

        output.settled = self.view.settle(now);
        output.decayed = self.presence.sweep(now);
        output
    }

    pub fn identity(&self) -> &UserIdentity {
        &self.identity
    }

    pub fn document_id(&self) -> &str {
        self.state.document_id()
    }

    pub fn content(&self) -> &str {
        self.state.content()
    }

    pub fn version(&self) -> u64 {
        self.state.version()
    }

    pub fn revision(&self) -> u64 {
        self.state.revision()
    }

    pub fn selection(&self) -> CursorRange {
        self.view.selection()
    }

    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    pub fn has_pending_edit(&self) -> bool {
        self.debounce.is_pending()
    }
}
