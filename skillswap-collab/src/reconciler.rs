//! Applies inbound broadcasts to local state.
//!
//! Two loops have to be broken here:
//!
//! 1. The relay fans every frame back out to its sender, so events carrying
//!    the local user id are dropped before anything else happens.
//! 2. Replacing the editor content makes the editor report a change of its
//!    own. [`EditorView`] keeps local change capture disarmed for a short
//!    settle window after each remote update so that echo is not re-sent.
//!
//! Updates are last-write-wins at full-document granularity. Two users
//! editing inside the same debounce window race, and whichever snapshot the
//! relay delivers last silently replaces the other.

use std::time::Duration;

use tokio::time::Instant;

use crate::document::DocumentState;
use crate::presence::PresenceTracker;
use crate::protocol::{CursorRange, EditAction, EditEvent};

// ───────────────────────────────────────────────────────────────────
// Editor view model
// ───────────────────────────────────────────────────────────────────

/// Caret/selection of the local editor plus the change-detection guard.
#[derive(Debug, Clone, Default)]
pub struct EditorView {
    selection: CursorRange,
    suppressed_until: Option<Instant>,
}

impl EditorView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn selection(&self) -> CursorRange {
        self.selection
    }

    pub fn set_selection(&mut self, range: CursorRange) {
        self.selection = range;
    }

    /// Disarm local change capture until `now + settle`.
    pub fn suppress(&mut self, now: Instant, settle: Duration) {
        self.suppressed_until = Some(now + settle);
    }

    /// Local changes reported while this is set are editor echo.
    pub fn is_suppressed(&self) -> bool {
        self.suppressed_until.is_some()
    }

    pub fn settle_deadline(&self) -> Option<Instant> {
        self.suppressed_until
    }

    /// Re-arm change capture once the settle window has passed.
    pub fn settle(&mut self, now: Instant) -> bool {
        match self.suppressed_until {
            Some(deadline) if now >= deadline => {
                self.suppressed_until = None;
                true
            }
            _ => false,
        }
    }

    /// Keep the caret at the same character offset in `content`, clamped to
    /// the nearest valid position. The selection is clamped the same way.
    pub fn restore_caret(&mut self, content: &str) {
        let len = content.chars().count();
        let index = self.selection.index.min(len);
        let length = self.selection.length.min(len - index);
        self.selection = CursorRange::new(index, length);
    }

    /// Drop the guard without waiting for the settle window.
    pub fn reset(&mut self) {
        self.suppressed_until = None;
    }
}

// ───────────────────────────────────────────────────────────────────
// Reconciler
// ───────────────────────────────────────────────────────────────────

/// What applying an inbound event did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciled {
    /// Our own broadcast came back; nothing changed.
    SelfEcho,
    /// Event addressed to another document; ignored.
    ForeignDocument,
    /// Local content was replaced by a remote snapshot.
    ContentReplaced { user_id: String, version: u64 },
    /// A remote cursor moved. `created` when the user was unknown.
    CursorMoved { user_id: String, created: bool },
    /// A cursor payload could not be decoded and was skipped.
    CursorSkipped { user_id: String },
    /// A participant joined. `new` is false for repeated joins.
    Joined { user_id: String, new: bool },
    /// A participant left. `known` is false if they were not on the roster.
    Left { user_id: String, known: bool },
}

#[derive(Debug, Clone)]
pub struct Reconciler {
    local_user_id: String,
    settle_delay: Duration,
}

impl Reconciler {
    pub fn new(local_user_id: impl Into<String>, settle_delay: Duration) -> Self {
        Self {
            local_user_id: local_user_id.into(),
            settle_delay,
        }
    }

    pub fn local_user_id(&self) -> &str {
        &self.local_user_id
    }

    /// Apply one inbound event.
    pub fn apply(
        &self,
        event: &EditEvent,
        state: &mut DocumentState,
        view: &mut EditorView,
        presence: &mut PresenceTracker,
        now: Instant,
    ) -> Reconciled {
        if event.user_id == self.local_user_id {
            return Reconciled::SelfEcho;
        }
        if event.document_id != state.document_id() {
            log::debug!(
                "Ignoring event for document {} while editing {}",
                event.document_id,
                state.document_id()
            );
            return Reconciled::ForeignDocument;
        }

        match event.action {
            EditAction::Update => {
                view.suppress(now, self.settle_delay);
                state.apply_remote_edit(event);
                view.restore_caret(state.content());
                Reconciled::ContentReplaced {
                    user_id: event.user_id.clone(),
                    version: state.version(),
                }
            }

            EditAction::CursorMove => match event.cursor_range() {
                Ok(range) => {
                    let created = presence.move_cursor(&event.user_id, &event.user_name, range, now);
                    Reconciled::CursorMoved {
                        user_id: event.user_id.clone(),
                        created,
                    }
                }
                Err(e) => {
                    log::warn!("Skipping cursor update from {}: {e}", event.user_id);
                    Reconciled::CursorSkipped {
                        user_id: event.user_id.clone(),
                    }
                }
            },

            EditAction::UserJoin => {
                let new = presence.join(&event.user_id, &event.user_name);
                if new {
                    log::info!("{} ({}) joined {}", event.user_name, event.user_id, event.document_id);
                }
                Reconciled::Joined {
                    user_id: event.user_id.clone(),
                    new,
                }
            }

            EditAction::UserLeave => {
                let known = presence.leave(&event.user_id).is_some();
                if known {
                    log::info!("{} ({}) left {}", event.user_name, event.user_id, event.document_id);
                }
                Reconciled::Left {
                    user_id: event.user_id.clone(),
                    known,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Document;

    const SETTLE: Duration = Duration::from_millis(50);
    const TTL: Duration = Duration::from_secs(5);

    struct Fixture {
        reconciler: Reconciler,
        state: DocumentState,
        view: EditorView,
        presence: PresenceTracker,
    }

    impl Fixture {
        fn new(content: &str, version: u64) -> Self {
            let mut doc = Document::new("doc-1", "session-1");
            doc.set_content(content, version);
            Self {
                reconciler: Reconciler::new("me", SETTLE),
                state: DocumentState::load(&doc),
                view: EditorView::new(),
                presence: PresenceTracker::new(TTL),
            }
        }

        fn apply(&mut self, event: &EditEvent, now: Instant) -> Reconciled {
            self.reconciler
                .apply(event, &mut self.state, &mut self.view, &mut self.presence, now)
        }
    }

    #[test]
    fn test_self_echo_leaves_state_untouched() {
        let mut fx = Fixture::new("Hello", 3);
        let now = Instant::now();
        for event in [
            EditEvent::update("doc-1", "me", "Me", "Overwritten", 99),
            EditEvent::cursor_move("doc-1", "me", "Me", CursorRange::caret(1), 3).unwrap(),
            EditEvent::user_join("doc-1", "me", "Me"),
            EditEvent::user_leave("doc-1", "me", "Me"),
        ] {
            assert_eq!(fx.apply(&event, now), Reconciled::SelfEcho);
        }
        assert_eq!(fx.state.content(), "Hello");
        assert_eq!(fx.state.version(), 3);
        assert!(fx.presence.is_empty());
        assert!(!fx.view.is_suppressed());
    }

    #[test]
    fn test_remote_update_scenario() {
        let mut fx = Fixture::new("Hello", 3);
        let event = EditEvent::update("doc-1", "other", "Bo", "Hello World", 4);
        let outcome = fx.apply(&event, Instant::now());
        assert_eq!(
            outcome,
            Reconciled::ContentReplaced {
                user_id: "other".into(),
                version: 4
            }
        );
        assert_eq!(fx.state.content(), "Hello World");
        assert_eq!(fx.state.version(), 4);
    }

    #[test]
    fn test_last_write_wins() {
        let mut fx = Fixture::new("", 0);
        let now = Instant::now();
        fx.apply(&EditEvent::update("doc-1", "a", "A", "from A", 5), now);
        fx.apply(&EditEvent::update("doc-1", "b", "B", "from B", 5), now);
        assert_eq!(fx.state.content(), "from B");
    }

    #[test]
    fn test_update_arms_and_settles_suppression() {
        let mut fx = Fixture::new("Hello", 1);
        let now = Instant::now();
        fx.apply(&EditEvent::update("doc-1", "other", "Bo", "Hi", 2), now);
        assert!(fx.view.is_suppressed());
        assert_eq!(fx.view.settle_deadline(), Some(now + SETTLE));

        assert!(!fx.view.settle(now + Duration::from_millis(10)));
        assert!(fx.view.settle(now + SETTLE));
        assert!(!fx.view.is_suppressed());
    }

    #[test]
    fn test_caret_restored_and_clamped() {
        let mut fx = Fixture::new("Hello World", 1);
        fx.view.set_selection(CursorRange::new(6, 5));
        fx.apply(
            &EditEvent::update("doc-1", "other", "Bo", "Hello Wor", 2),
            Instant::now(),
        );
        assert_eq!(fx.view.selection(), CursorRange::new(6, 3));

        fx.apply(
            &EditEvent::update("doc-1", "other", "Bo", "Hi", 3),
            Instant::now(),
        );
        assert_eq!(fx.view.selection(), CursorRange::new(2, 0));
    }

    #[test]
    fn test_caret_counts_characters() {
        let mut fx = Fixture::new("héllo", 1);
        fx.view.set_selection(CursorRange::caret(5));
        fx.apply(
            &EditEvent::update("doc-1", "other", "Bo", "ñandú", 2),
            Instant::now(),
        );
        assert_eq!(fx.view.selection(), CursorRange::caret(5));
    }

    #[test]
    fn test_cursor_then_leave_scenario() {
        let mut fx = Fixture::new("Hello", 1);
        let now = Instant::now();
        let cursor = EditEvent::cursor_move("doc-1", "new", "Nia", CursorRange::new(2, 1), 1).unwrap();
        assert_eq!(
            fx.apply(&cursor, now),
            Reconciled::CursorMoved {
                user_id: "new".into(),
                created: true
            }
        );
        assert!(fx.presence.has_indicator("new"));

        let leave = EditEvent::user_leave("doc-1", "new", "Nia");
        assert_eq!(
            fx.apply(&leave, now),
            Reconciled::Left {
                user_id: "new".into(),
                known: true
            }
        );
        assert!(fx.presence.collaborator("new").is_none());
        assert!(fx.presence.cursors().is_empty());
    }

    #[test]
    fn test_malformed_cursor_skipped() {
        let mut fx = Fixture::new("Hello", 1);
        let mut cursor =
            EditEvent::cursor_move("doc-1", "other", "Bo", CursorRange::caret(0), 1).unwrap();
        cursor.content = "{broken".into();
        assert_eq!(
            fx.apply(&cursor, Instant::now()),
            Reconciled::CursorSkipped {
                user_id: "other".into()
            }
        );
        assert!(fx.presence.is_empty());
        assert_eq!(fx.state.content(), "Hello");
    }

    #[test]
    fn test_join_dedup_by_user_id() {
        let mut fx = Fixture::new("", 0);
        let now = Instant::now();
        let join = EditEvent::user_join("doc-1", "other", "Bo");
        assert_eq!(
            fx.apply(&join, now),
            Reconciled::Joined {
                user_id: "other".into(),
                new: true
            }
        );
        assert_eq!(
            fx.apply(&join, now),
            Reconciled::Joined {
                user_id: "other".into(),
                new: false
            }
        );
        assert_eq!(fx.presence.len(), 1);
    }

    #[test]
    fn test_foreign_document_ignored() {
        let mut fx = Fixture::new("Hello", 1);
        let event = EditEvent::update("doc-2", "other", "Bo", "Elsewhere", 7);
        assert_eq!(fx.apply(&event, Instant::now()), Reconciled::ForeignDocument);
        assert_eq!(fx.state.content(), "Hello");
    }
}
