//! Collaboratively edited documents and the local view of one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::protocol::EditEvent;

/// A text artifact bound 1:1 to a learning session, as the store sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub document_id: String,
    pub session_id: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub size_in_bytes: u64,
    #[serde(default = "default_active")]
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Document {
    /// Fresh, empty document for `session_id`.
    pub fn new(document_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            document_id: document_id.into(),
            session_id: session_id.into(),
            content: String::new(),
            version: 0,
            size_in_bytes: 0,
            active: true,
            created_at: now,
            updated_at: now,
            expires_at: None,
        }
    }

    /// Replace the content, keeping `size_in_bytes` and `updated_at` in step.
    pub fn set_content(&mut self, content: impl Into<String>, version: u64) {
        self.content = content.into();
        self.size_in_bytes = self.content.len() as u64;
        self.version = version;
        self.updated_at = Utc::now();
    }
}

fn default_active() -> bool {
    true
}

/// What the local editor currently shows and which version it is at.
///
/// All mutation goes through [`apply_local_edit`](Self::apply_local_edit),
/// [`commit_broadcast`](Self::commit_broadcast) and
/// [`apply_remote_edit`](Self::apply_remote_edit).
#[derive(Debug, Clone)]
pub struct DocumentState {
    document_id: String,
    content: String,
    /// Document version; bumped once per broadcast, adopted from remotes.
    version: u64,
    /// Local edit counter; bumped on every local edit.
    revision: u64,
    /// Snapshot last sent or received over the wire.
    last_broadcast: String,
}

impl DocumentState {
    pub fn load(document: &Document) -> Self {
        Self {
            document_id: document.document_id.clone(),
            content: document.content.clone(),
            version: document.version,
            revision: 0,
            last_broadcast: document.content.clone(),
        }
    }

    /// Optimistically take a local edit. Returns the new revision.
    pub fn apply_local_edit(&mut self, content: impl Into<String>) -> u64 {
        self.content = content.into();
        self.revision += 1;
        self.revision
    }

    /// Whether the current content differs from what was last on the wire.
    pub fn has_unbroadcast_changes(&self) -> bool {
        self.content != self.last_broadcast
    }

    /// Bump the version for an outgoing snapshot and remember it as sent.
    ///
    /// Returns `None` when there is nothing new to send.
    pub fn commit_broadcast(&mut self) -> Option<(String, u64)> {
        if !self.has_unbroadcast_changes() {
            return None;
        }
        self.version += 1;
        self.last_broadcast.clone_from(&self.content);
        Some((self.content.clone(), self.version))
    }

    /// Last write wins: the remote snapshot replaces local content.
    ///
    /// The remote version is only adopted when it is ahead, so the local
    /// version never decreases.
    pub fn apply_remote_edit(&mut self, event: &EditEvent) {
        self.content.clone_from(&event.content);
        self.last_broadcast.clone_from(&event.content);
        self.version = self.version.max(event.version);
    }

    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loaded(content: &str, version: u64) -> DocumentState {
        let mut doc = Document::new("doc-1", "session-1");
        doc.set_content(content, version);
        DocumentState::load(&doc)
    }

    #[test]
    fn test_load_seeds_state() {
        let state = loaded("Hello", 3);
        assert_eq!(state.document_id(), "doc-1");
        assert_eq!(state.content(), "Hello");
        assert_eq!(state.version(), 3);
        assert!(!state.has_unbroadcast_changes());
    }

    #[test]
    fn test_local_edit_revision_strictly_increases() {
        let mut state = loaded("", 0);
        let mut previous = state.revision();
        for text in ["a", "ab", "ab", "a"] {
            let revision = state.apply_local_edit(text);
            assert!(revision > previous);
            previous = revision;
        }
        assert_eq!(state.content(), "a");
    }

    #[test]
    fn test_commit_broadcast_bumps_version_once() {
        let mut state = loaded("Hello", 3);
        state.apply_local_edit("Hello!");
        state.apply_local_edit("Hello!!");
        assert_eq!(state.commit_broadcast(), Some(("Hello!!".to_string(), 4)));
        assert_eq!(state.version(), 4);
        assert_eq!(state.commit_broadcast(), None);
    }

    #[test]
    fn test_undone_edit_commits_nothing() {
        let mut state = loaded("Hello", 3);
        state.apply_local_edit("Hello!");
        state.apply_local_edit("Hello");
        assert_eq!(state.commit_broadcast(), None);
        assert_eq!(state.version(), 3);
    }

    #[test]
    fn test_remote_edit_overwrites() {
        let mut state = loaded("Hello", 3);
        let event = EditEvent::update("doc-1", "other", "Bo", "Hello World", 4);
        state.apply_remote_edit(&event);
        assert_eq!(state.content(), "Hello World");
        assert_eq!(state.version(), 4);
    }

    #[test]
    fn test_remote_edit_with_stale_version_still_wins_content() {
        let mut state = loaded("Hello", 9);
        let event = EditEvent::update("doc-1", "other", "Bo", "Older", 2);
        state.apply_remote_edit(&event);
        assert_eq!(state.content(), "Older");
        assert_eq!(state.version(), 9);
    }

    #[test]
    fn test_document_serde_camel_case() {
        let mut doc = Document::new("doc-1", "s-1");
        doc.set_content("abc", 2);
        let value = serde_json::to_value(&doc).unwrap();
        assert_eq!(value["documentId"], "doc-1");
        assert_eq!(value["sizeInBytes"], 3);
        assert!(value["createdAt"].is_string());
        assert!(value["expiresAt"].is_null());
    }
}
