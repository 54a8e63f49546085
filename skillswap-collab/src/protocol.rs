//! Wire format for document broadcasts.
//!
//! Every frame on a document topic is one JSON-encoded [`EditEvent`]:
//! ```text
//! {
//!   "documentId": "doc-1",
//!   "content":    "<full snapshot | cursor json | empty>",
//!   "version":    4,
//!   "userId":     "u-42",
//!   "userName":   "Ada",
//!   "action":     "UPDATE" | "CURSOR_MOVE" | "USER_JOIN" | "USER_LEAVE",
//!   "timestamp":  1700000000000
//! }
//! ```
//!
//! `UPDATE` always carries the whole document. `CURSOR_MOVE` reuses the
//! `content` field for a JSON `{index, length}` selection; use
//! [`EditEvent::cursor_range`] rather than reading it directly.

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// What an [`EditEvent`] announces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EditAction {
    /// Full-document snapshot
    Update,
    /// Caret/selection position (content holds a [`CursorRange`])
    CursorMove,
    /// Participant opened the document
    UserJoin,
    /// Participant closed the document
    UserLeave,
}

impl EditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Update => "UPDATE",
            Self::CursorMove => "CURSOR_MOVE",
            Self::UserJoin => "USER_JOIN",
            Self::UserLeave => "USER_LEAVE",
        }
    }
}

/// Selection in character offsets. `length == 0` is a bare caret.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CursorRange {
    pub index: usize,
    pub length: usize,
}

impl CursorRange {
    pub fn new(index: usize, length: usize) -> Self {
        Self { index, length }
    }

    pub fn caret(index: usize) -> Self {
        Self { index, length: 0 }
    }
}

/// One broadcast unit on a document topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditEvent {
    pub document_id: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub version: u64,
    pub user_id: String,
    #[serde(default)]
    pub user_name: String,
    pub action: EditAction,
    /// Epoch milliseconds at the sender
    #[serde(default)]
    pub timestamp: i64,
}

impl EditEvent {
    /// Full-snapshot update.
    pub fn update(
        document_id: impl Into<String>,
        user_id: impl Into<String>,
        user_name: impl Into<String>,
        content: impl Into<String>,
        version: u64,
    ) -> Self {
        Self {
            document_id: document_id.into(),
            content: content.into(),
            version,
            user_id: user_id.into(),
            user_name: user_name.into(),
            action: EditAction::Update,
            timestamp: now_millis(),
        }
    }

    /// Cursor move. The range is JSON-encoded into `content`.
    pub fn cursor_move(
        document_id: impl Into<String>,
        user_id: impl Into<String>,
        user_name: impl Into<String>,
        range: CursorRange,
        version: u64,
    ) -> Result<Self, ProtocolError> {
        let content = serde_json::to_string(&range).map_err(ProtocolError::Serialization)?;
        Ok(Self {
            document_id: document_id.into(),
            content,
            version,
            user_id: user_id.into(),
            user_name: user_name.into(),
            action: EditAction::CursorMove,
            timestamp: now_millis(),
        })
    }

    pub fn user_join(
        document_id: impl Into<String>,
        user_id: impl Into<String>,
        user_name: impl Into<String>,
    ) -> Self {
        Self::presence(document_id, user_id, user_name, EditAction::UserJoin)
    }

    pub fn user_leave(
        document_id: impl Into<String>,
        user_id: impl Into<String>,
        user_name: impl Into<String>,
    ) -> Self {
        Self::presence(document_id, user_id, user_name, EditAction::UserLeave)
    }

    fn presence(
        document_id: impl Into<String>,
        user_id: impl Into<String>,
        user_name: impl Into<String>,
        action: EditAction,
    ) -> Self {
        Self {
            document_id: document_id.into(),
            content: String::new(),
            version: 0,
            user_id: user_id.into(),
            user_name: user_name.into(),
            action,
            timestamp: now_millis(),
        }
    }

    /// Decode the selection carried by a `CURSOR_MOVE`.
    pub fn cursor_range(&self) -> Result<CursorRange, ProtocolError> {
        if self.action != EditAction::CursorMove {
            return Err(ProtocolError::InvalidAction {
                expected: EditAction::CursorMove.as_str(),
                actual: self.action.as_str(),
            });
        }
        serde_json::from_str(&self.content).map_err(ProtocolError::MalformedCursor)
    }

    /// Serialize to a JSON text frame.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Serialization)
    }

    /// Parse a JSON text frame.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(ProtocolError::Deserialization)
    }
}

pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
