//! Error types for the sync core and its external collaborators.

use thiserror::Error;

/// Top-level error surfaced to whoever hosts a collaborative editor.
///
/// Only [`SyncError::Load`] is expected to reach a user in steady state;
/// everything else is logged and contained by the editor loop.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Failed to load document for session '{session_id}': {source}")]
    Load {
        session_id: String,
        #[source]
        source: StoreError,
    },

    #[error("Document store error: {0}")]
    Store(#[from] StoreError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),

    #[error("Configuration error: {0}")]
    Config(#[from] envy::Error),

    #[error("Editor has already shut down")]
    Closed,
}

/// Wire encoding/decoding failures.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Serialization error: {0}")]
    Serialization(#[source] serde_json::Error),

    #[error("Deserialization error: {0}")]
    Deserialization(#[source] serde_json::Error),

    #[error("Expected a {expected} event, got {actual}")]
    InvalidAction {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Malformed cursor payload: {0}")]
    MalformedCursor(#[source] serde_json::Error),
}

/// Document store failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Server returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Unexpected response: {0}")]
    Envelope(#[from] EnvelopeError),

    #[error("Document not found: {0}")]
    NotFound(String),

    #[error("Document {0} is no longer active")]
    Inactive(String),
}

/// Response bodies that do not match the normalised envelope.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("Body is not valid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),

    #[error("Expected an envelope object, got {0}")]
    NotAnEnvelope(&'static str),

    #[error("Envelope has no 'data' field")]
    MissingData,

    #[error("Request rejected by server: {0}")]
    Rejected(String),

    #[error("Envelope data has an unexpected shape: {0}")]
    DataShape(#[source] serde_json::Error),
}

/// Identity resolution failures.
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("No credential available")]
    MissingToken,

    #[error("Token is not a JWT")]
    MalformedToken,

    #[error("Token claims could not be decoded: {0}")]
    InvalidClaims(String),

    #[error("Token claims carry no user id")]
    MissingUserId,
}
