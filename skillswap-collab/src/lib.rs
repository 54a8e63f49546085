//! # skillswap-collab: Real-time collaborative notes for SkillSwap sessions
//!
//! Two participants of a learning session edit one shared plain-text
//! document. Every client broadcasts debounced full snapshots over a topic
//! relay; the last snapshot received wins. There is no OT/CRDT merge.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   JSON text frames   ┌──────────────┐
//! │ CollabEditor │ ◄──────────────────► │ RelayServer  │
//! │ (per user)   │  ws://relay/{docId}  │ (fan-out)    │
//! └──────┬───────┘                      └──────┬───────┘
//!        │                                     │
//!        ▼                                     ▼
//! ┌──────────────┐                      ┌──────────────┐
//! │ CollabSession│                      │  RelayRoom   │
//! │ (sans-IO)    │                      │ per document │
//! └──────┬───────┘                      └──────────────┘
//!        │ REST
//!        ▼
//! ┌──────────────┐
//! │DocumentStore │
//! └──────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: `EditEvent` wire format
//! - [`transport`]: reconnecting WebSocket subscription per document
//! - [`document`]: persisted document and local sync state
//! - [`debounce`]: trailing-edge edit debouncer
//! - [`reconciler`]: applies inbound events to document, view and presence
//! - [`presence`]: collaborator roster and decaying cursors
//! - [`session`]: sans-IO core tying the above together
//! - [`editor`]: async driver and host handle
//! - [`store`]: document persistence (REST and in-memory)
//! - [`identity`]: local user resolution and credentials
//! - [`envelope`]: backend response envelope
//! - [`broadcast`], [`server`]: the relay

pub mod broadcast;
pub mod config;
pub mod debounce;
pub mod document;
pub mod editor;
pub mod envelope;
pub mod error;
pub mod identity;
pub mod presence;
pub mod protocol;
pub mod reconciler;
pub mod server;
pub mod session;
pub mod store;
pub mod transport;

// Re-exports for convenience
pub use broadcast::{RelayRoom, RoomManager, RosterEntry};
pub use config::{CollabConfig, RelayConfig};
pub use debounce::{DebounceState, Debouncer};
pub use document::{Document, DocumentState};
pub use editor::{CollabEditor, EditorCommand, EditorEvent, EditorHandle};
pub use envelope::{parse_envelope, ResponseEnvelope};
pub use error::{EnvelopeError, IdentityError, ProtocolError, StoreError, SyncError};
pub use identity::{
    resolve_local_identity, CredentialProvider, IdentityProvider, MemoryCredentials,
    StaticIdentity, TokenIdentity, UserIdentity,
};
pub use presence::{Collaborator, ColorPalette, CursorView, PresenceTracker};
pub use protocol::{CursorRange, EditAction, EditEvent};
pub use reconciler::{EditorView, Reconciled, Reconciler};
pub use server::{RelayServer, RelayStats};
pub use session::{CollabSession, TimerOutput};
pub use store::{DocumentStore, HttpDocumentStore, InMemoryDocumentStore};
pub use transport::{ConnectionState, Subscription, Transport, TransportEvent};
