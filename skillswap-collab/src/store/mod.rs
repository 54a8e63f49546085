//! Document store: where the backing document of a session lives.
//!
//! ```text
//! get_or_create_document(session) ──▶ Document
//! update_document(id, content, v)  ──▶ ack
//! deactivate_document(session)     ──▶ ack
//! ```
//!
//! - [`memory`]: process-local store (relay-only deployments, tests)
//! - [`http`]: REST backend client

pub mod http;
pub mod memory;

use async_trait::async_trait;

use crate::document::Document;
use crate::error::StoreError;

pub use http::HttpDocumentStore;
pub use memory::InMemoryDocumentStore;

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch the session's document, creating it on first access.
    async fn get_or_create_document(&self, session_id: &str) -> Result<Document, StoreError>;

    /// Persist a snapshot.
    async fn update_document(
        &self,
        document_id: &str,
        content: &str,
        version: u64,
    ) -> Result<(), StoreError>;

    /// Mark the session's document inactive. Nothing is deleted.
    async fn deactivate_document(&self, session_id: &str) -> Result<(), StoreError>;
}
