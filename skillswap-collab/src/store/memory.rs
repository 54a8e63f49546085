use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::DocumentStore;
use crate::document::Document;
use crate::error::StoreError;

#[derive(Default)]
struct Inner {
    /// session_id → document
    by_session: HashMap<String, Document>,
    /// document_id → session_id
    sessions: HashMap<String, String>,
}

/// Documents kept in process memory, keyed by session.
#[derive(Clone, Default)]
pub struct InMemoryDocumentStore {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a document (tests, fixtures).
    pub async fn insert(&self, document: Document) {
        let mut inner = self.inner.write().await;
        inner
            .sessions
            .insert(document.document_id.clone(), document.session_id.clone());
        inner.by_session.insert(document.session_id.clone(), document);
    }

    pub async fn get(&self, session_id: &str) -> Option<Document> {
        self.inner.read().await.by_session.get(session_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.by_session.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn get_or_create_document(&self, session_id: &str) -> Result<Document, StoreError> {
        {
            let inner = self.inner.read().await;
            if let Some(doc) = inner.by_session.get(session_id) {
                return Ok(doc.clone());
            }
        }

        let mut inner = self.inner.write().await;
        // Double-check after acquiring write lock
        if let Some(doc) = inner.by_session.get(session_id) {
            return Ok(doc.clone());
        }

        let document = Document::new(Uuid::new_v4().to_string(), session_id);
        log::info!(
            "Created document {} for session {session_id}",
            document.document_id
        );
        inner
            .sessions
            .insert(document.document_id.clone(), session_id.to_string());
        inner
            .by_session
            .insert(session_id.to_string(), document.clone());
        Ok(document)
    }

    async fn update_document(
        &self,
        document_id: &str,
        content: &str,
        version: u64,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let session_id = inner
            .sessions
            .get(document_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(document_id.to_string()))?;
        let document = inner
            .by_session
            .get_mut(&session_id)
            .ok_or_else(|| StoreError::NotFound(document_id.to_string()))?;
        if !document.active {
            return Err(StoreError::Inactive(document_id.to_string()));
        }
        document.set_content(content, version);
        Ok(())
    }

    async fn deactivate_document(&self, session_id: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let document = inner
            .by_session
            .get_mut(session_id)
            .ok_or_else(|| StoreError::NotFound(session_id.to_string()))?;
        document.active = false;
        log::info!("Deactivated document {} ({session_id})", document.document_id);
        Ok(())
    }
}
