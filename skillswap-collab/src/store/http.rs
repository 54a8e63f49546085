use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::Serialize;

use super::DocumentStore;
use crate::document::Document;
use crate::envelope::parse_envelope;
use crate::error::StoreError;
use crate::identity::CredentialProvider;

/// REST client for the backend's document endpoints.
///
/// Every response goes through [`parse_envelope`]; anything else is an error.
pub struct HttpDocumentStore {
    client: Client,
    base_url: String,
    credentials: Arc<dyn CredentialProvider>,
}

#[derive(Serialize)]
struct UpdateBody<'a> {
    content: &'a str,
    version: u64,
}

impl HttpDocumentStore {
    pub fn new(
        base_url: impl Into<String>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Result<Self, StoreError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match self.credentials.token() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send<T: serde::de::DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<T, StoreError> {
        let response = self.authorize(request).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(StoreError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(parse_envelope(&body)?)
    }
}

#[async_trait]
impl DocumentStore for HttpDocumentStore {
    async fn get_or_create_document(&self, session_id: &str) -> Result<Document, StoreError> {
        let url = format!("{}/documents/session/{}", self.base_url, session_id);
        log::debug!("POST {url}");
        self.send(self.client.post(&url)).await
    }

    async fn update_document(
        &self,
        document_id: &str,
        content: &str,
        version: u64,
    ) -> Result<(), StoreError> {
        let url = format!("{}/documents/{}", self.base_url, document_id);
        log::debug!("PUT {url} (version {version})");
        let _: serde_json::Value = self
            .send(self.client.put(&url).json(&UpdateBody { content, version }))
            .await?;
        Ok(())
    }

    async fn deactivate_document(&self, session_id: &str) -> Result<(), StoreError> {
        let url = format!("{}/documents/session/{}/deactivate", self.base_url, session_id);
        log::debug!("PUT {url}");
        let _: serde_json::Value = self.send(self.client.put(&url)).await?;
        Ok(())
    }
}
