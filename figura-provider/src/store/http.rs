//! HTTP artifact store (`PUT {base}/{key}`).

use async_trait::async_trait;
use figura_core::error::FiguraError;
use figura_core::store::{ArtifactStore, StoredObject};
use figura_core::types::StoreInfo;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use std::sync::Arc;
use std::time::Duration;

/// Uploads objects with `PUT` to an object-storage style endpoint.
///
/// Timeouts, 408, 429 and 5xx responses are reported as transient
/// [`FiguraError::Storage`] errors so a retry layer can pick them up; other
/// rejections are final.
#[derive(Clone)]
pub struct HttpStore {
    client: reqwest::Client,
    base_url: String,
    public_base_url: Option<String>,
    bearer_token: Option<String>,
    info: Arc<StoreInfo>,
}

impl std::fmt::Debug for HttpStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpStore")
            .field("base_url", &self.base_url)
            .field("public_base_url", &self.public_base_url)
            .finish()
    }
}

impl HttpStore {
    /// Create a store for `base_url` with a 60 second request timeout
    pub fn new(base_url: impl Into<String>) -> Result<Self, FiguraError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self::with_client(client, base_url))
    }

    /// Create a store using an existing client
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            public_base_url: None,
            bearer_token: None,
            info: Arc::new(StoreInfo {
                id: "http".to_string(),
                name: "HTTP".to_string(),
            }),
        }
    }

    /// Send `Authorization: Bearer <token>` with every upload
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    /// Base for public URLs when it differs from the upload endpoint
    pub fn with_public_base_url(mut self, url: impl Into<String>) -> Self {
        self.public_base_url = Some(url.into().trim_end_matches('/').to_string());
        self
    }

    fn is_transient(status: StatusCode) -> bool {
        status == StatusCode::REQUEST_TIMEOUT
            || status == StatusCode::TOO_MANY_REQUESTS
            || status.is_server_error()
    }
}

#[async_trait]
impl ArtifactStore for HttpStore {
    fn info(&self) -> Arc<StoreInfo> {
        self.info.clone()
    }

    async fn put(&self, object: StoredObject) -> Result<(), FiguraError> {
        let url = format!("{}/{}", self.base_url, object.key);
        let mut request = self
            .client
            .put(&url)
            .header(CONTENT_TYPE, object.content_type.as_str())
            .body(object.bytes.as_ref().clone());
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        let detail = format!("PUT {} returned {}: {}", url, status, body.trim());
        if Self::is_transient(status) {
            Err(FiguraError::storage(detail))
        } else {
            Err(FiguraError::upload(detail))
        }
    }

    fn url_for(&self, key: &str) -> String {
        let base = self.public_base_url.as_deref().unwrap_or(&self.base_url);
        format!("{}/{}", base, key)
    }
}
