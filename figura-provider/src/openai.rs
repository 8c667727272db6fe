//! AI image renderer using the async-openai crate.
//!
//! Talks to any OpenAI-compatible images endpoint. Responses are accepted as
//! inline base64 or as a URL, then validated and re-encoded as PNG.

use crate::validate::ImageValidator;
use async_openai::config::OpenAIConfig;
use async_openai::types::{
    CreateImageRequestArgs, Image, ImageModel, ImageResponseFormat, ImageSize,
};
use async_openai::Client;
use async_trait::async_trait;
use base64::Engine;
use figura_core::error::FiguraError;
use figura_core::renderer::Renderer;
use figura_core::types::*;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_MODEL: &str = "dall-e-3";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Renderer for the AI image tier
#[derive(Clone)]
pub struct OpenAiImageRenderer {
    client: Client<OpenAIConfig>,
    http: reqwest::Client,
    info: Arc<RendererInfo>,
    model: String,
    size: ImageSize,
    timeout: Duration,
    validator: ImageValidator,
}

impl std::fmt::Debug for OpenAiImageRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiImageRenderer")
            .field("info", &self.info)
            .field("model", &self.model)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl OpenAiImageRenderer {
    /// Create a renderer with default configuration
    pub fn new(api_key: impl Into<String>) -> Result<Self, FiguraError> {
        Self::builder().api_key(api_key).build()
    }

    /// Create a builder for more configuration options
    pub fn builder() -> OpenAiImageBuilder {
        OpenAiImageBuilder::default()
    }

    /// Generate an image for `prompt` and return it as validated PNG bytes.
    ///
    /// The whole exchange, including any image download, is bounded by the
    /// configured timeout.
    pub async fn generate(&self, prompt: &str) -> Result<Vec<u8>, FiguraError> {
        if prompt.trim().is_empty() {
            return Err(FiguraError::invalid_spec("image prompt is empty"));
        }

        let raw = tokio::time::timeout(self.timeout, self.fetch_image(prompt))
            .await
            .map_err(|_| {
                FiguraError::upstream(format!("image generation timed out after {:?}", self.timeout))
            })??;

        let validator = self.validator;
        tokio::task::spawn_blocking(move || validator.normalize(&raw))
            .await
            .map_err(|e| FiguraError::other(format!("image validation task failed: {}", e)))?
    }

    async fn fetch_image(&self, prompt: &str) -> Result<Vec<u8>, FiguraError> {
        let request = CreateImageRequestArgs::default()
            .prompt(prompt)
            .model(ImageModel::Other(self.model.clone()))
            .n(1)
            .size(self.size.clone())
            .response_format(ImageResponseFormat::B64Json)
            .build()
            .map_err(|e| FiguraError::upstream(format!("Failed to build image request: {}", e)))?;

        let response = self
            .client
            .images()
            .create(request)
            .await
            .map_err(|e| FiguraError::upstream(format!("OpenAI API error: {}", e)))?;

        let image = response
            .data
            .first()
            .ok_or_else(|| FiguraError::validation("image response contained no images"))?;

        match image.as_ref() {
            Image::B64Json { b64_json, .. } => base64::engine::general_purpose::STANDARD
                .decode(b64_json.as_bytes())
                .map_err(|e| FiguraError::validation(format!("invalid base64 image: {}", e))),
            Image::Url { url, .. } => self.download(url).await,
        }
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, FiguraError> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| FiguraError::upstream(format!("image download failed: {}", e)))?;
        let status = response.status();
        if !status.is_success() {
            return Err(FiguraError::upstream(format!(
                "image download returned {}",
                status
            )));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| FiguraError::upstream(format!("image download failed: {}", e)))?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl Renderer for OpenAiImageRenderer {
    fn info(&self) -> Arc<RendererInfo> {
        self.info.clone()
    }

    async fn render(&self, req: RenderRequest) -> Result<RenderedImage, FiguraError> {
        let prompt = req.spec.effective_prompt();
        tracing::debug!(
            "requesting AI image for spec {}: model={}, prompt_chars={}",
            req.spec.id,
            self.model,
            prompt.chars().count()
        );
        let bytes = self.generate(prompt).await?;
        Ok(RenderedImage::png(bytes))
    }
}

/// Builder for the AI image renderer
#[derive(Default)]
pub struct OpenAiImageBuilder {
    api_key: Option<String>,
    api_base: Option<String>,
    org_id: Option<String>,
    model: Option<String>,
    size: Option<ImageSize>,
    timeout: Option<Duration>,
    validator: Option<ImageValidator>,
}

impl OpenAiImageBuilder {
    /// Start from `OPENAI_API_KEY` and `OPENAI_API_BASE`
    pub fn from_env() -> Self {
        Self {
            api_key: std::env::var("OPENAI_API_KEY").ok(),
            api_base: std::env::var("OPENAI_API_BASE").ok(),
            ..Self::default()
        }
    }

    /// Set API key
    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Set API base URL (for OpenAI-compatible image services)
    pub fn api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = Some(api_base.into());
        self
    }

    /// Set organization ID
    pub fn organization(mut self, org_id: impl Into<String>) -> Self {
        self.org_id = Some(org_id.into());
        self
    }

    /// Set the image model
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Set the requested image size
    pub fn size(mut self, size: ImageSize) -> Self {
        self.size = Some(size);
        self
    }

    /// Bound the whole generation call
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Replace the response validator
    pub fn validator(mut self, validator: ImageValidator) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Build the renderer
    pub fn build(self) -> Result<OpenAiImageRenderer, FiguraError> {
        let api_key = self
            .api_key
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| FiguraError::configuration("API key is required"))?;

        let mut config = OpenAIConfig::new().with_api_key(api_key);
        if let Some(api_base) = self.api_base {
            config = config.with_api_base(api_base);
        }
        if let Some(org_id) = self.org_id {
            config = config.with_org_id(org_id);
        }

        let timeout = self.timeout.unwrap_or(DEFAULT_TIMEOUT);
        let http = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(OpenAiImageRenderer {
            client: Client::with_config(config),
            http,
            info: Arc::new(RendererInfo {
                name: "openai-images".to_string(),
                tier: Tier::AiImage,
                pool: ResourcePool::Io,
            }),
            model: self.model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            size: self.size.unwrap_or(ImageSize::S1024x1024),
            timeout,
            validator: self.validator.unwrap_or_default(),
        })
    }
}
