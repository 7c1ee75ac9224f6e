//! Computer Vision provider for image-aware retrieval.
//!
//! This module is only available when the `azure-vision` feature is
//! enabled. It calls the Computer Vision REST API for:
//!
//! - `retrieval:vectorizeText` / `retrieval:vectorizeImage`: text and image
//!   embeddings in one shared space
//! - `imageanalysis:analyze`: image caption and OCR text

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, error};

use crate::error::{KbError, Result};
use crate::vision::VisionProvider;

/// API version of the retrieval and analysis endpoints.
pub const DEFAULT_API_VERSION: &str = "2023-02-01-preview";

const PROVIDER: &str = "ComputerVision";

/// A [`VisionProvider`] backed by the Computer Vision REST API.
pub struct AzureVisionProvider {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    api_version: String,
}

#[derive(Deserialize)]
struct VectorizeResponse {
    vector: Vec<f32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeResponse {
    #[serde(default)]
    caption_result: Option<CaptionResult>,
    #[serde(default)]
    read_result: Option<ReadResult>,
}

#[derive(Debug, Deserialize)]
struct CaptionResult {
    text: String,
}

#[derive(Debug, Deserialize)]
struct ReadResult {
    #[serde(default)]
    content: String,
}

impl AnalyzeResponse {
    /// Caption followed by any text read from the image.
    fn description(self) -> String {
        let caption = self.caption_result.map(|c| c.text);
        let read = self.read_result.map(|r| r.content).filter(|c| !c.trim().is_empty());
        match (caption, read) {
            (Some(caption), Some(read)) => format!("{caption}\n{read}"),
            (Some(caption), None) => caption,
            (None, Some(read)) => read,
            (None, None) => String::new(),
        }
    }
}

impl AzureVisionProvider {
    /// Create a provider for the resource at `endpoint`.
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Result<Self> {
        let endpoint = endpoint.into();
        url::Url::parse(&endpoint).map_err(|e| KbError::Vision {
            provider: PROVIDER.into(),
            message: format!("invalid endpoint '{endpoint}': {e}"),
        })?;
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(KbError::Vision {
                provider: PROVIDER.into(),
                message: "API key must not be empty".into(),
            });
        }
        let endpoint = endpoint.trim_end_matches('/').to_string();
        Ok(Self {
            client: reqwest::Client::new(),
            endpoint,
            api_key,
            api_version: DEFAULT_API_VERSION.to_string(),
        })
    }

    /// Create a provider from `CV_API_ENDPOINT` and `CV_API_KEY`.
    pub fn from_env() -> Result<Self> {
        let var = |name: &str| {
            std::env::var(name).map_err(|_| KbError::Vision {
                provider: PROVIDER.into(),
                message: format!("{name} environment variable not set"),
            })
        };
        Self::new(var("CV_API_ENDPOINT")?, var("CV_API_KEY")?)
    }

    async fn post(&self, operation: &str, extra_query: &str, body: Value) -> Result<reqwest::Response> {
        let url = format!(
            "{}/computervision/{operation}?api-version={}{extra_query}",
            self.endpoint, self.api_version
        );
        let response = self
            .client
            .post(url)
            .header("Ocp-Apim-Subscription-Key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                error!(provider = PROVIDER, operation, error = %e, "request failed");
                KbError::Vision { provider: PROVIDER.into(), message: format!("request failed: {e}") }
            })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            error!(provider = PROVIDER, operation, %status, "API error");
            return Err(KbError::Vision {
                provider: PROVIDER.into(),
                message: format!("{operation} returned {status}: {detail}"),
            });
        }
        Ok(response)
    }

    async fn vectorize(&self, operation: &str, body: Value) -> Result<Vec<f32>> {
        let response = self.post(operation, "&modelVersion=latest", body).await?;
        let parsed: VectorizeResponse = response.json().await.map_err(|e| KbError::Vision {
            provider: PROVIDER.into(),
            message: format!("failed to parse {operation} response: {e}"),
        })?;
        Ok(parsed.vector)
    }
}

#[async_trait]
impl VisionProvider for AzureVisionProvider {
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        debug!(provider = PROVIDER, text_len = text.len(), "vectorizing text");
        self.vectorize("retrieval:vectorizeText", json!({ "text": text })).await
    }

    async fn embed_image(&self, url: &str) -> Result<Vec<f32>> {
        debug!(provider = PROVIDER, "vectorizing image");
        self.vectorize("retrieval:vectorizeImage", json!({ "url": url })).await
    }

    async fn describe_image(&self, url: &str) -> Result<String> {
        let response = self
            .post("imageanalysis:analyze", "&features=caption,read", json!({ "url": url }))
            .await?;
        let parsed: AnalyzeResponse = response.json().await.map_err(|e| KbError::Vision {
            provider: PROVIDER.into(),
            message: format!("failed to parse analysis response: {e}"),
        })?;
        Ok(parsed.description())
    }
}
