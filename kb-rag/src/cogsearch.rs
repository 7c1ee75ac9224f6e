//! Cognitive Search vector store backend.
//!
//! Provides [`CognitiveSearchStore`] which implements [`VectorStore`] over
//! the search service's REST API. This module is only available when the
//! `azure-search` feature is enabled.
//!
//! The index itself (fields, vector profiles, semantic configuration) is
//! expected to exist already.
//!
//! # Example
//!
//! ```rust,ignore
//! use kb_rag::cogsearch::CognitiveSearchStore;
//!
//! let store = CognitiveSearchStore::new("https://my-search.search.windows.net", "key", "kb-index")?;
//! store.upload(&documents).await?;
//! let results = store.search(&request).await?;
//! ```

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, error};

use crate::document::{KbDocument, SearchResult};
use crate::error::{KbError, Result};
use crate::search::SearchRequest;
use crate::vectorstore::VectorStore;

/// API version with vector search support.
pub const DEFAULT_API_VERSION: &str = "2023-07-01-Preview";

const BACKEND: &str = "CognitiveSearch";

/// A [`VectorStore`] backed by a Cognitive Search index.
pub struct CognitiveSearchStore {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    index_name: String,
    api_version: String,
}

impl CognitiveSearchStore {
    /// Create a store for `index_name` on the service at `endpoint`.
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        index_name: impl Into<String>,
    ) -> Result<Self> {
        let endpoint = endpoint.into();
        url::Url::parse(&endpoint)
            .map_err(|e| KbError::Config(format!("invalid search endpoint '{endpoint}': {e}")))?;
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(KbError::Config("search admin key must not be empty".into()));
        }
        let endpoint = endpoint.trim_end_matches('/').to_string();
        Ok(Self {
            client: reqwest::Client::new(),
            endpoint,
            api_key,
            index_name: index_name.into(),
            api_version: DEFAULT_API_VERSION.to_string(),
        })
    }

    /// Create a store from `COG_SEARCH_ENDPOINT`, `COG_SEARCH_ADMIN_KEY` and
    /// `COG_VECSEARCH_VECTOR_INDEX`.
    pub fn from_env() -> Result<Self> {
        let var = |name: &str| {
            std::env::var(name)
                .map_err(|_| KbError::Config(format!("{name} environment variable not set")))
        };
        Self::new(var("COG_SEARCH_ENDPOINT")?, var("COG_SEARCH_ADMIN_KEY")?, var("COG_VECSEARCH_VECTOR_INDEX")?)
    }

    /// Override the REST API version.
    pub fn with_api_version(mut self, api_version: impl Into<String>) -> Self {
        self.api_version = api_version.into();
        self
    }

    fn docs_url(&self, op: &str) -> String {
        format!(
            "{}/indexes/{}/docs/{op}?api-version={}",
            self.endpoint, self.index_name, self.api_version
        )
    }

    fn map_err(e: reqwest::Error) -> KbError {
        KbError::SearchBackend { backend: BACKEND.to_string(), message: e.to_string() }
    }

    async fn post(&self, op: &str, body: &Value) -> Result<Value> {
        let response = self
            .client
            .post(self.docs_url(op))
            .header("api-key", &self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                error!(backend = BACKEND, op, error = %e, "request failed");
                Self::map_err(e)
            })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            error!(backend = BACKEND, op, %status, "API error");
            return Err(KbError::SearchBackend {
                backend: BACKEND.to_string(),
                message: format!("{op} returned {status}: {detail}"),
            });
        }

        response.json().await.map_err(Self::map_err)
    }
}

/// Body of an index batch applying `action` to each document.
pub fn index_batch(documents: &[KbDocument], action: &str) -> Value {
    let value: Vec<Value> = documents
        .iter()
        .map(|doc| {
            let mut object: serde_json::Map<String, Value> = doc.clone().into();
            object.insert("@search.action".to_string(), Value::String(action.to_string()));
            Value::Object(object)
        })
        .collect();
    json!({ "value": value })
}

/// Body of an index batch deleting documents by key.
pub fn delete_batch(ids: &[&str]) -> Value {
    let value: Vec<Value> =
        ids.iter().map(|id| json!({ "@search.action": "delete", "id": id })).collect();
    json!({ "value": value })
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    value: Vec<Value>,
}

/// Parse the hits of a search response body.
pub fn parse_search_response(body: Value) -> Result<Vec<SearchResult>> {
    let response: SearchResponse = serde_json::from_value(body).map_err(|e| {
        KbError::SearchBackend { backend: BACKEND.to_string(), message: format!("bad response: {e}") }
    })?;
    response.value.into_iter().map(|hit| SearchResult::from_hit(BACKEND, hit)).collect()
}

#[async_trait]
impl VectorStore for CognitiveSearchStore {
    async fn upload(&self, documents: &[KbDocument]) -> Result<()> {
        if documents.is_empty() {
            return Ok(());
        }
        self.post("index", &index_batch(documents, "upload")).await?;
        debug!(index = %self.index_name, count = documents.len(), "uploaded documents");
        Ok(())
    }

    async fn delete(&self, ids: &[&str]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        self.post("index", &delete_batch(ids)).await?;
        debug!(index = %self.index_name, count = ids.len(), "deleted documents");
        Ok(())
    }

    async fn search(&self, request: &SearchRequest) -> Result<Vec<SearchResult>> {
        let body = self.post("search", &request.to_body()).await?;
        let results = parse_search_response(body)?;
        debug!(
            index = %self.index_name,
            mode = %request.mode,
            field = %request.vector.field,
            hits = results.len(),
            "search completed"
        );
        Ok(results)
    }
}
