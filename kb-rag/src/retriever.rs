//! Knowledge-base retrieval, including image-aware combined search.
//!
//! The [`KbRetriever`] turns a question into one or more [`SearchRequest`]s,
//! runs them against the injected [`VectorStore`], and shapes the hits into
//! context strings for the prompt.
//!
//! When the question contains a link to an image and a [`VisionProvider`] is
//! configured, two searches run:
//!
//! 1. the text search, with the image link replaced by the provider's
//!    description of the image
//! 2. an image-vector search on the link itself
//!
//! and their hits are merged with [`interleave`](crate::interleave::interleave),
//! image hits first.
//!
//! # Example
//!
//! ```rust,ignore
//! use kb_rag::{KbRetriever, KbConfig, InMemoryVectorStore, SearchOptions};
//!
//! let retriever = KbRetriever::builder()
//!     .config(KbConfig::default())
//!     .vector_store(Arc::new(InMemoryVectorStore::new()))
//!     .embedding_provider(Arc::new(embedder))
//!     .tokenizer(Arc::new(tokenizer))
//!     .build()?;
//!
//! let retrieval = retriever.search("how do I reset it?", &SearchOptions::default()).await?;
//! let context = retrieval.context();
//! ```

use std::sync::Arc;

use tracing::{debug, error, info};

use crate::config::KbConfig;
use crate::document::{KbDocument, SearchResult, select_fields};
use crate::embedding::EmbeddingProvider;
use crate::error::{KbError, Result};
use crate::interleave::interleave;
use crate::search::{SearchMode, SearchRequest, VectorField, VectorQuery, find_image_url};
use crate::tokenizer::Tokenizer;
use crate::vectorstore::VectorStore;
use crate::vision::VisionProvider;

/// Prefix of the context line carrying the analysed question.
pub const IMAGE_ANALYSIS_PREFIX: &str = "Analysis of the image in the question: ";

/// Per-call search options.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchOptions {
    /// Ranking mode.
    pub mode: SearchMode,
    /// Vector field for the text-side search (defaults to `item_vector`).
    pub vector_field: VectorField,
    /// Fields to return; the schema's non-vector fields when `None`.
    pub select: Option<Vec<String>>,
    /// OData filter expression.
    pub filter: Option<String>,
}

impl SearchOptions {
    /// Parse options from the names used in configuration and tool calls.
    ///
    /// # Errors
    ///
    /// Returns [`KbError::UnsupportedSearchMode`] or
    /// [`KbError::UnknownVectorField`] for names outside the known sets.
    pub fn parse(mode: &str, vector_field: Option<&str>) -> Result<Self> {
        Ok(Self {
            mode: mode.parse()?,
            vector_field: vector_field.map(str::parse).transpose()?.unwrap_or_default(),
            ..Self::default()
        })
    }
}

/// The outcome of one retrieval.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Retrieval {
    /// Hits in final order.
    pub results: Vec<SearchResult>,
    /// The question rewritten with the image description, when the question
    /// contained an image link.
    pub image_analysis: Option<String>,
}

impl Retrieval {
    /// Context strings for the prompt: one per hit with text, preceded by
    /// the image analysis line when present.
    pub fn context(&self) -> Vec<String> {
        let analysis = self
            .image_analysis
            .as_ref()
            .map(|query| format!("{IMAGE_ANALYSIS_PREFIX}{query}\n\n"));
        analysis.into_iter().chain(self.results.iter().filter_map(format_hit)).collect()
    }

    /// All context strings joined into one block.
    pub fn context_text(&self) -> String {
        self.context().join("\n")
    }
}

/// Render one hit as a context entry, with its source link when known.
fn format_hit(result: &SearchResult) -> Option<String> {
    let text = result.text().filter(|t| !t.trim().is_empty())?;
    let source = result
        .field_str("web_url")
        .filter(|u| !u.is_empty())
        .or_else(|| result.field_str("doc_url").filter(|u| !u.is_empty()));
    Some(match source {
        Some(url) => format!("{text}\n[Source: {url}]\n"),
        None => format!("{text}\n"),
    })
}

/// Runs searches against the knowledge-base index.
///
/// All collaborators are injected at construction. Construct one via
/// [`KbRetriever::builder()`].
pub struct KbRetriever {
    config: KbConfig,
    vector_store: Arc<dyn VectorStore>,
    embedding_provider: Arc<dyn EmbeddingProvider>,
    tokenizer: Arc<dyn Tokenizer>,
    vision: Option<Arc<dyn VisionProvider>>,
}

impl KbRetriever {
    /// Create a new [`KbRetrieverBuilder`].
    pub fn builder() -> KbRetrieverBuilder {
        KbRetrieverBuilder::default()
    }

    /// Return a reference to the configuration.
    pub fn config(&self) -> &KbConfig {
        &self.config
    }

    /// Return a reference to the vector store.
    pub fn vector_store(&self) -> &Arc<dyn VectorStore> {
        &self.vector_store
    }

    /// Search the knowledge base for `query`.
    ///
    /// # Errors
    ///
    /// Returns [`KbError::Config`] if a computer-vision field is requested
    /// without a vision provider, and propagates embedding, vision and
    /// search backend errors unchanged.
    pub async fn search(&self, query: &str, options: &SearchOptions) -> Result<Retrieval> {
        let image_url = find_image_url(query).filter(|_| self.vision.is_some());

        let text_query = match (image_url, &self.vision) {
            (Some(url), Some(vision)) => {
                let description = vision.describe_image(url).await.inspect_err(|e| {
                    error!(error = %e, "image analysis failed");
                })?;
                format!("{}\n{}", query.replace(url, ""), description)
            }
            _ => query.to_string(),
        };

        let request =
            self.build_request(&text_query, &text_query, options.vector_field, options).await?;
        let text_results = self.vector_store.search(&request).await?;
        debug!(hits = text_results.len(), field = %options.vector_field, "text search completed");

        let Some(url) = image_url else {
            info!(result_count = text_results.len(), "search completed");
            return Ok(Retrieval { results: text_results, image_analysis: None });
        };

        // The image vector drives this request; the keyword side still
        // searches the question and the image description, never the link.
        let image_request =
            self.build_request(url, &text_query, VectorField::CvImage, options).await?;
        let image_results = self.vector_store.search(&image_request).await?;
        debug!(hits = image_results.len(), "image search completed");

        let results = interleave(vec![image_results, text_results]);
        info!(result_count = results.len(), "combined image and text search completed");

        Ok(Retrieval { results, image_analysis: Some(text_query) })
    }

    /// Find documents whose image resembles the image linked in `query`.
    ///
    /// Returns no results when the query contains no image link.
    ///
    /// # Errors
    ///
    /// Returns [`KbError::Config`] if no vision provider is configured.
    pub async fn search_similar_images(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Vec<SearchResult>> {
        let Some(url) = find_image_url(query) else {
            info!("no image link in query, skipping similar image search");
            return Ok(Vec::new());
        };

        let options = SearchOptions { mode: SearchMode::Vector, ..options.clone() };
        let keywords = query.replace(url, "");
        let request = self.build_request(url, &keywords, VectorField::CvImage, &options).await?;
        self.vector_store.search(&request).await
    }

    /// Upload documents to the index, assigning ids to those without one.
    ///
    /// Returns the uploaded documents.
    pub async fn upload_documents(&self, documents: Vec<KbDocument>) -> Result<Vec<KbDocument>> {
        let mut documents = documents;
        for document in &mut documents {
            document.ensure_id();
        }
        self.vector_store.upload(&documents).await.inspect_err(|e| {
            error!(count = documents.len(), error = %e, "document upload failed");
        })?;
        info!(count = documents.len(), "uploaded documents");
        Ok(documents)
    }

    /// Delete documents from the index by id.
    pub async fn delete_documents(&self, ids: &[&str]) -> Result<()> {
        self.vector_store.delete(ids).await?;
        info!(count = ids.len(), "deleted documents");
        Ok(())
    }

    /// Embed `input` for `field` and wrap it in a request whose keyword
    /// side searches `keywords`.
    async fn build_request(
        &self,
        input: &str,
        keywords: &str,
        field: VectorField,
        options: &SearchOptions,
    ) -> Result<SearchRequest> {
        let value = match field {
            VectorField::Item => {
                let truncated = self.tokenizer.truncate(input, self.config.max_query_tokens)?;
                self.embedding_provider.embed(&truncated).await?
            }
            VectorField::CvText => self.vision()?.embed_text(input).await?,
            VectorField::CvImage => self.vision()?.embed_image(input).await?,
        };

        let select = options
            .select
            .clone()
            .unwrap_or_else(|| select_fields().into_iter().map(str::to_string).collect());

        Ok(SearchRequest {
            mode: options.mode,
            text: keywords.to_string(),
            vector: VectorQuery { field, value, k: self.config.num_top_matches },
            filter: options.filter.clone(),
            select,
        })
    }

    fn vision(&self) -> Result<&Arc<dyn VisionProvider>> {
        self.vision.as_ref().ok_or_else(|| {
            KbError::Config("a vision provider is required for computer-vision vector fields".into())
        })
    }
}

/// Builder for constructing a [`KbRetriever`].
///
/// All fields except `vision` are required. Call
/// [`build()`](KbRetrieverBuilder::build) to validate and produce the
/// retriever.
#[derive(Default)]
pub struct KbRetrieverBuilder {
    config: Option<KbConfig>,
    vector_store: Option<Arc<dyn VectorStore>>,
    embedding_provider: Option<Arc<dyn EmbeddingProvider>>,
    tokenizer: Option<Arc<dyn Tokenizer>>,
    vision: Option<Arc<dyn VisionProvider>>,
}

impl KbRetrieverBuilder {
    /// Set the configuration.
    pub fn config(mut self, config: KbConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the vector store backend.
    pub fn vector_store(mut self, store: Arc<dyn VectorStore>) -> Self {
        self.vector_store = Some(store);
        self
    }

    /// Set the embedding provider for `item_vector` queries.
    pub fn embedding_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedding_provider = Some(provider);
        self
    }

    /// Set the embedding model's tokenizer, used to cap query length.
    pub fn tokenizer(mut self, tokenizer: Arc<dyn Tokenizer>) -> Self {
        self.tokenizer = Some(tokenizer);
        self
    }

    /// Set an optional vision provider for image-aware search.
    pub fn vision(mut self, vision: Arc<dyn VisionProvider>) -> Self {
        self.vision = Some(vision);
        self
    }

    /// Build the [`KbRetriever`], validating that all required fields are set.
    ///
    /// # Errors
    ///
    /// Returns [`KbError::Config`] if any required field is missing.
    pub fn build(self) -> Result<KbRetriever> {
        let config = self.config.ok_or_else(|| KbError::Config("config is required".into()))?;
        let vector_store =
            self.vector_store.ok_or_else(|| KbError::Config("vector_store is required".into()))?;
        let embedding_provider = self
            .embedding_provider
            .ok_or_else(|| KbError::Config("embedding_provider is required".into()))?;
        let tokenizer =
            self.tokenizer.ok_or_else(|| KbError::Config("tokenizer is required".into()))?;

        Ok(KbRetriever { config, vector_store, embedding_provider, tokenizer, vision: self.vision })
    }
}
