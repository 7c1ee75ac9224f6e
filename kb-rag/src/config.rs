//! Configuration for knowledge-base retrieval and answering.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{KbError, Result};
use crate::window::SegmentLimits;

/// Configuration parameters shared by the retriever, the stores and the
/// answer pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KbConfig {
    /// Name of the search index holding the knowledge base.
    pub index_name: String,
    /// Blob container that source documents live in.
    pub blob_container: String,
    /// Blob container that processed JSON documents are written to.
    pub output_blob_container: String,
    /// Partition value stamped on content records in the document store.
    pub category_id: String,
    /// Partition value stamped on embedding backup records.
    pub embedding_category_id: String,
    /// Number of nearest neighbours requested per vector search.
    pub num_top_matches: usize,
    /// Soft cap on query tokens.
    pub max_query_tokens: usize,
    /// Soft cap on conversation history tokens.
    pub max_history_tokens: usize,
    /// Soft cap on pre-context tokens.
    pub pre_context_tokens: usize,
    /// Tokens reserved for the completion.
    pub max_output_tokens: usize,
    /// Whether documents carry computer-vision vectors.
    pub process_images: bool,
}

impl Default for KbConfig {
    fn default() -> Self {
        Self {
            index_name: "kb-index".to_string(),
            blob_container: "kb-documents".to_string(),
            output_blob_container: "kb-output".to_string(),
            category_id: "KnowledgeBase".to_string(),
            embedding_category_id: "Embedding".to_string(),
            num_top_matches: 3,
            max_query_tokens: 500,
            max_history_tokens: 1000,
            pre_context_tokens: 500,
            max_output_tokens: 750,
            process_images: false,
        }
    }
}

impl KbConfig {
    /// Create a new builder for constructing a [`KbConfig`].
    pub fn builder() -> KbConfigBuilder {
        KbConfigBuilder::default()
    }

    /// Load configuration from the process environment.
    ///
    /// Unset variables fall back to [`KbConfig::default`]. `PROCESS_IMAGES`
    /// is enabled by the value `1`.
    ///
    /// # Errors
    ///
    /// Returns [`KbError::Config`] if a numeric variable does not parse or the
    /// resulting configuration fails validation.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let config = Self {
            index_name: env_or("KB_INDEX_NAME", defaults.index_name),
            blob_container: env_or("KB_BLOB_CONTAINER", defaults.blob_container),
            output_blob_container: env_or("OUTPUT_BLOB_CONTAINER", defaults.output_blob_container),
            category_id: env_or("CATEGORYID", defaults.category_id),
            embedding_category_id: env_or("EMBCATEGORYID", defaults.embedding_category_id),
            num_top_matches: env_parse("NUM_TOP_MATCHES", defaults.num_top_matches)?,
            max_query_tokens: env_parse("MAX_QUERY_TOKENS", defaults.max_query_tokens)?,
            max_history_tokens: env_parse("MAX_HISTORY_TOKENS", defaults.max_history_tokens)?,
            pre_context_tokens: env_parse("PRE_CONTEXT", defaults.pre_context_tokens)?,
            max_output_tokens: env_parse("MAX_OUTPUT_TOKENS", defaults.max_output_tokens)?,
            process_images: env_parse::<u8>("PROCESS_IMAGES", u8::from(defaults.process_images))?
                == 1,
        };
        KbConfigBuilder { config }.build()
    }

    /// The per-segment caps and output reservation used by the token windower.
    pub fn segment_limits(&self) -> SegmentLimits {
        SegmentLimits {
            max_query_tokens: self.max_query_tokens,
            max_history_tokens: self.max_history_tokens,
            max_pre_context_tokens: self.pre_context_tokens,
            reserved_output_tokens: self.max_output_tokens,
        }
    }
}

fn env_or(name: &str, default: String) -> String {
    std::env::var(name).ok().filter(|v| !v.is_empty()).unwrap_or(default)
}

fn env_parse<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e| KbError::Config(format!("{name}={raw:?} is not valid: {e}"))),
        _ => Ok(default),
    }
}

/// Builder for constructing a validated [`KbConfig`].
#[derive(Debug, Clone, Default)]
pub struct KbConfigBuilder {
    config: KbConfig,
}

impl KbConfigBuilder {
    /// Set the search index name.
    pub fn index_name(mut self, name: impl Into<String>) -> Self {
        self.config.index_name = name.into();
        self
    }

    /// Set the source blob container.
    pub fn blob_container(mut self, container: impl Into<String>) -> Self {
        self.config.blob_container = container.into();
        self
    }

    /// Set the blob container for processed JSON documents.
    pub fn output_blob_container(mut self, container: impl Into<String>) -> Self {
        self.config.output_blob_container = container.into();
        self
    }

    /// Set the content partition value.
    pub fn category_id(mut self, category: impl Into<String>) -> Self {
        self.config.category_id = category.into();
        self
    }

    /// Set the embedding backup partition value.
    pub fn embedding_category_id(mut self, category: impl Into<String>) -> Self {
        self.config.embedding_category_id = category.into();
        self
    }

    /// Set the number of nearest neighbours per search.
    pub fn num_top_matches(mut self, k: usize) -> Self {
        self.config.num_top_matches = k;
        self
    }

    /// Set the query token cap.
    pub fn max_query_tokens(mut self, tokens: usize) -> Self {
        self.config.max_query_tokens = tokens;
        self
    }

    /// Set the history token cap.
    pub fn max_history_tokens(mut self, tokens: usize) -> Self {
        self.config.max_history_tokens = tokens;
        self
    }

    /// Set the pre-context token cap.
    pub fn pre_context_tokens(mut self, tokens: usize) -> Self {
        self.config.pre_context_tokens = tokens;
        self
    }

    /// Set the number of tokens reserved for the completion.
    pub fn max_output_tokens(mut self, tokens: usize) -> Self {
        self.config.max_output_tokens = tokens;
        self
    }

    /// Enable or disable computer-vision vectors on documents.
    pub fn process_images(mut self, enabled: bool) -> Self {
        self.config.process_images = enabled;
        self
    }

    /// Build the [`KbConfig`], validating that parameters are consistent.
    ///
    /// # Errors
    ///
    /// Returns [`KbError::Config`] if:
    /// - `num_top_matches == 0`
    /// - `max_output_tokens == 0`
    /// - the index name, a container name or a category is empty
    pub fn build(self) -> Result<KbConfig> {
        let config = self.config;
        if config.num_top_matches == 0 {
            return Err(KbError::Config("num_top_matches must be greater than zero".to_string()));
        }
        if config.max_output_tokens == 0 {
            return Err(KbError::Config("max_output_tokens must be greater than zero".to_string()));
        }
        for (name, value) in [
            ("index_name", &config.index_name),
            ("blob_container", &config.blob_container),
            ("output_blob_container", &config.output_blob_container),
            ("category_id", &config.category_id),
            ("embedding_category_id", &config.embedding_category_id),
        ] {
            if value.trim().is_empty() {
                return Err(KbError::Config(format!("{name} must not be empty")));
            }
        }
        Ok(config)
    }
}
