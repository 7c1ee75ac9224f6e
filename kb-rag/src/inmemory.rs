//! In-memory vector store using cosine similarity.
//!
//! This module provides [`InMemoryVectorStore`], a vector store backed by a
//! `HashMap` protected by a `tokio::sync::RwLock`. It is suitable for
//! development, testing, and small knowledge bases.

use std::collections::HashMap;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tracing::debug;

use crate::document::{KbDocument, SearchResult};
use crate::error::{KbError, Result};
use crate::search::{SearchMode, SearchRequest};
use crate::vectorstore::VectorStore;

const BACKEND: &str = "InMemory";

static EQ_FILTER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(\w+)\s+eq\s+'([^']*)'\s*$")
        .expect("unreachable error: filter pattern is valid")
});

/// An in-memory vector store using cosine similarity for search.
///
/// Documents are keyed by id. Only the vector part of a request is scored;
/// the hybrid modes rank exactly like `vector`. Filters of the form
/// `field eq 'value'` are supported.
///
/// # Example
///
/// ```rust,ignore
/// use kb_rag::{InMemoryVectorStore, VectorStore};
///
/// let store = InMemoryVectorStore::new();
/// store.upload(&documents).await?;
/// ```
#[derive(Debug, Default)]
pub struct InMemoryVectorStore {
    documents: RwLock<HashMap<String, KbDocument>>,
}

impl InMemoryVectorStore {
    /// Create a new empty in-memory vector store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored documents.
    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    /// Whether the store holds no documents.
    pub async fn is_empty(&self) -> bool {
        self.documents.read().await.is_empty()
    }
}

/// Compute cosine similarity between two vectors.
///
/// Returns 0.0 if either vector has zero magnitude.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Parse a `field eq 'value'` filter.
fn parse_filter(filter: &str) -> Result<(String, String)> {
    let captures = EQ_FILTER.captures(filter).ok_or_else(|| KbError::SearchBackend {
        backend: BACKEND.to_string(),
        message: format!("unsupported filter expression: {filter}"),
    })?;
    Ok((captures[1].to_string(), captures[2].to_string()))
}

/// Keep only the selected fields of a document (all non-vector fields when
/// `select` is empty). The id is returned separately and never projected.
fn project(document: &KbDocument, select: &[String]) -> Map<String, Value> {
    document
        .fields()
        .filter(|(field, _)| field.as_str() != "id")
        .filter(|(field, _)| {
            if select.is_empty() {
                !field.is_vector()
            } else {
                select.iter().any(|name| name == field.as_str())
            }
        })
        .map(|(field, value)| (field.as_str().to_string(), value.clone()))
        .collect()
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn upload(&self, documents: &[KbDocument]) -> Result<()> {
        // All or nothing: reject the batch before touching the map.
        if let Some(position) = documents.iter().position(|d| d.id().is_empty()) {
            return Err(KbError::SearchBackend {
                backend: BACKEND.to_string(),
                message: format!("document {position} has an empty id"),
            });
        }

        let mut store = self.documents.write().await;
        for document in documents {
            store.insert(document.id().to_string(), document.clone());
        }
        debug!(count = documents.len(), "uploaded documents to in-memory store");
        Ok(())
    }

    async fn delete(&self, ids: &[&str]) -> Result<()> {
        let mut store = self.documents.write().await;
        for id in ids {
            store.remove(*id);
        }
        Ok(())
    }

    async fn search(&self, request: &SearchRequest) -> Result<Vec<SearchResult>> {
        let filter = request.filter.as_deref().map(parse_filter).transpose()?;
        if request.mode != SearchMode::Vector {
            debug!(mode = %request.mode, "in-memory store ranks hybrid modes by vector only");
        }

        let store = self.documents.read().await;
        let query = &request.vector.value;

        let mut scored: Vec<SearchResult> = store
            .values()
            .filter(|doc| match &filter {
                Some((field, expected)) => doc
                    .fields()
                    .any(|(f, v)| f.as_str() == field && v.as_str() == Some(expected.as_str())),
                None => true,
            })
            .filter_map(|doc| {
                let vector = doc.vector(request.vector.field);
                if vector.len() != query.len() {
                    return None;
                }
                Some(SearchResult {
                    id: doc.id().to_string(),
                    score: cosine_similarity(&vector, query),
                    fields: project(doc, &request.select),
                })
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal).then(a.id.cmp(&b.id))
        });
        scored.truncate(request.vector.k);
        Ok(scored)
    }
}
