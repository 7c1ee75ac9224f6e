//! Vector store trait for the knowledge-base search index.

use async_trait::async_trait;

use crate::document::{KbDocument, SearchResult};
use crate::error::Result;
use crate::search::SearchRequest;

/// A search index holding [`KbDocument`]s with their embeddings.
///
/// The index schema is provisioned outside this crate; implementations only
/// upload, delete and query documents.
///
/// # Example
///
/// ```rust,ignore
/// use kb_rag::{InMemoryVectorStore, VectorStore};
///
/// let store = InMemoryVectorStore::new();
/// store.upload(&documents).await?;
/// let results = store.search(&request).await?;
/// ```
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Upload documents, replacing any with the same id.
    async fn upload(&self, documents: &[KbDocument]) -> Result<()>;

    /// Delete documents by id. Unknown ids are ignored.
    async fn delete(&self, ids: &[&str]) -> Result<()>;

    /// Run a search.
    ///
    /// Returns at most `request.vector.k` results in the backend's rank
    /// order (best first).
    async fn search(&self, request: &SearchRequest) -> Result<Vec<SearchResult>>;
}
