//! Document database adapter: content records and embedding backups.
//!
//! Records are JSON objects partitioned by `categoryId`. Content records use
//! the configured content category; embedding backups use the embedding
//! category so that an index can be rebuilt from the database with
//! [`DocumentRepository::restore_embeddings`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::config::KbConfig;
use crate::document::{KbDocument, KbField, now_timestamp};
use crate::error::{KbError, Result};
use crate::vectorstore::VectorStore;

/// Base of the placeholder `doc_url` given to records that arrive without one.
pub const PLACEHOLDER_DOC_URL: &str = "https://localhost/documents/";

/// A document database partitioned by `categoryId`.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert or replace a record. The record must carry string `id` and
    /// `categoryId` values.
    async fn upsert(&self, record: Map<String, Value>) -> Result<()>;

    /// All records in one partition.
    async fn query_category(&self, category: &str) -> Result<Vec<Map<String, Value>>>;
}

fn string_key<'a>(record: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    record.get(key).and_then(Value::as_str).filter(|v| !v.is_empty())
}

/// Fill the bookkeeping fields of an incoming record.
///
/// - `id` defaults to a random UUID
/// - `categoryId` is set to `category`
/// - `timestamp` defaults to now
/// - `doc_url` defaults to a placeholder URL
/// - `content` is removed
pub(crate) fn stamp_record(mut record: Map<String, Value>, category: &str) -> Map<String, Value> {
    if string_key(&record, "id").is_none() {
        record.insert("id".into(), Value::String(uuid::Uuid::new_v4().to_string()));
    }
    record.insert("categoryId".into(), Value::String(category.to_string()));
    if !record.contains_key("timestamp") {
        record.insert("timestamp".into(), Value::String(now_timestamp()));
    }
    if string_key(&record, "doc_url").is_none() {
        let url = format!("{PLACEHOLDER_DOC_URL}{}", uuid::Uuid::new_v4());
        record.insert("doc_url".into(), Value::String(url));
    }
    record.remove("content");
    record
}

/// Per-item result of a batch operation that tolerates partial failure.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    /// Ids written successfully.
    pub succeeded: Vec<String>,
    /// Ids that failed, with the error each produced.
    pub failed: Vec<(String, KbError)>,
}

impl BatchOutcome {
    /// Whether every item succeeded.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// Total number of items attempted.
    pub fn attempted(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }
}

/// Content and embedding operations over an injected [`DocumentStore`].
pub struct DocumentRepository {
    store: Arc<dyn DocumentStore>,
    config: KbConfig,
}

impl DocumentRepository {
    /// Create a repository over `store`.
    pub fn new(store: Arc<dyn DocumentStore>, config: KbConfig) -> Self {
        Self { store, config }
    }

    /// Store a content record in the content partition.
    ///
    /// Returns the id the record was stored under.
    ///
    /// # Errors
    ///
    /// Propagates the store's error; the record is not retried.
    pub async fn store_contents(&self, data: Map<String, Value>) -> Result<String> {
        let record = stamp_record(data, &self.config.category_id);
        let id = string_key(&record, "id").unwrap_or_default().to_string();

        self.store.upsert(record).await.inspect_err(|e| {
            error!(document.id = %id, error = %e, "failed to store document contents");
        })?;
        info!(document.id = %id, "stored document contents");
        Ok(id)
    }

    /// Back up embedding documents into the embedding partition.
    ///
    /// Every document is attempted; failures are collected rather than
    /// aborting the batch.
    pub async fn backup_embeddings(&self, documents: Vec<Map<String, Value>>) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        for mut record in documents {
            record.insert(
                "categoryId".into(),
                Value::String(self.config.embedding_category_id.clone()),
            );
            let id = string_key(&record, "id").unwrap_or_default().to_string();
            match self.store.upsert(record).await {
                Ok(()) => outcome.succeeded.push(id),
                Err(e) => {
                    warn!(document.id = %id, error = %e, "embedding backup failed");
                    outcome.failed.push((id, e));
                }
            }
        }
        info!(
            succeeded = outcome.succeeded.len(),
            failed = outcome.failed.len(),
            "embedding backup finished"
        );
        outcome
    }

    /// Load the embedding partition into `vector_store`.
    ///
    /// System keys (leading `_`) are dropped; records that do not fit the
    /// document schema are skipped with a warning. Returns the number of
    /// documents uploaded.
    pub async fn restore_embeddings(&self, vector_store: &dyn VectorStore) -> Result<usize> {
        let records = self.store.query_category(&self.config.embedding_category_id).await?;

        let documents: Vec<KbDocument> = records
            .into_iter()
            .filter_map(|mut record| {
                record.retain(|key, _| !key.starts_with('_'));
                match KbDocument::try_from(record) {
                    Ok(doc) if !doc.id().is_empty() => Some(doc),
                    Ok(_) => {
                        warn!("skipping embedding record without id");
                        None
                    }
                    Err(e) => {
                        warn!(error = %e, "skipping embedding record outside the schema");
                        None
                    }
                }
            })
            .collect();

        if !documents.is_empty() {
            vector_store.upload(&documents).await?;
        }
        info!(count = documents.len(), "restored embeddings into the vector store");
        Ok(documents.len())
    }
}

/// An in-memory [`DocumentStore`] for development and testing.
#[derive(Debug, Default)]
pub struct InMemoryDocumentStore {
    partitions: RwLock<HashMap<String, HashMap<String, Map<String, Value>>>>,
}

impl InMemoryDocumentStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch one record.
    pub async fn get(&self, category: &str, id: &str) -> Option<Map<String, Value>> {
        self.partitions.read().await.get(category).and_then(|p| p.get(id)).cloned()
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn upsert(&self, record: Map<String, Value>) -> Result<()> {
        let missing = |key: &str| KbError::DocumentStore {
            backend: "InMemory".to_string(),
            message: format!("record has no string '{key}'"),
        };
        let id = string_key(&record, KbField::Id.as_str()).ok_or_else(|| missing("id"))?;
        let category = string_key(&record, KbField::CategoryId.as_str())
            .ok_or_else(|| missing("categoryId"))?;

        let (id, category) = (id.to_string(), category.to_string());
        self.partitions.write().await.entry(category).or_default().insert(id, record);
        Ok(())
    }

    async fn query_category(&self, category: &str) -> Result<Vec<Map<String, Value>>> {
        let partitions = self.partitions.read().await;
        let mut records: Vec<_> =
            partitions.get(category).map(|p| p.values().cloned().collect()).unwrap_or_default();
        records.sort_by(|a: &Map<String, Value>, b| {
            string_key(a, "id").unwrap_or_default().cmp(string_key(b, "id").unwrap_or_default())
        });
        Ok(records)
    }
}
