//! Retriever tests against the in-memory store with deterministic fakes.

mod common;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use common::{FakeVision, IMAGE_URL, KeywordEmbedder, config, document, pet_store, retriever};
use kb_rag::retriever::IMAGE_ANALYSIS_PREFIX;
use kb_rag::{
    CharTokenizer, InMemoryVectorStore, KbDocument, KbError, KbField, KbRetriever, SearchMode,
    SearchOptions, SearchRequest, SearchResult, VectorField, VectorStore,
};

/// Forwards to an in-memory store and keeps every search request.
struct RecordingStore {
    inner: Arc<InMemoryVectorStore>,
    requests: Mutex<Vec<SearchRequest>>,
}

impl RecordingStore {
    async fn new() -> Self {
        Self { inner: pet_store().await, requests: Mutex::new(Vec::new()) }
    }

    fn requests(&self) -> Vec<SearchRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl VectorStore for RecordingStore {
    async fn upload(&self, documents: &[KbDocument]) -> kb_rag::Result<()> {
        self.inner.upload(documents).await
    }

    async fn delete(&self, ids: &[&str]) -> kb_rag::Result<()> {
        self.inner.delete(ids).await
    }

    async fn search(&self, request: &SearchRequest) -> kb_rag::Result<Vec<SearchResult>> {
        self.requests.lock().unwrap().push(request.clone());
        self.inner.search(request).await
    }
}

fn ids(results: &[SearchResult]) -> Vec<&str> {
    results.iter().map(|r| r.id.as_str()).collect()
}

#[tokio::test]
async fn text_search_ranks_by_item_vector() {
    let retriever = retriever(false).await;
    let retrieval =
        retriever.search("how much do cats sleep?", &SearchOptions::default()).await.unwrap();

    assert_eq!(ids(&retrieval.results), ["cat-doc", "dog-doc"]);
    assert!(retrieval.image_analysis.is_none());
    assert_eq!(retrieval.results[0].text(), Some("Cats sleep most of the day."));
    assert!(retrieval.results[0].fields.get("item_vector").is_none());
}

#[tokio::test]
async fn image_question_interleaves_image_hits_first() {
    let retriever = retriever(true).await;
    let question = format!("what animal is in {IMAGE_URL} ?");

    let retrieval = retriever.search(&question, &SearchOptions::default()).await.unwrap();

    // Image search prefers dog-doc, text search (on the description) cat-doc.
    assert_eq!(ids(&retrieval.results), ["dog-doc", "cat-doc"]);

    let analysis = retrieval.image_analysis.as_deref().unwrap();
    assert!(!analysis.contains(IMAGE_URL));
    assert!(analysis.ends_with("a photo of a cat"));

    let context = retrieval.context();
    assert!(context[0].starts_with(IMAGE_ANALYSIS_PREFIX));
    assert_eq!(context.len(), 3);
    assert!(context[1].starts_with("Dogs need daily walks."));
}

#[tokio::test]
async fn image_search_keywords_exclude_the_link() {
    let store = Arc::new(RecordingStore::new().await);
    let retriever = KbRetriever::builder()
        .config(config(2))
        .vector_store(store.clone())
        .embedding_provider(Arc::new(KeywordEmbedder))
        .tokenizer(Arc::new(CharTokenizer::new("embedding-model", 8191)))
        .vision(Arc::new(FakeVision))
        .build()
        .unwrap();
    let options = SearchOptions { mode: SearchMode::Hybrid, ..SearchOptions::default() };

    retriever.search(&format!("what animal is in {IMAGE_URL} ?"), &options).await.unwrap();

    let requests = store.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].vector.field, VectorField::Item);
    assert_eq!(requests[1].vector.field, VectorField::CvImage);
    for request in &requests {
        assert_eq!(request.mode, SearchMode::Hybrid);
        assert_eq!(request.text, "what animal is in  ?\na photo of a cat");
        assert!(!request.text.contains(IMAGE_URL));
    }

    store.requests.lock().unwrap().clear();
    retriever.search_similar_images(&format!("more like {IMAGE_URL}"), &options).await.unwrap();
    let requests = store.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].mode, SearchMode::Vector);
    assert_eq!(requests[0].text, "more like ");
}

#[tokio::test]
async fn image_link_without_vision_is_plain_text() {
    let retriever = retriever(false).await;
    let question = format!("is this a dog? {IMAGE_URL}");

    let retrieval = retriever.search(&question, &SearchOptions::default()).await.unwrap();

    assert!(retrieval.image_analysis.is_none());
    assert_eq!(ids(&retrieval.results), ["dog-doc", "cat-doc"]);
}

#[tokio::test]
async fn vision_fields_require_a_provider() {
    let retriever = retriever(false).await;
    let options = SearchOptions::parse("vector", Some("cv_text_vector")).unwrap();

    let err = retriever.search("cats", &options).await.unwrap_err();
    assert!(matches!(err, KbError::Config(_)));
}

#[tokio::test]
async fn cv_text_vector_search_uses_vision_embeddings() {
    let retriever = retriever(true).await;
    let options = SearchOptions { vector_field: VectorField::CvText, ..SearchOptions::default() };

    let retrieval = retriever.search("dog food", &options).await.unwrap();
    assert_eq!(retrieval.results[0].id, "dog-doc");
}

#[tokio::test]
async fn similar_images_needs_a_link() {
    let retriever = retriever(true).await;
    let options = SearchOptions::default();

    assert!(retriever.search_similar_images("no image here", &options).await.unwrap().is_empty());

    let results = retriever
        .search_similar_images(&format!("find images like {IMAGE_URL}"), &options)
        .await
        .unwrap();
    assert_eq!(ids(&results), ["dog-doc", "cat-doc"]);
}

#[tokio::test]
async fn filter_and_select_reach_the_store() {
    let retriever = retriever(false).await;
    let options = SearchOptions {
        mode: SearchMode::Hybrid,
        filter: Some("text eq 'Dogs need daily walks.'".to_string()),
        select: Some(vec!["doc_url".to_string()]),
        ..SearchOptions::default()
    };

    let retrieval = retriever.search("cats", &options).await.unwrap();

    assert_eq!(ids(&retrieval.results), ["dog-doc"]);
    let fields: Vec<&String> = retrieval.results[0].fields.keys().collect();
    assert_eq!(fields, ["doc_url"]);
    // Without a text field the hit contributes no context.
    assert!(retrieval.context().is_empty());
}

#[tokio::test]
async fn long_queries_are_truncated_before_embedding() {
    // "dog" sits past the 5-token query cap, so only "cat" is embedded.
    let config = kb_rag::KbConfig::builder().max_query_tokens(5).build().unwrap();
    let retriever = KbRetriever::builder()
        .config(config)
        .vector_store(pet_store().await)
        .embedding_provider(Arc::new(KeywordEmbedder))
        .tokenizer(Arc::new(CharTokenizer::new("embedding-model", 8191)))
        .build()
        .unwrap();

    let retrieval = retriever.search("cats and dogs", &SearchOptions::default()).await.unwrap();
    assert_eq!(retrieval.results[0].id, "cat-doc");
}

#[tokio::test]
async fn upload_assigns_missing_ids_and_delete_removes() {
    let retriever = retriever(false).await;

    let mut fresh = document("", "Parrots can talk.", &[0.0, 0.0, 1.0], &[0.0, 0.0, 1.0]);
    fresh.set(KbField::Id, "");
    let uploaded = retriever.upload_documents(vec![fresh]).await.unwrap();
    let new_id = uploaded[0].id().to_string();
    assert_eq!(new_id.len(), 36);

    let options = SearchOptions::default();
    let hits = retriever.search("parrots", &options).await.unwrap();
    assert!(hits.results.iter().any(|r| r.id == new_id));

    retriever.delete_documents(&[new_id.as_str()]).await.unwrap();
    let hits = retriever.search("parrots", &options).await.unwrap();
    assert!(hits.results.iter().all(|r| r.id != new_id));
}

#[tokio::test]
async fn builder_requires_collaborators() {
    let err = KbRetriever::builder().build().err().unwrap();
    assert!(matches!(err, KbError::Config(_)));

    let store: Arc<dyn VectorStore> = pet_store().await;
    let err = KbRetriever::builder().vector_store(store).build().err().unwrap();
    assert!(matches!(err, KbError::Config(_)));
}

#[tokio::test]
async fn documents_from_config_defaults_are_searchable() {
    let config = kb_rag::KbConfig::builder().process_images(true).build().unwrap();
    let mut doc = KbDocument::new(&config);
    doc.set(KbField::Id, "blank");
    assert_eq!(doc.vector(VectorField::CvImage).len(), kb_rag::document::CV_VECTOR_DIMENSIONS);
    assert!(doc.vector(VectorField::Item).is_empty());

    let store = pet_store().await;
    store.upload(&[doc]).await.unwrap();
    assert_eq!(store.len().await, 3);
}
