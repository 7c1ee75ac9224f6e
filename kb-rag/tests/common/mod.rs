//! Deterministic fakes shared by the integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use kb_rag::{
    CharTokenizer, CompletionProvider, EmbeddingProvider, InMemoryVectorStore, KbConfig,
    KbDocument, KbField, KbRetriever, Result, VisionProvider,
};

pub const IMAGE_URL: &str = "https://img.example.com/uploads/photo.png";

/// Embeds text as `[mentions cat, mentions dog, 0.1]`.
pub struct KeywordEmbedder;

pub fn keyword_vector(text: &str) -> Vec<f32> {
    let text = text.to_lowercase();
    vec![
        if text.contains("cat") { 1.0 } else { 0.0 },
        if text.contains("dog") { 1.0 } else { 0.0 },
        0.1,
    ]
}

#[async_trait]
impl EmbeddingProvider for KeywordEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(keyword_vector(text))
    }

    fn dimensions(&self) -> usize {
        3
    }
}

/// Describes every image as a cat and embeds images onto the dog axis, so
/// image search ranks the opposite way from text search.
pub struct FakeVision;

#[async_trait]
impl VisionProvider for FakeVision {
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        Ok(keyword_vector(text))
    }

    async fn embed_image(&self, _url: &str) -> Result<Vec<f32>> {
        Ok(vec![0.0, 1.0, 0.0])
    }

    async fn describe_image(&self, _url: &str) -> Result<String> {
        Ok("a photo of a cat".to_string())
    }
}

/// Records every prompt; answers rewrite prompts with `keywords` and
/// everything else with `answer`.
pub struct ScriptedCompletion {
    pub keywords: String,
    pub answer: String,
    pub calls: Mutex<Vec<(String, usize)>>,
}

impl ScriptedCompletion {
    pub fn new(keywords: &str, answer: &str) -> Self {
        Self { keywords: keywords.to_string(), answer: answer.to_string(), calls: Mutex::new(Vec::new()) }
    }

    pub fn calls(&self) -> Vec<(String, usize)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionProvider for ScriptedCompletion {
    async fn complete(&self, prompt: &str, max_tokens: usize) -> Result<String> {
        self.calls.lock().unwrap().push((prompt.to_string(), max_tokens));
        if prompt.ends_with("Search Keywords:") {
            Ok(self.keywords.clone())
        } else {
            Ok(self.answer.clone())
        }
    }
}

pub fn document(id: &str, text: &str, item: &[f32], image: &[f32]) -> KbDocument {
    let mut doc = KbDocument::default();
    doc.set(KbField::Id, id);
    doc.set(KbField::Text, text);
    doc.set(KbField::DocUrl, format!("https://acct.blob.core.windows.net/kb/{id}.pdf"));
    doc.set_vector(KbField::ItemVector, item);
    doc.set_vector(KbField::CvTextVector, item);
    doc.set_vector(KbField::CvImageVector, image);
    doc
}

/// Two documents: `cat-doc` wins text search, `dog-doc` wins image search.
pub async fn pet_store() -> Arc<InMemoryVectorStore> {
    let store = Arc::new(InMemoryVectorStore::new());
    let docs = [
        document("cat-doc", "Cats sleep most of the day.", &[1.0, 0.0, 0.1], &[1.0, 0.0, 0.0]),
        document("dog-doc", "Dogs need daily walks.", &[0.0, 1.0, 0.1], &[0.0, 1.0, 0.0]),
    ];
    kb_rag::VectorStore::upload(store.as_ref(), &docs).await.unwrap();
    store
}

pub fn config(k: usize) -> KbConfig {
    KbConfig::builder().num_top_matches(k).build().unwrap()
}

pub async fn retriever(with_vision: bool) -> KbRetriever {
    let mut builder = KbRetriever::builder()
        .config(config(2))
        .vector_store(pet_store().await)
        .embedding_provider(Arc::new(KeywordEmbedder))
        .tokenizer(Arc::new(CharTokenizer::new("embedding-model", 8191)));
    if with_vision {
        builder = builder.vision(Arc::new(FakeVision));
    }
    builder.build().unwrap()
}
