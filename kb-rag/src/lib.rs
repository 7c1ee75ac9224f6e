//! # kb-rag
//!
//! Knowledge-base retrieval core for question answering over managed cloud
//! services.
//!
//! ## Overview
//!
//! The crate answers a question by searching a vector index, merging ranked
//! hits from independent sources, and fitting the retrieved context into the
//! completion model's token window:
//!
//! - [`interleave`] - round-robin merge of ranked lists with identifier
//!   deduplication
//! - [`TokenWindow`] - per-segment truncation and context budgeting
//! - [`KbRetriever`] - vector, hybrid and image-aware search
//! - [`AnswerPipeline`] - rewrite, retrieve, window and complete
//! - [`DocumentRepository`] / [`BlobRepository`] - document database and blob
//!   storage adapters
//!
//! Backends sit behind traits ([`VectorStore`], [`EmbeddingProvider`],
//! [`VisionProvider`], [`CompletionProvider`], [`DocumentStore`],
//! [`BlobStore`]) so that every component can run against the in-memory
//! implementations in tests.
//!
//! ## Features
//!
//! | Feature | Enables |
//! |---------|---------|
//! | `openai` | `OpenAIEmbeddingProvider`, `OpenAICompletionProvider` |
//! | `azure-search` | `CognitiveSearchStore` |
//! | `azure-vision` | `AzureVisionProvider` |
//! | `tiktoken` | `TiktokenTokenizer` |
//! | `full` | all of the above |
//!
//! ## Quick Start
//!
//! ```rust
//! use kb_rag::{CharTokenizer, PromptSegments, SegmentLimits, TokenWindow};
//!
//! let tokenizer = CharTokenizer::new("test-model", 4096);
//! let limits = SegmentLimits {
//!     max_query_tokens: 500,
//!     max_history_tokens: 1000,
//!     max_pre_context_tokens: 500,
//!     reserved_output_tokens: 256,
//! };
//! let segments = PromptSegments {
//!     query: "a".repeat(500),
//!     context: "b".repeat(5000),
//!     ..PromptSegments::default()
//! };
//!
//! let windowed = TokenWindow::new(&tokenizer, limits).fit(segments, 50).unwrap();
//! assert_eq!(windowed.context_tokens, 3289);
//! ```

pub mod answer;
pub mod blob;
pub mod completion;
pub mod config;
pub mod docstore;
pub mod document;
pub mod embedding;
pub mod error;
pub mod inmemory;
pub mod interleave;
pub mod prompt;
pub mod retriever;
pub mod search;
pub mod tokenizer;
pub mod vectorstore;
pub mod vision;
pub mod window;

#[cfg(feature = "azure-vision")]
pub mod azure_vision;
#[cfg(feature = "azure-search")]
pub mod cogsearch;
#[cfg(feature = "openai")]
pub mod openai;

pub use answer::{Answer, AnswerPipeline, AnswerPipelineBuilder, AnswerRequest};
pub use blob::{BlobRepository, BlobStore, InMemoryBlobStore, container_from_url, filename_from_url};
pub use completion::CompletionProvider;
pub use config::{KbConfig, KbConfigBuilder};
pub use docstore::{BatchOutcome, DocumentRepository, DocumentStore, InMemoryDocumentStore};
pub use document::{KbDocument, KbField, SearchResult};
pub use embedding::EmbeddingProvider;
pub use error::{KbError, Result};
pub use inmemory::InMemoryVectorStore;
pub use interleave::{Identified, interleave};
pub use prompt::{PromptTemplate, SimplePromptTemplate};
pub use retriever::{KbRetriever, KbRetrieverBuilder, Retrieval, SearchOptions};
pub use search::{SearchMode, SearchRequest, VectorField, VectorQuery, find_image_url};
pub use tokenizer::{CharTokenizer, Tokenizer};
pub use vectorstore::VectorStore;
pub use vision::VisionProvider;
pub use window::{PromptSegments, SegmentLimits, TokenWindow, WindowedPrompt, context_budget};

#[cfg(feature = "azure-vision")]
pub use azure_vision::AzureVisionProvider;
#[cfg(feature = "azure-search")]
pub use cogsearch::CognitiveSearchStore;
#[cfg(feature = "openai")]
pub use openai::{OpenAICompletionProvider, OpenAIEmbeddingProvider};
#[cfg(feature = "tiktoken")]
pub use tokenizer::TiktokenTokenizer;
