//! Question answering over the knowledge base.
//!
//! The [`AnswerPipeline`] runs one conversational turn:
//!
//! 1. When the conversation has history, the completion model condenses the
//!    follow-up question into search keywords.
//! 2. The [`KbRetriever`] searches the index with those keywords.
//! 3. A [`TokenWindow`] trims the user's own question, history,
//!    pre-context and retrieved context to the completion model's limit.
//!    The keywords from step 1 only drive retrieval.
//! 4. The rendered prompt is completed with `max_output_tokens` reserved.
//!
//! # Example
//!
//! ```rust,ignore
//! use kb_rag::{AnswerPipeline, AnswerRequest};
//!
//! let pipeline = AnswerPipeline::builder()
//!     .retriever(Arc::new(retriever))
//!     .completion_provider(Arc::new(completion))
//!     .tokenizer(Arc::new(tokenizer))
//!     .build()?;
//!
//! let answer = pipeline.answer(&AnswerRequest::new("how do I reset it?")).await?;
//! println!("{}", answer.text);
//! ```

use std::sync::Arc;

use tracing::{debug, error, info};

use crate::completion::CompletionProvider;
use crate::error::{KbError, Result};
use crate::prompt::{PromptTemplate, SimplePromptTemplate, query_rewrite_prompt};
use crate::retriever::{KbRetriever, Retrieval, SearchOptions};
use crate::search::find_image_url;
use crate::tokenizer::Tokenizer;
use crate::window::{PromptSegments, TokenWindow, WindowedPrompt};

/// One question with its conversational setting.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnswerRequest {
    /// The user's question.
    pub query: String,
    /// The conversation so far, oldest first.
    pub history: String,
    /// Material placed before the retrieved context.
    pub pre_context: String,
    /// Search options for the retrieval step.
    pub options: SearchOptions,
}

impl AnswerRequest {
    /// A request with no history.
    pub fn new(query: impl Into<String>) -> Self {
        Self { query: query.into(), ..Self::default() }
    }

    /// Set the conversation history.
    pub fn with_history(mut self, history: impl Into<String>) -> Self {
        self.history = history.into();
        self
    }

    /// Set the pre-context.
    pub fn with_pre_context(mut self, pre_context: impl Into<String>) -> Self {
        self.pre_context = pre_context.into();
        self
    }

    /// Set the search options.
    pub fn with_options(mut self, options: SearchOptions) -> Self {
        self.options = options;
        self
    }
}

/// The outcome of one turn.
#[derive(Debug, Clone, PartialEq)]
pub struct Answer {
    /// The model's answer.
    pub text: String,
    /// The prompt that produced it.
    pub prompt: String,
    /// Windowing accounting for the prompt.
    pub windowed: WindowedPrompt,
    /// The query the index was searched with; the rewritten keywords for
    /// a follow-up, otherwise the question itself.
    pub search_query: String,
    /// The retrieval the context came from.
    pub retrieval: Retrieval,
}

/// Orchestrates rewrite, retrieval, windowing and completion.
///
/// Construct one via [`AnswerPipeline::builder()`].
pub struct AnswerPipeline {
    retriever: Arc<KbRetriever>,
    completion_provider: Arc<dyn CompletionProvider>,
    tokenizer: Arc<dyn Tokenizer>,
    template: Arc<dyn PromptTemplate>,
}

impl AnswerPipeline {
    /// Create a new [`AnswerPipelineBuilder`].
    pub fn builder() -> AnswerPipelineBuilder {
        AnswerPipelineBuilder::default()
    }

    /// Return a reference to the retriever.
    pub fn retriever(&self) -> &Arc<KbRetriever> {
        &self.retriever
    }

    /// The query used for retrieval: the question itself, or search keywords
    /// condensed from the question and the history.
    ///
    /// An image link in the question is kept so that image-aware search
    /// still sees it.
    pub async fn search_query(&self, query: &str, history: &str) -> Result<String> {
        if history.trim().is_empty() {
            return Ok(query.to_string());
        }

        let prompt = query_rewrite_prompt(history, query);
        let max_tokens = self.retriever.config().max_query_tokens;
        let keywords = self.completion_provider.complete(&prompt, max_tokens).await.map_err(|e| {
            error!(error = %e, "query rewrite failed");
            KbError::Pipeline(format!("query rewrite failed: {e}"))
        })?;

        let keywords = keywords.trim();
        if keywords.is_empty() {
            debug!("query rewrite returned nothing, searching with the question");
            return Ok(query.to_string());
        }

        let rewritten = match find_image_url(query) {
            Some(url) if !keywords.contains(url) => format!("{keywords} {url}"),
            _ => keywords.to_string(),
        };
        debug!(search_query = %rewritten, "rewrote follow-up question");
        Ok(rewritten)
    }

    /// Answer one question.
    ///
    /// A follow-up is rewritten into search keywords (see
    /// [`search_query`](Self::search_query)) but those keywords only pick
    /// the context. The prompt is windowed and rendered with
    /// `request.query` as asked, next to the history it refers to, so
    /// [`Answer::prompt`] and [`Answer::search_query`] differ after a
    /// rewrite.
    ///
    /// # Errors
    ///
    /// Returns [`KbError::Pipeline`] if the rewrite or the completion fails,
    /// and propagates retrieval and tokenizer errors unchanged.
    pub async fn answer(&self, request: &AnswerRequest) -> Result<Answer> {
        let search_query = self.search_query(&request.query, &request.history).await?;
        let retrieval = self.retriever.search(&search_query, &request.options).await?;

        let config = self.retriever.config();
        let window = TokenWindow::new(self.tokenizer.as_ref(), config.segment_limits());
        let segments = PromptSegments {
            query: request.query.clone(),
            history: request.history.clone(),
            pre_context: request.pre_context.clone(),
            context: retrieval.context_text(),
        };
        let windowed = window.fit_template(segments, self.template.as_ref())?;
        let prompt = self.template.render(&windowed.segments);

        let text = self
            .completion_provider
            .complete(&prompt, config.max_output_tokens)
            .await
            .map_err(|e| {
                error!(error = %e, "completion failed");
                KbError::Pipeline(format!("completion failed: {e}"))
            })?;

        info!(
            result_count = retrieval.results.len(),
            prompt_tokens = windowed.prompt_tokens(),
            context_tokens = windowed.context_tokens,
            "answered question"
        );

        Ok(Answer { text, prompt, windowed, search_query, retrieval })
    }
}

/// Builder for constructing an [`AnswerPipeline`].
///
/// The template defaults to [`SimplePromptTemplate`]; everything else is
/// required.
#[derive(Default)]
pub struct AnswerPipelineBuilder {
    retriever: Option<Arc<KbRetriever>>,
    completion_provider: Option<Arc<dyn CompletionProvider>>,
    tokenizer: Option<Arc<dyn Tokenizer>>,
    template: Option<Arc<dyn PromptTemplate>>,
}

impl AnswerPipelineBuilder {
    /// Set the retriever.
    pub fn retriever(mut self, retriever: Arc<KbRetriever>) -> Self {
        self.retriever = Some(retriever);
        self
    }

    /// Set the completion model.
    pub fn completion_provider(mut self, provider: Arc<dyn CompletionProvider>) -> Self {
        self.completion_provider = Some(provider);
        self
    }

    /// Set the completion model's tokenizer; its hard limit bounds the prompt.
    pub fn tokenizer(mut self, tokenizer: Arc<dyn Tokenizer>) -> Self {
        self.tokenizer = Some(tokenizer);
        self
    }

    /// Replace the prompt template.
    pub fn template(mut self, template: Arc<dyn PromptTemplate>) -> Self {
        self.template = Some(template);
        self
    }

    /// Build the [`AnswerPipeline`].
    ///
    /// # Errors
    ///
    /// Returns [`KbError::Config`] if a required field is missing.
    pub fn build(self) -> Result<AnswerPipeline> {
        let retriever =
            self.retriever.ok_or_else(|| KbError::Config("retriever is required".into()))?;
        let completion_provider = self
            .completion_provider
            .ok_or_else(|| KbError::Config("completion_provider is required".into()))?;
        let tokenizer =
            self.tokenizer.ok_or_else(|| KbError::Config("tokenizer is required".into()))?;
        let template = self.template.unwrap_or_else(|| Arc::new(SimplePromptTemplate));

        Ok(AnswerPipeline { retriever, completion_provider, tokenizer, template })
    }
}
