//! Token-budget windowing of prompt segments.
//!
//! A completion request shares the model's hard token limit between the
//! prompt and the reserved completion. [`TokenWindow::fit`] trims the four
//! prompt segments so that the rendered prompt always leaves room for the
//! completion:
//!
//! 1. Query, history and pre-context are each cut to their own soft cap.
//! 2. The context budget is what remains:
//!    `hard_max − reserved_output − query − history − pre_context − template − 1`.
//! 3. The retrieved context is cut to that budget, or emptied when the
//!    budget is negative.
//!
//! Every cut keeps the token prefix.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;
use crate::prompt::PromptTemplate;
use crate::tokenizer::Tokenizer;

/// Margin subtracted from the context budget for boundary rounding.
pub const SAFETY_MARGIN_TOKENS: i64 = 1;

/// Per-segment soft caps and the completion reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentLimits {
    /// Soft cap on the query.
    pub max_query_tokens: usize,
    /// Soft cap on the conversation history.
    pub max_history_tokens: usize,
    /// Soft cap on the pre-context.
    pub max_pre_context_tokens: usize,
    /// Tokens kept free for the completion.
    pub reserved_output_tokens: usize,
}

/// The variable parts of a prompt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptSegments {
    /// The user's question.
    pub query: String,
    /// The conversation so far.
    pub history: String,
    /// Material placed before the retrieved context (e.g. instructions).
    pub pre_context: String,
    /// Retrieved knowledge-base context.
    pub context: String,
}

/// Segments after windowing, with the token accounting that produced them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WindowedPrompt {
    /// The trimmed segments.
    pub segments: PromptSegments,
    /// Tokens in the trimmed query.
    pub query_tokens: usize,
    /// Tokens in the trimmed history.
    pub history_tokens: usize,
    /// Tokens in the trimmed pre-context.
    pub pre_context_tokens: usize,
    /// Tokens in the trimmed context.
    pub context_tokens: usize,
    /// Tokens in the template's fixed text.
    pub template_tokens: usize,
    /// The budget the context was cut to (zero when the fixed overhead
    /// already exceeded the limit).
    pub context_budget: usize,
}

impl WindowedPrompt {
    /// Total prompt tokens: segments plus template text.
    pub fn prompt_tokens(&self) -> usize {
        self.query_tokens
            + self.history_tokens
            + self.pre_context_tokens
            + self.context_tokens
            + self.template_tokens
    }
}

/// Tokens left for retrieved context. Negative when the fixed overhead alone
/// exceeds the limit.
pub fn context_budget(
    hard_max: usize,
    reserved_output: usize,
    query_tokens: usize,
    history_tokens: usize,
    pre_context_tokens: usize,
    template_tokens: usize,
) -> i64 {
    [reserved_output, query_tokens, history_tokens, pre_context_tokens, template_tokens]
        .into_iter()
        .fold(hard_max as i64, |remaining, used| remaining - used as i64)
        - SAFETY_MARGIN_TOKENS
}

/// Fits prompt segments into one model's token limit.
pub struct TokenWindow<'a> {
    tokenizer: &'a dyn Tokenizer,
    limits: SegmentLimits,
}

impl<'a> TokenWindow<'a> {
    /// Create a window over `tokenizer`'s hard limit.
    pub fn new(tokenizer: &'a dyn Tokenizer, limits: SegmentLimits) -> Self {
        Self { tokenizer, limits }
    }

    /// The configured limits.
    pub fn limits(&self) -> &SegmentLimits {
        &self.limits
    }

    /// Trim `segments` for a template whose fixed text is `template_tokens`
    /// long.
    ///
    /// # Errors
    ///
    /// Returns [`KbError::Tokenizer`](crate::KbError::Tokenizer) if the
    /// tokenizer cannot decode a truncated prefix. A negative context budget
    /// is not an error: the context becomes empty.
    pub fn fit(&self, segments: PromptSegments, template_tokens: usize) -> Result<WindowedPrompt> {
        let tokenizer = self.tokenizer;
        let limits = &self.limits;

        let query = tokenizer.truncate(&segments.query, limits.max_query_tokens)?;
        let history = tokenizer.truncate(&segments.history, limits.max_history_tokens)?;
        let pre_context = tokenizer.truncate(&segments.pre_context, limits.max_pre_context_tokens)?;

        let query_tokens = tokenizer.count(&query);
        let history_tokens = tokenizer.count(&history);
        let pre_context_tokens = tokenizer.count(&pre_context);

        let hard_max = tokenizer.max_tokens();
        let remaining = context_budget(
            hard_max,
            limits.reserved_output_tokens,
            query_tokens,
            history_tokens,
            pre_context_tokens,
            template_tokens,
        );
        if remaining < 0 {
            warn!(
                model = tokenizer.model_name(),
                hard_max,
                remaining,
                "fixed prompt overhead exceeds token limit, dropping context"
            );
        }
        let budget = usize::try_from(remaining).unwrap_or(0);

        let context = tokenizer.truncate(&segments.context, budget)?;
        let context_tokens = tokenizer.count(&context);

        debug!(
            model = tokenizer.model_name(),
            query_tokens,
            history_tokens,
            pre_context_tokens,
            context_tokens,
            template_tokens,
            context_budget = budget,
            "windowed prompt"
        );

        Ok(WindowedPrompt {
            segments: PromptSegments { query, history, pre_context, context },
            query_tokens,
            history_tokens,
            pre_context_tokens,
            context_tokens,
            template_tokens,
            context_budget: budget,
        })
    }

    /// Trim `segments` for `template`, measuring its fixed text first.
    pub fn fit_template(
        &self,
        segments: PromptSegments,
        template: &dyn PromptTemplate,
    ) -> Result<WindowedPrompt> {
        let template_tokens = template.empty_length(self.tokenizer);
        self.fit(segments, template_tokens)
    }
}
