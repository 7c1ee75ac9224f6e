//! Tokenizer trait used for token-budget accounting.
//!
//! Token counts depend on the model's encoding, not on character count, so
//! every budget computation goes through a [`Tokenizer`]. Two
//! implementations are provided:
//!
//! - [`CharTokenizer`]: one token per Unicode scalar value; exact and
//!   dependency free, suited to tests and to models without a published
//!   encoding
//! - [`TiktokenTokenizer`]: OpenAI BPE encodings (requires the `tiktoken`
//!   feature)

use tracing::trace;

use crate::error::{KbError, Result};

/// Encodes text to token ids and back for one model.
pub trait Tokenizer: Send + Sync {
    /// The model this tokenizer belongs to.
    fn model_name(&self) -> &str;

    /// The model's hard limit on prompt plus completion tokens.
    fn max_tokens(&self) -> usize;

    /// Encode text into token ids.
    fn encode(&self, text: &str) -> Vec<u32>;

    /// Decode token ids into text.
    fn decode(&self, tokens: &[u32]) -> Result<String>;

    /// Number of tokens `text` encodes to.
    fn count(&self, text: &str) -> usize {
        self.encode(text).len()
    }

    /// Keep at most the first `max_tokens` tokens of `text`.
    ///
    /// Text that already fits is returned unchanged; otherwise the token
    /// prefix is decoded back to text. A byte-level prefix may end inside a
    /// multi-byte character, or re-encode to more tokens than it was cut
    /// at; the cut then steps back one token at a time, so the result always
    /// decodes and never counts more than `max_tokens`. A budget of zero
    /// yields an empty string.
    ///
    /// # Errors
    ///
    /// Only if even the empty prefix fails to decode.
    fn truncate(&self, text: &str, max_tokens: usize) -> Result<String> {
        let tokens = self.encode(text);
        if tokens.len() <= max_tokens {
            return Ok(text.to_string());
        }

        let mut cut = max_tokens;
        while cut > 0 {
            match self.decode(&tokens[..cut]) {
                Ok(prefix) if self.count(&prefix) <= max_tokens => return Ok(prefix),
                _ => trace!(model = self.model_name(), cut, "token prefix does not round-trip, stepping back"),
            }
            cut -= 1;
        }
        self.decode(&[])
    }
}

/// A tokenizer that maps every Unicode scalar value to one token.
///
/// `decode(encode(x)) == x` holds for every string.
#[derive(Debug, Clone)]
pub struct CharTokenizer {
    model: String,
    max_tokens: usize,
}

impl CharTokenizer {
    /// Create a tokenizer reporting `max_tokens` as the model limit.
    pub fn new(model: impl Into<String>, max_tokens: usize) -> Self {
        Self { model: model.into(), max_tokens }
    }
}

impl Tokenizer for CharTokenizer {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    fn encode(&self, text: &str) -> Vec<u32> {
        text.chars().map(u32::from).collect()
    }

    fn decode(&self, tokens: &[u32]) -> Result<String> {
        tokens
            .iter()
            .map(|&t| {
                char::from_u32(t).ok_or_else(|| KbError::Tokenizer {
                    model: self.model.clone(),
                    message: format!("token {t} is not a valid character"),
                })
            })
            .collect()
    }

    fn count(&self, text: &str) -> usize {
        text.chars().count()
    }
}

#[cfg(feature = "tiktoken")]
pub use self::bpe::TiktokenTokenizer;

#[cfg(feature = "tiktoken")]
mod bpe {
    use tiktoken_rs::CoreBPE;
    use tracing::debug;

    use super::Tokenizer;
    use crate::error::{KbError, Result};

    /// An OpenAI BPE tokenizer backed by [`tiktoken_rs`].
    pub struct TiktokenTokenizer {
        bpe: CoreBPE,
        model: String,
        max_tokens: usize,
    }

    impl TiktokenTokenizer {
        /// Load the encoding used by an OpenAI model (e.g. `gpt-4`,
        /// `text-embedding-ada-002`).
        ///
        /// The hard limit comes from the model's published context size.
        pub fn for_model(model: &str) -> Result<Self> {
            let bpe = tiktoken_rs::get_bpe_from_model(model).map_err(|e| KbError::Tokenizer {
                model: model.to_string(),
                message: format!("no encoding for model: {e}"),
            })?;
            let max_tokens = tiktoken_rs::model::get_context_size(model);
            debug!(model, max_tokens, "loaded tiktoken encoding");
            Ok(Self { bpe, model: model.to_string(), max_tokens })
        }

        /// Override the model's hard limit (e.g. for a deployment with a
        /// smaller context window).
        pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
            self.max_tokens = max_tokens;
            self
        }
    }

    impl Tokenizer for TiktokenTokenizer {
        fn model_name(&self) -> &str {
            &self.model
        }

        fn max_tokens(&self) -> usize {
            self.max_tokens
        }

        fn encode(&self, text: &str) -> Vec<u32> {
            self.bpe.encode_with_special_tokens(text).into_iter().map(|t| t as u32).collect()
        }

        fn decode(&self, tokens: &[u32]) -> Result<String> {
            self.bpe.decode(tokens.iter().map(|&t| t as _).collect()).map_err(|e| {
                KbError::Tokenizer { model: self.model.clone(), message: e.to_string() }
            })
        }
    }
}
