//! Prompt templates for the completion backend.

use crate::tokenizer::Tokenizer;
use crate::window::PromptSegments;

/// Renders the four prompt segments into the text sent to the model.
pub trait PromptTemplate: Send + Sync {
    /// Render the final prompt.
    fn render(&self, segments: &PromptSegments) -> String;

    /// Token length of the template's fixed text: the rendering of four
    /// empty segments.
    fn empty_length(&self, tokenizer: &dyn Tokenizer) -> usize {
        tokenizer.count(&self.render(&PromptSegments::default()))
    }
}

const SYSTEM_MESSAGE: &str = "The assistant answers questions using only the information in the \
Context below. If the Context does not contain the answer, the assistant says it does not know.";

/// The default question-answering layout: system message, retrieved context,
/// pre-context, conversation history, then the question.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimplePromptTemplate;

impl PromptTemplate for SimplePromptTemplate {
    fn render(&self, segments: &PromptSegments) -> String {
        format!(
            "{SYSTEM_MESSAGE}\n\nContext:\n{}\n\n{}\n\nCurrent Conversation:\n{}\n\nQuestion: {}\nAnswer:",
            segments.context, segments.pre_context, segments.history, segments.query
        )
    }
}

/// Prompt asking the model to condense a follow-up question and the
/// conversation so far into search keywords.
pub fn query_rewrite_prompt(history: &str, question: &str) -> String {
    format!(
        "The assistant is a super helpful assistant that plays the role of a linguistic \
professor and has ultra high attention to details.\n\n\
Current Conversation:\n{history}\n\n\
Question: {question}\n\n\
From the above Question and Current Conversation, output search keywords to use in a search \
engine to get an answer for the Question. If the Question is not related to the Current \
Conversation, then do not use the Current Conversation when generating the Search Keywords.\n\
Search Keywords:"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::CharTokenizer;

    #[test]
    fn test_render_places_segments() {
        let segments = PromptSegments {
            query: "Q?".to_string(),
            history: "H".to_string(),
            pre_context: "P".to_string(),
            context: "C".to_string(),
        };
        let prompt = SimplePromptTemplate.render(&segments);
        assert!(prompt.contains("Context:\nC\n"));
        assert!(prompt.contains("Current Conversation:\nH\n"));
        assert!(prompt.ends_with("Question: Q?\nAnswer:"));
    }

    #[test]
    fn test_empty_length_is_additive_for_char_tokens() {
        let tokenizer = CharTokenizer::new("test", 4096);
        let empty = SimplePromptTemplate.empty_length(&tokenizer);
        let segments = PromptSegments {
            query: "abc".to_string(),
            history: "de".to_string(),
            pre_context: String::new(),
            context: "f".to_string(),
        };
        let full = tokenizer.count(&SimplePromptTemplate.render(&segments));
        assert_eq!(full, empty + 6);
    }

    #[test]
    fn test_rewrite_prompt_mentions_inputs() {
        let prompt = query_rewrite_prompt("we talked about crabs", "and their shells?");
        assert!(prompt.contains("we talked about crabs"));
        assert!(prompt.contains("Question: and their shells?"));
        assert!(prompt.ends_with("Search Keywords:"));
    }
}
