//! Token-window tests with the exact character tokenizer and, behind the
//! `tiktoken` feature, a BPE encoding.

use kb_rag::prompt::{PromptTemplate, SimplePromptTemplate};
use kb_rag::tokenizer::{CharTokenizer, Tokenizer};
use kb_rag::window::{PromptSegments, SegmentLimits, TokenWindow};
use proptest::prelude::*;

fn limits(reserved: usize) -> SegmentLimits {
    SegmentLimits {
        max_query_tokens: 500,
        max_history_tokens: 1000,
        max_pre_context_tokens: 500,
        reserved_output_tokens: reserved,
    }
}

#[test]
fn context_fills_remaining_budget() {
    let tokenizer = CharTokenizer::new("test-model", 4096);
    let window = TokenWindow::new(&tokenizer, limits(256));
    let segments = PromptSegments {
        query: "a".repeat(500),
        context: "c".repeat(5000),
        ..PromptSegments::default()
    };

    let out = window.fit(segments, 50).unwrap();

    assert_eq!(out.context_budget, 3289);
    assert_eq!(out.context_tokens, 3289);
    assert_eq!(out.segments.context, "c".repeat(3289));
    assert_eq!(out.query_tokens, 500);
    assert_eq!(out.prompt_tokens() + 256 + 1, 4096);
}

#[test]
fn reservation_at_hard_limit_empties_context() {
    let tokenizer = CharTokenizer::new("test-model", 4096);
    let window = TokenWindow::new(&tokenizer, limits(4096));
    let segments = PromptSegments {
        query: "what is the refund policy?".to_string(),
        context: "policy text".to_string(),
        ..PromptSegments::default()
    };

    let out = window.fit(segments, 0).unwrap();

    assert_eq!(out.context_budget, 0);
    assert!(out.segments.context.is_empty());
    assert_eq!(out.segments.query, "what is the refund policy?");
}

#[test]
fn short_segments_pass_through_unchanged() {
    let tokenizer = CharTokenizer::new("test-model", 4096);
    let window = TokenWindow::new(&tokenizer, limits(256));
    let segments = PromptSegments {
        query: "q".to_string(),
        history: "user: hi\nassistant: hello".to_string(),
        pre_context: "Be brief.".to_string(),
        context: "Cats sleep a lot.".to_string(),
    };

    let out = window.fit(segments.clone(), 10).unwrap();
    assert_eq!(out.segments, segments);
}

#[test]
fn truncation_keeps_multibyte_prefix() {
    let tokenizer = CharTokenizer::new("test-model", 100);
    assert_eq!(tokenizer.truncate("héllo wörld", 4).unwrap(), "héll");
    assert_eq!(tokenizer.truncate("", 4).unwrap(), "");
    assert_eq!(tokenizer.truncate("abc", 0).unwrap(), "");
}

#[test]
fn rendered_prompt_matches_accounting() {
    let tokenizer = CharTokenizer::new("test-model", 2048);
    let window = TokenWindow::new(&tokenizer, limits(512));
    let segments = PromptSegments {
        query: "How long do cats sleep?".to_string(),
        history: "h".repeat(3000),
        pre_context: String::new(),
        context: "x".repeat(4000),
    };

    let out = window.fit_template(segments, &SimplePromptTemplate).unwrap();
    let prompt = SimplePromptTemplate.render(&out.segments);

    assert_eq!(out.history_tokens, 1000);
    assert_eq!(tokenizer.count(&prompt), out.prompt_tokens());
    assert!(out.prompt_tokens() + 512 < 2048);
}

fn arb_segments() -> impl Strategy<Value = PromptSegments> {
    ("[a-z ]{0,80}", "[a-z ]{0,80}", "[a-z ]{0,80}", "[a-zé ]{0,400}").prop_map(
        |(query, history, pre_context, context)| PromptSegments { query, history, pre_context, context },
    )
}

mod prop_window {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn prompt_never_crowds_out_the_completion(
            segments in arb_segments(),
            hard_max in 1usize..600,
            reserved in 0usize..300,
            template in 0usize..100,
            caps in (0usize..100, 0usize..100, 0usize..100),
        ) {
            let tokenizer = CharTokenizer::new("test-model", hard_max);
            let limits = SegmentLimits {
                max_query_tokens: caps.0,
                max_history_tokens: caps.1,
                max_pre_context_tokens: caps.2,
                reserved_output_tokens: reserved,
            };
            let out = TokenWindow::new(&tokenizer, limits).fit(segments.clone(), template).unwrap();

            prop_assert!(out.query_tokens <= caps.0);
            prop_assert!(out.history_tokens <= caps.1);
            prop_assert!(out.pre_context_tokens <= caps.2);
            prop_assert!(out.context_tokens <= out.context_budget);

            prop_assert!(segments.query.starts_with(&out.segments.query));
            prop_assert!(segments.history.starts_with(&out.segments.history));
            prop_assert!(segments.pre_context.starts_with(&out.segments.pre_context));
            prop_assert!(segments.context.starts_with(&out.segments.context));

            let fixed = out.query_tokens + out.history_tokens + out.pre_context_tokens + template;
            if fixed + reserved < hard_max {
                prop_assert!(out.prompt_tokens() + reserved < hard_max);
            } else {
                prop_assert!(out.segments.context.is_empty());
            }
        }

        #[test]
        fn windowing_is_idempotent(segments in arb_segments(), hard_max in 50usize..600) {
            let tokenizer = CharTokenizer::new("test-model", hard_max);
            let window = TokenWindow::new(&tokenizer, limits(20));
            let once = window.fit(segments, 5).unwrap();
            let twice = window.fit(once.segments.clone(), 5).unwrap();
            prop_assert_eq!(once, twice);
        }
    }
}

#[cfg(feature = "tiktoken")]
mod tiktoken_window {
    use std::sync::LazyLock;

    use kb_rag::tokenizer::TiktokenTokenizer;

    use super::*;

    static GPT4: LazyLock<TiktokenTokenizer> =
        LazyLock::new(|| TiktokenTokenizer::for_model("gpt-4").expect("gpt-4 encoding"));

    #[test]
    fn truncation_never_splits_a_character() {
        // Emoji encode to byte-level tokens, so a cut can land inside a
        // character.
        let crabs = "🦀".repeat(50);
        let total = GPT4.count(&crabs);
        assert!(total >= 50);

        for max_tokens in 0..total {
            let truncated = GPT4.truncate(&crabs, max_tokens).unwrap();
            assert!(crabs.starts_with(&truncated));
            assert!(truncated.chars().all(|c| c == '🦀'));
            assert!(GPT4.count(&truncated) <= max_tokens);
        }
        assert_eq!(GPT4.truncate(&crabs, total).unwrap(), crabs);
    }

    #[test]
    fn window_fits_multibyte_context() {
        let tokenizer = TiktokenTokenizer::for_model("gpt-4").unwrap().with_max_tokens(40);
        let limits = SegmentLimits {
            max_query_tokens: 10,
            max_history_tokens: 10,
            max_pre_context_tokens: 10,
            reserved_output_tokens: 5,
        };
        let segments = PromptSegments {
            query: "что это за животное? 🦀".to_string(),
            history: "user: こんにちは\nassistant: 你好".to_string(),
            pre_context: "Réponds brièvement.".to_string(),
            context: "🦀🐕🐈 ".repeat(40),
        };

        let out = TokenWindow::new(&tokenizer, limits).fit(segments.clone(), 3).unwrap();

        assert!(out.query_tokens <= 10);
        assert!(out.history_tokens <= 10);
        assert!(out.context_tokens <= out.context_budget);
        assert!(segments.context.starts_with(&out.segments.context));
        assert!(out.prompt_tokens() + 5 < 40);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn decode_inverts_encode(text in "\\PC{0,60}") {
            prop_assert_eq!(GPT4.decode(&GPT4.encode(&text)).unwrap(), text);
        }

        #[test]
        fn truncation_only_shrinks(text in "\\PC{0,60}", max_tokens in 0usize..40) {
            let truncated = GPT4.truncate(&text, max_tokens).unwrap();
            prop_assert!(text.starts_with(&truncated));
            prop_assert!(GPT4.count(&truncated) <= max_tokens);
            if GPT4.count(&text) <= max_tokens {
                prop_assert_eq!(truncated, text);
            }
        }
    }
}
