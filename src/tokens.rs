//! Token estimation and context-budget validation.
//!
//! Two modes: a fast character heuristic (chars per token with a multiplier
//! for legal-register text, which tokenizes denser than prose) and an
//! accurate BPE mode backed by the cl100k_base encoding. Budget checks
//! never silently truncate; overflow surfaces as a typed error carrying
//! `(estimated, max, excess)`.

use once_cell::sync::OnceCell;
use tiktoken_rs::CoreBPE;

use crate::config::InferenceSettings;
use crate::exceptions::{ExtractError, ExtractResult};

static BPE: OnceCell<Option<CoreBPE>> = OnceCell::new();

fn bpe() -> Option<&'static CoreBPE> {
    BPE.get_or_init(|| tiktoken_rs::cl100k_base().ok()).as_ref()
}

/// Token estimation and context validation for one backend.
#[derive(Debug, Clone)]
pub struct TokenEstimator {
    chars_per_token: f64,
    legal_multiplier: f64,
    use_accurate: bool,
    max_context: usize,
    max_prompt: usize,
    max_completion: usize,
}

impl TokenEstimator {
    /// Build an estimator from the inference settings.
    pub fn new(settings: &InferenceSettings) -> Self {
        Self {
            chars_per_token: settings.chars_per_token,
            legal_multiplier: settings.legal_token_multiplier,
            use_accurate: settings.use_accurate_tokenizer,
            max_context: settings.max_model_context_tokens,
            max_prompt: settings
                .max_model_context_tokens
                .saturating_sub(settings.max_completion_tokens),
            max_completion: settings.max_completion_tokens,
        }
    }

    /// Estimate token count for `text`.
    pub fn estimate_tokens(&self, text: &str) -> usize {
        if self.use_accurate {
            if let Some(bpe) = bpe() {
                return bpe.encode_ordinary(text).len();
            }
            // Encoding tables unavailable: character heuristic still applies.
        }
        let base = text.chars().count() as f64 / self.chars_per_token;
        (base * self.legal_multiplier).ceil() as usize
    }

    /// Estimate prompt tokens and validate against the context limits.
    ///
    /// Returns `(prompt_tokens, allowed_completion)`. The completion budget
    /// is reduced when the prompt leaves less room than requested; if the
    /// prompt alone busts its budget, or the remainder cannot fit a minimal
    /// completion, the call fails with [`ExtractError::ContextOverflow`].
    pub fn estimate_prompt_tokens(
        &self,
        prompt: &str,
        max_completion_tokens: usize,
    ) -> ExtractResult<(usize, usize)> {
        let prompt_tokens = self.estimate_tokens(prompt);

        if prompt_tokens > self.max_prompt {
            let excess = prompt_tokens - self.max_prompt;
            return Err(ExtractError::ContextOverflow {
                estimated: prompt_tokens,
                max: self.max_prompt,
                excess,
            });
        }

        let total = prompt_tokens + max_completion_tokens;
        if total > self.max_context {
            let allowed = self.max_context - prompt_tokens;
            if allowed < 100 {
                // Not enough space for even a minimal completion.
                return Err(ExtractError::ContextOverflow {
                    estimated: total,
                    max: self.max_context,
                    excess: total - self.max_context,
                });
            }
            log::warn!(
                "requested {} completion tokens but only {} available; reducing",
                max_completion_tokens,
                allowed
            );
            return Ok((prompt_tokens, allowed));
        }

        Ok((prompt_tokens, max_completion_tokens))
    }

    /// Whether `prompt` + `max_tokens` fits in the context window.
    pub fn validate_request(&self, prompt: &str, max_tokens: usize) -> bool {
        self.estimate_prompt_tokens(prompt, max_tokens).is_ok()
    }

    /// Usable per-chunk token budget and the resulting chunk count for a
    /// document of `total_tokens`.
    pub fn calculate_chunk_size(
        &self,
        total_tokens: usize,
        overlap_fraction: f64,
    ) -> (usize, usize) {
        let usable = self.max_context.saturating_sub(self.max_completion);
        if total_tokens <= usable {
            return (total_tokens, 1);
        }
        let overlap = (usable as f64 * overlap_fraction) as usize;
        let effective = usable.saturating_sub(overlap).max(1);
        let num_chunks = total_tokens.div_ceil(effective);
        (usable, num_chunks)
    }

    /// Prompt-token budget.
    pub fn max_prompt_tokens(&self) -> usize {
        self.max_prompt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn estimator(max_context: usize, max_completion: usize) -> TokenEstimator {
        let settings = InferenceSettings {
            max_model_context_tokens: max_context,
            max_completion_tokens: max_completion,
            chars_per_token: 4.0,
            legal_token_multiplier: 1.0,
            use_accurate_tokenizer: false,
            ..InferenceSettings::default()
        };
        TokenEstimator::new(&settings)
    }

    #[test]
    fn fast_estimate_divides_chars() {
        let est = estimator(1000, 100);
        assert_eq!(est.estimate_tokens(&"a".repeat(400)), 100);
    }

    #[test]
    fn legal_multiplier_inflates_estimate() {
        let settings = InferenceSettings {
            chars_per_token: 4.0,
            legal_token_multiplier: 1.1,
            use_accurate_tokenizer: false,
            ..InferenceSettings::default()
        };
        let est = TokenEstimator::new(&settings);
        assert_eq!(est.estimate_tokens(&"a".repeat(400)), 110);
    }

    #[test]
    fn prompt_over_budget_reports_exact_excess() {
        // max_prompt = 1000 - 100 = 900 tokens = 3600 chars
        let est = estimator(1000, 100);
        let prompt = "a".repeat(3600 + 4 * 25); // 25 tokens over
        let err = est.estimate_prompt_tokens(&prompt, 100).unwrap_err();
        match err {
            ExtractError::ContextOverflow { estimated, max, excess } => {
                assert_eq!(estimated, 925);
                assert_eq!(max, 900);
                assert_eq!(excess, 25);
            }
            other => panic!("expected ContextOverflow, got {other:?}"),
        }
    }

    #[test]
    fn completion_is_reduced_when_prompt_is_long() {
        let est = estimator(1000, 400);
        // 700 prompt tokens leaves 300 of the requested 400.
        let prompt = "a".repeat(4 * 700);
        let (prompt_tokens, allowed) = est.estimate_prompt_tokens(&prompt, 400).unwrap();
        assert_eq!(prompt_tokens, 700);
        assert_eq!(allowed, 300);
    }

    #[test]
    fn request_within_budget_passes_through() {
        let est = estimator(1000, 400);
        let prompt = "a".repeat(4 * 100);
        let (prompt_tokens, allowed) = est.estimate_prompt_tokens(&prompt, 400).unwrap();
        assert_eq!(prompt_tokens, 100);
        assert_eq!(allowed, 400);
    }

    #[test]
    fn chunk_size_covers_document() {
        let est = estimator(10_000, 2_000);
        let (chunk_tokens, num_chunks) = est.calculate_chunk_size(50_000, 0.1);
        assert_eq!(chunk_tokens, 8_000);
        // effective = 8000 - 800 = 7200; ceil(50000 / 7200) = 7
        assert_eq!(num_chunks, 7);

        let (single, one) = est.calculate_chunk_size(5_000, 0.1);
        assert_eq!((single, one), (5_000, 1));
    }
}
