//! Document size detection and classification.
//!
//! Size drives everything downstream: the router maps the category to a
//! processing strategy, and the chunker only ever sees LARGE documents.
//! Non-text input (control-byte heavy) is flagged INVALID here so that no
//! LLM call is ever made for it.

use crate::config::{InferenceSettings, RoutingSettings};
use crate::data::{SizeCategory, SizeInfo};
use crate::tokens::TokenEstimator;

/// Characters per estimated page, tuned for filed legal documents.
const CHARS_PER_PAGE: usize = 3_000;

/// Fraction of control characters above which input is considered non-text.
const CONTROL_RATIO_LIMIT: f64 = 0.5;

/// Computes [`SizeInfo`] from raw document text.
pub struct SizeDetector {
    thresholds: RoutingSettings,
    estimator: TokenEstimator,
}

impl SizeDetector {
    pub fn new(thresholds: RoutingSettings, inference: &InferenceSettings) -> Self {
        Self {
            thresholds,
            estimator: TokenEstimator::new(inference),
        }
    }

    /// Measure and classify `text`.
    pub fn detect(&self, text: &str) -> SizeInfo {
        let chars = text.chars().count();
        let words = text.split_whitespace().count();
        let lines = if text.is_empty() { 0 } else { text.lines().count() };
        let tokens_estimate = self.estimator.estimate_tokens(text);
        let pages_estimate = chars.div_ceil(CHARS_PER_PAGE);

        let category = self.classify(text, chars);

        SizeInfo {
            chars,
            words,
            lines,
            tokens_estimate,
            pages_estimate,
            category,
        }
    }

    fn classify(&self, text: &str, chars: usize) -> SizeCategory {
        if chars == 0 {
            return SizeCategory::Empty;
        }
        if !plausible_text(text) {
            return SizeCategory::Invalid;
        }
        let t = &self.thresholds;
        if chars < t.size_threshold_very_small {
            SizeCategory::VerySmall
        } else if chars <= t.size_threshold_small {
            SizeCategory::Small
        } else if chars <= t.size_threshold_medium {
            SizeCategory::Medium
        } else {
            SizeCategory::Large
        }
    }
}

/// Non-text heuristic: too many control characters (excluding ordinary
/// whitespace) or any NUL bytes at all.
fn plausible_text(text: &str) -> bool {
    if text.contains('\0') {
        return false;
    }
    let mut control = 0usize;
    let mut total = 0usize;
    for ch in text.chars() {
        total += 1;
        if ch.is_control() && ch != '\n' && ch != '\r' && ch != '\t' {
            control += 1;
        }
    }
    total == 0 || (control as f64 / total as f64) <= CONTROL_RATIO_LIMIT
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExtractorConfig;

    fn detector() -> SizeDetector {
        let cfg = ExtractorConfig::default();
        SizeDetector::new(cfg.routing.clone(), &cfg.inference)
    }

    #[test]
    fn empty_text_is_empty_category() {
        let info = detector().detect("");
        assert_eq!(info.category, SizeCategory::Empty);
        assert_eq!(info.chars, 0);
        assert_eq!(info.words, 0);
        assert_eq!(info.lines, 0);
    }

    #[test]
    fn control_heavy_text_is_invalid() {
        let text: String = std::iter::repeat('\u{1}').take(60).chain("abc".chars()).collect();
        assert_eq!(detector().detect(&text).category, SizeCategory::Invalid);
        assert_eq!(detector().detect("abc\0def").category, SizeCategory::Invalid);
    }

    #[test]
    fn ordinary_whitespace_does_not_count_as_control() {
        let text = "line one\n\tline two\r\nline three";
        assert_eq!(detector().detect(text).category, SizeCategory::VerySmall);
    }

    #[test]
    fn thresholds_are_exclusive_at_very_small_and_inclusive_above() {
        let d = detector();
        assert_eq!(d.detect(&"a".repeat(4_999)).category, SizeCategory::VerySmall);
        assert_eq!(d.detect(&"a".repeat(5_000)).category, SizeCategory::Small);
        assert_eq!(d.detect(&"a".repeat(50_000)).category, SizeCategory::Small);
        assert_eq!(d.detect(&"a".repeat(50_001)).category, SizeCategory::Medium);
        assert_eq!(d.detect(&"a".repeat(150_000)).category, SizeCategory::Medium);
        assert_eq!(d.detect(&"a".repeat(150_001)).category, SizeCategory::Large);
    }

    #[test]
    fn measurements_are_consistent() {
        let info = detector().detect("one two three\nfour five");
        assert_eq!(info.words, 5);
        assert_eq!(info.lines, 2);
        assert_eq!(info.pages_estimate, 1);
        assert!(info.tokens_estimate > 0);
    }
}
