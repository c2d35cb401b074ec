//! Strategy routing.
//!
//! A pure function from `(size category, relationships requested)` to a
//! processing strategy. Relationship extraction needs every entity in a
//! single model context, so chunked documents never get a relationship
//! wave; the rationale string records that trade-off for the caller.

use crate::data::{RoutingDecision, SizeCategory, SizeInfo, Strategy};
use crate::logging::{report_progress, ProgressEvent};

/// Map a sized document to its processing strategy.
pub fn route(size_info: &SizeInfo, extract_relationships: bool) -> RoutingDecision {
    let (strategy, rationale) = match size_info.category {
        SizeCategory::Empty => (
            Strategy::EmptyDocument,
            "document is empty; no extraction performed".to_string(),
        ),
        SizeCategory::Invalid => (
            Strategy::InvalidDocument,
            "document is not plausible text; no extraction performed".to_string(),
        ),
        SizeCategory::VerySmall => {
            if extract_relationships {
                (
                    Strategy::SinglePass,
                    format!(
                        "{} chars fits a single combined entity+relationship prompt",
                        size_info.chars
                    ),
                )
            } else {
                (
                    Strategy::SinglePass,
                    format!("{} chars fits a single consolidated prompt", size_info.chars),
                )
            }
        }
        SizeCategory::Small | SizeCategory::Medium => {
            if extract_relationships {
                (
                    Strategy::FourWave,
                    format!(
                        "{} chars: three entity waves plus a relationship wave",
                        size_info.chars
                    ),
                )
            } else {
                (
                    Strategy::ThreeWave,
                    format!("{} chars: three sequential entity waves", size_info.chars),
                )
            }
        }
        SizeCategory::Large => (
            Strategy::ThreeWaveChunked,
            format!(
                "{} chars exceeds the single-context limit; chunked three-wave \
                 extraction (relationships are not extracted in chunked mode)",
                size_info.chars
            ),
        ),
    };

    report_progress(ProgressEvent::RoutingDecided {
        document_chars: size_info.chars,
        strategy: strategy.as_str().to_string(),
        rationale: rationale.clone(),
    });

    RoutingDecision {
        strategy,
        extract_relationships,
        rationale,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(chars: usize, category: SizeCategory) -> SizeInfo {
        SizeInfo {
            chars,
            words: chars / 5,
            lines: chars / 80,
            tokens_estimate: chars / 4,
            pages_estimate: chars / 3000 + 1,
            category,
        }
    }

    #[test]
    fn empty_and_invalid_short_circuit() {
        assert_eq!(
            route(&info(0, SizeCategory::Empty), true).strategy,
            Strategy::EmptyDocument
        );
        assert_eq!(
            route(&info(10, SizeCategory::Invalid), false).strategy,
            Strategy::InvalidDocument
        );
    }

    #[test]
    fn very_small_is_single_pass_either_way() {
        assert_eq!(
            route(&info(1_000, SizeCategory::VerySmall), false).strategy,
            Strategy::SinglePass
        );
        assert_eq!(
            route(&info(1_000, SizeCategory::VerySmall), true).strategy,
            Strategy::SinglePass
        );
    }

    #[test]
    fn small_and_medium_follow_relationship_flag() {
        assert_eq!(
            route(&info(20_000, SizeCategory::Small), false).strategy,
            Strategy::ThreeWave
        );
        assert_eq!(
            route(&info(20_000, SizeCategory::Small), true).strategy,
            Strategy::FourWave
        );
        assert_eq!(
            route(&info(100_000, SizeCategory::Medium), true).strategy,
            Strategy::FourWave
        );
    }

    #[test]
    fn large_is_chunked_regardless_of_relationships() {
        let decision = route(&info(200_000, SizeCategory::Large), true);
        assert_eq!(decision.strategy, Strategy::ThreeWaveChunked);
        assert!(decision.rationale.contains("relationships are not extracted"));
    }

    #[test]
    fn rationale_is_populated() {
        let decision = route(&info(20_000, SizeCategory::Small), false);
        assert!(decision.rationale.contains("20000"));
        assert!(!decision.rationale.is_empty());
    }
}
