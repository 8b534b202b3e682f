//! Source-name heuristic used when the classifier is unavailable.
//!
//! The estimator matches the outlet name against a fixed table of
//! well-known outlets. It never fails, so the worker pool always has a
//! result to persist.

use super::types::{BiasDirection, BiasResult};

/// Confidence reported for a table match.
pub const MATCHED_CONFIDENCE: f64 = 0.7;

/// Confidence reported when no table entry matches.
pub const UNMATCHED_CONFIDENCE: f64 = 0.3;

/// Strength reported for a table match.
pub const MATCHED_STRENGTH: u8 = 3;

/// Strength reported when no lean could be estimated.
pub const UNMATCHED_STRENGTH: u8 = 1;

/// Known outlets, lowercase. First match wins, so longer or more specific
/// names must precede names they contain.
const SOURCE_TABLE: &[(&str, BiasDirection)] = &[
    ("jacobin", BiasDirection::FarLeft),
    ("democracy now", BiasDirection::FarLeft),
    ("the intercept", BiasDirection::Left),
    ("huffpost", BiasDirection::Left),
    ("huffington post", BiasDirection::Left),
    ("msnbc", BiasDirection::Left),
    ("mother jones", BiasDirection::Left),
    ("vox", BiasDirection::Left),
    ("cnn", BiasDirection::Left),
    ("npr", BiasDirection::CenterLeft),
    ("new york times", BiasDirection::CenterLeft),
    ("washington post", BiasDirection::CenterLeft),
    ("the guardian", BiasDirection::CenterLeft),
    ("nbc news", BiasDirection::CenterLeft),
    ("abc news", BiasDirection::CenterLeft),
    ("cbs news", BiasDirection::CenterLeft),
    ("politico", BiasDirection::CenterLeft),
    ("associated press", BiasDirection::Center),
    ("reuters", BiasDirection::Center),
    ("bbc", BiasDirection::Center),
    ("the hill", BiasDirection::Center),
    ("axios", BiasDirection::Center),
    ("bloomberg", BiasDirection::Center),
    ("wall street journal", BiasDirection::CenterRight),
    ("washington times", BiasDirection::CenterRight),
    ("the economist", BiasDirection::CenterRight),
    ("national review", BiasDirection::Right),
    ("new york post", BiasDirection::Right),
    ("fox news", BiasDirection::Right),
    ("daily wire", BiasDirection::Right),
    ("newsmax", BiasDirection::Right),
    ("breitbart", BiasDirection::FarRight),
    ("infowars", BiasDirection::FarRight),
    ("gateway pundit", BiasDirection::FarRight),
];

/// Deterministic, table-driven bias estimate.
#[derive(Debug, Clone, Copy, Default)]
pub struct FallbackEstimator;

impl FallbackEstimator {
    pub fn new() -> Self {
        Self
    }

    /// Looks up the table direction for a source name, if any.
    pub fn lookup(source: &str) -> Option<BiasDirection> {
        let needle = source.to_lowercase();
        SOURCE_TABLE
            .iter()
            .find(|(pattern, _)| needle.contains(pattern))
            .map(|(_, direction)| *direction)
    }

    /// Estimates bias from the outlet name alone.
    pub fn estimate(&self, source: &str) -> BiasResult {
        match Self::lookup(source) {
            Some(direction) => BiasResult::new(
                direction,
                MATCHED_STRENGTH,
                MATCHED_CONFIDENCE,
                format!(
                    "Estimated from the known editorial lean of '{}'; the article text was not analyzed.",
                    source.trim()
                ),
            ),
            None => BiasResult::new(
                BiasDirection::Unknown,
                UNMATCHED_STRENGTH,
                UNMATCHED_CONFIDENCE,
                "Source not recognized; bias could not be estimated.",
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fox_news_maps_to_right() {
        let result = FallbackEstimator::new().estimate("Fox News Politics");
        assert_eq!(result.direction, BiasDirection::Right);
        assert_eq!(result.confidence, 0.7);
        assert_eq!(result.strength, 3);
    }

    #[test]
    fn test_unknown_source_maps_to_unknown() {
        let result = FallbackEstimator::new().estimate("Unknown Local Blog");
        assert_eq!(result.direction, BiasDirection::Unknown);
        assert_eq!(result.confidence, 0.3);
    }

    #[test]
    fn test_match_is_case_insensitive_substring() {
        assert_eq!(
            FallbackEstimator::lookup("NPR Morning Edition"),
            Some(BiasDirection::CenterLeft)
        );
        assert_eq!(
            FallbackEstimator::lookup("reuters.com"),
            Some(BiasDirection::Center)
        );
        assert_eq!(FallbackEstimator::lookup(""), None);
    }

    #[test]
    fn test_first_match_wins() {
        // "reuters" precedes "fox news".
        assert_eq!(
            FallbackEstimator::lookup("Fox News via Reuters"),
            Some(BiasDirection::Center)
        );
        // "cnn" precedes "politico" in the table.
        assert_eq!(
            FallbackEstimator::lookup("CNN Politico Roundup"),
            Some(BiasDirection::Left)
        );
    }

    #[test]
    fn test_results_within_valid_ranges() {
        let estimator = FallbackEstimator::new();
        for (pattern, _) in SOURCE_TABLE {
            let result = estimator.estimate(pattern);
            assert!((1..=5).contains(&result.strength));
            assert!(result.confidence <= MATCHED_CONFIDENCE);
        }
    }
}
