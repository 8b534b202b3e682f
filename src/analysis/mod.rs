//! Article bias analysis.
//!
//! - [`classifier`]: language-model classifier behind the [`BiasClassifier`] trait
//! - [`fallback`]: deterministic source-name estimator used when the classifier fails
//! - [`types`]: articles, results and the persisted analysis record

pub mod classifier;
pub mod fallback;
pub mod types;

pub use classifier::{
    parse_classification, truncate_chars, BiasClassifier, ClassifierConfig, LlmBiasClassifier,
    DEFAULT_BODY_CHAR_BUDGET,
};
pub use fallback::{FallbackEstimator, MATCHED_CONFIDENCE, UNMATCHED_CONFIDENCE};
pub use types::{
    normalize_confidence, normalize_strength, AnalysisRecord, AnalysisSource, AnalysisStatus,
    AnalysisSummary, Article, BiasDirection, BiasResult,
};
