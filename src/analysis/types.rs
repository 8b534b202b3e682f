//! Core types for article bias analysis.
//!
//! - `Article`: read-only input owned by the ingestion subsystem
//! - `BiasDirection`, `BiasResult`: classification output
//! - `AnalysisStatus`, `AnalysisRecord`: the persisted per-article state machine

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lowest valid bias strength.
pub const MIN_BIAS_STRENGTH: u8 = 1;

/// Highest valid bias strength.
pub const MAX_BIAS_STRENGTH: u8 = 5;

/// Strength used when the reported value is out of range.
pub const DEFAULT_BIAS_STRENGTH: u8 = 3;

/// Confidence used when the reported value is out of range.
pub const DEFAULT_CONFIDENCE: f64 = 0.5;

/// A news article as exposed by the ingestion subsystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Article {
    /// Unique article identifier.
    pub id: String,
    /// Headline.
    pub title: String,
    /// Full body text.
    #[serde(default)]
    pub content: String,
    /// Optional short summary.
    #[serde(default)]
    pub excerpt: Option<String>,
    /// Publishing outlet name (e.g. "NPR", "Fox News Politics").
    pub source: String,
}

impl Article {
    /// Creates an article with no excerpt.
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        content: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            content: content.into(),
            excerpt: None,
            source: source.into(),
        }
    }

    /// Sets the excerpt.
    pub fn with_excerpt(mut self, excerpt: impl Into<String>) -> Self {
        self.excerpt = Some(excerpt.into());
        self
    }

    /// Returns the text to classify: the body, or the excerpt when the body is empty.
    pub fn body_text(&self) -> &str {
        if self.content.trim().is_empty() {
            self.excerpt.as_deref().unwrap_or("")
        } else {
            &self.content
        }
    }
}

/// Political lean on a seven-point scale, plus `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BiasDirection {
    FarLeft,
    Left,
    CenterLeft,
    Center,
    CenterRight,
    Right,
    FarRight,
    Unknown,
}

impl BiasDirection {
    /// All directions, left to right, `Unknown` last.
    pub const ALL: [BiasDirection; 8] = [
        BiasDirection::FarLeft,
        BiasDirection::Left,
        BiasDirection::CenterLeft,
        BiasDirection::Center,
        BiasDirection::CenterRight,
        BiasDirection::Right,
        BiasDirection::FarRight,
        BiasDirection::Unknown,
    ];

    /// Returns the persisted label.
    pub fn as_str(&self) -> &'static str {
        match self {
            BiasDirection::FarLeft => "FAR_LEFT",
            BiasDirection::Left => "LEFT",
            BiasDirection::CenterLeft => "CENTER_LEFT",
            BiasDirection::Center => "CENTER",
            BiasDirection::CenterRight => "CENTER_RIGHT",
            BiasDirection::Right => "RIGHT",
            BiasDirection::FarRight => "FAR_RIGHT",
            BiasDirection::Unknown => "UNKNOWN",
        }
    }

    /// Parses a model-supplied label, mapping anything unrecognized to `Unknown`.
    ///
    /// Case, surrounding whitespace, hyphens and inner spaces are ignored, so
    /// "center-left", "Center Left" and "CENTER_LEFT" are all accepted.
    pub fn parse_lenient(raw: &str) -> Self {
        raw.parse().unwrap_or(BiasDirection::Unknown)
    }
}

impl FromStr for BiasDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .chars()
            .map(|c| match c {
                '-' | ' ' => '_',
                other => other.to_ascii_uppercase(),
            })
            .collect();

        BiasDirection::ALL
            .into_iter()
            .find(|d| d.as_str() == normalized)
            .ok_or_else(|| format!("unknown bias direction '{}'", s))
    }
}

impl fmt::Display for BiasDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of an article's analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnalysisStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl AnalysisStatus {
    pub const ALL: [AnalysisStatus; 4] = [
        AnalysisStatus::Pending,
        AnalysisStatus::Processing,
        AnalysisStatus::Completed,
        AnalysisStatus::Failed,
    ];

    /// Returns the persisted label.
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisStatus::Pending => "PENDING",
            AnalysisStatus::Processing => "PROCESSING",
            AnalysisStatus::Completed => "COMPLETED",
            AnalysisStatus::Failed => "FAILED",
        }
    }

    /// Returns whether the worker pool is done with this record.
    pub fn is_terminal(&self) -> bool {
        matches!(self, AnalysisStatus::Completed | AnalysisStatus::Failed)
    }
}

impl FromStr for AnalysisStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AnalysisStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown analysis status '{}'", s))
    }
}

impl fmt::Display for AnalysisStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which producer wrote the result currently held by a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisSource {
    /// The language-model classifier.
    Classifier,
    /// The source-name heuristic.
    Fallback,
    /// Placeholder values; no analysis has completed yet.
    None,
}

impl AnalysisSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisSource::Classifier => "classifier",
            AnalysisSource::Fallback => "fallback",
            AnalysisSource::None => "none",
        }
    }
}

impl FromStr for AnalysisSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "classifier" => Ok(AnalysisSource::Classifier),
            "fallback" => Ok(AnalysisSource::Fallback),
            "none" => Ok(AnalysisSource::None),
            other => Err(format!("unknown analysis source '{}'", other)),
        }
    }
}

impl fmt::Display for AnalysisSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coerces a reported strength into `[1, 5]`.
///
/// Fractional values inside the range are rounded; anything outside the
/// range (or not finite) becomes the neutral default of 3.
pub fn normalize_strength(raw: f64) -> u8 {
    if raw.is_finite() && (MIN_BIAS_STRENGTH as f64..=MAX_BIAS_STRENGTH as f64).contains(&raw) {
        raw.round() as u8
    } else {
        DEFAULT_BIAS_STRENGTH
    }
}

/// Coerces a reported confidence into `[0.0, 1.0]`; out-of-range becomes 0.5.
pub fn normalize_confidence(raw: f64) -> f64 {
    if raw.is_finite() && (0.0..=1.0).contains(&raw) {
        raw
    } else {
        DEFAULT_CONFIDENCE
    }
}

/// A bias classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BiasResult {
    #[serde(rename = "biasDirection")]
    pub direction: BiasDirection,
    #[serde(rename = "biasStrength")]
    pub strength: u8,
    pub confidence: f64,
    pub reasoning: String,
}

impl BiasResult {
    /// Creates a result, correcting out-of-range strength and confidence.
    pub fn new(
        direction: BiasDirection,
        strength: u8,
        confidence: f64,
        reasoning: impl Into<String>,
    ) -> Self {
        Self {
            direction,
            strength,
            confidence,
            reasoning: reasoning.into(),
        }
        .normalized()
    }

    /// Placeholder written when a record is first created for processing.
    pub fn placeholder() -> Self {
        Self {
            direction: BiasDirection::Unknown,
            strength: DEFAULT_BIAS_STRENGTH,
            confidence: 0.0,
            reasoning: String::new(),
        }
    }

    /// Returns a copy with strength and confidence inside their valid ranges.
    pub fn normalized(mut self) -> Self {
        self.strength = normalize_strength(self.strength as f64);
        self.confidence = normalize_confidence(self.confidence);
        self
    }
}

/// Persisted analysis state for one article.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRecord {
    pub article_id: String,
    pub status: AnalysisStatus,
    #[serde(rename = "biasDirection")]
    pub direction: BiasDirection,
    #[serde(rename = "biasStrength")]
    pub strength: u8,
    pub confidence: f64,
    pub reasoning: String,
    pub source: AnalysisSource,
    pub error_message: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AnalysisRecord {
    /// Returns the stored result, regardless of status.
    pub fn result(&self) -> BiasResult {
        BiasResult {
            direction: self.direction,
            strength: self.strength,
            confidence: self.confidence,
            reasoning: self.reasoning.clone(),
        }
    }

    /// Returns whether an article with this record (or none) should be queued.
    ///
    /// Anything short of `COMPLETED` qualifies, which includes `FAILED`.
    pub fn needs_analysis(record: Option<&AnalysisRecord>) -> bool {
        match record {
            Some(record) => record.status != AnalysisStatus::Completed,
            None => true,
        }
    }
}

/// Aggregate record counts for dashboards.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AnalysisSummary {
    /// Total number of records.
    pub total: u64,
    /// Record counts keyed by status label.
    pub by_status: BTreeMap<String, u64>,
    /// Completed-record counts keyed by direction label.
    pub by_direction: BTreeMap<String, u64>,
}

impl AnalysisSummary {
    /// Count for a status, zero when absent.
    pub fn status_count(&self, status: AnalysisStatus) -> u64 {
        self.by_status.get(status.as_str()).copied().unwrap_or(0)
    }

    /// Completed count for a direction, zero when absent.
    pub fn direction_count(&self, direction: BiasDirection) -> u64 {
        self.by_direction
            .get(direction.as_str())
            .copied()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_parse_lenient() {
        assert_eq!(BiasDirection::parse_lenient("LEFT"), BiasDirection::Left);
        assert_eq!(
            BiasDirection::parse_lenient("center-left"),
            BiasDirection::CenterLeft
        );
        assert_eq!(
            BiasDirection::parse_lenient(" Far Right "),
            BiasDirection::FarRight
        );
        assert_eq!(
            BiasDirection::parse_lenient("MODERATE"),
            BiasDirection::Unknown
        );
        assert_eq!(BiasDirection::parse_lenient(""), BiasDirection::Unknown);
    }

    #[test]
    fn test_direction_labels_roundtrip() {
        for direction in BiasDirection::ALL {
            assert_eq!(direction.as_str().parse::<BiasDirection>(), Ok(direction));
        }
    }

    #[test]
    fn test_direction_serde_uses_labels() {
        let json = serde_json::to_string(&BiasDirection::CenterRight).expect("serialize");
        assert_eq!(json, "\"CENTER_RIGHT\"");
    }

    #[test]
    fn test_status_parse_and_terminal() {
        assert_eq!(
            "processing".parse::<AnalysisStatus>(),
            Ok(AnalysisStatus::Processing)
        );
        assert!("DONE".parse::<AnalysisStatus>().is_err());
        assert!(AnalysisStatus::Completed.is_terminal());
        assert!(AnalysisStatus::Failed.is_terminal());
        assert!(!AnalysisStatus::Processing.is_terminal());
        assert!(!AnalysisStatus::Pending.is_terminal());
    }

    #[test]
    fn test_normalize_strength() {
        assert_eq!(normalize_strength(1.0), 1);
        assert_eq!(normalize_strength(5.0), 5);
        assert_eq!(normalize_strength(4.4), 4);
        assert_eq!(normalize_strength(9.0), 3);
        assert_eq!(normalize_strength(0.0), 3);
        assert_eq!(normalize_strength(-2.0), 3);
        assert_eq!(normalize_strength(f64::NAN), 3);
    }

    #[test]
    fn test_normalize_confidence() {
        assert_eq!(normalize_confidence(0.0), 0.0);
        assert_eq!(normalize_confidence(1.0), 1.0);
        assert_eq!(normalize_confidence(0.82), 0.82);
        assert_eq!(normalize_confidence(1.5), 0.5);
        assert_eq!(normalize_confidence(-0.1), 0.5);
        assert_eq!(normalize_confidence(f64::INFINITY), 0.5);
    }

    #[test]
    fn test_bias_result_new_clamps() {
        let result = BiasResult::new(BiasDirection::Left, 9, 1.5, "strong lean");
        assert_eq!(result.strength, 3);
        assert_eq!(result.confidence, 0.5);
        assert_eq!(result.direction, BiasDirection::Left);
    }

    #[test]
    fn test_article_body_text_falls_back_to_excerpt() {
        let article = Article::new("a-1", "Title", "   ", "NPR").with_excerpt("Short summary");
        assert_eq!(article.body_text(), "Short summary");

        let article = Article::new("a-2", "Title", "Body", "NPR").with_excerpt("Short summary");
        assert_eq!(article.body_text(), "Body");

        let article = Article::new("a-3", "Title", "", "NPR");
        assert_eq!(article.body_text(), "");
    }

    #[test]
    fn test_needs_analysis() {
        let now = Utc::now();
        let mut record = AnalysisRecord {
            article_id: "a-1".to_string(),
            status: AnalysisStatus::Completed,
            direction: BiasDirection::Center,
            strength: 2,
            confidence: 0.9,
            reasoning: "Balanced sourcing".to_string(),
            source: AnalysisSource::Classifier,
            error_message: None,
            processed_at: Some(now),
            created_at: now,
            updated_at: now,
        };

        assert!(AnalysisRecord::needs_analysis(None));
        assert!(!AnalysisRecord::needs_analysis(Some(&record)));

        record.status = AnalysisStatus::Failed;
        assert!(AnalysisRecord::needs_analysis(Some(&record)));

        record.status = AnalysisStatus::Processing;
        assert!(AnalysisRecord::needs_analysis(Some(&record)));
    }

    #[test]
    fn test_summary_lookups_default_to_zero() {
        let mut summary = AnalysisSummary::default();
        summary.by_status.insert("COMPLETED".to_string(), 4);
        summary.by_direction.insert("LEFT".to_string(), 3);

        assert_eq!(summary.status_count(AnalysisStatus::Completed), 4);
        assert_eq!(summary.status_count(AnalysisStatus::Failed), 0);
        assert_eq!(summary.direction_count(BiasDirection::Left), 3);
        assert_eq!(summary.direction_count(BiasDirection::Right), 0);
    }
}
