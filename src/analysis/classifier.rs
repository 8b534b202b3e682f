//! Language-model bias classifier.
//!
//! Builds a prompt from the article title, a bounded slice of the body and
//! the outlet name, asks the model for a strict JSON object at low
//! temperature, and normalizes whatever comes back. Out-of-range values are
//! corrected rather than rejected; only transport failures and responses
//! with no recoverable JSON surface as errors.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use super::types::{
    normalize_confidence, normalize_strength, Article, BiasDirection, BiasResult,
    DEFAULT_BIAS_STRENGTH, DEFAULT_CONFIDENCE,
};
use crate::error::ClassifierError;
use crate::llm::{GenerationRequest, LlmProvider, Message};
use crate::utils::json_extraction::{extract_json_object, JsonExtractionError};

/// Default number of body characters sent to the model.
pub const DEFAULT_BODY_CHAR_BUDGET: usize = 2000;

/// System prompt for bias classification.
const CLASSIFIER_SYSTEM_PROMPT: &str = r#"You are a media analyst who rates the political bias of news articles.

Judge the article's framing, word choice, sourcing and story selection, not the topic itself.

Directions (pick exactly one):
FAR_LEFT, LEFT, CENTER_LEFT, CENTER, CENTER_RIGHT, RIGHT, FAR_RIGHT, UNKNOWN

Use UNKNOWN when the text is too short or too neutral to judge.

Output Format:
You MUST respond with ONLY a JSON object in this exact format:
{
  "biasDirection": "<direction from list above>",
  "biasStrength": <integer 1-5, intensity of the lean>,
  "confidence": <number 0.0-1.0>,
  "reasoning": "<one or two sentences>"
}

Do not include any text outside the JSON object."#;

/// User prompt template for bias classification.
const CLASSIFIER_USER_TEMPLATE: &str = r#"Rate the political bias of this article.

Source: {source}
Title: {title}

Content:
{content}"#;

/// Anything that can turn an article into a bias result.
#[async_trait]
pub trait BiasClassifier: Send + Sync {
    /// Classifies a single article. Performs no retries.
    async fn classify(&self, article: &Article) -> Result<BiasResult, ClassifierError>;
}

/// Configuration for [`LlmBiasClassifier`].
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    /// Model identifier; empty uses the client's default.
    pub model: String,
    /// Sampling temperature.
    pub temperature: f64,
    /// Maximum tokens for the response.
    pub max_tokens: u32,
    /// Body characters included in the prompt.
    pub body_char_budget: usize,
    /// Request JSON-object mode from the endpoint.
    pub json_mode: bool,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            model: String::new(),
            temperature: 0.3,
            max_tokens: 400,
            body_char_budget: DEFAULT_BODY_CHAR_BUDGET,
            json_mode: true,
        }
    }
}

impl ClassifierConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Sets the temperature, clamped to the API's accepted range.
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature.clamp(0.0, 2.0);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_body_char_budget(mut self, budget: usize) -> Self {
        self.body_char_budget = budget;
        self
    }

    /// Some proxies reject `response_format`; disable it for those.
    pub fn with_json_mode(mut self, enabled: bool) -> Self {
        self.json_mode = enabled;
        self
    }
}

/// Classifier backed by an [`LlmProvider`].
pub struct LlmBiasClassifier {
    llm: Arc<dyn LlmProvider>,
    config: ClassifierConfig,
}

impl std::fmt::Debug for LlmBiasClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmBiasClassifier")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl LlmBiasClassifier {
    pub fn new(llm: Arc<dyn LlmProvider>, config: ClassifierConfig) -> Self {
        Self { llm, config }
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    /// Builds the user prompt for an article.
    pub fn build_prompt(&self, article: &Article) -> String {
        let content = truncate_chars(article.body_text(), self.config.body_char_budget);

        CLASSIFIER_USER_TEMPLATE
            .replace("{source}", article.source.trim())
            .replace("{title}", article.title.trim())
            .replace("{content}", content)
    }
}

#[async_trait]
impl BiasClassifier for LlmBiasClassifier {
    async fn classify(&self, article: &Article) -> Result<BiasResult, ClassifierError> {
        let mut request = GenerationRequest::new(
            self.config.model.clone(),
            vec![
                Message::system(CLASSIFIER_SYSTEM_PROMPT),
                Message::user(self.build_prompt(article)),
            ],
        )
        .with_temperature(self.config.temperature)
        .with_max_tokens(self.config.max_tokens);

        if self.config.json_mode {
            request = request.with_json_response();
        }

        let response = self.llm.generate(request).await?;

        let content = response
            .first_content()
            .filter(|c| !c.trim().is_empty())
            .ok_or(ClassifierError::EmptyResponse)?;

        parse_classification(content)
    }
}

/// Returns at most `max_chars` characters of `text`, cut on a char boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Wire shape of the model's answer. Fields are loosely typed on purpose:
/// models send numbers as strings and use snake_case keys.
#[derive(Debug, Deserialize)]
struct RawClassification {
    #[serde(default, alias = "bias_direction", alias = "direction")]
    #[serde(rename = "biasDirection")]
    direction: Option<Value>,
    #[serde(default, alias = "bias_strength", alias = "strength")]
    #[serde(rename = "biasStrength")]
    strength: Option<Value>,
    #[serde(default)]
    confidence: Option<Value>,
    #[serde(default)]
    reasoning: Option<Value>,
}

fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Parses and normalizes a raw model response.
///
/// - unrecognized or missing direction becomes `UNKNOWN`
/// - strength outside `[1, 5]` (or missing) becomes 3
/// - confidence outside `[0, 1]` (or missing) becomes 0.5
pub fn parse_classification(content: &str) -> Result<BiasResult, ClassifierError> {
    let json = extract_json_object(content).map_err(|e| match e {
        JsonExtractionError::Truncated { .. } => {
            tracing::warn!(error = %e, "Classifier response truncated");
            ClassifierError::InvalidResponse(e.to_string())
        }
        JsonExtractionError::NotFound { .. } => ClassifierError::InvalidResponse(e.to_string()),
    })?;

    let raw: RawClassification = serde_json::from_str(&json)
        .map_err(|e| ClassifierError::InvalidResponse(format!("Invalid JSON: {}", e)))?;

    let direction = raw
        .direction
        .as_ref()
        .and_then(Value::as_str)
        .map(BiasDirection::parse_lenient)
        .unwrap_or(BiasDirection::Unknown);

    let strength = raw
        .strength
        .as_ref()
        .and_then(value_as_f64)
        .map(normalize_strength)
        .unwrap_or(DEFAULT_BIAS_STRENGTH);

    let confidence = raw
        .confidence
        .as_ref()
        .and_then(value_as_f64)
        .map(normalize_confidence)
        .unwrap_or(DEFAULT_CONFIDENCE);

    let reasoning = match raw.reasoning {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    };

    Ok(BiasResult {
        direction,
        strength,
        confidence,
        reasoning,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmError;
    use crate::llm::{Choice, GenerationResponse, Usage};
    use std::sync::Mutex;

    /// Mock LLM provider that records the last request.
    struct MockLlmProvider {
        response: Result<String, u16>,
        last_request: Mutex<Option<GenerationRequest>>,
    }

    impl MockLlmProvider {
        fn new(response: impl Into<String>) -> Self {
            Self {
                response: Ok(response.into()),
                last_request: Mutex::new(None),
            }
        }

        fn failing(code: u16) -> Self {
            Self {
                response: Err(code),
                last_request: Mutex::new(None),
            }
        }

        fn last_request(&self) -> GenerationRequest {
            self.last_request
                .lock()
                .expect("lock not poisoned")
                .clone()
                .expect("a request was sent")
        }
    }

    #[async_trait]
    impl LlmProvider for MockLlmProvider {
        async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError> {
            *self.last_request.lock().expect("lock not poisoned") = Some(request);
            match &self.response {
                Ok(content) => Ok(GenerationResponse {
                    id: "mock-id".to_string(),
                    model: "mock-model".to_string(),
                    choices: vec![Choice {
                        index: 0,
                        message: Message::assistant(content.clone()),
                        finish_reason: "stop".to_string(),
                    }],
                    usage: Usage::default(),
                }),
                Err(code) => Err(LlmError::ApiError {
                    code: *code,
                    message: "upstream unavailable".to_string(),
                }),
            }
        }
    }

    fn article() -> Article {
        Article::new(
            "a-1",
            "Senate passes budget",
            "The Senate voted 52-48 on Tuesday...",
            "Reuters",
        )
    }

    #[tokio::test]
    async fn test_classify_success() {
        let provider = Arc::new(MockLlmProvider::new(
            r#"{"biasDirection": "CENTER", "biasStrength": 1, "confidence": 0.85, "reasoning": "Neutral wire copy."}"#,
        ));
        let classifier = LlmBiasClassifier::new(provider.clone(), ClassifierConfig::default());

        let result = classifier.classify(&article()).await.expect("should classify");
        assert_eq!(result.direction, BiasDirection::Center);
        assert_eq!(result.strength, 1);
        assert_eq!(result.confidence, 0.85);
        assert_eq!(result.reasoning, "Neutral wire copy.");

        let request = provider.last_request();
        assert_eq!(request.temperature, Some(0.3));
        assert!(request.response_format.is_some());
        assert!(request.messages[1].content.contains("Source: Reuters"));
        assert!(request.messages[1].content.contains("Senate passes budget"));
    }

    #[tokio::test]
    async fn test_classify_api_error_is_returned() {
        let classifier = LlmBiasClassifier::new(
            Arc::new(MockLlmProvider::failing(503)),
            ClassifierConfig::default(),
        );
        let err = classifier.classify(&article()).await.unwrap_err();
        assert!(matches!(err, ClassifierError::Llm(LlmError::ApiError { code: 503, .. })));
    }

    #[tokio::test]
    async fn test_classify_empty_response() {
        let classifier = LlmBiasClassifier::new(
            Arc::new(MockLlmProvider::new("   ")),
            ClassifierConfig::default(),
        );
        let err = classifier.classify(&article()).await.unwrap_err();
        assert!(matches!(err, ClassifierError::EmptyResponse));
    }

    #[tokio::test]
    async fn test_json_mode_can_be_disabled() {
        let provider = Arc::new(MockLlmProvider::new(r#"{"biasDirection": "LEFT"}"#));
        let classifier = LlmBiasClassifier::new(
            provider.clone(),
            ClassifierConfig::new().with_json_mode(false).with_model("gpt-4o"),
        );
        classifier.classify(&article()).await.expect("should classify");

        let request = provider.last_request();
        assert!(request.response_format.is_none());
        assert_eq!(request.model, "gpt-4o");
    }

    #[test]
    fn test_prompt_truncates_body() {
        let body = "x".repeat(5000);
        let classifier = LlmBiasClassifier::new(
            Arc::new(MockLlmProvider::new("{}")),
            ClassifierConfig::default(),
        );
        let prompt = classifier.build_prompt(&Article::new("a-1", "T", body, "NPR"));
        assert_eq!(prompt.matches('x').count(), DEFAULT_BODY_CHAR_BUDGET);
    }

    #[test]
    fn test_prompt_uses_excerpt_when_body_empty() {
        let classifier = LlmBiasClassifier::new(
            Arc::new(MockLlmProvider::new("{}")),
            ClassifierConfig::default(),
        );
        let prompt = classifier
            .build_prompt(&Article::new("a-1", "T", "", "NPR").with_excerpt("Summary text"));
        assert!(prompt.contains("Summary text"));
    }

    #[test]
    fn test_truncate_chars_multibyte() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("", 3), "");
    }

    #[test]
    fn test_parse_clamps_out_of_range_values() {
        let result = parse_classification(
            r#"{"biasDirection": "MODERATE", "biasStrength": 9, "confidence": 1.5, "reasoning": "x"}"#,
        )
        .expect("should parse");
        assert_eq!(result.direction, BiasDirection::Unknown);
        assert_eq!(result.strength, 3);
        assert_eq!(result.confidence, 0.5);
    }

    #[test]
    fn test_parse_tolerates_loose_shapes() {
        let result = parse_classification(
            "```json\n{\"bias_direction\": \"center-right\", \"bias_strength\": \"4\", \"confidence\": \"0.6\"}\n```",
        )
        .expect("should parse");
        assert_eq!(result.direction, BiasDirection::CenterRight);
        assert_eq!(result.strength, 4);
        assert_eq!(result.confidence, 0.6);
        assert_eq!(result.reasoning, "");
    }

    #[test]
    fn test_parse_missing_fields_use_defaults() {
        let result = parse_classification("{}").expect("should parse");
        assert_eq!(result.direction, BiasDirection::Unknown);
        assert_eq!(result.strength, DEFAULT_BIAS_STRENGTH);
        assert_eq!(result.confidence, DEFAULT_CONFIDENCE);
    }

    #[test]
    fn test_parse_rejects_non_json() {
        let err = parse_classification("I'd rather not say.").unwrap_err();
        assert!(matches!(err, ClassifierError::InvalidResponse(_)));

        let err = parse_classification(r#"{"biasDirection": "LEFT", "reasoning": "cut"#).unwrap_err();
        assert!(err.to_string().contains("truncated"));
    }
}
