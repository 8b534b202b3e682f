//! Per-job analysis pipeline.
//!
//! One attempt runs four steps against the stores:
//!
//! 1. mark the record `PROCESSING`
//! 2. load the article (missing article is a non-retryable error)
//! 3. classify, falling back to the source-table estimate on any classifier
//!    error or timeout
//! 4. mark the record `COMPLETED` with the chosen result
//!
//! Store failures in steps 1, 2 and 4 propagate so the queue can retry.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::analysis::{AnalysisSource, Article, BiasClassifier, BiasResult, FallbackEstimator};
use crate::error::{ClassifierError, ProcessError};
use crate::metrics::MetricsCollector;
use crate::storage::{AnalysisStore, ArticleSource};

use super::job::Job;

/// Default bound on a single classifier call.
pub const DEFAULT_CLASSIFY_TIMEOUT: Duration = Duration::from_secs(30);

/// The result written for one job.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessOutcome {
    /// Which producer supplied the result.
    pub source: AnalysisSource,
    pub result: BiasResult,
}

impl ProcessOutcome {
    pub fn used_fallback(&self) -> bool {
        self.source == AnalysisSource::Fallback
    }
}

/// Runs classification for analysis jobs.
pub struct AnalysisPipeline {
    store: Arc<dyn AnalysisStore>,
    articles: Arc<dyn ArticleSource>,
    classifier: Arc<dyn BiasClassifier>,
    fallback: FallbackEstimator,
    classify_timeout: Duration,
    metrics: MetricsCollector,
}

impl AnalysisPipeline {
    pub fn new(
        store: Arc<dyn AnalysisStore>,
        articles: Arc<dyn ArticleSource>,
        classifier: Arc<dyn BiasClassifier>,
    ) -> Self {
        Self {
            store,
            articles,
            classifier,
            fallback: FallbackEstimator::new(),
            classify_timeout: DEFAULT_CLASSIFY_TIMEOUT,
            metrics: MetricsCollector::new(),
        }
    }

    /// Sets the bound on each classifier call.
    pub fn with_classify_timeout(mut self, timeout: Duration) -> Self {
        self.classify_timeout = timeout;
        self
    }

    pub fn classify_timeout(&self) -> Duration {
        self.classify_timeout
    }

    /// The store this pipeline writes to.
    pub fn store(&self) -> &Arc<dyn AnalysisStore> {
        &self.store
    }

    /// Processes one attempt of `job`.
    ///
    /// # Errors
    ///
    /// - [`ProcessError::Store`] if the record cannot be written or the
    ///   article cannot be read
    /// - [`ProcessError::ArticleNotFound`] if the article does not exist
    pub async fn process(&self, job: &Job) -> Result<ProcessOutcome, ProcessError> {
        let article_id = job.article_id.as_str();

        self.store.mark_processing(article_id).await?;

        let article = self
            .articles
            .get_article(article_id)
            .await?
            .ok_or_else(|| ProcessError::ArticleNotFound(article_id.to_string()))?;

        let outcome = self.classify_or_estimate(&article).await;

        self.store
            .mark_completed(article_id, &outcome.result, outcome.source)
            .await?;
        self.metrics.record_classification(outcome.source);

        debug!(
            job_id = %job.id,
            article_id = %article_id,
            source = %outcome.source.as_str(),
            direction = %outcome.result.direction,
            "Analysis stored"
        );

        Ok(outcome)
    }

    /// Classifies the article, substituting the fallback estimate on failure.
    pub async fn classify_or_estimate(&self, article: &Article) -> ProcessOutcome {
        let start = Instant::now();
        let classified = match tokio::time::timeout(
            self.classify_timeout,
            self.classifier.classify(article),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ClassifierError::Timeout(self.classify_timeout)),
        };
        self.metrics
            .record_classifier_latency(start.elapsed().as_secs_f64());

        match classified {
            Ok(result) => ProcessOutcome {
                source: AnalysisSource::Classifier,
                result: result.normalized(),
            },
            Err(e) => {
                warn!(
                    article_id = %article.id,
                    source_name = %article.source,
                    error = %e,
                    "Classifier failed, using fallback estimate"
                );
                ProcessOutcome {
                    source: AnalysisSource::Fallback,
                    result: self.fallback.estimate(&article.source),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{AnalysisStatus, BiasDirection};
    use crate::scheduler::job::{JobPolicy, JobPriority};
    use crate::storage::Database;
    use async_trait::async_trait;
    use tempfile::TempDir;

    struct FixedClassifier(BiasResult);

    #[async_trait]
    impl BiasClassifier for FixedClassifier {
        async fn classify(&self, _article: &Article) -> Result<BiasResult, ClassifierError> {
            Ok(self.0.clone())
        }
    }

    struct FailingClassifier;

    #[async_trait]
    impl BiasClassifier for FailingClassifier {
        async fn classify(&self, _article: &Article) -> Result<BiasResult, ClassifierError> {
            Err(ClassifierError::EmptyResponse)
        }
    }

    struct SlowClassifier;

    #[async_trait]
    impl BiasClassifier for SlowClassifier {
        async fn classify(&self, _article: &Article) -> Result<BiasResult, ClassifierError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Err(ClassifierError::EmptyResponse)
        }
    }

    async fn setup(classifier: Arc<dyn BiasClassifier>) -> (TempDir, Database, AnalysisPipeline) {
        let dir = TempDir::new().expect("tempdir");
        let db = Database::open(dir.path().join("bias.db"))
            .await
            .expect("open db");
        db.run_migrations().await.expect("migrations");
        db.upsert_article(&Article::new(
            "a-1",
            "Budget vote",
            "The chamber passed the budget.",
            "Fox News Politics",
        ))
        .await
        .expect("insert article");

        let store = Arc::new(db.clone());
        let pipeline = AnalysisPipeline::new(store.clone(), store, classifier);
        (dir, db, pipeline)
    }

    fn job(article_id: &str) -> Job {
        Job::new(article_id, JobPriority::High, &JobPolicy::default())
    }

    #[tokio::test]
    async fn test_process_with_classifier_result() {
        let result = BiasResult::new(BiasDirection::CenterRight, 2, 0.9, "Measured tone");
        let (_dir, db, pipeline) = setup(Arc::new(FixedClassifier(result.clone()))).await;

        let outcome = pipeline.process(&job("a-1")).await.expect("process");
        assert_eq!(outcome.source, AnalysisSource::Classifier);
        assert_eq!(outcome.result, result);

        let record = db.get("a-1").await.expect("get").expect("record");
        assert_eq!(record.status, AnalysisStatus::Completed);
        assert_eq!(record.direction, BiasDirection::CenterRight);
        assert_eq!(record.source, AnalysisSource::Classifier);
        assert!(record.processed_at.is_some());
    }

    #[tokio::test]
    async fn test_process_uses_fallback_on_error() {
        let (_dir, db, pipeline) = setup(Arc::new(FailingClassifier)).await;

        let outcome = pipeline.process(&job("a-1")).await.expect("process");
        assert!(outcome.used_fallback());
        assert_eq!(outcome.result.direction, BiasDirection::Right);
        assert!(outcome.result.confidence <= 0.7);

        let record = db.get("a-1").await.expect("get").expect("record");
        assert_eq!(record.status, AnalysisStatus::Completed);
        assert_eq!(record.source, AnalysisSource::Fallback);
    }

    #[tokio::test]
    async fn test_classifier_timeout_uses_fallback() {
        let (_dir, _db, pipeline) = setup(Arc::new(SlowClassifier)).await;
        let pipeline = pipeline.with_classify_timeout(Duration::from_millis(50));

        let outcome = pipeline.process(&job("a-1")).await.expect("process");
        assert!(outcome.used_fallback());
    }

    #[tokio::test]
    async fn test_missing_article() {
        let (_dir, db, pipeline) = setup(Arc::new(FailingClassifier)).await;

        let err = pipeline.process(&job("ghost")).await.unwrap_err();
        assert!(matches!(err, ProcessError::ArticleNotFound(ref id) if id == "ghost"));
        assert!(!err.is_retryable());

        let record = db.get("ghost").await.expect("get").expect("record");
        assert_eq!(record.status, AnalysisStatus::Processing);
    }

    #[tokio::test]
    async fn test_classifier_output_is_normalized() {
        let raw = BiasResult {
            direction: BiasDirection::Left,
            strength: 9,
            confidence: 1.5,
            reasoning: String::new(),
        };
        let (_dir, _db, pipeline) = setup(Arc::new(FixedClassifier(raw))).await;

        let outcome = pipeline.process(&job("a-1")).await.expect("process");
        assert_eq!(outcome.result.strength, 3);
        assert!((outcome.result.confidence - 0.5).abs() < f64::EPSILON);
    }
}
