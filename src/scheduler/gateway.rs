//! Enqueue gateway used by the article read path.
//!
//! [`AnalysisGateway::queue_analysis`] returns the queue's error to the
//! caller. [`AnalysisGateway::refresh_missing`] is the read-path helper: it
//! never fails, it logs and counts what it could not submit.

use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::analysis::AnalysisRecord;
use crate::metrics::MetricsCollector;
use crate::storage::AnalysisStore;

use super::job::JobPriority;
use super::queue::{JobQueue, QueueError};

/// Submits analysis requests without touching analysis records.
#[derive(Clone)]
pub struct AnalysisGateway {
    queue: Arc<dyn JobQueue>,
    metrics: MetricsCollector,
}

impl AnalysisGateway {
    pub fn new(queue: Arc<dyn JobQueue>) -> Self {
        Self {
            queue,
            metrics: MetricsCollector::new(),
        }
    }

    /// Submits one analysis job and returns its id.
    pub async fn queue_analysis(
        &self,
        article_id: &str,
        priority: JobPriority,
    ) -> Result<Uuid, QueueError> {
        let job = self.queue.enqueue(article_id, priority).await?;
        debug!(
            job_id = %job.id,
            article_id = %article_id,
            priority = %priority,
            "Queued analysis"
        );
        Ok(job.id)
    }

    /// Queues every article in `article_ids` that lacks a completed record.
    ///
    /// Records are read in one batch. Store and queue failures are logged and
    /// swallowed. Returns the number of jobs submitted.
    pub async fn refresh_missing(
        &self,
        store: &dyn AnalysisStore,
        article_ids: &[String],
        priority: JobPriority,
    ) -> usize {
        if article_ids.is_empty() {
            return 0;
        }

        let records = match store.get_many(article_ids).await {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, count = article_ids.len(), "Could not read analysis records");
                return 0;
            }
        };

        let submissions = article_ids
            .iter()
            .filter(|id| AnalysisRecord::needs_analysis(records.get(id.as_str())))
            .map(|article_id| async move {
                let result = self.queue_analysis(article_id, priority).await;
                if let Err(e) = &result {
                    self.metrics.record_enqueue_error();
                    warn!(article_id = %article_id, error = %e, "Failed to queue analysis");
                }
                result.is_ok()
            });

        join_all(submissions)
            .await
            .into_iter()
            .filter(|queued| *queued)
            .count()
    }
}
