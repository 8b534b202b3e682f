//! High-level recording interface over the raw Prometheus metrics.

use crate::analysis::AnalysisSource;
use crate::scheduler::QueueCounts;

use super::prometheus::{
    ACTIVE_WORKERS, CLASSIFICATIONS_TOTAL, CLASSIFIER_LATENCY, ENQUEUE_ERRORS, JOBS_IN_PROGRESS,
    JOBS_TOTAL, JOB_DURATION, QUEUE_DEPTH,
};

/// Metrics collector for recording worker operational metrics.
///
/// Zero-sized; every method is a no-op until `init_metrics()` has run.
///
/// # Example
///
/// ```ignore
/// use bias_worker::metrics::{init_metrics, MetricsCollector};
///
/// init_metrics()?;
/// let collector = MetricsCollector::new();
/// collector.record_job("completed", 1.4);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    pub fn new() -> Self {
        Self
    }

    /// Record a finished job attempt.
    ///
    /// # Arguments
    ///
    /// * `outcome` - `completed`, `retried` or `failed`
    /// * `duration_secs` - Attempt duration in seconds
    pub fn record_job(&self, outcome: &str, duration_secs: f64) {
        if let Some(jobs_total) = JOBS_TOTAL.get() {
            jobs_total.with_label_values(&[outcome]).inc();
        }

        if let Some(job_duration) = JOB_DURATION.get() {
            job_duration
                .with_label_values(&[outcome])
                .observe(duration_secs);
        }

        tracing::trace!(
            outcome = outcome,
            duration_secs = duration_secs,
            "Recorded job metric"
        );
    }

    /// Record which producer supplied a stored result.
    pub fn record_classification(&self, source: AnalysisSource) {
        if let Some(classifications) = CLASSIFICATIONS_TOTAL.get() {
            classifications
                .with_label_values(&[source.as_str()])
                .inc();
        }
    }

    /// Record the latency of one classifier call.
    pub fn record_classifier_latency(&self, latency_secs: f64) {
        if let Some(latency) = CLASSIFIER_LATENCY.get() {
            latency.observe(latency_secs);
        }
    }

    /// Update the per-state depth gauges for a queue.
    pub fn update_queue_depth(&self, queue_name: &str, counts: &QueueCounts) {
        if let Some(queue_depth) = QUEUE_DEPTH.get() {
            for (state, value) in [
                ("waiting", counts.waiting),
                ("active", counts.active),
                ("completed", counts.completed),
                ("failed", counts.failed),
            ] {
                queue_depth
                    .with_label_values(&[queue_name, state])
                    .set(value as f64);
            }
        }

        tracing::trace!(
            queue_name = queue_name,
            waiting = counts.waiting,
            active = counts.active,
            "Updated queue depth metric"
        );
    }

    /// Update the count of running workers.
    pub fn update_workers(&self, count: usize) {
        if let Some(active_workers) = ACTIVE_WORKERS.get() {
            active_workers.set(count as f64);
        }

        tracing::trace!(count = count, "Updated active workers metric");
    }

    pub fn inc_jobs_in_progress(&self) {
        if let Some(jobs_in_progress) = JOBS_IN_PROGRESS.get() {
            jobs_in_progress.inc();
        }
    }

    pub fn dec_jobs_in_progress(&self) {
        if let Some(jobs_in_progress) = JOBS_IN_PROGRESS.get() {
            jobs_in_progress.dec();
        }
    }

    /// Record a read-path submission that could not be enqueued.
    pub fn record_enqueue_error(&self) {
        if let Some(enqueue_errors) = ENQUEUE_ERRORS.get() {
            enqueue_errors.inc();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{export_metrics, init_metrics};

    fn ensure_metrics_init() {
        let _ = init_metrics();
    }

    #[test]
    fn test_metrics_collector_new() {
        let collector = MetricsCollector::new();
        assert!(std::mem::size_of_val(&collector) == 0);
    }

    #[test]
    fn test_record_job_and_classification() {
        ensure_metrics_init();
        let collector = MetricsCollector::new();

        collector.record_job("completed", 1.5);
        collector.record_job("retried", 0.2);
        collector.record_job("failed", 0.1);
        collector.record_classification(AnalysisSource::Classifier);
        collector.record_classification(AnalysisSource::Fallback);
        collector.record_classifier_latency(0.8);

        let text = export_metrics();
        assert!(text.contains("bias_classifications_total"));
        assert!(text.contains("source=\"fallback\""));
    }

    #[test]
    fn test_update_queue_depth() {
        ensure_metrics_init();
        let collector = MetricsCollector::new();

        let counts = QueueCounts {
            waiting: 4,
            active: 2,
            completed: 10,
            failed: 1,
        };
        collector.update_queue_depth("bias-analysis", &counts);

        let text = export_metrics();
        assert!(text.contains("bias_queue_depth"));
        assert!(text.contains("state=\"waiting\""));
    }

    #[test]
    fn test_gauges_do_not_panic() {
        ensure_metrics_init();
        let collector = MetricsCollector::new();

        collector.update_workers(2);
        collector.inc_jobs_in_progress();
        collector.dec_jobs_in_progress();
        collector.record_enqueue_error();
    }
}
