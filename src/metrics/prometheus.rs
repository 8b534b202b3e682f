//! Prometheus metrics registration and export.
//!
//! All metrics live in one global registry created by [`init_metrics`].
//! Recording before initialization is a no-op.

use prometheus::{
    Counter, CounterVec, Encoder, Gauge, GaugeVec, Histogram, HistogramVec, Opts, Registry,
    TextEncoder,
};
use std::sync::OnceLock;

/// Global Prometheus registry for all bias-worker metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Total jobs processed, labeled by outcome (completed/retried/failed).
pub static JOBS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Job processing duration in seconds, labeled by outcome.
pub static JOB_DURATION: OnceLock<HistogramVec> = OnceLock::new();

/// Total results written, labeled by producer (classifier/fallback).
pub static CLASSIFICATIONS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Classifier call latency in seconds, including failed and timed-out calls.
pub static CLASSIFIER_LATENCY: OnceLock<Histogram> = OnceLock::new();

/// Number of jobs per queue state, labeled by queue name and state.
pub static QUEUE_DEPTH: OnceLock<GaugeVec> = OnceLock::new();

/// Number of jobs currently being processed.
pub static JOBS_IN_PROGRESS: OnceLock<Gauge> = OnceLock::new();

/// Number of running workers.
pub static ACTIVE_WORKERS: OnceLock<Gauge> = OnceLock::new();

/// Submissions the read path failed to enqueue.
pub static ENQUEUE_ERRORS: OnceLock<Counter> = OnceLock::new();

/// Initialize all metrics and register them with the registry.
///
/// Call once at startup. Later calls build a fresh registry but leave the
/// first one in place.
///
/// # Errors
///
/// Returns a `prometheus::Error` if metric registration fails, typically due to
/// duplicate metric names or invalid metric configurations.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    let registry = Registry::new();

    // Job metrics
    let jobs_total = CounterVec::new(
        Opts::new("bias_jobs_total", "Total analysis jobs processed"),
        &["outcome"],
    )?;

    let job_duration = HistogramVec::new(
        prometheus::HistogramOpts::new(
            "bias_job_duration_seconds",
            "Analysis job duration in seconds",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0]),
        &["outcome"],
    )?;

    // Classification metrics
    let classifications_total = CounterVec::new(
        Opts::new(
            "bias_classifications_total",
            "Analysis results written, by producer",
        ),
        &["source"],
    )?;

    let classifier_latency = Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "bias_classifier_latency_seconds",
            "Classifier call latency in seconds",
        )
        .buckets(vec![0.25, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]),
    )?;

    // Queue metrics
    let queue_depth = GaugeVec::new(
        Opts::new("bias_queue_depth", "Number of jobs per queue state"),
        &["queue_name", "state"],
    )?;

    let jobs_in_progress = Gauge::new(
        "bias_jobs_in_progress",
        "Number of jobs currently being processed",
    )?;

    let enqueue_errors = Counter::new(
        "bias_enqueue_errors_total",
        "Submissions from the read path that failed to enqueue",
    )?;

    // Worker metrics
    let active_workers = Gauge::new("bias_active_workers", "Number of running workers")?;

    registry.register(Box::new(jobs_total.clone()))?;
    registry.register(Box::new(job_duration.clone()))?;
    registry.register(Box::new(classifications_total.clone()))?;
    registry.register(Box::new(classifier_latency.clone()))?;
    registry.register(Box::new(queue_depth.clone()))?;
    registry.register(Box::new(jobs_in_progress.clone()))?;
    registry.register(Box::new(enqueue_errors.clone()))?;
    registry.register(Box::new(active_workers.clone()))?;

    // If any of these fail, metrics were already initialized (idempotent)
    let _ = REGISTRY.set(registry);
    let _ = JOBS_TOTAL.set(jobs_total);
    let _ = JOB_DURATION.set(job_duration);
    let _ = CLASSIFICATIONS_TOTAL.set(classifications_total);
    let _ = CLASSIFIER_LATENCY.set(classifier_latency);
    let _ = QUEUE_DEPTH.set(queue_depth);
    let _ = JOBS_IN_PROGRESS.set(jobs_in_progress);
    let _ = ENQUEUE_ERRORS.set(enqueue_errors);
    let _ = ACTIVE_WORKERS.set(active_workers);

    tracing::info!("Prometheus metrics initialized successfully");

    Ok(())
}

/// Export all registered metrics in Prometheus text format.
///
/// Returns a comment line instead of metrics if the registry has not been
/// initialized or encoding fails.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}

/// Writes the current metrics snapshot to `path`, replacing it.
pub async fn write_metrics_file(path: &std::path::Path) -> std::io::Result<()> {
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, export_metrics()).await?;
    tokio::fs::rename(&tmp, path).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics() {
        let result = init_metrics();
        assert!(result.is_ok() || REGISTRY.get().is_some());
    }

    #[test]
    fn test_metrics_after_init() {
        let _ = init_metrics();

        let collector = crate::metrics::MetricsCollector::new();
        collector.record_job("completed", 0.2);

        let metrics = export_metrics();
        assert!(!metrics.starts_with("# Error"));
        assert!(metrics.contains("bias_jobs_total"));
    }

    #[tokio::test]
    async fn test_write_metrics_file() {
        let _ = init_metrics();
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("metrics.prom");

        write_metrics_file(&path).await.expect("write should succeed");

        let written = std::fs::read_to_string(&path).expect("read back");
        assert!(!written.is_empty());
        assert!(!path.with_extension("tmp").exists());
    }
}
