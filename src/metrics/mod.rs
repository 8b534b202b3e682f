//! Prometheus-based monitoring.
//!
//! # Example
//!
//! ```ignore
//! use bias_worker::metrics::{init_metrics, export_metrics, MetricsCollector};
//!
//! init_metrics()?;
//!
//! let collector = MetricsCollector::new();
//! collector.record_job("completed", 1.2);
//!
//! let metrics_text = export_metrics();
//! ```

pub mod collectors;
pub mod prometheus;

pub use collectors::MetricsCollector;
pub use prometheus::{export_metrics, init_metrics, write_metrics_file};

pub use prometheus::{
    ACTIVE_WORKERS, CLASSIFICATIONS_TOTAL, CLASSIFIER_LATENCY, ENQUEUE_ERRORS, JOBS_IN_PROGRESS,
    JOBS_TOTAL, JOB_DURATION, QUEUE_DEPTH, REGISTRY,
};
