//! Worker pool for processing analysis jobs.
//!
//! A fixed number of workers pull jobs from a shared [`JobQueue`]. Each
//! worker runs as an independent async task and processes one job at a time.
//!
//! # Features
//!
//! - Configurable number of workers
//! - Graceful shutdown with broadcast channel
//! - Lease heartbeats while a job runs
//! - Retry with backoff for store failures, dead-lettering on exhaustion
//! - Stall recovery and bookkeeping cleanup on an interval
//! - Pool statistics tracking

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::ProcessError;
use crate::metrics::MetricsCollector;
use crate::storage::AnalysisStore;

use super::job::{Job, JobOutcome};
use super::processor::{AnalysisPipeline, ProcessOutcome, DEFAULT_CLASSIFY_TIMEOUT};
use super::queue::{JobQueue, QueueError, DEFAULT_RETENTION, STALLED_ERROR};

/// Errors that can occur in the worker pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// The job queue failed.
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    /// Pool is already running.
    #[error("Pool is already running")]
    AlreadyRunning,

    /// Pool is not running.
    #[error("Pool is not running")]
    NotRunning,

    /// Shutdown timed out.
    #[error("Shutdown timed out after {0:?}")]
    ShutdownTimeout(Duration),
}

/// Configuration for the worker pool.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of worker tasks to spawn.
    pub num_workers: usize,
    /// How long a dequeue waits for a job before checking for shutdown.
    pub poll_interval: Duration,
    /// Timeout for graceful shutdown.
    pub shutdown_timeout: Duration,
    /// How often a running job renews its lease.
    pub heartbeat_interval: Duration,
    /// How often stalled jobs are repossessed.
    pub stall_check_interval: Duration,
    /// How often finished job bookkeeping is pruned.
    pub cleanup_interval: Duration,
    /// Age after which finished job bookkeeping is pruned.
    pub retention: Duration,
    /// Bound on each classifier call.
    pub classify_timeout: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            num_workers: 2,
            poll_interval: Duration::from_secs(1),
            shutdown_timeout: Duration::from_secs(60),
            heartbeat_interval: Duration::from_secs(10),
            stall_check_interval: Duration::from_secs(30),
            cleanup_interval: Duration::from_secs(60 * 60),
            retention: DEFAULT_RETENTION,
            classify_timeout: DEFAULT_CLASSIFY_TIMEOUT,
        }
    }
}

impl WorkerPoolConfig {
    /// Creates a new configuration with the specified number of workers.
    pub fn new(num_workers: usize) -> Self {
        Self {
            num_workers: num_workers.max(1),
            ..Default::default()
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_stall_check_interval(mut self, interval: Duration) -> Self {
        self.stall_check_interval = interval;
        self
    }

    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_classify_timeout(mut self, timeout: Duration) -> Self {
        self.classify_timeout = timeout;
        self
    }
}

/// Statistics about the worker pool.
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    /// Number of workers in the pool.
    pub num_workers: usize,
    /// Number of workers currently processing jobs.
    pub active_workers: usize,
    /// Jobs that stored a result.
    pub jobs_completed: u64,
    /// Jobs that were dead-lettered.
    pub jobs_failed: u64,
    /// Attempts that failed and were rescheduled.
    pub jobs_retried: u64,
    /// Completed jobs whose result came from the fallback estimator.
    pub fallbacks_used: u64,
    /// Average duration of an attempt.
    pub average_job_duration: Duration,
}

impl PoolStats {
    /// Returns the total number of jobs that reached a final state.
    pub fn total_processed(&self) -> u64 {
        self.jobs_completed + self.jobs_failed
    }

    /// Returns the completion rate as a percentage.
    pub fn success_rate(&self) -> f64 {
        let total = self.total_processed();
        if total == 0 {
            0.0
        } else {
            (self.jobs_completed as f64 / total as f64) * 100.0
        }
    }
}

/// Thread-safe statistics tracker.
#[derive(Debug, Default)]
struct SharedPoolStats {
    jobs_completed: AtomicU64,
    jobs_failed: AtomicU64,
    jobs_retried: AtomicU64,
    fallbacks_used: AtomicU64,
    attempts: AtomicU64,
    total_duration_ms: AtomicU64,
    active_workers: AtomicU64,
}

impl SharedPoolStats {
    fn new() -> Self {
        Self::default()
    }

    fn record(&self, outcome: JobOutcome, duration: Duration) {
        let counter = match outcome {
            JobOutcome::Completed => &self.jobs_completed,
            JobOutcome::Retried => &self.jobs_retried,
            JobOutcome::Failed => &self.jobs_failed,
        };
        counter.fetch_add(1, Ordering::SeqCst);
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.total_duration_ms
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
    }

    fn record_fallback(&self) {
        self.fallbacks_used.fetch_add(1, Ordering::SeqCst);
    }

    fn increment_active(&self) {
        self.active_workers.fetch_add(1, Ordering::SeqCst);
    }

    fn decrement_active(&self) {
        self.active_workers.fetch_sub(1, Ordering::SeqCst);
    }

    fn to_pool_stats(&self, num_workers: usize) -> PoolStats {
        let attempts = self.attempts.load(Ordering::SeqCst);
        let total_duration_ms = self.total_duration_ms.load(Ordering::SeqCst);

        let average_duration = if attempts > 0 {
            Duration::from_millis(total_duration_ms / attempts)
        } else {
            Duration::ZERO
        };

        PoolStats {
            num_workers,
            active_workers: self.active_workers.load(Ordering::SeqCst) as usize,
            jobs_completed: self.jobs_completed.load(Ordering::SeqCst),
            jobs_failed: self.jobs_failed.load(Ordering::SeqCst),
            jobs_retried: self.jobs_retried.load(Ordering::SeqCst),
            fallbacks_used: self.fallbacks_used.load(Ordering::SeqCst),
            average_job_duration: average_duration,
        }
    }
}

/// Worker pool that manages multiple workers processing jobs from a queue.
pub struct WorkerPool {
    config: WorkerPoolConfig,
    queue: Arc<dyn JobQueue>,
    pipeline: Arc<AnalysisPipeline>,
    shutdown_tx: broadcast::Sender<()>,
    worker_handles: Vec<JoinHandle<()>>,
    stats: Arc<SharedPoolStats>,
    is_running: AtomicBool,
    metrics: MetricsCollector,
}

impl WorkerPool {
    /// Creates a new worker pool.
    ///
    /// The pipeline's classifier timeout is replaced by
    /// `config.classify_timeout`.
    pub fn new(
        config: WorkerPoolConfig,
        queue: Arc<dyn JobQueue>,
        pipeline: AnalysisPipeline,
    ) -> Self {
        // Buffer size of 1 is sufficient since we only send once
        let (shutdown_tx, _) = broadcast::channel(1);
        let pipeline = pipeline.with_classify_timeout(config.classify_timeout);

        Self {
            config,
            queue,
            pipeline: Arc::new(pipeline),
            shutdown_tx,
            worker_handles: Vec::new(),
            stats: Arc::new(SharedPoolStats::new()),
            is_running: AtomicBool::new(false),
            metrics: MetricsCollector::new(),
        }
    }

    /// Starts all workers in the pool.
    ///
    /// Jobs stalled by a previous run are repossessed first, then workers
    /// begin polling the queue immediately.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::AlreadyRunning` if the pool is already running.
    pub async fn start(&mut self) -> Result<(), PoolError> {
        if self.is_running.load(Ordering::SeqCst) {
            return Err(PoolError::AlreadyRunning);
        }

        recover_stalled(self.queue.as_ref(), self.pipeline.store().as_ref()).await;

        for i in 0..self.config.num_workers {
            let worker = Worker {
                id: format!("worker-{}", i),
                queue: Arc::clone(&self.queue),
                pipeline: Arc::clone(&self.pipeline),
                shutdown_rx: self.shutdown_tx.subscribe(),
                poll_interval: self.config.poll_interval,
                heartbeat_interval: self.config.heartbeat_interval,
                stats: Arc::clone(&self.stats),
                metrics: self.metrics,
            };

            self.worker_handles.push(tokio::spawn(worker.run()));
        }

        let maintenance = Maintenance {
            queue: Arc::clone(&self.queue),
            store: Arc::clone(self.pipeline.store()),
            shutdown_rx: self.shutdown_tx.subscribe(),
            stall_check_interval: self.config.stall_check_interval,
            cleanup_interval: self.config.cleanup_interval,
            retention: self.config.retention,
            metrics: self.metrics,
        };
        self.worker_handles.push(tokio::spawn(maintenance.run()));

        self.is_running.store(true, Ordering::SeqCst);
        self.metrics.update_workers(self.config.num_workers);
        info!(
            num_workers = self.config.num_workers,
            queue = %self.queue.name(),
            "Worker pool started"
        );

        Ok(())
    }

    /// Gracefully shuts down all workers.
    ///
    /// Sends a shutdown signal and waits for workers to finish their
    /// current jobs.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::ShutdownTimeout` if workers don't stop within
    /// the configured timeout.
    pub async fn shutdown(&mut self) -> Result<(), PoolError> {
        if !self.is_running.load(Ordering::SeqCst) {
            return Err(PoolError::NotRunning);
        }

        info!("Initiating worker pool shutdown");

        // Ignore send error - workers may have already stopped
        let _ = self.shutdown_tx.send(());

        let shutdown_future = async {
            for handle in self.worker_handles.drain(..) {
                if let Err(e) = handle.await {
                    error!(error = %e, "Worker task panicked during shutdown");
                }
            }
        };

        let result = tokio::time::timeout(self.config.shutdown_timeout, shutdown_future).await;
        self.is_running.store(false, Ordering::SeqCst);
        self.metrics.update_workers(0);

        match result {
            Ok(()) => {
                info!("Worker pool shutdown complete");
                Ok(())
            }
            Err(_) => Err(PoolError::ShutdownTimeout(self.config.shutdown_timeout)),
        }
    }

    /// Returns current pool statistics.
    pub fn stats(&self) -> PoolStats {
        self.stats.to_pool_stats(self.config.num_workers)
    }

    /// Returns whether the pool is currently running.
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    /// Returns the number of workers in the pool.
    pub fn num_workers(&self) -> usize {
        self.config.num_workers
    }

    /// Returns a reference to the job queue.
    pub fn queue(&self) -> &Arc<dyn JobQueue> {
        &self.queue
    }
}

/// Repossesses stalled jobs and marks the records of exhausted ones FAILED.
async fn recover_stalled(queue: &dyn JobQueue, store: &dyn AnalysisStore) {
    let recovered = match queue.recover_stalled().await {
        Ok(recovered) => recovered,
        Err(e) => {
            warn!(error = %e, "Failed to recover stalled jobs");
            return;
        }
    };

    if recovered.is_empty() {
        return;
    }
    info!(
        requeued = recovered.requeued,
        failed = recovered.failed.len(),
        "Recovered stalled jobs"
    );

    // Best effort, same as a worker giving up on a job.
    for article_id in &recovered.failed {
        if let Err(e) = store.mark_failed(article_id, STALLED_ERROR).await {
            warn!(
                article_id = %article_id,
                error = %e,
                "Could not record analysis failure"
            );
        }
    }
}

/// Periodic stall recovery, cleanup and queue-depth reporting.
struct Maintenance {
    queue: Arc<dyn JobQueue>,
    store: Arc<dyn AnalysisStore>,
    shutdown_rx: broadcast::Receiver<()>,
    stall_check_interval: Duration,
    cleanup_interval: Duration,
    retention: Duration,
    metrics: MetricsCollector,
}

impl Maintenance {
    async fn run(mut self) {
        let mut stall_tick = tokio::time::interval(self.stall_check_interval);
        let mut cleanup_tick = tokio::time::interval(self.cleanup_interval);
        stall_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        cleanup_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        // Both intervals fire immediately; recovery already ran on start.
        stall_tick.tick().await;

        loop {
            tokio::select! {
                _ = self.shutdown_rx.recv() => break,
                _ = stall_tick.tick() => {
                    recover_stalled(self.queue.as_ref(), self.store.as_ref()).await;
                    match self.queue.counts().await {
                        Ok(counts) => self.metrics.update_queue_depth(self.queue.name(), &counts),
                        Err(e) => debug!(error = %e, "Failed to read queue counts"),
                    }
                }
                _ = cleanup_tick.tick() => {
                    match self.queue.clean(self.retention).await {
                        Ok(0) => {}
                        Ok(removed) => info!(removed = removed, "Pruned finished jobs"),
                        Err(e) => warn!(error = %e, "Failed to prune finished jobs"),
                    }
                }
            }
        }

        debug!("Maintenance task stopped");
    }
}

/// A single worker that processes jobs from the queue.
struct Worker {
    /// Unique identifier for this worker.
    id: String,
    queue: Arc<dyn JobQueue>,
    pipeline: Arc<AnalysisPipeline>,
    shutdown_rx: broadcast::Receiver<()>,
    /// How long a dequeue waits when the queue is empty.
    poll_interval: Duration,
    heartbeat_interval: Duration,
    stats: Arc<SharedPoolStats>,
    metrics: MetricsCollector,
}

impl Worker {
    /// Main worker loop.
    ///
    /// Polls for jobs and processes them until a shutdown signal is received
    /// or the queue closes.
    async fn run(mut self) {
        info!(worker_id = %self.id, "Worker started");

        loop {
            match self.shutdown_rx.try_recv() {
                Ok(()) | Err(broadcast::error::TryRecvError::Closed) => {
                    info!(worker_id = %self.id, "Worker received shutdown signal");
                    break;
                }
                Err(broadcast::error::TryRecvError::Lagged(_)) => {
                    continue;
                }
                Err(broadcast::error::TryRecvError::Empty) => {}
            }

            match self.queue.dequeue(self.poll_interval).await {
                Ok(Some(job)) => {
                    self.process_job(job).await;
                }
                Ok(None) => {
                    debug!(worker_id = %self.id, "No jobs available");
                }
                Err(QueueError::Closed) => {
                    info!(worker_id = %self.id, "Queue closed");
                    break;
                }
                Err(e) => {
                    error!(worker_id = %self.id, error = %e, "Failed to dequeue job");
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }

        info!(worker_id = %self.id, "Worker stopped");
    }

    /// Processes one attempt of a job and settles it with the queue.
    async fn process_job(&self, job: Job) -> JobOutcome {
        let start_time = Instant::now();

        info!(
            worker_id = %self.id,
            job_id = %job.id,
            article_id = %job.article_id,
            attempt = job.attempts_made,
            "Processing job"
        );

        self.stats.increment_active();
        self.metrics.inc_jobs_in_progress();

        let result = self.process_with_heartbeat(&job).await;

        self.stats.decrement_active();
        self.metrics.dec_jobs_in_progress();

        let outcome = match result {
            Ok(processed) => self.settle_completed(&job, &processed).await,
            Err(e) => self.settle_failed(&job, &e).await,
        };

        let duration = start_time.elapsed();
        self.stats.record(outcome, duration);
        self.metrics
            .record_job(outcome.as_str(), duration.as_secs_f64());

        outcome
    }

    /// Runs the pipeline while renewing the job's lease.
    async fn process_with_heartbeat(&self, job: &Job) -> Result<ProcessOutcome, ProcessError> {
        let mut heartbeat = tokio::time::interval(self.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately; dequeue just set the lease.
        heartbeat.tick().await;

        let work = self.pipeline.process(job);
        tokio::pin!(work);

        loop {
            tokio::select! {
                result = &mut work => return result,
                _ = heartbeat.tick() => {
                    match self.queue.heartbeat(job.id).await {
                        Ok(true) => {}
                        Ok(false) => warn!(
                            worker_id = %self.id,
                            job_id = %job.id,
                            "Lease lost; job was repossessed"
                        ),
                        Err(e) => warn!(
                            worker_id = %self.id,
                            job_id = %job.id,
                            error = %e,
                            "Failed to renew lease"
                        ),
                    }
                }
            }
        }
    }

    async fn settle_completed(&self, job: &Job, processed: &ProcessOutcome) -> JobOutcome {
        if processed.used_fallback() {
            self.stats.record_fallback();
        }

        if let Err(e) = self.queue.complete(job).await {
            error!(
                worker_id = %self.id,
                job_id = %job.id,
                error = %e,
                "Failed to mark job complete"
            );
        }

        info!(
            worker_id = %self.id,
            job_id = %job.id,
            article_id = %job.article_id,
            source = %processed.source.as_str(),
            direction = %processed.result.direction,
            "Job completed"
        );

        JobOutcome::Completed
    }

    async fn settle_failed(&self, job: &Job, err: &ProcessError) -> JobOutcome {
        let message = err.to_string();

        if err.is_retryable() && job.should_retry() {
            match self.queue.retry(job, &message).await {
                Ok(backoff) => warn!(
                    worker_id = %self.id,
                    job_id = %job.id,
                    error = %err,
                    remaining_attempts = job.remaining_attempts(),
                    backoff_ms = backoff.as_millis() as u64,
                    "Job failed, scheduled for retry"
                ),
                Err(e) => error!(
                    worker_id = %self.id,
                    job_id = %job.id,
                    error = %e,
                    "Failed to reschedule job"
                ),
            }
            return JobOutcome::Retried;
        }

        error!(
            worker_id = %self.id,
            job_id = %job.id,
            article_id = %job.article_id,
            error = %err,
            attempts = job.attempts_made,
            "Job failed, moving to dead letter queue"
        );

        if let Err(e) = self.queue.dead_letter(job, &message).await {
            error!(
                worker_id = %self.id,
                job_id = %job.id,
                error = %e,
                "Failed to move job to dead letter queue"
            );
        }

        // Best effort: if the store is what failed, the record stays PROCESSING.
        let store: &Arc<dyn AnalysisStore> = self.pipeline.store();
        if let Err(e) = store.mark_failed(&job.article_id, &message).await {
            warn!(
                article_id = %job.article_id,
                error = %e,
                "Could not record analysis failure"
            );
        }

        JobOutcome::Failed
    }
}
