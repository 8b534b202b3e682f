//! Job queue abstraction.
//!
//! A queue holds analysis jobs in four states:
//!
//! - **waiting**: pending, possibly delayed until `ready_at`
//! - **active**: claimed by a worker and covered by a lease
//! - **completed** / **failed**: finished bookkeeping, pruned by [`JobQueue::clean`]
//!
//! Dequeue serves the lowest rank first (high before normal), then the
//! earliest `ready_at`, and increments the job's attempt counter. A worker
//! that stops heartbeating loses its lease; [`JobQueue::recover_stalled`]
//! returns such jobs to waiting or, when attempts are exhausted, to failed.
//!
//! Implementations: [`RedisJobQueue`](super::RedisJobQueue) (durable) and
//! [`MemoryJobQueue`](super::MemoryJobQueue) (in-process).

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use super::job::{Job, JobPolicy, JobPriority};

/// Default queue name, used as the Redis key prefix.
pub const DEFAULT_QUEUE_NAME: &str = "bias-analysis";

/// Default lease length for an active job.
pub const DEFAULT_STALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Default retention for completed and failed job bookkeeping.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

/// Errors that can occur during queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Failed to connect to Redis.
    #[error("Redis connection failed: {0}")]
    ConnectionFailed(String),

    /// Redis operation failed.
    #[error("Redis operation failed: {0}")]
    RedisError(#[from] redis::RedisError),

    /// Failed to serialize job data.
    #[error("Serialization failed: {0}")]
    SerializationFailed(#[from] serde_json::Error),

    /// The queue was closed.
    #[error("Queue is closed")]
    Closed,
}

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Name of the queue (prefix for Redis keys).
    pub queue_name: String,
    /// Attempts, backoff and delay.
    pub policy: JobPolicy,
    /// Lease length; an active job not heartbeated within it is stalled.
    pub stall_timeout: Duration,
    /// Age after which finished job bookkeeping is pruned.
    pub retention: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            queue_name: DEFAULT_QUEUE_NAME.to_string(),
            policy: JobPolicy::default(),
            stall_timeout: DEFAULT_STALL_TIMEOUT,
            retention: DEFAULT_RETENTION,
        }
    }
}

impl QueueConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_queue_name(mut self, name: impl Into<String>) -> Self {
        self.queue_name = name.into();
        self
    }

    pub fn with_policy(mut self, policy: JobPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_stall_timeout(mut self, timeout: Duration) -> Self {
        self.stall_timeout = timeout;
        self
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }
}

/// Job counts per state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueCounts {
    /// Pending jobs, including delayed ones.
    pub waiting: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
}

impl QueueCounts {
    /// Returns the total number of jobs in all states.
    pub fn total(&self) -> u64 {
        self.waiting + self.active + self.completed + self.failed
    }
}

/// Result of a stall-recovery sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveredJobs {
    /// Stalled jobs returned to waiting.
    pub requeued: usize,
    /// Article ids of stalled jobs that had no attempts left and moved to failed.
    pub failed: Vec<String>,
}

impl RecoveredJobs {
    pub fn is_empty(&self) -> bool {
        self.requeued == 0 && self.failed.is_empty()
    }
}

/// Error recorded on jobs repossessed from a stalled worker.
pub const STALLED_ERROR: &str = "job stalled: worker lease expired";

/// A queue of analysis jobs.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Queue name, used as the Redis key prefix and metrics label.
    fn name(&self) -> &str;

    /// The retry and delay policy applied to new jobs.
    fn policy(&self) -> &JobPolicy;

    /// Stores a fully built job as waiting.
    async fn push(&self, job: Job) -> Result<(), QueueError>;

    /// Submits a new job for an article. The queue does not deduplicate.
    async fn enqueue(&self, article_id: &str, priority: JobPriority) -> Result<Job, QueueError> {
        let job = Job::new(article_id, priority, self.policy());
        self.push(job.clone()).await?;
        Ok(job)
    }

    /// Claims the next ready job, waiting up to `wait` for one.
    ///
    /// The returned job has `attempts_made` already incremented and is
    /// leased to the caller.
    async fn dequeue(&self, wait: Duration) -> Result<Option<Job>, QueueError>;

    /// Extends the lease of an active job. Returns `false` if the job is no
    /// longer active (for example it was repossessed as stalled).
    async fn heartbeat(&self, job_id: Uuid) -> Result<bool, QueueError>;

    /// Moves an active job to completed.
    ///
    /// `complete`, `retry` and `dead_letter` only act on a job that is still
    /// active or waiting. A job already in completed or failed (for example
    /// dead-lettered by stall recovery) is left where it is.
    async fn complete(&self, job: &Job) -> Result<(), QueueError>;

    /// Reschedules an active job after its backoff. Returns the backoff.
    async fn retry(&self, job: &Job, error: &str) -> Result<Duration, QueueError>;

    /// Moves a job to failed with its final error.
    async fn dead_letter(&self, job: &Job, error: &str) -> Result<(), QueueError>;

    /// Repossesses active jobs whose lease expired.
    async fn recover_stalled(&self) -> Result<RecoveredJobs, QueueError>;

    /// Returns job counts per state.
    async fn counts(&self) -> Result<QueueCounts, QueueError>;

    /// Prunes completed and failed jobs that finished more than `older_than` ago.
    async fn clean(&self, older_than: Duration) -> Result<u64, QueueError>;

    /// Returns the most recently failed jobs, newest first.
    async fn peek_failed(&self, limit: usize) -> Result<Vec<Job>, QueueError>;

    /// Closes the queue. Later calls fail with [`QueueError::Closed`].
    async fn close(&self) -> Result<(), QueueError>;
}
