//! Redis-backed job queue.
//!
//! # Key Layout
//!
//! All keys are prefixed with the queue name:
//!
//! - `{queue}:jobs`: hash of job id to serialized job
//! - `{queue}:pending:{rank}`: sorted set per priority rank, scored by `ready_at` (ms)
//! - `{queue}:active`: sorted set of claimed jobs, scored by lease deadline (ms)
//! - `{queue}:completed`, `{queue}:failed`: sorted sets scored by finish time (ms)
//!
//! # Reliability
//!
//! Dequeue is a single Lua script: it picks the first ready id from the
//! lowest rank, moves it to `active` with a lease, and bumps the attempt
//! counter. A worker that dies mid-job stops heartbeating; its lease
//! expires and [`JobQueue::recover_stalled`] hands the job back.
//!
//! Every later move goes through a second script that first removes the id
//! from its source sets and writes the job only if one of them held it, so
//! a job that already reached completed or failed is never settled twice.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use super::job::{after, Job, JobPolicy, JobPriority};
use super::queue::{JobQueue, QueueConfig, QueueCounts, QueueError, RecoveredJobs, STALLED_ERROR};

/// Interval between claim attempts while waiting for a job.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Claims the next ready job.
///
/// KEYS: pending:1, pending:2, active, jobs
/// ARGV: now (ms), lease deadline (ms)
const DEQUEUE_SCRIPT: &str = r#"
for i = 1, 2 do
  local ids = redis.call('ZRANGEBYSCORE', KEYS[i], '-inf', ARGV[1], 'LIMIT', 0, 1)
  if #ids > 0 then
    local id = ids[1]
    redis.call('ZREM', KEYS[i], id)
    local raw = redis.call('HGET', KEYS[4], id)
    if raw then
      local job = cjson.decode(raw)
      job['attempts_made'] = (tonumber(job['attempts_made']) or 0) + 1
      raw = cjson.encode(job)
      redis.call('HSET', KEYS[4], id, raw)
      redis.call('ZADD', KEYS[3], ARGV[2], id)
      return raw
    end
  end
end
return false
"#;

/// Moves a job into `target` if it is still in one of the source sets.
///
/// KEYS: jobs, target, source...
/// ARGV: id, serialized job, target score
/// Returns 1 if the job moved, 0 if no source held it.
const SETTLE_SCRIPT: &str = r#"
local removed = 0
for i = 3, #KEYS do
  removed = removed + redis.call('ZREM', KEYS[i], ARGV[1])
end
if removed == 0 then
  return 0
end
redis.call('HSET', KEYS[1], ARGV[1], ARGV[2])
redis.call('ZADD', KEYS[2], ARGV[3], ARGV[1])
return 1
"#;

fn millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

/// Durable job queue on Redis.
pub struct RedisJobQueue {
    /// Redis connection manager (handles reconnection automatically).
    redis: ConnectionManager,
    config: QueueConfig,
    jobs_key: String,
    active_key: String,
    completed_key: String,
    failed_key: String,
    dequeue_script: redis::Script,
    settle_script: redis::Script,
    closed: AtomicBool,
}

impl std::fmt::Debug for RedisJobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisJobQueue")
            .field("queue_name", &self.config.queue_name)
            .finish_non_exhaustive()
    }
}

impl RedisJobQueue {
    /// Connects to Redis and creates a new job queue.
    ///
    /// # Arguments
    ///
    /// * `redis_url` - Redis connection URL (e.g., "redis://localhost:6379")
    /// * `config` - Queue name, retry policy and lease settings
    ///
    /// # Errors
    ///
    /// Returns `QueueError::ConnectionFailed` if the connection fails.
    pub async fn connect(redis_url: &str, config: QueueConfig) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| QueueError::ConnectionFailed(e.to_string()))?;

        let redis = ConnectionManager::new(client)
            .await
            .map_err(|e| QueueError::ConnectionFailed(e.to_string()))?;

        Ok(Self::from_connection(redis, config))
    }

    /// Creates a queue from an existing ConnectionManager.
    pub fn from_connection(redis: ConnectionManager, config: QueueConfig) -> Self {
        let name = &config.queue_name;
        Self {
            jobs_key: format!("{}:jobs", name),
            active_key: format!("{}:active", name),
            completed_key: format!("{}:completed", name),
            failed_key: format!("{}:failed", name),
            dequeue_script: redis::Script::new(DEQUEUE_SCRIPT),
            settle_script: redis::Script::new(SETTLE_SCRIPT),
            closed: AtomicBool::new(false),
            redis,
            config,
        }
    }

    fn pending_key(&self, priority: JobPriority) -> String {
        format!("{}:pending:{}", self.config.queue_name, priority.rank())
    }

    fn ensure_open(&self) -> Result<(), QueueError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(QueueError::Closed)
        } else {
            Ok(())
        }
    }

    async fn try_claim(&self) -> Result<Option<Job>, QueueError> {
        let now = Utc::now();
        let lease = after(now, self.config.stall_timeout);
        let mut conn = self.redis.clone();

        let raw: Option<String> = self
            .dequeue_script
            .key(self.pending_key(JobPriority::High))
            .key(self.pending_key(JobPriority::Normal))
            .key(&self.active_key)
            .key(&self.jobs_key)
            .arg(millis(now))
            .arg(millis(lease))
            .invoke_async(&mut conn)
            .await?;

        match raw {
            Some(data) => Ok(Some(serde_json::from_str(&data)?)),
            None => Ok(None),
        }
    }

    /// Moves a job still in `active` or a pending set to `target`.
    ///
    /// Returns `false` when the job had already left those sets.
    async fn settle(&self, job: &Job, target: &str, score: i64) -> Result<bool, QueueError> {
        let sources = [
            self.active_key.clone(),
            self.pending_key(JobPriority::High),
            self.pending_key(JobPriority::Normal),
        ];
        self.settle_from(job, &sources, target, score).await
    }

    async fn settle_from(
        &self,
        job: &Job,
        sources: &[String],
        target: &str,
        score: i64,
    ) -> Result<bool, QueueError> {
        let serialized = serde_json::to_string(job)?;
        let mut conn = self.redis.clone();

        let mut invocation = self.settle_script.prepare_invoke();
        invocation.key(&self.jobs_key).key(target);
        for source in sources {
            invocation.key(source);
        }
        let moved: i64 = invocation
            .arg(job.id.to_string())
            .arg(serialized)
            .arg(score)
            .invoke_async(&mut conn)
            .await?;

        if moved == 0 {
            debug!(job_id = %job.id, target = %target, "Job already finished; left in place");
        }
        Ok(moved == 1)
    }

    async fn load_jobs(&self, ids: &[String]) -> Result<Vec<Job>, QueueError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut conn = self.redis.clone();
        let raw: Vec<Option<String>> = redis::cmd("HMGET")
            .arg(&self.jobs_key)
            .arg(ids)
            .query_async(&mut conn)
            .await?;

        let mut jobs = Vec::with_capacity(raw.len());
        for data in raw.into_iter().flatten() {
            jobs.push(serde_json::from_str(&data)?);
        }
        Ok(jobs)
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    fn name(&self) -> &str {
        &self.config.queue_name
    }

    fn policy(&self) -> &JobPolicy {
        &self.config.policy
    }

    async fn push(&self, job: Job) -> Result<(), QueueError> {
        self.ensure_open()?;
        let serialized = serde_json::to_string(&job)?;
        let mut conn = self.redis.clone();

        let mut pipe = redis::pipe();
        pipe.atomic()
            .hset(&self.jobs_key, job.id.to_string(), serialized)
            .zadd(
                self.pending_key(job.priority),
                job.id.to_string(),
                millis(job.ready_at),
            );
        pipe.query_async::<_, ()>(&mut conn).await?;

        Ok(())
    }

    async fn dequeue(&self, wait: Duration) -> Result<Option<Job>, QueueError> {
        let deadline = Instant::now() + wait;

        loop {
            self.ensure_open()?;

            if let Some(job) = self.try_claim().await? {
                return Ok(Some(job));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep((deadline - now).min(POLL_INTERVAL)).await;
        }
    }

    async fn heartbeat(&self, job_id: Uuid) -> Result<bool, QueueError> {
        let mut conn = self.redis.clone();
        let id = job_id.to_string();

        let current: Option<f64> = conn.zscore(&self.active_key, &id).await?;
        if current.is_none() {
            return Ok(false);
        }

        let lease = after(Utc::now(), self.config.stall_timeout);
        redis::cmd("ZADD")
            .arg(&self.active_key)
            .arg("XX")
            .arg(millis(lease))
            .arg(&id)
            .query_async::<_, ()>(&mut conn)
            .await?;

        Ok(true)
    }

    async fn complete(&self, job: &Job) -> Result<(), QueueError> {
        let mut finished = job.clone();
        let now = Utc::now();
        finished.finished_at = Some(now);
        self.settle(&finished, &self.completed_key, millis(now)).await?;
        Ok(())
    }

    async fn retry(&self, job: &Job, error: &str) -> Result<Duration, QueueError> {
        let backoff = self.config.policy.backoff_for(job.attempts_made);
        let mut rescheduled = job.clone();
        rescheduled.last_error = Some(error.to_string());
        rescheduled.ready_at = after(Utc::now(), backoff);

        self.settle(
            &rescheduled,
            &self.pending_key(rescheduled.priority),
            millis(rescheduled.ready_at),
        )
        .await?;

        Ok(backoff)
    }

    async fn dead_letter(&self, job: &Job, error: &str) -> Result<(), QueueError> {
        let mut failed = job.clone();
        let now = Utc::now();
        failed.last_error = Some(error.to_string());
        failed.finished_at = Some(now);
        self.settle(&failed, &self.failed_key, millis(now)).await?;
        Ok(())
    }

    async fn recover_stalled(&self) -> Result<RecoveredJobs, QueueError> {
        let now = Utc::now();
        let mut conn = self.redis.clone();
        let mut recovered = RecoveredJobs::default();

        let stalled: Vec<String> = conn
            .zrangebyscore(&self.active_key, "-inf", millis(now))
            .await?;

        let active = [self.active_key.clone()];
        for id in stalled {
            let raw: Option<String> = conn.hget(&self.jobs_key, &id).await?;
            let Some(raw) = raw else {
                continue;
            };
            let mut job: Job = serde_json::from_str(&raw)?;
            job.last_error = Some(STALLED_ERROR.to_string());

            // Only one caller moves the id out of `active`.
            if job.should_retry() {
                job.ready_at = now;
                let pending = self.pending_key(job.priority);
                if self.settle_from(&job, &active, &pending, millis(now)).await? {
                    recovered.requeued += 1;
                }
            } else {
                job.finished_at = Some(now);
                if self
                    .settle_from(&job, &active, &self.failed_key, millis(now))
                    .await?
                {
                    recovered.failed.push(job.article_id.clone());
                }
            }
        }

        Ok(recovered)
    }

    async fn counts(&self) -> Result<QueueCounts, QueueError> {
        let mut conn = self.redis.clone();

        let mut pipe = redis::pipe();
        pipe.zcard(self.pending_key(JobPriority::High))
            .zcard(self.pending_key(JobPriority::Normal))
            .zcard(&self.active_key)
            .zcard(&self.completed_key)
            .zcard(&self.failed_key);
        let (high, normal, active, completed, failed): (u64, u64, u64, u64, u64) =
            pipe.query_async(&mut conn).await?;

        Ok(QueueCounts {
            waiting: high + normal,
            active,
            completed,
            failed,
        })
    }

    async fn clean(&self, older_than: Duration) -> Result<u64, QueueError> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(older_than).unwrap_or(chrono::Duration::zero());
        let mut conn = self.redis.clone();
        let mut removed = 0u64;

        for key in [&self.completed_key, &self.failed_key] {
            let ids: Vec<String> = conn.zrangebyscore(key, "-inf", millis(cutoff)).await?;
            if ids.is_empty() {
                continue;
            }

            let mut pipe = redis::pipe();
            pipe.atomic()
                .hdel(&self.jobs_key, &ids)
                .zrem(key, &ids);
            pipe.query_async::<_, ()>(&mut conn).await?;
            removed += ids.len() as u64;
        }

        Ok(removed)
    }

    async fn peek_failed(&self, limit: usize) -> Result<Vec<Job>, QueueError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut conn = self.redis.clone();
        let ids: Vec<String> = conn
            .zrevrange(&self.failed_key, 0, limit as isize - 1)
            .await?;

        self.load_jobs(&ids).await
    }

    async fn close(&self) -> Result<(), QueueError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
