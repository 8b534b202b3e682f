//! In-process job queue.
//!
//! Same semantics as the Redis queue without durability: jobs live in a
//! mutex-guarded map and waiting consumers are woken through a [`Notify`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use super::job::{after, Job, JobPolicy};
use super::queue::{JobQueue, QueueConfig, QueueCounts, QueueError, RecoveredJobs, STALLED_ERROR};

/// Upper bound on a single sleep while waiting for a delayed job.
const MAX_IDLE_TICK: Duration = Duration::from_millis(250);

#[derive(Debug, Default)]
struct State {
    waiting: HashMap<Uuid, Job>,
    /// Active jobs and their lease deadlines.
    active: HashMap<Uuid, (Job, DateTime<Utc>)>,
    completed: HashMap<Uuid, Job>,
    failed: HashMap<Uuid, Job>,
}

impl State {
    /// Picks the ready job with the lowest rank, then the earliest `ready_at`.
    fn next_ready(&self, now: DateTime<Utc>) -> Option<Uuid> {
        self.waiting
            .values()
            .filter(|job| job.is_ready(now))
            .min_by_key(|job| (job.priority.rank(), job.ready_at, job.created_at))
            .map(|job| job.id)
    }

    fn earliest_ready_at(&self) -> Option<DateTime<Utc>> {
        self.waiting.values().map(|job| job.ready_at).min()
    }

    /// Removes a job that is still active or waiting. Finished jobs stay put.
    fn take_claimed(&mut self, job_id: Uuid) -> Option<Job> {
        self.active
            .remove(&job_id)
            .map(|(job, _)| job)
            .or_else(|| self.waiting.remove(&job_id))
    }
}

/// Job queue held in memory.
pub struct MemoryJobQueue {
    config: QueueConfig,
    state: Mutex<State>,
    notify: Notify,
    closed: AtomicBool,
}

impl std::fmt::Debug for MemoryJobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryJobQueue")
            .field("queue_name", &self.config.queue_name)
            .finish_non_exhaustive()
    }
}

impl Default for MemoryJobQueue {
    fn default() -> Self {
        Self::new(QueueConfig::default())
    }
}

impl MemoryJobQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            state: Mutex::new(State::default()),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Returns a snapshot of a job in any state.
    pub async fn get_job(&self, job_id: Uuid) -> Option<Job> {
        let state = self.state.lock().await;
        state
            .waiting
            .get(&job_id)
            .or_else(|| state.active.get(&job_id).map(|(job, _)| job))
            .or_else(|| state.completed.get(&job_id))
            .or_else(|| state.failed.get(&job_id))
            .cloned()
    }

    fn ensure_open(&self) -> Result<(), QueueError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(QueueError::Closed)
        } else {
            Ok(())
        }
    }

    async fn try_claim(&self) -> Claim {
        let now = Utc::now();
        let mut state = self.state.lock().await;

        let claimed = state
            .next_ready(now)
            .and_then(|id| state.waiting.remove(&id));

        match claimed {
            Some(mut job) => {
                job.increment_attempts();
                let lease = after(now, self.config.stall_timeout);
                state.active.insert(job.id, (job.clone(), lease));
                Claim::Claimed(job)
            }
            None => Claim::Idle(state.earliest_ready_at()),
        }
    }
}

enum Claim {
    Claimed(Job),
    /// Nothing ready; carries the earliest future `ready_at`, if any.
    Idle(Option<DateTime<Utc>>),
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    fn name(&self) -> &str {
        &self.config.queue_name
    }

    fn policy(&self) -> &JobPolicy {
        &self.config.policy
    }

    async fn push(&self, job: Job) -> Result<(), QueueError> {
        self.ensure_open()?;
        self.state.lock().await.waiting.insert(job.id, job);
        self.notify.notify_waiters();
        Ok(())
    }

    async fn dequeue(&self, wait: Duration) -> Result<Option<Job>, QueueError> {
        let deadline = Instant::now() + wait;

        loop {
            self.ensure_open()?;

            // Register interest before checking so a push in between is not missed.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let next_ready_at = match self.try_claim().await {
                Claim::Claimed(job) => return Ok(Some(job)),
                Claim::Idle(next_ready_at) => next_ready_at,
            };

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }

            let mut sleep_for = (deadline - now).min(MAX_IDLE_TICK);
            if let Some(ready_at) = next_ready_at {
                let until_ready = (ready_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                sleep_for = sleep_for.min(until_ready);
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep(sleep_for) => {}
            }
        }
    }

    async fn heartbeat(&self, job_id: Uuid) -> Result<bool, QueueError> {
        let mut state = self.state.lock().await;
        match state.active.get_mut(&job_id) {
            Some((_, lease)) => {
                *lease = after(Utc::now(), self.config.stall_timeout);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn complete(&self, job: &Job) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        let Some(mut finished) = state.take_claimed(job.id) else {
            debug!(job_id = %job.id, "Job already finished; ignoring completion");
            return Ok(());
        };
        finished.finished_at = Some(Utc::now());
        state.completed.insert(finished.id, finished);
        Ok(())
    }

    async fn retry(&self, job: &Job, error: &str) -> Result<Duration, QueueError> {
        let backoff = self.config.policy.backoff_for(job.attempts_made);
        let mut state = self.state.lock().await;

        let Some(mut rescheduled) = state.take_claimed(job.id) else {
            debug!(job_id = %job.id, "Job already finished; ignoring retry");
            return Ok(backoff);
        };
        rescheduled.attempts_made = job.attempts_made;
        rescheduled.last_error = Some(error.to_string());
        rescheduled.ready_at = after(Utc::now(), backoff);
        state.waiting.insert(rescheduled.id, rescheduled);
        drop(state);

        self.notify.notify_waiters();
        Ok(backoff)
    }

    async fn dead_letter(&self, job: &Job, error: &str) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        let Some(mut failed) = state.take_claimed(job.id) else {
            debug!(job_id = %job.id, "Job already finished; ignoring dead letter");
            return Ok(());
        };
        failed.attempts_made = job.attempts_made;
        failed.last_error = Some(error.to_string());
        failed.finished_at = Some(Utc::now());
        state.failed.insert(failed.id, failed);
        Ok(())
    }

    async fn recover_stalled(&self) -> Result<RecoveredJobs, QueueError> {
        let now = Utc::now();
        let mut state = self.state.lock().await;
        let mut recovered = RecoveredJobs::default();

        let stalled: Vec<Uuid> = state
            .active
            .iter()
            .filter(|(_, (_, lease))| *lease <= now)
            .map(|(id, _)| *id)
            .collect();

        for id in stalled {
            let Some((mut job, _)) = state.active.remove(&id) else {
                continue;
            };
            job.last_error = Some(STALLED_ERROR.to_string());

            if job.should_retry() {
                job.ready_at = now;
                state.waiting.insert(id, job);
                recovered.requeued += 1;
            } else {
                job.finished_at = Some(now);
                recovered.failed.push(job.article_id.clone());
                state.failed.insert(id, job);
            }
        }
        drop(state);

        if recovered.requeued > 0 {
            self.notify.notify_waiters();
        }
        Ok(recovered)
    }

    async fn counts(&self) -> Result<QueueCounts, QueueError> {
        let state = self.state.lock().await;
        Ok(QueueCounts {
            waiting: state.waiting.len() as u64,
            active: state.active.len() as u64,
            completed: state.completed.len() as u64,
            failed: state.failed.len() as u64,
        })
    }

    async fn clean(&self, older_than: Duration) -> Result<u64, QueueError> {
        let cutoff =
            Utc::now() - chrono::Duration::from_std(older_than).unwrap_or(chrono::Duration::zero());
        let is_expired = |job: &Job| job.finished_at.is_some_and(|at| at <= cutoff);

        let mut state = self.state.lock().await;
        let before = state.completed.len() + state.failed.len();
        state.completed.retain(|_, job| !is_expired(job));
        state.failed.retain(|_, job| !is_expired(job));
        let remaining = state.completed.len() + state.failed.len();

        Ok((before - remaining) as u64)
    }

    async fn peek_failed(&self, limit: usize) -> Result<Vec<Job>, QueueError> {
        let state = self.state.lock().await;
        let mut failed: Vec<Job> = state.failed.values().cloned().collect();
        failed.sort_by(|a, b| b.finished_at.cmp(&a.finished_at));
        failed.truncate(limit);
        Ok(failed)
    }

    async fn close(&self) -> Result<(), QueueError> {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::job::JobPriority;

    fn fast_config() -> QueueConfig {
        QueueConfig::new().with_policy(
            JobPolicy::new()
                .with_backoff_base(Duration::from_millis(20))
                .with_normal_delay(Duration::from_millis(100)),
        )
    }

    #[tokio::test]
    async fn test_high_priority_served_before_normal() {
        let queue = MemoryJobQueue::new(fast_config());
        queue.enqueue("normal", JobPriority::Normal).await.unwrap();
        queue.enqueue("high", JobPriority::High).await.unwrap();

        let first = queue.dequeue(Duration::ZERO).await.unwrap().expect("high is ready");
        assert_eq!(first.article_id, "high");
        assert_eq!(first.attempts_made, 1);

        assert!(queue.dequeue(Duration::ZERO).await.unwrap().is_none());

        let second = queue
            .dequeue(Duration::from_secs(1))
            .await
            .unwrap()
            .expect("normal becomes ready");
        assert_eq!(second.article_id, "normal");
    }

    #[tokio::test]
    async fn test_dequeue_wakes_on_push() {
        let queue = std::sync::Arc::new(MemoryJobQueue::new(fast_config()));
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.dequeue(Duration::from_secs(2)).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.enqueue("a-1", JobPriority::High).await.unwrap();

        let job = consumer.await.unwrap().unwrap().expect("woken by push");
        assert_eq!(job.article_id, "a-1");
    }

    #[tokio::test]
    async fn test_no_deduplication() {
        let queue = MemoryJobQueue::new(fast_config());
        let a = queue.enqueue("a-1", JobPriority::High).await.unwrap();
        let b = queue.enqueue("a-1", JobPriority::High).await.unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(queue.counts().await.unwrap().waiting, 2);
    }

    #[tokio::test]
    async fn test_retry_applies_backoff_then_dead_letter() {
        let queue = MemoryJobQueue::new(fast_config());
        queue.enqueue("a-1", JobPriority::High).await.unwrap();

        let job = queue.dequeue(Duration::ZERO).await.unwrap().unwrap();
        let backoff = queue.retry(&job, "store down").await.unwrap();
        assert_eq!(backoff, Duration::from_millis(20));
        assert!(queue.dequeue(Duration::ZERO).await.unwrap().is_none());

        let job = queue.dequeue(Duration::from_secs(1)).await.unwrap().unwrap();
        assert_eq!(job.attempts_made, 2);
        assert_eq!(job.last_error.as_deref(), Some("store down"));

        queue.dead_letter(&job, "gave up").await.unwrap();
        let counts = queue.counts().await.unwrap();
        assert_eq!(counts, QueueCounts { waiting: 0, active: 0, completed: 0, failed: 1 });

        let failed = queue.peek_failed(10).await.unwrap();
        assert_eq!(failed[0].last_error.as_deref(), Some("gave up"));
        assert!(failed[0].finished_at.is_some());
    }

    #[tokio::test]
    async fn test_recover_stalled() {
        let config = fast_config()
            .with_stall_timeout(Duration::from_millis(10))
            .with_policy(JobPolicy::new().with_max_attempts(2));
        let queue = MemoryJobQueue::new(config);
        queue.enqueue("a-1", JobPriority::High).await.unwrap();

        let job = queue.dequeue(Duration::ZERO).await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        let recovered = queue.recover_stalled().await.unwrap();
        assert_eq!(recovered, RecoveredJobs { requeued: 1, failed: Vec::new() });
        assert!(!queue.heartbeat(job.id).await.unwrap());

        let job = queue.dequeue(Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(job.attempts_made, 2);
        tokio::time::sleep(Duration::from_millis(30)).await;

        let recovered = queue.recover_stalled().await.unwrap();
        assert_eq!(recovered, RecoveredJobs { requeued: 0, failed: vec!["a-1".to_string()] });
        assert_eq!(queue.counts().await.unwrap().failed, 1);
    }

    #[tokio::test]
    async fn test_late_settle_after_stall_failure_is_ignored() {
        let config = fast_config()
            .with_stall_timeout(Duration::from_millis(10))
            .with_policy(JobPolicy::new().with_max_attempts(1));
        let queue = MemoryJobQueue::new(config);
        queue.enqueue("a-1", JobPriority::High).await.unwrap();

        let job = queue.dequeue(Duration::ZERO).await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        let recovered = queue.recover_stalled().await.unwrap();
        assert_eq!(recovered.failed, vec!["a-1".to_string()]);

        // The original worker finishes after its lease was taken away.
        queue.complete(&job).await.unwrap();
        queue.retry(&job, "store down").await.unwrap();
        queue.dead_letter(&job, "gave up").await.unwrap();

        let counts = queue.counts().await.unwrap();
        assert_eq!(counts, QueueCounts { waiting: 0, active: 0, completed: 0, failed: 1 });
        assert_eq!(counts.total(), 1);
        assert!(queue.dequeue(Duration::ZERO).await.unwrap().is_none());

        let failed = queue.get_job(job.id).await.expect("job kept");
        assert_eq!(failed.last_error.as_deref(), Some(STALLED_ERROR));
    }

    #[tokio::test]
    async fn test_late_completion_of_requeued_job_completes_once() {
        let config = fast_config().with_stall_timeout(Duration::from_millis(10));
        let queue = MemoryJobQueue::new(config);
        queue.enqueue("a-1", JobPriority::High).await.unwrap();

        let job = queue.dequeue(Duration::ZERO).await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(queue.recover_stalled().await.unwrap().requeued, 1);

        queue.complete(&job).await.unwrap();
        queue.complete(&job).await.unwrap();

        let counts = queue.counts().await.unwrap();
        assert_eq!(counts, QueueCounts { waiting: 0, active: 0, completed: 1, failed: 0 });
    }

    #[tokio::test]
    async fn test_heartbeat_keeps_lease() {
        let config = fast_config().with_stall_timeout(Duration::from_millis(50));
        let queue = MemoryJobQueue::new(config);
        queue.enqueue("a-1", JobPriority::High).await.unwrap();
        let job = queue.dequeue(Duration::ZERO).await.unwrap().unwrap();

        for _ in 0..3 {
            tokio::time::sleep(Duration::from_millis(25)).await;
            assert!(queue.heartbeat(job.id).await.unwrap());
        }
        assert_eq!(queue.recover_stalled().await.unwrap(), RecoveredJobs::default());

        queue.complete(&job).await.unwrap();
        assert_eq!(queue.counts().await.unwrap().completed, 1);
    }

    #[tokio::test]
    async fn test_clean_prunes_finished_jobs() {
        let queue = MemoryJobQueue::new(fast_config());
        queue.enqueue("a-1", JobPriority::High).await.unwrap();
        queue.enqueue("a-2", JobPriority::High).await.unwrap();

        let job = queue.dequeue(Duration::ZERO).await.unwrap().unwrap();
        queue.complete(&job).await.unwrap();
        let job = queue.dequeue(Duration::ZERO).await.unwrap().unwrap();
        queue.dead_letter(&job, "boom").await.unwrap();

        assert_eq!(queue.clean(Duration::from_secs(3600)).await.unwrap(), 0);
        assert_eq!(queue.clean(Duration::ZERO).await.unwrap(), 2);
        assert_eq!(queue.counts().await.unwrap().total(), 0);
    }

    #[tokio::test]
    async fn test_close_rejects_work() {
        let queue = MemoryJobQueue::new(fast_config());
        queue.close().await.unwrap();

        assert!(matches!(
            queue.enqueue("a-1", JobPriority::High).await,
            Err(QueueError::Closed)
        ));
        assert!(matches!(
            queue.dequeue(Duration::ZERO).await,
            Err(QueueError::Closed)
        ));
    }
}
