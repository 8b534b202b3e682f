//! Job definitions for the scheduler.
//!
//! - `Job`: one "analyze this article" unit of work
//! - `JobPriority`: `high` (rank 1, no delay) or `normal` (rank 2, delayed)
//! - `JobPolicy`: attempt bound, backoff and delay shared by every job
//! - `JobOutcome`: how a processing attempt ended

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Job-type tag carried by every analysis job.
pub const JOB_NAME: &str = "analyze-article";

/// Default maximum number of attempts for a job.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default backoff before the second attempt; doubles after that.
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(2);

/// Default delay applied to normal-priority submissions.
pub const DEFAULT_NORMAL_DELAY: Duration = Duration::from_secs(5);

/// Submission priority.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobPriority {
    /// Served first, no delay.
    High,
    /// Served after high, after the normal delay.
    #[default]
    Normal,
}

impl JobPriority {
    pub const ALL: [JobPriority; 2] = [JobPriority::High, JobPriority::Normal];

    /// Queue rank; lower is served first.
    pub fn rank(&self) -> u8 {
        match self {
            JobPriority::High => 1,
            JobPriority::Normal => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobPriority::High => "high",
            JobPriority::Normal => "normal",
        }
    }
}

impl FromStr for JobPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "high" => Ok(JobPriority::High),
            "normal" => Ok(JobPriority::Normal),
            other => Err(format!("unknown priority '{}', expected high/normal", other)),
        }
    }
}

impl fmt::Display for JobPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Retry and scheduling policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobPolicy {
    /// Attempts per job, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub backoff_base: Duration,
    /// Delay applied to normal-priority submissions.
    pub normal_delay: Duration,
}

impl Default for JobPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_base: DEFAULT_BACKOFF_BASE,
            normal_delay: DEFAULT_NORMAL_DELAY,
        }
    }
}

impl JobPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    pub fn with_normal_delay(mut self, delay: Duration) -> Self {
        self.normal_delay = delay;
        self
    }

    /// Submission delay for a priority.
    pub fn delay_for(&self, priority: JobPriority) -> Duration {
        match priority {
            JobPriority::High => Duration::ZERO,
            JobPriority::Normal => self.normal_delay,
        }
    }

    /// Backoff after the given failed attempt: `base * 2^(attempt - 1)`.
    pub fn backoff_for(&self, attempts_made: u32) -> Duration {
        let exponent = attempts_made.saturating_sub(1).min(16);
        self.backoff_base.saturating_mul(1u32 << exponent)
    }
}

/// A job representing one analysis request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique identifier for this submission.
    pub id: Uuid,
    /// Job-type tag, always [`JOB_NAME`].
    pub name: String,
    /// Article to analyze.
    pub article_id: String,
    pub priority: JobPriority,
    /// Attempts started so far; incremented on dequeue.
    pub attempts_made: u32,
    /// Maximum attempts before dead-lettering.
    pub max_attempts: u32,
    pub created_at: DateTime<Utc>,
    /// Earliest time the job may be dequeued.
    pub ready_at: DateTime<Utc>,
    /// Error from the most recent failed attempt.
    #[serde(default)]
    pub last_error: Option<String>,
    /// When the job reached `completed` or `failed`.
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Creates a job whose readiness follows the policy's delay for `priority`.
    pub fn new(article_id: impl Into<String>, priority: JobPriority, policy: &JobPolicy) -> Self {
        let created_at = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: JOB_NAME.to_string(),
            article_id: article_id.into(),
            priority,
            attempts_made: 0,
            max_attempts: policy.max_attempts,
            created_at,
            ready_at: after(created_at, policy.delay_for(priority)),
            last_error: None,
            finished_at: None,
        }
    }

    /// Increments the attempt counter.
    pub fn increment_attempts(&mut self) {
        self.attempts_made += 1;
    }

    /// Returns whether another attempt is allowed after a failure.
    pub fn should_retry(&self) -> bool {
        self.attempts_made < self.max_attempts
    }

    pub fn remaining_attempts(&self) -> u32 {
        self.max_attempts.saturating_sub(self.attempts_made)
    }

    /// Returns whether the job may be dequeued at `now`.
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        self.ready_at <= now
    }
}

/// How a single processing attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobOutcome {
    /// The record reached a terminal state.
    Completed,
    /// The attempt failed and the job was rescheduled.
    Retried,
    /// The job was dead-lettered.
    Failed,
}

impl JobOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobOutcome::Completed => "completed",
            JobOutcome::Retried => "retried",
            JobOutcome::Failed => "failed",
        }
    }
}

impl fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returns `at + duration`, saturating instead of overflowing.
pub(crate) fn after(at: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(duration)
        .ok()
        .and_then(|d| at.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_rank_and_delay() {
        let policy = JobPolicy::default();
        assert_eq!(JobPriority::High.rank(), 1);
        assert_eq!(JobPriority::Normal.rank(), 2);
        assert_eq!(policy.delay_for(JobPriority::High), Duration::ZERO);
        assert_eq!(policy.delay_for(JobPriority::Normal), Duration::from_secs(5));
    }

    #[test]
    fn test_priority_parse() {
        assert_eq!("HIGH".parse::<JobPriority>(), Ok(JobPriority::High));
        assert_eq!(" normal ".parse::<JobPriority>(), Ok(JobPriority::Normal));
        assert!("urgent".parse::<JobPriority>().is_err());
        assert_eq!(JobPriority::default(), JobPriority::Normal);
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = JobPolicy::default();
        assert_eq!(policy.backoff_for(1), Duration::from_secs(2));
        assert_eq!(policy.backoff_for(2), Duration::from_secs(4));
        assert_eq!(policy.backoff_for(3), Duration::from_secs(8));
        assert_eq!(policy.backoff_for(0), Duration::from_secs(2));
        assert!(policy.backoff_for(u32::MAX) >= policy.backoff_for(17));
    }

    #[test]
    fn test_new_job_readiness() {
        let policy = JobPolicy::default();
        let high = Job::new("a-1", JobPriority::High, &policy);
        let normal = Job::new("a-1", JobPriority::Normal, &policy);

        assert_eq!(high.name, JOB_NAME);
        assert_ne!(high.id, normal.id);
        assert!(high.is_ready(high.created_at));
        assert!(!normal.is_ready(normal.created_at));
        assert_eq!(normal.ready_at - normal.created_at, chrono::Duration::seconds(5));
    }

    #[test]
    fn test_job_attempts() {
        let policy = JobPolicy::new().with_max_attempts(2);
        let mut job = Job::new("a-1", JobPriority::High, &policy);

        assert!(job.should_retry());
        assert_eq!(job.remaining_attempts(), 2);

        job.increment_attempts();
        assert!(job.should_retry());
        assert_eq!(job.remaining_attempts(), 1);

        job.increment_attempts();
        assert!(!job.should_retry());
        assert_eq!(job.remaining_attempts(), 0);
    }

    #[test]
    fn test_max_attempts_at_least_one() {
        assert_eq!(JobPolicy::new().with_max_attempts(0).max_attempts, 1);
    }

    #[test]
    fn test_job_serialization() {
        let job = Job::new("a-1", JobPriority::Normal, &JobPolicy::default());
        let json = serde_json::to_string(&job).expect("serialization should work");
        assert!(json.contains("\"priority\":\"normal\""));

        let parsed: Job = serde_json::from_str(&json).expect("deserialization should work");
        assert_eq!(parsed, job);
    }

    #[test]
    fn test_after_saturates() {
        let now = Utc::now();
        assert_eq!(after(now, Duration::from_secs(1)), now + chrono::Duration::seconds(1));
        assert_eq!(after(now, Duration::MAX), DateTime::<Utc>::MAX_UTC);
    }

    #[test]
    fn test_outcome_display() {
        assert_eq!(JobOutcome::Completed.to_string(), "completed");
        assert_eq!(JobOutcome::Retried.to_string(), "retried");
        assert_eq!(JobOutcome::Failed.to_string(), "failed");
    }
}
