//! Background analysis scheduling: job queue, worker pool and enqueue gateway.
//!
//! - **JobQueue**: durable (Redis) or in-process queue with priorities,
//!   delayed jobs, bounded retries and stall recovery
//! - **WorkerPool**: fixed pool of workers running the analysis pipeline
//! - **AnalysisGateway**: fire-and-forget submission for the read path
//!
//! # Architecture
//!
//! ```text
//!                      ┌──────────────┐
//!                      │  Read path   │
//!                      │  (gateway)   │
//!                      └──────┬───────┘
//!                             │ enqueue
//!                      ┌──────▼───────┐
//!                      │  Job queue   │
//!                      └──────┬───────┘
//!                             │ dequeue
//!              ┌──────────────┴──────────────┐
//!              ▼                             ▼
//!         ┌─────────┐                   ┌─────────┐
//!         │ Worker 0│                   │ Worker 1│
//!         └────┬────┘                   └────┬────┘
//!              │ classify / fallback         │
//!              └──────────────┬──────────────┘
//!                      ┌──────▼───────┐
//!                      │ Analysis DB  │
//!                      └──────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use bias_worker::scheduler::{
//!     AnalysisGateway, AnalysisPipeline, JobPriority, QueueConfig, RedisJobQueue, WorkerPool,
//!     WorkerPoolConfig,
//! };
//! use std::sync::Arc;
//!
//! let queue = Arc::new(RedisJobQueue::connect("redis://localhost:6379", QueueConfig::default()).await?);
//!
//! let gateway = AnalysisGateway::new(queue.clone());
//! gateway.queue_analysis("article-1", JobPriority::High).await?;
//!
//! let pipeline = AnalysisPipeline::new(store.clone(), articles, classifier);
//! let mut pool = WorkerPool::new(WorkerPoolConfig::default(), queue, pipeline);
//! pool.start().await?;
//!
//! pool.shutdown().await?;
//! ```

pub mod gateway;
pub mod job;
pub mod memory_queue;
pub mod processor;
pub mod queue;
pub mod redis_queue;
pub mod worker_pool;

pub use gateway::AnalysisGateway;
pub use job::{Job, JobOutcome, JobPolicy, JobPriority, JOB_NAME};
pub use memory_queue::MemoryJobQueue;
pub use processor::{AnalysisPipeline, ProcessOutcome, DEFAULT_CLASSIFY_TIMEOUT};
pub use queue::{
    JobQueue, QueueConfig, QueueCounts, QueueError, RecoveredJobs, STALLED_ERROR,
};
pub use redis_queue::RedisJobQueue;
pub use worker_pool::{PoolError, PoolStats, WorkerPool, WorkerPoolConfig};
