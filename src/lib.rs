//! bias-worker: background political-bias classification for news articles.
//!
//! Articles are queued by id, processed by a pool of workers that call a
//! language-model classifier, and the outcome is persisted per article.
//! When the classifier fails, a deterministic source-based estimate is
//! stored instead, so every processed article ends with a result.

pub mod analysis;
pub mod cli;
pub mod error;
pub mod llm;
pub mod metrics;
pub mod scheduler;
pub mod storage;
pub mod utils;

pub use error::{ClassifierError, LlmError, ProcessError};
