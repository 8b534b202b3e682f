//! SQLite persistent storage.
//!
//! # Overview
//!
//! - **Database**: SQLite client implementing [`AnalysisStore`] (the
//!   per-article analysis state machine) and [`ArticleSource`] (the article
//!   read model)
//! - **Migrations**: idempotent schema management
//!
//! # Usage
//!
//! ```rust,ignore
//! use bias_worker::storage::{AnalysisStore, Database};
//!
//! let db = Database::connect("sqlite://bias.db").await?;
//! db.run_migrations().await?;
//!
//! db.mark_processing("article-1").await?;
//! let record = db.get("article-1").await?;
//! ```

pub mod database;
pub mod migrations;
pub mod schema;

pub use database::{AnalysisStore, ArticleSource, Database, DatabaseError};
pub use migrations::{AppliedMigration, MigrationError, MigrationRunner};
