//! SQLite client for the analysis store and the article read model.
//!
//! All analysis writes are upserts keyed by `article_id`, so repeated or
//! concurrent processing of the same article converges on one row
//! (last writer wins).

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Row, SqlitePool};
use thiserror::Error;

use super::migrations::{MigrationError, MigrationRunner};
use crate::analysis::{
    AnalysisRecord, AnalysisSource, AnalysisStatus, AnalysisSummary, Article, BiasResult,
};

/// SQLite caps bound parameters per statement; stay well below it.
const MAX_IDS_PER_QUERY: usize = 500;

/// Errors that can occur during database operations.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Connection to the database failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Query execution failed.
    #[error("Query failed: {0}")]
    QueryFailed(#[from] sqlx::Error),

    /// A stored row could not be decoded.
    #[error("Invalid row for '{id}': {reason}")]
    InvalidRow { id: String, reason: String },

    /// Migration error.
    #[error("Migration error: {0}")]
    Migration(#[from] MigrationError),
}

/// Persisted per-article analysis state.
#[async_trait]
pub trait AnalysisStore: Send + Sync {
    /// Upserts the record to `PROCESSING`, creating a placeholder if absent.
    ///
    /// An existing result is kept; only status, error and timestamp change.
    async fn mark_processing(&self, article_id: &str) -> Result<(), DatabaseError>;

    /// Upserts the record to `COMPLETED` with a normalized result.
    async fn mark_completed(
        &self,
        article_id: &str,
        result: &BiasResult,
        source: AnalysisSource,
    ) -> Result<(), DatabaseError>;

    /// Upserts the record to `FAILED` with an error message.
    async fn mark_failed(&self, article_id: &str, error_message: &str)
        -> Result<(), DatabaseError>;

    /// Fetches one record.
    async fn get(&self, article_id: &str) -> Result<Option<AnalysisRecord>, DatabaseError>;

    /// Fetches records for a batch of articles, keyed by article id.
    async fn get_many(
        &self,
        article_ids: &[String],
    ) -> Result<HashMap<String, AnalysisRecord>, DatabaseError>;

    /// Aggregate counts by status, and by direction over completed records.
    async fn summary(&self) -> Result<AnalysisSummary, DatabaseError>;
}

/// Read-only access to articles.
#[async_trait]
pub trait ArticleSource: Send + Sync {
    async fn get_article(&self, id: &str) -> Result<Option<Article>, DatabaseError>;
}

/// SQLite database client.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish_non_exhaustive()
    }
}

impl Database {
    /// Connects using a URL such as `sqlite://bias.db` or `sqlite::memory:`.
    ///
    /// The file is created if missing; WAL journaling lets readers proceed
    /// while a worker writes.
    pub async fn connect(database_url: &str) -> Result<Self, DatabaseError> {
        let opts = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| DatabaseError::ConnectionFailed(e.to_string()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(opts)
            .await
            .map_err(|e| DatabaseError::ConnectionFailed(e.to_string()))?;

        tracing::info!(url = database_url, "Database opened");
        Ok(Self { pool })
    }

    /// Opens a database file by path.
    pub async fn open(path: impl AsRef<std::path::Path>) -> Result<Self, DatabaseError> {
        Self::connect(&format!("sqlite://{}", path.as_ref().display())).await
    }

    /// Creates a client from an existing pool.
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Runs pending schema migrations.
    pub async fn run_migrations(&self) -> Result<usize, DatabaseError> {
        let runner = MigrationRunner::new(self.pool.clone());
        Ok(runner.run_migrations().await?)
    }

    /// Inserts or replaces an article in the read model.
    pub async fn upsert_article(&self, article: &Article) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO articles (id, title, content, excerpt, source)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                content = excluded.content,
                excerpt = excluded.excerpt,
                source = excluded.source
            "#,
        )
        .bind(&article.id)
        .bind(&article.title)
        .bind(&article.content)
        .bind(&article.excerpt)
        .bind(&article.source)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Returns up to `limit` article ids, newest first.
    pub async fn list_article_ids(&self, limit: u32) -> Result<Vec<String>, DatabaseError> {
        let rows = sqlx::query("SELECT id FROM articles ORDER BY created_at DESC, id LIMIT ?1")
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(|row| row.get("id")).collect())
    }

    /// Closes the pool, waiting for connections to be returned.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn decode_record(row: &SqliteRow) -> Result<AnalysisRecord, DatabaseError> {
    let article_id: String = row.try_get("article_id")?;
    let invalid = |reason: String| DatabaseError::InvalidRow {
        id: article_id.clone(),
        reason,
    };

    let status: String = row.try_get("status")?;
    let direction: String = row.try_get("bias_direction")?;
    let source: String = row.try_get("source")?;
    let strength: i64 = row.try_get("bias_strength")?;

    Ok(AnalysisRecord {
        status: AnalysisStatus::from_str(&status).map_err(invalid)?,
        direction: direction.parse().map_err(invalid)?,
        source: AnalysisSource::from_str(&source).map_err(invalid)?,
        strength: u8::try_from(strength).map_err(|e| invalid(e.to_string()))?,
        confidence: row.try_get("confidence")?,
        reasoning: row.try_get("reasoning")?,
        error_message: row.try_get("error_message")?,
        processed_at: row.try_get::<Option<DateTime<Utc>>, _>("processed_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        article_id,
    })
}

const RECORD_COLUMNS: &str = "article_id, status, bias_direction, bias_strength, confidence, \
     reasoning, source, error_message, processed_at, created_at, updated_at";

#[async_trait]
impl AnalysisStore for Database {
    async fn mark_processing(&self, article_id: &str) -> Result<(), DatabaseError> {
        let placeholder = BiasResult::placeholder();
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO bias_analyses (
                article_id, status, bias_direction, bias_strength, confidence,
                reasoning, source, error_message, processed_at, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, NULL, NULL, ?8, ?8)
            ON CONFLICT(article_id) DO UPDATE SET
                status = excluded.status,
                error_message = NULL,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(article_id)
        .bind(AnalysisStatus::Processing.as_str())
        .bind(placeholder.direction.as_str())
        .bind(placeholder.strength as i64)
        .bind(placeholder.confidence)
        .bind(&placeholder.reasoning)
        .bind(AnalysisSource::None.as_str())
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn mark_completed(
        &self,
        article_id: &str,
        result: &BiasResult,
        source: AnalysisSource,
    ) -> Result<(), DatabaseError> {
        let result = result.clone().normalized();
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO bias_analyses (
                article_id, status, bias_direction, bias_strength, confidence,
                reasoning, source, error_message, processed_at, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, NULL, ?8, ?8, ?8)
            ON CONFLICT(article_id) DO UPDATE SET
                status = excluded.status,
                bias_direction = excluded.bias_direction,
                bias_strength = excluded.bias_strength,
                confidence = excluded.confidence,
                reasoning = excluded.reasoning,
                source = excluded.source,
                error_message = NULL,
                processed_at = excluded.processed_at,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(article_id)
        .bind(AnalysisStatus::Completed.as_str())
        .bind(result.direction.as_str())
        .bind(result.strength as i64)
        .bind(result.confidence)
        .bind(&result.reasoning)
        .bind(source.as_str())
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn mark_failed(
        &self,
        article_id: &str,
        error_message: &str,
    ) -> Result<(), DatabaseError> {
        let placeholder = BiasResult::placeholder();
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO bias_analyses (
                article_id, status, bias_direction, bias_strength, confidence,
                reasoning, source, error_message, processed_at, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, NULL, ?9, ?9)
            ON CONFLICT(article_id) DO UPDATE SET
                status = excluded.status,
                error_message = excluded.error_message,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(article_id)
        .bind(AnalysisStatus::Failed.as_str())
        .bind(placeholder.direction.as_str())
        .bind(placeholder.strength as i64)
        .bind(placeholder.confidence)
        .bind(&placeholder.reasoning)
        .bind(AnalysisSource::None.as_str())
        .bind(error_message)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, article_id: &str) -> Result<Option<AnalysisRecord>, DatabaseError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM bias_analyses WHERE article_id = ?1",
            RECORD_COLUMNS
        ))
        .bind(article_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(decode_record).transpose()
    }

    async fn get_many(
        &self,
        article_ids: &[String],
    ) -> Result<HashMap<String, AnalysisRecord>, DatabaseError> {
        let mut records = HashMap::with_capacity(article_ids.len());

        for chunk in article_ids.chunks(MAX_IDS_PER_QUERY) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!(
                "SELECT {} FROM bias_analyses WHERE article_id IN ({})",
                RECORD_COLUMNS, placeholders
            );

            let mut query = sqlx::query(&sql);
            for id in chunk {
                query = query.bind(id);
            }

            for row in query.fetch_all(&self.pool).await? {
                let record = decode_record(&row)?;
                records.insert(record.article_id.clone(), record);
            }
        }

        Ok(records)
    }

    async fn summary(&self) -> Result<AnalysisSummary, DatabaseError> {
        let mut summary = AnalysisSummary::default();

        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM bias_analyses GROUP BY status")
            .fetch_all(&self.pool)
            .await?;
        for row in rows {
            let count = row.try_get::<i64, _>("n")? as u64;
            summary.total += count;
            summary.by_status.insert(row.try_get("status")?, count);
        }

        let rows = sqlx::query(
            "SELECT bias_direction, COUNT(*) AS n FROM bias_analyses \
             WHERE status = ?1 GROUP BY bias_direction",
        )
        .bind(AnalysisStatus::Completed.as_str())
        .fetch_all(&self.pool)
        .await?;
        for row in rows {
            summary.by_direction.insert(
                row.try_get("bias_direction")?,
                row.try_get::<i64, _>("n")? as u64,
            );
        }

        Ok(summary)
    }
}

#[async_trait]
impl ArticleSource for Database {
    async fn get_article(&self, id: &str) -> Result<Option<Article>, DatabaseError> {
        let row = sqlx::query("SELECT id, title, content, excerpt, source FROM articles WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| {
            Ok(Article {
                id: row.try_get("id")?,
                title: row.try_get("title")?,
                content: row.try_get("content")?,
                excerpt: row.try_get("excerpt")?,
                source: row.try_get("source")?,
            })
        })
        .transpose()
    }
}
