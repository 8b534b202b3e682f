//! Database schema constants.
//!
//! SQLite DDL for the analysis store and the article read model. Every
//! statement is idempotent (`IF NOT EXISTS`).

/// One row per article; `article_id` is the upsert key.
pub const CREATE_BIAS_ANALYSES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS bias_analyses (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    article_id      TEXT    NOT NULL UNIQUE,
    status          TEXT    NOT NULL,
    bias_direction  TEXT    NOT NULL DEFAULT 'UNKNOWN',
    bias_strength   INTEGER NOT NULL DEFAULT 3
                    CHECK (bias_strength BETWEEN 1 AND 5),
    confidence      REAL    NOT NULL DEFAULT 0.0
                    CHECK (confidence >= 0.0 AND confidence <= 1.0),
    reasoning       TEXT    NOT NULL DEFAULT '',
    source          TEXT    NOT NULL DEFAULT 'none',
    error_message   TEXT,
    processed_at    TEXT,
    created_at      TEXT    NOT NULL,
    updated_at      TEXT    NOT NULL
)
"#;

/// Read model of articles published by the ingestion subsystem.
pub const CREATE_ARTICLES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS articles (
    id          TEXT PRIMARY KEY,
    title       TEXT NOT NULL,
    content     TEXT NOT NULL DEFAULT '',
    excerpt     TEXT,
    source      TEXT NOT NULL,
    created_at  TEXT NOT NULL DEFAULT (datetime('now'))
)
"#;

pub const CREATE_STATUS_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_bias_analyses_status ON bias_analyses(status)";

pub const CREATE_DIRECTION_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_bias_analyses_direction ON bias_analyses(bias_direction)";

/// Returns all schema creation statements in the order they are applied.
///
/// Positions are recorded in `_migrations`, so new statements are appended,
/// never inserted.
pub fn all_schema_statements() -> Vec<&'static str> {
    vec![
        CREATE_BIAS_ANALYSES_TABLE,
        CREATE_ARTICLES_TABLE,
        CREATE_STATUS_INDEX,
        CREATE_DIRECTION_INDEX,
    ]
}

/// Table names in the schema.
pub mod tables {
    pub const BIAS_ANALYSES: &str = "bias_analyses";
    pub const ARTICLES: &str = "articles";
    pub const MIGRATIONS: &str = "_migrations";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_schema_statements_order() {
        let statements = all_schema_statements();
        assert_eq!(statements.len(), 4);
        assert!(statements[0].contains(tables::BIAS_ANALYSES));
        assert!(statements[1].contains(tables::ARTICLES));
        assert!(statements[2..]
            .iter()
            .all(|s| s.contains("CREATE INDEX IF NOT EXISTS")));
    }

    #[test]
    fn test_article_id_is_unique() {
        assert!(CREATE_BIAS_ANALYSES_TABLE.contains("article_id      TEXT    NOT NULL UNIQUE"));
    }
}
