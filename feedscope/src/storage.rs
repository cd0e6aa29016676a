use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

/// One canonicalized article link ready for persistence.
#[derive(Debug, Clone)]
pub struct ArticleRow {
    pub article_id: String,
    pub source_id: String,
    pub source_url: String,
    pub title: Option<String>,
    pub url_original: String,
    pub url_final: String,
    pub url_match: bool,
    pub url_notes: Option<String>,
    pub published_at: DateTime<Utc>,
    pub detected_at: DateTime<Utc>,
}

/// Create the tables and indexes if they do not exist yet. Safe to run on
/// every startup.
pub async fn ensure_schema(pool: &SqlitePool) -> Result<()> {
    let stmts = [
        r#"
        CREATE TABLE IF NOT EXISTS sources (
            source_id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            feed_url TEXT NOT NULL UNIQUE,
            scraping_method TEXT NOT NULL DEFAULT 'RSS',
            active BOOLEAN NOT NULL DEFAULT TRUE,
            position INTEGER NOT NULL DEFAULT 0,
            status TEXT,
            status_code TEXT,
            last_ok_at TIMESTAMP,
            created_at TIMESTAMP DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
        );
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS article_urls (
            article_id TEXT PRIMARY KEY,
            source_id TEXT NOT NULL,
            scraping_method TEXT NOT NULL DEFAULT 'RSS',
            source_url TEXT NOT NULL,
            title TEXT,
            url_original TEXT NOT NULL,
            url_final TEXT NOT NULL,
            url_match BOOLEAN NOT NULL,
            url_notes TEXT,
            published_at TIMESTAMP NOT NULL,
            detected_at TIMESTAMP NOT NULL,
            created_at TIMESTAMP DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now')),
            FOREIGN KEY(source_id) REFERENCES sources(source_id) ON DELETE CASCADE
        );
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS source_errors (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            source_id TEXT NOT NULL,
            source_url TEXT NOT NULL,
            status_code TEXT NOT NULL,
            message TEXT,
            detected_at TIMESTAMP NOT NULL,
            created_at TIMESTAMP DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
        );
        "#,
        r#"CREATE INDEX IF NOT EXISTS idx_article_urls_source ON article_urls(source_id);"#,
        r#"CREATE INDEX IF NOT EXISTS idx_article_urls_detected ON article_urls(detected_at);"#,
        r#"CREATE INDEX IF NOT EXISTS idx_source_errors_source ON source_errors(source_id);"#,
    ];

    for s in &stmts {
        sqlx::query(s).execute(pool).await.with_context(|| "failed to ensure schema")?;
    }
    Ok(())
}

/// Idempotent batch insert keyed on the content identifier. Returns how
/// many rows were actually new; duplicates are ignored.
pub async fn insert_article_rows(pool: &SqlitePool, rows: &[ArticleRow]) -> Result<u64> {
    let mut inserted = 0u64;
    for row in rows {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO article_urls
                (article_id, source_id, source_url, title, url_original, url_final,
                 url_match, url_notes, published_at, detected_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&row.article_id)
        .bind(&row.source_id)
        .bind(&row.source_url)
        .bind(&row.title)
        .bind(&row.url_original)
        .bind(&row.url_final)
        .bind(row.url_match)
        .bind(&row.url_notes)
        .bind(row.published_at)
        .bind(row.detected_at)
        .execute(pool)
        .await
        .context("failed to insert article row")?;
        inserted += result.rows_affected();
    }
    Ok(inserted)
}

/// Append one fetch failure to the error log.
pub async fn log_source_error(
    pool: &SqlitePool,
    source_id: &str,
    source_url: &str,
    status_code: &str,
    message: &str,
    detected_at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO source_errors (source_id, source_url, status_code, message, detected_at)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(source_id)
    .bind(source_url)
    .bind(status_code)
    .bind(message)
    .bind(detected_at)
    .execute(pool)
    .await
    .context("failed to log source error")?;
    Ok(())
}

/// Read interface for the downstream scraping stage: article rows in
/// detection order. `limit` of 0 means no cap.
pub async fn list_unscraped(pool: &SqlitePool, limit: u32) -> Result<Vec<ArticleRow>> {
    let limit = if limit == 0 { -1i64 } else { limit as i64 };
    let rows = sqlx::query(
        r#"
        SELECT article_id, source_id, source_url, title, url_original, url_final,
               url_match, url_notes, published_at, detected_at
        FROM article_urls
        ORDER BY detected_at, article_id
        LIMIT ?
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("failed to list article rows")?;

    Ok(rows
        .into_iter()
        .map(|row| ArticleRow {
            article_id: row.get("article_id"),
            source_id: row.get("source_id"),
            source_url: row.get("source_url"),
            title: row.get("title"),
            url_original: row.get("url_original"),
            url_final: row.get("url_final"),
            url_match: row.get("url_match"),
            url_notes: row.get("url_notes"),
            published_at: row.get("published_at"),
            detected_at: row.get("detected_at"),
        })
        .collect())
}
