use anyhow::{Context, Result};
use chrono::Utc;
use common::SourceConfig;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use crate::ident;

/// One catalog row the pipeline operates on.
#[derive(Debug, Clone)]
pub struct Source {
    pub source_id: String,
    pub name: String,
    pub feed_url: String,
}

/// Active RSS sources in config order. `limit` of 0 means no cap.
pub async fn active_rss_sources(pool: &SqlitePool, limit: u32) -> Result<Vec<Source>> {
    // SQLite treats LIMIT -1 as unlimited.
    let limit = if limit == 0 { -1i64 } else { limit as i64 };
    let rows = sqlx::query(
        r#"
        SELECT source_id, name, feed_url
        FROM sources
        WHERE active = 1 AND scraping_method = 'RSS'
        ORDER BY position, source_id
        LIMIT ?
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("failed to load active sources")?;

    Ok(rows
        .into_iter()
        .map(|row| Source {
            source_id: row.get("source_id"),
            name: row.get("name"),
            feed_url: row.get("feed_url"),
        })
        .collect())
}

/// Record a successful check: status OK, the computed status code, and a
/// fresh last-ok timestamp.
pub async fn mark_source_ok(pool: &SqlitePool, source_id: &str, status_code: &str) -> Result<()> {
    sqlx::query(
        "UPDATE sources SET status = 'OK', status_code = ?, last_ok_at = ? WHERE source_id = ?",
    )
    .bind(status_code)
    .bind(Utc::now())
    .bind(source_id)
    .execute(pool)
    .await
    .context("failed to update source status")?;
    Ok(())
}

/// Record a failed check. The last-ok timestamp is left alone so it keeps
/// pointing at the most recent successful fetch.
pub async fn mark_source_error(
    pool: &SqlitePool,
    source_id: &str,
    status_code: &str,
) -> Result<()> {
    sqlx::query("UPDATE sources SET status = 'ERROR', status_code = ? WHERE source_id = ?")
        .bind(status_code)
        .bind(source_id)
        .execute(pool)
        .await
        .context("failed to update source status")?;
    Ok(())
}

/// Idempotent catalog seed from config. New sources are inserted under a
/// content-addressed identifier; existing rows get name/active/position
/// refreshed so config edits propagate. Returns how many rows were new.
pub async fn sync_sources(pool: &SqlitePool, sources: &[SourceConfig]) -> Result<u64> {
    let mut inserted = 0u64;
    for (position, source) in sources.iter().enumerate() {
        let source_id = ident::source_id(&source.url);
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO sources (source_id, name, feed_url, active, position)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&source_id)
        .bind(&source.name)
        .bind(&source.url)
        .bind(source.active)
        .bind(position as i64)
        .execute(pool)
        .await
        .context("failed to seed source")?;
        inserted += result.rows_affected();

        sqlx::query("UPDATE sources SET name = ?, active = ?, position = ? WHERE source_id = ?")
            .bind(&source.name)
            .bind(source.active)
            .bind(position as i64)
            .bind(&source_id)
            .execute(pool)
            .await
            .context("failed to refresh source")?;
    }
    if inserted > 0 {
        debug!(count = inserted, "seeded new sources from config");
    }
    Ok(inserted)
}
