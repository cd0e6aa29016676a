use std::collections::BTreeSet;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;
use tracing::{debug, info, warn};

use crate::catalog::{self, Source};
use crate::feedparse::{self, RawEntry};
use crate::fetch::FeedFetcher;
use crate::redirect::RedirectResolver;
use crate::status::StatusCode;
use crate::storage::{self, ArticleRow};
use crate::{canonical, ident};

/// Lookback window for a run. Both ends are inclusive.
#[derive(Debug, Clone, Copy)]
pub struct RunWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl RunWindow {
    pub fn last_hours(hours: u32) -> Self {
        let end = Utc::now();
        Self { start: end - Duration::hours(hours as i64), end }
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant <= self.end
    }
}

#[derive(Debug, Clone)]
pub struct ProcessOptions {
    pub window: RunWindow,
    pub max_items_per_feed: usize,
    pub dry_run: bool,
}

/// Per-source result handed back to the run coordinator. `built` counts
/// rows that survived the per-entry chain, `missing_date` the entries
/// dropped for lacking a resolvable date; a dry run still fills both.
#[derive(Debug, Clone)]
pub struct SourceOutcome {
    pub source_id: String,
    pub name: String,
    pub status: StatusCode,
    pub built: u64,
    pub inserted: u64,
    pub deduped: u64,
    pub missing_date: u64,
}

/// Run one source through fetch, parse, per-entry canonicalization and
/// persistence. Fetch failures end up in the error log with the source
/// marked ERROR; everything else marks the source reachable with the
/// computed status code. Only storage problems surface as `Err`.
pub async fn process_source(
    pool: &SqlitePool,
    fetcher: &FeedFetcher,
    resolver: &RedirectResolver,
    source: &Source,
    options: &ProcessOptions,
) -> Result<SourceOutcome> {
    let fetch = fetcher.fetch(&source.feed_url).await;
    if !fetch.is_ok() {
        warn!(
            source = %source.name,
            code = fetch.status.as_str(),
            message = %fetch.message,
            "feed fetch failed"
        );
        if !options.dry_run {
            storage::log_source_error(
                pool,
                &source.source_id,
                &source.feed_url,
                fetch.status.as_str(),
                &fetch.message,
                Utc::now(),
            )
            .await?;
            catalog::mark_source_error(pool, &source.source_id, fetch.status.as_str()).await?;
        }
        return Ok(SourceOutcome {
            source_id: source.source_id.clone(),
            name: source.name.clone(),
            status: fetch.status,
            built: 0,
            inserted: 0,
            deduped: 0,
            missing_date: 0,
        });
    }

    let body = fetch.body.unwrap_or_default();
    let parsed = feedparse::parse_feed(&body);
    if let Some(warning) = &parsed.warning {
        warn!(source = %source.name, warning = %warning, "feed parsed with warnings");
    }

    let mut entries = parsed.entries;
    if entries.len() > options.max_items_per_feed {
        entries.truncate(options.max_items_per_feed);
    }

    let (rows, missing_date) =
        build_article_rows(source, &entries, &options.window, resolver).await;
    let built = rows.len() as u64;
    let inserted = if options.dry_run || rows.is_empty() {
        0
    } else {
        storage::insert_article_rows(pool, &rows).await?
    };
    let deduped = if options.dry_run { 0 } else { built - inserted };

    let status = source_status(parsed.warning.is_some(), rows.len());
    if !options.dry_run {
        catalog::mark_source_ok(pool, &source.source_id, status.as_str()).await?;
    }

    info!(
        source = %source.name,
        code = status.as_str(),
        built,
        inserted,
        deduped,
        missing_date,
        "source processed"
    );
    Ok(SourceOutcome {
        source_id: source.source_id.clone(),
        name: source.name.clone(),
        status,
        built,
        inserted,
        deduped,
        missing_date,
    })
}

// A parse warning wins over everything; an empty batch without a warning
// just means nothing recent.
fn source_status(parse_warning: bool, built_rows: usize) -> StatusCode {
    if parse_warning {
        StatusCode::ParsingError
    } else if built_rows == 0 {
        StatusCode::NoRecentArticles
    } else {
        StatusCode::Ok
    }
}

/// Turn feed entries into persistable rows, also counting the entries
/// dropped for lacking a resolvable date. Every rejection drops just that
/// entry; the chain is date gate, raw-URL validation, normalization,
/// redirect resolution, a second normalization and a final validation.
pub(crate) async fn build_article_rows(
    source: &Source,
    entries: &[RawEntry],
    window: &RunWindow,
    resolver: &RedirectResolver,
) -> (Vec<ArticleRow>, u64) {
    let mut rows = Vec::new();
    let mut missing_date = 0u64;
    for entry in entries {
        let title = entry.title.as_deref().unwrap_or("<untitled>");
        let Some((published, date_notes)) = feedparse::resolve_published(entry) else {
            missing_date += 1;
            debug!(source = %source.name, title, reason = "missing_date", "entry dropped");
            continue;
        };
        if !window.contains(published) {
            continue;
        }
        let Some(raw_url) = entry.link.as_deref() else {
            debug!(source = %source.name, title, "entry dropped: no link");
            continue;
        };
        if let Err(reason) = canonical::validate(raw_url, &source.feed_url) {
            debug!(source = %source.name, url = raw_url, reason, "entry dropped");
            continue;
        }
        let Ok((normalized, norm_notes)) = canonical::normalize(raw_url) else {
            debug!(source = %source.name, url = raw_url, "entry dropped: unparseable URL");
            continue;
        };
        let (resolved, redirect_notes) = resolver.resolve(&normalized).await;
        let Ok((final_url, final_notes)) = canonical::normalize(&resolved) else {
            debug!(source = %source.name, url = %resolved, "entry dropped: unparseable final URL");
            continue;
        };
        if let Err(reason) = canonical::validate(&final_url, &source.feed_url) {
            debug!(source = %source.name, url = %final_url, reason, "entry dropped after resolution");
            continue;
        }

        let mut notes: BTreeSet<String> = BTreeSet::new();
        notes.extend(date_notes.iter().map(|n| n.to_string()));
        notes.extend(norm_notes.iter().map(|n| n.to_string()));
        notes.extend(redirect_notes.iter().cloned());
        notes.extend(final_notes.iter().map(|n| n.to_string()));
        let url_notes = if notes.is_empty() {
            None
        } else {
            Some(notes.into_iter().collect::<Vec<_>>().join(","))
        };

        rows.push(ArticleRow {
            article_id: ident::article_id(&final_url),
            source_id: source.source_id.clone(),
            source_url: source.feed_url.clone(),
            title: entry.title.clone(),
            url_original: raw_url.to_string(),
            url_final: final_url.clone(),
            url_match: raw_url == final_url,
            url_notes,
            published_at: published,
            detected_at: Utc::now(),
        });
    }
    (rows, missing_date)
}
