use std::sync::Arc;

use anyhow::Result;
use sqlx::SqlitePool;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info};

use crate::catalog;
use crate::fetch::FeedFetcher;
use crate::processing::{self, ProcessOptions, RunWindow};
use crate::redirect::RedirectResolver;
use crate::status::StatusCode;

pub const DEFAULT_WINDOW_HOURS: u32 = 24;
pub const DEFAULT_MAX_ITEMS_PER_FEED: usize = 100;
pub const DEFAULT_MAX_CONCURRENT_SOURCES: usize = 8;

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub window_hours: u32,
    pub max_items_per_feed: usize,
    pub max_concurrent_sources: usize,
    /// 0 = process every active source.
    pub limit_sources: u32,
    pub dry_run: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            window_hours: DEFAULT_WINDOW_HOURS,
            max_items_per_feed: DEFAULT_MAX_ITEMS_PER_FEED,
            max_concurrent_sources: DEFAULT_MAX_CONCURRENT_SOURCES,
            limit_sources: 0,
            dry_run: false,
        }
    }
}

/// Aggregate counts for one collection run. A dry run still fills
/// `articles_built` and `entries_missing_date`; inserted/deduped stay zero.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub sources_attempted: u32,
    pub sources_ok: u32,
    pub sources_failed: u32,
    pub articles_built: u64,
    pub articles_inserted: u64,
    pub articles_deduped: u64,
    pub entries_missing_date: u64,
}

/// Process every active RSS source concurrently, bounded by
/// `max_concurrent_sources`. A failing source never takes the run down:
/// fetch failures, storage errors and even task panics all degrade to a
/// failed-source count in the summary.
pub async fn run_collection(
    pool: &SqlitePool,
    fetcher: &FeedFetcher,
    resolver: &RedirectResolver,
    options: &RunOptions,
) -> Result<RunSummary> {
    let sources = catalog::active_rss_sources(pool, options.limit_sources).await?;
    if sources.is_empty() {
        info!("no active sources to process");
        return Ok(RunSummary::default());
    }
    info!(
        sources = sources.len(),
        window_hours = options.window_hours,
        max_in_flight = options.max_concurrent_sources,
        dry_run = options.dry_run,
        "starting collection run"
    );

    let process = Arc::new(ProcessOptions {
        window: RunWindow::last_hours(options.window_hours),
        max_items_per_feed: options.max_items_per_feed,
        dry_run: options.dry_run,
    });
    let semaphore = Arc::new(Semaphore::new(options.max_concurrent_sources.max(1)));

    let mut summary = RunSummary { sources_attempted: sources.len() as u32, ..Default::default() };
    let mut tasks = JoinSet::new();
    for source in sources {
        let pool = pool.clone();
        let fetcher = fetcher.clone();
        let resolver = resolver.clone();
        let process = Arc::clone(&process);
        let semaphore = Arc::clone(&semaphore);
        tasks.spawn(async move {
            let _permit = semaphore.acquire_owned().await.ok();
            let outcome =
                processing::process_source(&pool, &fetcher, &resolver, &source, &process).await;
            (source, outcome)
        });
    }

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((_, Ok(outcome))) => {
                if outcome.status.is_fetch_failure() {
                    summary.sources_failed += 1;
                } else {
                    summary.sources_ok += 1;
                }
                summary.articles_built += outcome.built;
                summary.articles_inserted += outcome.inserted;
                summary.articles_deduped += outcome.deduped;
                summary.entries_missing_date += outcome.missing_date;
            }
            Ok((source, Err(err))) => {
                error!(source = %source.name, error = ?err, "source processing failed");
                // Best effort; the same store just failed this source.
                if !options.dry_run {
                    if let Err(err) =
                        catalog::mark_source_error(pool, &source.source_id, StatusCode::UnknownError.as_str())
                            .await
                    {
                        error!(source = %source.name, error = ?err, "failed to record source status");
                    }
                }
                summary.sources_failed += 1;
            }
            Err(err) => {
                error!(error = ?err, "source task panicked or was cancelled");
                summary.sources_failed += 1;
            }
        }
    }

    info!(
        attempted = summary.sources_attempted,
        ok = summary.sources_ok,
        failed = summary.sources_failed,
        built = summary.articles_built,
        inserted = summary.articles_inserted,
        deduped = summary.articles_deduped,
        missing_date = summary.entries_missing_date,
        "collection run complete"
    );
    Ok(summary)
}
