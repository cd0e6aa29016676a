/*
feedscope - security-news feed collection binary
Runs one collection pass over the configured sources and exits.
*/

use anyhow::Result;
use clap::Parser;
use common::{init_db_pool, Config};
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use feedscope::catalog;
use feedscope::collector::{self, RunOptions, RunSummary};
use feedscope::fetch::{self, FeedFetcher, RetryPolicy};
use feedscope::redirect::RedirectResolver;
use feedscope::storage;

#[derive(Parser, Debug)]
#[command(name = "feedscope", about = "Security-news feed collection and URL canonicalization")]
struct Args {
    /// Path to config.toml
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Lookback window in hours
    #[arg(long)]
    window_hours: Option<u32>,

    /// Per-feed entry cap
    #[arg(long)]
    max_items_per_feed: Option<usize>,

    /// Process at most this many sources (0 = all)
    #[arg(long, default_value_t = 0)]
    limit_sources: u32,

    /// Compute and log everything, skip all persistence writes
    #[arg(long)]
    dry_run: bool,

    /// Override log level (info, debug, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI args
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    // Resolve config paths
    let default_path = PathBuf::from("config.default.toml");

    let override_path = if let Some(p) = args.config {
        if !p.exists() {
            error!(path = ?p, "specified config file not found");
            return Err(anyhow::anyhow!("Config file not found: {}", p.display()));
        }
        Some(p)
    } else {
        let p = PathBuf::from("config.toml");
        if p.exists() {
            Some(p)
        } else {
            None
        }
    };

    // Load configuration with defaults
    let config = match Config::load_with_defaults(
        if default_path.exists() { Some(&default_path) } else { None },
        override_path.as_deref(),
    )
    .await
    {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(%e, "failed to load configuration");
            return Err(e);
        }
    };
    info!(default = ?default_path, local = ?override_path, "configuration loaded");

    // Initialize DB pool - resolve and log the absolute DB path before connecting
    let db_path_abs = match tokio::fs::canonicalize(&config.database.path).await {
        Ok(p) => p.to_string_lossy().to_string(),
        Err(_) => config.database.path.clone(),
    };
    info!(db_path = %db_path_abs, "resolved DB path");

    let db_pool = match init_db_pool(&db_path_abs).await {
        Ok(p) => p,
        Err(e) => {
            error!(%e, db_path = %db_path_abs, "failed to initialize database pool");
            return Err(e);
        }
    };

    storage::ensure_schema(&db_pool).await?;
    let seeded = catalog::sync_sources(&db_pool, &config.sources).await?;
    if seeded > 0 {
        info!(seeded, "catalog updated from config");
    }

    // Build the HTTP side from config, falling back to the fetch defaults
    let fetch_cfg = config.fetch.as_ref();
    let timeout = Duration::from_secs(
        fetch_cfg.and_then(|f| f.timeout_seconds).unwrap_or(fetch::DEFAULT_TIMEOUT_SECONDS),
    );
    let user_agent = fetch_cfg
        .and_then(|f| f.user_agent.clone())
        .unwrap_or_else(|| fetch::DEFAULT_USER_AGENT.to_string());
    let retry = RetryPolicy {
        max_retries: fetch_cfg.and_then(|f| f.retries).unwrap_or(fetch::DEFAULT_RETRIES),
        backoff: Duration::from_secs(
            fetch_cfg.and_then(|f| f.backoff_seconds).unwrap_or(fetch::DEFAULT_BACKOFF_SECONDS),
        ),
    };
    let fetcher = FeedFetcher::new(timeout, &user_agent, retry)?;
    let resolver = RedirectResolver::new(timeout, &user_agent)?;

    let collector_cfg = config.collector.as_ref();
    let run_options = RunOptions {
        window_hours: args
            .window_hours
            .or(collector_cfg.and_then(|c| c.window_hours))
            .unwrap_or(collector::DEFAULT_WINDOW_HOURS),
        max_items_per_feed: args
            .max_items_per_feed
            .or(collector_cfg.and_then(|c| c.max_items_per_feed))
            .unwrap_or(collector::DEFAULT_MAX_ITEMS_PER_FEED),
        max_concurrent_sources: collector_cfg
            .and_then(|c| c.max_concurrent_sources)
            .unwrap_or(collector::DEFAULT_MAX_CONCURRENT_SOURCES),
        limit_sources: args.limit_sources,
        dry_run: args.dry_run,
    };
    let run_timeout = collector_cfg.and_then(|c| c.run_timeout_seconds).filter(|&s| s > 0);

    let run = collector::run_collection(&db_pool, &fetcher, &resolver, &run_options);
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("ctrl-c received, abandoning in-flight sources");
        }
        res = run_with_timeout(run_timeout, run) => {
            match res {
                Ok(Some(_summary)) => {
                    info!("collection pass finished");
                }
                Ok(None) => {
                    warn!("run timeout reached, abandoning in-flight sources");
                }
                Err(e) => {
                    error!(%e, "collection run failed");
                    return Err(e);
                }
            }
        }
    }

    Ok(())
}

/// Bound the run when a timeout is configured. `Ok(None)` means the budget
/// ran out; dropping the run future aborts the in-flight source tasks and
/// the idempotent per-batch writes make the partial state safe to resume.
async fn run_with_timeout(
    timeout_seconds: Option<u64>,
    run: impl Future<Output = Result<RunSummary>>,
) -> Result<Option<RunSummary>> {
    match timeout_seconds {
        Some(secs) => match tokio::time::timeout(Duration::from_secs(secs), run).await {
            Ok(result) => result.map(Some),
            Err(_) => Ok(None),
        },
        None => run.await.map(Some),
    }
}
