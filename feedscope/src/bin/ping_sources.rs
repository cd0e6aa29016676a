use std::path::PathBuf;
use std::time::Duration;

use common::Config;
use feedscope::feedparse;
use feedscope::fetch::{self, FeedFetcher, RetryPolicy};

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .init();

    let default_path = PathBuf::from("config.default.toml");
    let override_path = PathBuf::from("config.toml");
    let config = match Config::load_with_defaults(
        if default_path.exists() { Some(&default_path) } else { None },
        if override_path.exists() { Some(override_path.as_path()) } else { None },
    )
    .await
    {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    let fetch_cfg = config.fetch.as_ref();
    let timeout = Duration::from_secs(
        fetch_cfg.and_then(|f| f.timeout_seconds).unwrap_or(fetch::DEFAULT_TIMEOUT_SECONDS),
    );
    let user_agent = fetch_cfg
        .and_then(|f| f.user_agent.clone())
        .unwrap_or_else(|| fetch::DEFAULT_USER_AGENT.to_string());
    // One attempt per feed; a connectivity check should not sit in backoff.
    let retry = RetryPolicy { max_retries: 0, backoff: Duration::from_secs(0) };
    let fetcher = match FeedFetcher::new(timeout, &user_agent, retry) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("failed to build fetcher: {}", e);
            std::process::exit(1);
        }
    };

    let active: Vec<_> = config.sources.iter().filter(|s| s.active).collect();
    println!("Pinging {} active sources", active.len());
    println!("{}", "=".repeat(60));

    let mut ok = 0usize;
    let mut failed = 0usize;
    for source in active {
        let outcome = fetcher.fetch(&source.url).await;
        if outcome.is_ok() {
            let body = outcome.body.unwrap_or_default();
            let parsed = feedparse::parse_feed(&body);
            let note = if parsed.warning.is_some() { " (parse warnings)" } else { "" };
            println!("✓ {} - {} entries{}", source.name, parsed.entries.len(), note);
            ok += 1;
        } else {
            println!("✗ {} - {}: {}", source.name, outcome.status.as_str(), outcome.message);
            failed += 1;
        }
    }

    println!("{}", "=".repeat(60));
    println!("OK: {}  Failed: {}", ok, failed);
}
