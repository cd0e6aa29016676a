use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use common::SourceConfig;
use sqlx::{Row, SqlitePool};

use feedscope::catalog;
use feedscope::collector::{run_collection, RunOptions};
use feedscope::fetch::{FeedFetcher, RetryPolicy};
use feedscope::ident;
use feedscope::redirect::RedirectResolver;
use feedscope::storage;

async fn test_pool() -> (tempfile::TempDir, SqlitePool) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pipeline.db");
    let pool = common::init_db_pool(path.to_str().unwrap()).await.unwrap();
    storage::ensure_schema(&pool).await.unwrap();
    (dir, pool)
}

fn test_fetcher() -> FeedFetcher {
    FeedFetcher::new(
        Duration::from_secs(5),
        "feedscope-test/0.1",
        RetryPolicy { max_retries: 0, backoff: Duration::from_millis(10) },
    )
    .unwrap()
}

fn test_resolver() -> RedirectResolver {
    RedirectResolver::new(Duration::from_secs(5), "feedscope-test/0.1").unwrap()
}

fn rss_feed(items: &[(&str, String, String)]) -> String {
    let mut body = String::from(
        "<?xml version=\"1.0\"?>\n<rss version=\"2.0\"><channel><title>Mock Feed</title>\n",
    );
    for (title, link, pubdate) in items {
        body.push_str(&format!(
            "<item><title>{}</title><link>{}</link><pubDate>{}</pubDate></item>\n",
            title, link, pubdate
        ));
    }
    body.push_str("</channel></rss>\n");
    body
}

async fn sync_feeds(pool: &SqlitePool, feeds: &[(&str, String)]) {
    let sources: Vec<SourceConfig> = feeds
        .iter()
        .map(|(name, url)| SourceConfig {
            name: name.to_string(),
            url: url.clone(),
            active: true,
        })
        .collect();
    catalog::sync_sources(pool, &sources).await.unwrap();
}

async fn source_row(pool: &SqlitePool, source_id: &str) -> (String, String, Option<String>) {
    let row = sqlx::query("SELECT status, status_code, last_ok_at FROM sources WHERE source_id = ?")
        .bind(source_id)
        .fetch_one(pool)
        .await
        .unwrap();
    (row.get("status"), row.get("status_code"), row.get("last_ok_at"))
}

#[tokio::test]
async fn test_collection_inserts_canonicalizes_and_dedupes() {
    let (_dir, pool) = test_pool().await;
    let mut server = mockito::Server::new_async().await;
    let base = server.url();

    let fresh = Utc::now().to_rfc2822();
    let feed_body = rss_feed(&[
        ("One", format!("{}/articles/one", base), fresh.clone()),
        ("Two", format!("{}/articles/two", base), fresh.clone()),
        // Ampersand escaped for XML; the parser hands back the raw URL.
        (
            "Tracked",
            format!("{}/articles/three/?utm_source=newsletter&amp;fbclid=abc", base),
            fresh.clone(),
        ),
        // No date ladder rung matches, so this one is dropped and counted.
        ("Undated", format!("{}/articles/four", base), "sometime soon".to_string()),
    ]);
    server
        .mock("GET", "/feed.xml")
        .with_status(200)
        .with_header("content-type", "application/rss+xml")
        .with_body(&feed_body)
        .create_async()
        .await;
    for path in ["/articles/one", "/articles/two", "/articles/three"] {
        server.mock("HEAD", path).with_status(200).create_async().await;
    }

    let feed_url = format!("{}/feed.xml", base);
    sync_feeds(&pool, &[("Mock Feed", feed_url.clone())]).await;
    let source_id = ident::source_id(&feed_url);

    let options = RunOptions::default();
    let summary =
        run_collection(&pool, &test_fetcher(), &test_resolver(), &options).await.unwrap();
    assert_eq!(summary.sources_attempted, 1);
    assert_eq!(summary.sources_ok, 1);
    assert_eq!(summary.sources_failed, 0);
    assert_eq!(summary.articles_built, 3);
    assert_eq!(summary.articles_inserted, 3);
    assert_eq!(summary.articles_deduped, 0);
    assert_eq!(summary.entries_missing_date, 1);

    // A second pass sees the same articles and inserts nothing new.
    let second =
        run_collection(&pool, &test_fetcher(), &test_resolver(), &options).await.unwrap();
    assert_eq!(second.articles_inserted, 0);
    assert_eq!(second.articles_deduped, 3);

    let rows = storage::list_unscraped(&pool, 0).await.unwrap();
    assert_eq!(rows.len(), 3);

    let tracked = rows.iter().find(|r| r.url_original.contains("utm_source")).unwrap();
    assert_eq!(tracked.url_final, format!("{}/articles/three", base));
    assert!(!tracked.url_match);
    let notes = tracked.url_notes.as_deref().unwrap_or_default();
    assert!(notes.contains("removed_tracking_params"));
    assert!(notes.contains("normalized_trailing_slash"));
    assert_eq!(tracked.article_id, ident::article_id(&tracked.url_final));

    let plain = rows.iter().find(|r| r.url_final.ends_with("/articles/one")).unwrap();
    assert!(plain.url_match);
    assert!(plain.url_notes.is_none());
    assert_eq!(plain.source_id, source_id);

    let (status, code, last_ok) = source_row(&pool, &source_id).await;
    assert_eq!(status, "OK");
    assert_eq!(code, "OK");
    assert!(last_ok.is_some());
}

#[tokio::test]
async fn test_entries_outside_window_are_dropped_before_resolution() {
    let (_dir, pool) = test_pool().await;
    let mut server = mockito::Server::new_async().await;
    let base = server.url();

    let fresh = Utc::now().to_rfc2822();
    let stale = (Utc::now() - ChronoDuration::hours(48)).to_rfc2822();
    let feed_body = rss_feed(&[
        ("Fresh", format!("{}/articles/fresh", base), fresh),
        ("Stale", format!("{}/articles/stale", base), stale),
    ]);
    server
        .mock("GET", "/feed.xml")
        .with_status(200)
        .with_header("content-type", "application/rss+xml")
        .with_body(&feed_body)
        .create_async()
        .await;
    server.mock("HEAD", "/articles/fresh").with_status(200).create_async().await;
    // The stale entry must never reach redirect resolution.
    let stale_head =
        server.mock("HEAD", "/articles/stale").with_status(200).expect(0).create_async().await;

    let feed_url = format!("{}/feed.xml", base);
    sync_feeds(&pool, &[("Mock Feed", feed_url.clone())]).await;

    let summary =
        run_collection(&pool, &test_fetcher(), &test_resolver(), &RunOptions::default())
            .await
            .unwrap();
    assert_eq!(summary.articles_inserted, 1);

    let rows = storage::list_unscraped(&pool, 0).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert!(rows[0].url_final.ends_with("/articles/fresh"));

    stale_head.assert_async().await;
}

#[tokio::test]
async fn test_one_failing_source_never_poisons_the_run() {
    let (_dir, pool) = test_pool().await;
    let mut server = mockito::Server::new_async().await;
    let base = server.url();

    let fresh = Utc::now().to_rfc2822();
    let feed_a = rss_feed(&[("A1", format!("{}/articles/a1", base), fresh.clone())]);
    let feed_c = rss_feed(&[("C1", format!("{}/articles/c1", base), fresh.clone())]);

    server
        .mock("GET", "/feeds/a.xml")
        .with_status(200)
        .with_header("content-type", "application/rss+xml")
        .with_body(&feed_a)
        .create_async()
        .await;
    server.mock("GET", "/feeds/b.xml").with_status(404).create_async().await;
    server
        .mock("GET", "/feeds/c.xml")
        .with_status(200)
        .with_header("content-type", "application/rss+xml")
        .with_body(&feed_c)
        .create_async()
        .await;
    server.mock("HEAD", "/articles/a1").with_status(200).create_async().await;
    server.mock("HEAD", "/articles/c1").with_status(200).create_async().await;

    let url_a = format!("{}/feeds/a.xml", base);
    let url_b = format!("{}/feeds/b.xml", base);
    let url_c = format!("{}/feeds/c.xml", base);
    sync_feeds(&pool, &[("Feed A", url_a), ("Feed B", url_b.clone()), ("Feed C", url_c)]).await;

    let summary =
        run_collection(&pool, &test_fetcher(), &test_resolver(), &RunOptions::default())
            .await
            .unwrap();
    assert_eq!(summary.sources_attempted, 3);
    assert_eq!(summary.sources_ok, 2);
    assert_eq!(summary.sources_failed, 1);
    assert_eq!(summary.articles_inserted, 2);

    // The failing source is marked ERROR and logged, with last_ok untouched.
    let failed_id = ident::source_id(&url_b);
    let (status, code, last_ok) = source_row(&pool, &failed_id).await;
    assert_eq!(status, "ERROR");
    assert_eq!(code, "HTTP_404_NOT_FOUND");
    assert!(last_ok.is_none());

    let error_row = sqlx::query("SELECT status_code, message FROM source_errors WHERE source_id = ?")
        .bind(&failed_id)
        .fetch_one(&pool)
        .await
        .unwrap();
    let logged_code: String = error_row.get("status_code");
    let logged_message: String = error_row.get("message");
    assert_eq!(logged_code, "HTTP_404_NOT_FOUND");
    assert_eq!(logged_message, "HTTP 404");
}

#[tokio::test]
async fn test_malformed_feed_still_yields_recovered_rows() {
    let (_dir, pool) = test_pool().await;
    let mut server = mockito::Server::new_async().await;
    let base = server.url();

    let fresh = Utc::now().to_rfc2822();
    // Complete first item, then the document falls apart.
    let broken_body = format!(
        "<rss version=\"2.0\"><channel><item><title>Recovered</title>\
         <link>{}/articles/r1</link><pubDate>{}</pubDate></item><item><title>Broken",
        base, fresh
    );
    server
        .mock("GET", "/feed.xml")
        .with_status(200)
        .with_header("content-type", "application/rss+xml")
        .with_body(&broken_body)
        .create_async()
        .await;
    server.mock("HEAD", "/articles/r1").with_status(200).create_async().await;

    let feed_url = format!("{}/feed.xml", base);
    sync_feeds(&pool, &[("Broken Feed", feed_url.clone())]).await;

    let summary =
        run_collection(&pool, &test_fetcher(), &test_resolver(), &RunOptions::default())
            .await
            .unwrap();
    // A parse warning is a soft condition, not a fetch failure.
    assert_eq!(summary.sources_ok, 1);
    assert_eq!(summary.articles_inserted, 1);

    let (status, code, last_ok) = source_row(&pool, &ident::source_id(&feed_url)).await;
    assert_eq!(status, "OK");
    assert_eq!(code, "PARSING_ERROR");
    assert!(last_ok.is_some());
}

#[tokio::test]
async fn test_feed_with_nothing_recent_reports_no_recent_articles() {
    let (_dir, pool) = test_pool().await;
    let mut server = mockito::Server::new_async().await;

    let feed_body = rss_feed(&[]);
    server
        .mock("GET", "/feed.xml")
        .with_status(200)
        .with_header("content-type", "application/rss+xml")
        .with_body(&feed_body)
        .create_async()
        .await;

    let feed_url = format!("{}/feed.xml", server.url());
    sync_feeds(&pool, &[("Quiet Feed", feed_url.clone())]).await;

    let summary =
        run_collection(&pool, &test_fetcher(), &test_resolver(), &RunOptions::default())
            .await
            .unwrap();
    assert_eq!(summary.sources_ok, 1);
    assert_eq!(summary.sources_failed, 0);
    assert_eq!(summary.articles_inserted, 0);

    let (status, code, last_ok) = source_row(&pool, &ident::source_id(&feed_url)).await;
    assert_eq!(status, "OK");
    assert_eq!(code, "NO_RECENT_ARTICLES");
    assert!(last_ok.is_some());
}

#[tokio::test]
async fn test_dry_run_computes_counts_but_writes_nothing() {
    let (_dir, pool) = test_pool().await;
    let mut server = mockito::Server::new_async().await;
    let base = server.url();

    let fresh = Utc::now().to_rfc2822();
    let feed_body = rss_feed(&[("One", format!("{}/articles/one", base), fresh)]);
    server
        .mock("GET", "/feed.xml")
        .with_status(200)
        .with_header("content-type", "application/rss+xml")
        .with_body(&feed_body)
        .create_async()
        .await;
    server.mock("HEAD", "/articles/one").with_status(200).create_async().await;

    let feed_url = format!("{}/feed.xml", base);
    sync_feeds(&pool, &[("Mock Feed", feed_url.clone())]).await;

    let options = RunOptions { dry_run: true, ..Default::default() };
    let summary =
        run_collection(&pool, &test_fetcher(), &test_resolver(), &options).await.unwrap();
    assert_eq!(summary.sources_ok, 1);
    assert_eq!(summary.articles_built, 1);
    assert_eq!(summary.articles_inserted, 0);

    assert!(storage::list_unscraped(&pool, 0).await.unwrap().is_empty());
    let (_, code, last_ok) = {
        let row = sqlx::query("SELECT status, status_code, last_ok_at FROM sources WHERE source_id = ?")
            .bind(ident::source_id(&feed_url))
            .fetch_one(&pool)
            .await
            .unwrap();
        let status: Option<String> = row.get("status");
        let code: Option<String> = row.get("status_code");
        let last_ok: Option<String> = row.get("last_ok_at");
        (status, code, last_ok)
    };
    assert!(code.is_none());
    assert!(last_ok.is_none());
}

#[tokio::test]
async fn test_max_items_per_feed_caps_the_entry_list() {
    let (_dir, pool) = test_pool().await;
    let mut server = mockito::Server::new_async().await;
    let base = server.url();

    let fresh = Utc::now().to_rfc2822();
    let items: Vec<(&str, String, String)> = (0..10)
        .map(|i| ("Item", format!("{}/articles/{}", base, i), fresh.clone()))
        .collect();
    let feed_body = rss_feed(&items);
    server
        .mock("GET", "/feed.xml")
        .with_status(200)
        .with_header("content-type", "application/rss+xml")
        .with_body(&feed_body)
        .create_async()
        .await;
    for i in 0..10 {
        server.mock("HEAD", format!("/articles/{}", i).as_str()).with_status(200).create_async().await;
    }

    let feed_url = format!("{}/feed.xml", base);
    sync_feeds(&pool, &[("Busy Feed", feed_url)]).await;

    let options = RunOptions { max_items_per_feed: 4, ..Default::default() };
    let summary =
        run_collection(&pool, &test_fetcher(), &test_resolver(), &options).await.unwrap();
    assert_eq!(summary.articles_inserted, 4);

    let rows = storage::list_unscraped(&pool, 0).await.unwrap();
    assert_eq!(rows.len(), 4);
}
