use reqwest::Client;
use std::time::Duration;
use tracing::debug;

use anyhow::{Context, Result};

use crate::status::StatusCode;

pub const DEFAULT_USER_AGENT: &str = "feedscope/0.1 (+https://localhost)";
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 20;
pub const DEFAULT_RETRIES: u32 = 3;
pub const DEFAULT_BACKOFF_SECONDS: u64 = 2;

const FEED_CONTENT_TOKENS: [&str; 3] = ["xml", "rss", "atom"];

/// Retry budget applied around one feed fetch. `max_retries` counts the
/// retries after the first attempt; backoff grows linearly with the attempt
/// number.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_RETRIES,
            backoff: Duration::from_secs(DEFAULT_BACKOFF_SECONDS),
        }
    }
}

impl RetryPolicy {
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        self.backoff * attempt
    }
}

/// Result of one feed fetch after the retry budget is spent. `body` is only
/// populated on `OK`.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub status: StatusCode,
    pub message: String,
    pub body: Option<Vec<u8>>,
}

impl FetchOutcome {
    pub fn is_ok(&self) -> bool {
        self.status == StatusCode::Ok
    }

    fn ok(body: Vec<u8>) -> Self {
        Self { status: StatusCode::Ok, message: "OK".to_string(), body: Some(body) }
    }

    fn failed(status: StatusCode, message: String) -> Self {
        Self { status, message, body: None }
    }
}

/// HTTP retrieval of feed documents with retry/backoff and a closed error
/// classification. One instance is shared across the whole run; the
/// underlying client carries the timeout and user agent. Cloning shares
/// the client's connection pool.
#[derive(Clone)]
pub struct FeedFetcher {
    client: Client,
    retry: RetryPolicy,
}

impl FeedFetcher {
    pub fn new(timeout: Duration, user_agent: &str, retry: RetryPolicy) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .context("failed to build feed fetch client")?;
        Ok(Self { client, retry })
    }

    /// Fetch a feed URL, retrying transient failures (timeouts, refused
    /// connections, HTTP 429/5xx) with linear backoff. DNS and TLS failures
    /// are terminal immediately; so are the remaining HTTP classifications.
    /// Never returns an error: every failure maps to a `StatusCode`.
    pub async fn fetch(&self, url: &str) -> FetchOutcome {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let failure = match self.attempt_fetch(url).await {
                Ok(outcome) => {
                    let retry_http = matches!(
                        outcome.status,
                        StatusCode::Http429TooManyRequests | StatusCode::Http5xxServerError
                    );
                    if retry_http && attempt <= self.retry.max_retries {
                        outcome
                    } else {
                        return outcome;
                    }
                }
                Err(err) => {
                    let status = classify_transport_error(&err);
                    let outcome = FetchOutcome::failed(status, transport_message(status, &err));
                    if transport_retryable(status) && attempt <= self.retry.max_retries {
                        outcome
                    } else {
                        return outcome;
                    }
                }
            };

            let backoff = self.retry.backoff_for(attempt);
            debug!(
                url,
                attempt,
                code = failure.status.as_str(),
                backoff_ms = backoff.as_millis() as u64,
                "retrying feed fetch"
            );
            tokio::time::sleep(backoff).await;
        }
    }

    async fn attempt_fetch(&self, url: &str) -> Result<FetchOutcome, reqwest::Error> {
        let response = self.client.get(url).send().await?;
        let status = response.status().as_u16();
        let outcome = match status {
            200 => {
                let content_type = response
                    .headers()
                    .get(reqwest::header::CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .map(|v| v.to_ascii_lowercase())
                    .unwrap_or_default();
                // A missing Content-Type header is accepted; a present one
                // has to mention a feed type.
                if !content_type.is_empty()
                    && !FEED_CONTENT_TOKENS.iter().any(|t| content_type.contains(t))
                {
                    FetchOutcome::failed(
                        StatusCode::InvalidContentType,
                        format!("Content-Type {}", content_type),
                    )
                } else {
                    let body = response.bytes().await?;
                    FetchOutcome::ok(body.to_vec())
                }
            }
            401 => FetchOutcome::failed(StatusCode::Http401Unauthorized, "HTTP 401".to_string()),
            403 => FetchOutcome::failed(StatusCode::Http403Forbidden, "HTTP 403".to_string()),
            404 => FetchOutcome::failed(StatusCode::Http404NotFound, "HTTP 404".to_string()),
            429 => {
                FetchOutcome::failed(StatusCode::Http429TooManyRequests, "HTTP 429".to_string())
            }
            500..=599 => {
                FetchOutcome::failed(StatusCode::Http5xxServerError, format!("HTTP {}", status))
            }
            other => FetchOutcome::failed(StatusCode::UnknownError, format!("HTTP {}", other)),
        };
        Ok(outcome)
    }
}

fn transport_retryable(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::ConnectionTimeout | StatusCode::ConnectionRefused | StatusCode::UnknownError
    )
}

/// Map a transport-level error onto the status taxonomy. TLS and DNS
/// failures surface inside connect errors, so the cause chain is sniffed
/// before the generic connect check.
pub(crate) fn classify_transport_error(err: &reqwest::Error) -> StatusCode {
    if err.is_timeout() {
        return StatusCode::ConnectionTimeout;
    }
    let chain = error_chain_text(err);
    if chain.contains("certificate") || chain.contains("tls") || chain.contains("ssl") {
        return StatusCode::SslError;
    }
    if chain.contains("dns error") || chain.contains("failed to lookup address") {
        return StatusCode::DnsError;
    }
    if err.is_connect() {
        return StatusCode::ConnectionRefused;
    }
    StatusCode::UnknownError
}

fn transport_message(status: StatusCode, err: &reqwest::Error) -> String {
    match status {
        StatusCode::ConnectionTimeout => "Timeout".to_string(),
        StatusCode::SslError => format!("SSL error: {}", err),
        StatusCode::DnsError => format!("DNS error: {}", err),
        StatusCode::ConnectionRefused => format!("Connection error: {}", err),
        _ => format!("Request error: {}", err),
    }
}

// The top-level reqwest Display embeds the request URL, whose text must
// never reach the classifier tokens. Only the cause chain is sniffed.
fn error_chain_text(err: &reqwest::Error) -> String {
    let mut text = String::new();
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        if !text.is_empty() {
            text.push_str(": ");
        }
        text.push_str(&cause.to_string());
        source = cause.source();
    }
    text.to_ascii_lowercase()
}
