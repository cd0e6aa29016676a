use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Client;
use tracing::debug;

use crate::fetch::classify_transport_error;

/// Resolves the redirect chain behind an article URL without downloading
/// bodies. Failures are soft: the caller keeps the original URL and a note
/// recording why resolution did not happen.
#[derive(Clone)]
pub struct RedirectResolver {
    client: Client,
}

impl RedirectResolver {
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .context("failed to build redirect client")?;
        Ok(Self { client })
    }

    /// Follow redirects on `url` and return the final URL plus provenance
    /// notes. HEAD first; servers that reject the method (405/403) or drop
    /// the request get a GET whose body is never read. On total failure the
    /// input URL comes back unchanged with a `redirect_failed:` note.
    pub async fn resolve(&self, url: &str) -> (String, Vec<String>) {
        match self.client.head(url).send().await {
            Ok(response) if !matches!(response.status().as_u16(), 403 | 405) => {
                return resolved(url, response.url().as_str());
            }
            Ok(response) => {
                debug!(url, status = response.status().as_u16(), "HEAD rejected, retrying with GET");
            }
            Err(err) => {
                debug!(url, error = %err, "HEAD failed, retrying with GET");
            }
        }

        match self.client.get(url).send().await {
            // Dropping the response abandons the body once headers are in.
            Ok(response) => resolved(url, response.url().as_str()),
            Err(err) => {
                let code = classify_transport_error(&err);
                debug!(url, error = %err, code = code.as_str(), "redirect resolution failed");
                (url.to_string(), vec![format!("redirect_failed:{}", code.as_str())])
            }
        }
    }
}

fn resolved(original: &str, final_url: &str) -> (String, Vec<String>) {
    if final_url == original {
        (original.to_string(), Vec::new())
    } else {
        (final_url.to_string(), vec!["resolved_redirects".to_string()])
    }
}
