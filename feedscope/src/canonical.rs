use anyhow::{Context, Result};
use url::Url;

// Heuristics for links that point back at feeds or index pages instead of
// articles. False positives are an accepted trade-off: a low duplicate/noise
// rate matters more than perfect recall.
const FEED_EXTENSIONS: [&str; 4] = [".xml", ".rss", ".rdf", ".atom"];
const FEED_MARKERS: [&str; 6] = ["alt=rss", "format=rss", "/feed", "/feeds/", "rss.xml", "feed.xml"];
const INDEX_MARKERS: [&str; 6] = ["/tag/", "/tags/", "/category/", "/categories/", "/author/", "/search"];

const TRACKING_PARAMS_PREFIX: &str = "utm_";
const TRACKING_PARAMS_EXACT: [&str; 4] = ["gclid", "fbclid", "mc_cid", "mc_eid"];

/// Normalize a URL into its canonical textual form, returning the canonical
/// string together with provenance notes for every rule that fired.
///
/// Rules, in order: lower-case scheme and host, strip the default port,
/// strip trailing slashes from a non-root path, drop tracking query
/// parameters (preserving the order of the rest), drop the fragment.
/// Deterministic and idempotent: `normalize(normalize(u)) == normalize(u)`.
pub fn normalize(url: &str) -> Result<(String, Vec<&'static str>)> {
    let trimmed = url.trim();
    let mut notes: Vec<&'static str> = Vec::new();

    // Url::parse lowercases the scheme and host and drops default ports on
    // its own, so the provenance checks have to look at the raw string.
    let mut parsed = Url::parse(trimmed).with_context(|| format!("unparsable URL: {}", trimmed))?;

    let scheme_changed = trimmed
        .split_once("://")
        .map(|(scheme, _)| scheme.chars().any(|c| c.is_ascii_uppercase()))
        .unwrap_or(false);
    if let Some(host) = raw_host(trimmed) {
        if scheme_changed || host.chars().any(|c| c.is_ascii_uppercase()) {
            notes.push("lowercased_host");
        }
        let scheme = parsed.scheme();
        if (scheme == "http" && host.ends_with(":80")) || (scheme == "https" && host.ends_with(":443")) {
            notes.push("normalized_default_port");
        }
    }

    let path = parsed.path().to_string();
    if path != "/" && path.ends_with('/') {
        let stripped = path.trim_end_matches('/');
        parsed.set_path(if stripped.is_empty() { "/" } else { stripped });
        notes.push("normalized_trailing_slash");
    }

    let mut kept: Vec<(String, String)> = Vec::new();
    let mut removed_tracking = false;
    for (key, value) in parsed.query_pairs() {
        let key_lower = key.to_ascii_lowercase();
        if key_lower.starts_with(TRACKING_PARAMS_PREFIX)
            || TRACKING_PARAMS_EXACT.contains(&key_lower.as_str())
        {
            removed_tracking = true;
            continue;
        }
        kept.push((key.into_owned(), value.into_owned()));
    }
    if removed_tracking {
        notes.push("removed_tracking_params");
    }
    if kept.is_empty() {
        parsed.set_query(None);
    } else {
        let query = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(kept)
            .finish();
        parsed.set_query(Some(&query));
    }

    if parsed.fragment().map(|f| !f.is_empty()).unwrap_or(false) {
        notes.push("removed_fragment");
    }
    parsed.set_fragment(None);

    Ok((parsed.to_string(), notes))
}

/// Validate a candidate article URL against a source's own feed URL.
/// Rejection carries the note naming the rule that fired.
pub fn validate(url: &str, feed_url: &str) -> Result<(), &'static str> {
    let lower = url.to_ascii_lowercase();
    if !lower.starts_with("http://") && !lower.starts_with("https://") {
        return Err("invalid_scheme");
    }
    if url == feed_url {
        return Err("same_as_feed_url");
    }
    if FEED_EXTENSIONS.iter().any(|ext| lower.ends_with(ext)) {
        return Err("feed_extension");
    }
    if FEED_MARKERS.iter().any(|marker| lower.contains(marker)) {
        return Err("feed_marker");
    }
    let path = Url::parse(url)
        .map(|u| u.path().to_ascii_lowercase())
        .unwrap_or_default();
    if INDEX_MARKERS.iter().any(|marker| path.contains(marker)) {
        return Err("index_like_url");
    }
    Ok(())
}

// Host portion of the raw URL string (authority minus userinfo), used to
// detect what Url::parse silently normalized away.
fn raw_host(url: &str) -> Option<&str> {
    let rest = url.split_once("://")?.1;
    let end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
    let authority = &rest[..end];
    Some(authority.rsplit_once('@').map(|(_, host)| host).unwrap_or(authority))
}
