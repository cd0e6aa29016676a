use sha2::{Digest, Sha256};

/// Content-addressed identifier for an extracted article URL: `A_` plus the
/// first 16 hex chars of SHA-256 over the canonical URL's UTF-8 bytes.
///
/// The algorithm, truncation length, and tag are a wire contract shared with
/// downstream stages; re-inserting the same canonical URL is a no-op because
/// the identifier is a pure function of it.
pub fn article_id(canonical_url: &str) -> String {
    format!("A_{}", digest_prefix(canonical_url))
}

/// Identifier for a catalog source, derived from its feed URL. The tag
/// namespaces it apart from article identifiers.
pub fn source_id(feed_url: &str) -> String {
    format!("S_{}", digest_prefix(feed_url))
}

fn digest_prefix(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..16].to_string()
}
