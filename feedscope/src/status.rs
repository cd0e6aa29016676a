use std::fmt;

/// Terminal status of one fetch/processing pass over a source.
///
/// `as_str` yields the stable code written to the source catalog and the
/// error log; downstream stages match on those strings, so treat them as a
/// wire format and never rename a variant's code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    /// Feed fetched, parsed, and at least one row built.
    Ok,
    /// Source reachable but nothing survived the lookback window.
    NoRecentArticles,
    /// Feed recovered leniently from malformed XML.
    ParsingError,
    ConnectionTimeout,
    ConnectionRefused,
    DnsError,
    SslError,
    Http401Unauthorized,
    Http403Forbidden,
    Http404NotFound,
    Http429TooManyRequests,
    Http5xxServerError,
    /// HTTP 200 whose Content-Type names none of xml/rss/atom.
    InvalidContentType,
    UnknownError,
}

impl StatusCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusCode::Ok => "OK",
            StatusCode::NoRecentArticles => "NO_RECENT_ARTICLES",
            StatusCode::ParsingError => "PARSING_ERROR",
            StatusCode::ConnectionTimeout => "CONNECTION_TIMEOUT",
            StatusCode::ConnectionRefused => "CONNECTION_REFUSED",
            StatusCode::DnsError => "DNS_ERROR",
            StatusCode::SslError => "SSL_ERROR",
            StatusCode::Http401Unauthorized => "HTTP_401_UNAUTHORIZED",
            StatusCode::Http403Forbidden => "HTTP_403_FORBIDDEN",
            StatusCode::Http404NotFound => "HTTP_404_NOT_FOUND",
            StatusCode::Http429TooManyRequests => "HTTP_429_TOO_MANY_REQUESTS",
            StatusCode::Http5xxServerError => "HTTP_5XX_SERVER_ERROR",
            StatusCode::InvalidContentType => "INVALID_CONTENT_TYPE",
            StatusCode::UnknownError => "UNKNOWN_ERROR",
        }
    }

    /// Generic human-readable description of the code. Outcome structs carry
    /// a more specific message where one exists (e.g. the offending
    /// Content-Type value).
    pub fn message(&self) -> &'static str {
        match self {
            StatusCode::Ok => "Feed fetched and parsed",
            StatusCode::NoRecentArticles => "No entries inside the lookback window",
            StatusCode::ParsingError => "Feed parsed with warnings",
            StatusCode::ConnectionTimeout => "Request timed out",
            StatusCode::ConnectionRefused => "Connection refused or reset",
            StatusCode::DnsError => "DNS resolution failed",
            StatusCode::SslError => "TLS/SSL negotiation failed",
            StatusCode::Http401Unauthorized => "HTTP 401 Unauthorized",
            StatusCode::Http403Forbidden => "HTTP 403 Forbidden",
            StatusCode::Http404NotFound => "HTTP 404 Not Found",
            StatusCode::Http429TooManyRequests => "HTTP 429 Too Many Requests",
            StatusCode::Http5xxServerError => "HTTP 5xx server error",
            StatusCode::InvalidContentType => "Response Content-Type is not a feed type",
            StatusCode::UnknownError => "Unclassified error",
        }
    }

    /// Fetch-level failures mark the source ERROR and produce an error-log
    /// row. The three soft codes (OK, PARSING_ERROR, NO_RECENT_ARTICLES)
    /// leave the source status OK: the feed was reachable and processed.
    pub fn is_fetch_failure(&self) -> bool {
        !matches!(
            self,
            StatusCode::Ok | StatusCode::NoRecentArticles | StatusCode::ParsingError
        )
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
