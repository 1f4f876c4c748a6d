//! Publication metadata: feed cache validators and conditional requests.
//!
//! The public iCal feed is cacheable: its ETag fingerprints the publication
//! token together with the last document and publication writes, and
//! `Last-Modified` is the later of the two. Conditional request headers are
//! matched per RFC 7231.

use chrono::{DateTime, TimeZone, Utc};
use sha2::{Digest, Sha256};

/// Cache validators for one feed response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedValidators {
    pub etag: String,
    pub last_modified: DateTime<Utc>,
}

pub fn feed_validators(
    token: &str,
    state_updated_at: DateTime<Utc>,
    publication_updated_at: DateTime<Utc>,
) -> FeedValidators {
    FeedValidators {
        etag: compute_feed_etag(token, state_updated_at, publication_updated_at),
        last_modified: state_updated_at.max(publication_updated_at),
    }
}

impl FeedValidators {
    /// True when the conditional headers show the client already holds the
    /// current representation.
    pub fn not_modified(
        &self,
        if_none_match: Option<&str>,
        if_modified_since: Option<&str>,
    ) -> bool {
        if let Some(header) = if_none_match {
            if etag_matches(header, &self.etag) {
                return true;
            }
        }
        if let Some(header) = if_modified_since {
            if if_modified_since_matches(header, self.last_modified) {
                return true;
            }
        }
        false
    }
}

/// Quoted hex SHA-256 over `token|stateUpdatedAt|publicationUpdatedAt`.
pub fn compute_feed_etag(
    token: &str,
    state_updated_at: DateTime<Utc>,
    publication_updated_at: DateTime<Utc>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.update(b"|");
    hasher.update(state_updated_at.to_rfc3339().as_bytes());
    hasher.update(b"|");
    hasher.update(publication_updated_at.to_rfc3339().as_bytes());
    format!("\"{}\"", hex::encode(hasher.finalize()))
}

/// Match an `If-None-Match` header against the current ETag. Handles `*`,
/// comma-separated lists, weak `W/` prefixes, and unquoted values.
pub fn etag_matches(header: &str, etag: &str) -> bool {
    let current = etag.trim_matches('"');
    for candidate in header.split(',') {
        let candidate = candidate.trim();
        if candidate == "*" {
            return true;
        }
        let candidate = candidate.strip_prefix("W/").unwrap_or(candidate);
        if candidate.trim_matches('"') == current {
            return true;
        }
    }
    false
}

/// Format a timestamp as an RFC 7231 IMF-fixdate (`Sun, 06 Nov 1994
/// 08:49:37 GMT`).
pub fn format_http_date(dt: DateTime<Utc>) -> String {
    dt.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Parse an HTTP date in any of the three RFC 7231 formats.
pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    let trimmed = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc2822(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }
    // Obsolete RFC 850 format.
    if let Ok(naive) =
        chrono::NaiveDateTime::parse_from_str(trimmed, "%A, %d-%b-%y %H:%M:%S GMT")
    {
        return Some(Utc.from_utc_datetime(&naive));
    }
    // Obsolete asctime format.
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(trimmed, "%a %b %e %H:%M:%S %Y") {
        return Some(Utc.from_utc_datetime(&naive));
    }
    None
}

/// True when the representation has not changed since the supplied
/// `If-Modified-Since` timestamp. HTTP dates are second-granular, so the
/// comparison truncates sub-second precision.
pub fn if_modified_since_matches(header: &str, last_modified: DateTime<Utc>) -> bool {
    let Some(parsed) = parse_http_date(header) else {
        return false;
    };
    let truncated = Utc
        .timestamp_opt(last_modified.timestamp(), 0)
        .single()
        .unwrap_or(last_modified);
    truncated <= parsed
}
