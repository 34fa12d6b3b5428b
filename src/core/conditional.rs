//! Conditional-GET evaluation (`If-None-Match`, `If-Modified-Since`,
//! `If-Unmodified-Since`, `If-Match`, `If-Range`, `Range`), kept separate
//! from the dispatcher since the cacher only supplies metadata — the
//! dispatcher is the sole place that interprets request headers against it.

use crate::core::cache::CacheMeta;
use axum::http::HeaderMap;
use std::time::SystemTime;

pub enum Outcome {
    /// Serve the full body.
    Full,
    /// `304 Not Modified`, no body.
    NotModified,
    /// `412 Precondition Failed`, no body.
    PreconditionFailed,
    /// `206 Partial Content` for the given inclusive byte range.
    Partial(u64, u64),
}

fn quoted(etag: &str) -> String {
    format!("\"{etag}\"")
}

fn etag_list_matches(header_value: &str, etag: &str) -> bool {
    if header_value.trim() == "*" {
        return true;
    }
    header_value
        .split(',')
        .map(|s| s.trim().trim_start_matches("W/"))
        .any(|s| s == quoted(etag))
}

fn parse_http_date(value: &str) -> Option<SystemTime> {
    httpdate::parse_http_date(value).ok()
}

/// Evaluates the full conditional-request grammar against `meta`, in the
/// precedence order RFC 7232 prescribes: `If-Match` / `If-Unmodified-Since`
/// first (precondition on the representation's identity), then
/// `If-None-Match` / `If-Modified-Since` (cache revalidation), then `Range`
/// (only considered once the representation is known to be current).
pub fn evaluate(headers: &HeaderMap, meta: &CacheMeta, body_len: u64) -> Outcome {
    if let Some(if_match) = headers.get("if-match").and_then(|v| v.to_str().ok())
        && !meta.etag.is_empty()
        && !etag_list_matches(if_match, &meta.etag)
    {
        return Outcome::PreconditionFailed;
    }

    if let Some(if_unmod) = headers.get("if-unmodified-since").and_then(|v| v.to_str().ok())
        && let Some(since) = parse_http_date(if_unmod)
        && meta.mod_time > since
    {
        return Outcome::PreconditionFailed;
    }

    let mut not_modified = false;
    if let Some(if_none_match) = headers.get("if-none-match").and_then(|v| v.to_str().ok())
        && !meta.etag.is_empty()
    {
        if etag_list_matches(if_none_match, &meta.etag) {
            not_modified = true;
        }
    } else if let Some(if_mod) = headers.get("if-modified-since").and_then(|v| v.to_str().ok())
        && let Some(since) = parse_http_date(if_mod)
        && meta.mod_time <= since
    {
        not_modified = true;
    }
    if not_modified {
        return Outcome::NotModified;
    }

    if let Some(range) = headers.get("range").and_then(|v| v.to_str().ok()) {
        let range_still_valid = match headers.get("if-range").and_then(|v| v.to_str().ok()) {
            None => true,
            Some(if_range) => {
                if !meta.etag.is_empty() && if_range.trim() == quoted(&meta.etag) {
                    true
                } else {
                    parse_http_date(if_range).is_some_and(|since| meta.mod_time <= since)
                }
            }
        };
        if range_still_valid
            && let Some((start, end)) = parse_byte_range(range, body_len)
        {
            return Outcome::Partial(start, end);
        }
    }

    Outcome::Full
}

/// Parses a single-range `bytes=start-end` header (the only form this
/// server needs to serve). Multi-range requests fall back to a full
/// response, matching the common behavior of simple static file servers.
fn parse_byte_range(header_value: &str, len: u64) -> Option<(u64, u64)> {
    let spec = header_value.strip_prefix("bytes=")?;
    if spec.contains(',') || len == 0 {
        return None;
    }
    let (start_str, end_str) = spec.split_once('-')?;
    if start_str.is_empty() {
        let suffix_len: u64 = end_str.parse().ok()?;
        let suffix_len = suffix_len.min(len);
        return Some((len - suffix_len, len - 1));
    }
    let start: u64 = start_str.parse().ok()?;
    let end: u64 = if end_str.is_empty() {
        len.saturating_sub(1)
    } else {
        end_str.parse().ok()?
    };
    if start > end || start >= len {
        return None;
    }
    Some((start, end.min(len - 1)))
}

pub fn etag_header_value(etag: &str) -> Option<String> {
    if etag.is_empty() {
        None
    } else {
        Some(quoted(etag))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suffix_range_parses() {
        assert_eq!(parse_byte_range("bytes=-100", 500), Some((400, 499)));
    }

    #[test]
    fn open_ended_range_parses() {
        assert_eq!(parse_byte_range("bytes=100-", 500), Some((100, 499)));
    }

    #[test]
    fn closed_range_parses() {
        assert_eq!(parse_byte_range("bytes=10-20", 500), Some((10, 20)));
    }

    #[test]
    fn out_of_bounds_range_is_none() {
        assert_eq!(parse_byte_range("bytes=600-700", 500), None);
    }

    #[test]
    fn multi_range_is_unsupported() {
        assert_eq!(parse_byte_range("bytes=0-10,20-30", 500), None);
    }

    #[test]
    fn if_none_match_wildcard_matches_anything() {
        assert!(etag_list_matches("*", "abc123"));
    }

    #[test]
    fn if_none_match_list_matches_quoted_etag() {
        assert!(etag_list_matches("\"zzz\", \"abc123\"", "abc123"));
    }

    #[test]
    fn empty_etag_falls_back_to_modified_since() {
        let mut headers = HeaderMap::new();
        headers.insert("if-none-match", "\"whatever\"".parse().unwrap());
        headers.insert("if-modified-since", "Tue, 01 Jan 2030 00:00:00 GMT".parse().unwrap());
        let meta = CacheMeta {
            size: 10,
            mod_time: SystemTime::UNIX_EPOCH,
            etag: String::new(),
        };
        assert!(matches!(evaluate(&headers, &meta, 10), Outcome::NotModified));
    }
}
