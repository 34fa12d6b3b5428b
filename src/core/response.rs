//! Response policy (C7): content-type derivation and `Cache-Control`
//! assignment, kept separate from the dispatcher so the rules in one place
//! govern every response path (cache hit, fresh fetch, error).

use crate::core::path::RequestKind;

/// `n >= 0` -> `public, max-age=n`; `n == -1` -> must-revalidate/no-store;
/// `n <= -2` -> no header at all.
pub const MAX_AGE_IMMUTABLE: i64 = 604_800;
pub const MAX_AGE_MUTABLE: i64 = 60;
pub const MAX_AGE_NOT_FOUND_INSENSITIVE: i64 = 600;
pub const MAX_AGE_NOT_FOUND_SENSITIVE: i64 = 60;
pub const MAX_AGE_NO_STORE: i64 = -1;
pub const MAX_AGE_NO_HEADER: i64 = -2;

pub fn cache_control_header(max_age: i64) -> Option<String> {
    if max_age >= 0 {
        Some(format!("public, max-age={max_age}"))
    } else if max_age == -1 {
        Some("must-revalidate, no-cache, no-store".to_string())
    } else {
        None
    }
}

pub fn content_type(kind: RequestKind) -> &'static str {
    match kind {
        RequestKind::Info | RequestKind::Latest | RequestKind::SumdbSupported => {
            "application/json; charset=utf-8"
        }
        RequestKind::Mod | RequestKind::List | RequestKind::SumdbLookup => {
            "text/plain; charset=utf-8"
        }
        RequestKind::Zip => "application/zip",
        RequestKind::SumdbTile => "application/octet-stream",
    }
}

pub fn max_age_for_success(kind: RequestKind) -> i64 {
    if kind.is_immutable() {
        MAX_AGE_IMMUTABLE
    } else {
        MAX_AGE_MUTABLE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_control_sentinels() {
        assert_eq!(cache_control_header(604_800).as_deref(), Some("public, max-age=604800"));
        assert_eq!(cache_control_header(0).as_deref(), Some("public, max-age=0"));
        assert_eq!(
            cache_control_header(-1).as_deref(),
            Some("must-revalidate, no-cache, no-store")
        );
        assert_eq!(cache_control_header(-2), None);
        assert_eq!(cache_control_header(-5), None);
    }

    #[test]
    fn zip_content_type_is_exact() {
        assert_eq!(content_type(RequestKind::Zip), "application/zip");
    }

    #[test]
    fn mutable_kinds_get_short_max_age() {
        assert_eq!(max_age_for_success(RequestKind::List), MAX_AGE_MUTABLE);
        assert_eq!(max_age_for_success(RequestKind::Latest), MAX_AGE_MUTABLE);
        assert_eq!(max_age_for_success(RequestKind::Info), MAX_AGE_IMMUTABLE);
    }
}
