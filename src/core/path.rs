//! Decodes a proxy URL (method + path, with the configured prefix already
//! stripped) into a typed [`ModuleRequest`], and performs the `!`-escaping
//! the GOPROXY wire protocol uses for module paths and versions.

use crate::core::errors::{ProxyError, Result};
use once_cell::sync::Lazy;
use regex::Regex;

/// The parsed, typed shape of a single proxy request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleRequest {
    pub kind: RequestKind,
    /// Canonical (un-escaped) module path. Empty for sumdb kinds.
    pub module_path: String,
    /// Canonical version, present for `Info`/`Mod`/`Zip`.
    pub version: Option<String>,
    /// The raw query segment for `@v/<query>.info` requests that are not a
    /// bare, already-resolved version (e.g. `latest`, a branch name).
    pub query: Option<String>,
    /// Checksum database host, for sumdb kinds.
    pub database_host: Option<String>,
    /// Everything after `sumdb/<host>/`, unparsed, for sumdb kinds.
    pub tail: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    List,
    Info,
    Mod,
    Zip,
    Latest,
    SumdbSupported,
    SumdbLookup,
    SumdbTile,
}

impl RequestKind {
    /// Whether a successful artifact of this kind is immutable (§4.7).
    pub fn is_immutable(self) -> bool {
        !matches!(self, RequestKind::List | RequestKind::Latest)
    }
}

/// Escapes a module path or version string per the GOPROXY wire protocol:
/// every uppercase letter becomes `!` followed by its lowercase form. Used
/// when building upstream request paths and cache names from a canonical,
/// unescaped string.
pub fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 4);
    for c in s.chars() {
        if c.is_ascii_uppercase() {
            out.push('!');
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// Reverses [`escape`], rejecting a bare uppercase letter (which must never
/// appear in an escaped path) or a dangling `!` not followed by a lowercase
/// letter.
pub fn unescape(s: &str) -> Result<String> {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c.is_ascii_uppercase() {
            return Err(ProxyError::BadRequest("bad-escape".into()));
        }
        if c == '!' {
            match chars.next() {
                Some(next) if next.is_ascii_lowercase() => out.push(next.to_ascii_uppercase()),
                _ => return Err(ProxyError::BadRequest("bad-escape".into())),
            }
        } else {
            out.push(c);
        }
    }
    Ok(out)
}

/// Pseudo-version grammar: `vX.Y.Z-yyyymmddhhmmss-<12 hex>`, with an
/// optional `+incompatible` suffix, matching the reference proxy client.
static PSEUDO_VERSION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^v\d+\.\d+\.\d+-\d{14}-[0-9a-f]{12}(\+incompatible)?$").unwrap()
});

pub fn is_pseudo_version(version: &str) -> bool {
    PSEUDO_VERSION_RE.is_match(version)
}

/// A version is valid if it's a pseudo-version, or it parses as semver
/// (with an optional `+incompatible` build metadata suffix stripped first,
/// since `semver` would otherwise reject it as build metadata only if it
/// parses fine — `+incompatible` is valid build-metadata syntax already).
pub fn is_valid_version(version: &str) -> bool {
    if !version.starts_with('v') {
        return false;
    }
    if is_pseudo_version(version) {
        return true;
    }
    semver::Version::parse(&version[1..]).is_ok()
}

/// Splits on the last `@` for `sumdb/<host>/lookup/<module>@<version>`.
fn split_at_last(s: &str, sep: char) -> Option<(&str, &str)> {
    let idx = s.rfind(sep)?;
    Some((&s[..idx], &s[idx + sep.len_utf8()..]))
}

/// Percent-decodes a path segment per RFC 3986. `!`-unescaping (which
/// reconstructs uppercase letters) is applied afterward by the caller,
/// matching the reference client's encoding order (percent-encoding wraps
/// `!`-escaping).
fn percent_decode(s: &str) -> Result<String> {
    urlencoding::decode(s)
        .map(|cow| cow.into_owned())
        .map_err(|_| ProxyError::BadRequest("bad-escape".into()))
}

/// Parses an HTTP method name and a trimmed request path into a
/// [`ModuleRequest`]. `method` must already have been checked to be GET or
/// HEAD by the caller (the dispatcher rejects other methods earlier so it
/// can apply method-not-allowed before ever invoking the parser).
pub fn parse(path: &str) -> Result<ModuleRequest> {
    let path = path.strip_prefix('/').unwrap_or(path);

    if let Some(rest) = path.strip_prefix("sumdb/") {
        return parse_sumdb(rest);
    }

    if let Some((mod_part, ver_query)) = split_at_last(path, '@')
        && let Some(query) = ver_query.strip_suffix(".info")
        // `<mod>/@v/<query>.info` — but only if mod_part ends in "/@v"
        && let Some(m) = mod_part.strip_suffix("/@v")
    {
        return build_info_request(m, query);
    }

    if let Some(m) = path.strip_suffix("/@v/list") {
        let module_path = unescape(m)?;
        return Ok(ModuleRequest {
            kind: RequestKind::List,
            module_path,
            version: None,
            query: None,
            database_host: None,
            tail: None,
        });
    }

    if let Some(m) = path.strip_suffix("/@latest") {
        let module_path = unescape(m)?;
        return Ok(ModuleRequest {
            kind: RequestKind::Latest,
            module_path,
            version: None,
            query: None,
            database_host: None,
            tail: None,
        });
    }

    if let Some((module_escaped, ver_file)) = path.split_once("/@v/") {
        for (suffix, kind) in [
            (".info", RequestKind::Info),
            (".mod", RequestKind::Mod),
            (".zip", RequestKind::Zip),
        ] {
            if let Some(ver_escaped) = ver_file.strip_suffix(suffix) {
                let module_path = unescape(module_escaped)?;
                let version = unescape(ver_escaped)?;
                if kind == RequestKind::Info && !is_valid_version(&version) {
                    // Not a bare semver: treat as a query (branch, "latest", etc).
                    return Ok(ModuleRequest {
                        kind: RequestKind::Info,
                        module_path,
                        version: None,
                        query: Some(version),
                        database_host: None,
                        tail: None,
                    });
                }
                if kind != RequestKind::Info && !is_valid_version(&version) {
                    return Err(ProxyError::BadRequest("malformed-path".into()));
                }
                return Ok(ModuleRequest {
                    kind,
                    module_path,
                    version: Some(version),
                    query: None,
                    database_host: None,
                    tail: None,
                });
            }
        }
    }

    Err(ProxyError::BadRequest("malformed-path".into()))
}

fn build_info_request(module_escaped: &str, query_escaped: &str) -> Result<ModuleRequest> {
    let module_path = unescape(module_escaped)?;
    let query = percent_decode(query_escaped)?;
    if is_valid_version(&query) {
        return Ok(ModuleRequest {
            kind: RequestKind::Info,
            module_path,
            version: Some(query),
            query: None,
            database_host: None,
            tail: None,
        });
    }
    Ok(ModuleRequest {
        kind: RequestKind::Info,
        module_path,
        version: None,
        query: Some(query),
        database_host: None,
        tail: None,
    })
}

fn parse_sumdb(rest: &str) -> Result<ModuleRequest> {
    let (host, tail) = rest
        .split_once('/')
        .ok_or_else(|| ProxyError::BadRequest("malformed-path".into()))?;
    if host.is_empty() {
        return Err(ProxyError::BadRequest("malformed-path".into()));
    }

    if tail == "supported" {
        return Ok(ModuleRequest {
            kind: RequestKind::SumdbSupported,
            module_path: String::new(),
            version: None,
            query: None,
            database_host: Some(host.to_string()),
            tail: Some(tail.to_string()),
        });
    }
    if tail.starts_with("lookup/") {
        return Ok(ModuleRequest {
            kind: RequestKind::SumdbLookup,
            module_path: String::new(),
            version: None,
            query: None,
            database_host: Some(host.to_string()),
            tail: Some(tail.to_string()),
        });
    }
    if tail.starts_with("tile/") {
        return Ok(ModuleRequest {
            kind: RequestKind::SumdbTile,
            module_path: String::new(),
            version: None,
            query: None,
            database_host: Some(host.to_string()),
            tail: Some(tail.to_string()),
        });
    }
    Err(ProxyError::BadRequest("unsupported-kind".into()))
}

/// Computes the deterministic cache name for a parsed request, per the
/// grammar in the data model.
pub fn cache_name(req: &ModuleRequest) -> String {
    match req.kind {
        RequestKind::List => format!("{}/@v/list", escape(&req.module_path)),
        RequestKind::Latest => format!("{}/@latest", escape(&req.module_path)),
        RequestKind::Info => {
            let selector = req
                .version
                .as_deref()
                .or(req.query.as_deref())
                .unwrap_or("latest");
            format!("{}/@v/{}.info", escape(&req.module_path), escape(selector))
        }
        RequestKind::Mod => format!(
            "{}/@v/{}.mod",
            escape(&req.module_path),
            escape(req.version.as_deref().unwrap_or_default())
        ),
        RequestKind::Zip => format!(
            "{}/@v/{}.zip",
            escape(&req.module_path),
            escape(req.version.as_deref().unwrap_or_default())
        ),
        RequestKind::SumdbSupported | RequestKind::SumdbLookup | RequestKind::SumdbTile => {
            format!(
                "sumdb/{}/{}",
                req.database_host.as_deref().unwrap_or_default(),
                req.tail.as_deref().unwrap_or_default()
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_roundtrip() {
        assert_eq!(escape("github.com/User/Repo"), "github.com/!user/!repo");
        assert_eq!(
            unescape("github.com/!user/!repo").unwrap(),
            "github.com/User/Repo"
        );
    }

    #[test]
    fn unescape_rejects_bare_uppercase() {
        assert!(unescape("example.com/Foo").is_err());
    }

    #[test]
    fn parses_list_request() {
        let req = parse("example.com/foo/@v/list").unwrap();
        assert_eq!(req.kind, RequestKind::List);
        assert_eq!(req.module_path, "example.com/foo");
        assert_eq!(cache_name(&req), "example.com/foo/@v/list");
    }

    #[test]
    fn parses_escaped_module_path() {
        let req = parse("example.com/!foo/@v/list").unwrap();
        assert_eq!(req.module_path, "example.com/Foo");
    }

    #[test]
    fn parses_info_request_with_version() {
        let req = parse("example.com/foo/@v/v1.0.0.info").unwrap();
        assert_eq!(req.kind, RequestKind::Info);
        assert_eq!(req.version.as_deref(), Some("v1.0.0"));
        assert_eq!(cache_name(&req), "example.com/foo/@v/v1.0.0.info");
    }

    #[test]
    fn parses_info_request_with_query() {
        let req = parse("example.com/foo/@v/latest.info").unwrap();
        assert_eq!(req.kind, RequestKind::Info);
        assert_eq!(req.version, None);
        assert_eq!(req.query.as_deref(), Some("latest"));
    }

    #[test]
    fn parses_latest_request() {
        let req = parse("example.com/foo/@latest").unwrap();
        assert_eq!(req.kind, RequestKind::Latest);
    }

    #[test]
    fn parses_zip_request() {
        let req = parse("example.com/foo/@v/v1.2.3.zip").unwrap();
        assert_eq!(req.kind, RequestKind::Zip);
        assert_eq!(req.version.as_deref(), Some("v1.2.3"));
    }

    #[test]
    fn rejects_malformed_path() {
        assert!(parse("example.com/foo").is_err());
    }

    #[test]
    fn parses_sumdb_supported() {
        let req = parse("sumdb/sum.golang.org/supported").unwrap();
        assert_eq!(req.kind, RequestKind::SumdbSupported);
        assert_eq!(req.database_host.as_deref(), Some("sum.golang.org"));
    }

    #[test]
    fn parses_sumdb_lookup() {
        let req = parse("sumdb/sum.golang.org/lookup/example.com/foo@v1.0.0").unwrap();
        assert_eq!(req.kind, RequestKind::SumdbLookup);
        assert_eq!(
            req.tail.as_deref(),
            Some("lookup/example.com/foo@v1.0.0")
        );
    }

    #[test]
    fn pseudo_version_detection() {
        assert!(is_pseudo_version("v0.0.0-20191109021931-daa7c04131f5"));
        assert!(!is_pseudo_version("v1.2.3"));
        assert!(is_valid_version("v1.2.3"));
        assert!(is_valid_version("v0.0.0-20191109021931-daa7c04131f5"));
    }

    #[test]
    fn roundtrip_parse_cache_name() {
        for path in [
            "example.com/foo/@v/list",
            "example.com/foo/@latest",
            "example.com/foo/@v/v1.0.0.info",
            "example.com/foo/@v/v1.0.0.mod",
            "example.com/foo/@v/v1.0.0.zip",
        ] {
            let req = parse(path).unwrap();
            assert_eq!(cache_name(&req), path);
        }
    }
}
