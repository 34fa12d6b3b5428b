//! Upstream chain fetcher (C3): resolves a module request against an
//! ordered `GOPROXY`-style chain of proxies, `direct`, or `off`.

use crate::core::errors::{ProxyError, Result};
use crate::core::path::{self, ModuleRequest};
use crate::core::toolchain::ToolchainFetcher;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    Url(String),
    Direct,
    Off,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FallThrough {
    /// Continue to the next element only on 404/410-equivalent (`,`).
    Soft,
    /// Continue to the next element on any error (`|`).
    Hard,
}

#[derive(Debug, Clone)]
struct ChainStep {
    target: Target,
    /// The separator between this step and the next one, if any.
    next: Option<FallThrough>,
}

fn parse_target(raw: &str) -> Target {
    match raw {
        "direct" => Target::Direct,
        "off" => Target::Off,
        url => Target::Url(url.trim_end_matches('/').to_string()),
    }
}

fn parse_chain(raw: &str) -> Vec<ChainStep> {
    let mut elems = Vec::new();
    let mut seps = Vec::new();
    let mut cur = String::new();
    for c in raw.chars() {
        if c == ',' || c == '|' {
            elems.push(std::mem::take(&mut cur));
            seps.push(if c == ',' { FallThrough::Soft } else { FallThrough::Hard });
        } else {
            cur.push(c);
        }
    }
    elems.push(cur);

    elems
        .into_iter()
        .enumerate()
        .map(|(i, raw)| ChainStep {
            target: parse_target(raw.trim()),
            next: seps.get(i).copied(),
        })
        .collect()
}

/// Whether `b` can appear unescaped in a URL path segment without
/// disturbing the GOPROXY structural delimiters (`@`, `!`, `+`) the
/// reference proxy forwards literally.
fn is_path_segment_safe(b: u8) -> bool {
    b.is_ascii_alphanumeric()
        || matches!(
            b,
            b'-' | b'.' | b'_' | b'~' | b'!' | b'$' | b'&' | b'\'' | b'(' | b')' | b'*' | b'+' | b',' | b';' | b'=' | b':' | b'@'
        )
}

fn encode_segment(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        if is_path_segment_safe(b) {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{b:02X}"));
        }
    }
    out
}

/// Percent-encodes each path segment of a cache name for use as an
/// upstream request path, preserving `/` as the segment separator and
/// leaving the wire protocol's own `@v`/`@latest`/`!`-escape delimiters
/// literal rather than re-encoding them.
fn encode_request_path(req: &ModuleRequest) -> String {
    path::cache_name(req)
        .split('/')
        .map(encode_segment)
        .collect::<Vec<_>>()
        .join("/")
}

pub struct UpstreamChain {
    steps: Vec<ChainStep>,
    http: reqwest::Client,
    direct: Arc<ToolchainFetcher>,
    fetch_timeout: Duration,
}

impl UpstreamChain {
    pub fn new(
        chain_spec: &str,
        http: reqwest::Client,
        direct: Arc<ToolchainFetcher>,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            steps: parse_chain(chain_spec),
            http,
            direct,
            fetch_timeout,
        }
    }

    pub async fn fetch(&self, req: &ModuleRequest) -> Result<Bytes> {
        let mut last_err: Option<ProxyError> = None;

        for step in &self.steps {
            let result = match &step.target {
                Target::Url(base) => self.fetch_from_url(base, req).await,
                Target::Direct => {
                    debug!(module = %req.module_path, "falling to direct toolchain fetch");
                    self.direct.fetch(req).await
                }
                Target::Off => Err(ProxyError::ModuleDisabled),
            };

            match result {
                Ok(bytes) => return Ok(bytes),
                Err(err) => {
                    let eligible = !matches!(err, ProxyError::ModuleDisabled)
                        && match step.next {
                            None => false,
                            Some(FallThrough::Soft) => err.is_soft_fallthrough(),
                            Some(FallThrough::Hard) => true,
                        };
                    if !eligible {
                        return Err(err);
                    }
                    last_err = Some(err);
                }
            }
        }

        Err(last_err.unwrap_or_else(ProxyError::bare_not_found))
    }

    async fn fetch_from_url(&self, base: &str, req: &ModuleRequest) -> Result<Bytes> {
        let url = format!("{base}/{}", encode_request_path(req));
        let response = self
            .http
            .get(&url)
            .timeout(self.fetch_timeout)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response.bytes().await?);
        }
        if status.as_u16() == 404 || status.as_u16() == 410 {
            return Err(ProxyError::bare_not_found());
        }
        Err(ProxyError::BadUpstream(format!(
            "upstream {base} responded {status}"
        )))
    }
}
