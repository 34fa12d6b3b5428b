//! Checksum-database proxy (C5): forwards `sumdb/<host>/...` requests to an
//! allow-listed upstream host.

use crate::core::errors::{ProxyError, Result};
use crate::core::path::ModuleRequest;
use bytes::Bytes;
use std::collections::HashSet;
use std::time::Duration;

pub struct SumdbProxy {
    allow_list: HashSet<String>,
    http: reqwest::Client,
    fetch_timeout: Duration,
}

/// `None` for a bare `200`/`204` with no body (the `supported` probe);
/// `Some` for a forwarded body.
#[derive(Debug)]
pub enum SumdbResponse {
    Supported,
    Body(Bytes),
}

impl SumdbProxy {
    pub fn new(allow_list: Vec<String>, http: reqwest::Client, fetch_timeout: Duration) -> Self {
        Self {
            allow_list: allow_list.into_iter().collect(),
            http,
            fetch_timeout,
        }
    }

    fn check_host(&self, host: &str) -> Result<()> {
        if self.allow_list.contains(host) {
            Ok(())
        } else {
            Err(ProxyError::bare_not_found())
        }
    }

    pub async fn handle(&self, req: &ModuleRequest) -> Result<SumdbResponse> {
        let host = req
            .database_host
            .as_deref()
            .ok_or_else(|| ProxyError::Internal("sumdb request missing host".into()))?;
        self.check_host(host)?;

        let tail = req.tail.as_deref().unwrap_or_default();
        if tail == "supported" {
            return Ok(SumdbResponse::Supported);
        }

        let url = format!("https://{host}/{tail}");
        let response = self
            .http
            .get(&url)
            .timeout(self.fetch_timeout)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(SumdbResponse::Body(response.bytes().await?));
        }
        if status.as_u16() == 404 || status.as_u16() == 410 {
            return Err(ProxyError::bare_not_found());
        }
        Err(ProxyError::BadUpstream(format!(
            "sumdb host {host} responded {status}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::path::RequestKind;

    fn req(host: &str, tail: &str) -> ModuleRequest {
        ModuleRequest {
            kind: RequestKind::SumdbSupported,
            module_path: String::new(),
            version: None,
            query: None,
            database_host: Some(host.to_string()),
            tail: Some(tail.to_string()),
        }
    }

    #[tokio::test]
    async fn disallowed_host_is_not_found() {
        let proxy = SumdbProxy::new(
            vec!["sum.golang.org".into()],
            reqwest::Client::new(),
            Duration::from_secs(5),
        );
        let err = proxy.handle(&req("evil.example", "supported")).await.unwrap_err();
        assert!(matches!(err, ProxyError::NotFound(None)));
    }

    #[tokio::test]
    async fn allowed_host_supported_probe_short_circuits() {
        let proxy = SumdbProxy::new(
            vec!["sum.golang.org".into()],
            reqwest::Client::new(),
            Duration::from_secs(5),
        );
        let resp = proxy.handle(&req("sum.golang.org", "supported")).await.unwrap();
        assert!(matches!(resp, SumdbResponse::Supported));
    }
}
