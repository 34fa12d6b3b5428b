//! Dispatcher (C6): the single HTTP entry point. Parses the request,
//! resolves a cache hit or miss, and applies the response policy (C7).

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::core::cache::{CacheEntry, CacheMeta};
use crate::core::conditional::{self, Outcome};
use crate::core::errors::ProxyError;
use crate::core::path::{self, ModuleRequest, RequestKind};
use crate::core::response::{
    MAX_AGE_NO_HEADER, MAX_AGE_NO_STORE, MAX_AGE_NOT_FOUND_INSENSITIVE,
    MAX_AGE_NOT_FOUND_SENSITIVE, cache_control_header, content_type, max_age_for_success,
};
use crate::core::state::{RefreshJob, ServerState};
use crate::core::sumdb::SumdbResponse;

pub async fn handle(
    State(state): State<Arc<ServerState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    if method != Method::GET && method != Method::HEAD {
        return translate_error(&ProxyError::MethodNotAllowed);
    }

    let path_prefix = state.config.lock().await.path_prefix.clone();
    let trimmed = strip_prefix(uri.path(), &path_prefix);

    if trimmed == "healthz" {
        return StatusCode::NO_CONTENT.into_response();
    }

    let req = match path::parse(&trimmed) {
        Ok(r) => r,
        Err(e) => return translate_error(&e),
    };

    if req.kind == RequestKind::SumdbSupported {
        return match state.sumdb.handle(&req).await {
            Ok(_) => StatusCode::NO_CONTENT.into_response(),
            Err(e) => translate_error(&e),
        };
    }

    let name = path::cache_name(&req);
    let is_head = method == Method::HEAD;

    match state.cache.get(&name).await {
        Ok(entry) => serve_hit(&state, &req, &name, entry, &headers, is_head).await,
        Err(ProxyError::NotFound(_)) => fetch_and_serve(&state, req, name, is_head).await,
        Err(e) => translate_error(&e),
    }
}

fn strip_prefix(path: &str, prefix: &str) -> String {
    let stripped = path.strip_prefix('/').unwrap_or(path);
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        return stripped.to_string();
    }
    stripped
        .strip_prefix(prefix)
        .map(|rest| rest.trim_start_matches('/').to_string())
        .unwrap_or_else(|| stripped.to_string())
}

async fn maybe_enqueue_refresh(state: &Arc<ServerState>, req: &ModuleRequest, name: &str, meta: &CacheMeta) {
    if !matches!(req.kind, RequestKind::List | RequestKind::Latest) {
        return;
    }
    let freshness = state.config.lock().await.cache.freshness;
    if meta.mod_time.elapsed().unwrap_or_default() < freshness {
        return;
    }
    let job = RefreshJob {
        cache_name: name.to_string(),
        req: req.clone(),
    };
    if let Err(e) = state.refresh_tx.try_send(job) {
        debug!(cache_name = %name, error = %e, "skipping background refresh, queue full or closed");
    }
}

async fn serve_hit(
    state: &Arc<ServerState>,
    req: &ModuleRequest,
    name: &str,
    entry: CacheEntry,
    headers: &HeaderMap,
    is_head: bool,
) -> Response {
    maybe_enqueue_refresh(state, req, name, &entry.meta).await;

    let outcome = conditional::evaluate(headers, &entry.meta, entry.meta.size);
    let max_age = max_age_for_success(req.kind);

    let mut builder = Response::builder();
    if let Some(cc) = cache_control_header(max_age) {
        builder = builder.header(header::CACHE_CONTROL, cc);
    }
    builder = builder
        .header(header::CONTENT_TYPE, content_type(req.kind))
        .header(header::LAST_MODIFIED, httpdate::fmt_http_date(entry.meta.mod_time));
    if let Some(etag) = conditional::etag_header_value(&entry.meta.etag) {
        builder = builder.header(header::ETAG, etag);
    }

    match outcome {
        Outcome::NotModified => builder
            .status(StatusCode::NOT_MODIFIED)
            .body(Body::empty())
            .unwrap(),
        Outcome::PreconditionFailed => Response::builder()
            .status(StatusCode::PRECONDITION_FAILED)
            .body(Body::empty())
            .unwrap(),
        Outcome::Full => {
            builder = builder.header(header::CONTENT_LENGTH, entry.meta.size.to_string());
            if is_head {
                return builder.status(StatusCode::OK).body(Body::empty()).unwrap();
            }
            match tokio::fs::read(&entry.path).await {
                Ok(bytes) => builder.status(StatusCode::OK).body(Body::from(bytes)).unwrap(),
                Err(e) => translate_error(&ProxyError::from(e)),
            }
        }
        Outcome::Partial(start, end) => {
            let len = end - start + 1;
            builder = builder
                .header(header::CONTENT_LENGTH, len.to_string())
                .header(
                    header::CONTENT_RANGE,
                    format!("bytes {start}-{end}/{}", entry.meta.size),
                );
            if is_head {
                return builder
                    .status(StatusCode::PARTIAL_CONTENT)
                    .body(Body::empty())
                    .unwrap();
            }
            match tokio::fs::read(&entry.path).await {
                Ok(bytes) => {
                    let slice = bytes[start as usize..=end as usize].to_vec();
                    builder
                        .status(StatusCode::PARTIAL_CONTENT)
                        .body(Body::from(slice))
                        .unwrap()
                }
                Err(e) => translate_error(&ProxyError::from(e)),
            }
        }
    }
}

async fn fetch_and_serve(state: &Arc<ServerState>, req: ModuleRequest, name: String, is_head: bool) -> Response {
    let kind = req.kind;
    let bytes = match run_fetch(state.clone(), req, name.clone()).await {
        Ok(b) => b,
        Err(e) => return translate_error(&e),
    };

    let meta = match state.cache.put(&name, bytes.clone()).await {
        Ok(()) => state.cache.get(&name).await.ok().map(|e| e.meta),
        Err(e) => {
            warn!(cache_name = %name, error = %e, "failed to persist fetched artifact; serving anyway");
            None
        }
    };

    let max_age = max_age_for_success(kind);
    let mut builder = Response::builder().status(StatusCode::OK);
    if let Some(cc) = cache_control_header(max_age) {
        builder = builder.header(header::CACHE_CONTROL, cc);
    }
    builder = builder
        .header(header::CONTENT_TYPE, content_type(kind))
        .header(header::CONTENT_LENGTH, bytes.len().to_string());
    if let Some(meta) = &meta {
        builder = builder.header(header::LAST_MODIFIED, httpdate::fmt_http_date(meta.mod_time));
        if let Some(etag) = conditional::etag_header_value(&meta.etag) {
            builder = builder.header(header::ETAG, etag);
        }
    }

    let body = if is_head { Body::empty() } else { Body::from(bytes) };
    builder.body(body).unwrap()
}

/// Runs the actual backend fetch (module upstream chain or sumdb
/// forwarding) behind the process-wide single-flight coordinator, so
/// concurrent requests for the same cache name share one backend call.
pub(crate) async fn run_fetch(state: Arc<ServerState>, req: ModuleRequest, name: String) -> Result<Bytes, ProxyError> {
    let backend = state.clone();
    state
        .single_flight
        .run(&name, move || {
            Box::pin(async move {
                match req.kind {
                    RequestKind::SumdbLookup | RequestKind::SumdbTile => {
                        match backend.sumdb.handle(&req).await? {
                            SumdbResponse::Body(b) => Ok(b),
                            SumdbResponse::Supported => Ok(Bytes::new()),
                        }
                    }
                    _ => backend.upstream.fetch(&req).await,
                }
            })
        })
        .await
}

fn translate_error(err: &ProxyError) -> Response {
    match err {
        ProxyError::MethodNotAllowed => error_response(StatusCode::METHOD_NOT_ALLOWED, None, MAX_AGE_NO_HEADER),
        ProxyError::Internal(_) => error_response(StatusCode::INTERNAL_SERVER_ERROR, None, MAX_AGE_NO_HEADER),
        ProxyError::FetchTimedOut | ProxyError::FetchCancelled | ProxyError::BadUpstream(_) => {
            error_response(StatusCode::NOT_FOUND, err.not_found_body(), MAX_AGE_NO_STORE)
        }
        ProxyError::BadRequest(_) | ProxyError::ModuleDisabled => {
            error_response(StatusCode::NOT_FOUND, err.not_found_body(), MAX_AGE_NOT_FOUND_INSENSITIVE)
        }
        ProxyError::NotFound(_) => {
            error_response(StatusCode::NOT_FOUND, err.not_found_body(), MAX_AGE_NOT_FOUND_SENSITIVE)
        }
    }
}

fn error_response(status: StatusCode, body: Option<String>, max_age: i64) -> Response {
    let mut builder = Response::builder().status(status);
    if let Some(cc) = cache_control_header(max_age) {
        builder = builder.header(header::CACHE_CONTROL, cc);
    }
    let body_text = body.unwrap_or_default();
    if !body_text.is_empty() {
        builder = builder.header(header::CONTENT_TYPE, "text/plain; charset=utf-8");
    }
    builder.body(Body::from(body_text)).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_prefix_with_empty_prefix_is_identity() {
        assert_eq!(strip_prefix("/example.com/foo/@v/list", ""), "example.com/foo/@v/list");
    }

    #[test]
    fn strip_prefix_removes_configured_prefix() {
        assert_eq!(strip_prefix("/mod/example.com/foo/@v/list", "mod"), "example.com/foo/@v/list");
    }

    #[test]
    fn not_found_error_maps_to_404() {
        let resp = translate_error(&ProxyError::bare_not_found());
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn internal_error_maps_to_500_with_no_cache_control() {
        let resp = translate_error(&ProxyError::Internal("boom".into()));
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(resp.headers().get(header::CACHE_CONTROL).is_none());
    }

    #[test]
    fn method_not_allowed_maps_to_405() {
        let resp = translate_error(&ProxyError::MethodNotAllowed);
        assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
    }
}
