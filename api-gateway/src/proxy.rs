//! The forwarding engine and the legacy passthrough route.
//!
//! Requests are streamed to the resolved backend and the backend's response
//! is streamed back verbatim: status, headers and body are the backend's
//! own, with only hop-by-hop headers removed on each leg.

use axum::{
    body::Body,
    extract::{Request, State},
    http::{HeaderMap, HeaderName, header},
    response::Response,
};
use service_core::error::AppError;
use service_core::middleware::tracing::RequestId;
use service_core::observability::inject_trace_context;
use std::time::Duration;
use tracing::debug;

use crate::AppState;
use crate::services::resolver::ResolvedEndpoint;

/// Connection-scoped headers that must not cross a proxy hop (RFC 9110 §7.6.1).
const HOP_BY_HOP_HEADERS: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP_HEADERS.contains(&name.as_str())
}

/// Map a gateway path onto the backend's root, e.g. `/users/profile` with
/// prefix `/users` becomes `/profile`, and `/users` alone becomes `/`.
pub fn rewrite_path(path: &str, prefix: &str) -> String {
    let stripped = path.strip_prefix(prefix).unwrap_or(path);
    if stripped.is_empty() {
        "/".to_string()
    } else {
        stripped.to_string()
    }
}

/// Shared client for proxied forwarding. Upstream redirects are passed
/// through to the caller, never followed here.
pub fn proxy_client(timeout: Duration) -> Result<reqwest::Client, AppError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .map_err(|e| AppError::InternalError(anyhow::anyhow!("failed to build proxy client: {e}")))
}

/// Forward a request to `endpoint` at `path`, streaming both bodies.
///
/// The caller has already decided the target; this only rewrites the
/// request line and headers. Dropping the returned future (client
/// disconnect) aborts the in-flight upstream call with it.
pub async fn forward(
    state: &AppState,
    endpoint: &ResolvedEndpoint,
    path: &str,
    req: Request,
) -> Result<Response, AppError> {
    let (parts, body) = req.into_parts();

    let mut url = format!("{}{}", endpoint.base_url(), path);
    if let Some(query) = parts.uri.query() {
        url.push('?');
        url.push_str(query);
    }

    let mut headers = HeaderMap::with_capacity(parts.headers.len());
    for (name, value) in parts.headers.iter() {
        // Host is the upstream's own; content-length no longer holds once
        // the body is re-framed as a stream.
        if is_hop_by_hop(name) || name == &header::HOST || name == &header::CONTENT_LENGTH {
            continue;
        }
        headers.append(name, value.clone());
    }
    inject_trace_context(&mut headers);

    let request_id = parts
        .extensions
        .get::<RequestId>()
        .map(|id| id.0.as_str())
        .unwrap_or("-");
    debug!(method = %parts.method, url = %url, request_id, "forwarding to upstream");

    let upstream = state
        .http
        .request(parts.method, &url)
        .headers(headers)
        .body(reqwest::Body::wrap_stream(body.into_data_stream()))
        .send()
        .await
        .map_err(|err| {
            if err.is_timeout() {
                AppError::ServiceUnavailable("upstream request timed out".to_string())
            } else {
                AppError::BadGateway("upstream unreachable".to_string())
            }
        })?;

    let status = upstream.status();
    let mut response_headers = HeaderMap::with_capacity(upstream.headers().len());
    for (name, value) in upstream.headers().iter() {
        if !is_hop_by_hop(name) {
            response_headers.append(name, value.clone());
        }
    }

    let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
    *response.status_mut() = status;
    *response.headers_mut() = response_headers;

    Ok(response)
}

/// Legacy passthrough: `/{service}/rest...` forwarded as `/rest...` to the
/// named backend, no authentication. Kept for pre-`/api` consumers; new
/// clients should use the authenticated `/api` routes.
pub async fn legacy_proxy(State(state): State<AppState>, req: Request) -> Result<Response, AppError> {
    let path = req.uri().path().to_string();
    let service = path
        .trim_start_matches('/')
        .split('/')
        .next()
        .unwrap_or("")
        .to_string();

    if service.is_empty() || !state.resolver.is_known(&service) {
        return Err(AppError::NotFound(anyhow::anyhow!("unknown service")));
    }

    let endpoint = state.resolver.resolve(&service).await?;
    let backend_path = rewrite_path(&path, &format!("/{service}"));

    forward(&state, &endpoint, &backend_path, req).await
}
