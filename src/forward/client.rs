//! HTTP client utilities for forwarding requests upstream.
//!
//! Header rewriting happens here: the client's headers travel upstream
//! minus hop-by-hop fields and the proxy-auth header, with the selected
//! pool key substituted into `x-goog-api-key`.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method, Response};

use super::context::{Dialect, RelayBody, RelayPlan};
use super::error::{RelayError, RelayResult};
use crate::logger;

/// Upstream response headers never relayed back to the client.
const EXCLUDED_RESPONSE_HEADERS: &[&str] = &[
    "content-encoding",
    "content-length",
    "transfer-encoding",
    "connection",
];

/// Build the shared upstream client with the configured total deadline.
pub fn create_client(timeout_secs: u64) -> RelayResult<Client> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .connect_timeout(Duration::from_secs(10))
        .build()
        .map_err(|e| RelayError::Internal(format!("Failed to create HTTP client: {}", e)))
}

/// Copy the client's headers for the upstream request. `host` and
/// `content-length` are dropped; the OpenAI dialect additionally drops
/// `authorization` (the upstream authenticates via `x-goog-api-key`) and
/// pins `content-type` to JSON for the translated body.
pub fn build_upstream_headers(
    incoming: &axum::http::HeaderMap,
    dialect: Dialect,
    key: &str,
) -> HeaderMap {
    let mut out = HeaderMap::new();
    for (name, value) in incoming {
        let lower = name.as_str().to_ascii_lowercase();
        if lower == "host" || lower == "content-length" {
            continue;
        }
        if dialect == Dialect::OpenAi && lower == "authorization" {
            continue;
        }
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(lower.as_bytes()),
            HeaderValue::from_bytes(value.as_bytes()),
        ) {
            out.append(name, value);
        }
    }

    if dialect == Dialect::OpenAi {
        out.insert("content-type", HeaderValue::from_static("application/json"));
    }
    if let Ok(value) = HeaderValue::from_str(key) {
        out.insert("x-goog-api-key", value);
    }

    out
}

/// Forward one attempt upstream. The OpenAI dialect always POSTs its
/// translated JSON; pass-through keeps the client's method, body, and
/// query string. Transport failures map to 504 (deadline) or 502.
pub async fn forward(
    client: &Client,
    client_method: &axum::http::Method,
    url: &str,
    query: Option<&str>,
    headers: HeaderMap,
    plan: &RelayPlan,
) -> RelayResult<Response> {
    let method = match plan.dialect {
        Dialect::OpenAi => Method::POST,
        Dialect::Gemini => Method::from_bytes(client_method.as_str().as_bytes())
            .map_err(|_| {
                RelayError::Internal(format!("Unsupported method: {}", client_method))
            })?,
    };

    // Query parameters ride along only for pass-through requests; for the
    // OpenAI dialect everything relevant lives in the body.
    let url = match (plan.dialect, query) {
        (Dialect::Gemini, Some(q)) if !q.is_empty() => format!("{}?{}", url, q),
        _ => url.to_string(),
    };

    logger::info(
        "client",
        &format!("Forwarding {} request to: {}", method, url),
    );

    let mut request = client.request(method, url.as_str()).headers(headers);
    request = match &plan.body {
        RelayBody::Json(value) => request.json(value),
        RelayBody::Raw(bytes) if !bytes.is_empty() => request.body(bytes.clone()),
        RelayBody::Raw(_) => request,
    };

    request.send().await.map_err(map_transport_error)
}

/// Map a reqwest failure to the terminal pipeline error: deadline
/// overruns become 504, everything else 502. Neither consumes another key.
pub fn map_transport_error(e: reqwest::Error) -> RelayError {
    if e.is_timeout() {
        RelayError::UpstreamTimeout("Upstream request timed out.".to_string())
    } else {
        RelayError::UpstreamUnreachable(format!("Could not connect to upstream server: {}", e))
    }
}

/// Copy upstream response headers for the client, dropping hop-by-hop
/// fields plus any extra names the caller excludes.
pub fn filter_response_headers(
    upstream: &HeaderMap,
    extra_excluded: &[&str],
) -> axum::http::HeaderMap {
    let mut out = axum::http::HeaderMap::new();
    for (name, value) in upstream {
        let lower = name.as_str().to_ascii_lowercase();
        if EXCLUDED_RESPONSE_HEADERS.contains(&lower.as_str())
            || extra_excluded.contains(&lower.as_str())
        {
            continue;
        }
        if let (Ok(name), Ok(value)) = (
            axum::http::HeaderName::from_bytes(lower.as_bytes()),
            axum::http::HeaderValue::from_bytes(value.as_bytes()),
        ) {
            out.append(name, value);
        }
    }
    out
}
