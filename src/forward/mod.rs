//! Request pipeline.
//!
//! Every client request flows through here:
//!
//! ```text
//! validate token -> detect dialect -> build plan -> key selection loop
//!        |                                |               |
//!        v                                v               v
//!   middleware                  openai translation   pool (rotate,
//!   (auth, paths)               or pass-through      quarantine, count)
//! ```
//!
//! On upstream 429 the (key, model) pair is quarantined for the day and
//! the loop moves to the next key. Timeouts and transport failures are
//! terminal for the request. Every other upstream status is counted
//! against the key, sanitized, translated back when the client spoke the
//! OpenAI dialect, and relayed.

pub mod client;
pub mod context;
pub mod error;
pub mod middleware;
pub mod openai;
pub mod sanitize;

use std::time::Instant;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};

use crate::keys;
use crate::logger;
use crate::server::AppState;

pub use context::{Dialect, RelayBody, RelayPlan};
pub use error::{RelayError, RelayResult};

/// Fallback handler: any path, any method.
pub async fn relay(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    match pipeline(&state, &method, &uri, &headers, body).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

async fn pipeline(
    state: &AppState,
    method: &Method,
    uri: &Uri,
    headers: &HeaderMap,
    body: Bytes,
) -> RelayResult<Response> {
    let started = Instant::now();
    let path = uri.path().to_string();

    // Rollover clock: day changes are detected on request entry.
    state.pool.ensure_today().await;

    if state.pool.key_count() == 0 {
        return Err(RelayError::ServiceUnavailable(
            "API keys not loaded.".to_string(),
        ));
    }

    let dialect = middleware::detect_dialect(&path);
    logger::info(
        "relay",
        &format!(
            "Request received for path: {}. Dialect: {}",
            path,
            dialect.as_str()
        ),
    );

    if dialect == Dialect::OpenAi && method != &Method::POST {
        return Err(RelayError::MethodNotAllowed(
            "OpenAI compatible endpoint only supports POST.".to_string(),
        ));
    }

    middleware::validate_token(headers, dialect, &state.settings.placeholder_token)?;

    let plan = match dialect {
        Dialect::OpenAi => openai::plan_chat_request(&path, &body)?,
        Dialect::Gemini => middleware::plan_gemini_request(&path, body)?,
    };

    if state.pool.all_exhausted_for(&plan.model).await {
        logger::warn(
            "relay",
            &format!(
                "All API keys are marked as exhausted for model '{}' today. Rejecting request.",
                plan.model
            ),
        );
        return Err(RelayError::PoolExhausted(pool_exhausted_message(&plan.model)));
    }

    let upstream_url = format!(
        "{}/{}",
        state.settings.upstream_base_url.trim_end_matches('/'),
        plan.upstream_path
    );

    let max_attempts = state.pool.key_count();
    for _ in 0..max_attempts {
        let Some(key) = state.pool.next_key(&plan.model).await else {
            break;
        };
        let key_suffix = keys::suffix(&key).to_string();

        logger::info(
            "relay",
            &format!(
                "Attempting request for model '{}' with key ...{} -> {}",
                plan.model, key_suffix, upstream_url
            ),
        );

        let outgoing = client::build_upstream_headers(headers, plan.dialect, &key);
        let response = client::forward(
            &state.client,
            method,
            &upstream_url,
            uri.query(),
            outgoing,
            &plan,
        )
        .await?;

        let status = response.status().as_u16();
        logger::info(
            "relay",
            &format!(
                "Received response status {} from {} using key ...{}",
                status, upstream_url, key_suffix
            ),
        );

        if status == 429 {
            logger::warn(
                "relay",
                &format!(
                    "Key ...{} hit rate limit (429) for model '{}'. Quarantining for today.",
                    key_suffix, plan.model
                ),
            );
            let pool_gone = state.pool.mark_exhausted(&key, &plan.model).await;
            if pool_gone {
                logger::warn(
                    "relay",
                    &format!(
                        "All API keys are now exhausted for model '{}'. Last key tried: ...{}",
                        plan.model, key_suffix
                    ),
                );
                return Err(RelayError::PoolExhausted(pool_exhausted_message(&plan.model)));
            }
            continue;
        }

        let upstream_headers = response.headers().clone();
        let raw_body = response.bytes().await.map_err(client::map_transport_error)?;

        let preview: String = String::from_utf8_lossy(&raw_body).chars().take(500).collect();
        logger::debug(
            "relay",
            &format!(
                "Upstream response body ({} bytes, first 500 chars): {}",
                raw_body.len(),
                preview
            ),
        );

        // Every non-429 forward consumed the key's quota, success or not.
        let (model_count, total_count) = state.pool.record_success(&key, &plan.model).await;
        logger::info(
            "relay",
            &format!(
                "Key ...{} used for model '{}'. Today's model usage: {}. Total usage for key: {}. Latency: {}ms",
                key_suffix,
                plan.model,
                model_count,
                total_count,
                started.elapsed().as_millis()
            ),
        );

        let cleaned = sanitize::strip_trailing_error(status, raw_body);
        return Ok(respond(&plan, status, &upstream_headers, cleaned));
    }

    logger::error(
        "relay",
        "Failed to forward request after trying all available API keys.",
    );
    Err(RelayError::ServiceUnavailable(
        "Failed to find a usable API key.".to_string(),
    ))
}

fn pool_exhausted_message(model: &str) -> String {
    format!(
        "All available API keys have reached their daily limit for model '{}'.",
        model
    )
}

/// Shape the upstream result for the client: translate successful OpenAI
/// dialect responses (streaming or not), relay everything else as-is with
/// hop-by-hop headers removed.
fn respond(
    plan: &RelayPlan,
    status: u16,
    upstream_headers: &reqwest::header::HeaderMap,
    body: Bytes,
) -> Response {
    if plan.dialect == Dialect::OpenAi && status == 200 {
        if plan.is_streaming() {
            return stream_response(plan, upstream_headers, body);
        }
        match openai::convert_chat_response(&body, &plan.model) {
            Ok(converted) => {
                let mut headers =
                    client::filter_response_headers(upstream_headers, &["content-type"]);
                headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
                return build_response(StatusCode::OK, headers, Body::from(converted.to_string()));
            }
            // Conversion failures fall back to the sanitized upstream body
            // with the upstream status.
            Err(e) => {
                logger::error(
                    "relay",
                    &format!(
                        "Error converting Gemini response to OpenAI format: {}. Returning upstream body.",
                        e
                    ),
                );
            }
        }
    }

    let headers = client::filter_response_headers(upstream_headers, &[]);
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
    build_response(status, headers, Body::from(body))
}

/// Replay the upstream's JSON-array stream as SSE chunk frames.
fn stream_response(
    plan: &RelayPlan,
    upstream_headers: &reqwest::header::HeaderMap,
    body: Bytes,
) -> Response {
    let decoded = String::from_utf8_lossy(&body).into_owned();
    let frames = openai::stream_frames(&decoded, &plan.model);
    let stream =
        futures_util::stream::iter(frames.into_iter().map(Ok::<Bytes, std::convert::Infallible>));

    let mut headers = client::filter_response_headers(upstream_headers, &["content-type"]);
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));

    build_response(StatusCode::OK, headers, Body::from_stream(stream))
}

fn build_response(status: StatusCode, headers: axum::http::HeaderMap, body: Body) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}
