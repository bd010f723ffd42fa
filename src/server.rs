//! HTTP listener and router.
//!
//! The router has no fixed routes: every path and method falls through to
//! the relay pipeline, so the whole upstream surface stays reachable as
//! pass-through.

use std::sync::Arc;

use axum::Router;
use tower_http::cors::CorsLayer;

use crate::config::Settings;
use crate::forward::{self, RelayResult};
use crate::logger;
use crate::pool::KeyPool;

/// Shared server state: settings, the key pool, and the upstream client.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub pool: Arc<KeyPool>,
    pub client: reqwest::Client,
}

impl AppState {
    pub fn new(settings: Settings, pool: KeyPool) -> RelayResult<Self> {
        let client = forward::client::create_client(settings.request_timeout_secs)?;
        Ok(Self {
            settings: Arc::new(settings),
            pool: Arc::new(pool),
            client,
        })
    }
}

/// Build the router: any path, any method, one pipeline.
pub fn app(state: AppState) -> Router {
    Router::new()
        .fallback(forward::relay)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind the configured address and serve until shutdown.
pub async fn serve(settings: Settings, pool: KeyPool) -> Result<(), String> {
    let addr = format!("{}:{}", settings.listen_host, settings.listen_port);
    let state = AppState::new(settings, pool).map_err(|e| e.to_string())?;

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| format!("failed to bind {}: {}", addr, e))?;

    logger::info("server", &format!("Relay listening on http://{}", addr));
    logger::info(
        "server",
        &format!(
            "Requests will be forwarded to: {}",
            state.settings.upstream_base_url
        ),
    );

    axum::serve(listener, app(state))
        .await
        .map_err(|e| format!("server error: {}", e))
}
