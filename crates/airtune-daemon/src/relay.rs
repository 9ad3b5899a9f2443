//! Same-origin relay for channel metadata and artwork.
//!
//! Browser clients cannot hit the upstream broadcast API directly (CORS),
//! so they go through here.  Responses are never cached, and upstream
//! failures are flattened into a successful 200 carrying a degraded payload
//! with `error: true` — the client UI degrades instead of crashing.

use airtune_core::channel::ChannelRegistry;
use airtune_core::nowplaying::StationStatus;
use airtune_core::state::StateStore;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use futures_util::StreamExt;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::io::ReaderStream;
use tracing::warn;

#[derive(Clone)]
pub struct RelayState {
    pub store: Arc<StateStore>,
    pub registry: Arc<RwLock<ChannelRegistry>>,
    pub client: Client,
}

impl RelayState {
    pub fn new(store: Arc<StateStore>, registry: Arc<RwLock<ChannelRegistry>>) -> Self {
        let client = Client::builder()
            .redirect(reqwest::redirect::Policy::limited(10))
            .timeout(Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client for relay");

        Self {
            store,
            registry,
            client,
        }
    }
}

pub fn router(state: RelayState) -> Router {
    Router::new()
        .route("/relay/nowplaying/:slug", get(relay_nowplaying))
        .route("/relay/art/:slug", get(relay_art))
        .with_state(state)
}

async fn relay_nowplaying(
    Path(slug): Path<String>,
    State(state): State<RelayState>,
) -> Response {
    let channel = {
        let registry = state.registry.read().await;
        registry.get(&slug).cloned()
    };
    let Some(channel) = channel else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let Some(url) = channel.metadata_url.as_deref() else {
        // No endpoint configured: still serve something renderable.
        return no_store_json(StationStatus::degraded(&channel.name));
    };

    let payload = match state.client.get(url).send().await {
        Ok(resp) if resp.status().is_success() => match resp.json::<StationStatus>().await {
            Ok(status) => status,
            Err(e) => {
                warn!("relay: bad payload from {}: {}", url, e);
                StationStatus::degraded(&channel.name)
            }
        },
        Ok(resp) => {
            // Non-200 upstream passes through as a 200 with error set.
            warn!("relay: upstream {} for {}", resp.status(), slug);
            StationStatus::degraded(&channel.name)
        }
        Err(e) => {
            warn!("relay: upstream fetch failed for {}: {}", slug, e);
            StationStatus::degraded(&channel.name)
        }
    };

    no_store_json(payload)
}

fn no_store_json(payload: StationStatus) -> Response {
    let mut response = Json(payload).into_response();
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

/// Stream the current track's artwork through for the bound channel.
/// Forwards the upstream content type and the body byte-for-byte.
async fn relay_art(Path(slug): Path<String>, State(state): State<RelayState>) -> Response {
    let snapshot = state.store.snapshot().await;
    let is_current = snapshot
        .current_channel
        .as_ref()
        .map(|c| c.slug == slug)
        .unwrap_or(false);
    if !is_current {
        return StatusCode::NOT_FOUND.into_response();
    }
    let Some(art_url) = snapshot.now_playing.and_then(|info| info.art) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let upstream = match state.client.get(&art_url).send().await {
        Ok(r) if r.status().is_success() => r,
        Ok(r) => {
            warn!("relay: artwork upstream returned {} for {}", r.status(), slug);
            return StatusCode::BAD_GATEWAY.into_response();
        }
        Err(e) => {
            warn!("relay: artwork fetch failed for {}: {}", slug, e);
            return StatusCode::BAD_GATEWAY.into_response();
        }
    };

    let mut builder = Response::builder()
        .status(200)
        .header(header::CACHE_CONTROL, "no-store");
    if let Some(content_type) = upstream.headers().get(reqwest::header::CONTENT_TYPE) {
        if let Ok(hv) = HeaderValue::from_bytes(content_type.as_bytes()) {
            builder = builder.header(header::CONTENT_TYPE, hv);
        }
    }

    let byte_stream = upstream.bytes_stream();
    let reader = tokio_util::io::StreamReader::new(
        byte_stream
            .map(|result| result.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))),
    );
    let body = Body::from_stream(ReaderStream::new(reader));

    builder.body(body).unwrap_or_else(|_| StatusCode::BAD_GATEWAY.into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_store_json_headers() {
        let response = no_store_json(StationStatus::degraded("Jazz"));
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CACHE_CONTROL).unwrap(),
            "no-store"
        );
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
    }
}
