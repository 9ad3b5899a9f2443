//! HTTP control/state API plus the SSE event stream for UI consumers.
//!
//! Control endpoints funnel `Command`s into the daemon event loop; state
//! reads come straight from the shared store.

use airtune_core::channel::ChannelRegistry;
use airtune_core::protocol::{Command, Event};
use airtune_core::state::{PlaybackState, StateStore};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{self, KeepAlive, Sse};
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use futures_util::Stream;
use serde::Serialize;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, RwLock};
use tower_http::cors::CorsLayer;
use tracing::{error, info};

#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<StateStore>,
    pub registry: Arc<RwLock<ChannelRegistry>>,
    pub cmd_tx: mpsc::Sender<Command>,
    pub events: broadcast::Sender<Event>,
}

#[derive(Serialize)]
struct ChannelInfo {
    slug: String,
    name: String,
    color: String,
    order: u32,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/state", get(get_state))
        .route("/api/channels", get(get_channels))
        .route("/api/play", post(play))
        .route("/api/pause", post(pause))
        .route("/api/channel/:slug", post(select_channel))
        .route("/api/volume/:value", post(set_volume))
        .route("/api/mute", post(toggle_mute))
        .route("/api/notice/dismiss", post(dismiss_notice))
        .route("/api/reload", post(reload_channels))
        .route("/api/events", get(sse_events))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind and serve the combined API + relay router.
pub fn start_server(
    bind_address: String,
    port: u16,
    api_state: ApiState,
    relay_router: Router,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let app = router(api_state).merge(relay_router);
        let addr = format!("{}:{}", bind_address, port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind HTTP server to {}: {}", addr, e);
                return;
            }
        };

        info!("HTTP server listening on http://{}", addr);

        if let Err(e) = axum::serve(listener, app).await {
            error!("HTTP server error: {}", e);
        }
    })
}

async fn get_state(State(state): State<ApiState>) -> Json<PlaybackState> {
    Json(state.store.snapshot().await)
}

async fn get_channels(State(state): State<ApiState>) -> Json<Vec<ChannelInfo>> {
    let registry = state.registry.read().await;
    let channels = registry
        .selectable()
        .map(|c| ChannelInfo {
            slug: c.slug.clone(),
            name: c.name.clone(),
            color: c.color.clone(),
            order: c.order,
        })
        .collect();
    Json(channels)
}

async fn send_command(state: &ApiState, cmd: Command) -> StatusCode {
    if state.cmd_tx.send(cmd).await.is_err() {
        error!("Command channel closed");
        return StatusCode::INTERNAL_SERVER_ERROR;
    }
    StatusCode::OK
}

async fn play(State(state): State<ApiState>) -> StatusCode {
    info!("HTTP API: Play");
    send_command(&state, Command::Play).await
}

async fn pause(State(state): State<ApiState>) -> StatusCode {
    info!("HTTP API: Pause");
    send_command(&state, Command::Pause).await
}

async fn select_channel(
    State(state): State<ApiState>,
    Path(slug): Path<String>,
) -> StatusCode {
    info!("HTTP API: Select channel {}", slug);
    send_command(&state, Command::SelectChannel { slug }).await
}

async fn set_volume(State(state): State<ApiState>, Path(value): Path<i64>) -> StatusCode {
    info!("HTTP API: Set volume to {}", value);
    send_command(&state, Command::Volume { value }).await
}

async fn toggle_mute(State(state): State<ApiState>) -> StatusCode {
    info!("HTTP API: Toggle mute");
    send_command(&state, Command::ToggleMute).await
}

async fn dismiss_notice(State(state): State<ApiState>) -> StatusCode {
    send_command(&state, Command::DismissNotice).await
}

async fn reload_channels(State(state): State<ApiState>) -> StatusCode {
    info!("HTTP API: Reload channel catalog");
    send_command(&state, Command::ReloadChannels).await
}

/// Event stream for browser consumers: every published `Event`, serialized
/// as one JSON object per SSE message.
async fn sse_events(
    State(state): State<ApiState>,
) -> Sse<impl Stream<Item = Result<sse::Event, Infallible>>> {
    let rx = state.events.subscribe();
    let stream = futures_util::stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(ev) => match serde_json::to_string(&ev) {
                    Ok(json) => return Some((Ok(sse::Event::default().data(json)), rx)),
                    Err(_) => continue,
                },
                // A lagged consumer skips ahead; the next /api/state read
                // resynchronizes it.
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}
