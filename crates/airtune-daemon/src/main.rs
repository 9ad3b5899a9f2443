mod api;
mod controller;
mod mpv;
mod notify;
mod poller;
mod port;
mod relay;

use airtune_core::channel::{self, ChannelRegistry};
use airtune_core::config::Config;
use airtune_core::protocol::{Command, Event};
use airtune_core::state::StateStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::controller::PlaybackController;
use crate::mpv::MpvPort;
use crate::poller::{HttpMetadataSource, NowPlayingPoller, PollerSettings};
use crate::port::PortEvent;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // File logging
    let data_dir = airtune_core::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("airtuned.log");

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,airtune_daemon=debug")),
        )
        .init();

    info!("Log file: {:?}", log_path);

    let config = Config::load()?;
    info!("Config loaded from: {:?}", Config::config_path());

    // Channel catalog: local TOML first, remote fallback
    let channels = match channel::load_catalog(
        &config.channels.channels_toml,
        &config.channels.remote_url,
    )
    .await
    {
        Ok(channels) => channels,
        Err(e) => {
            warn!("Failed to load channel catalog: {}", e);
            Vec::new()
        }
    };
    if channels.is_empty() {
        warn!("Channel catalog is empty — nothing selectable until a reload");
    }
    let registry = Arc::new(RwLock::new(ChannelRegistry::new(channels)));

    // Restore persisted volume/mute/last-channel; playback stays stopped.
    let store = Arc::new(StateStore::new(config.daemon.state_file.clone()));

    let (events_tx, _) = broadcast::channel::<Event>(100);
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<Command>(64);
    let (port_tx, mut port_rx) = mpsc::channel::<PortEvent>(64);

    let initial_volume = store.snapshot().await.effective_volume();
    let port = MpvPort::new(port_tx, initial_volume);

    let poller = NowPlayingPoller::new(
        Arc::new(HttpMetadataSource::new()),
        PollerSettings::from_config(&config.player),
        Arc::clone(&store),
        events_tx.clone(),
    );

    let mut controller = PlaybackController::new(
        port,
        Arc::clone(&store),
        Arc::clone(&registry),
        poller,
        events_tx.clone(),
    );
    controller.restore().await;

    // Track-change notice bridge
    let (_notify_handle, dismiss_tx) = notify::spawn(
        events_tx.clone(),
        Duration::from_secs(config.player.notice_secs),
        config.player.notice_armed,
    );

    // HTTP control API + same-origin metadata relay
    if config.http.enabled {
        let api_state = api::ApiState {
            store: Arc::clone(&store),
            registry: Arc::clone(&registry),
            cmd_tx: cmd_tx.clone(),
            events: events_tx.clone(),
        };
        let relay_state = relay::RelayState::new(Arc::clone(&store), Arc::clone(&registry));
        let _http_handle = api::start_server(
            config.http.bind_address.clone(),
            config.http.port,
            api_state,
            relay::router(relay_state),
        );
    }

    info!("airtuned initialised, running event loop");

    loop {
        tokio::select! {
            Some(cmd) = cmd_rx.recv() => match cmd {
                Command::DismissNotice => {
                    let _ = dismiss_tx.send(()).await;
                }
                Command::ReloadChannels => {
                    match channel::load_catalog(
                        &config.channels.channels_toml,
                        &config.channels.remote_url,
                    )
                    .await
                    {
                        Ok(channels) => {
                            let count = channels.len();
                            registry.write().await.replace(channels);
                            info!("Catalog reloaded: {} channels", count);
                        }
                        Err(e) => warn!("Catalog reload failed: {}", e),
                    }
                }
                other => controller.handle_command(other).await,
            },
            Some(ev) = port_rx.recv() => controller.on_port_event(ev).await,
            else => break,
        }
    }

    controller.shutdown().await;
    Ok(())
}
