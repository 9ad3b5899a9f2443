//! Playback controller: owns the single audio port and drives the
//! `Idle → Loading → Playing ⇄ Paused` state machine, with `Error` reachable
//! from any state on a media failure.
//!
//! One constructed instance per process, wired in `main` — no global
//! singleton.  All operations run on the daemon event loop, so loads and
//! channel switches are naturally serialized; cross-binding races are
//! handled by the poller's generation counter.
//!
//! Playback failures are deliberately not auto-retried (unlike metadata
//! fetches): the user re-invokes play() to recover.

use crate::poller::{MetadataSource, NowPlayingPoller};
use crate::port::{AudioPort, PortEvent};
use airtune_core::channel::ChannelRegistry;
use airtune_core::error::PlayerError;
use airtune_core::protocol::{Command, Event};
use airtune_core::state::{PlaybackStatus, StateStore};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{info, warn};

pub struct PlaybackController<P: AudioPort, S: MetadataSource> {
    port: P,
    store: Arc<StateStore>,
    registry: Arc<RwLock<ChannelRegistry>>,
    poller: NowPlayingPoller<S>,
    events: broadcast::Sender<Event>,
}

impl<P: AudioPort, S: MetadataSource> PlaybackController<P, S> {
    pub fn new(
        port: P,
        store: Arc<StateStore>,
        registry: Arc<RwLock<ChannelRegistry>>,
        poller: NowPlayingPoller<S>,
        events: broadcast::Sender<Event>,
    ) -> Self {
        Self {
            port,
            store,
            registry,
            poller,
            events,
        }
    }

    /// Re-bind the restored channel at startup.  Never auto-starts playback.
    /// A persisted channel that no longer resolves in the catalog is
    /// dropped.
    pub async fn restore(&mut self) {
        let Some(restored) = self.store.snapshot().await.current_channel else {
            return;
        };

        let channel = {
            let registry = self.registry.read().await;
            registry.get(&restored.slug).cloned()
        };

        match channel {
            Some(channel) => {
                info!("controller: restoring channel {}", channel.slug);
                // Refresh the persisted descriptor against the live catalog.
                self.store.set_channel(Some(channel.clone())).await;
                if let Err(e) = self.port.load(&channel.stream_url).await {
                    warn!("controller: restore bind failed: {}", e);
                }
                self.poller.bind(&channel);
            }
            None => {
                warn!("controller: persisted channel {} not in catalog, clearing", restored.slug);
                self.store.set_channel(None).await;
            }
        }
        self.publish_state().await;
    }

    /// Switch to another channel.  Tears down the previous poller binding
    /// and media resource, binds the new stream, resumes playback
    /// best-effort if it was active, and starts a fresh poller binding.
    pub async fn change_channel(&mut self, slug: &str) -> Result<(), PlayerError> {
        let channel = {
            let registry = self.registry.read().await;
            match registry.get(slug) {
                Some(c) if c.is_active => c.clone(),
                _ => return Err(PlayerError::UnknownChannel(slug.to_string())),
            }
        };

        // Invalidate the old binding before any new work: pending poll
        // timers are cancelled and in-flight fetches marked stale.
        self.poller.unbind();

        let previous = self.store.snapshot().await;
        let was_playing = matches!(
            previous.status,
            PlaybackStatus::Playing | PlaybackStatus::Loading
        );

        // Clears now-playing and persists the selection.
        self.store.set_channel(Some(channel.clone())).await;
        self.store.set_status(PlaybackStatus::Idle).await;

        match self.port.load(&channel.stream_url).await {
            Ok(()) => {
                if was_playing {
                    self.store.set_status(PlaybackStatus::Loading).await;
                    match self.port.play().await {
                        Ok(()) => self.store.set_status(PlaybackStatus::Playing).await,
                        Err(e) => {
                            // Best-effort resume: the failure lands in Error
                            // rather than in the caller.
                            warn!("controller: resume on {} failed: {}", channel.slug, e);
                            self.store.set_status(PlaybackStatus::Error).await;
                            let _ = self.events.send(Event::PlaybackError {
                                message: e.to_string(),
                            });
                        }
                    }
                }
            }
            Err(e) => {
                warn!("controller: failed to bind {}: {}", channel.stream_url, e);
                self.store.set_status(PlaybackStatus::Error).await;
                let _ = self.events.send(Event::PlaybackError {
                    message: e.to_string(),
                });
            }
        }

        self.poller.bind(&channel);
        self.publish_state().await;
        Ok(())
    }

    /// Start playback of the current channel.  No-op while already playing
    /// or loading (re-entrancy guard); requires a selected channel.
    pub async fn play(&mut self) -> Result<(), PlayerError> {
        let snapshot = self.store.snapshot().await;
        if matches!(
            snapshot.status,
            PlaybackStatus::Playing | PlaybackStatus::Loading
        ) {
            return Ok(());
        }
        let Some(channel) = snapshot.current_channel.clone() else {
            return Err(PlayerError::NoChannel);
        };

        self.store.set_status(PlaybackStatus::Loading).await;
        self.publish_state().await;

        // Coming out of Error the resource may be dead — rebind first.
        if snapshot.status == PlaybackStatus::Error {
            if let Err(e) = self.port.load(&channel.stream_url).await {
                warn!("controller: reload of {} failed: {}", channel.slug, e);
                self.store.set_status(PlaybackStatus::Error).await;
                let _ = self.events.send(Event::PlaybackError {
                    message: e.to_string(),
                });
                self.publish_state().await;
                return Ok(());
            }
        }

        match self.port.play().await {
            Ok(()) => {
                self.store.set_status(PlaybackStatus::Playing).await;
            }
            Err(e) => {
                warn!("controller: play on {} failed: {}", channel.slug, e);
                self.store.set_status(PlaybackStatus::Error).await;
                let _ = self.events.send(Event::PlaybackError {
                    message: e.to_string(),
                });
            }
        }
        self.publish_state().await;
        Ok(())
    }

    /// Pause playback.  No-op unless playing; always succeeds from the
    /// caller's view.  The poller binding survives — fetching is gated by
    /// policy and resumes on the next play().
    pub async fn pause(&mut self) -> Result<(), PlayerError> {
        if self.store.snapshot().await.status != PlaybackStatus::Playing {
            return Ok(());
        }
        if let Err(e) = self.port.pause().await {
            warn!("controller: pause: {}", e);
        }
        self.store.set_status(PlaybackStatus::Paused).await;
        self.publish_state().await;
        Ok(())
    }

    /// Clamp to 0..=100, apply the mute coupling, push the effective level
    /// to the port.
    pub async fn set_volume(&mut self, value: i64) -> Result<(), PlayerError> {
        let effective = self.store.set_volume(value).await;
        if let Err(e) = self.port.set_volume(effective).await {
            warn!("controller: set_volume: {}", e);
        }
        self.publish_state().await;
        Ok(())
    }

    /// Flip mute without touching the stored volume level.
    pub async fn toggle_mute(&mut self) -> Result<(), PlayerError> {
        let effective = self.store.toggle_mute().await;
        if let Err(e) = self.port.set_volume(effective).await {
            warn!("controller: toggle_mute: {}", e);
        }
        self.publish_state().await;
        Ok(())
    }

    /// Asynchronous notifications from the bound media resource.
    pub async fn on_port_event(&mut self, event: PortEvent) {
        let snapshot = self.store.snapshot().await;
        match event {
            PortEvent::CanPlay => {
                if snapshot.status == PlaybackStatus::Loading {
                    self.store.set_status(PlaybackStatus::Playing).await;
                    self.publish_state().await;
                }
            }
            PortEvent::Ended => {
                // A live stream ending means the upstream connection dropped.
                if matches!(
                    snapshot.status,
                    PlaybackStatus::Playing | PlaybackStatus::Loading
                ) {
                    self.store.set_status(PlaybackStatus::Error).await;
                    let _ = self.events.send(Event::PlaybackError {
                        message: "stream ended unexpectedly".to_string(),
                    });
                    self.publish_state().await;
                }
            }
            PortEvent::Error(message) => {
                if snapshot.current_channel.is_some() {
                    warn!("controller: media error: {}", message);
                    self.store.set_status(PlaybackStatus::Error).await;
                    let _ = self.events.send(Event::PlaybackError { message });
                    self.publish_state().await;
                }
            }
        }
    }

    /// Teardown: cancel the poller binding and release the media resource.
    /// The persisted channel selection is kept for the next start.
    pub async fn shutdown(&mut self) {
        self.poller.unbind();
        if let Err(e) = self.port.unload().await {
            warn!("controller: unload: {}", e);
        }
        self.store.set_status(PlaybackStatus::Idle).await;
    }

    pub async fn handle_command(&mut self, command: Command) {
        let result = match command {
            Command::Play => self.play().await,
            Command::Pause => self.pause().await,
            Command::SelectChannel { slug } => self.change_channel(&slug).await,
            Command::Volume { value } => self.set_volume(value).await,
            Command::ToggleMute => self.toggle_mute().await,
            // Routed by the daemon event loop, not the controller.
            Command::DismissNotice | Command::ReloadChannels => Ok(()),
        };
        if let Err(e) = result {
            warn!("controller: command failed: {}", e);
            let _ = self.events.send(Event::PlaybackError {
                message: e.to_string(),
            });
        }
    }

    async fn publish_state(&self) {
        let _ = self.events.send(Event::State {
            data: self.store.snapshot().await,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use airtune_core::channel::Channel;
    use airtune_core::config::PollPolicy;
    use airtune_core::error::MetadataError;
    use airtune_core::nowplaying::StationStatus;
    use crate::poller::PollerSettings;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    #[derive(Debug, Default)]
    struct MockState {
        current: Option<String>,
        loads: Vec<String>,
        playing: bool,
        volume: u8,
        fail_load: bool,
        fail_play: bool,
    }

    /// Recording port; the test keeps a clone to inspect and inject faults.
    #[derive(Clone, Default)]
    struct MockPort(Arc<StdMutex<MockState>>);

    impl MockPort {
        fn state(&self) -> MockState {
            let s = self.0.lock().unwrap();
            MockState {
                current: s.current.clone(),
                loads: s.loads.clone(),
                playing: s.playing,
                volume: s.volume,
                fail_load: s.fail_load,
                fail_play: s.fail_play,
            }
        }

        fn set_fail_play(&self, fail: bool) {
            self.0.lock().unwrap().fail_play = fail;
        }
    }

    impl AudioPort for MockPort {
        async fn load(&mut self, url: &str) -> anyhow::Result<()> {
            let mut s = self.0.lock().unwrap();
            if s.fail_load {
                anyhow::bail!("load refused");
            }
            s.loads.push(url.to_string());
            s.current = Some(url.to_string());
            s.playing = false;
            Ok(())
        }

        async fn play(&mut self) -> anyhow::Result<()> {
            let mut s = self.0.lock().unwrap();
            if s.fail_play {
                anyhow::bail!("autoplay rejected");
            }
            s.playing = true;
            Ok(())
        }

        async fn pause(&mut self) -> anyhow::Result<()> {
            self.0.lock().unwrap().playing = false;
            Ok(())
        }

        async fn set_volume(&mut self, volume: u8) -> anyhow::Result<()> {
            self.0.lock().unwrap().volume = volume;
            Ok(())
        }

        async fn unload(&mut self) -> anyhow::Result<()> {
            let mut s = self.0.lock().unwrap();
            s.current = None;
            s.playing = false;
            Ok(())
        }
    }

    /// Inert source: controller tests use channels without metadata
    /// endpoints, so this is never reached.
    struct NullSource;

    impl MetadataSource for NullSource {
        async fn fetch(&self, _url: &str) -> Result<StationStatus, MetadataError> {
            Err(MetadataError::Status(404))
        }
    }

    fn channel(slug: &str, order: u32, active: bool) -> Channel {
        Channel {
            slug: slug.to_string(),
            name: slug.to_string(),
            stream_url: format!("https://streams.example.org/{}", slug),
            metadata_url: None,
            color: "#888888".to_string(),
            order,
            is_active: active,
        }
    }

    struct Fixture {
        controller: PlaybackController<MockPort, NullSource>,
        port: MockPort,
        store: Arc<StateStore>,
        _dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        fixture_with_state_file(None)
    }

    fn fixture_with_state_file(persisted: Option<&str>) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        if let Some(content) = persisted {
            std::fs::write(&path, content).unwrap();
        }
        let store = Arc::new(StateStore::new(path));
        let registry = Arc::new(RwLock::new(ChannelRegistry::new(vec![
            channel("jazz", 1, true),
            channel("metal", 2, true),
            channel("retired", 3, false),
        ])));
        let (events, _) = broadcast::channel(64);
        let settings = PollerSettings {
            interval: Duration::from_secs(15),
            retry_delay: Duration::from_secs(30),
            backoff_delay: Duration::from_secs(60),
            max_retries: 5,
            policy: PollPolicy::WhilePlaying,
        };
        let poller = NowPlayingPoller::new(
            Arc::new(NullSource),
            settings,
            Arc::clone(&store),
            events.clone(),
        );
        let port = MockPort::default();
        let controller = PlaybackController::new(
            port.clone(),
            Arc::clone(&store),
            registry,
            poller,
            events,
        );
        Fixture {
            controller,
            port,
            store,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn test_set_volume_mute_coupling_through_controller() {
        let mut fx = fixture();
        for v in [0i64, 1, 40, 100, 250, -3] {
            fx.controller.set_volume(v).await.unwrap();
            let state = fx.store.snapshot().await;
            let clamped = v.clamp(0, 100) as u8;
            assert_eq!(state.volume, clamped);
            assert_eq!(state.is_muted, clamped == 0);
            assert_eq!(fx.port.state().volume, state.effective_volume());
        }
    }

    #[tokio::test]
    async fn test_toggle_mute_applies_zero_then_restores() {
        let mut fx = fixture();
        fx.controller.set_volume(40).await.unwrap();
        fx.controller.toggle_mute().await.unwrap();
        assert_eq!(fx.port.state().volume, 0);
        assert_eq!(fx.store.snapshot().await.volume, 40);
        fx.controller.toggle_mute().await.unwrap();
        assert_eq!(fx.port.state().volume, 40);
    }

    #[tokio::test]
    async fn test_play_requires_channel() {
        let mut fx = fixture();
        match fx.controller.play().await {
            Err(PlayerError::NoChannel) => {}
            other => panic!("expected NoChannel, got {:?}", other.err()),
        }
        assert_eq!(fx.store.snapshot().await.status, PlaybackStatus::Idle);
    }

    #[tokio::test]
    async fn test_select_then_play() {
        let mut fx = fixture();
        fx.controller.change_channel("jazz").await.unwrap();
        let state = fx.store.snapshot().await;
        assert_eq!(state.status, PlaybackStatus::Idle);
        assert!(!fx.port.state().playing);

        fx.controller.play().await.unwrap();
        assert_eq!(fx.store.snapshot().await.status, PlaybackStatus::Playing);
        assert!(fx.port.state().playing);
    }

    #[tokio::test]
    async fn test_unknown_or_inactive_channel_rejected() {
        let mut fx = fixture();
        assert!(matches!(
            fx.controller.change_channel("nope").await,
            Err(PlayerError::UnknownChannel(_))
        ));
        assert!(matches!(
            fx.controller.change_channel("retired").await,
            Err(PlayerError::UnknownChannel(_))
        ));
    }

    #[tokio::test]
    async fn test_switch_while_playing_resumes_on_new_channel() {
        let mut fx = fixture();
        fx.controller.change_channel("jazz").await.unwrap();
        fx.controller.play().await.unwrap();

        fx.controller.change_channel("metal").await.unwrap();
        let port = fx.port.state();
        // Exactly one bound resource — the new channel's.
        assert_eq!(port.current.as_deref(), Some("https://streams.example.org/metal"));
        assert_eq!(port.loads.len(), 2);
        assert!(port.playing);
        assert_eq!(fx.store.snapshot().await.status, PlaybackStatus::Playing);
    }

    #[tokio::test]
    async fn test_switch_while_idle_does_not_resume() {
        let mut fx = fixture();
        fx.controller.change_channel("jazz").await.unwrap();
        fx.controller.change_channel("metal").await.unwrap();
        assert!(!fx.port.state().playing);
        assert_eq!(fx.store.snapshot().await.status, PlaybackStatus::Idle);
    }

    #[tokio::test]
    async fn test_play_failure_then_retry_succeeds() {
        let mut fx = fixture();
        fx.controller.change_channel("metal").await.unwrap();

        fx.port.set_fail_play(true);
        fx.controller.play().await.unwrap();
        let state = fx.store.snapshot().await;
        assert_eq!(state.status, PlaybackStatus::Error);
        assert!(!state.is_playing());

        // User retries after the transient failure clears.
        fx.port.set_fail_play(false);
        fx.controller.play().await.unwrap();
        let state = fx.store.snapshot().await;
        assert_eq!(state.status, PlaybackStatus::Playing);
        assert!(fx.port.state().playing);
        // The retry re-bound the resource before resuming.
        assert!(fx.port.state().loads.len() >= 2);
    }

    #[tokio::test]
    async fn test_pause_is_noop_unless_playing() {
        let mut fx = fixture();
        fx.controller.change_channel("jazz").await.unwrap();
        fx.controller.pause().await.unwrap();
        assert_eq!(fx.store.snapshot().await.status, PlaybackStatus::Idle);

        fx.controller.play().await.unwrap();
        fx.controller.pause().await.unwrap();
        assert_eq!(fx.store.snapshot().await.status, PlaybackStatus::Paused);
        assert!(!fx.port.state().playing);
    }

    #[tokio::test]
    async fn test_media_error_event_moves_to_error() {
        let mut fx = fixture();
        fx.controller.change_channel("jazz").await.unwrap();
        fx.controller.play().await.unwrap();

        fx.controller
            .on_port_event(PortEvent::Error("network interrupted".into()))
            .await;
        let state = fx.store.snapshot().await;
        assert_eq!(state.status, PlaybackStatus::Error);
        assert!(!state.is_playing());

        // Error clears on the next channel change.
        fx.controller.change_channel("metal").await.unwrap();
        assert_eq!(fx.store.snapshot().await.status, PlaybackStatus::Idle);
    }

    #[tokio::test]
    async fn test_restore_rebinds_without_autoplay() {
        let persisted = serde_json::json!({
            "volume": 40,
            "muted": true,
            "last_channel": {
                "slug": "jazz",
                "name": "jazz",
                "stream_url": "https://streams.example.org/jazz",
                "metadata_url": null,
                "color": "#888888",
                "order": 1,
                "is_active": true
            }
        })
        .to_string();
        let mut fx = fixture_with_state_file(Some(&persisted));

        fx.controller.restore().await;
        let state = fx.store.snapshot().await;
        assert_eq!(state.volume, 40);
        assert!(state.is_muted);
        assert_eq!(state.current_channel.as_ref().map(|c| c.slug.as_str()), Some("jazz"));
        assert_eq!(state.status, PlaybackStatus::Idle);
        // The stream is bound but never auto-started.
        assert_eq!(
            fx.port.state().current.as_deref(),
            Some("https://streams.example.org/jazz")
        );
        assert!(!fx.port.state().playing);
    }

    #[tokio::test]
    async fn test_shutdown_releases_resource_and_keeps_selection() {
        let mut fx = fixture();
        fx.controller.change_channel("jazz").await.unwrap();
        fx.controller.play().await.unwrap();

        fx.controller.shutdown().await;
        let port = fx.port.state();
        assert!(port.current.is_none());
        assert!(!port.playing);
        let state = fx.store.snapshot().await;
        assert_eq!(state.status, PlaybackStatus::Idle);
        // The selection survives for the next start.
        assert_eq!(state.current_channel.as_ref().map(|c| c.slug.as_str()), Some("jazz"));
    }

    #[tokio::test]
    async fn test_restore_clears_channel_missing_from_catalog() {
        let persisted = serde_json::json!({
            "volume": 50,
            "muted": false,
            "last_channel": {
                "slug": "gone",
                "name": "gone",
                "stream_url": "https://streams.example.org/gone",
                "metadata_url": null,
                "color": "#888888",
                "order": 7,
                "is_active": true
            }
        })
        .to_string();
        let mut fx = fixture_with_state_file(Some(&persisted));

        fx.controller.restore().await;
        let state = fx.store.snapshot().await;
        assert!(state.current_channel.is_none());
        assert!(fx.port.state().current.is_none());
    }
}
