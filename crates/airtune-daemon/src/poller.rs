//! Now-playing poller.
//!
//! One binding per selected channel: an immediate fetch, then a recurring
//! fetch every `poll_interval` while the gating policy holds.  Fetch
//! failures back off (30 s, widening to 60 s after five consecutive
//! failures) but never permanently give up while the channel stays
//! selected.
//!
//! Every binding carries a generation id.  `unbind` bumps the shared
//! generation counter *before* cancelling the timer, so an in-flight fetch
//! that completes afterwards sees a stale generation and is discarded
//! instead of mutating state for a channel that is no longer current.

use airtune_core::channel::Channel;
use airtune_core::config::{PlayerConfig, PollPolicy};
use airtune_core::error::MetadataError;
use airtune_core::nowplaying::{NowPlayingInfo, StationStatus, TrackKey};
use airtune_core::protocol::Event;
use airtune_core::state::StateStore;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Notify};
use tracing::{debug, info, warn};

/// Fetches the metadata endpoint for a channel.  Abstracted so the poller's
/// scheduling and change-detection logic is testable without a network.
pub trait MetadataSource: Send + Sync + 'static {
    fn fetch(
        &self,
        url: &str,
    ) -> impl std::future::Future<Output = Result<StationStatus, MetadataError>> + Send;
}

/// Production source: plain GET against the channel's metadata URL.
pub struct HttpMetadataSource {
    client: reqwest::Client,
}

impl HttpMetadataSource {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client for metadata");
        Self { client }
    }
}

impl Default for HttpMetadataSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MetadataSource for HttpMetadataSource {
    async fn fetch(&self, url: &str) -> Result<StationStatus, MetadataError> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| MetadataError::transport(url, e))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(MetadataError::Status(status.as_u16()));
        }
        let text = resp
            .text()
            .await
            .map_err(|e| MetadataError::transport(url, e))?;
        let parsed = serde_json::from_str::<StationStatus>(&text)?;
        Ok(parsed)
    }
}

/// Scheduling knobs, lifted out of [`PlayerConfig`].
#[derive(Debug, Clone, Copy)]
pub struct PollerSettings {
    pub interval: Duration,
    pub retry_delay: Duration,
    pub backoff_delay: Duration,
    pub max_retries: u32,
    pub policy: PollPolicy,
}

impl PollerSettings {
    pub fn from_config(cfg: &PlayerConfig) -> Self {
        Self {
            interval: Duration::from_secs(cfg.poll_interval_secs),
            retry_delay: Duration::from_secs(cfg.retry_delay_secs),
            backoff_delay: Duration::from_secs(cfg.backoff_delay_secs),
            max_retries: cfg.max_retries,
            policy: cfg.poll_policy,
        }
    }

    /// Delay until the next fetch given the consecutive-failure count.
    pub fn next_delay(&self, consecutive_failures: u32) -> Duration {
        if consecutive_failures == 0 {
            self.interval
        } else if consecutive_failures < self.max_retries {
            self.retry_delay
        } else {
            self.backoff_delay
        }
    }
}

/// Cancellable handle for one channel binding: the generation id plus the
/// timer-cancel signal.
pub struct PollBinding {
    pub generation: u64,
    cancel: Arc<Notify>,
}

impl PollBinding {
    fn cancel(&self) {
        self.cancel.notify_one();
    }
}

pub struct NowPlayingPoller<S: MetadataSource> {
    source: Arc<S>,
    settings: PollerSettings,
    store: Arc<StateStore>,
    events: broadcast::Sender<Event>,
    generation: Arc<AtomicU64>,
    current: Option<PollBinding>,
}

impl<S: MetadataSource> NowPlayingPoller<S> {
    pub fn new(
        source: Arc<S>,
        settings: PollerSettings,
        store: Arc<StateStore>,
        events: broadcast::Sender<Event>,
    ) -> Self {
        Self {
            source,
            settings,
            store,
            events,
            generation: Arc::new(AtomicU64::new(0)),
            current: None,
        }
    }

    /// Tear down any previous binding and start polling `channel`.  A
    /// channel without a metadata endpoint gets no binding at all.
    pub fn bind(&mut self, channel: &Channel) {
        self.unbind();

        let Some(url) = channel.metadata_url.clone() else {
            debug!("poller: {} has no metadata endpoint, polling disabled", channel.slug);
            return;
        };

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let cancel = Arc::new(Notify::new());
        info!("poller: binding gen={} channel={}", generation, channel.slug);

        tokio::spawn(run_binding(BindingCtx {
            source: Arc::clone(&self.source),
            settings: self.settings,
            store: Arc::clone(&self.store),
            events: self.events.clone(),
            shared_generation: Arc::clone(&self.generation),
            generation,
            cancel: Arc::clone(&cancel),
            url,
        }));

        self.current = Some(PollBinding { generation, cancel });
    }

    /// Cancel the pending timer and invalidate in-flight fetches.  The
    /// generation is bumped first so a fetch completing after this call is
    /// discarded on arrival.
    pub fn unbind(&mut self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(binding) = self.current.take() {
            debug!("poller: unbinding gen={}", binding.generation);
            binding.cancel();
        }
    }

    pub fn active_generation(&self) -> Option<u64> {
        self.current.as_ref().map(|b| b.generation)
    }
}

struct BindingCtx<S> {
    source: Arc<S>,
    settings: PollerSettings,
    store: Arc<StateStore>,
    events: broadcast::Sender<Event>,
    shared_generation: Arc<AtomicU64>,
    generation: u64,
    cancel: Arc<Notify>,
    url: String,
}

impl<S> BindingCtx<S> {
    fn is_stale(&self) -> bool {
        self.shared_generation.load(Ordering::SeqCst) != self.generation
    }
}

async fn run_binding<S: MetadataSource>(ctx: BindingCtx<S>) {
    let mut consecutive_failures: u32 = 0;
    let mut last_track: Option<TrackKey> = None;

    loop {
        if ctx.is_stale() {
            break;
        }

        let gate_open = match ctx.settings.policy {
            PollPolicy::Always => true,
            PollPolicy::WhilePlaying => ctx.store.snapshot().await.is_playing(),
        };

        if gate_open {
            match ctx.source.fetch(&ctx.url).await {
                Ok(status) => {
                    if ctx.is_stale() {
                        break;
                    }
                    consecutive_failures = 0;
                    apply_status(&ctx, &status, &mut last_track).await;
                }
                Err(e) if e.is_no_change() => {
                    if ctx.is_stale() {
                        break;
                    }
                    // Endpoint reachable but payload unusable: keep the
                    // previous now-playing value.
                    consecutive_failures = 0;
                    debug!("poller: gen={} no change: {}", ctx.generation, e);
                }
                Err(e) => {
                    if ctx.is_stale() {
                        break;
                    }
                    consecutive_failures += 1;
                    warn!(
                        "poller: gen={} fetch failed ({} consecutive): {}",
                        ctx.generation, consecutive_failures, e
                    );
                    let _ = ctx.events.send(Event::MetadataError {
                        message: e.to_string(),
                    });
                    if consecutive_failures == ctx.settings.max_retries {
                        warn!(
                            "poller: gen={} widening retry interval to {:?}",
                            ctx.generation, ctx.settings.backoff_delay
                        );
                    }
                }
            }
        }

        let delay = ctx.settings.next_delay(consecutive_failures);
        tokio::select! {
            _ = ctx.cancel.notified() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    debug!("poller: gen={} stopped", ctx.generation);
}

async fn apply_status<S>(
    ctx: &BindingCtx<S>,
    status: &StationStatus,
    last_track: &mut Option<TrackKey>,
) {
    let Some(info) = NowPlayingInfo::from_status(status) else {
        debug!("poller: gen={} payload has no song, keeping previous", ctx.generation);
        return;
    };

    let key = info.track_key();
    if last_track.as_ref() != Some(&key) {
        *last_track = Some(key);
        ctx.store.set_now_playing(Some(info.clone())).await;
        let _ = ctx.events.send(Event::TrackChanged { info });
    } else {
        // Same track: refresh listeners/elapsed without the change event.
        ctx.store.set_now_playing(Some(info.clone())).await;
        let _ = ctx.events.send(Event::NowPlaying { info });
    }
}
