use crate::channel::Channel;
use crate::nowplaying::NowPlayingInfo;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::warn;

/// Playback state machine: `Idle → Loading → Playing ⇄ Paused`; any state
/// may move to `Error` on a media failure.  `Error → Idle` on the next
/// channel change; a retry `play()` goes back through `Loading`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum PlaybackStatus {
    #[default]
    Idle,
    Loading,
    Playing,
    Paused,
    Error,
}

/// Full published state.  `rev` is a monotonically increasing counter
/// incremented on every change so clients can detect missed updates.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PlaybackState {
    #[serde(default)]
    pub rev: u64,
    pub current_channel: Option<Channel>,
    pub status: PlaybackStatus,
    /// 0..=100.  `volume == 0` implies `is_muted`; raising above 0 unmutes.
    pub volume: u8,
    pub is_muted: bool,
    pub now_playing: Option<NowPlayingInfo>,
}

impl PlaybackState {
    pub fn is_playing(&self) -> bool {
        self.status == PlaybackStatus::Playing
    }

    /// Volume actually applied to the audio port: the stored level, or 0
    /// while muted (so un-muting restores the prior level).
    pub fn effective_volume(&self) -> u8 {
        if self.is_muted {
            0
        } else {
            self.volume
        }
    }
}

/// The slice of state that survives restarts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistentState {
    pub volume: u8,
    pub muted: bool,
    pub last_channel: Option<Channel>,
    /// When this snapshot was written.  Diagnostic only, never read back
    /// into live state.
    #[serde(default)]
    pub saved_at: Option<chrono::DateTime<chrono::Local>>,
}

impl Default for PersistentState {
    fn default() -> Self {
        Self {
            volume: 50,
            muted: false,
            last_channel: None,
            saved_at: None,
        }
    }
}

impl PersistentState {
    /// Lenient restore: corrupt entries are ignored per-field, never fatal.
    pub fn from_json_lenient(content: &str) -> Self {
        let mut restored = Self::default();
        let Ok(value) = serde_json::from_str::<serde_json::Value>(content) else {
            return restored;
        };

        if let Some(v) = value.get("volume").and_then(|v| v.as_u64()) {
            restored.volume = v.min(100) as u8;
        }
        if let Some(m) = value.get("muted").and_then(|v| v.as_bool()) {
            restored.muted = m;
        }
        if let Some(ch) = value.get("last_channel") {
            if let Ok(channel) = serde_json::from_value::<Channel>(ch.clone()) {
                restored.last_channel = Some(channel);
            }
        }

        // Keep the mute coupling invariant even across hand-edited files.
        if restored.volume == 0 {
            restored.muted = true;
        }
        restored
    }
}

/// Owns the shared `PlaybackState` plus its on-disk persistence.
///
/// All mutation goes through the setters here; each one bumps `rev` and
/// persists the durable slice fire-and-forget (a failed write is logged,
/// never propagated to the caller).
pub struct StateStore {
    state: Arc<RwLock<PlaybackState>>,
    state_file: PathBuf,
}

impl StateStore {
    /// Restore persisted state (or defaults) and build the startup
    /// `PlaybackState`.  Playback is never auto-started on restore.
    pub fn new(state_file: PathBuf) -> Self {
        let persistent = Self::load_persistent(&state_file);

        let state = PlaybackState {
            rev: 1,
            current_channel: persistent.last_channel,
            status: PlaybackStatus::Idle,
            volume: persistent.volume,
            is_muted: persistent.muted,
            now_playing: None,
        };

        Self {
            state: Arc::new(RwLock::new(state)),
            state_file,
        }
    }

    pub fn arc(&self) -> Arc<RwLock<PlaybackState>> {
        Arc::clone(&self.state)
    }

    pub async fn snapshot(&self) -> PlaybackState {
        self.state.read().await.clone()
    }

    /// Bind a new channel (or none).  Clears the published now-playing info.
    pub async fn set_channel(&self, channel: Option<Channel>) {
        {
            let mut state = self.state.write().await;
            state.current_channel = channel;
            state.now_playing = None;
            state.rev += 1;
        }
        self.persist().await;
    }

    pub async fn set_status(&self, status: PlaybackStatus) {
        let mut state = self.state.write().await;
        state.status = status;
        state.rev += 1;
    }

    /// Clamps to 0..=100 and applies the mute coupling: volume 0 mutes,
    /// raising above 0 unmutes.  Returns the volume to apply to the port.
    pub async fn set_volume(&self, volume: i64) -> u8 {
        let clamped = volume.clamp(0, 100) as u8;
        let effective = {
            let mut state = self.state.write().await;
            state.volume = clamped;
            state.is_muted = clamped == 0;
            state.rev += 1;
            state.effective_volume()
        };
        self.persist().await;
        effective
    }

    /// Flips mute without touching the stored volume level.  Returns the
    /// volume to apply to the port.
    pub async fn toggle_mute(&self) -> u8 {
        let effective = {
            let mut state = self.state.write().await;
            state.is_muted = !state.is_muted;
            state.rev += 1;
            state.effective_volume()
        };
        self.persist().await;
        effective
    }

    pub async fn set_now_playing(&self, info: Option<NowPlayingInfo>) {
        let mut state = self.state.write().await;
        state.now_playing = info;
        state.rev += 1;
    }

    /// Fire-and-forget write of the durable slice.  Never blocks state
    /// mutation on the filesystem and never throws into the caller.
    async fn persist(&self) {
        let persistent = {
            let state = self.state.read().await;
            PersistentState {
                volume: state.volume,
                muted: state.is_muted,
                last_channel: state.current_channel.clone(),
                saved_at: Some(chrono::Local::now()),
            }
        };
        let state_file = self.state_file.clone();

        tokio::spawn(async move {
            if let Some(parent) = state_file.parent() {
                if let Err(e) = tokio::fs::create_dir_all(parent).await {
                    warn!("state: failed to create {:?}: {}", parent, e);
                    return;
                }
            }
            let json = match serde_json::to_string_pretty(&persistent) {
                Ok(j) => j,
                Err(e) => {
                    warn!("state: failed to serialize: {}", e);
                    return;
                }
            };
            if let Err(e) = tokio::fs::write(&state_file, json).await {
                warn!("state: failed to write {:?}: {}", state_file, e);
            }
        });
    }

    fn load_persistent(state_file: &PathBuf) -> PersistentState {
        match std::fs::read_to_string(state_file) {
            Ok(content) => PersistentState::from_json_lenient(&content),
            Err(_) => PersistentState::default(),
        }
    }
}
