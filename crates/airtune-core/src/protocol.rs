use crate::nowplaying::NowPlayingInfo;
use crate::state::PlaybackState;
use serde::{Deserialize, Serialize};

/// Control commands accepted by the daemon, from any consumer surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "cmd")]
pub enum Command {
    Play,
    Pause,
    SelectChannel { slug: String },
    Volume { value: i64 },
    ToggleMute,
    DismissNotice,
    /// Re-read the channel catalog and replace the registry wholesale.
    ReloadChannels,
}

/// Events published to UI consumers (SSE stream, in-process subscribers).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum Event {
    /// Full state snapshot after a control operation.
    State { data: PlaybackState },
    /// A new `(artist, title)` identity was observed for the bound channel.
    TrackChanged { info: NowPlayingInfo },
    /// Silent refresh of the same track (listener count, elapsed time).
    NowPlaying { info: NowPlayingInfo },
    /// Transient track-change notice became visible.
    NoticeShown { info: NowPlayingInfo },
    NoticeHidden,
    /// Media failure — not auto-retried, cleared by an explicit play().
    PlaybackError { message: String },
    /// Metadata fetch failure — recovered locally via backoff retry.
    MetadataError { message: String },
}
