//! Wire models for the per-channel metadata endpoint, plus the flattened
//! `NowPlayingInfo` published to UI consumers.
//!
//! Endpoint payload shape:
//!
//! ```json
//! {
//!   "listeners": { "total": 132 },
//!   "live": { "is_live": true, "streamer_name": "dj arc" },
//!   "now_playing": {
//!     "song": { "title": "...", "artist": "...", "album": "...", "art": "..." },
//!     "elapsed": 104, "duration": 245
//!   }
//! }
//! ```
//!
//! Numeric fields arrive as strings from some broadcast servers, so the
//! deserializers accept either form.

use serde::{Deserialize, Deserializer, Serialize};

/// Deserialize a string or number into a u64.
fn string_or_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrU64 {
        String(String),
        Number(u64),
        Float(f64),
    }

    match StringOrU64::deserialize(deserializer)? {
        StringOrU64::String(s) => s.trim().parse::<u64>().map_err(D::Error::custom),
        StringOrU64::Number(n) => Ok(n),
        StringOrU64::Float(f) => Ok(f as u64),
    }
}

/// Full metadata endpoint payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StationStatus {
    #[serde(default)]
    pub listeners: Listeners,
    #[serde(default)]
    pub live: LiveStatus,
    /// Absent or malformed blocks are treated as "no change", not an error.
    #[serde(default)]
    pub now_playing: Option<NowPlayingBlock>,
    /// Set by the relay when the upstream endpoint failed; clients degrade
    /// instead of crashing on a non-200.
    #[serde(default)]
    pub error: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Listeners {
    #[serde(default, deserialize_with = "string_or_u64")]
    pub total: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LiveStatus {
    #[serde(default)]
    pub is_live: bool,
    #[serde(default)]
    pub streamer_name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NowPlayingBlock {
    #[serde(default)]
    pub song: Option<Song>,
    #[serde(default, deserialize_with = "string_or_u64")]
    pub elapsed: u64,
    #[serde(default, deserialize_with = "string_or_u64")]
    pub duration: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Song {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub artist: String,
    #[serde(default)]
    pub album: String,
    #[serde(default)]
    pub art: Option<String>,
}

impl StationStatus {
    /// Degraded-but-valid payload synthesized when the upstream endpoint is
    /// unreachable, so downstream rendering never receives a null.
    pub fn degraded(channel_name: &str) -> Self {
        Self {
            listeners: Listeners::default(),
            live: LiveStatus {
                is_live: false,
                streamer_name: String::new(),
            },
            now_playing: Some(NowPlayingBlock {
                song: Some(Song {
                    title: "Stream unavailable".to_string(),
                    artist: channel_name.to_string(),
                    album: String::new(),
                    art: None,
                }),
                elapsed: 0,
                duration: 0,
            }),
            error: true,
        }
    }
}

/// Change-detection identity for a track: the `(artist, title)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackKey {
    pub artist: String,
    pub title: String,
}

/// The currently broadcasting track as published to consumers.  Replaced
/// wholesale on each successful poll, never merged field-by-field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NowPlayingInfo {
    pub title: String,
    pub artist: String,
    pub album: String,
    pub art: Option<String>,
    pub elapsed: u64,
    pub duration: u64,
    pub listeners: u64,
    pub is_live: bool,
    pub streamer_name: String,
}

impl NowPlayingInfo {
    /// Flatten an endpoint payload.  Returns `None` when the `song` block is
    /// absent — the caller keeps its previous value.
    pub fn from_status(status: &StationStatus) -> Option<Self> {
        let block = status.now_playing.as_ref()?;
        let song = block.song.as_ref()?;
        if song.title.is_empty() && song.artist.is_empty() {
            return None;
        }
        Some(Self {
            title: song.title.clone(),
            artist: song.artist.clone(),
            album: song.album.clone(),
            art: song.art.clone(),
            elapsed: block.elapsed,
            duration: block.duration,
            listeners: status.listeners.total,
            is_live: status.live.is_live,
            streamer_name: status.live.streamer_name.clone(),
        })
    }

    /// Placeholder shown while the channel's metadata is unavailable.
    pub fn placeholder(channel_name: &str) -> Self {
        Self {
            title: "Stream unavailable".to_string(),
            artist: channel_name.to_string(),
            album: String::new(),
            art: None,
            elapsed: 0,
            duration: 0,
            listeners: 0,
            is_live: false,
            streamer_name: String::new(),
        }
    }

    pub fn track_key(&self) -> TrackKey {
        TrackKey {
            artist: self.artist.clone(),
            title: self.title.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"{
        "listeners": { "total": 132 },
        "live": { "is_live": true, "streamer_name": "dj arc" },
        "now_playing": {
            "song": { "title": "Blue in Green", "artist": "Miles Davis", "album": "Kind of Blue", "art": "https://cdn.example.org/art/kob.jpg" },
            "elapsed": 104, "duration": 245
        }
    }"#;

    #[test]
    fn test_parse_full_payload() {
        let status: StationStatus = serde_json::from_str(FULL).unwrap();
        let info = NowPlayingInfo::from_status(&status).unwrap();
        assert_eq!(info.title, "Blue in Green");
        assert_eq!(info.artist, "Miles Davis");
        assert_eq!(info.listeners, 132);
        assert!(info.is_live);
        assert_eq!(info.streamer_name, "dj arc");
        assert_eq!(info.elapsed, 104);
        assert_eq!(info.art.as_deref(), Some("https://cdn.example.org/art/kob.jpg"));
        assert!(!status.error);
    }

    #[test]
    fn test_parse_stringly_numbers() {
        let raw = r#"{
            "listeners": { "total": "88" },
            "live": { "is_live": false, "streamer_name": "" },
            "now_playing": {
                "song": { "title": "T", "artist": "A", "album": "" },
                "elapsed": "12", "duration": "300"
            }
        }"#;
        let status: StationStatus = serde_json::from_str(raw).unwrap();
        let info = NowPlayingInfo::from_status(&status).unwrap();
        assert_eq!(info.listeners, 88);
        assert_eq!(info.elapsed, 12);
        assert_eq!(info.duration, 300);
    }

    #[test]
    fn test_missing_song_is_no_change() {
        let raw = r#"{ "listeners": { "total": 5 }, "live": { "is_live": false, "streamer_name": "" } }"#;
        let status: StationStatus = serde_json::from_str(raw).unwrap();
        assert!(NowPlayingInfo::from_status(&status).is_none());

        let raw = r#"{ "now_playing": { "elapsed": 1, "duration": 2 } }"#;
        let status: StationStatus = serde_json::from_str(raw).unwrap();
        assert!(NowPlayingInfo::from_status(&status).is_none());

        let raw = r#"{ "now_playing": { "song": { "title": "", "artist": "" } } }"#;
        let status: StationStatus = serde_json::from_str(raw).unwrap();
        assert!(NowPlayingInfo::from_status(&status).is_none());
    }

    #[test]
    fn test_degraded_payload_is_renderable() {
        let status = StationStatus::degraded("Smooth Jazz");
        assert!(status.error);
        assert!(!status.live.is_live);
        let info = NowPlayingInfo::from_status(&status).unwrap();
        assert_eq!(info.title, "Stream unavailable");
        assert_eq!(info.artist, "Smooth Jazz");
        assert_eq!(info.elapsed, 0);
    }

    #[test]
    fn test_track_key_identity() {
        let status: StationStatus = serde_json::from_str(FULL).unwrap();
        let a = NowPlayingInfo::from_status(&status).unwrap();
        let mut b = a.clone();
        b.listeners = 999;
        b.elapsed = 200;
        assert_eq!(a.track_key(), b.track_key());

        b.title = "So What".to_string();
        assert_ne!(a.track_key(), b.track_key());
    }
}
