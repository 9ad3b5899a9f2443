use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// One entry in the channel catalog.  Immutable once loaded — the registry
/// is replaced wholesale on reload, never patched in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    /// Unique, stable identifier.  Used in API paths and persisted state.
    pub slug: String,
    pub name: String,
    /// Audio stream locator handed to the audio port.
    pub stream_url: String,
    /// Live-metadata endpoint.  Absence disables now-playing polling for
    /// this channel.
    #[serde(default)]
    pub metadata_url: Option<String>,
    /// Accent color for UI consumers, `#rrggbb`.
    #[serde(default = "default_color")]
    pub color: String,
    /// Sort key within the catalog.
    #[serde(default)]
    pub order: u32,
    /// Inactive channels are kept in the catalog but not selectable.
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_color() -> String {
    "#888888".to_string()
}

fn default_active() -> bool {
    true
}

/// In-memory channel catalog, sorted by `order`.
#[derive(Debug, Default)]
pub struct ChannelRegistry {
    channels: Vec<Channel>,
}

impl ChannelRegistry {
    pub fn new(mut channels: Vec<Channel>) -> Self {
        channels.sort_by_key(|c| c.order);
        Self { channels }
    }

    /// Swap in a freshly loaded catalog.  Replace, not patch.
    pub fn replace(&mut self, channels: Vec<Channel>) {
        *self = Self::new(channels);
    }

    pub fn get(&self, slug: &str) -> Option<&Channel> {
        self.channels.iter().find(|c| c.slug == slug)
    }

    /// Channels offered for selection: active only, in catalog order.
    pub fn selectable(&self) -> impl Iterator<Item = &Channel> {
        self.channels.iter().filter(|c| c.is_active)
    }

    pub fn all(&self) -> &[Channel] {
        &self.channels
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

// ── TOML catalog loader ───────────────────────────────────────────────────────

/// Intermediate struct that matches the TOML `[[channel]]` table.  Kept
/// separate from `Channel` so the file schema can diverge from the wire
/// struct without breaking either.
#[derive(Debug, Deserialize)]
struct TomlChannelFile {
    channel: Vec<TomlChannel>,
}

#[derive(Debug, Deserialize)]
struct TomlChannel {
    slug: String,
    name: String,
    stream_url: String,
    #[serde(default)]
    metadata_url: Option<String>,
    #[serde(default)]
    color: Option<String>,
    #[serde(default)]
    order: u32,
    #[serde(default = "default_active")]
    is_active: bool,
}

pub fn parse_channels_from_toml_str(content: &str) -> anyhow::Result<Vec<Channel>> {
    let file: TomlChannelFile = toml::from_str(content)?;
    let channels = file
        .channel
        .into_iter()
        .map(|c| Channel {
            slug: c.slug,
            name: c.name,
            stream_url: c.stream_url,
            metadata_url: c.metadata_url,
            color: c.color.unwrap_or_else(default_color),
            order: c.order,
            is_active: c.is_active,
        })
        .collect();
    Ok(channels)
}

pub fn load_channels_from_toml(path: &std::path::Path) -> anyhow::Result<Vec<Channel>> {
    let content = std::fs::read_to_string(path)?;
    parse_channels_from_toml_str(&content)
}

/// Fetch the catalog from a remote URL serving the same TOML schema.
pub async fn fetch_channels_from_url(url: &str) -> anyhow::Result<Vec<Channel>> {
    let resp = reqwest::get(url).await?;
    if !resp.status().is_success() {
        anyhow::bail!("catalog fetch returned HTTP {}", resp.status());
    }
    let content = resp.text().await?;
    parse_channels_from_toml_str(&content)
}

/// Load the catalog: local TOML file first, remote URL as fallback.
pub async fn load_catalog(
    local_path: &std::path::Path,
    remote_url: &str,
) -> anyhow::Result<Vec<Channel>> {
    if local_path.exists() {
        let channels = load_channels_from_toml(local_path)?;
        info!("Loaded {} channels from {:?}", channels.len(), local_path);
        return Ok(channels);
    }

    if remote_url.is_empty() {
        warn!("No local catalog at {:?} and no remote URL configured", local_path);
        return Ok(Vec::new());
    }

    let channels = fetch_channels_from_url(remote_url).await?;
    info!("Loaded {} channels from {}", channels.len(), remote_url);
    Ok(channels)
}
