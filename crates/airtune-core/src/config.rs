use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::platform;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub channels: ChannelsConfig,
    #[serde(default)]
    pub player: PlayerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_enabled")]
    pub enabled: bool,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Channel catalog source — a local TOML file, with an optional remote URL
/// fallback serving the same schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelsConfig {
    /// Path to the local catalog.  Defaults to
    /// `$XDG_CONFIG_HOME/airtune/channels.toml`.
    #[serde(default = "default_channels_toml")]
    pub channels_toml: PathBuf,
    /// Remote catalog URL used when the local file is absent.
    #[serde(default)]
    pub remote_url: String,
}

/// When the now-playing poller is allowed to fetch.
///
/// Both behaviors exist in the field: a standalone music widget polls as
/// soon as a channel is selected, while a page-header display only polls
/// during playback.  Pick one per deployment; never merge the two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PollPolicy {
    /// Fetch whenever a channel is selected, playing or not.
    Always,
    /// Fetch only while playback is active.
    #[default]
    WhilePlaying,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerConfig {
    #[serde(default = "default_volume")]
    pub default_volume: u8,
    /// Now-playing poll cadence while healthy.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Retry delay before `max_retries` consecutive failures.
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
    /// Widened retry delay once `max_retries` is reached.  Retries continue
    /// indefinitely at this cadence while the channel stays selected.
    #[serde(default = "default_backoff_delay_secs")]
    pub backoff_delay_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub poll_policy: PollPolicy,
    /// Auto-hide delay for the track-change notice.  The embedded-game
    /// surface ships 5 here instead of the default 8.
    #[serde(default = "default_notice_secs")]
    pub notice_secs: u64,
    /// Whether track-change notices are shown at all.
    #[serde(default = "default_notice_armed")]
    pub notice_armed: bool,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            state_file: default_state_file(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: default_http_enabled(),
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

impl Default for ChannelsConfig {
    fn default() -> Self {
        Self {
            channels_toml: default_channels_toml(),
            remote_url: String::new(),
        }
    }
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            default_volume: default_volume(),
            poll_interval_secs: default_poll_interval_secs(),
            retry_delay_secs: default_retry_delay_secs(),
            backoff_delay_secs: default_backoff_delay_secs(),
            max_retries: default_max_retries(),
            poll_policy: PollPolicy::default(),
            notice_secs: default_notice_secs(),
            notice_armed: default_notice_armed(),
        }
    }
}

fn default_state_file() -> PathBuf {
    platform::data_dir().join("state.json")
}

fn default_http_enabled() -> bool {
    true
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8970
}

fn default_channels_toml() -> PathBuf {
    platform::config_dir().join("channels.toml")
}

fn default_volume() -> u8 {
    50
}

fn default_poll_interval_secs() -> u64 {
    15
}

fn default_retry_delay_secs() -> u64 {
    30
}

fn default_backoff_delay_secs() -> u64 {
    60
}

fn default_max_retries() -> u32 {
    5
}

fn default_notice_secs() -> u64 {
    8
}

fn default_notice_armed() -> bool {
    true
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(&config_path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            daemon: DaemonConfig::default(),
            http: HttpConfig::default(),
            channels: ChannelsConfig::default(),
            player: PlayerConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.http.enabled);
        assert_eq!(config.http.port, 8970);
        assert_eq!(config.http.bind_address, "127.0.0.1");
        assert_eq!(config.player.poll_interval_secs, 15);
        assert_eq!(config.player.retry_delay_secs, 30);
        assert_eq!(config.player.backoff_delay_secs, 60);
        assert_eq!(config.player.max_retries, 5);
        assert_eq!(config.player.poll_policy, PollPolicy::WhilePlaying);
        assert_eq!(config.player.notice_secs, 8);
        assert!(config.channels.channels_toml.ends_with("airtune/channels.toml"));
    }

    #[test]
    fn test_poll_policy_from_toml() {
        let config: PlayerConfig = toml::from_str("poll_policy = \"always\"").unwrap();
        assert_eq!(config.poll_policy, PollPolicy::Always);
        let config: PlayerConfig = toml::from_str("").unwrap();
        assert_eq!(config.poll_policy, PollPolicy::WhilePlaying);
    }
}
