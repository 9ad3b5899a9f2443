//! Catalog + persisted-state interplay: the last-selected channel is stored
//! as a full serialized descriptor and re-matched against the registry by
//! slug on startup.

use airtune_core::channel::{parse_channels_from_toml_str, ChannelRegistry};
use airtune_core::state::{PersistentState, PlaybackStatus, StateStore};

const CATALOG: &str = r##"
[[channel]]
slug = "jazz"
name = "Smooth Jazz"
stream_url = "https://streams.example.org/jazz"
metadata_url = "https://api.example.org/station/jazz"
color = "#1d4ed8"
order = 1

[[channel]]
slug = "metal"
name = "Metal"
stream_url = "https://streams.example.org/metal"
metadata_url = "https://api.example.org/station/metal"
color = "#b91c1c"
order = 2

[[channel]]
slug = "talk"
name = "Talk"
stream_url = "https://streams.example.org/talk"
order = 3
"##;

#[tokio::test]
async fn restored_channel_rematches_registry_by_slug() {
    let channels = parse_channels_from_toml_str(CATALOG).unwrap();
    let registry = ChannelRegistry::new(channels);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");

    let persisted = PersistentState {
        volume: 40,
        muted: true,
        last_channel: registry.get("jazz").cloned(),
        saved_at: None,
    };
    std::fs::write(&path, serde_json::to_string_pretty(&persisted).unwrap()).unwrap();

    let store = StateStore::new(path);
    let state = store.snapshot().await;

    assert_eq!(state.volume, 40);
    assert!(state.is_muted);
    assert_eq!(state.status, PlaybackStatus::Idle);

    let restored = state.current_channel.expect("restored channel");
    let current = registry.get(&restored.slug).expect("still in catalog");
    assert_eq!(current, &restored);
    assert!(current.metadata_url.is_some());
}

#[tokio::test]
async fn restored_channel_missing_from_catalog_is_detectable() {
    let channels = parse_channels_from_toml_str(CATALOG).unwrap();
    let mut registry = ChannelRegistry::new(channels);

    let persisted = PersistentState {
        volume: 50,
        muted: false,
        last_channel: registry.get("talk").cloned(),
        saved_at: None,
    };

    // Catalog reload dropped the talk channel: the stale descriptor no
    // longer resolves and callers fall back to no selection.
    let survivors = registry
        .all()
        .iter()
        .filter(|c| c.slug != "talk")
        .cloned()
        .collect();
    registry.replace(survivors);

    let stale = persisted.last_channel.unwrap();
    assert!(registry.get(&stale.slug).is_none());
}

#[test]
fn channel_without_metadata_endpoint_disables_polling() {
    let channels = parse_channels_from_toml_str(CATALOG).unwrap();
    let registry = ChannelRegistry::new(channels);
    assert!(registry.get("talk").unwrap().metadata_url.is_none());
    assert!(registry.get("jazz").unwrap().metadata_url.is_some());
}
