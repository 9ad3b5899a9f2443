//! The audio port — a minimal seam over the platform media engine so the
//! controller's state machine is testable without a real audio stack.
//!
//! Exactly one resource is bound at a time: `load` releases the previous
//! stream before binding the new one.  Decoding and output are entirely the
//! engine's concern.

/// Asynchronous notifications from the bound media resource.  Delivered on
/// the event channel handed to the port at construction.
#[derive(Debug, Clone, PartialEq)]
pub enum PortEvent {
    /// The stream connected and audio is flowing.
    CanPlay,
    /// The resource ended.  For a live stream this means the upstream
    /// connection dropped.
    Ended,
    /// Media failure: network interruption, unsupported stream, engine
    /// death.  Playback is not auto-retried.
    Error(String),
}

#[allow(async_fn_in_trait)]
pub trait AudioPort: Send {
    /// Release any previous resource and bind `url`, paused.
    async fn load(&mut self, url: &str) -> anyhow::Result<()>;

    /// Start (or resume) playback of the bound resource.
    async fn play(&mut self) -> anyhow::Result<()>;

    async fn pause(&mut self) -> anyhow::Result<()>;

    /// Apply an effective volume in 0..=100.
    async fn set_volume(&mut self, volume: u8) -> anyhow::Result<()>;

    /// Release the bound resource entirely.
    async fn unload(&mut self) -> anyhow::Result<()>;
}
