//! Track-change notice bridge.
//!
//! Listens for `TrackChanged` events and publishes `NoticeShown` /
//! `NoticeHidden` with auto-hide timing, decoupled from the polling
//! cadence.  A re-trigger while visible replaces the pending deadline —
//! there is only ever one outstanding auto-hide timer.  A manual dismiss
//! cancels it.

use airtune_core::protocol::Event;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tracing::{debug, warn};

/// Spawn the bridge.  Returns the task handle and the manual-dismiss
/// sender.
pub fn spawn(
    events: broadcast::Sender<Event>,
    show_duration: Duration,
    armed: bool,
) -> (tokio::task::JoinHandle<()>, mpsc::Sender<()>) {
    let (dismiss_tx, dismiss_rx) = mpsc::channel(8);
    let handle = tokio::spawn(run(events, dismiss_rx, show_duration, armed));
    (handle, dismiss_tx)
}

async fn run(
    events: broadcast::Sender<Event>,
    mut dismiss_rx: mpsc::Receiver<()>,
    show_duration: Duration,
    armed: bool,
) {
    let mut rx = events.subscribe();
    let mut hide_at: Option<Instant> = None;

    loop {
        // A dummy far-future deadline keeps the select arm well-formed while
        // nothing is visible; the arm is gated off by the condition.
        let deadline = hide_at.unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));

        tokio::select! {
            ev = rx.recv() => match ev {
                Ok(Event::TrackChanged { info }) if armed => {
                    // Re-trigger replaces the deadline rather than stacking.
                    hide_at = Some(Instant::now() + show_duration);
                    let _ = events.send(Event::NoticeShown { info });
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("notify: lagged {} events", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },

            dismiss = dismiss_rx.recv() => match dismiss {
                Some(()) => {
                    if hide_at.take().is_some() {
                        debug!("notify: manual dismiss");
                        let _ = events.send(Event::NoticeHidden);
                    }
                }
                None => break,
            },

            _ = tokio::time::sleep_until(deadline), if hide_at.is_some() => {
                hide_at = None;
                let _ = events.send(Event::NoticeHidden);
            }
        }
    }
    debug!("notify: bridge exiting");
}
