//! mpv-backed [`AudioPort`] with separated reader/writer tasks.
//!
//! ```text
//!   MpvPort::load()
//!         │ (spawns mpv --idle on first use)
//!         ├── writer_task    ← receives requests via mpsc, serialises → socket
//!         ├── reader_task    ← reads JSON lines from socket
//!         │                      ├── response (has request_id) → matched oneshot
//!         │                      └── event / property-change   → raw event channel
//!         └── translate_task ← raw mpv events → PortEvent on the port's channel
//! ```
//!
//! Platform notes:
//! - Unix:    Unix domain sockets
//! - Windows: Named pipes  \\.\pipe\<name>

use crate::port::{AudioPort, PortEvent};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};

#[cfg(unix)]
use tokio::net::UnixStream;

#[cfg(windows)]
use tokio::net::windows::named_pipe::ClientOptions;

static NEXT_REQ_ID: AtomicU64 = AtomicU64::new(1);

/// Fixed observe_property IDs, matched in property-change events.
const OBS_CORE_IDLE: u64 = 1;
const OBS_PAUSE: u64 = 2;

struct PendingRequest {
    req_id: u64,
    payload: String, // serialised JSON line (already has '\n')
    reply: oneshot::Sender<anyhow::Result<Value>>,
}

/// An mpv event / property-change that arrived unsolicited (no request_id).
#[derive(Debug, Clone)]
struct MpvEvent {
    raw: Value,
}

impl MpvEvent {
    fn as_property_change(&self) -> Option<(u64, &Value)> {
        if self.raw.get("event")?.as_str()? == "property-change" {
            let id = self.raw.get("id")?.as_u64()?;
            let data = self.raw.get("data").unwrap_or(&Value::Null);
            Some((id, data))
        } else {
            None
        }
    }

    fn event_name(&self) -> Option<&str> {
        self.raw.get("event")?.as_str()
    }
}

/// Cloneable handle to the writer task.  `send()` fires a command and awaits
/// the matched response.
#[derive(Clone)]
struct MpvHandle {
    tx: mpsc::Sender<PendingRequest>,
}

impl MpvHandle {
    async fn send(&self, command: Value) -> anyhow::Result<Value> {
        let req_id = NEXT_REQ_ID.fetch_add(1, Ordering::Relaxed);
        let msg = json!({ "command": command, "request_id": req_id });
        let mut raw = serde_json::to_string(&msg)?;
        raw.push('\n');

        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(PendingRequest {
                req_id,
                payload: raw,
                reply: reply_tx,
            })
            .await
            .map_err(|_| anyhow::anyhow!("mpv writer task gone"))?;

        tokio::time::timeout(tokio::time::Duration::from_secs(5), reply_rx)
            .await
            .map_err(|_| anyhow::anyhow!("mpv IPC timeout for req={}", req_id))?
            .map_err(|_| anyhow::anyhow!("mpv reply channel dropped req={}", req_id))?
    }
}

/// Owns the mpv child process and implements [`AudioPort`] over its IPC
/// socket.  The process is spawned lazily on first `load` and respawned if
/// it has died by the next `load`.
pub struct MpvPort {
    socket_name: String,
    process: Option<tokio::process::Child>,
    handle: Option<MpvHandle>,
    event_tx: mpsc::Sender<PortEvent>,
    volume: u8,
}

impl MpvPort {
    pub fn new(event_tx: mpsc::Sender<PortEvent>, initial_volume: u8) -> Self {
        Self {
            socket_name: airtune_core::platform::mpv_socket_name(),
            process: None,
            handle: None,
            event_tx,
            volume: initial_volume,
        }
    }

    fn process_alive(&mut self) -> bool {
        if let Some(ref mut child) = self.process {
            child.try_wait().ok().flatten().is_none()
        } else {
            false
        }
    }

    async fn ensure_connected(&mut self) -> anyhow::Result<MpvHandle> {
        if self.process_alive() {
            if let Some(handle) = &self.handle {
                return Ok(handle.clone());
            }
        }
        let handle = self.spawn_and_connect().await?;
        self.handle = Some(handle.clone());

        // Register property observation on every fresh connection.
        for (id, name) in [(OBS_CORE_IDLE, "core-idle"), (OBS_PAUSE, "pause")] {
            match handle.send(json!(["observe_property", id, name])).await {
                Ok(_) => debug!("mpv: observe_property id={} name={}", id, name),
                Err(e) => warn!("mpv: observe_property {} failed: {}", name, e),
            }
        }
        Ok(handle)
    }

    // ── spawn / connect ───────────────────────────────────────────────────────

    #[cfg(unix)]
    async fn spawn_and_connect(&mut self) -> anyhow::Result<MpvHandle> {
        if let Some(mut p) = self.process.take() {
            let _ = p.kill().await;
        }

        let socket_path = std::path::PathBuf::from(&self.socket_name);
        let _ = tokio::fs::remove_file(&socket_path).await;

        info!("mpv: spawning new process");
        let mpv_binary = airtune_core::platform::find_mpv_binary()
            .ok_or_else(|| anyhow::anyhow!("mpv binary not found"))?;

        let vol_arg = format!("--volume={}", self.volume);
        let ipc_arg = airtune_core::platform::mpv_socket_arg();

        let child = tokio::process::Command::new(mpv_binary)
            .arg("--no-video")
            .arg("--idle=yes")
            .arg(&ipc_arg)
            .arg("--quiet")
            .arg(vol_arg)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn()?;
        self.process = Some(child);

        // Wait for the IPC socket to appear
        for _ in 0..50 {
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
            if socket_path.exists() {
                break;
            }
        }
        if !socket_path.exists() {
            anyhow::bail!("mpv IPC socket did not appear");
        }
        tokio::time::sleep(tokio::time::Duration::from_millis(200)).await;

        let stream = UnixStream::connect(&socket_path).await?;
        info!("mpv: connected to IPC socket");
        Ok(Self::start_io_tasks(stream, self.event_tx.clone()))
    }

    #[cfg(unix)]
    fn start_io_tasks(stream: UnixStream, event_tx: mpsc::Sender<PortEvent>) -> MpvHandle {
        let (read_half, write_half) = stream.into_split();
        let reader = BufReader::new(read_half);

        // pending map: req_id → reply channel.  Writer inserts, reader resolves.
        let pending: Arc<Mutex<HashMap<u64, oneshot::Sender<anyhow::Result<Value>>>>> =
            Arc::new(Mutex::new(HashMap::new()));

        let (cmd_tx, cmd_rx) = mpsc::channel::<PendingRequest>(64);
        let (raw_tx, raw_rx) = mpsc::channel::<MpvEvent>(64);

        let pending_w = pending.clone();
        tokio::spawn(writer_task(write_half, cmd_rx, pending_w));
        tokio::spawn(reader_task(reader, pending, raw_tx));
        tokio::spawn(translate_task(raw_rx, event_tx));

        MpvHandle { tx: cmd_tx }
    }

    #[cfg(windows)]
    async fn spawn_and_connect(&mut self) -> anyhow::Result<MpvHandle> {
        if let Some(mut p) = self.process.take() {
            let _ = p.kill().await;
        }

        info!("mpv: spawning new process");
        let mpv_binary = airtune_core::platform::find_mpv_binary()
            .ok_or_else(|| anyhow::anyhow!("mpv binary not found"))?;

        let vol_arg = format!("--volume={}", self.volume);
        let ipc_arg = airtune_core::platform::mpv_socket_arg();

        let child = tokio::process::Command::new(mpv_binary)
            .arg("--no-video")
            .arg("--idle=yes")
            .arg(&ipc_arg)
            .arg("--quiet")
            .arg(vol_arg)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn()?;
        self.process = Some(child);

        let pipe_path = format!(r"\\.\pipe\{}", self.socket_name);
        for _ in 0..50 {
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
            match ClientOptions::new().open(&pipe_path) {
                Ok(client) => {
                    info!("mpv: connected to named pipe");
                    return Ok(Self::start_io_tasks_windows(client, self.event_tx.clone()));
                }
                Err(_) => continue,
            }
        }
        anyhow::bail!("mpv named pipe did not appear")
    }

    #[cfg(windows)]
    fn start_io_tasks_windows(
        pipe: tokio::net::windows::named_pipe::NamedPipeClient,
        event_tx: mpsc::Sender<PortEvent>,
    ) -> MpvHandle {
        use tokio::io::split;
        let (read_half, write_half) = split(pipe);
        let reader = BufReader::new(read_half);

        let pending: Arc<Mutex<HashMap<u64, oneshot::Sender<anyhow::Result<Value>>>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let (cmd_tx, cmd_rx) = mpsc::channel::<PendingRequest>(64);
        let (raw_tx, raw_rx) = mpsc::channel::<MpvEvent>(64);

        let pending_w = pending.clone();
        tokio::spawn(writer_task(write_half, cmd_rx, pending_w));
        tokio::spawn(reader_task(reader, pending, raw_tx));
        tokio::spawn(translate_task(raw_rx, event_tx));

        MpvHandle { tx: cmd_tx }
    }
}

impl AudioPort for MpvPort {
    async fn load(&mut self, url: &str) -> anyhow::Result<()> {
        let volume = self.volume;
        let handle = self.ensure_connected().await?;
        // Bind paused; playback starts on the next play().
        handle.send(json!(["set_property", "pause", true])).await?;
        handle.send(json!(["loadfile", url])).await?;
        let _ = handle
            .send(json!(["set_property", "volume", volume as f64]))
            .await;
        Ok(())
    }

    async fn play(&mut self) -> anyhow::Result<()> {
        let handle = self.ensure_connected().await?;
        handle.send(json!(["set_property", "pause", false])).await?;
        Ok(())
    }

    async fn pause(&mut self) -> anyhow::Result<()> {
        let handle = self.ensure_connected().await?;
        handle.send(json!(["set_property", "pause", true])).await?;
        Ok(())
    }

    async fn set_volume(&mut self, volume: u8) -> anyhow::Result<()> {
        self.volume = volume;
        // Not an error while nothing is bound yet; the level is applied on
        // the next load.
        if let Some(handle) = self.handle.clone() {
            handle
                .send(json!(["set_property", "volume", volume as f64]))
                .await?;
        }
        Ok(())
    }

    async fn unload(&mut self) -> anyhow::Result<()> {
        if let Some(handle) = self.handle.clone() {
            let _ = handle.send(json!(["stop"])).await;
        }
        Ok(())
    }
}

// ── reader task ───────────────────────────────────────────────────────────────

async fn reader_task<R>(
    mut reader: BufReader<R>,
    pending: Arc<Mutex<HashMap<u64, oneshot::Sender<anyhow::Result<Value>>>>>,
    raw_tx: mpsc::Sender<MpvEvent>,
) where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                debug!("mpv reader: connection closed");
                let mut map = pending.lock().await;
                for (_, tx) in map.drain() {
                    let _ = tx.send(Err(anyhow::anyhow!("mpv IPC connection closed")));
                }
                break;
            }
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let val: Value = match serde_json::from_str(trimmed) {
                    Ok(v) => v,
                    Err(e) => {
                        debug!("mpv reader: invalid json '{}': {}", trimmed, e);
                        continue;
                    }
                };

                if let Some(req_id) = val.get("request_id").and_then(|v| v.as_u64()) {
                    let mut map = pending.lock().await;
                    if let Some(tx) = map.remove(&req_id) {
                        let result = if val["error"].as_str() == Some("success") {
                            Ok(val)
                        } else {
                            let err = val["error"]
                                .as_str()
                                .unwrap_or("unknown error")
                                .to_string();
                            debug!("mpv reader: response req={} err={}", req_id, err);
                            Err(anyhow::anyhow!("mpv error: {}", err))
                        };
                        let _ = tx.send(result);
                    } else {
                        debug!("mpv reader: response for unknown req={}", req_id);
                    }
                } else {
                    let _ = raw_tx.send(MpvEvent { raw: val }).await;
                }
            }
            Err(e) => {
                warn!("mpv reader: read error: {}", e);
                let mut map = pending.lock().await;
                for (_, tx) in map.drain() {
                    let _ = tx.send(Err(anyhow::anyhow!("mpv IPC read error: {}", e)));
                }
                break;
            }
        }
    }
}

// ── writer task ───────────────────────────────────────────────────────────────

async fn writer_task<W>(
    mut writer: W,
    mut rx: mpsc::Receiver<PendingRequest>,
    pending: Arc<Mutex<HashMap<u64, oneshot::Sender<anyhow::Result<Value>>>>>,
) where
    W: tokio::io::AsyncWrite + Unpin,
{
    while let Some(req) = rx.recv().await {
        // Register the reply channel before writing so the reader can match it
        {
            let mut map = pending.lock().await;
            map.insert(req.req_id, req.reply);
        }
        if let Err(e) = writer.write_all(req.payload.as_bytes()).await {
            warn!("mpv writer: write error: {}", e);
            let mut map = pending.lock().await;
            if let Some(tx) = map.remove(&req.req_id) {
                let _ = tx.send(Err(anyhow::anyhow!("mpv write error: {}", e)));
            }
            break;
        }
    }
    debug!("mpv writer: task exiting");
}

// ── event translation ─────────────────────────────────────────────────────────

/// Map raw mpv notifications onto the port's event vocabulary.
fn translate_event(ev: &MpvEvent) -> Option<PortEvent> {
    if let Some((id, data)) = ev.as_property_change() {
        // core-idle flips false once audio is actually flowing.
        if id == OBS_CORE_IDLE && data.as_bool() == Some(false) {
            return Some(PortEvent::CanPlay);
        }
        return None;
    }

    if ev.event_name() == Some("end-file") {
        let reason = ev.raw.get("reason").and_then(|r| r.as_str()).unwrap_or("");
        return match reason {
            "error" => {
                let detail = ev
                    .raw
                    .get("file_error")
                    .and_then(|e| e.as_str())
                    .unwrap_or("playback failed");
                Some(PortEvent::Error(detail.to_string()))
            }
            "eof" => Some(PortEvent::Ended),
            // "stop"/"redirect" fire when a loadfile replaces the resource.
            _ => None,
        };
    }

    None
}

async fn translate_task(mut raw_rx: mpsc::Receiver<MpvEvent>, event_tx: mpsc::Sender<PortEvent>) {
    while let Some(ev) = raw_rx.recv().await {
        if let Some(port_ev) = translate_event(&ev) {
            if event_tx.send(port_ev).await.is_err() {
                break;
            }
        }
    }
    debug!("mpv translate: task exiting");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ev(raw: Value) -> MpvEvent {
        MpvEvent { raw }
    }

    #[test]
    fn test_core_idle_false_is_can_play() {
        let e = ev(json!({"event": "property-change", "id": 1, "data": false}));
        assert_eq!(translate_event(&e), Some(PortEvent::CanPlay));

        let e = ev(json!({"event": "property-change", "id": 1, "data": true}));
        assert_eq!(translate_event(&e), None);
    }

    #[test]
    fn test_end_file_reasons() {
        let e = ev(json!({"event": "end-file", "reason": "error", "file_error": "unrecognized format"}));
        assert_eq!(
            translate_event(&e),
            Some(PortEvent::Error("unrecognized format".to_string()))
        );

        let e = ev(json!({"event": "end-file", "reason": "eof"}));
        assert_eq!(translate_event(&e), Some(PortEvent::Ended));

        // Resource replacement is not a failure.
        let e = ev(json!({"event": "end-file", "reason": "stop"}));
        assert_eq!(translate_event(&e), None);
    }

    #[test]
    fn test_pause_property_changes_are_ignored() {
        let e = ev(json!({"event": "property-change", "id": 2, "data": true}));
        assert_eq!(translate_event(&e), None);
    }
}
