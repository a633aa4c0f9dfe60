use crate::player::{AudioBackend, PlaybackError};
use anyhow::Context;
use async_trait::async_trait;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::UnixStream,
    process::{Child, Command},
};

/// Latest observed player properties, written by the IPC reader task and
/// read lock-free by the adapter's query methods. Floats travel as bit
/// patterns through the atomics.
#[derive(Debug)]
struct StatusCell {
    position_bits: AtomicU64,
    duration_bits: AtomicU64,
    paused: AtomicBool,
    idle: AtomicBool,
}

impl StatusCell {
    fn new() -> Self {
        Self {
            position_bits: AtomicU64::new(0),
            duration_bits: AtomicU64::new(0),
            paused: AtomicBool::new(true),
            idle: AtomicBool::new(true),
        }
    }

    fn set_position(&self, secs: f64) {
        self.position_bits.store(secs.to_bits(), Ordering::Relaxed);
    }

    fn set_duration(&self, secs: f64) {
        self.duration_bits.store(secs.to_bits(), Ordering::Relaxed);
    }

    fn position(&self) -> f64 {
        f64::from_bits(self.position_bits.load(Ordering::Relaxed))
    }

    fn duration(&self) -> f64 {
        f64::from_bits(self.duration_bits.load(Ordering::Relaxed))
    }
}

/// mpv behind its JSON IPC socket.
///
/// mpv runs idle with no video; we observe the properties the session polls
/// and cache them in [`StatusCell`] so position/duration/playing queries
/// never touch the socket.
#[derive(Debug)]
pub struct MpvBackend {
    child: Child,
    socket_path: PathBuf,
    writer: tokio::sync::Mutex<tokio::io::WriteHalf<UnixStream>>,
    request_id: AtomicU64,
    status: Arc<StatusCell>,
}

impl MpvBackend {
    pub async fn spawn(
        audio_device: Option<&str>,
        log_file: Option<&std::path::Path>,
    ) -> anyhow::Result<Self> {
        let socket_path = std::env::temp_dir().join("nimbus-mpv.sock");
        let _ = std::fs::remove_file(&socket_path);

        let mut cmd = Command::new("mpv");
        cmd.args([
            "--no-video",
            "--idle=yes",
            "--input-terminal=no",
            // quiet on the terminal; warnings come back over IPC instead
            "--really-quiet",
            "--audio-channels=stereo",
            "--audio-samplerate=48000",
        ]);
        if let Some(dev) = audio_device {
            cmd.arg(format!("--audio-device={dev}"));
        }
        if let Some(p) = log_file {
            cmd.arg(format!("--log-file={}", p.display()));
        }
        let child = cmd
            .arg(format!("--input-ipc-server={}", socket_path.display()))
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn()
            .context("spawn mpv")?;

        // mpv creates the socket shortly after starting.
        let stream = connect_with_retry(&socket_path).await?;
        let (reader, writer) = tokio::io::split(stream);

        let status = Arc::new(StatusCell::new());
        tokio::spawn(read_events_loop(reader, status.clone()));

        let this = Self {
            child,
            socket_path,
            writer: tokio::sync::Mutex::new(writer),
            request_id: AtomicU64::new(1),
            status,
        };

        this.command(json!({"command": ["request_log_messages", "warn"]}))
            .await?;
        for (id, prop) in [
            (1, "time-pos"),
            (2, "duration"),
            (3, "pause"),
            (4, "eof-reached"),
            (5, "idle-active"),
        ] {
            this.command(json!({"command": ["observe_property", id, prop]}))
                .await?;
        }

        Ok(this)
    }

    async fn command(&self, mut v: serde_json::Value) -> Result<(), PlaybackError> {
        // Tag requests so error replies can be correlated on the read side.
        if v.get("request_id").is_none() {
            let id = self.request_id.fetch_add(1, Ordering::Relaxed);
            if let serde_json::Value::Object(ref mut o) = v {
                o.insert("request_id".to_string(), serde_json::Value::from(id));
            }
        }
        let mut line =
            serde_json::to_vec(&v).map_err(|e| PlaybackError::Ipc(format!("encode: {e}")))?;
        line.push(b'\n');

        let mut w = self.writer.lock().await;
        w.write_all(&line)
            .await
            .map_err(|e| PlaybackError::Ipc(format!("write: {e}")))?;
        w.flush()
            .await
            .map_err(|e| PlaybackError::Ipc(format!("flush: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl AudioBackend for MpvBackend {
    async fn load(&self, url: &str) -> Result<(), PlaybackError> {
        self.command(json!({"command": ["loadfile", url, "replace"]}))
            .await?;
        self.command(json!({"command": ["set_property", "pause", false]}))
            .await?;
        self.status.set_position(0.0);
        self.status.set_duration(0.0);
        self.status.paused.store(false, Ordering::Relaxed);
        self.status.idle.store(false, Ordering::Relaxed);
        Ok(())
    }

    async fn play(&self) -> Result<(), PlaybackError> {
        self.command(json!({"command": ["set_property", "pause", false]}))
            .await?;
        self.status.paused.store(false, Ordering::Relaxed);
        Ok(())
    }

    async fn pause(&self) -> Result<(), PlaybackError> {
        self.command(json!({"command": ["set_property", "pause", true]}))
            .await?;
        self.status.paused.store(true, Ordering::Relaxed);
        Ok(())
    }

    async fn stop(&self) -> Result<(), PlaybackError> {
        self.command(json!({"command": ["stop"]})).await?;
        self.status.set_position(0.0);
        self.status.set_duration(0.0);
        self.status.idle.store(true, Ordering::Relaxed);
        Ok(())
    }

    async fn seek(&self, position_secs: f64) -> Result<(), PlaybackError> {
        let duration = self.duration_secs();
        let target = if duration > 0.0 {
            position_secs.clamp(0.0, duration)
        } else {
            position_secs.max(0.0)
        };
        self.command(json!({"command": ["seek", target, "absolute"]}))
            .await?;
        self.status.set_position(target);
        Ok(())
    }

    async fn set_volume(&self, volume_0_100: u8) -> Result<(), PlaybackError> {
        self.command(json!({"command": ["set_property", "volume", volume_0_100.min(100)]}))
            .await
    }

    fn position_secs(&self) -> f64 {
        self.status.position()
    }

    fn duration_secs(&self) -> f64 {
        self.status.duration()
    }

    fn is_playing(&self) -> bool {
        !self.status.paused.load(Ordering::Relaxed) && !self.status.idle.load(Ordering::Relaxed)
    }
}

impl Drop for MpvBackend {
    fn drop(&mut self) {
        let _ = self.child.start_kill();
        let _ = std::fs::remove_file(&self.socket_path);
    }
}

async fn connect_with_retry(path: &PathBuf) -> anyhow::Result<UnixStream> {
    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(5);
    loop {
        match UnixStream::connect(path).await {
            Ok(s) => return Ok(s),
            Err(e) => {
                if tokio::time::Instant::now() > deadline {
                    return Err(e).with_context(|| format!("connect to mpv ipc {}", path.display()));
                }
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            }
        }
    }
}

async fn read_events_loop(reader: tokio::io::ReadHalf<UnixStream>, status: Arc<StatusCell>) {
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let Ok(v) = serde_json::from_str::<serde_json::Value>(&line) else {
            continue;
        };
        // Command replies: {"request_id":..., "error":"..."}
        if let (Some(rid), Some(err)) = (v.get("request_id"), v.get("error"))
            && let Some(err_s) = err.as_str()
            && err_s != "success"
        {
            tracing::warn!(request_id = %rid, error = err_s, "mpv command rejected");
        }
        apply_mpv_event(&v, &status);
    }
}

fn apply_mpv_event(v: &serde_json::Value, status: &StatusCell) {
    let Some(event) = v.get("event").and_then(|e| e.as_str()) else {
        return;
    };
    match event {
        "property-change" => {
            let Some(name) = v.get("name").and_then(|n| n.as_str()) else {
                return;
            };
            let data = v.get("data");
            match name {
                // data is null while idle; keep the last value then
                "time-pos" => {
                    if let Some(secs) = data.and_then(|d| d.as_f64()) {
                        status.set_position(secs);
                    }
                }
                "duration" => {
                    if let Some(secs) = data.and_then(|d| d.as_f64()) {
                        status.set_duration(secs);
                    }
                }
                "pause" => {
                    let paused = data.and_then(|d| d.as_bool()).unwrap_or(false);
                    status.paused.store(paused, Ordering::Relaxed);
                }
                "eof-reached" => {
                    if data.and_then(|d| d.as_bool()).unwrap_or(false) {
                        status.idle.store(true, Ordering::Relaxed);
                    }
                }
                "idle-active" => {
                    let idle = data.and_then(|d| d.as_bool()).unwrap_or(false);
                    status.idle.store(idle, Ordering::Relaxed);
                }
                _ => {}
            }
        }
        "end-file" => {
            status.idle.store(true, Ordering::Relaxed);
            let reason = v.get("reason").and_then(|x| x.as_str()).unwrap_or("");
            if reason == "error" {
                let err = v.get("error").and_then(|x| x.as_str()).unwrap_or("unknown");
                tracing::warn!(error = err, "mpv end-file error");
            }
        }
        "log-message" => {
            let level = v.get("level").and_then(|l| l.as_str()).unwrap_or("info");
            let text = v.get("text").and_then(|t| t.as_str()).unwrap_or("").trim();
            if (level == "warn" || level == "error") && !text.is_empty() {
                tracing::warn!(target: "mpv", "{level}: {text}");
            }
        }
        _ => {}
    }
}
