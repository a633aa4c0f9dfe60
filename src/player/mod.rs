//! Audio backend capability interface.
//!
//! The playback session owns exactly one backend and is the only writer to
//! it. Keeping the engine behind this trait lets tests substitute a double
//! that simulates position and duration without real audio hardware.

pub mod mpv;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("player ipc failed: {0}")]
    Ipc(String),
}

/// Minimal transport contract over a native media engine.
///
/// Transport calls may fail if the engine is gone; failures are reported,
/// never swallowed here. Redundant calls (pausing while paused, stopping
/// while stopped) are no-ops, not errors.
#[async_trait]
pub trait AudioBackend: Send + Sync + 'static {
    /// Bind a new source and start from position 0.
    async fn load(&self, url: &str) -> Result<(), PlaybackError>;

    async fn play(&self) -> Result<(), PlaybackError>;

    async fn pause(&self) -> Result<(), PlaybackError>;

    /// After this returns, `is_playing` reports false.
    async fn stop(&self) -> Result<(), PlaybackError>;

    /// Target is clamped into `[0, duration]`.
    async fn seek(&self, position_secs: f64) -> Result<(), PlaybackError>;

    async fn set_volume(&self, volume_0_100: u8) -> Result<(), PlaybackError>;

    fn position_secs(&self) -> f64;

    /// `0.0` means "unknown" (metadata not available yet), not zero-length.
    fn duration_secs(&self) -> f64;

    fn is_playing(&self) -> bool;
}
