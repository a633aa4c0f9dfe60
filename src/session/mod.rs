//! Playback session: the state machine that owns the audio backend, drives
//! the track queue, and keeps lyric highlighting in step with playback.
//!
//! One sampling task runs per generation. Every user command and every
//! async result is applied under the control lock with a generation check,
//! so stale work (an old resolution, an old sampling loop, an in-flight
//! auto-advance) becomes a no-op instead of mutating shared state.

use crate::lyrics::LyricTrack;
use crate::metadata::{MetadataFacade, MetadataSource};
use crate::ncm::models::TrackRef;
use crate::player::{AudioBackend, PlaybackError};
use crate::queue::SharedQueue;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Slack when deciding a track has reached its known duration.
const END_EPSILON: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackStatus {
    #[default]
    Stopped,
    Loading,
    Playing,
    Paused,
}

/// Read-only snapshot for the presentation layer.
#[derive(Debug, Clone, Default)]
pub struct PlaybackState {
    pub status: PlaybackStatus,
    pub current_track: Option<TrackRef>,
    pub position_secs: f64,
    pub duration_secs: f64,
    pub lyric_index: usize,
    pub queue_mode: bool,
}

/// Out-of-band events for the presentation layer (toasts, dialogs).
#[derive(Debug, Clone)]
pub enum Notice {
    /// The attempted track cannot start; fatal for that track only.
    LoadFailed { track: TrackRef, reason: String },
    /// The engine itself failed; playback stopped.
    TransportFailed { reason: String },
    /// Lyrics or artwork missing; playback continues degraded.
    MetadataDegraded {
        track: TrackRef,
        field: &'static str,
        reason: String,
    },
    /// Queue mode ran out of tracks.
    EndOfQueue,
}

/// Sampling cadence and the look-ahead threshold. The 1-second default is
/// the inherited heuristic, kept as policy rather than hard-coded.
#[derive(Debug, Clone)]
pub struct PlaybackTuning {
    pub tick_interval: Duration,
    pub lookahead_secs: f64,
}

impl Default for PlaybackTuning {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(100),
            lookahead_secs: 1.0,
        }
    }
}

#[derive(Default)]
struct StateInner {
    status: PlaybackStatus,
    current: Option<TrackRef>,
    position_secs: f64,
    duration_secs: f64,
    lyrics: LyricTrack,
    lyric_index: usize,
    artwork: Option<Arc<Vec<u8>>>,
    queue_mode: bool,
    /// Look-ahead already consumed the queue for the current track.
    advance_fired: bool,
    /// Queue exhausted; stop at the current track's natural end.
    end_of_queue: bool,
}

#[derive(Default)]
struct Shared {
    state: Mutex<StateInner>,
    generation: AtomicU64,
    /// Serializes adapter transport calls and terminal transitions.
    ctrl: tokio::sync::Mutex<()>,
}

pub struct PlaybackSession<B, S> {
    backend: Arc<B>,
    metadata: Arc<MetadataFacade<S>>,
    queue: SharedQueue,
    shared: Arc<Shared>,
    notices: mpsc::Sender<Notice>,
    tuning: PlaybackTuning,
}

impl<B, S> Clone for PlaybackSession<B, S> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            metadata: self.metadata.clone(),
            queue: self.queue.clone(),
            shared: self.shared.clone(),
            notices: self.notices.clone(),
            tuning: self.tuning.clone(),
        }
    }
}

enum Tick {
    Running,
    Idle,
    Finished,
    Stale,
}

impl<B: AudioBackend, S: MetadataSource> PlaybackSession<B, S> {
    pub fn new(
        backend: B,
        metadata: MetadataFacade<S>,
        queue: SharedQueue,
        tuning: PlaybackTuning,
    ) -> (Self, mpsc::Receiver<Notice>) {
        let (tx, rx) = mpsc::channel(64);
        let session = Self {
            backend: Arc::new(backend),
            metadata: Arc::new(metadata),
            queue,
            shared: Arc::new(Shared::default()),
            notices: tx,
            tuning,
        };
        (session, rx)
    }

    /// Start playing `track`. Resolution runs on a background task so the
    /// command surface never blocks on network I/O; the session is in
    /// `Loading` until the audio URL decision lands.
    pub fn play(&self, track: TrackRef) {
        let r#gen = self.bump_generation();
        {
            let mut st = self.shared.state.lock().unwrap();
            st.status = PlaybackStatus::Loading;
            st.current = Some(track.clone());
            st.position_secs = 0.0;
            st.duration_secs = 0.0;
            st.lyrics = LyricTrack::default();
            st.lyric_index = 0;
            st.artwork = None;
            st.advance_fired = false;
            st.end_of_queue = false;
        }
        info!(track = %track.name, "resolving stream");
        // Three independent fetches: the audio URL gates the start, lyrics
        // and artwork arrive whenever they arrive.
        let this = self.clone();
        let t = track.clone();
        tokio::spawn(async move { this.start_track(r#gen, t).await });
        let this = self.clone();
        tokio::spawn(async move { this.refresh_side(r#gen, track).await });
    }

    /// Playing <-> Paused; no-op from Stopped or Loading.
    pub async fn toggle_pause(&self) -> Result<(), PlaybackError> {
        let _ctrl = self.shared.ctrl.lock().await;
        let status = self.shared.state.lock().unwrap().status;
        match status {
            PlaybackStatus::Playing => {
                self.backend.pause().await?;
                self.shared.state.lock().unwrap().status = PlaybackStatus::Paused;
            }
            PlaybackStatus::Paused => {
                self.backend.play().await?;
                self.shared.state.lock().unwrap().status = PlaybackStatus::Playing;
            }
            _ => {}
        }
        Ok(())
    }

    /// Absolute seek, clamped into `[0, duration]`. Only meaningful while
    /// Playing or Paused.
    pub async fn seek(&self, position_secs: f64) -> Result<(), PlaybackError> {
        let _ctrl = self.shared.ctrl.lock().await;
        let (status, duration) = {
            let st = self.shared.state.lock().unwrap();
            (st.status, st.duration_secs)
        };
        if !matches!(status, PlaybackStatus::Playing | PlaybackStatus::Paused) {
            return Ok(());
        }
        let target = if duration > 0.0 {
            position_secs.clamp(0.0, duration)
        } else {
            position_secs.max(0.0)
        };
        self.backend.seek(target).await?;
        let mut st = self.shared.state.lock().unwrap();
        st.position_secs = target;
        st.lyric_index = st.lyrics.index_at(target);
        Ok(())
    }

    /// Halt playback and sampling. The generation is invalidated before the
    /// transport call, so in-flight fetches and loops die quietly.
    pub async fn stop(&self) -> Result<(), PlaybackError> {
        let _ctrl = self.shared.ctrl.lock().await;
        self.enter_stopped();
        self.backend.stop().await
    }

    /// Whether near-completion auto-advances through the queue.
    pub fn set_queue_mode(&self, enabled: bool) {
        let mut st = self.shared.state.lock().unwrap();
        st.queue_mode = enabled;
        if enabled {
            st.end_of_queue = false;
        }
    }

    pub async fn set_volume(&self, volume_0_100: u8) -> Result<(), PlaybackError> {
        self.backend.set_volume(volume_0_100).await
    }

    pub fn state(&self) -> PlaybackState {
        let st = self.shared.state.lock().unwrap();
        PlaybackState {
            status: st.status,
            current_track: st.current.clone(),
            position_secs: st.position_secs,
            duration_secs: st.duration_secs,
            lyric_index: st.lyric_index,
            queue_mode: st.queue_mode,
        }
    }

    #[allow(dead_code)]
    pub fn lyrics(&self) -> LyricTrack {
        self.shared.state.lock().unwrap().lyrics.clone()
    }

    #[allow(dead_code)]
    pub fn artwork(&self) -> Option<Arc<Vec<u8>>> {
        self.shared.state.lock().unwrap().artwork.clone()
    }

    /// Text of the highlighted lyric line, if any lyrics are loaded.
    pub fn current_lyric_line(&self) -> Option<String> {
        let st = self.shared.state.lock().unwrap();
        st.lyrics.line(st.lyric_index).map(|l| l.text.clone())
    }

    fn bump_generation(&self) -> u64 {
        self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn is_current(&self, r#gen: u64) -> bool {
        self.shared.generation.load(Ordering::SeqCst) == r#gen
    }

    fn notify(&self, notice: Notice) {
        if let Err(e) = self.notices.try_send(notice) {
            debug!("notice dropped: {e}");
        }
    }

    /// Terminal transition. Bumps the generation first so every in-flight
    /// task for the old one no-ops.
    fn enter_stopped(&self) {
        self.bump_generation();
        let mut st = self.shared.state.lock().unwrap();
        st.status = PlaybackStatus::Stopped;
        st.current = None;
        st.position_secs = 0.0;
        st.duration_secs = 0.0;
        st.lyrics = LyricTrack::default();
        st.lyric_index = 0;
        st.artwork = None;
        st.advance_fired = false;
        st.end_of_queue = false;
    }

    async fn start_transport(&self, url: &str) -> Result<(), PlaybackError> {
        self.backend.load(url).await?;
        self.backend.play().await
    }

    async fn start_track(&self, r#gen: u64, track: TrackRef) {
        // The audio URL is the only thing the sampling loop needs to start;
        // lyrics and artwork follow asynchronously.
        let resolved = self.metadata.resolve_audio_url(track.id).await;

        let _ctrl = self.shared.ctrl.lock().await;
        if !self.is_current(r#gen) {
            debug!(track = %track.name, "discarding stale resolution");
            return;
        }
        let url = match resolved {
            Ok(u) => u,
            Err(e) => {
                warn!(track = %track.name, error = %e, "audio url resolution failed");
                self.enter_stopped();
                self.notify(Notice::LoadFailed {
                    track,
                    reason: e.to_string(),
                });
                return;
            }
        };
        if let Err(e) = self.start_transport(&url).await {
            warn!(track = %track.name, error = %e, "transport failed");
            self.enter_stopped();
            self.notify(Notice::TransportFailed {
                reason: e.to_string(),
            });
            return;
        }
        {
            let mut st = self.shared.state.lock().unwrap();
            st.status = PlaybackStatus::Playing;
            st.position_secs = 0.0;
            st.duration_secs = 0.0;
            st.lyric_index = 0;
        }
        info!(track = %track.name, "playing");

        let this = self.clone();
        tokio::spawn(async move { this.sampling_loop(r#gen).await });
    }

    /// Fetch lyrics + artwork and apply them if the generation still
    /// matches. Failures degrade the UI, never the playback.
    async fn refresh_side(&self, r#gen: u64, track: TrackRef) {
        let side = self.metadata.resolve_side(&track).await;
        if !self.is_current(r#gen) {
            return;
        }
        let mut degraded: Vec<(&'static str, String)> = Vec::new();
        {
            let mut st = self.shared.state.lock().unwrap();
            match side.lyrics {
                Ok(lyrics) => {
                    st.lyric_index = lyrics.index_at(st.position_secs);
                    st.lyrics = lyrics;
                }
                Err(e) => {
                    degraded.push(("lyrics", e.to_string()));
                    st.lyrics = LyricTrack::default();
                    st.lyric_index = 0;
                }
            }
            match side.artwork {
                Ok(bytes) => st.artwork = Some(Arc::new(bytes)),
                Err(e) => {
                    degraded.push(("artwork", e.to_string()));
                    st.artwork = None;
                }
            }
        }
        for (field, reason) in degraded {
            warn!(track = %track.name, field, %reason, "metadata fetch degraded");
            self.notify(Notice::MetadataDegraded {
                track: track.clone(),
                field,
                reason,
            });
        }
    }

    async fn sampling_loop(&self, r#gen: u64) {
        let mut ticker = tokio::time::interval(self.tuning.tick_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            match self.sample_tick(r#gen).await {
                Tick::Running | Tick::Idle => {}
                Tick::Finished | Tick::Stale => break,
            }
        }
    }

    // Returns a boxed `Send` future rather than `async fn` so this method has
    // no opaque return type. The auto-advance path spawns `advance_to`, which
    // spawns `sampling_loop`, which awaits this — an opaque-type cycle the
    // compiler refuses to resolve ("hidden types inside the defining scope").
    // Boxing the definition removes the opaque and breaks the cycle; behavior
    // is unchanged.
    fn sample_tick(
        &self,
        r#gen: u64,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Tick> + Send + '_>> {
        Box::pin(async move {
        if !self.is_current(r#gen) {
            return Tick::Stale;
        }

        let (queue_mode, advance_fired, end_of_queue) = {
            let st = self.shared.state.lock().unwrap();
            match st.status {
                PlaybackStatus::Paused => return Tick::Idle,
                PlaybackStatus::Playing => {}
                _ => return Tick::Stale,
            }
            (st.queue_mode, st.advance_fired, st.end_of_queue)
        };

        let duration = self.backend.duration_secs();
        let mut position = self.backend.position_secs();
        if duration > 0.0 {
            position = position.min(duration);
        }
        let playing = self.backend.is_playing();

        {
            let mut st = self.shared.state.lock().unwrap();
            st.position_secs = position;
            st.duration_secs = duration;
            st.lyric_index = st.lyrics.index_at(position);
        }

        // Look-ahead. Duration 0 means "unknown", never a trigger.
        if queue_mode
            && !advance_fired
            && !end_of_queue
            && duration > 0.0
            && duration - position <= self.tuning.lookahead_secs
        {
            match self.queue.advance() {
                Some(next) => {
                    self.shared.state.lock().unwrap().advance_fired = true;
                    info!(track = %next.name, "look-ahead: preloading next track");
                    let this = self.clone();
                    tokio::spawn(async move { this.advance_to(r#gen, next).await });
                }
                None => {
                    {
                        let mut st = self.shared.state.lock().unwrap();
                        st.queue_mode = false;
                        st.end_of_queue = true;
                    }
                    info!("queue exhausted; stopping after current track");
                    self.notify(Notice::EndOfQueue);
                }
            }
        }

        // Natural end: the engine went quiet with the clock at a known
        // duration.
        if !playing && duration > 0.0 && position >= duration - END_EPSILON {
            let _ctrl = self.shared.ctrl.lock().await;
            if self.is_current(r#gen) {
                self.enter_stopped();
                return Tick::Finished;
            }
            return Tick::Stale;
        }

        Tick::Running
        })
    }

    /// Apply a look-ahead advance: resolve the next track's URL (possibly
    /// overlapping the tail of the current one), then switch the adapter —
    /// but only if no user command superseded us in the meantime.
    async fn advance_to(&self, parent_gen: u64, next: TrackRef) {
        let resolved = self.metadata.resolve_audio_url(next.id).await;

        let _ctrl = self.shared.ctrl.lock().await;
        if !self.is_current(parent_gen) {
            debug!(track = %next.name, "auto-advance superseded; dropped");
            return;
        }

        let url = match resolved {
            Ok(u) => u,
            Err(e) => {
                // The current track keeps playing to its natural end.
                warn!(track = %next.name, error = %e, "auto-advance resolution failed");
                {
                    let mut st = self.shared.state.lock().unwrap();
                    st.queue_mode = false;
                    st.end_of_queue = true;
                }
                self.notify(Notice::LoadFailed {
                    track: next,
                    reason: e.to_string(),
                });
                return;
            }
        };

        let r#gen = self.bump_generation();
        if let Err(e) = self.start_transport(&url).await {
            warn!(track = %next.name, error = %e, "transport failed on auto-advance");
            self.enter_stopped();
            self.notify(Notice::TransportFailed {
                reason: e.to_string(),
            });
            return;
        }
        {
            let mut st = self.shared.state.lock().unwrap();
            st.status = PlaybackStatus::Playing;
            st.current = Some(next.clone());
            st.position_secs = 0.0;
            st.duration_secs = 0.0;
            st.lyrics = LyricTrack::default();
            st.lyric_index = 0;
            st.artwork = None;
            st.advance_fired = false;
            st.end_of_queue = false;
        }
        info!(track = %next.name, "auto-advanced");

        let this = self.clone();
        tokio::spawn(async move { this.sampling_loop(r#gen).await });
        let this = self.clone();
        tokio::spawn(async move { this.refresh_side(r#gen, next).await });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ncm::api::ResolveError;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use tokio::sync::Notify;

    #[derive(Default)]
    struct FakeInner {
        position: f64,
        duration: f64,
        playing: bool,
        loaded: Vec<String>,
        fail_transport: bool,
    }

    #[derive(Clone, Default)]
    struct FakeBackend {
        inner: Arc<Mutex<FakeInner>>,
    }

    impl FakeBackend {
        fn set_progress(&self, position: f64, duration: f64) {
            let mut i = self.inner.lock().unwrap();
            i.position = position;
            i.duration = duration;
        }

        fn set_playing(&self, playing: bool) {
            self.inner.lock().unwrap().playing = playing;
        }

        fn loaded(&self) -> Vec<String> {
            self.inner.lock().unwrap().loaded.clone()
        }
    }

    #[async_trait]
    impl AudioBackend for FakeBackend {
        async fn load(&self, url: &str) -> Result<(), PlaybackError> {
            let mut i = self.inner.lock().unwrap();
            if i.fail_transport {
                return Err(PlaybackError::Ipc("fake engine down".into()));
            }
            i.loaded.push(url.to_string());
            i.position = 0.0;
            i.duration = 0.0;
            i.playing = true;
            Ok(())
        }

        async fn play(&self) -> Result<(), PlaybackError> {
            self.inner.lock().unwrap().playing = true;
            Ok(())
        }

        async fn pause(&self) -> Result<(), PlaybackError> {
            self.inner.lock().unwrap().playing = false;
            Ok(())
        }

        async fn stop(&self) -> Result<(), PlaybackError> {
            let mut i = self.inner.lock().unwrap();
            i.playing = false;
            i.position = 0.0;
            i.duration = 0.0;
            Ok(())
        }

        async fn seek(&self, position_secs: f64) -> Result<(), PlaybackError> {
            let mut i = self.inner.lock().unwrap();
            i.position = if i.duration > 0.0 {
                position_secs.clamp(0.0, i.duration)
            } else {
                position_secs.max(0.0)
            };
            Ok(())
        }

        async fn set_volume(&self, _volume_0_100: u8) -> Result<(), PlaybackError> {
            Ok(())
        }

        fn position_secs(&self) -> f64 {
            self.inner.lock().unwrap().position
        }

        fn duration_secs(&self) -> f64 {
            self.inner.lock().unwrap().duration
        }

        fn is_playing(&self) -> bool {
            self.inner.lock().unwrap().playing
        }
    }

    #[derive(Default)]
    struct ScriptedSource {
        fail_url: HashSet<u64>,
        fail_lyrics: bool,
        fail_artwork: bool,
        /// Hold this id's URL resolution until the Notify fires.
        url_gate: Option<(u64, Arc<Notify>)>,
    }

    #[async_trait]
    impl MetadataSource for ScriptedSource {
        async fn audio_url(&self, track_id: u64) -> Result<String, ResolveError> {
            if let Some((gated, notify)) = &self.url_gate
                && *gated == track_id
            {
                notify.notified().await;
            }
            if self.fail_url.contains(&track_id) {
                Err(ResolveError::NoStream(track_id))
            } else {
                Ok(format!("https://cdn.test/{track_id}"))
            }
        }

        async fn raw_lyrics(&self, track_id: u64) -> Result<String, ResolveError> {
            if self.fail_lyrics {
                Err(ResolveError::Rejected(track_id as i64))
            } else {
                Ok("[00:00.00]line one\n[00:10.00]line two".to_string())
            }
        }

        async fn artwork(&self, track_id: u64) -> Result<Vec<u8>, ResolveError> {
            if self.fail_artwork {
                Err(ResolveError::NoArtwork(track_id))
            } else {
                Ok(vec![1, 2, 3])
            }
        }
    }

    type TestSession = PlaybackSession<FakeBackend, ScriptedSource>;

    fn make_session(
        source: ScriptedSource,
    ) -> (TestSession, mpsc::Receiver<Notice>, FakeBackend, SharedQueue) {
        let backend = FakeBackend::default();
        let queue = SharedQueue::new();
        let (session, rx) = PlaybackSession::new(
            backend.clone(),
            MetadataFacade::new(source, 8),
            queue.clone(),
            PlaybackTuning::default(),
        );
        (session, rx, backend, queue)
    }

    fn track(id: u64) -> TrackRef {
        TrackRef {
            id,
            name: format!("Track {id}"),
        }
    }

    /// Let spawned tasks (no timers involved) run to completion.
    async fn settle() {
        for _ in 0..50 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_url_failure_stops_session() {
        let (session, mut rx, backend, _queue) = make_session(ScriptedSource {
            fail_url: HashSet::from([1]),
            ..Default::default()
        });

        session.play(track(1));
        settle().await;

        let st = session.state();
        assert_eq!(st.status, PlaybackStatus::Stopped);
        assert!(st.current_track.is_none());
        assert!(backend.loaded().is_empty());

        // exactly one notification
        assert!(matches!(rx.try_recv(), Ok(Notice::LoadFailed { track, .. }) if track.id == 1));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_lyric_failure_is_non_fatal() {
        let (session, mut rx, _backend, _queue) = make_session(ScriptedSource {
            fail_lyrics: true,
            ..Default::default()
        });

        session.play(track(1));
        settle().await;

        let st = session.state();
        assert_eq!(st.status, PlaybackStatus::Playing);
        assert_eq!(st.lyric_index, 0);
        assert!(session.lyrics().is_empty());
        assert!(session.artwork().is_some());

        assert!(matches!(
            rx.try_recv(),
            Ok(Notice::MetadataDegraded { field: "lyrics", .. })
        ));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_resolution_is_discarded() {
        let gate = Arc::new(Notify::new());
        let (session, _rx, backend, _queue) = make_session(ScriptedSource {
            url_gate: Some((1, gate.clone())),
            ..Default::default()
        });

        session.play(track(1)); // resolution for 1 hangs on the gate
        settle().await;
        session.play(track(2));
        settle().await;

        assert_eq!(session.state().current_track.unwrap().id, 2);

        gate.notify_one(); // 1's resolution finally lands
        settle().await;

        let st = session.state();
        assert_eq!(st.status, PlaybackStatus::Playing);
        assert_eq!(st.current_track.unwrap().id, 2);
        // the stale result never touched the adapter
        assert_eq!(backend.loaded(), vec!["https://cdn.test/2".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_advance_switches_without_stopping() {
        let (session, mut rx, backend, queue) = make_session(ScriptedSource::default());
        queue.replace(vec![track(1), track(2)], Some(0));
        session.set_queue_mode(true);

        session.play(track(1));
        settle().await;
        assert_eq!(session.state().status, PlaybackStatus::Playing);

        backend.set_progress(199.2, 200.0);
        tokio::time::sleep(Duration::from_millis(500)).await;
        settle().await;

        let st = session.state();
        assert_eq!(st.status, PlaybackStatus::Playing);
        assert_eq!(st.current_track.unwrap().id, 2);
        assert_eq!(
            backend.loaded(),
            vec![
                "https://cdn.test/1".to_string(),
                "https://cdn.test/2".to_string()
            ]
        );
        assert_eq!(queue.current().unwrap().id, 2);
        // no end-of-queue, no failure
        while let Ok(n) = rx.try_recv() {
            assert!(!matches!(n, Notice::EndOfQueue));
            assert!(!matches!(n, Notice::LoadFailed { .. }));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_queue_exhaustion_stops_after_natural_end() {
        let (session, mut rx, backend, queue) = make_session(ScriptedSource::default());
        queue.replace(vec![track(1)], Some(0));
        session.set_queue_mode(true);

        session.play(track(1));
        settle().await;

        backend.set_progress(199.5, 200.0);
        tokio::time::sleep(Duration::from_millis(300)).await;
        settle().await;

        // exhaustion noticed, but the track is still finishing
        assert_eq!(session.state().status, PlaybackStatus::Playing);
        assert!(!session.state().queue_mode);
        let mut saw_end_of_queue = false;
        while let Ok(n) = rx.try_recv() {
            if matches!(n, Notice::EndOfQueue) {
                saw_end_of_queue = true;
            }
        }
        assert!(saw_end_of_queue);

        backend.set_progress(200.0, 200.0);
        backend.set_playing(false);
        tokio::time::sleep(Duration::from_millis(300)).await;
        settle().await;

        let st = session.state();
        assert_eq!(st.status, PlaybackStatus::Stopped);
        assert!(st.current_track.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_toggle_is_idempotent() {
        let (session, _rx, backend, _queue) = make_session(ScriptedSource::default());
        session.play(track(1));
        settle().await;

        backend.set_progress(42.0, 100.0);
        tokio::time::sleep(Duration::from_millis(150)).await;
        settle().await;
        let before = session.state().position_secs;

        session.toggle_pause().await.unwrap();
        assert_eq!(session.state().status, PlaybackStatus::Paused);
        session.toggle_pause().await.unwrap();
        settle().await;

        let st = session.state();
        assert_eq!(st.status, PlaybackStatus::Playing);
        assert_eq!(st.position_secs, before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_toggle_pause_noop_when_stopped() {
        let (session, _rx, _backend, _queue) = make_session(ScriptedSource::default());
        session.toggle_pause().await.unwrap();
        assert_eq!(session.state().status, PlaybackStatus::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_seek_clamps_to_duration() {
        let (session, _rx, backend, _queue) = make_session(ScriptedSource::default());
        session.play(track(1));
        settle().await;

        backend.set_progress(10.0, 100.0);
        tokio::time::sleep(Duration::from_millis(150)).await;
        settle().await;

        session.seek(500.0).await.unwrap();
        assert_eq!(session.state().position_secs, 100.0);
        assert_eq!(backend.position_secs(), 100.0);

        session.seek(-5.0).await.unwrap();
        assert_eq!(session.state().position_secs, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_clears_everything() {
        let (session, _rx, backend, _queue) = make_session(ScriptedSource::default());
        session.play(track(1));
        settle().await;
        assert_eq!(session.state().status, PlaybackStatus::Playing);

        session.stop().await.unwrap();
        let st = session.state();
        assert_eq!(st.status, PlaybackStatus::Stopped);
        assert!(st.current_track.is_none());
        assert!(!backend.is_playing());
    }

    #[tokio::test(start_paused = true)]
    async fn test_lyric_index_follows_position() {
        let (session, _rx, backend, _queue) = make_session(ScriptedSource::default());
        session.play(track(1));
        settle().await;

        // scripted lyrics: line one at 0s, line two at 10s
        backend.set_progress(3.0, 100.0);
        tokio::time::sleep(Duration::from_millis(150)).await;
        settle().await;
        assert_eq!(session.state().lyric_index, 0);
        assert_eq!(session.current_lyric_line().unwrap(), "line one");

        backend.set_progress(12.0, 100.0);
        tokio::time::sleep(Duration::from_millis(150)).await;
        settle().await;
        assert_eq!(session.state().lyric_index, 1);
        assert_eq!(session.current_lyric_line().unwrap(), "line two");
    }
}
