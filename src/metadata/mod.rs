//! Thin coordination over the remote metadata collaborators.
//!
//! The three per-track fetches (audio URL, lyrics, artwork) run
//! independently and fail independently; one failing fetch never aborts the
//! others. The playback session decides fatal vs non-fatal per field.

use crate::lyrics::LyricTrack;
use crate::ncm::api::ResolveError;
use crate::ncm::models::TrackRef;
use async_trait::async_trait;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Mutex;

/// Remote resolution capability; implemented by the catalog client and by
/// test doubles.
#[async_trait]
pub trait MetadataSource: Send + Sync + 'static {
    async fn audio_url(&self, track_id: u64) -> Result<String, ResolveError>;

    /// Raw timestamped lyric text; an empty string means "no lyrics".
    async fn raw_lyrics(&self, track_id: u64) -> Result<String, ResolveError>;

    async fn artwork(&self, track_id: u64) -> Result<Vec<u8>, ResolveError>;
}

/// Lyrics and artwork for one track, each with its own outcome.
#[derive(Debug)]
pub struct SideMetadata {
    pub lyrics: Result<LyricTrack, ResolveError>,
    pub artwork: Result<Vec<u8>, ResolveError>,
}

/// Everything the session needs for one track, failures captured per field.
#[derive(Debug)]
pub struct ResolvedMetadata {
    pub audio_url: Result<String, ResolveError>,
    pub lyrics: Result<LyricTrack, ResolveError>,
    pub artwork: Result<Vec<u8>, ResolveError>,
}

pub struct MetadataFacade<S> {
    source: S,
    // Look-ahead preload resolves the next track's URL shortly before the
    // switch; the cache makes the switch itself a hit.
    url_cache: Mutex<LruCache<u64, String>>,
}

impl<S: MetadataSource> MetadataFacade<S> {
    pub fn new(source: S, url_cache_size: usize) -> Self {
        let cap = NonZeroUsize::new(url_cache_size.max(1)).unwrap();
        Self {
            source,
            url_cache: Mutex::new(LruCache::new(cap)),
        }
    }

    /// Resolve the streamable URL, read-through cached.
    pub async fn resolve_audio_url(&self, track_id: u64) -> Result<String, ResolveError> {
        if let Some(url) = self.url_cache.lock().unwrap().get(&track_id).cloned() {
            return Ok(url);
        }
        let url = self.source.audio_url(track_id).await?;
        self.url_cache.lock().unwrap().put(track_id, url.clone());
        Ok(url)
    }

    /// Lyrics and artwork together; neither failure affects the other.
    pub async fn resolve_side(&self, track: &TrackRef) -> SideMetadata {
        let (lyrics, artwork) = tokio::join!(
            self.source.raw_lyrics(track.id),
            self.source.artwork(track.id),
        );
        SideMetadata {
            lyrics: lyrics.map(|raw| LyricTrack::parse(&raw)),
            artwork,
        }
    }

    /// All three fetches for one track, each as its own `Result`.
    pub async fn resolve_for_track(&self, track: &TrackRef) -> ResolvedMetadata {
        let (audio_url, side) = tokio::join!(
            self.resolve_audio_url(track.id),
            self.resolve_side(track),
        );
        ResolvedMetadata {
            audio_url,
            lyrics: side.lyrics,
            artwork: side.artwork,
        }
    }
}
