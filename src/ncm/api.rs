use crate::metadata::MetadataSource;
use crate::ncm::auth::Session;
use crate::ncm::models::TrackSummary;
use anyhow::Context;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use reqwest::header::{COOKIE, HeaderMap, HeaderValue, REFERER, USER_AGENT};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

pub const BASE_URL: &str = "https://music.163.com";

static DEFAULT_HEADERS: Lazy<HeaderMap> = Lazy::new(|| {
    let mut headers = HeaderMap::new();
    headers.insert(
        USER_AGENT,
        HeaderValue::from_static("Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36"),
    );
    headers.insert(REFERER, HeaderValue::from_static("https://music.163.com/"));
    headers
});

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("search request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("search rejected by server: code {0}")]
    Rejected(i64),
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("metadata request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("no streamable source for track {0}")]
    NoStream(u64),
    #[error("no artwork for track {0}")]
    NoArtwork(u64),
    #[error("server rejected request: code {0}")]
    Rejected(i64),
}

#[derive(Debug)]
struct Inner {
    http: reqwest::Client,
    session: Option<Session>,
}

/// Catalog client. Cheap to clone; every clone shares the HTTP pool and the
/// session cookies it was built with.
#[derive(Debug, Clone)]
pub struct NcmClient {
    inner: Arc<Inner>,
}

impl NcmClient {
    pub fn new(session: Option<Session>) -> anyhow::Result<Self> {
        let mut headers = DEFAULT_HEADERS.clone();
        if let Some(s) = &session
            && !s.cookie_header.is_empty()
        {
            headers.insert(COOKIE, HeaderValue::from_str(&s.cookie_header)?);
        }

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .context("build reqwest client")?;

        Ok(Self {
            inner: Arc::new(Inner { http, session }),
        })
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.inner.http
    }

    fn csrf(&self) -> &str {
        self.inner
            .session
            .as_ref()
            .and_then(|s| s.csrf.as_deref())
            .unwrap_or("")
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.inner.http.post(format!("{BASE_URL}{path}"))
    }

    /// Paginated song search; page numbering starts at 1.
    pub async fn search(
        &self,
        query: &str,
        page: u32,
        page_size: u32,
    ) -> Result<Vec<TrackSummary>, SearchError> {
        let limit = page_size.max(1).to_string();
        let offset = ((page.max(1) - 1) * page_size.max(1)).to_string();

        let v: Value = self
            .post("/api/cloudsearch/pc")
            .form(&[
                ("s", query),
                ("type", "1"),
                ("limit", limit.as_str()),
                ("offset", offset.as_str()),
                ("total", "true"),
                ("csrf_token", self.csrf()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let code = response_code(&v);
        if code != 200 {
            return Err(SearchError::Rejected(code));
        }
        Ok(extract_search_tracks(&v))
    }

    /// Full summaries for a set of ids, in the server's order.
    pub async fn track_details(&self, ids: &[u64]) -> Result<Vec<TrackSummary>, ResolveError> {
        let c = serde_json::to_string(
            &ids.iter()
                .map(|id| serde_json::json!({ "id": id }))
                .collect::<Vec<_>>(),
        )
        .unwrap_or_else(|_| "[]".into());

        let v: Value = self
            .post("/api/v3/song/detail")
            .form(&[("c", c.as_str()), ("csrf_token", self.csrf())])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let code = response_code(&v);
        if code != 200 {
            return Err(ResolveError::Rejected(code));
        }
        Ok(v.get("songs")
            .and_then(Value::as_array)
            .map(|songs| songs.iter().filter_map(track_from_song).collect())
            .unwrap_or_default())
    }

    /// Streamable URL for a track; a null URL from the server means the
    /// track is not playable (region lock, paid-only, taken down).
    pub async fn song_url(&self, track_id: u64) -> Result<String, ResolveError> {
        let ids = format!("[{track_id}]");
        let v: Value = self
            .post("/api/song/enhance/player/url")
            .form(&[
                ("ids", ids.as_str()),
                ("br", "320000"),
                ("csrf_token", self.csrf()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let code = response_code(&v);
        if code != 200 {
            return Err(ResolveError::Rejected(code));
        }
        v.pointer("/data/0/url")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or(ResolveError::NoStream(track_id))
    }

    /// Raw LRC text; empty when the catalog has no lyrics for the track.
    pub async fn lyric(&self, track_id: u64) -> Result<String, ResolveError> {
        let id = track_id.to_string();
        let v: Value = self
            .post("/api/song/lyric")
            .form(&[
                ("id", id.as_str()),
                ("lv", "-1"),
                ("tv", "-1"),
                ("csrf_token", self.csrf()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let code = response_code(&v);
        if code != 200 {
            return Err(ResolveError::Rejected(code));
        }
        Ok(v.pointer("/lrc/lyric")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string())
    }

    /// Album cover image bytes for a track.
    pub async fn artwork_bytes(&self, track_id: u64) -> Result<Vec<u8>, ResolveError> {
        let c = format!("[{{\"id\":{track_id}}}]");
        let v: Value = self
            .post("/api/v3/song/detail")
            .form(&[("c", c.as_str()), ("csrf_token", self.csrf())])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let code = response_code(&v);
        if code != 200 {
            return Err(ResolveError::Rejected(code));
        }
        let pic_url = v
            .pointer("/songs/0/al/picUrl")
            .and_then(Value::as_str)
            .ok_or(ResolveError::NoArtwork(track_id))?;

        let bytes = self
            .inner
            .http
            .get(pic_url)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl MetadataSource for NcmClient {
    async fn audio_url(&self, track_id: u64) -> Result<String, ResolveError> {
        self.song_url(track_id).await
    }

    async fn raw_lyrics(&self, track_id: u64) -> Result<String, ResolveError> {
        self.lyric(track_id).await
    }

    async fn artwork(&self, track_id: u64) -> Result<Vec<u8>, ResolveError> {
        self.artwork_bytes(track_id).await
    }
}

fn response_code(v: &Value) -> i64 {
    v.get("code").and_then(Value::as_i64).unwrap_or(200)
}

fn extract_search_tracks(v: &Value) -> Vec<TrackSummary> {
    v.pointer("/result/songs")
        .and_then(Value::as_array)
        .map(|songs| songs.iter().filter_map(track_from_song).collect())
        .unwrap_or_default()
}

fn track_from_song(song: &Value) -> Option<TrackSummary> {
    let id = song.get("id")?.as_u64()?;
    let name = song.get("name")?.as_str()?.to_string();
    let artists = song
        .get("ar")
        .and_then(Value::as_array)
        .map(|ar| {
            ar.iter()
                .filter_map(|a| a.get("name")?.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();
    let album = song
        .pointer("/al/name")
        .and_then(Value::as_str)
        .map(str::to_string);
    let duration_seconds = song
        .get("dt")
        .and_then(Value::as_u64)
        .map(|ms| (ms / 1000) as u32);

    Some(TrackSummary {
        id,
        name,
        artists,
        album,
        duration_seconds,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_search_tracks() {
        let v = json!({
            "code": 200,
            "result": {
                "songs": [
                    {
                        "id": 123,
                        "name": "Song A",
                        "ar": [{"name": "Artist 1"}, {"name": "Artist 2"}],
                        "al": {"name": "Album X", "picUrl": "https://img/1.jpg"},
                        "dt": 215_000
                    },
                    {"name": "missing id, dropped"},
                    {
                        "id": 456,
                        "name": "Song B"
                    }
                ]
            }
        });

        let tracks = extract_search_tracks(&v);
        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[0].id, 123);
        assert_eq!(tracks[0].artists, vec!["Artist 1", "Artist 2"]);
        assert_eq!(tracks[0].album.as_deref(), Some("Album X"));
        assert_eq!(tracks[0].duration_seconds, Some(215));
        assert_eq!(tracks[0].display_line(), "Song A - Artist 1, Artist 2");
        assert!(tracks[1].artists.is_empty());
        assert_eq!(tracks[1].display_line(), "Song B");
    }

    #[test]
    fn test_extract_empty_result() {
        assert!(extract_search_tracks(&json!({"code": 200})).is_empty());
        assert!(extract_search_tracks(&json!({"result": {"songs": []}})).is_empty());
    }
}
