use serde::{Deserialize, Serialize};

/// A playable unit: catalog id plus the display string shown to the user.
/// Immutable once built; the queue and playback session pass these around.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackRef {
    pub id: u64,
    pub name: String,
}

/// One row of a catalog search result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackSummary {
    pub id: u64,
    pub name: String,
    pub artists: Vec<String>,
    pub album: Option<String>,
    pub duration_seconds: Option<u32>,
}

impl TrackSummary {
    /// "Title - Artist, Artist" (just the title when artists are unknown).
    pub fn display_line(&self) -> String {
        if self.artists.is_empty() {
            self.name.clone()
        } else {
            format!("{} - {}", self.name, self.artists.join(", "))
        }
    }

    pub fn to_ref(&self) -> TrackRef {
        TrackRef {
            id: self.id,
            name: self.display_line(),
        }
    }
}
