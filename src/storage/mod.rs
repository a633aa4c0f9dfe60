use crate::ncm::models::TrackRef;
use anyhow::Context;
use rusqlite::{Connection, params};
use std::path::Path;

/// Durable named collections of track references.
///
/// Create is idempotent-false (an existing name is reported, not clobbered);
/// add is idempotent by track id; delete removes unconditionally.
pub struct PlaylistStore {
    conn: Connection,
}

impl PlaylistStore {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create dir {}", parent.display()))?;
        }

        let conn = Connection::open(path).with_context(|| format!("open {}", path.display()))?;
        conn.pragma_update(None, "foreign_keys", true)
            .context("enable foreign keys")?;
        let s = Self { conn };
        s.init_schema()?;
        Ok(s)
    }

    fn init_schema(&self) -> anyhow::Result<()> {
        self.conn
            .execute_batch(
                r#"
CREATE TABLE IF NOT EXISTS playlists (
  name TEXT PRIMARY KEY,
  created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS playlist_tracks (
  playlist TEXT NOT NULL REFERENCES playlists(name) ON DELETE CASCADE,
  track_id INTEGER NOT NULL,
  name TEXT NOT NULL,
  position INTEGER NOT NULL,
  UNIQUE(playlist, track_id)
);

CREATE INDEX IF NOT EXISTS idx_playlist_tracks ON playlist_tracks(playlist, position);
"#,
            )
            .context("init schema")?;
        Ok(())
    }

    /// Returns false (and changes nothing) when the name already exists.
    pub fn create(&self, name: &str, now_unix: i64) -> anyhow::Result<bool> {
        let inserted = self
            .conn
            .execute(
                "INSERT OR IGNORE INTO playlists(name, created_at) VALUES(?1, ?2)",
                params![name, now_unix],
            )
            .context("create playlist")?;
        Ok(inserted > 0)
    }

    /// Add a track; false when the playlist is missing or the id is already
    /// in it.
    pub fn add(&self, playlist: &str, track: &TrackRef) -> anyhow::Result<bool> {
        if !self.exists(playlist)? {
            return Ok(false);
        }
        let inserted = self
            .conn
            .execute(
                r#"
INSERT OR IGNORE INTO playlist_tracks(playlist, track_id, name, position)
VALUES(?1, ?2, ?3,
  (SELECT COALESCE(MAX(position), -1) + 1 FROM playlist_tracks WHERE playlist=?1))
"#,
                params![playlist, track.id as i64, track.name],
            )
            .context("add track to playlist")?;
        Ok(inserted > 0)
    }

    pub fn remove(&self, playlist: &str, track_id: u64) -> anyhow::Result<()> {
        self.conn
            .execute(
                "DELETE FROM playlist_tracks WHERE playlist=?1 AND track_id=?2",
                params![playlist, track_id as i64],
            )
            .context("remove track from playlist")?;
        Ok(())
    }

    /// Removes the playlist and its tracks; missing names are not an error.
    pub fn delete(&self, name: &str) -> anyhow::Result<()> {
        self.conn
            .execute(
                "DELETE FROM playlist_tracks WHERE playlist=?1",
                params![name],
            )
            .context("delete playlist tracks")?;
        self.conn
            .execute("DELETE FROM playlists WHERE name=?1", params![name])
            .context("delete playlist")?;
        Ok(())
    }

    pub fn exists(&self, name: &str) -> anyhow::Result<bool> {
        let mut stmt = self
            .conn
            .prepare("SELECT 1 FROM playlists WHERE name=?1")
            .context("prepare playlist lookup")?;
        let found = stmt
            .exists(params![name])
            .context("query playlist lookup")?;
        Ok(found)
    }

    pub fn playlists(&self) -> anyhow::Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT name FROM playlists ORDER BY created_at, name")
            .context("prepare playlist list")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(names)
    }

    /// Tracks in insertion order.
    pub fn tracks(&self, playlist: &str) -> anyhow::Result<Vec<TrackRef>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT track_id, name FROM playlist_tracks WHERE playlist=?1 ORDER BY position",
            )
            .context("prepare playlist tracks")?;
        let tracks = stmt
            .query_map(params![playlist], |row| {
                let id: i64 = row.get(0)?;
                let name: String = row.get(1)?;
                Ok(TrackRef {
                    id: id as u64,
                    name,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(tracks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_store() -> (PlaylistStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = PlaylistStore::open(&dir.path().join("playlists.sqlite3")).unwrap();
        (store, dir)
    }

    fn make_track(id: u64) -> TrackRef {
        TrackRef {
            id,
            name: format!("Track {id}"),
        }
    }

    #[test]
    fn test_create_rejects_duplicate_name() {
        let (store, _dir) = open_store();
        assert!(store.create("favs", 1).unwrap());
        assert!(!store.create("favs", 2).unwrap());
        assert_eq!(store.playlists().unwrap(), vec!["favs".to_string()]);
    }

    #[test]
    fn test_add_is_idempotent_by_id() {
        let (store, _dir) = open_store();
        store.create("favs", 1).unwrap();
        assert!(store.add("favs", &make_track(7)).unwrap());
        assert!(!store.add("favs", &make_track(7)).unwrap());
        assert!(store.add("favs", &make_track(8)).unwrap());
        assert_eq!(store.tracks("favs").unwrap().len(), 2);
    }

    #[test]
    fn test_add_to_missing_playlist() {
        let (store, _dir) = open_store();
        assert!(!store.add("nope", &make_track(1)).unwrap());
    }

    #[test]
    fn test_tracks_keep_insertion_order() {
        let (store, _dir) = open_store();
        store.create("mix", 1).unwrap();
        for id in [30, 10, 20] {
            store.add("mix", &make_track(id)).unwrap();
        }
        let ids: Vec<u64> = store.tracks("mix").unwrap().iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![30, 10, 20]);
    }

    #[test]
    fn test_remove_and_delete() {
        let (store, _dir) = open_store();
        store.create("mix", 1).unwrap();
        store.add("mix", &make_track(1)).unwrap();
        store.add("mix", &make_track(2)).unwrap();

        store.remove("mix", 1).unwrap();
        assert_eq!(store.tracks("mix").unwrap().len(), 1);

        store.delete("mix").unwrap();
        assert!(!store.exists("mix").unwrap());
        assert!(store.tracks("mix").unwrap().is_empty());
        // deleting again is fine
        store.delete("mix").unwrap();
    }
}
