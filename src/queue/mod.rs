use crate::ncm::models::TrackRef;
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("queue index {index} out of bounds (len {len})")]
pub struct QueueIndexError {
    pub index: usize,
    pub len: usize,
}

/// An ordered, navigable list of track references with a cursor.
///
/// Decoupled from how it was populated: search pages and playlists both feed
/// it through `replace`. No wraparound — once `advance` hits the end, the
/// queue stays exhausted until the next `replace`.
#[derive(Debug, Clone, Default)]
pub struct TrackQueue {
    items: Vec<TrackRef>,
    cursor: Option<usize>,
}

impl TrackQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wholesale reset; used for new search pages and "play all".
    /// An out-of-bounds `selected` leaves nothing selected.
    pub fn replace(&mut self, items: Vec<TrackRef>, selected: Option<usize>) {
        self.cursor = selected.filter(|&i| i < items.len());
        self.items = items;
    }

    pub fn select(&mut self, index: usize) -> Result<(), QueueIndexError> {
        if index >= self.items.len() {
            return Err(QueueIndexError {
                index,
                len: self.items.len(),
            });
        }
        self.cursor = Some(index);
        Ok(())
    }

    /// Move the cursor forward and return the new current track.
    ///
    /// Returns `None` without mutating when already at the last item — the
    /// exhaustion signal the playback session uses to end queue-mode playback.
    pub fn advance(&mut self) -> Option<TrackRef> {
        let current = self.cursor?;
        let next = current + 1;
        if next >= self.items.len() {
            return None;
        }
        self.cursor = Some(next);
        self.items.get(next).cloned()
    }

    pub fn current(&self) -> Option<TrackRef> {
        self.cursor.and_then(|i| self.items.get(i)).cloned()
    }

    #[allow(dead_code)]
    pub fn current_index(&self) -> Option<usize> {
        self.cursor
    }

    /// The track `advance` would move to, without moving.
    #[allow(dead_code)]
    pub fn peek_next(&self) -> Option<TrackRef> {
        let current = self.cursor?;
        self.items.get(current + 1).cloned()
    }

    pub fn tracks(&self) -> &[TrackRef] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Shared handle over a [`TrackQueue`].
///
/// The UI-facing selection surface and the playback session both hold one;
/// every operation locks, so mutation is atomic and readers only ever see a
/// fully updated queue.
#[derive(Debug, Clone, Default)]
pub struct SharedQueue {
    inner: Arc<Mutex<TrackQueue>>,
}

impl SharedQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replace(&self, items: Vec<TrackRef>, selected: Option<usize>) {
        self.inner.lock().unwrap().replace(items, selected);
    }

    pub fn select(&self, index: usize) -> Result<(), QueueIndexError> {
        self.inner.lock().unwrap().select(index)
    }

    pub fn advance(&self) -> Option<TrackRef> {
        self.inner.lock().unwrap().advance()
    }

    pub fn current(&self) -> Option<TrackRef> {
        self.inner.lock().unwrap().current()
    }

    #[allow(dead_code)]
    pub fn peek_next(&self) -> Option<TrackRef> {
        self.inner.lock().unwrap().peek_next()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }

    /// Point-in-time copy of the items, for rendering.
    pub fn snapshot(&self) -> Vec<TrackRef> {
        self.inner.lock().unwrap().tracks().to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_track(id: u64) -> TrackRef {
        TrackRef {
            id,
            name: format!("Track {id}"),
        }
    }

    #[test]
    fn test_replace_selects_in_bounds() {
        let mut queue = TrackQueue::new();
        queue.replace(vec![make_track(1), make_track(2)], Some(1));
        assert_eq!(queue.current().unwrap().id, 2);

        queue.replace(vec![make_track(3)], Some(5));
        assert!(queue.current().is_none());

        queue.replace(Vec::new(), Some(0));
        assert!(queue.current().is_none());
    }

    #[test]
    fn test_select_out_of_bounds() {
        let mut queue = TrackQueue::new();
        queue.replace(vec![make_track(1)], Some(0));
        let err = queue.select(3).unwrap_err();
        assert_eq!(err.index, 3);
        assert_eq!(err.len, 1);
        // rejected call leaves the cursor untouched
        assert_eq!(queue.current().unwrap().id, 1);
    }

    #[test]
    fn test_advance_exhaustion() {
        let mut queue = TrackQueue::new();
        let n = 4;
        queue.replace((1..=n).map(make_track).collect(), Some(0));

        // length-1 advances each return a track...
        for expected in 2..=n {
            assert_eq!(queue.advance().unwrap().id, expected);
        }
        // ...the next returns None and moves nothing
        assert!(queue.advance().is_none());
        assert_eq!(queue.current_index(), Some(n as usize - 1));
        assert!(queue.advance().is_none());
    }

    #[test]
    fn test_advance_without_selection() {
        let mut queue = TrackQueue::new();
        queue.replace(vec![make_track(1), make_track(2)], None);
        assert!(queue.advance().is_none());
    }

    #[test]
    fn test_peek_does_not_move() {
        let mut queue = TrackQueue::new();
        queue.replace(vec![make_track(1), make_track(2)], Some(0));
        assert_eq!(queue.peek_next().unwrap().id, 2);
        assert_eq!(queue.current().unwrap().id, 1);
    }

    #[test]
    fn test_shared_snapshot() {
        let queue = SharedQueue::new();
        queue.replace(vec![make_track(1), make_track(2)], Some(0));
        let snap = queue.snapshot();
        queue.replace(vec![make_track(9)], Some(0));
        assert_eq!(snap.len(), 2);
        assert_eq!(queue.snapshot().len(), 1);
    }
}
