use rand::seq::SliceRandom;

use crate::track::SharedTrack;

/// Ordered track list with a cursor. Moving the cursor never wraps around:
/// stepping past either end yields no track and leaves the cursor in place.
#[derive(Debug, Default)]
pub struct Queue {
    tracks: Vec<SharedTrack>,
    /// `None` until the first track has been reached
    position: Option<usize>,
}

impl Queue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn position(&self) -> Option<usize> {
        self.position
    }

    pub fn tracks(&self) -> &[SharedTrack] {
        &self.tracks
    }

    /// Track under the cursor, if the cursor points at one.
    pub fn current(&self) -> Option<SharedTrack> {
        self.position.and_then(|pos| self.tracks.get(pos)).cloned()
    }

    pub fn next(&mut self) -> Option<SharedTrack> {
        self.step(1)
    }

    pub fn prev(&mut self) -> Option<SharedTrack> {
        self.step(-1)
    }

    fn step(&mut self, delta: isize) -> Option<SharedTrack> {
        let target = match self.position {
            Some(pos) => pos.checked_add_signed(delta)?,
            // Before the first track only a forward step lands anywhere
            None if delta > 0 => delta as usize - 1,
            None => return None,
        };

        let track = self.tracks.get(target)?.clone();
        self.position = Some(target);

        Some(track)
    }

    /// Appends tracks to the end, keeping their order.
    pub fn append(&mut self, tracks: impl IntoIterator<Item = SharedTrack>) {
        self.tracks.extend(tracks);
    }

    /// Randomises the order in place. The cursor keeps its numeric value, so
    /// it now points at whatever track landed there.
    pub fn shuffle(&mut self) {
        self.tracks.shuffle(&mut rand::rng());
    }

    /// Empties the list. The cursor is left as it was.
    pub fn clear(&mut self) {
        self.tracks.clear();
    }

    /// Moves the cursor back in front of the first track.
    pub fn rewind(&mut self) {
        self.position = None;
    }

    /// Puts the cursor back at a position read earlier from
    /// [`Queue::position`].
    pub fn set_position(&mut self, position: Option<usize>) {
        self.position = position;
    }
}
