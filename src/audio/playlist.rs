use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use super::types::Track;

/// Result of asking the controller to advance.
#[derive(Clone, Debug)]
pub enum Advance {
    Next(Arc<Track>),
    /// The last track was current and repeat is disabled; current is cleared.
    Ended,
}

/// Owns the ordered/shuffled track sequence and the current index.
///
/// The `original` order is kept alongside the `active` view so shuffle can be
/// toggled without losing the listening position; the current index is always
/// remapped by track identity, never by position.
pub struct PlaylistController {
    original: Vec<Arc<Track>>,
    active: Vec<Arc<Track>>,
    current: Option<usize>,
    shuffle_enabled: bool,
    repeat_enabled: bool,
}

impl PlaylistController {
    pub fn new() -> Self {
        Self {
            original: Vec::new(),
            active: Vec::new(),
            current: None,
            shuffle_enabled: false,
            repeat_enabled: false,
        }
    }

    /// Replaces the playlist. The active view is rebuilt (reshuffled when
    /// shuffle is on) and the current index follows the previously-current
    /// track into the new view, or clears if the track is gone.
    pub fn set_playlist(&mut self, tracks: Vec<Arc<Track>>) {
        let playing = self.current_track();
        self.original = tracks;
        self.rebuild_active();
        self.current = playing.and_then(|track| self.position_of(&track));
    }

    pub fn set_shuffle(&mut self, enabled: bool) {
        if self.shuffle_enabled == enabled {
            return;
        }
        let playing = self.current_track();
        self.shuffle_enabled = enabled;
        self.rebuild_active();
        self.current = playing.and_then(|track| self.position_of(&track));
    }

    pub fn shuffle_enabled(&self) -> bool {
        self.shuffle_enabled
    }

    pub fn set_repeat(&mut self, enabled: bool) {
        self.repeat_enabled = enabled;
    }

    pub fn repeat_enabled(&self) -> bool {
        self.repeat_enabled
    }

    pub fn current_track(&self) -> Option<Arc<Track>> {
        self.current.and_then(|i| self.active.get(i).cloned())
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    pub fn tracks(&self) -> &[Arc<Track>] {
        &self.active
    }

    /// Makes the given track current, located by identity or path.
    /// Returns false when it is not in the playlist.
    pub fn select(&mut self, track: &Track) -> bool {
        match self
            .active
            .iter()
            .position(|candidate| candidate.path == track.path)
        {
            Some(index) => {
                self.current = Some(index);
                true
            }
            None => false,
        }
    }

    pub fn select_index(&mut self, index: usize) -> bool {
        if index < self.active.len() {
            self.current = Some(index);
            true
        } else {
            false
        }
    }

    /// Advances by one. At the last entry, wraps to the start when repeat is
    /// enabled, otherwise clears the current track and reports the end.
    pub fn next(&mut self) -> Advance {
        if self.active.is_empty() {
            self.current = None;
            return Advance::Ended;
        }

        let at = self.current.map(|i| i as i64).unwrap_or(-1);
        if at < self.active.len() as i64 - 1 {
            let index = (at + 1) as usize;
            self.current = Some(index);
            Advance::Next(Arc::clone(&self.active[index]))
        } else if self.repeat_enabled {
            self.current = Some(0);
            Advance::Next(Arc::clone(&self.active[0]))
        } else {
            self.current = None;
            Advance::Ended
        }
    }

    /// Steps back by one; wraps to the last entry below zero regardless of
    /// the repeat flag.
    pub fn previous(&mut self) -> Option<Arc<Track>> {
        if self.active.is_empty() {
            return None;
        }

        let index = match self.current {
            Some(0) | None => self.active.len() - 1,
            Some(i) => i - 1,
        };
        self.current = Some(index);
        Some(Arc::clone(&self.active[index]))
    }

    fn rebuild_active(&mut self) {
        self.active = self.original.clone();
        if self.shuffle_enabled {
            fisher_yates(&mut self.active, time_seed());
        }
    }

    fn position_of(&self, track: &Arc<Track>) -> Option<usize> {
        self.active
            .iter()
            .position(|candidate| Arc::ptr_eq(candidate, track) || candidate.path == track.path)
    }
}

impl Default for PlaylistController {
    fn default() -> Self {
        Self::new()
    }
}

fn time_seed() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(42)
}

/// Fisher-Yates over a splitmix-style LCG; no rand dependency.
fn fisher_yates(items: &mut [Arc<Track>], mut state: u64) {
    let len = items.len();
    if len <= 1 {
        return;
    }
    for i in (1..len).rev() {
        state = state
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        let j = (state >> 33) as usize % (i + 1);
        items.swap(i, j);
    }
}
