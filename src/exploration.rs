// =============================================================================
// Coordinate Keys
// =============================================================================

/// Every (map, x, y) byte triple.
pub const COORD_SPACE: usize = 1 << 24;

/// Bijective packing of (map, x, y) into `[0, 2^24)`. An index, not an ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CoordKey(u32);

impl CoordKey {
    pub const fn new(map: u8, x: u8, y: u8) -> Self {
        CoordKey(((map as u32) << 16) | ((x as u32) << 8) | y as u32)
    }

    /// Returns `(map, x, y)`.
    pub const fn parts(self) -> (u8, u8, u8) {
        ((self.0 >> 16) as u8, (self.0 >> 8) as u8, self.0 as u8)
    }

    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

// =============================================================================
// Exploration Tracker
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Visit {
    pub new_this_episode: bool,
    pub novel_vs_last_episode: bool,
}

/// Per-episode visitation plus a one-episode lookback. `previous` starts
/// fully set, so nothing is novel until the first episode completes.
pub struct ExplorationTracker {
    current: Box<[bool]>,
    previous: Box<[bool]>,
    unique_count: u32,
}

impl Default for ExplorationTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ExplorationTracker {
    pub fn new() -> Self {
        Self {
            current: vec![false; COORD_SPACE].into_boxed_slice(),
            previous: vec![true; COORD_SPACE].into_boxed_slice(),
            unique_count: 0,
        }
    }

    pub fn visit(&mut self, key: CoordKey) -> Visit {
        if self.is_released() {
            return Visit::default();
        }
        let idx = key.index();
        let new_this_episode = !self.current[idx];
        if new_this_episode {
            self.current[idx] = true;
            self.unique_count += 1;
        }
        let novel_vs_last_episode = !self.previous[idx];
        if novel_vs_last_episode {
            self.previous[idx] = true;
        }
        Visit {
            new_this_episode,
            novel_vs_last_episode,
        }
    }

    /// Clears this episode and marks `start` as its first visited coordinate.
    pub fn reset_episode(&mut self, start: CoordKey) {
        if self.is_released() {
            return;
        }
        self.current.fill(false);
        self.current[start.index()] = true;
        self.unique_count = 1;
    }

    /// Replaces the lookback with this episode's footprint.
    pub fn snapshot_episode(&mut self) {
        if self.is_released() {
            return;
        }
        self.previous.copy_from_slice(&self.current);
    }

    /// Frees both arrays. Later calls see nothing and change nothing.
    pub fn release(&mut self) {
        self.current = Box::default();
        self.previous = Box::default();
    }

    pub fn is_released(&self) -> bool {
        self.current.is_empty()
    }

    pub fn unique_count(&self) -> u32 {
        self.unique_count
    }

    pub fn visited_this_episode(&self, key: CoordKey) -> bool {
        self.current.get(key.index()).copied().unwrap_or(false)
    }
}
