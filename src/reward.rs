use serde::{Deserialize, Serialize};

use crate::config::ConfigError;
use crate::exploration::Visit;
use crate::state::{GameFacts, MAX_PARTY};

// =============================================================================
// Reward Tuning Knobs
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RewardConfig {
    pub badge_bonus: f32,
    pub catch_bonus: f32,
    pub coord_bonus: f32,
    pub level_bonus: f32,
    pub event_bonus: f32,
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            badge_bonus: 1.0,
            catch_bonus: 0.5,
            coord_bonus: 0.0025,
            level_bonus: 0.25,
            event_bonus: 0.1,
        }
    }
}

impl RewardConfig {
    /// Every term is a non-negative bonus; a negative or NaN knob would break
    /// that.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("badge_bonus", self.badge_bonus),
            ("catch_bonus", self.catch_bonus),
            ("coord_bonus", self.coord_bonus),
            ("level_bonus", self.level_bonus),
            ("event_bonus", self.event_bonus),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::RewardBonus { name, value });
            }
        }
        Ok(())
    }
}

// =============================================================================
// Reward Shaping
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RewardBreakdown {
    pub badge: f32,
    pub catch: f32,
    pub coord: f32,
    pub novelty: f32,
    pub level: f32,
    pub event: f32,
}

impl RewardBreakdown {
    pub fn total(&self) -> f32 {
        self.badge + self.catch + self.coord + self.novelty + self.level + self.event
    }

    pub fn accumulate(&mut self, other: &RewardBreakdown) {
        self.badge += other.badge;
        self.catch += other.catch;
        self.coord += other.coord;
        self.novelty += other.novelty;
        self.level += other.level;
        self.event += other.event;
    }
}

/// Scores one tick from the change between two fact snapshots. Pure; the
/// caller owns advancing `prev`.
pub fn shape(
    rc: &RewardConfig,
    prev: &GameFacts,
    cur: &GameFacts,
    visit: Visit,
    event_delta: i64,
) -> RewardBreakdown {
    let mut out = RewardBreakdown::default();

    if cur.badges > prev.badges {
        out.badge = rc.badge_bonus;
    }

    if cur.party_count > prev.party_count && cur.party_count <= MAX_PARTY {
        out.catch = rc.catch_bonus;
    }

    if visit.new_this_episode {
        out.coord = rc.coord_bonus;
    }
    if visit.novel_vs_last_episode {
        out.novelty = rc.coord_bonus;
    }

    let level_sum = cur.level_sum();
    let prev_level_sum = prev.level_sum();
    if level_sum > prev_level_sum && cur.party_count >= prev.party_count {
        out.level = rc.level_bonus * (level_sum - prev_level_sum) as f32;
    }

    if event_delta > 0 {
        out.event = rc.event_bonus * event_delta as f32;
    }

    out
}
