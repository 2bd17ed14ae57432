use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::config::{ConfigError, EnvConfig};
use crate::emulator::{Buttons, Emulator};
use crate::exploration::{CoordKey, ExplorationTracker};
use crate::observation::ObservationEncoder;
use crate::reward::{self, RewardBreakdown, RewardConfig};
use crate::state::{self, BattleState, GameFacts, GameProfile};

/// Frames run after a reset so the core reaches a renderable state.
pub const SETTLE_FRAMES: u32 = 4;

// =============================================================================
// Action Space
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Action {
    Noop = 0,
    A = 1,
    B = 2,
    Select = 3,
    Start = 4,
    Right = 5,
    Left = 6,
    Up = 7,
    Down = 8,
}

impl Action {
    pub const COUNT: usize = 9;

    pub const ALL: [Action; Action::COUNT] = [
        Action::Noop,
        Action::A,
        Action::B,
        Action::Select,
        Action::Start,
        Action::Right,
        Action::Left,
        Action::Up,
        Action::Down,
    ];

    /// Out-of-range indices resolve to no input.
    pub fn from_index(i: usize) -> Self {
        Self::ALL.get(i).copied().unwrap_or(Action::Noop)
    }

    /// Action `k >= 1` holds button bit `k - 1`.
    pub fn to_buttons(self) -> Buttons {
        match self {
            Action::Noop => Buttons::NONE,
            other => Buttons::from_bits(1 << (other as u8 - 1)),
        }
    }
}

// =============================================================================
// Errors, Outputs, Episode Summary
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("ROM file not found: {}", .0.display())]
    RomNotFound(PathBuf),
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("failed to initialize emulator core: {0:#}")]
    Emulator(anyhow::Error),
    #[error("frame size {width}x{height} must be non-zero and even on both axes")]
    FrameSize { width: usize, height: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Uninitialized,
    Ready,
    Stepping,
    Closed,
}

/// Per-tick outputs. `truncated` is part of the interface but nothing sets it.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StepResult {
    pub reward: f32,
    pub terminal: bool,
    pub truncated: bool,
}

/// Summary of the most recent episode that ended by length. Overwritten at
/// each episode end; `n` counts completed episodes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EpisodeLog {
    pub episode_length: f32,
    pub episode_return: f32,
    pub level_sum: f32,
    pub money: f32,
    pub levels: [f32; 6],
    pub unique_coords: f32,
    pub event_sum: f32,
    pub party_count: f32,
    pub badges: f32,
    pub n: f32,
}

// =============================================================================
// Environment
// =============================================================================

pub struct PokeEnv<E: Emulator> {
    emu: Option<E>,
    id: usize,
    config: EnvConfig,
    reward_config: RewardConfig,
    profile: GameProfile,
    encoder: ObservationEncoder,
    tracker: ExplorationTracker,
    phase: Phase,
    facts: GameFacts,
    prev_facts: GameFacts,
    battle: BattleState,
    observation: Vec<f32>,
    reward: f32,
    terminal: bool,
    truncated: bool,
    step_count: u32,
    frame_count: u64,
    score: f32,
    stagnation: u32,
    prev_event_score: u32,
    log: EpisodeLog,
    reward_debug: bool,
    reward_breakdown: RewardBreakdown,
    #[cfg(feature = "window")]
    window: Option<crate::render::WindowId>,
}

impl<E: Emulator> PokeEnv<E> {
    /// Opens the ROM and builds the environment. The ROM must exist before
    /// the emulator is asked to load it.
    pub fn new(config: EnvConfig, reward_config: RewardConfig, profile: GameProfile) -> Result<Self> {
        config.validate().map_err(InitError::from)?;
        if !config.rom_path.is_file() {
            return Err(InitError::RomNotFound(config.rom_path.clone()).into());
        }
        let emu = E::open(&config.rom_path).map_err(InitError::Emulator)?;
        Self::with_emulator(emu, config, reward_config, profile)
    }

    /// Builds the environment around an already constructed core.
    pub fn with_emulator(
        emu: E,
        config: EnvConfig,
        reward_config: RewardConfig,
        profile: GameProfile,
    ) -> Result<Self> {
        config.validate().map_err(InitError::from)?;
        reward_config.validate().map_err(InitError::from)?;
        let (width, height) = emu.frame_size();
        if width == 0 || height == 0 || width % 2 != 0 || height % 2 != 0 {
            return Err(InitError::FrameSize { width, height }.into());
        }
        let encoder = ObservationEncoder::new(width, height);
        if profile.events.is_empty() {
            warn!("game profile has no event flags; the event reward term stays 0");
        }

        debug!(
            rom = %config.rom_path.display(),
            width,
            height,
            obs_len = encoder.len(),
            events = profile.events.len(),
            "Initialized environment"
        );

        Ok(Self {
            emu: Some(emu),
            id: 0,
            config,
            reward_config,
            profile,
            encoder,
            tracker: ExplorationTracker::new(),
            phase: Phase::Uninitialized,
            facts: GameFacts::default(),
            prev_facts: GameFacts::default(),
            battle: BattleState::default(),
            observation: vec![0.0; encoder.len()],
            reward: 0.0,
            terminal: false,
            truncated: false,
            step_count: 0,
            frame_count: 0,
            score: 0.0,
            stagnation: 0,
            prev_event_score: 0,
            log: EpisodeLog::default(),
            reward_debug: Self::debug_reward_enabled(),
            reward_breakdown: RewardBreakdown::default(),
            #[cfg(feature = "window")]
            window: None,
        })
    }

    /// Tags log lines; assigned by whoever creates the environment.
    pub fn with_id(mut self, id: usize) -> Self {
        self.id = id;
        self
    }

    fn debug_reward_enabled() -> bool {
        match std::env::var("POKERED_DEBUG_REWARD") {
            Ok(val) => matches!(val.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"),
            Err(_) => false,
        }
    }

    pub fn set_reward_debug(&mut self, enabled: bool) {
        self.reward_debug = enabled;
    }

    pub fn reward_debug_enabled(&self) -> bool {
        self.reward_debug
    }

    pub fn clear_reward_breakdown(&mut self) {
        self.reward_breakdown = RewardBreakdown::default();
    }

    pub fn reward_breakdown(&self) -> RewardBreakdown {
        self.reward_breakdown
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    pub fn reset(&mut self) -> Result<()> {
        let Some(emu) = self.emu.as_mut() else {
            return Ok(());
        };

        if self.config.full_reset {
            match &self.config.state_path {
                Some(path) => {
                    if let Err(e) = emu.load_state(path) {
                        warn!(
                            env = self.id,
                            path = %path.display(),
                            "Failed to load initial state, keeping live memory: {e:#}"
                        );
                    }
                }
                None => warn!(env = self.id, "Full reset requested without a state path"),
            }
        }

        let layout = &self.profile.layout;
        self.facts = GameFacts::read(&*emu, layout);
        self.prev_facts = self.facts;
        self.battle = BattleState::read(&*emu, layout);
        self.encoder
            .encode_into(emu.frame_buffer(), &self.facts, &mut self.observation);
        self.tracker
            .reset_episode(CoordKey::new(self.facts.map_id, self.facts.x, self.facts.y));

        self.reward = 0.0;
        self.terminal = false;
        self.truncated = false;
        self.step_count = 0;
        self.frame_count = 0;
        self.score = 0.0;
        self.stagnation = 0;
        self.prev_event_score = self.profile.events.score(&*emu);

        emu.set_inputs(Buttons::NONE);
        for _ in 0..SETTLE_FRAMES {
            emu.advance_frame()?;
        }

        self.phase = Phase::Ready;
        debug!(
            env = self.id,
            map = self.facts.map_id,
            x = self.facts.x,
            y = self.facts.y,
            events = self.prev_event_score,
            "reset"
        );
        Ok(())
    }

    /// Advances one decision tick. When the tick ends the episode by length
    /// the environment resets before returning: the observation already
    /// belongs to the next episode while `terminal` and `reward` describe the
    /// tick that ended.
    pub fn step(&mut self, action: usize) -> Result<StepResult> {
        if self.emu.is_none() {
            return Ok(self.outputs());
        }
        if self.phase == Phase::Uninitialized {
            self.reset()?;
        }

        self.reward = 0.0;
        self.terminal = false;
        self.step_count += 1;

        let buttons = Action::from_index(action).to_buttons();
        let skip = self.config.frame_skip;
        if let Some(emu) = self.emu.as_mut() {
            emu.set_inputs(buttons);
            for _ in 0..skip {
                emu.advance_frame()?;
            }
        }
        self.frame_count += skip as u64;

        let reward = self.compute_reward();
        self.encode_observation();
        self.reward = reward;
        self.score += reward;
        self.phase = Phase::Stepping;

        if self.step_count >= self.config.max_episode_length {
            self.finish_episode();
            self.tracker.snapshot_episode();
            self.reset()?;
            self.reward = reward;
            self.terminal = true;
        }

        Ok(self.outputs())
    }

    /// Drops the emulator and the visitation memory. The last outputs stay
    /// readable; every later call is a no-op.
    pub fn close(&mut self) {
        if self.emu.take().is_none() {
            return;
        }
        self.tracker.release();
        self.phase = Phase::Closed;
        debug!(env = self.id, "closed");
    }

    fn outputs(&self) -> StepResult {
        StepResult {
            reward: self.reward,
            terminal: self.terminal,
            truncated: self.truncated,
        }
    }

    fn encode_observation(&mut self) {
        if let Some(emu) = self.emu.as_mut() {
            self.encoder
                .encode_into(emu.frame_buffer(), &self.facts, &mut self.observation);
        }
    }

    /// Re-reads the facts, scores the tick and advances the previous snapshot.
    fn compute_reward(&mut self) -> f32 {
        let Some(emu) = self.emu.as_ref() else {
            return 0.0;
        };
        let layout = &self.profile.layout;
        let cur = GameFacts::read(emu, layout);
        let battle = BattleState::read(emu, layout);
        let event_score = self.profile.events.score(emu);

        let visit = self.tracker.visit(CoordKey::new(cur.map_id, cur.x, cur.y));
        let event_delta = event_score as i64 - self.prev_event_score as i64;
        let breakdown = reward::shape(&self.reward_config, &self.prev_facts, &cur, visit, event_delta);

        if breakdown.badge > 0.0 {
            info!(env = self.id, badges = cur.badge_count(), "Earned a gym badge");
        }
        if breakdown.catch > 0.0 {
            info!(env = self.id, party = cur.party_count, "Caught a new Pokémon");
        }
        if battle.just_started(&self.battle) {
            debug!(env = self.id, kind = battle.in_battle, gym = battle.is_gym_battle, "battle started");
        } else if battle.just_ended(&self.battle) {
            debug!(env = self.id, lost = battle.was_lost(), turns = self.battle.turn_count, "battle ended");
        }

        self.stagnation = if visit.new_this_episode {
            0
        } else {
            self.stagnation.saturating_add(1)
        };
        if self.reward_debug {
            self.reward_breakdown.accumulate(&breakdown);
        }

        self.battle = battle;
        self.prev_event_score = event_score;
        self.facts = cur;
        self.prev_facts = cur;
        breakdown.total()
    }

    fn finish_episode(&mut self) {
        let f = &self.facts;
        self.log = EpisodeLog {
            episode_length: self.step_count as f32,
            episode_return: self.score,
            level_sum: f.level_sum() as f32,
            money: f.money as f32,
            levels: f.levels.map(|l| l as f32),
            unique_coords: self.tracker.unique_count() as f32,
            event_sum: self.prev_event_score as f32,
            party_count: f.party_count as f32,
            badges: f.badges as f32,
            n: self.log.n + 1.0,
        };
        info!(
            env = self.id,
            episode = self.log.n,
            steps = self.step_count,
            ret = self.score,
            unique_coords = self.tracker.unique_count(),
            events = self.prev_event_score,
            badges = f.badge_count(),
            "episode finished"
        );
    }

    // -------------------------------------------------------------------------
    // Persisted State and Memory
    // -------------------------------------------------------------------------

    pub fn save_state<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        match self.emu.as_mut() {
            Some(emu) => emu.save_state(path.as_ref()),
            None => Ok(()),
        }
    }

    pub fn load_state<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        match self.emu.as_mut() {
            Some(emu) => emu.load_state(path.as_ref()),
            None => Ok(()),
        }
    }

    pub fn write_byte(&mut self, addr: u16, value: u8) {
        if let Some(emu) = self.emu.as_mut() {
            emu.write_byte(addr, value);
        }
    }

    pub fn write_money(&mut self, value: u32) {
        let addr = self.profile.layout.money;
        if let Some(emu) = self.emu.as_mut() {
            state::write_bcd(emu, addr, value);
        }
    }

    /// Facts straight from memory, bypassing the per-tick snapshot.
    pub fn read_facts(&self) -> Option<GameFacts> {
        self.emu
            .as_ref()
            .map(|emu| GameFacts::read(emu, &self.profile.layout))
    }

    pub fn read_event_score(&self) -> Option<u32> {
        self.emu.as_ref().map(|emu| self.profile.events.score(emu))
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn config(&self) -> &EnvConfig {
        &self.config
    }

    pub fn observation(&self) -> &[f32] {
        &self.observation
    }

    pub fn observation_len(&self) -> usize {
        self.encoder.len()
    }

    pub fn encoder(&self) -> &ObservationEncoder {
        &self.encoder
    }

    pub fn reward(&self) -> f32 {
        self.reward
    }

    pub fn terminal(&self) -> bool {
        self.terminal
    }

    pub fn truncated(&self) -> bool {
        self.truncated
    }

    pub fn facts(&self) -> &GameFacts {
        &self.facts
    }

    pub fn prev_facts(&self) -> &GameFacts {
        &self.prev_facts
    }

    pub fn battle_state(&self) -> &BattleState {
        &self.battle
    }

    /// `(x, y, map)` as of the last tick.
    pub fn position(&self) -> (u8, u8, u8) {
        (self.facts.x, self.facts.y, self.facts.map_id)
    }

    pub fn exploration(&self) -> &ExplorationTracker {
        &self.tracker
    }

    pub fn unique_coords(&self) -> u32 {
        self.tracker.unique_count()
    }

    pub fn step_count(&self) -> u32 {
        self.step_count
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn score(&self) -> f32 {
        self.score
    }

    pub fn stagnation(&self) -> u32 {
        self.stagnation
    }

    pub fn event_score(&self) -> u32 {
        self.prev_event_score
    }

    pub fn log(&self) -> &EpisodeLog {
        &self.log
    }

    pub fn emulator(&self) -> Option<&E> {
        self.emu.as_ref()
    }

    pub fn emulator_mut(&mut self) -> Option<&mut E> {
        self.emu.as_mut()
    }

    // -------------------------------------------------------------------------
    // Rendering
    // -------------------------------------------------------------------------

    /// Presents the current frame when rendering is enabled. Closing the
    /// window turns rendering off for this environment only.
    #[cfg(feature = "window")]
    pub fn render(&mut self, hub: &mut crate::render::RenderHub) -> Result<()> {
        if !self.config.render_enabled {
            return Ok(());
        }
        let Some(emu) = self.emu.as_mut() else {
            return Ok(());
        };
        let (width, height) = emu.frame_size();
        let id = match self.window {
            Some(id) => id,
            None => {
                let id = hub.register(&format!("Pokémon Red env {}", self.id), width, height)?;
                self.window = Some(id);
                id
            }
        };
        if !hub.present(id, emu.frame_buffer(), width, height)? {
            warn!(env = self.id, "Rendering disabled after window close");
            self.window = None;
            self.config.render_enabled = false;
        }
        Ok(())
    }
}
