/// Facts appended after the screen grid: x, y, map, badges, party size.
pub const EXTRA_FEATURES: usize = 5;

pub mod config;
pub mod emulator;
pub mod env;
pub mod exploration;
#[cfg(feature = "gb")]
pub mod gb;
pub mod observation;
pub mod policy;
#[cfg(feature = "window")]
pub mod render;
pub mod reward;
pub mod state;
pub mod vec_env;

pub use config::{ConfigError, EnvConfig};
pub use emulator::{Buttons, Emulator, Memory};
pub use env::{Action, EpisodeLog, InitError, Phase, PokeEnv, StepResult};
pub use exploration::{CoordKey, ExplorationTracker, Visit};
#[cfg(feature = "gb")]
pub use gb::GameBoyCore;
pub use observation::ObservationEncoder;
pub use policy::{ActorCritic, Policy, PolicyConfig};
#[cfg(feature = "window")]
pub use render::{RenderHub, WindowId};
pub use reward::{RewardBreakdown, RewardConfig};
pub use state::{BattleState, EventFlag, EventTable, GameFacts, GameProfile, RamLayout, ram};
pub use vec_env::VecEnv;
