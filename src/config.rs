use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::{Path, PathBuf};

pub const DEFAULT_FRAME_SKIP: u32 = 1;
pub const DEFAULT_MAX_EPISODE_LENGTH: u32 = 20_480;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("frame_skip must be at least 1")]
    ZeroFrameSkip,
    #[error("max_episode_length must be at least 1")]
    ZeroEpisodeLength,
    #[error("event flag at 0x{address:04X} names bit {bit}, expected 0-7")]
    EventBit { address: u16, bit: u8 },
    #[error("reward bonus `{name}` must be finite and non-negative, got {value}")]
    RewardBonus { name: &'static str, value: f32 },
}

// =============================================================================
// Environment Configuration
// =============================================================================

/// Recognized construction options. Defaults are applied here, once, and
/// [`EnvConfig::validate`] runs when an environment is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnvConfig {
    pub rom_path: PathBuf,
    #[serde(default)]
    pub state_path: Option<PathBuf>,
    #[serde(default = "default_frame_skip")]
    pub frame_skip: u32,
    #[serde(default = "default_max_episode_length")]
    pub max_episode_length: u32,
    #[serde(default)]
    pub render_enabled: bool,
    #[serde(default = "default_full_reset")]
    pub full_reset: bool,
}

fn default_frame_skip() -> u32 {
    DEFAULT_FRAME_SKIP
}

fn default_max_episode_length() -> u32 {
    DEFAULT_MAX_EPISODE_LENGTH
}

fn default_full_reset() -> bool {
    true
}

impl EnvConfig {
    pub fn new(rom_path: impl Into<PathBuf>) -> Self {
        Self {
            rom_path: rom_path.into(),
            state_path: None,
            frame_skip: DEFAULT_FRAME_SKIP,
            max_episode_length: DEFAULT_MAX_EPISODE_LENGTH,
            render_enabled: false,
            full_reset: true,
        }
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("Failed to open env config: {}", path.display()))?;
        let reader = std::io::BufReader::new(file);
        let config = serde_json::from_reader(reader)
            .with_context(|| format!("Failed to parse env config: {}", path.display()))?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.frame_skip == 0 {
            return Err(ConfigError::ZeroFrameSkip);
        }
        if self.max_episode_length == 0 {
            return Err(ConfigError::ZeroEpisodeLength);
        }
        Ok(())
    }
}
