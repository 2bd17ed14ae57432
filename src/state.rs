use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::Path;

use crate::config::ConfigError;
use crate::emulator::{Emulator, Memory};

// =============================================================================
// RAM Addresses (Pokémon Red, international release)
// =============================================================================

pub mod ram {
    pub const PLAYER_X: u16 = 0xD362;
    pub const PLAYER_Y: u16 = 0xD361;
    pub const MAP_ID: u16 = 0xD35E;
    pub const BADGES: u16 = 0xD356;
    pub const PARTY_COUNT: u16 = 0xD163;
    // 3 bytes, packed decimal, most significant first
    pub const MONEY: u16 = 0xD347;
    pub const PARTY_LEVELS: [u16; 6] = [0xD18C, 0xD1B8, 0xD1E4, 0xD210, 0xD23C, 0xD268];

    // 0 = none, 1 = wild, 2 = trainer, 0xFF = lost
    pub const BATTLE_FLAG: u16 = 0xD057;
    // 0 = normal, 1 = old man tutorial, 2 = safari zone
    pub const BATTLE_TYPE: u16 = 0xD05A;
    pub const GYM_BATTLE_MUSIC: u16 = 0xD05C;
    pub const TURN_COUNT: u16 = 0xCCD5;
}

pub const MAX_PARTY: u8 = 6;
pub const MAX_MONEY: u32 = 999_999;

/// Where each game fact lives. Defaults to the documented Pokémon Red map;
/// other titles or revisions supply their own through a [`GameProfile`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RamLayout {
    pub player_x: u16,
    pub player_y: u16,
    pub map_id: u16,
    pub badges: u16,
    pub party_count: u16,
    pub money: u16,
    pub party_levels: [u16; 6],
    pub battle_flag: u16,
    pub battle_type: u16,
    pub gym_battle_music: u16,
    pub turn_count: u16,
}

impl Default for RamLayout {
    fn default() -> Self {
        Self {
            player_x: ram::PLAYER_X,
            player_y: ram::PLAYER_Y,
            map_id: ram::MAP_ID,
            badges: ram::BADGES,
            party_count: ram::PARTY_COUNT,
            money: ram::MONEY,
            party_levels: ram::PARTY_LEVELS,
            battle_flag: ram::BATTLE_FLAG,
            battle_type: ram::BATTLE_TYPE,
            gym_battle_music: ram::GYM_BATTLE_MUSIC,
            turn_count: ram::TURN_COUNT,
        }
    }
}

// =============================================================================
// Packed Decimal
// =============================================================================

/// Two base-10 digits per byte, high nibble first: `[0x12, 0x34, 0x56]` is 123456.
pub fn decode_bcd(bytes: [u8; 3]) -> u32 {
    bytes.iter().fold(0u32, |acc, &b| {
        acc * 100 + (b >> 4) as u32 * 10 + (b & 0x0F) as u32
    })
}

/// Inverse of [`decode_bcd`]; values above 999,999 are clamped.
pub fn encode_bcd(value: u32) -> [u8; 3] {
    let v = value.min(MAX_MONEY);
    let pair = |n: u32| (((n / 10) % 10) << 4 | (n % 10)) as u8;
    [pair(v / 10_000), pair(v / 100), pair(v)]
}

pub fn read_bcd<M: Memory + ?Sized>(mem: &M, addr: u16) -> u32 {
    decode_bcd([
        mem.read_byte(addr),
        mem.read_byte(addr.wrapping_add(1)),
        mem.read_byte(addr.wrapping_add(2)),
    ])
}

pub fn write_bcd<E: Emulator + ?Sized>(emu: &mut E, addr: u16, value: u32) {
    for (i, byte) in encode_bcd(value).into_iter().enumerate() {
        emu.write_byte(addr.wrapping_add(i as u16), byte);
    }
}

// =============================================================================
// Game Facts
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GameFacts {
    pub x: u8,
    pub y: u8,
    pub map_id: u8,
    pub badges: u8,
    pub money: u32,
    pub party_count: u8,
    pub levels: [u8; 6],
}

impl GameFacts {
    pub fn read<M: Memory + ?Sized>(mem: &M, layout: &RamLayout) -> Self {
        let mut levels = [0u8; 6];
        for (level, &addr) in levels.iter_mut().zip(&layout.party_levels) {
            *level = mem.read_byte(addr);
        }
        Self {
            x: mem.read_byte(layout.player_x),
            y: mem.read_byte(layout.player_y),
            map_id: mem.read_byte(layout.map_id),
            badges: mem.read_byte(layout.badges),
            money: read_bcd(mem, layout.money),
            party_count: mem.read_byte(layout.party_count),
            levels,
        }
    }

    /// Sum over all six party slots.
    pub fn level_sum(&self) -> u32 {
        self.levels.iter().map(|&l| l as u32).sum()
    }

    pub fn badge_count(&self) -> u32 {
        self.badges.count_ones()
    }
}

// =============================================================================
// Event Flags
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventFlag {
    pub address: u16,
    pub bit: u8,
}

/// Externally supplied list of progress flags. Only its cardinality and the
/// sum of set bits matter to the harness.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<EventFlag>", into = "Vec<EventFlag>")]
pub struct EventTable {
    flags: Vec<EventFlag>,
}

impl EventTable {
    pub fn new(flags: Vec<EventFlag>) -> Result<Self, ConfigError> {
        if let Some(bad) = flags.iter().find(|f| f.bit > 7) {
            return Err(ConfigError::EventBit {
                address: bad.address,
                bit: bad.bit,
            });
        }
        Ok(Self { flags })
    }

    pub fn len(&self) -> usize {
        self.flags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }

    pub fn flags(&self) -> &[EventFlag] {
        &self.flags
    }

    /// Number of set flags.
    pub fn score<M: Memory + ?Sized>(&self, mem: &M) -> u32 {
        self.flags
            .iter()
            .map(|f| ((mem.read_byte(f.address) >> f.bit) & 1) as u32)
            .sum()
    }
}

impl TryFrom<Vec<EventFlag>> for EventTable {
    type Error = ConfigError;

    fn try_from(flags: Vec<EventFlag>) -> Result<Self, Self::Error> {
        Self::new(flags)
    }
}

impl From<EventTable> for Vec<EventFlag> {
    fn from(table: EventTable) -> Self {
        table.flags
    }
}

// =============================================================================
// Game Profile
// =============================================================================

/// Data-only description of the title: RAM layout plus event table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameProfile {
    pub layout: RamLayout,
    pub events: EventTable,
}

impl GameProfile {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("Failed to open game profile: {}", path.display()))?;
        let reader = std::io::BufReader::new(file);
        let profile = serde_json::from_reader(reader)
            .with_context(|| format!("Failed to parse game profile: {}", path.display()))?;
        Ok(profile)
    }
}

// =============================================================================
// Battle State
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BattleState {
    /// 0 = none, 1 = wild, 2 = trainer, -1 = lost
    pub in_battle: i8,
    pub battle_type: u8,
    pub is_gym_battle: bool,
    pub turn_count: u8,
}

impl BattleState {
    pub fn read<M: Memory + ?Sized>(mem: &M, layout: &RamLayout) -> Self {
        Self {
            in_battle: mem.read_byte(layout.battle_flag) as i8,
            battle_type: mem.read_byte(layout.battle_type),
            is_gym_battle: mem.read_byte(layout.gym_battle_music) != 0,
            turn_count: mem.read_byte(layout.turn_count),
        }
    }

    pub fn is_active(&self) -> bool {
        self.in_battle == 1 || self.in_battle == 2
    }

    pub fn was_lost(&self) -> bool {
        self.in_battle == -1
    }

    pub fn just_started(&self, prev: &BattleState) -> bool {
        self.is_active() && !prev.is_active()
    }

    pub fn just_ended(&self, prev: &BattleState) -> bool {
        !self.is_active() && prev.is_active()
    }
}
