use anyhow::{Context, Result, anyhow};
use boytacean::gb::{GameBoy, GameBoyMode};
use boytacean::pad::PadKey;
use boytacean::state::StateManager;
use std::fmt::Debug;
use std::path::Path;

use crate::emulator::{Buttons, Emulator, Memory};

pub const GB_WIDTH: usize = 160;
pub const GB_HEIGHT: usize = 144;

/// `boytacean` DMG core exposed through the harness contract.
pub struct GameBoyCore {
    gb: GameBoy,
    held: Buttons,
    pixels: Vec<u32>,
}

const PAD_KEYS: [(Buttons, PadKey); 8] = [
    (Buttons::A, PadKey::A),
    (Buttons::B, PadKey::B),
    (Buttons::SELECT, PadKey::Select),
    (Buttons::START, PadKey::Start),
    (Buttons::RIGHT, PadKey::Right),
    (Buttons::LEFT, PadKey::Left),
    (Buttons::UP, PadKey::Up),
    (Buttons::DOWN, PadKey::Down),
];

fn core_error(what: &str, err: impl Debug) -> anyhow::Error {
    anyhow!("{what}: {err:?}")
}

fn blit_rgb_to_u32(fb: &[u8], out: &mut [u32]) {
    for (dst, src) in out.iter_mut().zip(fb.chunks_exact(3)) {
        *dst = ((src[0] as u32) << 16) | ((src[1] as u32) << 8) | (src[2] as u32);
    }
}

/// (button, pressed) pairs whose state differs between `prev` and `next`.
fn pad_changes(prev: Buttons, next: Buttons) -> impl Iterator<Item = (PadKey, bool)> {
    PAD_KEYS.into_iter().filter_map(move |(bit, key)| {
        let now = next.contains(bit);
        (prev.contains(bit) != now).then_some((key, now))
    })
}

impl GameBoyCore {
    fn from_core(gb: GameBoy) -> Self {
        Self {
            gb,
            held: Buttons::NONE,
            pixels: vec![0u32; GB_WIDTH * GB_HEIGHT],
        }
    }
}

impl Memory for GameBoyCore {
    fn read_byte(&self, addr: u16) -> u8 {
        self.gb.mmu_i().read(addr)
    }
}

impl Emulator for GameBoyCore {
    fn open(rom_path: &Path) -> Result<Self> {
        let rom = rom_path
            .to_str()
            .with_context(|| format!("ROM path is not UTF-8: {}", rom_path.display()))?;
        let mut gb = GameBoy::new(Some(GameBoyMode::Dmg));
        gb.load(true).map_err(|e| core_error("Failed to load boot ROM", e))?;
        gb.load_rom_file(rom, None)
            .map_err(|e| core_error("Failed to load ROM", e))
            .with_context(|| format!("ROM: {}", rom_path.display()))?;
        Ok(Self::from_core(gb))
    }

    fn advance_frame(&mut self) -> Result<()> {
        self.gb.next_frame();
        Ok(())
    }

    fn set_inputs(&mut self, buttons: Buttons) {
        for (key, pressed) in pad_changes(self.held, buttons) {
            if pressed {
                self.gb.key_press(key);
            } else {
                self.gb.key_lift(key);
            }
        }
        self.held = buttons;
    }

    fn write_byte(&mut self, addr: u16, value: u8) {
        self.gb.mmu().write(addr, value);
    }

    fn load_state(&mut self, path: &Path) -> Result<()> {
        let data = std::fs::read(path)
            .with_context(|| format!("Failed to read state: {}", path.display()))?;
        StateManager::load(&data, &mut self.gb, None, None)
            .map_err(|e| core_error("Failed to restore state", e))
            .with_context(|| format!("State: {}", path.display()))
    }

    fn save_state(&mut self, path: &Path) -> Result<()> {
        let data = StateManager::save(&mut self.gb, None, None)
            .map_err(|e| core_error("Failed to serialize state", e))?;
        std::fs::write(path, data)
            .with_context(|| format!("Failed to save state: {}", path.display()))
    }

    fn frame_size(&self) -> (usize, usize) {
        (GB_WIDTH, GB_HEIGHT)
    }

    fn frame_buffer(&mut self) -> &[u32] {
        let fb = self.gb.frame_buffer();
        blit_rgb_to_u32(&fb[..], &mut self.pixels);
        &self.pixels
    }
}
