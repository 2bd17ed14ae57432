#![allow(dead_code)]

use anyhow::{Context, Result, ensure};
use std::path::Path;

use pokered_rl::{
    Buttons, EnvConfig, Emulator, GameProfile, Memory, PokeEnv, RamLayout, RewardConfig,
};

pub const WIDTH: usize = 160;
pub const HEIGHT: usize = 144;
pub const RAM_SIZE: usize = 0x10000;

/// In-memory stand-in for an emulator core. The d-pad walks the player one
/// tile per frame; every pixel is a gray level equal to `frames % 256`.
pub struct FakeEmulator {
    pub ram: Vec<u8>,
    pub frames: u64,
    pub inputs: Buttons,
    pub layout: RamLayout,
    /// Frame count at which `advance_frame` panics.
    pub panic_at: Option<u64>,
    width: usize,
    height: usize,
    pixels: Vec<u32>,
}

impl Default for FakeEmulator {
    fn default() -> Self {
        Self::with_size(WIDTH, HEIGHT)
    }
}

impl FakeEmulator {
    pub fn with_size(width: usize, height: usize) -> Self {
        Self {
            ram: vec![0; RAM_SIZE],
            frames: 0,
            inputs: Buttons::NONE,
            layout: RamLayout::default(),
            panic_at: None,
            width,
            height,
            pixels: vec![0; width * height],
        }
    }

    pub fn with_layout(mut self, layout: RamLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn poke(mut self, addr: u16, value: u8) -> Self {
        self.ram[addr as usize] = value;
        self
    }

    pub fn panics_at(mut self, frame: u64) -> Self {
        self.panic_at = Some(frame);
        self
    }

    /// Places the player at `(x, y)` on `map`.
    pub fn at(self, map: u8, x: u8, y: u8) -> Self {
        let (mx, px, py) = (self.layout.map_id, self.layout.player_x, self.layout.player_y);
        self.poke(mx, map).poke(px, x).poke(py, y)
    }
}

impl Memory for FakeEmulator {
    fn read_byte(&self, addr: u16) -> u8 {
        self.ram[addr as usize]
    }
}

impl Emulator for FakeEmulator {
    fn open(rom_path: &Path) -> Result<Self> {
        ensure!(rom_path.is_file(), "no ROM at {}", rom_path.display());
        Ok(Self::default())
    }

    fn advance_frame(&mut self) -> Result<()> {
        self.frames += 1;
        if self.panic_at == Some(self.frames) {
            panic!("core fault at frame {}", self.frames);
        }
        let (x, y) = (self.layout.player_x as usize, self.layout.player_y as usize);
        if self.inputs.contains(Buttons::RIGHT) {
            self.ram[x] = self.ram[x].wrapping_add(1);
        }
        if self.inputs.contains(Buttons::LEFT) {
            self.ram[x] = self.ram[x].wrapping_sub(1);
        }
        if self.inputs.contains(Buttons::DOWN) {
            self.ram[y] = self.ram[y].wrapping_add(1);
        }
        if self.inputs.contains(Buttons::UP) {
            self.ram[y] = self.ram[y].wrapping_sub(1);
        }
        Ok(())
    }

    fn set_inputs(&mut self, buttons: Buttons) {
        self.inputs = buttons;
    }

    fn write_byte(&mut self, addr: u16, value: u8) {
        self.ram[addr as usize] = value;
    }

    fn load_state(&mut self, path: &Path) -> Result<()> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read state: {}", path.display()))?;
        ensure!(bytes.len() == RAM_SIZE, "state is {} bytes, expected {RAM_SIZE}", bytes.len());
        self.ram = bytes;
        Ok(())
    }

    fn save_state(&mut self, path: &Path) -> Result<()> {
        std::fs::write(path, &self.ram)
            .with_context(|| format!("Failed to write state: {}", path.display()))
    }

    fn frame_size(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    fn frame_buffer(&mut self) -> &[u32] {
        let g = (self.frames % 256) as u32;
        self.pixels.fill((g << 16) | (g << 8) | g);
        &self.pixels
    }
}

/// Soft-reset config so tests do not need a state file.
pub fn config() -> EnvConfig {
    EnvConfig {
        full_reset: false,
        ..EnvConfig::new("fake.rom")
    }
}

pub fn env_with(emu: FakeEmulator, config: EnvConfig) -> PokeEnv<FakeEmulator> {
    PokeEnv::with_emulator(emu, config, RewardConfig::default(), GameProfile::default()).unwrap()
}

pub fn env(config: EnvConfig) -> PokeEnv<FakeEmulator> {
    env_with(FakeEmulator::default().at(1, 10, 10), config)
}

pub fn approx(a: f32, b: f32) -> bool {
    (a - b).abs() < 1e-6
}
