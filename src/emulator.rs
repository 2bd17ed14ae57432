use anyhow::Result;
use std::path::Path;

// =============================================================================
// Emulator Collaborator Contract
// =============================================================================

/// Flat byte-addressable view of console memory.
pub trait Memory {
    fn read_byte(&self, addr: u16) -> u8;
}

/// Out-of-range reads return 0, matching an unmapped bus.
impl Memory for [u8] {
    fn read_byte(&self, addr: u16) -> u8 {
        self.get(addr as usize).copied().unwrap_or(0)
    }
}

impl Memory for Vec<u8> {
    fn read_byte(&self, addr: u16) -> u8 {
        self.as_slice().read_byte(addr)
    }
}

/// The emulator core the harness drives. Implementations own ROM loading,
/// CPU/PPU timing and the persisted-state format; the harness only needs
/// frame advance, input, memory access and the frame buffer.
pub trait Emulator: Memory {
    fn open(rom_path: &Path) -> Result<Self>
    where
        Self: Sized;

    fn advance_frame(&mut self) -> Result<()>;

    /// Held until the next call.
    fn set_inputs(&mut self, buttons: Buttons);

    fn write_byte(&mut self, addr: u16, value: u8);

    fn load_state(&mut self, path: &Path) -> Result<()>;

    fn save_state(&mut self, path: &Path) -> Result<()>;

    /// Native (width, height) in pixels.
    fn frame_size(&self) -> (usize, usize);

    /// Row-major packed `0x00RRGGBB` pixels, `width * height` long.
    fn frame_buffer(&mut self) -> &[u32];
}

// =============================================================================
// Button Bitmask
// =============================================================================

/// Native 8-button pad state, one bit per button.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Buttons(u8);

impl Buttons {
    pub const NONE: Buttons = Buttons(0);
    pub const A: Buttons = Buttons(1 << 0);
    pub const B: Buttons = Buttons(1 << 1);
    pub const SELECT: Buttons = Buttons(1 << 2);
    pub const START: Buttons = Buttons(1 << 3);
    pub const RIGHT: Buttons = Buttons(1 << 4);
    pub const LEFT: Buttons = Buttons(1 << 5);
    pub const UP: Buttons = Buttons(1 << 6);
    pub const DOWN: Buttons = Buttons(1 << 7);

    pub const ALL: [Buttons; 8] = [
        Buttons::A,
        Buttons::B,
        Buttons::SELECT,
        Buttons::START,
        Buttons::RIGHT,
        Buttons::LEFT,
        Buttons::UP,
        Buttons::DOWN,
    ];

    pub const fn from_bits(bits: u8) -> Self {
        Buttons(bits)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, other: Buttons) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for Buttons {
    type Output = Buttons;

    fn bitor(self, rhs: Buttons) -> Buttons {
        Buttons(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for Buttons {
    fn bitor_assign(&mut self, rhs: Buttons) {
        self.0 |= rhs.0;
    }
}
