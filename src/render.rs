use anyhow::{Context, Result};
use minifb::{Key, Scale, Window, WindowOptions};
use std::collections::HashMap;
use tracing::debug;

use crate::emulator::Buttons;

/// Opaque handle to a window owned by a [`RenderHub`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowId(u32);

/// Owns every open window. Environments hold only a `WindowId`; nothing in
/// the step path depends on a window existing.
pub struct RenderHub {
    windows: HashMap<WindowId, Window>,
    next_id: u32,
    scale: Scale,
}

impl Default for RenderHub {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderHub {
    pub fn new() -> Self {
        Self {
            windows: HashMap::new(),
            next_id: 0,
            scale: Scale::X2,
        }
    }

    pub fn with_scale(mut self, scale: Scale) -> Self {
        self.scale = scale;
        self
    }

    pub fn register(&mut self, title: &str, width: usize, height: usize) -> Result<WindowId> {
        let mut window = Window::new(
            title,
            width,
            height,
            WindowOptions {
                resize: true,
                scale: self.scale,
                ..Default::default()
            },
        )
        .with_context(|| format!("Failed to open window: {title}"))?;
        // presenting never waits on the display
        window.set_target_fps(0);

        let id = WindowId(self.next_id);
        self.next_id += 1;
        self.windows.insert(id, window);
        debug!(window = id.0, title, "window registered");
        Ok(id)
    }

    /// Draws `pixels` into the window. Returns `false`, and drops the
    /// window, once the user has closed it or the id is unknown.
    pub fn present(&mut self, id: WindowId, pixels: &[u32], width: usize, height: usize) -> Result<bool> {
        let Some(window) = self.windows.get_mut(&id) else {
            return Ok(false);
        };
        if !window.is_open() {
            self.unregister(id);
            return Ok(false);
        }
        window
            .update_with_buffer(pixels, width, height)
            .context("Failed to present frame")?;
        Ok(true)
    }

    pub fn unregister(&mut self, id: WindowId) -> bool {
        let removed = self.windows.remove(&id).is_some();
        if removed {
            debug!(window = id.0, "window unregistered");
        }
        removed
    }

    pub fn window(&self, id: WindowId) -> Option<&Window> {
        self.windows.get(&id)
    }

    pub fn is_open(&self, id: WindowId) -> bool {
        self.windows.get(&id).is_some_and(Window::is_open)
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

/// Keyboard layout: arrows move, Z = B, X = A, A = Select, S = Start.
pub fn buttons_held(window: &Window) -> Buttons {
    const KEYMAP: [(Key, Buttons); 8] = [
        (Key::Left, Buttons::LEFT),
        (Key::Right, Buttons::RIGHT),
        (Key::Up, Buttons::UP),
        (Key::Down, Buttons::DOWN),
        (Key::Z, Buttons::B),
        (Key::X, Buttons::A),
        (Key::A, Buttons::SELECT),
        (Key::S, Buttons::START),
    ];
    let mut held = Buttons::NONE;
    for (key, button) in KEYMAP {
        if window.is_key_down(key) {
            held |= button;
        }
    }
    held
}
