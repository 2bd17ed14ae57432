use crate::EXTRA_FEATURES;
use crate::state::GameFacts;

/// Downsamples a packed-RGB frame into a half-resolution luminance grid and
/// appends the raw game facts. Output length is fixed by the frame size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObservationEncoder {
    width: usize,
    height: usize,
}

#[inline]
fn luminance(pixel: u32) -> f32 {
    let r = ((pixel >> 16) & 0xFF) as f32;
    let g = ((pixel >> 8) & 0xFF) as f32;
    let b = (pixel & 0xFF) as f32;
    0.299 * r + 0.587 * g + 0.114 * b
}

impl ObservationEncoder {
    /// `width` and `height` must both be even; the environment checks this
    /// before building an encoder.
    pub fn new(width: usize, height: usize) -> Self {
        debug_assert!(width % 2 == 0 && height % 2 == 0);
        Self { width, height }
    }

    pub fn scaled_width(&self) -> usize {
        self.width / 2
    }

    pub fn scaled_height(&self) -> usize {
        self.height / 2
    }

    pub fn screen_len(&self) -> usize {
        self.scaled_width() * self.scaled_height()
    }

    pub fn len(&self) -> usize {
        self.screen_len() + EXTRA_FEATURES
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn encode(&self, pixels: &[u32], facts: &GameFacts) -> Vec<f32> {
        let mut out = vec![0.0; self.len()];
        self.encode_into(pixels, facts, &mut out);
        out
    }

    pub fn encode_into(&self, pixels: &[u32], facts: &GameFacts, out: &mut [f32]) {
        debug_assert_eq!(pixels.len(), self.width * self.height);
        debug_assert_eq!(out.len(), self.len());

        let sw = self.scaled_width();
        for sy in 0..self.scaled_height() {
            let top = &pixels[sy * 2 * self.width..][..self.width];
            let bottom = &pixels[(sy * 2 + 1) * self.width..][..self.width];
            for sx in 0..sw {
                let x = sx * 2;
                let sum = luminance(top[x])
                    + luminance(top[x + 1])
                    + luminance(bottom[x])
                    + luminance(bottom[x + 1]);
                out[sy * sw + sx] = sum * 0.25;
            }
        }

        let extras = &mut out[self.screen_len()..];
        extras[0] = facts.x as f32;
        extras[1] = facts.y as f32;
        extras[2] = facts.map_id as f32;
        extras[3] = facts.badges as f32;
        extras[4] = facts.party_count as f32;
    }
}
