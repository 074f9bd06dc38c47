use glam::{Vec3, Vec4};

use crate::hemicube::Viewport;
use crate::{BakeError, Result};

/// Per-channel tolerance when matching rendered pixels against the background.
const BACKGROUND_TOLERANCE: f32 = 1.0 / 512.0;

/// Rendered pixels for one hemicube face, tightly packed RGBA with row 0 at
/// the top of the viewport.
///
/// Alpha carries validity: the caller's renderer writes 0 for back faces or
/// anything that should not count, those pixels are dropped from the sum.
#[derive(Debug, Clone, Copy)]
pub enum FacePixels<'a> {
    Rgba32F(&'a [f32]),
    Rgba8(&'a [u8]),
}

impl<'a> FacePixels<'a> {
    /// View an `[f32; 4]` slice without copying.
    pub fn from_rgba(pixels: &'a [[f32; 4]]) -> Self {
        FacePixels::Rgba32F(bytemuck::cast_slice(pixels))
    }

    fn components(&self) -> usize {
        match self {
            FacePixels::Rgba32F(data) => data.len(),
            FacePixels::Rgba8(data) => data.len(),
        }
    }

    pub fn pixel_count(&self) -> usize {
        self.components() / 4
    }

    pub fn pixel(&self, i: usize) -> Vec4 {
        match self {
            FacePixels::Rgba32F(data) => Vec4::from_slice(&data[i * 4..i * 4 + 4]),
            FacePixels::Rgba8(data) => {
                let p = &data[i * 4..i * 4 + 4];
                Vec4::new(p[0] as f32, p[1] as f32, p[2] as f32, p[3] as f32) / 255.0
            }
        }
    }

    /// Check the buffer against the viewport it was rendered into.
    pub fn check(&self, viewport: &Viewport) -> Result<()> {
        if self.components() % 4 != 0 {
            return Err(BakeError::InvalidTarget(format!(
                "face buffer has {} components, not a whole number of RGBA pixels",
                self.components()
            )));
        }
        if self.pixel_count() != viewport.pixel_count() {
            return Err(BakeError::InvalidTarget(format!(
                "face buffer has {} pixels but the viewport is {}x{}",
                self.pixel_count(),
                viewport.width,
                viewport.height
            )));
        }
        Ok(())
    }
}

/// Weighted running sum for the texel currently being baked.
#[derive(Debug, Clone, Default)]
pub struct Accumulator {
    rgb: Vec3,
    weight: f32,
    excluded: f32,
    faces: u32,
}

impl Accumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn faces(&self) -> u32 {
        self.faces
    }

    pub fn weight(&self) -> f32 {
        self.weight
    }

    /// Add one face. `weights` must match the face's pixel layout; `miss`
    /// is the background colour when background pixels should be dropped.
    pub fn accumulate(&mut self, pixels: &FacePixels<'_>, weights: &[f32], miss: Option<Vec3>) {
        for (i, &w) in weights.iter().enumerate().take(pixels.pixel_count()) {
            let p = pixels.pixel(i);
            let rgb = p.truncate();
            let is_miss = miss.is_some_and(|bg| (rgb - bg).abs().max_element() <= BACKGROUND_TOLERANCE);
            if p.w <= 0.0 || is_miss || !rgb.is_finite() {
                self.excluded += w;
                continue;
            }
            self.rgb += rgb * w;
            self.weight += w;
        }
        self.faces += 1;
    }

    /// Fraction of the integrated weight that was usable.
    pub fn coverage(&self) -> f32 {
        let total = self.weight + self.excluded;
        if total > 0.0 {
            self.weight / total
        } else {
            0.0
        }
    }

    /// Weighted average, or `background` if nothing usable was seen.
    pub fn resolve(&self, background: Vec3) -> Vec3 {
        if self.weight > 0.0 {
            self.rgb / self.weight
        } else {
            background
        }
    }
}
