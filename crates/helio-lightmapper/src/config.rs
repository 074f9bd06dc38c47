use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::{BakeError, Result};

/// Upper bound for `interpolation_passes`; the coarsest stride is `2^passes`.
pub const MAX_INTERPOLATION_PASSES: u32 = 8;

/// How texels visited after the first interpolation pass are resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SampleMode {
    /// Fill a texel from its already-baked neighbours when they agree within
    /// `interpolation_threshold`, render a hemicube otherwise.
    #[default]
    Adaptive,
    /// Render a hemicube for every covered texel. Passes only change the
    /// visiting order.
    Full,
}

/// Configuration for a single bake.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BakeConfig {
    /// Hemicube front face resolution in pixels. Must be even, side faces are
    /// `hemicube_size x hemicube_size / 2`.
    pub hemicube_size: u32,
    pub z_near: f32,
    pub z_far: f32,
    /// Clear colour the caller renders as "sky". Returned for texels whose
    /// hemicube saw nothing usable.
    pub background: Vec3,
    /// Treat pixels equal to `background` as misses and drop them from the
    /// weighted sum. Off by default: for ambient occlusion the sky is the
    /// signal, so background pixels have to count. Turn it on when the
    /// background is only a fill colour for geometry that was not drawn.
    pub background_is_miss: bool,
    pub interpolation_passes: u32,
    /// Largest per-channel difference between neighbours that still allows a
    /// texel to be interpolated instead of rendered.
    pub interpolation_threshold: f32,
    pub sample_mode: SampleMode,
    /// Supersampling factor per texel axis used to place sample points.
    pub supersampling: u32,
    /// Distance the hemicube camera is pushed off the surface along the normal.
    pub surface_offset: f32,
}

impl BakeConfig {
    /// Fast settings for interactive previews.
    pub const PREVIEW: Self = Self {
        hemicube_size: 16,
        z_near: 0.001,
        z_far: 100.0,
        background: Vec3::ONE,
        background_is_miss: false,
        interpolation_passes: 2,
        interpolation_threshold: 0.01,
        sample_mode: SampleMode::Adaptive,
        supersampling: 1,
        surface_offset: 0.0,
    };

    /// Settings for final bakes.
    pub const PRODUCTION: Self = Self {
        hemicube_size: 64,
        interpolation_passes: 1,
        interpolation_threshold: 0.001,
        supersampling: 4,
        ..Self::PREVIEW
    };

    pub fn new() -> Self {
        Self::default()
    }

    /// Set the hemicube resolution, rounded up to an even size of at least 8.
    pub fn with_hemicube_size(mut self, size: u32) -> Self {
        let size = size.max(8);
        self.hemicube_size = size + (size & 1);
        self
    }

    pub fn with_clip_planes(mut self, z_near: f32, z_far: f32) -> Self {
        self.z_near = z_near;
        self.z_far = z_far;
        self
    }

    pub fn with_background(mut self, background: Vec3) -> Self {
        self.background = background.max(Vec3::ZERO);
        self
    }

    pub fn with_background_as_miss(mut self, enabled: bool) -> Self {
        self.background_is_miss = enabled;
        self
    }

    /// Set the number of coarse-to-fine interpolation passes (0 disables them)
    pub fn with_interpolation(mut self, passes: u32, threshold: f32) -> Self {
        self.interpolation_passes = passes.min(MAX_INTERPOLATION_PASSES);
        self.interpolation_threshold = threshold.max(0.0);
        self
    }

    pub fn with_sample_mode(mut self, mode: SampleMode) -> Self {
        self.sample_mode = mode;
        self
    }

    pub fn with_supersampling(mut self, factor: u32) -> Self {
        self.supersampling = factor.clamp(1, 16);
        self
    }

    pub fn with_surface_offset(mut self, offset: f32) -> Self {
        self.surface_offset = offset.max(0.0);
        self
    }

    /// Stride between texels visited in the first pass.
    pub fn coarsest_stride(&self) -> u32 {
        1 << self.interpolation_passes
    }

    pub fn pass_count(&self) -> u32 {
        self.interpolation_passes + 1
    }

    /// Check the configuration; public fields may have been set directly.
    pub fn validate(&self) -> Result<()> {
        if self.hemicube_size < 8 || self.hemicube_size % 2 != 0 {
            return Err(BakeError::InvalidConfiguration(format!(
                "hemicube size must be even and at least 8, got {}",
                self.hemicube_size
            )));
        }
        if !(self.z_near > 0.0 && self.z_far > self.z_near && self.z_far.is_finite()) {
            return Err(BakeError::InvalidConfiguration(format!(
                "clip planes must satisfy 0 < near < far, got {}..{}",
                self.z_near, self.z_far
            )));
        }
        if self.interpolation_passes > MAX_INTERPOLATION_PASSES {
            return Err(BakeError::InvalidConfiguration(format!(
                "at most {} interpolation passes are supported, got {}",
                MAX_INTERPOLATION_PASSES, self.interpolation_passes
            )));
        }
        if self.supersampling == 0 {
            return Err(BakeError::InvalidConfiguration(
                "supersampling factor must be at least 1".to_string(),
            ));
        }
        if !self.background.is_finite() || self.background.min_element() < 0.0 {
            return Err(BakeError::InvalidConfiguration(format!(
                "background colour must be finite and non-negative, got {}",
                self.background
            )));
        }
        Ok(())
    }
}

impl Default for BakeConfig {
    fn default() -> Self {
        Self {
            hemicube_size: 32,
            z_near: 0.001,
            z_far: 100.0,
            background: Vec3::ONE,
            background_is_miss: false,
            interpolation_passes: 0,
            interpolation_threshold: 0.01,
            sample_mode: SampleMode::Adaptive,
            supersampling: 1,
            surface_offset: 0.0,
        }
    }
}
