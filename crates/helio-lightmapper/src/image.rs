use glam::Vec3;

use crate::{BakeError, Result};

/// Float lightmap allocated by the caller and written texel by texel.
///
/// Alongside the float channels the image keeps a written mask so texels
/// that legitimately baked to black are still told apart from texels no
/// triangle covered.
#[derive(Debug, Clone, PartialEq)]
pub struct LightmapImage {
    width: u32,
    height: u32,
    channels: u32,
    data: Vec<f32>,
    written: Vec<bool>,
}

impl LightmapImage {
    /// Zeroed image with nothing written.
    pub fn new(width: u32, height: u32, channels: u32) -> Result<Self> {
        Self::check_layout(width, height, channels)?;
        let texels = width as usize * height as usize;
        Ok(Self {
            width,
            height,
            channels,
            data: vec![0.0; texels * channels as usize],
            written: vec![false; texels],
        })
    }

    /// Wrap caller-initialized data. With four channels a texel counts as
    /// written when its alpha is non-zero; with fewer, when any channel is.
    pub fn from_data(width: u32, height: u32, channels: u32, data: Vec<f32>) -> Result<Self> {
        Self::check_layout(width, height, channels)?;
        let expected = width as usize * height as usize * channels as usize;
        if data.len() != expected {
            return Err(BakeError::InvalidTarget(format!(
                "{}x{}x{} lightmap needs {} floats, got {}",
                width,
                height,
                channels,
                expected,
                data.len()
            )));
        }
        let written = data
            .chunks_exact(channels as usize)
            .map(|texel| match texel.get(3) {
                Some(&alpha) => alpha != 0.0,
                None => texel.iter().any(|&v| v != 0.0),
            })
            .collect();
        Ok(Self {
            width,
            height,
            channels,
            data,
            written,
        })
    }

    fn check_layout(width: u32, height: u32, channels: u32) -> Result<()> {
        if width == 0 || height == 0 {
            return Err(BakeError::InvalidTarget(format!(
                "lightmap dimensions must be non-zero, got {width}x{height}"
            )));
        }
        if !(1..=4).contains(&channels) {
            return Err(BakeError::InvalidTarget(format!(
                "lightmap needs 1 to 4 channels, got {channels}"
            )));
        }
        Ok(())
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> u32 {
        self.channels
    }

    pub fn texel_count(&self) -> usize {
        self.written.len()
    }

    pub fn same_dimensions(&self, other: &LightmapImage) -> bool {
        self.width == other.width && self.height == other.height && self.channels == other.channels
    }

    /// Linear texel index of `(x, y)`.
    pub fn index(&self, x: u32, y: u32) -> usize {
        y as usize * self.width as usize + x as usize
    }

    pub fn texel(&self, x: u32, y: u32) -> &[f32] {
        let c = self.channels as usize;
        let start = self.index(x, y) * c;
        &self.data[start..start + c]
    }

    pub fn texel_mut(&mut self, x: u32, y: u32) -> &mut [f32] {
        let c = self.channels as usize;
        let start = self.index(x, y) * c;
        &mut self.data[start..start + c]
    }

    pub fn is_written(&self, x: u32, y: u32) -> bool {
        self.written[self.index(x, y)]
    }

    pub fn mark_written(&mut self, x: u32, y: u32) {
        let i = self.index(x, y);
        self.written[i] = true;
    }

    pub fn clear_written(&mut self) {
        self.written.fill(false);
    }

    pub fn written_count(&self) -> usize {
        self.written.iter().filter(|&&w| w).count()
    }

    pub(crate) fn written_mask_mut(&mut self) -> &mut [bool] {
        &mut self.written
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Write a finished texel: colour into the first three channels (as many
    /// as exist), `alpha` into the fourth.
    pub fn store(&mut self, x: u32, y: u32, rgb: Vec3, alpha: f32) {
        let texel = self.texel_mut(x, y);
        let colour = rgb.to_array();
        for (dst, &src) in texel.iter_mut().take(3).zip(colour.iter()) {
            *dst = src;
        }
        if let Some(a) = texel.get_mut(3) {
            *a = alpha;
        }
        self.mark_written(x, y);
    }

    /// Quantize to 8-bit RGBA for upload; absent channels are filled from the
    /// first channel and alpha defaults to opaque.
    pub fn to_rgba8(&self) -> Vec<u8> {
        let quantize = |v: f32| (v.clamp(0.0, 1.0) * 255.0) as u8;
        let mut out = Vec::with_capacity(self.texel_count() * 4);
        for texel in self.data.chunks_exact(self.channels as usize) {
            let rgba = match texel.len() {
                1 => [texel[0], texel[0], texel[0], 1.0],
                2 => [texel[0], texel[1], 0.0, 1.0],
                3 => [texel[0], texel[1], texel[2], 1.0],
                _ => [texel[0], texel[1], texel[2], texel[3]],
            };
            out.extend(rgba.map(quantize));
        }
        out
    }
}
