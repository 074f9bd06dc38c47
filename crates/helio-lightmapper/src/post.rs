//! Image-space passes run on a finished lightmap.
//!
//! None of these allocate: `smooth` and `dilate` read one image and write
//! another of identical dimensions, `power` works in place. [`PingPong`]
//! owns the two buffers for callers who want to chain passes.

use crate::image::LightmapImage;
use crate::{BakeError, Result};

/// Neighbourhood used by [`dilate_with`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Connectivity {
    Four,
    #[default]
    Eight,
}

impl Connectivity {
    fn offsets(&self) -> &'static [(i32, i32)] {
        match self {
            Connectivity::Four => &[(0, -1), (-1, 0), (1, 0), (0, 1)],
            Connectivity::Eight => &[
                (-1, -1),
                (0, -1),
                (1, -1),
                (-1, 0),
                (1, 0),
                (-1, 1),
                (0, 1),
                (1, 1),
            ],
        }
    }
}

fn check_pair(src: &LightmapImage, dst: &LightmapImage) -> Result<()> {
    if !src.same_dimensions(dst) {
        return Err(BakeError::InvalidTarget(format!(
            "source is {}x{}x{} but destination is {}x{}x{}",
            src.width(),
            src.height(),
            src.channels(),
            dst.width(),
            dst.height(),
            dst.channels()
        )));
    }
    Ok(())
}

/// Average the written texels among `(x, y)`'s neighbours (plus itself when
/// `include_centre`) into `out`. Returns how many were averaged.
fn average_neighbours(
    src: &LightmapImage,
    x: u32,
    y: u32,
    offsets: &[(i32, i32)],
    include_centre: bool,
    out: &mut [f32],
) -> u32 {
    out.fill(0.0);
    let mut count = 0;
    let centre = include_centre.then_some((0, 0));
    for (dx, dy) in offsets.iter().copied().chain(centre) {
        let nx = x as i64 + dx as i64;
        let ny = y as i64 + dy as i64;
        if nx < 0 || ny < 0 || nx >= src.width() as i64 || ny >= src.height() as i64 {
            continue;
        }
        let (nx, ny) = (nx as u32, ny as u32);
        if !src.is_written(nx, ny) {
            continue;
        }
        for (o, &v) in out.iter_mut().zip(src.texel(nx, ny)) {
            *o += v;
        }
        count += 1;
    }
    if count > 0 {
        let inv = 1.0 / count as f32;
        out.iter_mut().for_each(|o| *o *= inv);
    }
    count
}

/// 3x3 box filter over written texels. Unwritten texels stay unwritten and
/// never bleed into their neighbours.
pub fn smooth(src: &LightmapImage, dst: &mut LightmapImage) -> Result<()> {
    check_pair(src, dst)?;
    let offsets = Connectivity::Eight.offsets();
    let mut scratch = [0.0f32; 4];
    let c = src.channels() as usize;

    for y in 0..src.height() {
        for x in 0..src.width() {
            let i = src.index(x, y);
            if !src.is_written(x, y) {
                dst.texel_mut(x, y).copy_from_slice(src.texel(x, y));
                dst.written_mask_mut()[i] = false;
                continue;
            }
            average_neighbours(src, x, y, offsets, true, &mut scratch[..c]);
            dst.texel_mut(x, y).copy_from_slice(&scratch[..c]);
            dst.written_mask_mut()[i] = true;
        }
    }
    Ok(())
}

/// Grow written regions by one texel (8-connected).
pub fn dilate(src: &LightmapImage, dst: &mut LightmapImage) -> Result<()> {
    dilate_with(src, dst, Connectivity::Eight)
}

/// Grow written regions by one texel: each unwritten texel with written
/// neighbours takes their average, everything else is copied.
pub fn dilate_with(src: &LightmapImage, dst: &mut LightmapImage, connectivity: Connectivity) -> Result<()> {
    check_pair(src, dst)?;
    let offsets = connectivity.offsets();
    let mut scratch = [0.0f32; 4];
    let c = src.channels() as usize;

    for y in 0..src.height() {
        for x in 0..src.width() {
            let i = src.index(x, y);
            if src.is_written(x, y) {
                dst.texel_mut(x, y).copy_from_slice(src.texel(x, y));
                dst.written_mask_mut()[i] = true;
                continue;
            }
            let filled = average_neighbours(src, x, y, offsets, false, &mut scratch[..c]) > 0;
            if filled {
                dst.texel_mut(x, y).copy_from_slice(&scratch[..c]);
            } else {
                dst.texel_mut(x, y).copy_from_slice(src.texel(x, y));
            }
            dst.written_mask_mut()[i] = filled;
        }
    }
    Ok(())
}

/// Raise every channel selected by `channel_mask` (bit `n` = channel `n`) to
/// `exponent`, in place. `0b0111` with `1.0 / 2.2` gamma-corrects RGB.
pub fn power(image: &mut LightmapImage, exponent: f32, channel_mask: u32) {
    let c = image.channels() as usize;
    for texel in image.data_mut().chunks_exact_mut(c) {
        for (channel, v) in texel.iter_mut().enumerate() {
            if channel_mask & (1 << channel) != 0 {
                *v = v.max(0.0).powf(exponent);
            }
        }
    }
}

/// Two same-sized images swapped by index, so chained passes never need a
/// shared scratch buffer.
#[derive(Debug, Clone)]
pub struct PingPong {
    buffers: [LightmapImage; 2],
    front: usize,
}

impl PingPong {
    /// Take `image` as the front buffer and allocate a matching back buffer.
    pub fn new(image: LightmapImage) -> Self {
        let back = image.clone();
        Self {
            buffers: [image, back],
            front: 0,
        }
    }

    pub fn front(&self) -> &LightmapImage {
        &self.buffers[self.front]
    }

    pub fn front_mut(&mut self) -> &mut LightmapImage {
        &mut self.buffers[self.front]
    }

    pub fn into_front(self) -> LightmapImage {
        let [a, b] = self.buffers;
        if self.front == 0 {
            a
        } else {
            b
        }
    }

    fn apply(&mut self, pass: impl Fn(&LightmapImage, &mut LightmapImage) -> Result<()>) -> Result<()> {
        let (first, second) = self.buffers.split_at_mut(1);
        let (src, dst) = if self.front == 0 {
            (&first[0], &mut second[0])
        } else {
            (&second[0], &mut first[0])
        };
        pass(src, dst)?;
        self.front = 1 - self.front;
        Ok(())
    }

    pub fn smooth(&mut self) -> Result<&mut Self> {
        self.apply(smooth)?;
        Ok(self)
    }

    pub fn dilate(&mut self, passes: u32) -> Result<&mut Self> {
        for _ in 0..passes {
            self.apply(dilate)?;
        }
        Ok(self)
    }

    pub fn power(&mut self, exponent: f32, channel_mask: u32) -> &mut Self {
        power(self.front_mut(), exponent, channel_mask);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    fn checker(width: u32, height: u32) -> LightmapImage {
        let mut image = LightmapImage::new(width, height, 4).unwrap();
        for y in 0..height {
            for x in 0..width {
                let v = if (x + y) % 2 == 0 { 0.2 } else { 0.8 };
                image.store(x, y, Vec3::splat(v), 1.0);
            }
        }
        image
    }

    #[test]
    fn test_dilate_fills_one_ring() {
        let mut src = LightmapImage::new(5, 5, 4).unwrap();
        src.store(2, 2, Vec3::new(1.0, 0.5, 0.25), 1.0);
        let mut dst = LightmapImage::new(5, 5, 4).unwrap();

        dilate(&src, &mut dst).unwrap();
        assert_eq!(dst.written_count(), 9);
        assert_eq!(dst.texel(1, 1), &[1.0, 0.5, 0.25, 1.0]);
        assert!(!dst.is_written(0, 0));

        dilate_with(&src, &mut dst, Connectivity::Four).unwrap();
        assert_eq!(dst.written_count(), 5);
    }

    #[test]
    fn test_dilate_fills_zero_alpha_texels() {
        let src =
            LightmapImage::from_data(2, 1, 4, vec![1.0, 1.0, 1.0, 0.0, 0.5, 0.5, 0.5, 1.0]).unwrap();
        let mut dst = LightmapImage::new(2, 1, 4).unwrap();
        dilate(&src, &mut dst).unwrap();
        assert!(dst.is_written(0, 0));
        assert_eq!(dst.texel(0, 0), &[0.5, 0.5, 0.5, 1.0]);
    }

    #[test]
    fn test_dilate_full_image_is_identity() {
        let src = checker(6, 4);
        let mut dst = LightmapImage::new(6, 4, 4).unwrap();
        dilate(&src, &mut dst).unwrap();
        assert_eq!(src, dst);
    }

    #[test]
    fn test_smooth_keeps_holes() {
        let mut src = LightmapImage::new(3, 3, 4).unwrap();
        src.store(0, 0, Vec3::ONE, 1.0);
        src.store(1, 0, Vec3::ZERO, 1.0);
        let mut dst = LightmapImage::new(3, 3, 4).unwrap();
        smooth(&src, &mut dst).unwrap();

        assert_eq!(dst.written_count(), 2);
        assert_eq!(dst.texel(0, 0), &[0.5, 0.5, 0.5, 1.0]);
        assert!(!dst.is_written(2, 2));
    }

    #[test]
    fn test_smooth_uniform_is_stable() {
        let mut src = LightmapImage::new(4, 4, 3).unwrap();
        for y in 0..4 {
            for x in 0..4 {
                src.store(x, y, Vec3::new(0.3, 0.6, 0.9), 1.0);
            }
        }
        let mut dst = LightmapImage::new(4, 4, 3).unwrap();
        smooth(&src, &mut dst).unwrap();
        for (a, b) in src.data().iter().zip(dst.data()) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_mismatched_buffers() {
        let src = LightmapImage::new(4, 4, 4).unwrap();
        let mut dst = LightmapImage::new(4, 4, 3).unwrap();
        assert!(matches!(
            dilate(&src, &mut dst),
            Err(BakeError::InvalidTarget(_))
        ));
        assert!(smooth(&src, &mut dst).is_err());
    }

    #[test]
    fn test_power_mask() {
        let mut image = LightmapImage::from_data(1, 1, 4, vec![0.25, 0.25, 0.25, 0.25]).unwrap();
        power(&mut image, 0.5, 0b0101);
        assert_eq!(image.texel(0, 0), &[0.5, 0.25, 0.5, 0.25]);
    }

    #[test]
    fn test_ping_pong_chain() {
        let mut image = LightmapImage::new(9, 1, 4).unwrap();
        image.store(4, 0, Vec3::ONE, 1.0);
        let mut chain = PingPong::new(image);
        chain.dilate(3).unwrap();
        assert_eq!(chain.front().written_count(), 7);
        chain.dilate(1).unwrap().power(2.0, 0b0111);
        let result = chain.into_front();
        assert_eq!(result.written_count(), 9);
        assert_eq!(result.texel(0, 0), &[1.0, 1.0, 1.0, 1.0]);
    }
}
