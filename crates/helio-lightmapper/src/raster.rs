//! Conservative rasterization of UV triangles onto the lightmap grid.
//!
//! A texel is covered when the triangle clipped to the texel square keeps a
//! positive area, so thin slivers and texels straddling an edge still get a
//! sample. The sample point inside the texel is the box-filtered mean of the
//! supersample points that fall inside the triangle, or the centroid of the
//! clipped polygon when none do.

use glam::{UVec2, Vec2, Vec3};

/// Twice the signed area below which a UV triangle is considered degenerate.
const DEGENERATE_AREA: f32 = 1e-7;
/// Smallest clipped area (in texels) that counts as coverage.
const MIN_COVERAGE: f32 = 1e-6;
const INSIDE_EPSILON: f32 = 1e-6;

/// Barycentric coordinates of `p` in triangle `abc`.
pub fn barycentric(p: Vec2, a: Vec2, b: Vec2, c: Vec2) -> Vec3 {
    let v0 = b - a;
    let v1 = c - a;
    let v2 = p - a;
    let denom = v0.perp_dot(v1);
    if denom.abs() < f32::MIN_POSITIVE {
        return Vec3::new(1.0, 0.0, 0.0);
    }
    let v = v2.perp_dot(v1) / denom;
    let w = v0.perp_dot(v2) / denom;
    Vec3::new(1.0 - v - w, v, w)
}

/// Which texels of the lightmap grid a pass visits.
///
/// Pass `k` of an interpolated bake visits texels on the `stride` grid that
/// were not already on the coarser grid of the previous pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassFilter {
    pub stride: u32,
    pub first_pass: bool,
}

impl PassFilter {
    /// Every texel, single pass.
    pub const ALL: Self = Self {
        stride: 1,
        first_pass: true,
    };

    /// Filter for `pass` of `pass_count`. Passes past the last one behave
    /// like the last (stride 1).
    pub fn for_pass(pass: u32, pass_count: u32) -> Self {
        let shift = pass_count.saturating_sub(1).saturating_sub(pass).min(31);
        let stride = 1 << shift;
        Self {
            stride,
            first_pass: pass == 0,
        }
    }

    pub fn accepts(&self, x: u32, y: u32) -> bool {
        let s = self.stride;
        if x % s != 0 || y % s != 0 {
            return false;
        }
        self.first_pass || x % (2 * s) != 0 || y % (2 * s) != 0
    }
}

/// A covered texel and where inside the triangle its sample lies.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoveredTexel {
    pub x: u32,
    pub y: u32,
    pub barycentric: Vec3,
}

#[derive(Clone, Copy)]
struct Polygon {
    points: [Vec2; 8],
    len: usize,
}

impl Polygon {
    fn triangle(a: Vec2, b: Vec2, c: Vec2) -> Self {
        let mut points = [Vec2::ZERO; 8];
        points[..3].copy_from_slice(&[a, b, c]);
        Self { points, len: 3 }
    }

    fn points(&self) -> &[Vec2] {
        &self.points[..self.len]
    }

    /// Keep the part of the polygon where `distance(p) >= 0`.
    fn clip(&self, distance: impl Fn(Vec2) -> f32) -> Self {
        let mut out = Polygon {
            points: [Vec2::ZERO; 8],
            len: 0,
        };
        let pts = self.points();
        for i in 0..pts.len() {
            let current = pts[i];
            let next = pts[(i + 1) % pts.len()];
            let dc = distance(current);
            let dn = distance(next);
            if dc >= 0.0 {
                out.push(current);
            }
            if (dc >= 0.0) != (dn >= 0.0) {
                let t = dc / (dc - dn);
                out.push(current + (next - current) * t);
            }
        }
        out
    }

    fn push(&mut self, p: Vec2) {
        if self.len < self.points.len() {
            self.points[self.len] = p;
            self.len += 1;
        }
    }

    /// Absolute area and area centroid.
    fn area_centroid(&self) -> (f32, Vec2) {
        let pts = self.points();
        if pts.len() < 3 {
            return (0.0, Vec2::ZERO);
        }
        let mut area2 = 0.0;
        let mut centroid = Vec2::ZERO;
        for i in 0..pts.len() {
            let a = pts[i];
            let b = pts[(i + 1) % pts.len()];
            let cross = a.perp_dot(b);
            area2 += cross;
            centroid += (a + b) * cross;
        }
        if area2.abs() < f32::MIN_POSITIVE {
            return (0.0, Vec2::ZERO);
        }
        (area2.abs() * 0.5, centroid / (3.0 * area2))
    }
}

/// Row-major scan of the texels covered by one triangle.
pub struct TriangleRaster {
    uv: [Vec2; 3],
    min: UVec2,
    max: UVec2,
    cursor: UVec2,
    supersampling: u32,
    filter: PassFilter,
    done: bool,
}

impl TriangleRaster {
    /// `uv` are the triangle's texture coordinates in [0, 1]. Returns `None`
    /// when the triangle has no area in UV space or misses the lightmap.
    pub fn new(uv: [Vec2; 3], size: UVec2, supersampling: u32, filter: PassFilter) -> Option<Self> {
        let scale = size.as_vec2();
        let uv = uv.map(|t| t * scale);
        let area2 = (uv[1] - uv[0]).perp_dot(uv[2] - uv[0]);
        if !area2.is_finite() || area2.abs() < DEGENERATE_AREA {
            return None;
        }

        let lo = uv[0].min(uv[1]).min(uv[2]).floor();
        let hi = uv[0].max(uv[1]).max(uv[2]).ceil() - Vec2::ONE;
        if hi.x < 0.0 || hi.y < 0.0 || lo.x >= scale.x || lo.y >= scale.y {
            return None;
        }
        let limit = size - UVec2::ONE;
        let min = lo.max(Vec2::ZERO).as_uvec2().min(limit);
        let max = hi.max(Vec2::ZERO).as_uvec2().min(limit);

        Some(Self {
            uv,
            min,
            max,
            cursor: min,
            supersampling: supersampling.max(1),
            filter,
            done: false,
        })
    }

    /// Whether the UV triangle would produce no texels at all.
    pub fn is_degenerate(uv: [Vec2; 3]) -> bool {
        let area2 = (uv[1] - uv[0]).perp_dot(uv[2] - uv[0]);
        !area2.is_finite() || area2.abs() < DEGENERATE_AREA
    }

    /// Texel-space bounding box, inclusive.
    pub fn bounds(&self) -> (UVec2, UVec2) {
        (self.min, self.max)
    }

    fn advance(&mut self) {
        if self.cursor.x < self.max.x {
            self.cursor.x += 1;
        } else if self.cursor.y < self.max.y {
            self.cursor.x = self.min.x;
            self.cursor.y += 1;
        } else {
            self.done = true;
        }
    }

    /// Next covered texel in scan order.
    pub fn next_texel(&mut self) -> Option<CoveredTexel> {
        while !self.done {
            let UVec2 { x, y } = self.cursor;
            self.advance();
            if !self.filter.accepts(x, y) {
                continue;
            }
            if let Some(barycentric) = self.sample(x, y) {
                return Some(CoveredTexel { x, y, barycentric });
            }
        }
        None
    }

    /// Barycentric sample position for texel `(x, y)`, `None` if uncovered.
    pub fn sample(&self, x: u32, y: u32) -> Option<Vec3> {
        let [a, b, c] = self.uv;
        let x0 = x as f32;
        let y0 = y as f32;

        let clipped = Polygon::triangle(a, b, c)
            .clip(|p| p.x - x0)
            .clip(|p| x0 + 1.0 - p.x)
            .clip(|p| p.y - y0)
            .clip(|p| y0 + 1.0 - p.y);
        let (area, centroid) = clipped.area_centroid();
        if area < MIN_COVERAGE {
            return None;
        }

        let n = self.supersampling;
        let step = 1.0 / n as f32;
        let mut sum = Vec3::ZERO;
        let mut count = 0u32;
        for j in 0..n {
            for i in 0..n {
                let p = Vec2::new(x0 + (i as f32 + 0.5) * step, y0 + (j as f32 + 0.5) * step);
                let bary = barycentric(p, a, b, c);
                if bary.min_element() >= -INSIDE_EPSILON {
                    sum += bary;
                    count += 1;
                }
            }
        }

        let bary = if count > 0 {
            sum / count as f32
        } else {
            barycentric(centroid, a, b, c)
        };
        let bary = bary.max(Vec3::ZERO);
        Some(bary / bary.element_sum())
    }
}

impl Iterator for TriangleRaster {
    type Item = CoveredTexel;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_texel()
    }
}
