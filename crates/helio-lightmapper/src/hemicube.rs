//! Hemicube cameras and integration weights.
//!
//! A hemicube around a surface point is one full frustum looking along the
//! normal and four half frusta looking sideways, each cut at the horizon.
//! For a resolution `S` the front face is `S x S` pixels and each side face
//! `S x S/2`. The five faces tile a `3S x S` atlas:
//!
//! ```text
//! +---------+---------+---------+
//! |         |  right  |   up    |
//! |  front  +---------+---------+
//! |         |  left   |  down   |
//! +---------+---------+---------+
//! ```
//!
//! Pixel rows are top-down. On side faces the top row is the one closest to
//! the surface normal.

use glam::{Mat4, Vec3, Vec4};

/// One of the five hemicube faces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HemicubeFace {
    Front,
    Right,
    Left,
    Up,
    Down,
}

impl HemicubeFace {
    pub const ALL: [HemicubeFace; 5] = [
        HemicubeFace::Front,
        HemicubeFace::Right,
        HemicubeFace::Left,
        HemicubeFace::Up,
        HemicubeFace::Down,
    ];

    pub const COUNT: usize = 5;

    pub fn index(&self) -> usize {
        match self {
            HemicubeFace::Front => 0,
            HemicubeFace::Right => 1,
            HemicubeFace::Left => 2,
            HemicubeFace::Up => 3,
            HemicubeFace::Down => 4,
        }
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn is_side(&self) -> bool {
        !matches!(self, HemicubeFace::Front)
    }

    /// Pixel rectangle of this face inside the `3S x S` atlas.
    pub fn viewport(&self, size: u32) -> Viewport {
        let half = size / 2;
        match self {
            HemicubeFace::Front => Viewport::new(0, 0, size, size),
            HemicubeFace::Right => Viewport::new(size, 0, size, half),
            HemicubeFace::Left => Viewport::new(size, half, size, half),
            HemicubeFace::Up => Viewport::new(2 * size, 0, size, half),
            HemicubeFace::Down => Viewport::new(2 * size, half, size, half),
        }
    }
}

/// Size of the render target that holds all five faces.
pub fn atlas_size(size: u32) -> (u32, u32) {
    (3 * size, size)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn to_array(&self) -> [u32; 4] {
        [self.x, self.y, self.width, self.height]
    }
}

/// Surface point a hemicube is rendered from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplePoint {
    pub position: Vec3,
    pub normal: Vec3,
}

impl SamplePoint {
    /// Orthonormal `(tangent, bitangent)` around the normal.
    pub fn basis(&self) -> (Vec3, Vec3) {
        self.normal.any_orthonormal_pair()
    }

    /// Viewing direction and up vector of `face`.
    pub fn orientation(&self, face: HemicubeFace) -> (Vec3, Vec3) {
        let (tangent, bitangent) = self.basis();
        match face {
            HemicubeFace::Front => (self.normal, bitangent),
            HemicubeFace::Right => (tangent, self.normal),
            HemicubeFace::Left => (-tangent, self.normal),
            HemicubeFace::Up => (bitangent, self.normal),
            HemicubeFace::Down => (-bitangent, self.normal),
        }
    }
}

/// Right-handed off-centre perspective projection with depth in [0, 1].
fn frustum_rh(left: f32, right: f32, bottom: f32, top: f32, near: f32, far: f32) -> Mat4 {
    let inv_width = 1.0 / (right - left);
    let inv_height = 1.0 / (top - bottom);
    let r = far / (near - far);
    Mat4::from_cols(
        Vec4::new(2.0 * near * inv_width, 0.0, 0.0, 0.0),
        Vec4::new(0.0, 2.0 * near * inv_height, 0.0, 0.0),
        Vec4::new(
            (right + left) * inv_width,
            (top + bottom) * inv_height,
            r,
            -1.0,
        ),
        Vec4::new(0.0, 0.0, r * near, 0.0),
    )
}

/// View and projection matrices for rendering `face` from `sample`.
pub fn face_matrices(sample: &SamplePoint, face: HemicubeFace, z_near: f32, z_far: f32) -> (Mat4, Mat4) {
    let (forward, up) = sample.orientation(face);
    let view = Mat4::look_to_rh(sample.position, forward, up);
    let projection = if face.is_side() {
        frustum_rh(-z_near, z_near, 0.0, z_near, z_near, z_far)
    } else {
        frustum_rh(-z_near, z_near, -z_near, z_near, z_near, z_far)
    };
    (view, projection)
}

/// Per-pixel `cos(theta) * solid angle` weights for one hemicube resolution.
///
/// Derived analytically: a pixel at `(u, v)` on a face plane at unit distance
/// subtends `dA / (1 + u^2 + v^2)^(3/2)`, and its cosine to the normal is
/// `1 / sqrt(1 + u^2 + v^2)` on the front face and `v / sqrt(1 + u^2 + v^2)`
/// on the sides. All five faces together integrate to pi.
#[derive(Debug, Clone)]
pub struct HemicubeWeights {
    size: u32,
    front: Vec<f32>,
    side: Vec<f32>,
}

impl HemicubeWeights {
    pub fn new(size: u32) -> Self {
        let half = size / 2;
        let texel = 2.0 / size as f32;
        let area = texel * texel;
        let coord = |i: u32| -1.0 + (i as f32 + 0.5) * texel;

        let mut front = Vec::with_capacity((size * size) as usize);
        for j in 0..size {
            let v = -coord(j);
            for i in 0..size {
                let u = coord(i);
                let d = 1.0 + u * u + v * v;
                front.push(area / (d * d));
            }
        }

        let mut side = Vec::with_capacity((size * half) as usize);
        for j in 0..half {
            let v = 1.0 - (j as f32 + 0.5) * texel;
            for i in 0..size {
                let u = coord(i);
                let d = 1.0 + u * u + v * v;
                side.push(v * area / (d * d));
            }
        }

        Self { size, front, side }
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    /// Row-major weights for `face`, sized like its viewport.
    pub fn face(&self, face: HemicubeFace) -> &[f32] {
        if face.is_side() {
            &self.side
        } else {
            &self.front
        }
    }

    /// Sum of all weights across the five faces.
    pub fn total(&self) -> f32 {
        self.front.iter().sum::<f32>() + 4.0 * self.side.iter().sum::<f32>()
    }
}
