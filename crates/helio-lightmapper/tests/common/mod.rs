//! Shared helpers for lightmapper integration tests.

#![allow(dead_code)]

use helio_lightmapper::{
    FaceRenderer, FaceRequest, IndexFormat, IndexStream, MeshView, Result, VertexStream,
};

/// Position + UV, interleaved.
#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct PosUv {
    pub p: [f32; 3],
    pub t: [f32; 2],
}

pub const STRIDE: usize = std::mem::size_of::<PosUv>();

pub struct TestMesh {
    pub vertices: Vec<PosUv>,
    pub indices: Vec<u16>,
}

impl TestMesh {
    /// `cols x rows` quads in the XY plane, UVs spanning `[0, uv_extent]^2`.
    pub fn grid(cols: u32, rows: u32, uv_extent: f32) -> Self {
        let mut vertices = Vec::new();
        for j in 0..=rows {
            for i in 0..=cols {
                let u = i as f32 / cols as f32;
                let v = j as f32 / rows as f32;
                vertices.push(PosUv {
                    p: [u * cols as f32, v * rows as f32, 0.0],
                    t: [u * uv_extent, v * uv_extent],
                });
            }
        }

        let mut indices = Vec::new();
        let row = (cols + 1) as u16;
        for j in 0..rows as u16 {
            for i in 0..cols as u16 {
                let a = j * row + i;
                let b = a + 1;
                let c = a + row + 1;
                let d = a + row;
                indices.extend_from_slice(&[a, b, c, a, c, d]);
            }
        }
        Self { vertices, indices }
    }

    /// The unit quad: two triangles with UVs over `[0, 1]^2`.
    pub fn unit_quad() -> Self {
        Self::grid(1, 1, 1.0)
    }

    /// A single triangle whose UVs are collinear.
    pub fn degenerate() -> Self {
        Self {
            vertices: vec![
                PosUv { p: [0.0, 0.0, 0.0], t: [0.1, 0.1] },
                PosUv { p: [1.0, 0.0, 0.0], t: [0.5, 0.5] },
                PosUv { p: [0.0, 1.0, 0.0], t: [0.9, 0.9] },
            ],
            indices: vec![0, 1, 2],
        }
    }

    pub fn view(&self) -> MeshView<'_> {
        let bytes: &[u8] = bytemuck::cast_slice(&self.vertices);
        MeshView::new(
            self.vertices.len(),
            VertexStream::positions(bytes, 0, STRIDE),
            VertexStream::uvs(bytes, 12, STRIDE),
        )
        .with_indices(IndexStream::new(
            bytemuck::cast_slice(&self.indices),
            IndexFormat::Uint16,
            self.indices.len(),
        ))
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }
}

/// Fills every face with one colour.
pub struct UniformRenderer {
    pub colour: [f32; 4],
    pub faces: usize,
}

impl UniformRenderer {
    pub fn new(colour: [f32; 4]) -> Self {
        Self { colour, faces: 0 }
    }
}

impl FaceRenderer for UniformRenderer {
    fn render(&mut self, _request: &FaceRequest, pixels: &mut [f32]) -> Result<()> {
        for pixel in pixels.chunks_exact_mut(4) {
            pixel.copy_from_slice(&self.colour);
        }
        self.faces += 1;
        Ok(())
    }
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn assert_close(a: f32, b: f32, tolerance: f32) {
    assert!(
        (a - b).abs() <= tolerance,
        "{a} differs from {b} by more than {tolerance}"
    );
}
