//! Zero-copy mesh access.
//!
//! The baker never owns mesh memory. Callers describe where positions, UVs and
//! (optionally) normals live inside their own vertex bytes with an
//! offset/stride pair, and hand over their index bytes together with the
//! index width. Everything is validated once by [`MeshView::validate`]; after
//! that, reads are plain bounds-checked slices.
//!
//! ```ignore
//! #[repr(C)]
//! #[derive(Clone, Copy, Pod, Zeroable)]
//! struct PosUv { p: [f32; 3], t: [f32; 2] }
//!
//! let bytes: &[u8] = bytemuck::cast_slice(&vertices);
//! let mesh = MeshView::new(
//!     vertices.len(),
//!     VertexStream::positions(bytes, 0, 20),
//!     VertexStream::uvs(bytes, 12, 20),
//! )
//! .with_indices(IndexStream::new(bytemuck::cast_slice(&indices), IndexFormat::Uint16, indices.len()));
//! ```

use glam::{Mat3, Mat4, Vec2, Vec3};

use crate::{BakeError, Result};

/// Encoding of a single vertex attribute component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeFormat {
    Float32,
    /// Normalized `u16`, mapped to [0, 1].
    Unorm16,
    /// Normalized `u8`, mapped to [0, 1].
    Unorm8,
}

impl AttributeFormat {
    pub fn size(&self) -> usize {
        match self {
            AttributeFormat::Float32 => 4,
            AttributeFormat::Unorm16 => 2,
            AttributeFormat::Unorm8 => 1,
        }
    }

    /// `bytes` must be exactly `self.size()` long.
    fn read(&self, bytes: &[u8]) -> f32 {
        match self {
            AttributeFormat::Float32 => bytemuck::pod_read_unaligned::<f32>(bytes),
            AttributeFormat::Unorm16 => {
                bytemuck::pod_read_unaligned::<u16>(bytes) as f32 / u16::MAX as f32
            }
            AttributeFormat::Unorm8 => bytes[0] as f32 / u8::MAX as f32,
        }
    }
}

/// Index data format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexFormat {
    Uint16,
    Uint32,
}

impl IndexFormat {
    /// Size in bytes of each index.
    pub fn size(&self) -> usize {
        match self {
            IndexFormat::Uint16 => 2,
            IndexFormat::Uint32 => 4,
        }
    }
}

/// Strided view of one attribute inside caller-owned vertex bytes.
#[derive(Debug, Clone, Copy)]
pub struct VertexStream<'a> {
    data: &'a [u8],
    offset: usize,
    stride: usize,
    format: AttributeFormat,
    components: usize,
}

impl<'a> VertexStream<'a> {
    /// Three `f32` components per vertex.
    pub fn positions(data: &'a [u8], offset: usize, stride: usize) -> Self {
        Self {
            data,
            offset,
            stride,
            format: AttributeFormat::Float32,
            components: 3,
        }
    }

    /// Two components per vertex, `f32` unless changed with [`Self::with_format`].
    pub fn uvs(data: &'a [u8], offset: usize, stride: usize) -> Self {
        Self {
            data,
            offset,
            stride,
            format: AttributeFormat::Float32,
            components: 2,
        }
    }

    /// Three `f32` components per vertex.
    pub fn normals(data: &'a [u8], offset: usize, stride: usize) -> Self {
        Self::positions(data, offset, stride)
    }

    pub fn with_format(mut self, format: AttributeFormat) -> Self {
        self.format = format;
        self
    }

    pub fn format(&self) -> AttributeFormat {
        self.format
    }

    /// Size of one attribute in bytes.
    pub fn attribute_size(&self) -> usize {
        self.format.size() * self.components
    }

    fn validate(&self, name: &str, vertex_count: usize) -> Result<()> {
        if self.stride < self.attribute_size() {
            return Err(BakeError::InvalidGeometry(format!(
                "{name} stride {} is smaller than the attribute size {}",
                self.stride,
                self.attribute_size()
            )));
        }
        let required = self.offset + (vertex_count - 1) * self.stride + self.attribute_size();
        if required > self.data.len() {
            return Err(BakeError::InvalidGeometry(format!(
                "{name} stream needs {required} bytes for {vertex_count} vertices, got {}",
                self.data.len()
            )));
        }
        Ok(())
    }

    fn component(&self, vertex: usize, component: usize) -> Option<f32> {
        let size = self.format.size();
        let start = self.offset + vertex * self.stride + component * size;
        self.data.get(start..start + size).map(|bytes| self.format.read(bytes))
    }

    fn read_vec2(&self, vertex: usize) -> Option<Vec2> {
        Some(Vec2::new(self.component(vertex, 0)?, self.component(vertex, 1)?))
    }

    fn read_vec3(&self, vertex: usize) -> Option<Vec3> {
        Some(Vec3::new(
            self.component(vertex, 0)?,
            self.component(vertex, 1)?,
            self.component(vertex, 2)?,
        ))
    }
}

/// Caller-owned index bytes.
#[derive(Debug, Clone, Copy)]
pub struct IndexStream<'a> {
    data: &'a [u8],
    format: IndexFormat,
    count: usize,
}

impl<'a> IndexStream<'a> {
    pub fn new(data: &'a [u8], format: IndexFormat, count: usize) -> Self {
        Self { data, format, count }
    }

    pub fn format(&self) -> IndexFormat {
        self.format
    }

    pub fn count(&self) -> usize {
        self.count
    }

    fn get(&self, i: usize) -> Option<usize> {
        let size = self.format.size();
        let bytes = self.data.get(i * size..(i + 1) * size)?;
        Some(match self.format {
            IndexFormat::Uint16 => bytemuck::pod_read_unaligned::<u16>(bytes) as usize,
            IndexFormat::Uint32 => bytemuck::pod_read_unaligned::<u32>(bytes) as usize,
        })
    }
}

/// A single world-space vertex read through a [`MeshView`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vertex {
    pub position: Vec3,
    pub uv: Vec2,
    pub normal: Option<Vec3>,
}

/// The three vertices of a triangle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Triangle {
    pub vertices: [Vertex; 3],
}

impl Triangle {
    pub fn positions(&self) -> [Vec3; 3] {
        self.vertices.map(|v| v.position)
    }

    pub fn uvs(&self) -> [Vec2; 3] {
        self.vertices.map(|v| v.uv)
    }

    /// Geometric normal from the winding, `None` if the triangle has no area.
    pub fn face_normal(&self) -> Option<Vec3> {
        let [a, b, c] = self.positions();
        (b - a).cross(c - a).try_normalize()
    }

    /// Interpolated surface position and normal at barycentric `bary`.
    ///
    /// Uses vertex normals when the mesh has them and falls back to the face
    /// normal otherwise.
    pub fn interpolate(&self, bary: Vec3) -> Option<(Vec3, Vec3)> {
        let [a, b, c] = self.positions();
        let position = a * bary.x + b * bary.y + c * bary.z;

        let normal = match (
            self.vertices[0].normal,
            self.vertices[1].normal,
            self.vertices[2].normal,
        ) {
            (Some(na), Some(nb), Some(nc)) => (na * bary.x + nb * bary.y + nc * bary.z)
                .try_normalize()
                .or_else(|| self.face_normal()),
            _ => self.face_normal(),
        }?;

        Some((position, normal))
    }
}

/// Read-only, zero-copy description of the mesh being baked.
#[derive(Debug, Clone, Copy)]
pub struct MeshView<'a> {
    vertex_count: usize,
    positions: VertexStream<'a>,
    uvs: VertexStream<'a>,
    normals: Option<VertexStream<'a>>,
    indices: Option<IndexStream<'a>>,
    transform: Mat4,
    normal_matrix: Mat3,
}

impl<'a> MeshView<'a> {
    pub fn new(vertex_count: usize, positions: VertexStream<'a>, uvs: VertexStream<'a>) -> Self {
        Self {
            vertex_count,
            positions,
            uvs,
            normals: None,
            indices: None,
            transform: Mat4::IDENTITY,
            normal_matrix: Mat3::IDENTITY,
        }
    }

    pub fn with_normals(mut self, normals: VertexStream<'a>) -> Self {
        self.normals = Some(normals);
        self
    }

    /// Index the vertices. Without indices every three consecutive vertices
    /// form a triangle.
    pub fn with_indices(mut self, indices: IndexStream<'a>) -> Self {
        self.indices = Some(indices);
        self
    }

    /// Object-to-world transform applied to positions and normals.
    pub fn with_transform(mut self, transform: Mat4) -> Self {
        self.transform = transform;
        self.normal_matrix = Mat3::from_mat4(transform).inverse().transpose();
        self
    }

    pub fn vertex_count(&self) -> usize {
        self.vertex_count
    }

    pub fn transform(&self) -> Mat4 {
        self.transform
    }

    /// Number of elements that form triangles.
    pub fn element_count(&self) -> usize {
        match &self.indices {
            Some(indices) => indices.count,
            None => self.vertex_count,
        }
    }

    pub fn triangle_count(&self) -> usize {
        self.element_count() / 3
    }

    /// Check every stream against the declared counts.
    pub fn validate(&self) -> Result<()> {
        if self.vertex_count == 0 {
            return Err(BakeError::InvalidGeometry("mesh has no vertices".to_string()));
        }

        if self.positions.format != AttributeFormat::Float32 {
            return Err(BakeError::InvalidGeometry(
                "positions must be Float32".to_string(),
            ));
        }
        self.positions.validate("position", self.vertex_count)?;
        self.uvs.validate("uv", self.vertex_count)?;
        if let Some(normals) = &self.normals {
            if normals.format != AttributeFormat::Float32 {
                return Err(BakeError::InvalidGeometry("normals must be Float32".to_string()));
            }
            normals.validate("normal", self.vertex_count)?;
        }

        if self.element_count() == 0 || self.element_count() % 3 != 0 {
            return Err(BakeError::InvalidGeometry(format!(
                "element count {} is not a positive multiple of 3",
                self.element_count()
            )));
        }

        if let Some(indices) = &self.indices {
            let expected = indices.count * indices.format.size();
            if indices.data.len() != expected {
                return Err(BakeError::InvalidGeometry(format!(
                    "index data is {} bytes but {} {:?} indices need {}",
                    indices.data.len(),
                    indices.count,
                    indices.format,
                    expected
                )));
            }
            if let Some((slot, index)) = (0..indices.count)
                .filter_map(|i| Some((i, indices.get(i)?)))
                .find(|&(_, index)| index >= self.vertex_count)
            {
                return Err(BakeError::InvalidGeometry(format!(
                    "index {index} at slot {slot} is out of range for {} vertices",
                    self.vertex_count
                )));
            }
        }

        if !self.transform.is_finite() || self.transform.determinant().abs() < f32::EPSILON {
            return Err(BakeError::InvalidGeometry(
                "transform must be finite and invertible".to_string(),
            ));
        }

        Ok(())
    }

    fn vertex_index(&self, element: usize) -> Option<usize> {
        match &self.indices {
            Some(indices) => indices.get(element),
            None => Some(element),
        }
    }

    /// World-space vertex `corner` (0..3) of `triangle`.
    pub fn vertex(&self, triangle: usize, corner: usize) -> Result<Vertex> {
        if corner > 2 {
            return Err(BakeError::InvalidGeometry(format!(
                "corner {corner} is not in 0..3"
            )));
        }
        if triangle >= self.triangle_count() {
            return Err(BakeError::InvalidGeometry(format!(
                "triangle {triangle} is out of range for {} triangles",
                self.triangle_count()
            )));
        }

        let element = triangle * 3 + corner;
        let index = self.vertex_index(element).ok_or_else(|| {
            BakeError::InvalidGeometry(format!("index data ends before element {element}"))
        })?;
        if index >= self.vertex_count {
            return Err(BakeError::InvalidGeometry(format!(
                "index {index} is out of range for {} vertices",
                self.vertex_count
            )));
        }

        let short = |name: &str| {
            BakeError::InvalidGeometry(format!("{name} stream ends before vertex {index}"))
        };
        let position = self
            .positions
            .read_vec3(index)
            .map(|p| self.transform.transform_point3(p))
            .ok_or_else(|| short("position"))?;
        let uv = self.uvs.read_vec2(index).ok_or_else(|| short("uv"))?;
        let normal = match &self.normals {
            Some(normals) => {
                let n = normals.read_vec3(index).ok_or_else(|| short("normal"))?;
                Some((self.normal_matrix * n).normalize_or_zero()).filter(|n| *n != Vec3::ZERO)
            }
            None => None,
        };

        Ok(Vertex {
            position,
            uv,
            normal,
        })
    }

    pub fn triangle(&self, triangle: usize) -> Result<Triangle> {
        Ok(Triangle {
            vertices: [
                self.vertex(triangle, 0)?,
                self.vertex(triangle, 1)?,
                self.vertex(triangle, 2)?,
            ],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[repr(C)]
    #[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
    struct PosUv {
        p: [f32; 3],
        t: [f32; 2],
    }

    const STRIDE: usize = std::mem::size_of::<PosUv>();

    fn quad() -> (Vec<PosUv>, Vec<u16>) {
        let vertices = vec![
            PosUv { p: [0.0, 0.0, 0.0], t: [0.0, 0.0] },
            PosUv { p: [1.0, 0.0, 0.0], t: [1.0, 0.0] },
            PosUv { p: [1.0, 1.0, 0.0], t: [1.0, 1.0] },
            PosUv { p: [0.0, 1.0, 0.0], t: [0.0, 1.0] },
        ];
        (vertices, vec![0, 1, 2, 0, 2, 3])
    }

    fn view<'a>(vertices: &'a [PosUv], indices: &'a [u16]) -> MeshView<'a> {
        let bytes: &[u8] = bytemuck::cast_slice(vertices);
        MeshView::new(
            vertices.len(),
            VertexStream::positions(bytes, 0, STRIDE),
            VertexStream::uvs(bytes, 12, STRIDE),
        )
        .with_indices(IndexStream::new(
            bytemuck::cast_slice(indices),
            IndexFormat::Uint16,
            indices.len(),
        ))
    }

    #[test]
    fn test_strided_reads() {
        let (vertices, indices) = quad();
        let mesh = view(&vertices, &indices);
        mesh.validate().unwrap();

        assert_eq!(mesh.triangle_count(), 2);
        let v = mesh.vertex(1, 1).unwrap();
        assert_eq!(v.position, Vec3::new(1.0, 1.0, 0.0));
        assert_eq!(v.uv, Vec2::new(1.0, 1.0));
        assert_eq!(v.normal, None);
    }

    #[test]
    fn test_face_normal_fallback() {
        let (vertices, indices) = quad();
        let mesh = view(&vertices, &indices);
        let tri = mesh.triangle(0).unwrap();
        let (position, normal) = tri.interpolate(Vec3::splat(1.0 / 3.0)).unwrap();
        assert!((normal - Vec3::Z).length() < 1e-6);
        assert!((position - Vec3::new(2.0 / 3.0, 1.0 / 3.0, 0.0)).length() < 1e-6);
    }

    #[test]
    fn test_out_of_range_index() {
        let (vertices, _) = quad();
        let indices: Vec<u16> = vec![0, 1, 9];
        let mesh = view(&vertices, &indices);
        assert!(matches!(mesh.validate(), Err(BakeError::InvalidGeometry(_))));
    }

    #[test]
    fn test_index_width_mismatch() {
        let (vertices, _) = quad();
        let indices: Vec<u32> = vec![0, 1, 2];
        let bytes: &[u8] = bytemuck::cast_slice(&vertices);
        // u32 data declared as u16
        let mesh = MeshView::new(
            vertices.len(),
            VertexStream::positions(bytes, 0, STRIDE),
            VertexStream::uvs(bytes, 12, STRIDE),
        )
        .with_indices(IndexStream::new(
            bytemuck::cast_slice(&indices),
            IndexFormat::Uint16,
            3,
        ));
        assert!(matches!(mesh.validate(), Err(BakeError::InvalidGeometry(_))));
    }

    #[test]
    fn test_short_stream() {
        let (vertices, indices) = quad();
        let bytes: &[u8] = bytemuck::cast_slice(&vertices);
        let mesh = MeshView::new(
            5,
            VertexStream::positions(bytes, 0, STRIDE),
            VertexStream::uvs(bytes, 12, STRIDE),
        )
        .with_indices(IndexStream::new(
            bytemuck::cast_slice(&indices),
            IndexFormat::Uint16,
            indices.len(),
        ));
        assert!(mesh.validate().is_err());
    }

    #[test]
    fn test_vertex_out_of_range() {
        let (vertices, indices) = quad();
        let mesh = view(&vertices, &indices);
        assert!(mesh.vertex(2, 0).is_err());
        assert!(mesh.vertex(0, 3).is_err());
    }

    #[test]
    fn test_short_index_data_without_validate() {
        let (vertices, _) = quad();
        let indices: Vec<u16> = vec![0];
        let bytes: &[u8] = bytemuck::cast_slice(&vertices);
        // one index worth of bytes declared as a full triangle
        let mesh = MeshView::new(
            vertices.len(),
            VertexStream::positions(bytes, 0, STRIDE),
            VertexStream::uvs(bytes, 12, STRIDE),
        )
        .with_indices(IndexStream::new(
            bytemuck::cast_slice(&indices),
            IndexFormat::Uint16,
            3,
        ));
        assert!(mesh.vertex(0, 0).is_ok());
        assert!(matches!(mesh.vertex(0, 2), Err(BakeError::InvalidGeometry(_))));
        assert!(mesh.triangle(0).is_err());
    }

    #[test]
    fn test_short_vertex_data_without_validate() {
        let (vertices, indices) = quad();
        let bytes: &[u8] = bytemuck::cast_slice(&vertices);
        // claims 4 vertices but only the first two are present
        let mesh = MeshView::new(
            4,
            VertexStream::positions(&bytes[..2 * STRIDE], 0, STRIDE),
            VertexStream::uvs(bytes, 12, STRIDE),
        )
        .with_indices(IndexStream::new(
            bytemuck::cast_slice(&indices),
            IndexFormat::Uint16,
            indices.len(),
        ));
        assert!(mesh.vertex(0, 1).is_ok());
        assert!(matches!(mesh.vertex(0, 2), Err(BakeError::InvalidGeometry(_))));
    }

    fn triangle_with_normals<'a>(positions: &'a [f32], normals: &'a [f32]) -> MeshView<'a> {
        static UVS: [f32; 6] = [0.0, 0.0, 1.0, 0.0, 0.0, 1.0];
        MeshView::new(
            3,
            VertexStream::positions(bytemuck::cast_slice(positions), 0, 12),
            VertexStream::uvs(bytemuck::cast_slice(&UVS), 0, 8),
        )
        .with_normals(VertexStream::normals(bytemuck::cast_slice(normals), 0, 12))
    }

    #[test]
    fn test_interpolated_vertex_normals() {
        let positions = [0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0];
        let normals = [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0];
        let mesh = triangle_with_normals(&positions, &normals);
        mesh.validate().unwrap();

        let tri = mesh.triangle(0).unwrap();
        assert_eq!(tri.vertices[1].normal, Some(Vec3::Y));

        let (_, normal) = tri.interpolate(Vec3::new(0.5, 0.5, 0.0)).unwrap();
        let expected = Vec3::new(1.0, 1.0, 0.0).normalize();
        assert!((normal - expected).length() < 1e-6);

        let (_, normal) = tri.interpolate(Vec3::splat(1.0 / 3.0)).unwrap();
        assert!((normal - Vec3::ONE.normalize()).length() < 1e-6);
    }

    #[test]
    fn test_normals_under_non_uniform_scale() {
        // plane tilted 45 degrees in XY, stretched 2x along X
        let positions = [0.0, 0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 0.0, 1.0];
        let n = [1.0, -1.0, 0.0];
        let normals = [n, n, n].concat();
        let mesh = triangle_with_normals(&positions, &normals)
            .with_transform(Mat4::from_scale(Vec3::new(2.0, 1.0, 1.0)));
        mesh.validate().unwrap();

        let tri = mesh.triangle(0).unwrap();
        let normal = tri.vertices[0].normal.unwrap();
        // inverse-transpose keeps the normal perpendicular to the scaled surface
        let [a, b, c] = tri.positions();
        assert!(normal.dot(b - a).abs() < 1e-6);
        assert!(normal.dot(c - a).abs() < 1e-6);
        assert!((normal - Vec3::new(1.0, -2.0, 0.0).normalize()).length() < 1e-6);
    }

    #[test]
    fn test_zero_normals_fall_back_to_face_normal() {
        let positions = [0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0];
        let normals = [0.0; 9];
        let mesh = triangle_with_normals(&positions, &normals);

        let tri = mesh.triangle(0).unwrap();
        assert!(tri.vertices.iter().all(|v| v.normal.is_none()));
        let (_, normal) = tri.interpolate(Vec3::splat(1.0 / 3.0)).unwrap();
        assert!((normal - Vec3::Z).length() < 1e-6);

        // opposing normals cancel at the midpoint
        let normals = [0.0, 0.0, 1.0, 0.0, 0.0, -1.0, 0.0, 0.0, 1.0];
        let mesh = triangle_with_normals(&positions, &normals);
        let tri = mesh.triangle(0).unwrap();
        let (_, normal) = tri.interpolate(Vec3::new(0.5, 0.5, 0.0)).unwrap();
        assert!((normal - Vec3::Z).length() < 1e-6);
    }

    #[test]
    fn test_unorm_uvs_and_transform() {
        let positions: Vec<f32> = vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0];
        let uvs: Vec<u16> = vec![0, 0, u16::MAX, 0, 0, u16::MAX];
        let mesh = MeshView::new(
            3,
            VertexStream::positions(bytemuck::cast_slice(&positions), 0, 12),
            VertexStream::uvs(bytemuck::cast_slice(&uvs), 0, 4).with_format(AttributeFormat::Unorm16),
        )
        .with_transform(Mat4::from_translation(Vec3::new(0.0, 0.0, 5.0)));
        mesh.validate().unwrap();

        assert_eq!(mesh.triangle_count(), 1);
        let v = mesh.vertex(0, 1).unwrap();
        assert_eq!(v.uv, Vec2::new(1.0, 0.0));
        assert_eq!(v.position, Vec3::new(1.0, 0.0, 5.0));
    }
}
