//! Bakes ambient occlusion for a ground plane with a box standing on it.
//!
//! Hemicube faces are rendered by a small CPU rasterizer so the demo runs
//! headless. Front faces of occluders write black, back faces write alpha 0
//! (so they are ignored) and everything else sees a white sky. The result is
//! smoothed, dilated, gamma corrected and written to `lightmap_ao.png`.

use glam::{Mat4, Vec2, Vec3, Vec4};
use helio_lightmapper::{
    BakeConfig, BakeContext, BakeStep, FacePixels, FaceRequest, IndexFormat, IndexStream,
    LightmapImage, MeshView, PingPong, VertexStream,
};

const LIGHTMAP_SIZE: u32 = 64;
const GROUND_QUADS: u16 = 8;
const GROUND_EXTENT: f32 = 4.0;

#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct Vertex {
    position: [f32; 3],
    uv: [f32; 2],
}

const STRIDE: usize = std::mem::size_of::<Vertex>();

struct Ground {
    vertices: Vec<Vertex>,
    indices: Vec<u16>,
}

/// `GROUND_QUADS^2` quads in the XZ plane facing +Y, UVs inset so dilation has
/// a border to fill.
fn create_ground() -> Ground {
    let n = GROUND_QUADS;
    let mut vertices = Vec::new();
    for j in 0..=n {
        for i in 0..=n {
            let s = i as f32 / n as f32;
            let t = j as f32 / n as f32;
            vertices.push(Vertex {
                position: [(s - 0.5) * GROUND_EXTENT, 0.0, (t - 0.5) * GROUND_EXTENT],
                uv: [0.05 + s * 0.9, 0.05 + t * 0.9],
            });
        }
    }

    let mut indices = Vec::new();
    let row = n + 1;
    for j in 0..n {
        for i in 0..n {
            let a = j * row + i;
            let b = a + 1;
            let c = a + row + 1;
            let d = a + row;
            indices.extend_from_slice(&[a, d, c, a, c, b]);
        }
    }
    Ground { vertices, indices }
}

#[derive(Clone, Copy)]
struct SceneTriangle {
    positions: [Vec3; 3],
    normal: Vec3,
}

fn push_quad(scene: &mut Vec<SceneTriangle>, corners: [Vec3; 4], normal: Vec3) {
    let [a, b, c, d] = corners;
    scene.push(SceneTriangle { positions: [a, b, c], normal });
    scene.push(SceneTriangle { positions: [a, c, d], normal });
}

/// Axis-aligned box resting on the ground, outward normals.
fn create_box(centre: Vec3, half: Vec3, scene: &mut Vec<SceneTriangle>) {
    let axes = [Vec3::X, Vec3::Y, Vec3::Z];
    for axis in 0..3 {
        let n = axes[axis];
        let u = axes[(axis + 1) % 3];
        let v = axes[(axis + 2) % 3];
        for sign in [-1.0f32, 1.0] {
            let normal = n * sign;
            let face = centre + normal * half;
            let du = u * half;
            let dv = v * half;
            push_quad(
                scene,
                [face - du - dv, face + du - dv, face + du + dv, face - du + dv],
                normal,
            );
        }
    }
}

/// Depth-tested CPU rasterizer for hemicube faces.
struct AoRenderer {
    scene: Vec<SceneTriangle>,
    sky: Vec4,
    depth: Vec<f32>,
}

impl AoRenderer {
    fn new(scene: Vec<SceneTriangle>, sky: Vec3) -> Self {
        Self {
            scene,
            sky: sky.extend(1.0),
            depth: Vec::new(),
        }
    }

    fn render(&mut self, request: &FaceRequest, pixels: &mut [f32]) {
        let (width, height) = (request.viewport.width, request.viewport.height);
        self.depth.clear();
        self.depth.resize((width * height) as usize, f32::INFINITY);
        for pixel in pixels.chunks_exact_mut(4) {
            pixel.copy_from_slice(&self.sky.to_array());
        }

        let view_projection = request.view_projection();
        let eye = request.view.inverse().w_axis.truncate();
        let size = Vec2::new(width as f32, height as f32);

        for triangle in &self.scene {
            let front = triangle.normal.dot(eye - triangle.positions[0]) > 0.0;
            let colour = if front { Vec4::new(0.0, 0.0, 0.0, 1.0) } else { Vec4::ZERO };

            let clip = triangle.positions.map(|p| view_projection * p.extend(1.0));
            let polygon = clip_near(&clip);
            if polygon.len() < 3 {
                continue;
            }
            // NDC to pixel space, row 0 at the top
            let screen: Vec<Vec3> = polygon
                .iter()
                .map(|c| {
                    let ndc = c.truncate() / c.w;
                    Vec3::new(
                        (ndc.x + 1.0) * 0.5 * size.x,
                        (1.0 - ndc.y) * 0.5 * size.y,
                        ndc.z,
                    )
                })
                .collect();

            for i in 1..screen.len() - 1 {
                fill(
                    [screen[0], screen[i], screen[i + 1]],
                    colour,
                    width,
                    height,
                    &mut self.depth,
                    pixels,
                );
            }
        }
    }
}

fn fill(tri: [Vec3; 3], colour: Vec4, width: u32, height: u32, depth: &mut [f32], pixels: &mut [f32]) {
    let [a, b, c] = tri;
    let edge = |p: Vec3, q: Vec3, x: f32, y: f32| (q.x - p.x) * (y - p.y) - (q.y - p.y) * (x - p.x);
    let area = edge(a, b, c.x, c.y);
    if area.abs() < 1e-12 {
        return;
    }

    let min_x = a.x.min(b.x).min(c.x).floor().max(0.0) as u32;
    let min_y = a.y.min(b.y).min(c.y).floor().max(0.0) as u32;
    let max_x = (a.x.max(b.x).max(c.x).ceil() as u32).min(width);
    let max_y = (a.y.max(b.y).max(c.y).ceil() as u32).min(height);

    for y in min_y..max_y {
        for x in min_x..max_x {
            let (px, py) = (x as f32 + 0.5, y as f32 + 0.5);
            let w0 = edge(b, c, px, py) / area;
            let w1 = edge(c, a, px, py) / area;
            let w2 = edge(a, b, px, py) / area;
            if w0 < 0.0 || w1 < 0.0 || w2 < 0.0 {
                continue;
            }
            let z = w0 * a.z + w1 * b.z + w2 * c.z;
            let i = (y * width + x) as usize;
            if z < 0.0 || z > 1.0 || z >= depth[i] {
                continue;
            }
            depth[i] = z;
            pixels[i * 4..i * 4 + 4].copy_from_slice(&colour.to_array());
        }
    }
}

/// Clip a clip-space triangle against the near plane (`z >= 0`).
fn clip_near(triangle: &[Vec4; 3]) -> Vec<Vec4> {
    let mut out = Vec::with_capacity(4);
    for i in 0..3 {
        let p = triangle[i];
        let q = triangle[(i + 1) % 3];
        if p.z >= 0.0 {
            out.push(p);
        }
        if (p.z >= 0.0) != (q.z >= 0.0) {
            let t = p.z / (p.z - q.z);
            out.push(p.lerp(q, t));
        }
    }
    out
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let ground = create_ground();
    let mut scene = Vec::new();
    for tri in ground.indices.chunks_exact(3) {
        let p = [tri[0], tri[1], tri[2]].map(|i| Vec3::from(ground.vertices[i as usize].position));
        scene.push(SceneTriangle { positions: p, normal: Vec3::Y });
    }
    create_box(Vec3::new(0.0, 0.5, 0.0), Vec3::splat(0.5), &mut scene);
    create_box(Vec3::new(1.2, 0.25, 0.8), Vec3::new(0.25, 0.25, 0.6), &mut scene);
    log::info!("Scene: {} triangles, baking {} ground triangles", scene.len(), ground.indices.len() / 3);

    let bytes: &[u8] = bytemuck::cast_slice(&ground.vertices);
    let mesh = MeshView::new(
        ground.vertices.len(),
        VertexStream::positions(bytes, 0, STRIDE),
        VertexStream::uvs(bytes, 12, STRIDE),
    )
    .with_indices(IndexStream::new(
        bytemuck::cast_slice(&ground.indices),
        IndexFormat::Uint16,
        ground.indices.len(),
    ))
    .with_transform(Mat4::IDENTITY);

    let config = BakeConfig::default()
        .with_hemicube_size(32)
        .with_clip_planes(0.001, 100.0)
        .with_background(Vec3::ONE)
        .with_surface_offset(0.0005);

    let mut renderer = AoRenderer::new(scene, config.background);
    let mut lightmap = LightmapImage::new(LIGHTMAP_SIZE, LIGHTMAP_SIZE, 4)?;
    let mut ctx = BakeContext::new(mesh, &mut lightmap, config)?;

    let (atlas_width, atlas_height) = ctx.atlas_size();
    log::info!("Hemicube atlas: {}x{}", atlas_width, atlas_height);

    let mut pixels = Vec::new();
    let mut reported = 0;
    while let BakeStep::Render(request) = ctx.step() {
        pixels.resize(request.viewport.pixel_count() * 4, 0.0);
        renderer.render(&request, &mut pixels);
        ctx.submit(FacePixels::Rgba32F(&pixels))?;

        let percent = (ctx.progress().fraction() * 100.0) as u32;
        if percent >= reported + 10 {
            reported = percent - percent % 10;
            log::info!("Baking... {}%", reported);
        }
    }
    let stats = ctx.stats();
    drop(ctx);

    let mut chain = PingPong::new(lightmap);
    chain.smooth()?.dilate(16)?.power(1.0 / 2.2, 0b0111);
    let lightmap = chain.into_front();

    log::info!(
        "Baked {} texels with {} faces, {}/{} texels covered after dilation",
        stats.rendered_texels,
        stats.faces_rendered,
        lightmap.written_count(),
        lightmap.texel_count()
    );

    let rgba = lightmap.to_rgba8();
    image::save_buffer(
        "lightmap_ao.png",
        &rgba,
        lightmap.width(),
        lightmap.height(),
        image::ColorType::Rgba8,
    )?;
    log::info!("Wrote lightmap_ao.png");
    Ok(())
}
