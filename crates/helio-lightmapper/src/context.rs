//! The resumable bake state machine.
//!
//! A [`BakeContext`] never renders anything itself. Each call to
//! [`BakeContext::step`] either hands back one hemicube face the caller must
//! render, or reports that the bake is finished. After rendering, the caller
//! passes the pixels to [`BakeContext::submit`], and the next `step` picks up
//! where the previous one stopped. One face per host frame keeps the UI
//! responsive while the lightmap fills in.
//!
//! ```ignore
//! let mut ctx = BakeContext::new(mesh, &mut lightmap, BakeConfig::default())?;
//! while let BakeStep::Render(request) = ctx.step() {
//!     renderer.draw_scene(request.viewport, request.view, request.projection, &mut pixels);
//!     ctx.submit(FacePixels::Rgba32F(&pixels))?;
//! }
//! ```

use glam::{Mat4, UVec2};
use serde::{Deserialize, Serialize};

use crate::accumulator::{Accumulator, FacePixels};
use crate::config::{BakeConfig, SampleMode};
use crate::geometry::{MeshView, Triangle};
use crate::hemicube::{face_matrices, HemicubeFace, HemicubeWeights, SamplePoint, Viewport};
use crate::image::LightmapImage;
use crate::raster::{PassFilter, TriangleRaster};
use crate::{BakeError, Result};

/// Where the context is in its bake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BakeState {
    /// Created, no step taken yet.
    Idle,
    /// A texel sample is ready and the next face request is about to go out.
    EmittingHemicubeFace,
    /// Waiting for the caller to submit the face it was handed.
    AwaitingRenderedFace,
    /// Integrating a submitted face.
    AccumulatingTexel,
    /// Writing the finished texel and looking for the next one.
    AdvancingTexel,
    /// Moving on to the next triangle (or pass).
    AdvancingTriangle,
    /// Terminal.
    Done,
}

/// One hemicube face the caller has to render.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceRequest {
    /// Pixel rectangle inside the `3S x S` hemicube atlas.
    pub viewport: Viewport,
    pub view: Mat4,
    pub projection: Mat4,
    pub face: HemicubeFace,
    /// Lightmap texel being baked.
    pub texel: UVec2,
    pub triangle: usize,
    pub pass: u32,
}

impl FaceRequest {
    pub fn view_projection(&self) -> Mat4 {
        self.projection * self.view
    }
}

/// Result of [`BakeContext::step`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BakeStep {
    Render(FaceRequest),
    Finished,
}

/// Triangles completed out of the total, counting every interpolation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub processed: usize,
    pub total: usize,
}

impl Progress {
    pub fn fraction(&self) -> f32 {
        if self.total == 0 {
            1.0
        } else {
            self.processed as f32 / self.total as f32
        }
    }
}

/// Counters for diagnostics and UI.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BakeStats {
    /// Texels resolved from hemicube renders.
    pub rendered_texels: usize,
    /// Texels filled from neighbours without rendering.
    pub interpolated_texels: usize,
    /// Covered texels skipped because an earlier triangle already owned them.
    pub skipped_texels: usize,
    pub degenerate_triangles: usize,
    pub faces_rendered: usize,
}

/// Renders hemicube faces on behalf of [`BakeContext::run`].
pub trait FaceRenderer {
    /// Fill `pixels` (RGBA, `request.viewport` sized, row 0 at the top).
    fn render(&mut self, request: &FaceRequest, pixels: &mut [f32]) -> Result<()>;
}

#[derive(Debug, Clone, Copy)]
struct ActiveTexel {
    x: u32,
    y: u32,
    sample: SamplePoint,
    face: usize,
}

/// Incremental hemicube baker for one mesh and one lightmap.
pub struct BakeContext<'a> {
    mesh: MeshView<'a>,
    target: &'a mut LightmapImage,
    config: BakeConfig,
    weights: HemicubeWeights,
    accumulator: Accumulator,
    state: BakeState,
    pass: u32,
    triangle_index: usize,
    triangle: Option<Triangle>,
    raster: Option<TriangleRaster>,
    texel: Option<ActiveTexel>,
    pending: Option<FaceRequest>,
    processed: usize,
    stats: BakeStats,
}

impl<'a> BakeContext<'a> {
    /// Validate everything up front; the target's written mask is cleared
    /// because texel ownership is decided per bake.
    pub fn new(mesh: MeshView<'a>, target: &'a mut LightmapImage, config: BakeConfig) -> Result<Self> {
        config.validate()?;
        mesh.validate()?;
        target.clear_written();

        log::info!(
            "Lightmap bake: {} triangles into {}x{}x{}, hemicube {}, {} pass(es)",
            mesh.triangle_count(),
            target.width(),
            target.height(),
            target.channels(),
            config.hemicube_size,
            config.pass_count()
        );

        Ok(Self {
            mesh,
            target,
            weights: HemicubeWeights::new(config.hemicube_size),
            config,
            accumulator: Accumulator::new(),
            state: BakeState::Idle,
            pass: 0,
            triangle_index: 0,
            triangle: None,
            raster: None,
            texel: None,
            pending: None,
            processed: 0,
            stats: BakeStats::default(),
        })
    }

    pub fn state(&self) -> BakeState {
        self.state
    }

    pub fn is_done(&self) -> bool {
        self.state == BakeState::Done
    }

    pub fn config(&self) -> &BakeConfig {
        &self.config
    }

    pub fn stats(&self) -> BakeStats {
        self.stats
    }

    pub fn progress(&self) -> Progress {
        Progress {
            processed: self.processed,
            total: self.mesh.triangle_count() * self.config.pass_count() as usize,
        }
    }

    /// The lightmap as baked so far.
    pub fn lightmap(&self) -> &LightmapImage {
        self.target
    }

    /// The face the context is waiting on, if any.
    pub fn pending_request(&self) -> Option<&FaceRequest> {
        self.pending.as_ref()
    }

    /// Size of a render target that fits every face viewport.
    pub fn atlas_size(&self) -> (u32, u32) {
        crate::hemicube::atlas_size(self.config.hemicube_size)
    }

    /// Drop all progress and start over on the same mesh and target.
    pub fn restart(&mut self) {
        self.target.clear_written();
        self.accumulator.reset();
        self.state = BakeState::Idle;
        self.pass = 0;
        self.triangle_index = 0;
        self.triangle = None;
        self.raster = None;
        self.texel = None;
        self.pending = None;
        self.processed = 0;
        self.stats = BakeStats::default();
    }

    /// Advance until the caller has to render something or the bake is over.
    pub fn step(&mut self) -> BakeStep {
        loop {
            match self.state {
                BakeState::Idle => {
                    self.state = if self.open_triangle(0) {
                        BakeState::AdvancingTexel
                    } else {
                        BakeState::AdvancingTriangle
                    };
                }
                BakeState::EmittingHemicubeFace => match self.emit_face() {
                    Some(request) => {
                        self.pending = Some(request);
                        self.state = BakeState::AwaitingRenderedFace;
                        return BakeStep::Render(request);
                    }
                    None => self.state = BakeState::AdvancingTexel,
                },
                BakeState::AwaitingRenderedFace => {
                    if let Some(request) = self.pending {
                        log::warn!(
                            "step() called while face {:?} of texel {} is still pending, re-emitting",
                            request.face,
                            request.texel
                        );
                        return BakeStep::Render(request);
                    }
                    self.state = BakeState::EmittingHemicubeFace;
                }
                BakeState::AccumulatingTexel => {
                    self.state = self.after_accumulate();
                }
                BakeState::AdvancingTexel => {
                    self.finish_texel();
                    self.state = if self.next_texel() {
                        BakeState::EmittingHemicubeFace
                    } else {
                        BakeState::AdvancingTriangle
                    };
                }
                BakeState::AdvancingTriangle => {
                    if self.advance_triangle() {
                        self.state = BakeState::AdvancingTexel;
                    } else {
                        self.state = BakeState::Done;
                        log::info!(
                            "Lightmap bake finished: {} rendered, {} interpolated, {} degenerate triangle(s), {} faces",
                            self.stats.rendered_texels,
                            self.stats.interpolated_texels,
                            self.stats.degenerate_triangles,
                            self.stats.faces_rendered
                        );
                    }
                }
                BakeState::Done => return BakeStep::Finished,
            }
        }
    }

    /// Hand back the pixels for the pending face. The last face of a texel
    /// also writes the texel to the lightmap.
    ///
    /// Calls made while no face is pending return `OutOfSequence`, and a
    /// buffer that does not match the requested viewport returns
    /// `InvalidTarget`. Neither changes the context.
    pub fn submit(&mut self, pixels: FacePixels<'_>) -> Result<()> {
        let request = match (self.state, self.pending) {
            (BakeState::AwaitingRenderedFace, Some(request)) => request,
            (actual, _) => {
                log::warn!("submit() ignored, context is {:?}", actual);
                return Err(BakeError::OutOfSequence {
                    expected: BakeState::AwaitingRenderedFace,
                    actual,
                });
            }
        };
        pixels.check(&request.viewport)?;

        self.state = BakeState::AccumulatingTexel;
        self.pending = None;
        let miss = self
            .config
            .background_is_miss
            .then_some(self.config.background);
        self.accumulator
            .accumulate(&pixels, self.weights.face(request.face), miss);
        self.stats.faces_rendered += 1;
        let complete = match self.texel.as_mut() {
            Some(texel) => {
                texel.face += 1;
                texel.face >= HemicubeFace::COUNT
            }
            None => false,
        };
        // the lightmap holds the texel as soon as its last face is in
        if complete {
            self.finish_texel();
        }
        self.state = self.after_accumulate();
        Ok(())
    }

    /// Drive the whole bake to completion with `renderer`.
    pub fn run(&mut self, renderer: &mut impl FaceRenderer) -> Result<BakeStats> {
        let size = self.config.hemicube_size as usize;
        let mut pixels = vec![0.0f32; size * size * 4];
        while let BakeStep::Render(request) = self.step() {
            let pixels = &mut pixels[..request.viewport.pixel_count() * 4];
            renderer.render(&request, pixels)?;
            self.submit(FacePixels::Rgba32F(pixels))?;
        }
        Ok(self.stats)
    }

    fn after_accumulate(&self) -> BakeState {
        match self.texel {
            Some(texel) if texel.face < HemicubeFace::COUNT => BakeState::EmittingHemicubeFace,
            _ => BakeState::AdvancingTexel,
        }
    }

    fn emit_face(&self) -> Option<FaceRequest> {
        let texel = self.texel?;
        let face = HemicubeFace::from_index(texel.face)?;
        let (view, projection) =
            face_matrices(&texel.sample, face, self.config.z_near, self.config.z_far);
        Some(FaceRequest {
            viewport: face.viewport(self.config.hemicube_size),
            view,
            projection,
            face,
            texel: UVec2::new(texel.x, texel.y),
            triangle: self.triangle_index,
            pass: self.pass,
        })
    }

    /// Load triangle `index` for the current pass. `false` if it has nothing
    /// to rasterize.
    fn open_triangle(&mut self, index: usize) -> bool {
        self.triangle_index = index;
        self.triangle = None;
        self.raster = None;

        let triangle = match self.mesh.triangle(index) {
            Ok(triangle) => triangle,
            Err(err) => {
                log::error!("Skipping triangle {index}: {err}");
                return false;
            }
        };

        // zero area in UV space or in world space
        if TriangleRaster::is_degenerate(triangle.uvs()) || triangle.face_normal().is_none() {
            if self.pass == 0 {
                self.stats.degenerate_triangles += 1;
                log::debug!("Triangle {index} is degenerate, skipped");
            }
            return false;
        }

        let size = UVec2::new(self.target.width(), self.target.height());
        let filter = PassFilter::for_pass(self.pass, self.config.pass_count());
        match TriangleRaster::new(triangle.uvs(), size, self.config.supersampling, filter) {
            Some(raster) => {
                self.triangle = Some(triangle);
                self.raster = Some(raster);
                true
            }
            None => false,
        }
    }

    /// Close the current triangle and open the next one with texels,
    /// rolling over into the next pass. `false` once everything is done.
    fn advance_triangle(&mut self) -> bool {
        let count = self.mesh.triangle_count();
        loop {
            self.processed += 1;
            let mut next = self.triangle_index + 1;
            if next >= count {
                if self.pass + 1 >= self.config.pass_count() {
                    self.triangle = None;
                    self.raster = None;
                    return false;
                }
                self.pass += 1;
                next = 0;
                log::debug!(
                    "Starting interpolation pass {} of {}",
                    self.pass + 1,
                    self.config.pass_count()
                );
            }
            if self.open_triangle(next) {
                return true;
            }
        }
    }

    fn finish_texel(&mut self) {
        if let Some(texel) = self.texel.take() {
            let rgb = self.accumulator.resolve(self.config.background);
            self.target.store(texel.x, texel.y, rgb, 1.0);
            self.stats.rendered_texels += 1;
            log::trace!(
                "Texel ({}, {}) = {} (coverage {:.2})",
                texel.x,
                texel.y,
                rgb,
                self.accumulator.coverage()
            );
        }
    }

    /// Find the next texel of the open triangle that needs a hemicube.
    fn next_texel(&mut self) -> bool {
        while let Some(covered) = self.raster.as_mut().and_then(|r| r.next_texel()) {
            let (x, y) = (covered.x, covered.y);
            if self.target.is_written(x, y) {
                self.stats.skipped_texels += 1;
                continue;
            }
            if self.pass > 0
                && self.config.sample_mode == SampleMode::Adaptive
                && self.try_interpolate(x, y)
            {
                self.stats.interpolated_texels += 1;
                continue;
            }

            let Some((position, normal)) = self
                .triangle
                .as_ref()
                .and_then(|t| t.interpolate(covered.barycentric))
            else {
                self.stats.skipped_texels += 1;
                continue;
            };

            self.accumulator.reset();
            self.texel = Some(ActiveTexel {
                x,
                y,
                sample: SamplePoint {
                    position: position + normal * self.config.surface_offset,
                    normal,
                },
                face: 0,
            });
            return true;
        }
        self.raster = None;
        false
    }

    /// Fill `(x, y)` from the texels baked in earlier passes when they agree.
    fn try_interpolate(&mut self, x: u32, y: u32) -> bool {
        let stride = PassFilter::for_pass(self.pass, self.config.pass_count()).stride;
        let odd_x = x % (2 * stride) != 0;
        let odd_y = y % (2 * stride) != 0;

        let (x, y, s) = (x as i64, y as i64, stride as i64);
        let neighbours: &[(i64, i64)] = match (odd_x, odd_y) {
            (true, false) => &[(-1, 0), (1, 0)],
            (false, true) => &[(0, -1), (0, 1)],
            _ => &[(-1, -1), (1, -1), (-1, 1), (1, 1)],
        };

        let (width, height) = (self.target.width() as i64, self.target.height() as i64);
        let channels = self.target.channels() as usize;
        let mut lo = [f32::MAX; 4];
        let mut hi = [f32::MIN; 4];
        let mut sum = [0.0f32; 4];

        for &(dx, dy) in neighbours {
            let (nx, ny) = (x + dx * s, y + dy * s);
            if nx < 0 || ny < 0 || nx >= width || ny >= height {
                return false;
            }
            let (nx, ny) = (nx as u32, ny as u32);
            if !self.target.is_written(nx, ny) {
                return false;
            }
            for (c, &v) in self.target.texel(nx, ny).iter().enumerate() {
                lo[c] = lo[c].min(v);
                hi[c] = hi[c].max(v);
                sum[c] += v;
            }
        }

        let threshold = self.config.interpolation_threshold;
        if (0..channels).any(|c| hi[c] - lo[c] > threshold) {
            return false;
        }

        let n = neighbours.len() as f32;
        let (x, y) = (x as u32, y as u32);
        for (c, v) in self.target.texel_mut(x, y).iter_mut().enumerate() {
            *v = sum[c] / n;
        }
        self.target.mark_written(x, y);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{IndexFormat, IndexStream, VertexStream};

    fn triangle_mesh<'a>(positions: &'a [f32], uvs: &'a [f32]) -> MeshView<'a> {
        MeshView::new(
            positions.len() / 3,
            VertexStream::positions(bytemuck::cast_slice(positions), 0, 12),
            VertexStream::uvs(bytemuck::cast_slice(uvs), 0, 8),
        )
    }

    fn white_face(request: &FaceRequest) -> Vec<f32> {
        vec![1.0; request.viewport.pixel_count() * 4]
    }

    #[test]
    fn test_state_sequence() {
        let positions = [0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0];
        let uvs = [0.0, 0.0, 1.0, 0.0, 0.0, 1.0];
        let mut image = LightmapImage::new(2, 2, 4).unwrap();
        let mut ctx =
            BakeContext::new(triangle_mesh(&positions, &uvs), &mut image, BakeConfig::default())
                .unwrap();
        assert_eq!(ctx.state(), BakeState::Idle);

        let BakeStep::Render(request) = ctx.step() else {
            panic!("expected a face request");
        };
        assert_eq!(ctx.state(), BakeState::AwaitingRenderedFace);
        assert_eq!(request.face, HemicubeFace::Front);
        assert_eq!(request.texel, UVec2::ZERO);

        ctx.submit(FacePixels::Rgba32F(&white_face(&request))).unwrap();
        assert_eq!(ctx.state(), BakeState::EmittingHemicubeFace);

        let BakeStep::Render(request) = ctx.step() else {
            panic!("expected a face request");
        };
        assert_eq!(request.face, HemicubeFace::Right);
    }

    #[test]
    fn test_step_while_awaiting_reemits() {
        let positions = [0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0];
        let uvs = [0.0, 0.0, 1.0, 0.0, 0.0, 1.0];
        let mut image = LightmapImage::new(2, 2, 4).unwrap();
        let mut ctx =
            BakeContext::new(triangle_mesh(&positions, &uvs), &mut image, BakeConfig::default())
                .unwrap();
        let first = ctx.step();
        let second = ctx.step();
        assert_eq!(first, second);
    }

    #[test]
    fn test_submit_out_of_sequence() {
        let positions = [0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0];
        let uvs = [0.0, 0.0, 1.0, 0.0, 0.0, 1.0];
        let mut image = LightmapImage::new(2, 2, 4).unwrap();
        let mut ctx =
            BakeContext::new(triangle_mesh(&positions, &uvs), &mut image, BakeConfig::default())
                .unwrap();
        let pixels = vec![1.0; 32 * 32 * 4];
        let err = ctx.submit(FacePixels::Rgba32F(&pixels)).unwrap_err();
        assert_eq!(
            err,
            BakeError::OutOfSequence {
                expected: BakeState::AwaitingRenderedFace,
                actual: BakeState::Idle,
            }
        );
        assert_eq!(ctx.state(), BakeState::Idle);
    }

    #[test]
    fn test_rejects_invalid_mesh() {
        let positions = [0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0];
        let uvs = [0.0, 0.0, 1.0, 0.0, 0.0, 1.0];
        let indices: [u32; 3] = [0, 1, 3];
        let mesh = triangle_mesh(&positions, &uvs).with_indices(IndexStream::new(
            bytemuck::cast_slice(&indices),
            IndexFormat::Uint32,
            3,
        ));
        let mut image = LightmapImage::new(2, 2, 4).unwrap();
        assert!(matches!(
            BakeContext::new(mesh, &mut image, BakeConfig::default()),
            Err(BakeError::InvalidGeometry(_))
        ));
    }

    #[test]
    fn test_last_submit_writes_texel() {
        let positions = [0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0];
        let uvs = [0.0, 0.0, 1.0, 0.0, 0.0, 1.0];
        let mut image = LightmapImage::new(1, 1, 4).unwrap();
        let config = BakeConfig::default().with_hemicube_size(8);
        let mut ctx = BakeContext::new(triangle_mesh(&positions, &uvs), &mut image, config).unwrap();

        for face in HemicubeFace::ALL {
            let BakeStep::Render(request) = ctx.step() else {
                panic!("expected a face request");
            };
            assert_eq!(request.face, face);
            assert!(!ctx.lightmap().is_written(0, 0));
            ctx.submit(FacePixels::Rgba32F(&white_face(&request))).unwrap();
        }
        assert_eq!(ctx.state(), BakeState::AdvancingTexel);
        assert!(ctx.lightmap().is_written(0, 0));
        assert_eq!(ctx.stats().rendered_texels, 1);

        assert_eq!(ctx.step(), BakeStep::Finished);
        assert_eq!(ctx.stats().rendered_texels, 1);
    }

    #[test]
    fn test_restart() {
        let positions = [0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0];
        let uvs = [0.0, 0.0, 1.0, 0.0, 0.0, 1.0];
        let mut image = LightmapImage::new(2, 2, 4).unwrap();
        let mut ctx =
            BakeContext::new(triangle_mesh(&positions, &uvs), &mut image, BakeConfig::default())
                .unwrap();
        while let BakeStep::Render(request) = ctx.step() {
            ctx.submit(FacePixels::Rgba32F(&white_face(&request))).unwrap();
        }
        assert!(ctx.is_done());
        assert_eq!(ctx.progress().fraction(), 1.0);

        ctx.restart();
        assert_eq!(ctx.state(), BakeState::Idle);
        assert_eq!(ctx.lightmap().written_count(), 0);
        assert_eq!(ctx.progress().processed, 0);
    }
}
