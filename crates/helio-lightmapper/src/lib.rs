//! Helio Lightmapper - incremental hemicube lightmap baking
//!
//! Bakes per-texel irradiance (typically ambient occlusion) into a UV
//! lightmap by rendering the scene from every covered texel through a
//! hemicube. The crate owns no GPU objects: it tells the caller which
//! viewport and matrices to render with, one face per [`BakeContext::step`],
//! and integrates whatever pixels come back. That lets a bake share the
//! host's render loop with a live preview.
//!
//! - [`geometry`] - zero-copy, bounds-checked mesh access
//! - [`image`] - the float lightmap target and its written mask
//! - [`raster`] - conservative UV triangle rasterization
//! - [`hemicube`] - face cameras and integration weights
//! - [`context`] - the step/submit state machine
//! - [`post`] - smooth, dilate and power passes for the finished image

pub mod accumulator;
pub mod config;
pub mod context;
pub mod geometry;
pub mod hemicube;
pub mod image;
pub mod post;
pub mod raster;

mod error;

pub use accumulator::FacePixels;
pub use config::{BakeConfig, SampleMode};
pub use context::{BakeContext, BakeState, BakeStats, BakeStep, FaceRenderer, FaceRequest, Progress};
pub use error::BakeError;
pub use geometry::{AttributeFormat, IndexFormat, IndexStream, MeshView, VertexStream};
pub use hemicube::{HemicubeFace, Viewport};
pub use image::LightmapImage;
pub use post::{dilate, dilate_with, power, smooth, Connectivity, PingPong};

/// Result type for lightmapper operations
pub type Result<T> = std::result::Result<T, BakeError>;
