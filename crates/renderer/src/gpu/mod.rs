//! GPU abstraction used by every renderer.
//!
//! All GPU objects are created, used and destroyed on the render thread, so
//! [`GpuBackend`] is deliberately not `Send`. Two implementations exist:
//! - `backend` drives `wgpu` on a real window surface. `context` owns the
//!   instance/device/surface wiring, `pipeline` turns a [`ProgramDesc`] into
//!   render pipelines, and `uniforms` mirrors the injected uniform block.
//! - `headless` records every call so renderers can be exercised without a
//!   device (tests, `--headless` runs).

mod backend;
mod context;
mod headless;
mod pipeline;
mod uniforms;

use std::fmt;

pub use backend::WgpuGpu;
pub use headless::{HeadlessGpu, RecordedCommand};

use crate::types::Resolution;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FramebufferHandle(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureHandle(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProgramHandle(pub u32);

/// Where a draw or blit lands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenderTarget {
    Display,
    Framebuffer(FramebufferHandle),
}

impl fmt::Display for RenderTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderTarget::Display => f.write_str("display"),
            RenderTarget::Framebuffer(handle) => write!(f, "framebuffer {}", handle.0),
        }
    }
}

/// Primitive assembly for integer-array vertex sources.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Primitive {
    Points,
    Lines,
    LineStrip,
    Triangles,
    TriangleStrip,
}

impl std::str::FromStr for Primitive {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "points" => Ok(Primitive::Points),
            "lines" => Ok(Primitive::Lines),
            "linestrip" => Ok(Primitive::LineStrip),
            "triangles" => Ok(Primitive::Triangles),
            "trianglestrip" => Ok(Primitive::TriangleStrip),
            other => Err(format!("unknown drawing mode '{other}'")),
        }
    }
}

/// Vertex input layout a program is compiled against.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VertexKind {
    /// Four-vertex strip with `vertices` (vec3) and `vertexTexCoords` (vec2).
    Quad,
    /// A single `vertexId` float attribute counting up from zero.
    IntegerArray(Primitive),
}

/// Everything the backend needs to build one shader program.
#[derive(Clone, Debug)]
pub struct ProgramDesc {
    pub label: String,
    pub vertex_source: String,
    pub fragment_source: String,
    pub vertex_kind: VertexKind,
    /// Sampler uniform names, in binding order.
    pub samplers: Vec<String>,
    /// Float uniform names, in slot order.
    pub uniforms: Vec<String>,
}

/// Values shared by every draw in a frame.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FrameUniforms {
    /// Elapsed seconds on the drawing renderer's clock.
    pub time: f32,
    pub frame: u64,
    /// Fresh random value per frame.
    pub random_seed: f32,
    /// Random value fixed for the lifetime of the drawing renderer.
    pub random_run: f32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TextureBinding {
    pub uniform: String,
    pub texture: TextureHandle,
    pub unit: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DrawCall {
    pub program: ProgramHandle,
    pub target: RenderTarget,
    pub vertex_count: u32,
    pub textures: Vec<TextureBinding>,
    pub uniforms: Vec<(String, f32)>,
    pub frame: FrameUniforms,
}

#[derive(Debug, thiserror::Error)]
pub enum GpuError {
    #[error("failed to compile program '{label}': {message}")]
    Compile { label: String, message: String },
    #[error("render target is incomplete: {0}")]
    TargetIncomplete(String),
    #[error("surface lost or outdated")]
    SurfaceLost,
    #[error("surface timed out acquiring a frame")]
    SurfaceTimeout,
    #[error("GPU out of memory")]
    OutOfMemory,
    #[error("surface error: {0}")]
    Surface(String),
}

/// GPU primitives consumed by the renderers.
///
/// Implementations are bound to the thread that created them.
pub trait GpuBackend {
    /// Total texture units the device exposes (before the reserved block).
    fn max_texture_units(&self) -> u32;

    fn viewport(&self) -> Resolution;

    /// Reconfigures the display surface.
    fn resize_viewport(&mut self, resolution: Resolution);

    fn create_render_target(
        &mut self,
        resolution: Resolution,
    ) -> Result<(FramebufferHandle, TextureHandle), GpuError>;

    /// Reallocates storage; previous pixel contents are discarded.
    fn resize_render_target(
        &mut self,
        framebuffer: FramebufferHandle,
        texture: TextureHandle,
        resolution: Resolution,
    ) -> Result<(), GpuError>;

    fn destroy_render_target(&mut self, framebuffer: FramebufferHandle, texture: TextureHandle);

    fn compile_program(&mut self, desc: &ProgramDesc) -> Result<ProgramHandle, GpuError>;

    fn delete_program(&mut self, program: ProgramHandle);

    fn begin_frame(&mut self) -> Result<(), GpuError>;

    fn draw(&mut self, call: &DrawCall);

    /// Copies `source` onto `target`, stretching to the target size.
    fn blit(&mut self, source: TextureHandle, target: RenderTarget);

    fn end_frame(&mut self) -> Result<(), GpuError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitive_names_are_case_insensitive() {
        assert_eq!("Points".parse::<Primitive>(), Ok(Primitive::Points));
        assert_eq!("LINESTRIP".parse::<Primitive>(), Ok(Primitive::LineStrip));
        assert!("quads".parse::<Primitive>().is_err());
    }
}
