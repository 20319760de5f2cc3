//! Renderer variants driven by the orchestrator every frame.
//!
//! Construction never fails outright: problems are recorded as
//! [`Validity::Invalid`] so the caller can log and drop the renderer without
//! unwinding through the frame loop. Every renderer must be disposed exactly
//! once with the context that created it; `dispose` is idempotent.

mod crossfade;
mod fx;
mod multipass;
mod simple;

use std::fmt;
use std::path::PathBuf;

pub use crossfade::{CrossfadeRenderer, CrossfadeState};
pub use fx::FxRenderer;
pub use multipass::MultipassRenderer;
pub use simple::SimpleRenderer;

use crate::context::RenderContext;
use crate::gpu::{GpuBackend, RenderTarget};
use crate::resources::ResourceGroup;
use crate::runtime::Clock;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Validity {
    Valid,
    Invalid(String),
}

/// State shared by every variant.
#[derive(Debug)]
pub(crate) struct RendererCore {
    name: String,
    validity: Validity,
    clock: Clock,
    intercepted: bool,
    disposed: bool,
    /// Fixed random value exposed to shaders as `randomrun`.
    random_run: f32,
}

impl RendererCore {
    fn new<G: GpuBackend>(ctx: &mut RenderContext<G>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            validity: Validity::Valid,
            clock: Clock::default(),
            intercepted: false,
            disposed: false,
            random_run: ctx.random(),
        }
    }

    fn invalidate(&mut self, reason: impl fmt::Display) {
        let reason = reason.to_string();
        tracing::warn!(renderer = %self.name, %reason, "renderer is invalid");
        self.validity = Validity::Invalid(reason);
    }

    fn is_valid(&self) -> bool {
        self.validity == Validity::Valid
    }

    /// True when this renderer should draw this frame.
    fn active(&self) -> bool {
        self.is_valid() && !self.disposed
    }

    /// Marks disposal; false when it already happened.
    fn begin_dispose(&mut self) -> bool {
        if self.disposed {
            return false;
        }
        self.disposed = true;
        tracing::debug!(renderer = %self.name, "renderer disposed");
        true
    }
}

/// Snapshot reported by the `info` command.
#[derive(Clone, Debug, PartialEq)]
pub struct RendererInfo {
    pub kind: &'static str,
    pub name: String,
    pub invalid_reason: Option<String>,
    pub elapsed: f32,
    pub output_intercepted: bool,
    pub children: Vec<RendererInfo>,
}

impl RendererInfo {
    fn write_indented(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        write!(
            f,
            "{:indent$}{} '{}' elapsed {:.2}s",
            "",
            self.kind,
            self.name,
            self.elapsed,
            indent = depth * 2
        )?;
        if self.output_intercepted {
            f.write_str(" (intercepted)")?;
        }
        if let Some(reason) = &self.invalid_reason {
            write!(f, " INVALID: {reason}")?;
        }
        for child in &self.children {
            writeln!(f)?;
            child.write_indented(f, depth + 1)?;
        }
        Ok(())
    }
}

impl fmt::Display for RendererInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_indented(f, 0)
    }
}

/// The renderer variants.
#[derive(Debug)]
pub enum Renderer {
    Simple(SimpleRenderer),
    Multipass(MultipassRenderer),
    Fx(FxRenderer),
    Crossfade(Box<CrossfadeRenderer>),
}

impl Renderer {
    fn core(&self) -> &RendererCore {
        match self {
            Renderer::Simple(renderer) => &renderer.core,
            Renderer::Multipass(renderer) => &renderer.core,
            Renderer::Fx(renderer) => &renderer.core,
            Renderer::Crossfade(renderer) => &renderer.core,
        }
    }

    fn core_mut(&mut self) -> &mut RendererCore {
        match self {
            Renderer::Simple(renderer) => &mut renderer.core,
            Renderer::Multipass(renderer) => &mut renderer.core,
            Renderer::Fx(renderer) => &mut renderer.core,
            Renderer::Crossfade(renderer) => &mut renderer.core,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Renderer::Simple(_) => "simple",
            Renderer::Multipass(_) => "multipass",
            Renderer::Fx(_) => "fx",
            Renderer::Crossfade(_) => "crossfade",
        }
    }

    /// Draws one frame to `target`. Invalid or disposed renderers draw nothing.
    pub fn render_frame<G: GpuBackend>(&mut self, ctx: &mut RenderContext<G>, target: RenderTarget) {
        if !self.core().active() {
            return;
        }
        match self {
            Renderer::Simple(renderer) => renderer.render_frame(ctx, target),
            Renderer::Multipass(renderer) => renderer.render_frame(ctx, target),
            Renderer::Fx(renderer) => renderer.render_frame(ctx, target),
            Renderer::Crossfade(renderer) => renderer.render_frame(ctx, target),
        }
    }

    pub fn start_clock(&mut self, now: f32) {
        self.core_mut().clock.start(now);
        match self {
            Renderer::Fx(renderer) => renderer.start_inner(now),
            Renderer::Crossfade(renderer) => renderer.start_inner(now),
            _ => {}
        }
    }

    pub fn stop_clock(&mut self, now: f32) {
        self.core_mut().clock.stop(now);
        match self {
            Renderer::Fx(renderer) => renderer.stop_inner(now),
            Renderer::Crossfade(renderer) => renderer.stop_inner(now),
            _ => {}
        }
    }

    /// Seconds this renderer's clock has run.
    pub fn elapsed(&self, now: f32) -> f32 {
        self.core().clock.elapsed(now)
    }

    pub fn is_valid(&self) -> bool {
        self.core().is_valid()
    }

    pub fn invalid_reason(&self) -> Option<&str> {
        match &self.core().validity {
            Validity::Valid => None,
            Validity::Invalid(reason) => Some(reason),
        }
    }

    pub fn name(&self) -> &str {
        &self.core().name
    }

    pub fn is_disposed(&self) -> bool {
        self.core().disposed
    }

    pub fn output_intercepted(&self) -> bool {
        self.core().intercepted
    }

    /// When set, the renderer leaves its output in its own buffer instead of
    /// presenting it, so a composite owner can sample it.
    pub fn set_output_intercepted(&mut self, intercepted: bool) {
        self.core_mut().intercepted = intercepted;
    }

    /// Buffer holding the latest output, when the renderer owns one.
    pub fn output_buffer(&self) -> Option<ResourceGroup> {
        match self {
            Renderer::Simple(renderer) => renderer.output_buffer(),
            Renderer::Multipass(renderer) => renderer.output_buffer(),
            Renderer::Fx(renderer) => renderer.output_buffer(),
            Renderer::Crossfade(_) => None,
        }
    }

    /// Reacts to a viewport change after the resource manager resized buffers.
    pub fn viewport_resized<G: GpuBackend>(&mut self, ctx: &mut RenderContext<G>) {
        if !self.core().active() {
            return;
        }
        match self {
            Renderer::Simple(renderer) => renderer.viewport_resized(ctx),
            Renderer::Multipass(_) => {}
            Renderer::Fx(renderer) => renderer.viewport_resized(ctx),
            Renderer::Crossfade(renderer) => renderer.viewport_resized(ctx),
        }
    }

    /// Shader files this renderer was compiled from.
    pub fn shader_paths(&self) -> Vec<PathBuf> {
        match self {
            Renderer::Simple(renderer) => renderer.shader_paths(),
            Renderer::Multipass(renderer) => renderer.shader_paths(),
            Renderer::Fx(renderer) => renderer.shader_paths(),
            Renderer::Crossfade(renderer) => renderer.shader_paths(),
        }
    }

    /// Releases every GPU resource the renderer owns. Safe to call twice.
    pub fn dispose<G: GpuBackend>(&mut self, ctx: &mut RenderContext<G>) {
        if !self.core_mut().begin_dispose() {
            return;
        }
        match self {
            Renderer::Simple(renderer) => renderer.release(ctx),
            Renderer::Multipass(renderer) => renderer.release(ctx),
            Renderer::Fx(renderer) => renderer.release(ctx),
            Renderer::Crossfade(renderer) => renderer.release(ctx),
        }
    }

    pub fn info(&self, now: f32) -> RendererInfo {
        let children = match self {
            Renderer::Fx(renderer) => renderer.children_info(now),
            Renderer::Crossfade(renderer) => renderer.children_info(now),
            _ => Vec::new(),
        };
        RendererInfo {
            kind: self.kind(),
            name: self.name().to_string(),
            invalid_reason: self.invalid_reason().map(str::to_string),
            elapsed: self.elapsed(now),
            output_intercepted: self.output_intercepted(),
            children,
        }
    }
}
