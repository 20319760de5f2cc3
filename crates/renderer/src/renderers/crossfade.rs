use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use super::{Renderer, RendererCore, RendererInfo};
use crate::context::RenderContext;
use crate::gpu::{DrawCall, GpuBackend, RenderTarget, TextureBinding, VertexKind};
use crate::resources::{OwnerId, ResourceGroup};
use crate::shaders::{BuiltinShader, ShaderKey, ShaderOrigin, ShaderProgram};
use crate::types::SizePolicy;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CrossfadeState {
    Fading,
    Completed,
}

type CompletionCallback = Box<dyn FnOnce() + Send>;

/// Blends an outgoing renderer into an incoming one over a fixed duration.
///
/// Both inner renderers draw with their output intercepted. Inner renderers
/// without a buffer of their own draw into one of two buffers allocated
/// here. Once the blend reaches the new renderer the completion callback
/// fires once and further frames draw nothing; the orchestrator then takes
/// the new renderer back with [`CrossfadeRenderer::into_new`].
pub struct CrossfadeRenderer {
    pub(super) core: RendererCore,
    old: Option<Box<Renderer>>,
    new: Option<Box<Renderer>>,
    program: Option<Arc<ShaderProgram>>,
    owner: OwnerId,
    buffers: Vec<ResourceGroup>,
    duration: f32,
    state: CrossfadeState,
    on_complete: Option<CompletionCallback>,
}

impl fmt::Debug for CrossfadeRenderer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CrossfadeRenderer")
            .field("name", &self.core.name)
            .field("old", &self.old.as_ref().map(|old| old.name()))
            .field("new", &self.new.as_ref().map(|new| new.name()))
            .field("duration", &self.duration)
            .field("state", &self.state)
            .finish()
    }
}

impl CrossfadeRenderer {
    pub fn new<G: GpuBackend>(
        ctx: &mut RenderContext<G>,
        old: Renderer,
        new: Renderer,
        duration: Duration,
    ) -> Self {
        let name = format!("{} -> {}", old.name(), new.name());
        let mut renderer = Self {
            core: RendererCore::new(ctx, name),
            old: None,
            new: None,
            program: None,
            owner: OwnerId::next(),
            buffers: Vec::new(),
            duration: duration.as_secs_f32(),
            state: CrossfadeState::Fading,
            on_complete: None,
        };

        let fragment = match &ctx.settings.crossfade_shader {
            Some(path) => ShaderOrigin::File(path.clone()),
            None => ShaderOrigin::Builtin(BuiltinShader::CrossfadeFragment),
        };
        let key = ShaderKey::new(
            ShaderOrigin::Builtin(BuiltinShader::QuadVertex),
            fragment,
            VertexKind::Quad,
        )
        .with_samplers(["oldBuffer", "newBuffer"])
        .with_uniforms(["fadeLevel"]);

        match ctx.shaders.get_or_compile(&mut ctx.gpu, &key) {
            Ok(program) => renderer.program = Some(program),
            Err(err) => renderer.core.invalidate(format!("blend shader: {err}")),
        }
        if renderer.core.is_valid() {
            match ctx.resources.create_resource_groups(
                &mut ctx.gpu,
                renderer.owner,
                2,
                SizePolicy::Viewport,
            ) {
                Ok(groups) => renderer.buffers = groups,
                Err(err) => renderer.core.invalidate(err),
            }
        }

        let mut old = old;
        let mut new = new;
        old.set_output_intercepted(true);
        new.set_output_intercepted(true);
        renderer.old = Some(Box::new(old));
        renderer.new = Some(Box::new(new));
        tracing::info!(
            crossfade = %renderer.core.name,
            seconds = renderer.duration,
            "crossfade started"
        );
        renderer
    }

    /// Registers a callback fired once when the blend completes.
    pub fn on_complete(mut self, callback: impl FnOnce() + Send + 'static) -> Self {
        self.on_complete = Some(Box::new(callback));
        self
    }

    pub fn state(&self) -> CrossfadeState {
        self.state
    }

    pub fn is_completed(&self) -> bool {
        self.state == CrossfadeState::Completed
    }

    /// Blend progress in `0..=1`.
    pub fn progress(&self, now: f32) -> f32 {
        if self.duration <= 0.0 {
            return 1.0;
        }
        (self.core.clock.elapsed(now) / self.duration).clamp(0.0, 1.0)
    }

    pub(super) fn start_inner(&mut self, now: f32) {
        for inner in [self.old.as_mut(), self.new.as_mut()].into_iter().flatten() {
            inner.start_clock(now);
        }
    }

    pub(super) fn stop_inner(&mut self, now: f32) {
        for inner in [self.old.as_mut(), self.new.as_mut()].into_iter().flatten() {
            inner.stop_clock(now);
        }
    }

    pub(super) fn render_frame<G: GpuBackend>(
        &mut self,
        ctx: &mut RenderContext<G>,
        target: RenderTarget,
    ) {
        if self.state == CrossfadeState::Completed {
            return;
        }
        let (Some(program), [old_buffer, new_buffer]) = (&self.program, self.buffers.as_slice())
        else {
            return;
        };
        let level = self.progress(ctx.now());

        let old_texture = render_inner(ctx, self.old.as_deref_mut(), old_buffer);
        let new_texture = render_inner(ctx, self.new.as_deref_mut(), new_buffer);

        let time = self.core.clock.elapsed(ctx.now());
        let frame = ctx.frame_uniforms(time, self.core.random_run);
        ctx.gpu.draw(&DrawCall {
            program: program.handle(),
            target,
            vertex_count: 4,
            textures: vec![
                TextureBinding {
                    uniform: "oldBuffer".into(),
                    texture: old_texture,
                    unit: old_buffer.texture_unit,
                },
                TextureBinding {
                    uniform: "newBuffer".into(),
                    texture: new_texture,
                    unit: new_buffer.texture_unit,
                },
            ],
            uniforms: vec![("fadeLevel".into(), level)],
            frame,
        });

        if level >= 1.0 {
            self.complete();
        }
    }

    fn complete(&mut self) {
        if self.state == CrossfadeState::Completed {
            return;
        }
        self.state = CrossfadeState::Completed;
        tracing::info!(crossfade = %self.core.name, "crossfade completed");
        if let Some(callback) = self.on_complete.take() {
            callback();
        }
    }

    pub(super) fn viewport_resized<G: GpuBackend>(&mut self, ctx: &mut RenderContext<G>) {
        for inner in [self.old.as_mut(), self.new.as_mut()].into_iter().flatten() {
            inner.viewport_resized(ctx);
        }
    }

    pub(super) fn shader_paths(&self) -> Vec<PathBuf> {
        [self.old.as_ref(), self.new.as_ref()]
            .into_iter()
            .flatten()
            .flat_map(|inner| inner.shader_paths())
            .collect()
    }

    pub(super) fn children_info(&self, now: f32) -> Vec<RendererInfo> {
        [self.old.as_ref(), self.new.as_ref()]
            .into_iter()
            .flatten()
            .map(|inner| inner.info(now))
            .collect()
    }

    /// Disposes the old renderer and the blend resources, returning the new
    /// renderer ready to present on its own.
    pub fn into_new<G: GpuBackend>(mut self, ctx: &mut RenderContext<G>) -> Option<Renderer> {
        self.core.begin_dispose();
        self.release_own(ctx);
        if let Some(mut old) = self.old.take() {
            old.dispose(ctx);
        }
        let mut new = *self.new.take()?;
        new.set_output_intercepted(false);
        Some(new)
    }

    fn release_own<G: GpuBackend>(&mut self, ctx: &mut RenderContext<G>) {
        self.program = None;
        self.buffers.clear();
        ctx.resources.destroy_resources(&mut ctx.gpu, self.owner);
    }

    pub(super) fn release<G: GpuBackend>(&mut self, ctx: &mut RenderContext<G>) {
        self.release_own(ctx);
        for mut inner in [self.old.take(), self.new.take()].into_iter().flatten() {
            inner.dispose(ctx);
        }
    }
}

/// Draws one side of the blend and returns the texture holding its frame.
fn render_inner<G: GpuBackend>(
    ctx: &mut RenderContext<G>,
    inner: Option<&mut Renderer>,
    fallback: &ResourceGroup,
) -> crate::gpu::TextureHandle {
    let Some(inner) = inner else {
        return fallback.texture;
    };
    inner.render_frame(ctx, RenderTarget::Framebuffer(fallback.framebuffer));
    inner
        .output_buffer()
        .map(|group| group.texture)
        .unwrap_or(fallback.texture)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::super::test_support::{context, simple_viz, tick, viz};
    use super::super::{MultipassRenderer, SimpleRenderer};
    use super::*;
    use crate::context::RenderSettings;

    fn pair(
        ctx: &mut RenderContext<crate::gpu::HeadlessGpu>,
        dir: &std::path::Path,
    ) -> (Renderer, Renderer) {
        let old = Renderer::Simple(SimpleRenderer::new(ctx, &simple_viz(dir)));
        let layered = viz(
            dir,
            "layers",
            "[multipass]\npasses = [\"0 * * plain.frag\", \"1 0 * blur.frag\"]\n",
        );
        let new = Renderer::Multipass(MultipassRenderer::new(ctx, &layered));
        (old, new)
    }

    #[test]
    fn completion_callback_fires_exactly_once() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(dir.path(), RenderSettings::default());
        let (old, new) = pair(&mut ctx, dir.path());
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let crossfade = CrossfadeRenderer::new(&mut ctx, old, new, Duration::from_secs(2))
            .on_complete(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        let mut renderer = Renderer::Crossfade(Box::new(crossfade));
        assert!(renderer.is_valid(), "{:?}", renderer.invalid_reason());
        tick(&mut ctx);
        renderer.start_clock(ctx.now());

        // 0.5 s per frame: 2 s needs four more frames.
        for _ in 0..4 {
            tick(&mut ctx);
            renderer.render_frame(&mut ctx, RenderTarget::Display);
        }
        let Renderer::Crossfade(inner) = &renderer else {
            unreachable!()
        };
        assert_eq!(inner.state(), CrossfadeState::Completed);
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        ctx.gpu.take_commands();
        for _ in 0..3 {
            tick(&mut ctx);
            renderer.render_frame(&mut ctx, RenderTarget::Display);
        }
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(ctx.gpu.draws().next().is_none());
        renderer.dispose(&mut ctx);
        assert_eq!(ctx.resources.owner_count(), 0);
    }

    #[test]
    fn blend_samples_synthesized_and_owned_buffers() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(dir.path(), RenderSettings::default());
        let (old, new) = pair(&mut ctx, dir.path());
        let new_output = new.output_buffer().unwrap();
        let crossfade = CrossfadeRenderer::new(&mut ctx, old, new, Duration::from_secs(4));
        let synthesized = crossfade.buffers.clone();
        let mut renderer = Renderer::Crossfade(Box::new(crossfade));
        renderer.start_clock(ctx.now());
        tick(&mut ctx);
        tick(&mut ctx);
        ctx.gpu.take_commands();
        renderer.render_frame(&mut ctx, RenderTarget::Display);

        let blend = ctx.gpu.draws().last().unwrap().clone();
        assert_eq!(blend.target, RenderTarget::Display);
        assert_eq!(blend.textures[0].texture, synthesized[0].texture);
        assert_eq!(blend.textures[1].texture, new_output.texture);
        assert_eq!(blend.uniforms, vec![("fadeLevel".to_string(), 0.125)]);
        renderer.dispose(&mut ctx);
    }

    #[test]
    fn into_new_hands_back_presenting_renderer() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(dir.path(), RenderSettings::default());
        let (old, new) = pair(&mut ctx, dir.path());
        let crossfade = CrossfadeRenderer::new(&mut ctx, old, new, Duration::ZERO);
        let owners_before = ctx.resources.owner_count();
        let mut renderer = crossfade.into_new(&mut ctx).unwrap();
        assert_eq!(renderer.name(), "layers");
        assert!(!renderer.output_intercepted());
        // Crossfade buffers and the old renderer are gone.
        assert_eq!(ctx.resources.owner_count(), owners_before - 1);
        renderer.dispose(&mut ctx);
        assert_eq!(ctx.resources.owner_count(), 0);
    }
}
