use std::path::PathBuf;

use vizconfig::{FxConfig, PrimaryPolicy};

use super::{Renderer, RendererCore, RendererInfo};
use crate::context::RenderContext;
use crate::gpu::{GpuBackend, RenderTarget};
use crate::graph::{GraphError, GraphMode, GraphParser, RenderGraph};
use crate::resources::{OwnerId, ResourceGroup};

/// Post-processing passes over a primary visualization.
///
/// The primary renders as draw buffer 0. Under `SnapClock` and `Snapshot`
/// the primary is eventually disposed and its last frame stays in buffer 0
/// for the rest of the FX renderer's life.
#[derive(Debug)]
pub struct FxRenderer {
    pub(super) core: RendererCore,
    primary: Option<Box<Renderer>>,
    graph: Option<RenderGraph>,
    policy: PrimaryPolicy,
    snapclock_step: f32,
    /// Next whole second of FX time that earns a SnapClock roll.
    next_roll: u64,
    frozen: bool,
    fx_paths: Vec<PathBuf>,
}

impl FxRenderer {
    pub fn new<G: GpuBackend>(ctx: &mut RenderContext<G>, primary: Renderer, fx: &FxConfig) -> Self {
        let name = format!("{}+{}", primary.name(), fx.name);
        let mut renderer = Self {
            core: RendererCore::new(ctx, name),
            primary: None,
            graph: None,
            policy: fx.fx.primary_policy,
            snapclock_step: fx.fx.snapclock_step,
            next_roll: 1,
            frozen: false,
            fx_paths: Vec::new(),
        };

        let mut primary = primary;
        if !primary.is_valid() {
            let reason = format!(
                "primary '{}' is invalid: {}",
                primary.name(),
                primary.invalid_reason().unwrap_or_default()
            );
            primary.dispose(ctx);
            renderer.core.invalidate(reason);
            return renderer;
        }

        match Self::build(ctx, fx) {
            Ok((graph, paths)) => {
                primary.set_output_intercepted(true);
                renderer.primary = Some(Box::new(primary));
                renderer.graph = Some(graph);
                renderer.fx_paths = paths;
            }
            Err(err) => {
                primary.dispose(ctx);
                renderer.core.invalidate(err);
            }
        }
        renderer
    }

    fn build<G: GpuBackend>(
        ctx: &mut RenderContext<G>,
        fx: &FxConfig,
    ) -> Result<(RenderGraph, Vec<PathBuf>), GraphError> {
        let layout = GraphParser::new(GraphMode::Fx, &ctx.library, &ctx.vertex_sources)
            .with_base_dir(fx.source_dir.clone())
            .with_uniforms(fx.uniforms.clone())
            .parse(&fx.fx.passes)?;
        let policy = ctx.size_policy(fx.fx.render_resolution_limit);
        let graph = RenderGraph::build(ctx, OwnerId::next(), &layout, policy)?;
        Ok((graph, layout.shader_paths()))
    }

    pub fn is_primary_frozen(&self) -> bool {
        self.frozen
    }

    pub(super) fn start_inner(&mut self, now: f32) {
        if let Some(primary) = self.primary.as_mut() {
            primary.start_clock(now);
        }
    }

    pub(super) fn stop_inner(&mut self, now: f32) {
        if let Some(primary) = self.primary.as_mut() {
            primary.stop_clock(now);
        }
    }

    pub(super) fn render_frame<G: GpuBackend>(
        &mut self,
        ctx: &mut RenderContext<G>,
        target: RenderTarget,
    ) {
        let Some(mut graph) = self.graph.take() else {
            return;
        };
        let time = self.core.clock.elapsed(ctx.now());

        let mut primary_output = None;
        if let Some(primary) = self.primary.as_mut() {
            let Some(slot) = graph.front_group(0).cloned() else {
                self.graph = Some(graph);
                return;
            };
            primary.render_frame(ctx, RenderTarget::Framebuffer(slot.framebuffer));
            primary_output = primary.output_buffer();

            if self.should_freeze(ctx, time) {
                if let Some(output) = primary_output.take() {
                    ctx.gpu
                        .blit(output.texture, RenderTarget::Framebuffer(slot.framebuffer));
                }
                self.freeze(ctx, time);
            }
        }

        let frame = ctx.frame_uniforms(time, self.core.random_run);
        let output = graph.execute(&mut ctx.gpu, frame, primary_output.as_ref());
        if !self.core.intercepted {
            ctx.gpu.blit(output.texture, target);
        }
        self.graph = Some(graph);
    }

    fn should_freeze<G: GpuBackend>(&mut self, ctx: &mut RenderContext<G>, time: f32) -> bool {
        match self.policy {
            PrimaryPolicy::Run => false,
            PrimaryPolicy::Snapshot => true,
            PrimaryPolicy::SnapClock => {
                let whole_seconds = time.max(0.0).floor() as u64;
                while self.next_roll <= whole_seconds {
                    let probability = (self.next_roll as f32 * self.snapclock_step).min(1.0);
                    self.next_roll += 1;
                    if ctx.roll(probability) {
                        return true;
                    }
                }
                false
            }
        }
    }

    fn freeze<G: GpuBackend>(&mut self, ctx: &mut RenderContext<G>, time: f32) {
        if let Some(mut primary) = self.primary.take() {
            tracing::info!(
                fx = %self.core.name,
                primary = %primary.name(),
                policy = ?self.policy,
                after = time,
                "primary frozen"
            );
            primary.dispose(ctx);
        }
        self.frozen = true;
    }

    pub(super) fn output_buffer(&self) -> Option<ResourceGroup> {
        self.graph.as_ref().map(|graph| graph.output_group().clone())
    }

    pub(super) fn viewport_resized<G: GpuBackend>(&mut self, ctx: &mut RenderContext<G>) {
        if let Some(primary) = self.primary.as_mut() {
            primary.viewport_resized(ctx);
        }
    }

    pub(super) fn shader_paths(&self) -> Vec<PathBuf> {
        let mut paths = self
            .primary
            .as_ref()
            .map(|primary| primary.shader_paths())
            .unwrap_or_default();
        paths.extend(self.fx_paths.iter().cloned());
        paths
    }

    pub(super) fn children_info(&self, now: f32) -> Vec<RendererInfo> {
        self.primary
            .iter()
            .map(|primary| primary.info(now))
            .collect()
    }

    pub(super) fn release<G: GpuBackend>(&mut self, ctx: &mut RenderContext<G>) {
        if let Some(mut primary) = self.primary.take() {
            primary.dispose(ctx);
        }
        if let Some(mut graph) = self.graph.take() {
            graph.dispose(ctx);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::super::test_support::{context, simple_viz, tick, viz};
    use super::super::{MultipassRenderer, SimpleRenderer};
    use super::*;
    use crate::context::RenderSettings;
    use crate::gpu::RecordedCommand;

    fn fx_config(dir: &std::path::Path, policy: &str, step: f32) -> FxConfig {
        let path = dir.join("glow.toml");
        fs::write(
            &path,
            format!(
                "[fx]\npasses = [\"1 0 * glow.frag\"]\nprimary_policy = \"{policy}\"\nsnapclock_step = {step:?}\n"
            ),
        )
        .unwrap();
        FxConfig::load(&path).unwrap()
    }

    #[test]
    fn run_policy_feeds_primary_into_buffer_zero() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(dir.path(), RenderSettings::default());
        let primary = Renderer::Simple(SimpleRenderer::new(&mut ctx, &simple_viz(dir.path())));
        let fx = fx_config(dir.path(), "run", 0.1);
        let mut renderer = Renderer::Fx(FxRenderer::new(&mut ctx, primary, &fx));
        assert!(renderer.is_valid(), "{:?}", renderer.invalid_reason());
        assert_eq!(renderer.name(), "plain+glow");

        renderer.render_frame(&mut ctx, RenderTarget::Display);
        let draws: Vec<_> = ctx.gpu.draws().cloned().collect();
        assert_eq!(draws.len(), 2);
        let Renderer::Fx(inner) = &renderer else {
            unreachable!()
        };
        let buffer_zero = inner.graph.as_ref().unwrap().front_group(0).unwrap().clone();
        assert_eq!(
            draws[0].target,
            RenderTarget::Framebuffer(buffer_zero.framebuffer)
        );
        assert_eq!(draws[1].textures[0].uniform, "input0");
        assert_eq!(draws[1].textures[0].texture, buffer_zero.texture);
        renderer.dispose(&mut ctx);
        assert_eq!(ctx.resources.owner_count(), 0);
    }

    #[test]
    fn snapshot_disposes_primary_on_first_frame_and_reuses_it() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(dir.path(), RenderSettings::default());
        let primary_config = viz(
            dir.path(),
            "layers",
            "[multipass]\npasses = [\"0 * * plain.frag\", \"1 0 * blur.frag\"]\n",
        );
        let primary = Renderer::Multipass(MultipassRenderer::new(&mut ctx, &primary_config));
        let primary_output = primary.output_buffer().unwrap();
        let fx = fx_config(dir.path(), "snapshot", 0.1);
        let mut renderer = Renderer::Fx(FxRenderer::new(&mut ctx, primary, &fx));

        renderer.render_frame(&mut ctx, RenderTarget::Display);
        let commands = ctx.gpu.take_commands();
        let Renderer::Fx(inner) = &renderer else {
            unreachable!()
        };
        assert!(inner.is_primary_frozen());
        let buffer_zero = inner.graph.as_ref().unwrap().front_group(0).unwrap().clone();
        assert!(commands.contains(&RecordedCommand::Blit {
            source: primary_output.texture,
            target: RenderTarget::Framebuffer(buffer_zero.framebuffer),
        }));
        // Only the FX graph owns buffers now.
        assert_eq!(ctx.resources.owner_count(), 1);

        renderer.render_frame(&mut ctx, RenderTarget::Display);
        let draws: Vec<_> = ctx.gpu.draws().cloned().collect();
        assert_eq!(draws.len(), 1);
        assert_eq!(draws[0].textures[0].texture, buffer_zero.texture);
        renderer.dispose(&mut ctx);
    }

    #[test]
    fn snapclock_with_full_step_freezes_after_first_second() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(dir.path(), RenderSettings::default());
        let primary = Renderer::Simple(SimpleRenderer::new(&mut ctx, &simple_viz(dir.path())));
        let fx = fx_config(dir.path(), "snapclock", 1.0);
        let mut renderer = Renderer::Fx(FxRenderer::new(&mut ctx, primary, &fx));
        tick(&mut ctx);
        renderer.start_clock(ctx.now());

        // Stepped clock advances half a second per frame.
        tick(&mut ctx);
        renderer.render_frame(&mut ctx, RenderTarget::Display);
        let Renderer::Fx(inner) = &renderer else {
            unreachable!()
        };
        assert!(!inner.is_primary_frozen());

        tick(&mut ctx);
        renderer.render_frame(&mut ctx, RenderTarget::Display);
        let Renderer::Fx(inner) = &renderer else {
            unreachable!()
        };
        assert!(inner.is_primary_frozen());
        renderer.dispose(&mut ctx);
    }

    #[test]
    fn invalid_primary_invalidates_fx() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(dir.path(), RenderSettings::default());
        let bad = viz(dir.path(), "bad", "[shader]\nfragment_shader = \"broken.frag\"\n");
        let primary = Renderer::Simple(SimpleRenderer::new(&mut ctx, &bad));
        let fx = fx_config(dir.path(), "run", 0.1);
        let renderer = Renderer::Fx(FxRenderer::new(&mut ctx, primary, &fx));
        assert!(renderer.invalid_reason().unwrap().contains("primary 'bad'"));
        assert_eq!(ctx.resources.owner_count(), 0);
    }
}
