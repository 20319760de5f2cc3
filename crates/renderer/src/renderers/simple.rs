use std::path::PathBuf;
use std::sync::Arc;

use vizconfig::VizConfig;

use super::RendererCore;
use crate::context::RenderContext;
use crate::gpu::{DrawCall, GpuBackend, RenderTarget};
use crate::graph::{GraphMode, GraphParser};
use crate::resources::{OwnerId, ResourceGroup};
use crate::shaders::ShaderProgram;
use crate::types::SizePolicy;
use crate::vertex::VertexSource;

/// One shader over one vertex source.
///
/// Draws straight into the target unless the resolution limit shrinks the
/// output, in which case it draws into its own buffer and blits that.
#[derive(Debug)]
pub struct SimpleRenderer {
    pub(super) core: RendererCore,
    owner: OwnerId,
    program: Option<Arc<ShaderProgram>>,
    vertex_source: VertexSource,
    uniforms: Vec<(String, f32)>,
    policy: SizePolicy,
    buffer: Option<ResourceGroup>,
}

impl SimpleRenderer {
    pub fn new<G: GpuBackend>(ctx: &mut RenderContext<G>, config: &VizConfig) -> Self {
        let mut renderer = Self {
            core: RendererCore::new(ctx, config.name.clone()),
            owner: OwnerId::next(),
            program: None,
            vertex_source: VertexSource::Quad,
            uniforms: Vec::new(),
            policy: ctx.size_policy(config.shader.render_resolution_limit),
            buffer: None,
        };

        let spec = match GraphParser::new(GraphMode::Visualization, &ctx.library, &ctx.vertex_sources)
            .single_pass(config)
        {
            Ok(spec) => spec,
            Err(err) => {
                renderer.core.invalidate(err);
                return renderer;
            }
        };
        match ctx.shaders.get_or_compile(&mut ctx.gpu, &spec.shader_key()) {
            Ok(program) => renderer.program = Some(program),
            Err(err) => {
                renderer.core.invalidate(err);
                return renderer;
            }
        }
        renderer.vertex_source = spec.vertex_source;
        renderer.uniforms = spec.uniforms.into_iter().collect();
        renderer.sync_buffer(ctx);
        tracing::debug!(
            viz = %config.name,
            buffered = renderer.buffer.is_some(),
            "simple renderer ready"
        );
        renderer
    }

    pub(super) fn render_frame<G: GpuBackend>(
        &mut self,
        ctx: &mut RenderContext<G>,
        target: RenderTarget,
    ) {
        let Some(program) = &self.program else {
            return;
        };
        let time = self.core.clock.elapsed(ctx.now());
        let frame = ctx.frame_uniforms(time, self.core.random_run);
        let draw_target = match &self.buffer {
            Some(buffer) => RenderTarget::Framebuffer(buffer.framebuffer),
            None => target,
        };
        ctx.gpu.draw(&DrawCall {
            program: program.handle(),
            target: draw_target,
            vertex_count: self.vertex_source.vertex_count(),
            textures: Vec::new(),
            uniforms: self.uniforms.clone(),
            frame,
        });
        if let Some(buffer) = &self.buffer {
            if !self.core.intercepted {
                ctx.gpu.blit(buffer.texture, target);
            }
        }
    }

    pub(super) fn output_buffer(&self) -> Option<ResourceGroup> {
        self.buffer.clone()
    }

    pub(super) fn viewport_resized<G: GpuBackend>(&mut self, ctx: &mut RenderContext<G>) {
        self.sync_buffer(ctx);
    }

    /// Allocates or frees the intermediate buffer to match the current viewport.
    fn sync_buffer<G: GpuBackend>(&mut self, ctx: &mut RenderContext<G>) {
        let needed = self.policy.applies(ctx.viewport());
        match (needed, self.buffer.is_some()) {
            (true, false) => {
                match ctx
                    .resources
                    .create_resource_groups(&mut ctx.gpu, self.owner, 1, self.policy)
                {
                    Ok(mut groups) => self.buffer = groups.pop(),
                    Err(err) => self.core.invalidate(err),
                }
            }
            (false, true) => {
                ctx.resources.destroy_resources(&mut ctx.gpu, self.owner);
                self.buffer = None;
            }
            _ => {}
        }
    }

    pub(super) fn shader_paths(&self) -> Vec<PathBuf> {
        self.program
            .iter()
            .flat_map(|program| {
                let key = program.key();
                [key.vertex.path(), key.fragment.path()]
            })
            .flatten()
            .map(PathBuf::from)
            .collect()
    }

    pub(super) fn release<G: GpuBackend>(&mut self, ctx: &mut RenderContext<G>) {
        self.program = None;
        self.buffer = None;
        ctx.resources.destroy_resources(&mut ctx.gpu, self.owner);
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{context, simple_viz, viz};
    use super::super::Renderer;
    use super::*;
    use crate::context::RenderSettings;
    use crate::gpu::RecordedCommand;
    use crate::types::Resolution;

    #[test]
    fn draws_directly_without_resolution_limit() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(dir.path(), RenderSettings::default());
        let config = simple_viz(dir.path());
        let mut renderer = Renderer::Simple(SimpleRenderer::new(&mut ctx, &config));
        assert!(renderer.is_valid());
        assert!(renderer.output_buffer().is_none());

        renderer.render_frame(&mut ctx, RenderTarget::Display);
        let commands = ctx.gpu.take_commands();
        assert_eq!(commands.len(), 1);
        assert!(matches!(
            &commands[0],
            RecordedCommand::Draw(call) if call.target == RenderTarget::Display && call.vertex_count == 4
        ));
        renderer.dispose(&mut ctx);
    }

    #[test]
    fn resolution_limit_routes_through_buffer_until_viewport_shrinks() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(dir.path(), RenderSettings::default());
        let config = viz(
            dir.path(),
            "capped",
            "[shader]\nfragment_shader = \"plain.frag\"\nrender_resolution_limit = 640\n",
        );
        let mut renderer = Renderer::Simple(SimpleRenderer::new(&mut ctx, &config));
        let buffer = renderer.output_buffer().unwrap();
        assert_eq!(
            ctx.gpu.texture_resolution(buffer.texture),
            Some(Resolution::new(640, 360))
        );

        renderer.render_frame(&mut ctx, RenderTarget::Display);
        let commands = ctx.gpu.take_commands();
        assert_eq!(commands.len(), 2);
        assert_eq!(
            commands[1],
            RecordedCommand::Blit {
                source: buffer.texture,
                target: RenderTarget::Display
            }
        );

        renderer.set_output_intercepted(true);
        renderer.render_frame(&mut ctx, RenderTarget::Display);
        assert_eq!(ctx.gpu.take_commands().len(), 1);

        ctx.resize(Resolution::new(600, 400));
        renderer.viewport_resized(&mut ctx);
        assert!(renderer.output_buffer().is_none());
        assert_eq!(ctx.resources.owner_count(), 0);
        renderer.dispose(&mut ctx);
    }

    #[test]
    fn compile_failure_marks_renderer_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(dir.path(), RenderSettings::default());
        let config = viz(dir.path(), "bad", "[shader]\nfragment_shader = \"broken.frag\"\n");
        let mut renderer = Renderer::Simple(SimpleRenderer::new(&mut ctx, &config));
        assert!(!renderer.is_valid());
        assert!(renderer.invalid_reason().unwrap().contains("#error"));

        renderer.render_frame(&mut ctx, RenderTarget::Display);
        assert!(ctx.gpu.draws().next().is_none());
        renderer.dispose(&mut ctx);
        renderer.dispose(&mut ctx);
        assert!(renderer.is_disposed());
    }

    #[test]
    fn missing_shader_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(dir.path(), RenderSettings::default());
        let config = viz(dir.path(), "lost", "[shader]\nfragment_shader = \"nowhere.frag\"\n");
        let renderer = SimpleRenderer::new(&mut ctx, &config);
        let renderer = Renderer::Simple(renderer);
        assert!(renderer.invalid_reason().unwrap().contains("nowhere.frag"));
    }
}
