use std::path::PathBuf;

use vizconfig::VizConfig;

use super::RendererCore;
use crate::context::RenderContext;
use crate::gpu::{GpuBackend, RenderTarget};
use crate::graph::{GraphError, GraphMode, GraphParser, RenderGraph};
use crate::resources::{OwnerId, ResourceGroup};

/// Executes a parsed render graph with front/back buffer feedback.
#[derive(Debug)]
pub struct MultipassRenderer {
    pub(super) core: RendererCore,
    graph: Option<RenderGraph>,
    shader_paths: Vec<PathBuf>,
}

impl MultipassRenderer {
    pub fn new<G: GpuBackend>(ctx: &mut RenderContext<G>, config: &VizConfig) -> Self {
        let mut renderer = Self {
            core: RendererCore::new(ctx, config.name.clone()),
            graph: None,
            shader_paths: Vec::new(),
        };
        match Self::build(ctx, config) {
            Ok((graph, paths)) => {
                renderer.graph = Some(graph);
                renderer.shader_paths = paths;
            }
            Err(err) => renderer.core.invalidate(err),
        }
        renderer
    }

    fn build<G: GpuBackend>(
        ctx: &mut RenderContext<G>,
        config: &VizConfig,
    ) -> Result<(RenderGraph, Vec<PathBuf>), GraphError> {
        let layout = GraphParser::new(GraphMode::Visualization, &ctx.library, &ctx.vertex_sources)
            .with_base_dir(config.source_dir.clone())
            .with_uniforms(config.uniforms.clone())
            .parse(config.passes())?;
        let policy = ctx.size_policy(config.shader.render_resolution_limit);
        let graph = RenderGraph::build(ctx, OwnerId::next(), &layout, policy)?;
        Ok((graph, layout.shader_paths()))
    }

    pub(super) fn render_frame<G: GpuBackend>(
        &mut self,
        ctx: &mut RenderContext<G>,
        target: RenderTarget,
    ) {
        let Some(graph) = self.graph.as_mut() else {
            return;
        };
        let time = self.core.clock.elapsed(ctx.now());
        let frame = ctx.frame_uniforms(time, self.core.random_run);
        let output = graph.execute(&mut ctx.gpu, frame, None);
        if !self.core.intercepted {
            ctx.gpu.blit(output.texture, target);
        }
    }

    pub(super) fn output_buffer(&self) -> Option<ResourceGroup> {
        self.graph.as_ref().map(|graph| graph.output_group().clone())
    }

    pub(super) fn shader_paths(&self) -> Vec<PathBuf> {
        self.shader_paths.clone()
    }

    pub(super) fn release<G: GpuBackend>(&mut self, ctx: &mut RenderContext<G>) {
        if let Some(mut graph) = self.graph.take() {
            graph.dispose(ctx);
        }
    }
}
