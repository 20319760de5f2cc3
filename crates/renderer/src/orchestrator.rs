//! Active/staged renderer bookkeeping and transitions between them.

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use vizconfig::{FxConfig, VizConfig};

use crate::context::RenderContext;
use crate::gpu::{GpuBackend, RenderTarget};
use crate::renderers::{
    CrossfadeRenderer, FxRenderer, MultipassRenderer, Renderer, RendererInfo, SimpleRenderer,
};
use crate::types::Resolution;

struct Staged {
    renderer: Renderer,
    crossfade: Duration,
}

/// Holds the renderer on screen and at most one waiting to replace it.
///
/// A staged renderer is installed at the start of the next frame, directly
/// when the blend time is zero and through a crossfade otherwise. A
/// crossfade in flight always runs to completion; anything staged meanwhile
/// waits for it.
#[derive(Default)]
pub struct RenderManager {
    active: Option<Renderer>,
    staged: Option<Staged>,
    transitions: Arc<AtomicU64>,
}

/// Snapshot reported by the `info` command.
#[derive(Clone, Debug, PartialEq)]
pub struct ManagerInfo {
    pub viewport: Resolution,
    pub active: Option<RendererInfo>,
    pub staged: Option<String>,
    pub completed_transitions: u64,
    pub cached_shaders: usize,
    pub free_texture_units: usize,
}

impl fmt::Display for ManagerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "viewport {} | cached shaders {} | free texture units {} | transitions {}",
            self.viewport, self.cached_shaders, self.free_texture_units, self.completed_transitions
        )?;
        match &self.active {
            Some(active) => writeln!(f, "{active}")?,
            None => writeln!(f, "no active renderer")?,
        }
        if let Some(staged) = &self.staged {
            write!(f, "staged: {staged}")?;
        }
        Ok(())
    }
}

impl RenderManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active(&self) -> Option<&Renderer> {
        self.active.as_ref()
    }

    pub fn staged_name(&self) -> Option<&str> {
        self.staged.as_ref().map(|staged| staged.renderer.name())
    }

    pub fn completed_transitions(&self) -> u64 {
        self.transitions.load(Ordering::Relaxed)
    }

    /// Shader sources behind the active renderer and the one waiting behind it.
    pub fn shader_paths(&self) -> Vec<PathBuf> {
        let staged = self.staged.as_ref().map(|staged| &staged.renderer);
        let mut paths: Vec<PathBuf> = self
            .active
            .iter()
            .chain(staged)
            .flat_map(Renderer::shader_paths)
            .collect();
        paths.sort();
        paths.dedup();
        paths
    }

    /// Builds a simple or multipass renderer depending on the config shape.
    ///
    /// Failures come back as an invalid renderer, never as an error.
    pub fn prepare_new_renderer<G: GpuBackend>(
        &self,
        ctx: &mut RenderContext<G>,
        config: &VizConfig,
    ) -> Renderer {
        let renderer = if config.is_multipass() {
            Renderer::Multipass(MultipassRenderer::new(ctx, config))
        } else {
            Renderer::Simple(SimpleRenderer::new(ctx, config))
        };
        tracing::debug!(
            viz = %config.name,
            description = config.description(),
            kind = renderer.kind(),
            valid = renderer.is_valid(),
            "prepared renderer"
        );
        renderer
    }

    /// Builds `viz` wrapped in the `fx` post-processing graph.
    pub fn prepare_fx_renderer<G: GpuBackend>(
        &self,
        ctx: &mut RenderContext<G>,
        viz: &VizConfig,
        fx: &FxConfig,
    ) -> Renderer {
        let primary = self.prepare_new_renderer(ctx, viz);
        Renderer::Fx(FxRenderer::new(ctx, primary, fx))
    }

    /// Stages `renderer` using the session crossfade duration.
    pub fn queue_renderer<G: GpuBackend>(
        &mut self,
        ctx: &mut RenderContext<G>,
        renderer: Renderer,
    ) -> bool {
        let crossfade = ctx.settings.crossfade;
        self.queue_renderer_with(ctx, renderer, crossfade)
    }

    /// Stages `renderer`. Invalid renderers are disposed and rejected; a
    /// renderer already staged is replaced.
    pub fn queue_renderer_with<G: GpuBackend>(
        &mut self,
        ctx: &mut RenderContext<G>,
        mut renderer: Renderer,
        crossfade: Duration,
    ) -> bool {
        if !renderer.is_valid() {
            tracing::warn!(
                renderer = %renderer.name(),
                reason = renderer.invalid_reason().unwrap_or_default(),
                "rejected invalid renderer"
            );
            renderer.dispose(ctx);
            return false;
        }
        if let Some(mut replaced) = self.staged.take() {
            tracing::info!(
                replaced = %replaced.renderer.name(),
                with = %renderer.name(),
                "replacing staged renderer"
            );
            replaced.renderer.dispose(ctx);
        }
        tracing::info!(renderer = %renderer.name(), "renderer staged");
        self.staged = Some(Staged {
            renderer,
            crossfade,
        });
        true
    }

    fn crossfade_in_flight(&self) -> bool {
        matches!(&self.active, Some(Renderer::Crossfade(crossfade)) if !crossfade.is_completed())
    }

    fn install_staged<G: GpuBackend>(&mut self, ctx: &mut RenderContext<G>) {
        if self.crossfade_in_flight() {
            return;
        }
        let Some(Staged {
            renderer: mut next,
            crossfade,
        }) = self.staged.take()
        else {
            return;
        };
        let now = ctx.now();

        let Some(mut current) = self.active.take() else {
            next.start_clock(now);
            tracing::info!(renderer = %next.name(), "renderer installed");
            self.active = Some(next);
            return;
        };

        if crossfade.is_zero() {
            current.dispose(ctx);
            next.start_clock(now);
            tracing::info!(renderer = %next.name(), "renderer swapped");
            self.transitions.fetch_add(1, Ordering::Relaxed);
            self.active = Some(next);
            return;
        }

        let transitions = self.transitions.clone();
        let blend = CrossfadeRenderer::new(ctx, current, next, crossfade).on_complete(move || {
            transitions.fetch_add(1, Ordering::Relaxed);
        });
        let mut blend = Renderer::Crossfade(Box::new(blend));
        if blend.is_valid() {
            blend.start_clock(now);
            self.active = Some(blend);
            return;
        }

        // No blend possible: fall back to an immediate swap.
        let Renderer::Crossfade(blend) = blend else {
            return;
        };
        if let Some(mut next) = blend.into_new(ctx) {
            next.start_clock(now);
            self.transitions.fetch_add(1, Ordering::Relaxed);
            self.active = Some(next);
        }
    }

    /// Installs any staged renderer, then draws the active one to the display.
    pub fn render_frame<G: GpuBackend>(&mut self, ctx: &mut RenderContext<G>) {
        self.install_staged(ctx);
        let Some(active) = self.active.as_mut() else {
            return;
        };
        active.render_frame(ctx, RenderTarget::Display);

        let finished = matches!(active, Renderer::Crossfade(crossfade) if crossfade.is_completed());
        if finished {
            if let Some(Renderer::Crossfade(crossfade)) = self.active.take() {
                self.active = crossfade.into_new(ctx);
            }
        }
    }

    /// Resizes the surface, every offscreen buffer, then lets renderers adapt.
    pub fn viewport_resized<G: GpuBackend>(
        &mut self,
        ctx: &mut RenderContext<G>,
        width: u32,
        height: u32,
    ) {
        ctx.resize(Resolution::new(width, height));
        if let Some(active) = self.active.as_mut() {
            active.viewport_resized(ctx);
        }
        if let Some(staged) = self.staged.as_mut() {
            staged.renderer.viewport_resized(ctx);
        }
        tracing::debug!(width, height, "viewport resized");
    }

    pub fn info<G: GpuBackend>(&self, ctx: &RenderContext<G>) -> ManagerInfo {
        ManagerInfo {
            viewport: ctx.viewport(),
            active: self.active.as_ref().map(|active| active.info(ctx.now())),
            staged: self.staged_name().map(str::to_string),
            completed_transitions: self.completed_transitions(),
            cached_shaders: ctx.shaders.len(),
            free_texture_units: ctx.resources.free_texture_units(),
        }
    }

    /// Disposes every renderer and releases cached programs.
    pub fn shutdown<G: GpuBackend>(&mut self, ctx: &mut RenderContext<G>) {
        if let Some(mut staged) = self.staged.take() {
            staged.renderer.dispose(ctx);
        }
        if let Some(mut active) = self.active.take() {
            active.dispose(ctx);
        }
        ctx.release_shaders();
        tracing::info!("render manager shut down");
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::context::RenderSettings;
    use crate::gpu::HeadlessGpu;
    use crate::runtime::SteppedTimeSource;

    fn setup(dir: &std::path::Path, crossfade: Duration) -> RenderContext<HeadlessGpu> {
        for name in ["a.frag", "b.frag", "c.frag"] {
            fs::write(dir.join(name), "void main() {}").unwrap();
        }
        fs::write(dir.join("bad.frag"), "#error\n").unwrap();
        let library = vizconfig::Library::new(vec![dir.to_path_buf()], Vec::new());
        let settings = RenderSettings {
            crossfade,
            ..RenderSettings::default()
        };
        RenderContext::new(HeadlessGpu::new(Resolution::new(640, 480)), library, settings)
            .with_time_source(Box::new(SteppedTimeSource::new(0.5)))
    }

    fn viz(dir: &std::path::Path, name: &str, fragment: &str) -> VizConfig {
        let path = dir.join(format!("{name}.toml"));
        fs::write(&path, format!("[shader]\nfragment_shader = \"{fragment}\"\n")).unwrap();
        VizConfig::load(&path).unwrap()
    }

    fn frame(manager: &mut RenderManager, ctx: &mut RenderContext<HeadlessGpu>) {
        ctx.begin_frame().unwrap();
        manager.render_frame(ctx);
        ctx.end_frame().unwrap();
    }

    #[test]
    fn zero_duration_swaps_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = setup(dir.path(), Duration::ZERO);
        let mut manager = RenderManager::new();
        let first = manager.prepare_new_renderer(&mut ctx, &viz(dir.path(), "a", "a.frag"));
        assert!(manager.queue_renderer(&mut ctx, first));
        frame(&mut manager, &mut ctx);
        assert_eq!(manager.active().map(Renderer::name), Some("a"));

        let second = manager.prepare_new_renderer(&mut ctx, &viz(dir.path(), "b", "b.frag"));
        manager.queue_renderer(&mut ctx, second);
        frame(&mut manager, &mut ctx);
        assert_eq!(manager.active().map(Renderer::name), Some("b"));
        assert_eq!(manager.completed_transitions(), 1);
        manager.shutdown(&mut ctx);
        assert_eq!(ctx.gpu.live_programs(), 0);
    }

    #[test]
    fn invalid_renderer_is_rejected_and_active_kept() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = setup(dir.path(), Duration::ZERO);
        let mut manager = RenderManager::new();
        let first = manager.prepare_new_renderer(&mut ctx, &viz(dir.path(), "a", "a.frag"));
        manager.queue_renderer(&mut ctx, first);
        frame(&mut manager, &mut ctx);

        let broken = manager.prepare_new_renderer(&mut ctx, &viz(dir.path(), "bad", "bad.frag"));
        assert!(!broken.is_valid());
        assert!(!manager.queue_renderer(&mut ctx, broken));
        frame(&mut manager, &mut ctx);
        assert_eq!(manager.active().map(Renderer::name), Some("a"));
        manager.shutdown(&mut ctx);
    }

    #[test]
    fn crossfade_runs_to_completion_before_next_staged_renderer() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = setup(dir.path(), Duration::from_secs(1));
        let mut manager = RenderManager::new();
        let a = manager.prepare_new_renderer(&mut ctx, &viz(dir.path(), "a", "a.frag"));
        manager.queue_renderer(&mut ctx, a);
        frame(&mut manager, &mut ctx);

        let b = manager.prepare_new_renderer(&mut ctx, &viz(dir.path(), "b", "b.frag"));
        manager.queue_renderer(&mut ctx, b);
        frame(&mut manager, &mut ctx);
        assert_eq!(manager.active().map(Renderer::kind), Some("crossfade"));

        let c = manager.prepare_new_renderer(&mut ctx, &viz(dir.path(), "c", "c.frag"));
        manager.queue_renderer(&mut ctx, c);
        frame(&mut manager, &mut ctx);
        assert_eq!(manager.active().map(Renderer::kind), Some("crossfade"));
        assert_eq!(manager.staged_name(), Some("c"));

        // Crossfade started at 0.5 s and completes at 1.5 s.
        frame(&mut manager, &mut ctx);
        assert_eq!(manager.active().map(Renderer::name), Some("b"));
        assert_eq!(manager.completed_transitions(), 1);

        frame(&mut manager, &mut ctx);
        assert_eq!(manager.active().map(Renderer::name), Some("b -> c"));
        manager.shutdown(&mut ctx);
        assert_eq!(ctx.resources.owner_count(), 0);
    }

    #[test]
    fn second_staged_renderer_replaces_first() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = setup(dir.path(), Duration::ZERO);
        let mut manager = RenderManager::new();
        let a = manager.prepare_new_renderer(&mut ctx, &viz(dir.path(), "a", "a.frag"));
        let b = manager.prepare_new_renderer(&mut ctx, &viz(dir.path(), "b", "b.frag"));
        manager.queue_renderer(&mut ctx, a);
        manager.queue_renderer(&mut ctx, b);
        assert_eq!(manager.staged_name(), Some("b"));
        frame(&mut manager, &mut ctx);
        assert_eq!(manager.active().map(Renderer::name), Some("b"));

        let info = manager.info(&ctx);
        assert_eq!(info.active.as_ref().map(|active| active.kind), Some("simple"));
        assert!(info.to_string().contains("simple 'b'"));
        manager.shutdown(&mut ctx);
    }

    fn assert_released(ctx: &RenderContext<HeadlessGpu>) {
        assert_eq!(ctx.resources.owner_count(), 0);
        assert_eq!(ctx.gpu.live_render_targets(), 0);
        assert_eq!(ctx.gpu.live_programs(), 0);
    }

    #[test]
    fn broken_blend_shader_falls_back_to_immediate_swap() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = setup(dir.path(), Duration::from_secs(1));
        ctx.settings.crossfade_shader = Some(dir.path().join("bad.frag"));
        let mut manager = RenderManager::new();
        let a = manager.prepare_new_renderer(&mut ctx, &viz(dir.path(), "a", "a.frag"));
        manager.queue_renderer(&mut ctx, a);
        frame(&mut manager, &mut ctx);

        let b = manager.prepare_new_renderer(&mut ctx, &viz(dir.path(), "b", "b.frag"));
        assert!(manager.queue_renderer(&mut ctx, b));
        ctx.gpu.take_commands();
        frame(&mut manager, &mut ctx);
        assert_eq!(manager.active().map(Renderer::name), Some("b"));
        assert_eq!(manager.active().map(Renderer::kind), Some("simple"));
        assert_eq!(manager.completed_transitions(), 1);
        // The swapped-in renderer presents on its own again.
        assert_eq!(
            ctx.gpu.draws().last().map(|draw| draw.target),
            Some(RenderTarget::Display)
        );

        manager.shutdown(&mut ctx);
        assert_released(&ctx);
    }

    #[test]
    fn fx_renderer_is_staged_through_crossfade() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = setup(dir.path(), Duration::from_secs(1));
        fs::write(dir.path().join("glow.frag"), "void main() {}").unwrap();
        let fx_path = dir.path().join("glow.toml");
        fs::write(&fx_path, "[fx]\npasses = [\"1 0 * glow.frag\"]\n").unwrap();
        let fx = FxConfig::load(&fx_path).unwrap();
        let mut manager = RenderManager::new();
        let a = manager.prepare_new_renderer(&mut ctx, &viz(dir.path(), "a", "a.frag"));
        manager.queue_renderer(&mut ctx, a);
        frame(&mut manager, &mut ctx);

        let wrapped = manager.prepare_fx_renderer(&mut ctx, &viz(dir.path(), "b", "b.frag"), &fx);
        assert!(wrapped.is_valid(), "{:?}", wrapped.invalid_reason());
        assert!(manager.queue_renderer(&mut ctx, wrapped));
        frame(&mut manager, &mut ctx);
        assert_eq!(manager.active().map(Renderer::name), Some("a -> b+glow"));
        assert_eq!(manager.active().map(Renderer::kind), Some("crossfade"));

        frame(&mut manager, &mut ctx);
        frame(&mut manager, &mut ctx);
        assert_eq!(manager.active().map(Renderer::name), Some("b+glow"));
        assert_eq!(manager.active().map(Renderer::kind), Some("fx"));
        assert_eq!(manager.completed_transitions(), 1);

        ctx.gpu.take_commands();
        frame(&mut manager, &mut ctx);
        assert!(ctx.gpu.commands().iter().any(|command| matches!(
            command,
            crate::gpu::RecordedCommand::Blit {
                target: RenderTarget::Display,
                ..
            }
        )));

        manager.shutdown(&mut ctx);
        assert_released(&ctx);
    }
}
