//! One render thread's worth of state: context, orchestrator and commands.

use crossbeam_channel::Receiver;

use crate::commands::{Command, CommandProcessor, ControlFlow};
use crate::context::RenderContext;
use crate::gpu::{GpuBackend, GpuError};
use crate::orchestrator::{ManagerInfo, RenderManager};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameStatus {
    Presented,
    /// The surface was unavailable; try again next frame.
    Skipped,
    Quit,
}

pub struct Session<G: GpuBackend> {
    ctx: RenderContext<G>,
    manager: RenderManager,
    commands: CommandProcessor,
}

impl<G: GpuBackend> Session<G> {
    pub fn new(ctx: RenderContext<G>, commands: Receiver<Command>) -> Self {
        Self {
            ctx,
            manager: RenderManager::new(),
            commands: CommandProcessor::new(commands),
        }
    }

    pub fn context(&self) -> &RenderContext<G> {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut RenderContext<G> {
        &mut self.ctx
    }

    pub fn manager(&self) -> &RenderManager {
        &self.manager
    }

    /// Stages the startup visualization (and FX) before the first frame.
    pub fn load(&mut self, visualization: &str, fx: Option<&str>) {
        self.commands.apply(
            &mut self.ctx,
            &mut self.manager,
            Command::Load(visualization.to_string()),
        );
        if let Some(fx) = fx {
            self.commands
                .apply(&mut self.ctx, &mut self.manager, Command::ApplyFx(fx.to_string()));
        }
    }

    /// Applies pending commands, then renders and presents one frame.
    pub fn frame(&mut self) -> Result<FrameStatus, GpuError> {
        if self.commands.apply_pending(&mut self.ctx, &mut self.manager) == ControlFlow::Quit {
            return Ok(FrameStatus::Quit);
        }
        match self.ctx.begin_frame() {
            Ok(()) => {}
            Err(err @ (GpuError::SurfaceLost | GpuError::SurfaceTimeout)) => {
                tracing::debug!(error = %err, "frame skipped");
                return Ok(FrameStatus::Skipped);
            }
            Err(err) => return Err(err),
        }
        self.manager.render_frame(&mut self.ctx);
        self.ctx.end_frame()?;
        Ok(FrameStatus::Presented)
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.manager.viewport_resized(&mut self.ctx, width, height);
    }

    pub fn info(&self) -> ManagerInfo {
        self.manager.info(&self.ctx)
    }

    /// Disposes every renderer; returns the context for inspection.
    pub fn shutdown(mut self) -> RenderContext<G> {
        self.manager.shutdown(&mut self.ctx);
        self.ctx
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::time::Duration;

    use vizconfig::Library;

    use super::*;
    use crate::commands::command_channel;
    use crate::context::RenderSettings;
    use crate::gpu::HeadlessGpu;
    use crate::runtime::SteppedTimeSource;
    use crate::types::Resolution;

    fn session(dir: &std::path::Path) -> (Session<HeadlessGpu>, crate::commands::CommandSender) {
        fs::write(dir.join("a.frag"), "void main() {}").unwrap();
        fs::write(dir.join("b.frag"), "void main() {}").unwrap();
        fs::write(dir.join("a.toml"), "[shader]\nfragment_shader = \"a.frag\"\n").unwrap();
        fs::write(dir.join("b.toml"), "[shader]\nfragment_shader = \"b.frag\"\n").unwrap();
        let library = Library::new(vec![dir.to_path_buf()], Vec::new());
        let settings = RenderSettings {
            crossfade: Duration::from_secs(1),
            ..RenderSettings::default()
        };
        let ctx = RenderContext::new(HeadlessGpu::new(Resolution::new(320, 200)), library, settings)
            .with_time_source(Box::new(SteppedTimeSource::new(0.25)));
        let (sender, receiver) = command_channel();
        (Session::new(ctx, receiver), sender)
    }

    #[test]
    fn crossfades_between_loaded_visualizations() {
        let dir = tempfile::tempdir().unwrap();
        let (mut session, sender) = session(dir.path());
        session.load("a", None);
        assert_eq!(session.frame().unwrap(), FrameStatus::Presented);

        sender.send(Command::Load("b".into())).unwrap();
        session.frame().unwrap();
        assert!(session.info().active.unwrap().name.contains("->"));

        for _ in 0..4 {
            session.frame().unwrap();
        }
        assert_eq!(session.info().active.unwrap().name, "b");
        assert_eq!(session.info().completed_transitions, 1);

        sender.send(Command::Quit).unwrap();
        assert_eq!(session.frame().unwrap(), FrameStatus::Quit);
        let ctx = session.shutdown();
        assert_eq!(ctx.gpu.live_programs(), 0);
        assert_eq!(ctx.gpu.live_render_targets(), 0);
    }

    #[test]
    fn resize_reaches_gpu_and_resources() {
        let dir = tempfile::tempdir().unwrap();
        let (mut session, _sender) = session(dir.path());
        session.load("a", None);
        session.frame().unwrap();
        session.resize(640, 480);
        assert_eq!(session.context().viewport(), Resolution::new(640, 480));
        assert_eq!(session.info().viewport, Resolution::new(640, 480));
    }
}
