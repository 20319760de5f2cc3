//! Control commands posted from other threads and applied between frames.

use std::fmt;
use std::str::FromStr;

use crossbeam_channel::{Receiver, Sender, TryRecvError};

use crate::context::RenderContext;
use crate::gpu::GpuBackend;
use crate::orchestrator::RenderManager;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Crossfade to the named visualization.
    Load(String),
    /// Wrap the current visualization in the named FX chain.
    ApplyFx(String),
    /// Drop cached shaders of the current visualization and build it again.
    Reload,
    /// Disable shader caching while iterating on shader sources.
    TestMode(bool),
    Info,
    Quit,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CommandParseError {
    #[error("empty command")]
    Empty,
    #[error("unknown command '{0}'")]
    Unknown(String),
    #[error("'{0}' needs an argument")]
    MissingArgument(&'static str),
    #[error("'{command}' does not understand '{argument}'")]
    InvalidArgument {
        command: &'static str,
        argument: String,
    },
}

impl FromStr for Command {
    type Err = CommandParseError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (verb, rest) = match line.split_once(char::is_whitespace) {
            Some((verb, rest)) => (verb, rest.trim()),
            None => (line, ""),
        };
        let argument = |command: &'static str| {
            if rest.is_empty() {
                Err(CommandParseError::MissingArgument(command))
            } else {
                Ok(rest.to_string())
            }
        };
        match verb.to_ascii_lowercase().as_str() {
            "" => Err(CommandParseError::Empty),
            "load" | "viz" => argument("load").map(Command::Load),
            "fx" => argument("fx").map(Command::ApplyFx),
            "reload" => Ok(Command::Reload),
            "testmode" | "test" => match rest.to_ascii_lowercase().as_str() {
                "" | "on" | "true" | "1" => Ok(Command::TestMode(true)),
                "off" | "false" | "0" => Ok(Command::TestMode(false)),
                _ => Err(CommandParseError::InvalidArgument {
                    command: "testmode",
                    argument: rest.to_string(),
                }),
            },
            "info" | "status" => Ok(Command::Info),
            "quit" | "exit" => Ok(Command::Quit),
            other => Err(CommandParseError::Unknown(other.to_string())),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Load(name) => write!(f, "load {name}"),
            Command::ApplyFx(name) => write!(f, "fx {name}"),
            Command::Reload => f.write_str("reload"),
            Command::TestMode(true) => f.write_str("testmode on"),
            Command::TestMode(false) => f.write_str("testmode off"),
            Command::Info => f.write_str("info"),
            Command::Quit => f.write_str("quit"),
        }
    }
}

pub type CommandSender = Sender<Command>;

/// Unbounded channel between command producers and the render thread.
pub fn command_channel() -> (CommandSender, Receiver<Command>) {
    crossbeam_channel::unbounded()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlFlow {
    Continue,
    Quit,
}

/// Drains the command channel on the render thread.
///
/// Tracks which visualization and FX chain are current so `fx` and
/// `reload` can rebuild from names.
pub struct CommandProcessor {
    receiver: Receiver<Command>,
    current_viz: Option<String>,
    current_fx: Option<String>,
}

impl CommandProcessor {
    pub fn new(receiver: Receiver<Command>) -> Self {
        Self {
            receiver,
            current_viz: None,
            current_fx: None,
        }
    }

    pub fn current_visualization(&self) -> Option<&str> {
        self.current_viz.as_deref()
    }

    pub fn current_fx(&self) -> Option<&str> {
        self.current_fx.as_deref()
    }

    /// Applies every queued command, stopping early on `Quit`.
    pub fn apply_pending<G: GpuBackend>(
        &mut self,
        ctx: &mut RenderContext<G>,
        manager: &mut RenderManager,
    ) -> ControlFlow {
        loop {
            match self.receiver.try_recv() {
                Ok(command) => {
                    if self.apply(ctx, manager, command) == ControlFlow::Quit {
                        return ControlFlow::Quit;
                    }
                }
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => {
                    return ControlFlow::Continue
                }
            }
        }
    }

    /// Applies one command immediately.
    pub fn apply<G: GpuBackend>(
        &mut self,
        ctx: &mut RenderContext<G>,
        manager: &mut RenderManager,
        command: Command,
    ) -> ControlFlow {
        tracing::debug!(%command, "applying command");
        match command {
            Command::Load(name) => {
                if self.stage(ctx, manager, &name, None) {
                    self.current_viz = Some(name);
                    self.current_fx = None;
                }
            }
            Command::ApplyFx(fx) => {
                let Some(viz) = self.current_viz.clone() else {
                    tracing::warn!(%fx, "no visualization loaded to apply fx to");
                    return ControlFlow::Continue;
                };
                if self.stage(ctx, manager, &viz, Some(&fx)) {
                    self.current_fx = Some(fx);
                }
            }
            Command::Reload => {
                let Some(viz) = self.current_viz.clone() else {
                    tracing::warn!("nothing to reload");
                    return ControlFlow::Continue;
                };
                ctx.shaders.invalidate_paths(&manager.shader_paths());
                let fx = self.current_fx.clone();
                self.stage(ctx, manager, &viz, fx.as_deref());
            }
            Command::TestMode(enabled) => {
                ctx.shaders.set_caching_disabled(enabled);
                tracing::info!(enabled, "shader test mode");
            }
            Command::Info => {
                tracing::info!("\n{}", manager.info(ctx));
            }
            Command::Quit => {
                tracing::info!("quit requested");
                return ControlFlow::Quit;
            }
        }
        ControlFlow::Continue
    }

    fn stage<G: GpuBackend>(
        &self,
        ctx: &mut RenderContext<G>,
        manager: &mut RenderManager,
        viz_name: &str,
        fx_name: Option<&str>,
    ) -> bool {
        let viz = match ctx.library.load_visualizer(viz_name) {
            Ok(viz) => viz,
            Err(err) => {
                tracing::warn!(viz = %viz_name, error = %err, "failed to load visualization");
                return false;
            }
        };
        let Some(fx_name) = fx_name else {
            let renderer = manager.prepare_new_renderer(ctx, &viz);
            return manager.queue_renderer(ctx, renderer);
        };
        let fx = match ctx.library.load_fx(fx_name) {
            Ok(fx) => fx,
            Err(err) => {
                tracing::warn!(fx = %fx_name, error = %err, "failed to load fx");
                return false;
            }
        };
        let crossfade = fx.fx.crossfade.unwrap_or(ctx.settings.crossfade);
        let renderer = manager.prepare_fx_renderer(ctx, &viz, &fx);
        manager.queue_renderer_with(ctx, renderer, crossfade)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;
    use std::time::Duration;

    use vizconfig::Library;

    use super::*;
    use crate::context::RenderSettings;
    use crate::gpu::HeadlessGpu;
    use crate::renderers::Renderer;
    use crate::runtime::SteppedTimeSource;
    use crate::types::Resolution;

    fn setup(dir: &Path) -> RenderContext<HeadlessGpu> {
        fs::write(dir.join("wave.frag"), "void main() {}").unwrap();
        fs::write(dir.join("glow.frag"), "void main() {}").unwrap();
        fs::write(
            dir.join("wave.toml"),
            "[shader]\nfragment_shader = \"wave.frag\"\n",
        )
        .unwrap();
        fs::write(
            dir.join("glow.toml"),
            "[fx]\npasses = [\"1 0 * glow.frag\"]\n",
        )
        .unwrap();
        let library = Library::new(vec![dir.to_path_buf()], vec![dir.to_path_buf()]);
        let settings = RenderSettings {
            crossfade: Duration::ZERO,
            ..RenderSettings::default()
        };
        RenderContext::new(HeadlessGpu::new(Resolution::new(320, 240)), library, settings)
            .with_time_source(Box::new(SteppedTimeSource::new(0.5)))
    }

    fn frame(
        processor: &mut CommandProcessor,
        manager: &mut RenderManager,
        ctx: &mut RenderContext<HeadlessGpu>,
    ) -> ControlFlow {
        let flow = processor.apply_pending(ctx, manager);
        ctx.begin_frame().unwrap();
        manager.render_frame(ctx);
        ctx.end_frame().unwrap();
        flow
    }

    #[test]
    fn parses_command_lines() {
        assert_eq!("load plasma".parse(), Ok(Command::Load("plasma".into())));
        assert_eq!("  FX glow ".parse(), Ok(Command::ApplyFx("glow".into())));
        assert_eq!("testmode off".parse(), Ok(Command::TestMode(false)));
        assert_eq!("testmode".parse(), Ok(Command::TestMode(true)));
        assert_eq!("exit".parse(), Ok(Command::Quit));
        assert_eq!(
            "load".parse::<Command>(),
            Err(CommandParseError::MissingArgument("load"))
        );
        assert_eq!(
            "dance".parse::<Command>(),
            Err(CommandParseError::Unknown("dance".into()))
        );
        assert_eq!("".parse::<Command>(), Err(CommandParseError::Empty));
    }

    #[test]
    fn load_then_fx_then_quit() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = setup(dir.path());
        let mut manager = RenderManager::new();
        let (sender, receiver) = command_channel();
        let mut processor = CommandProcessor::new(receiver);

        sender.send(Command::Load("wave".into())).unwrap();
        assert_eq!(frame(&mut processor, &mut manager, &mut ctx), ControlFlow::Continue);
        assert_eq!(manager.active().map(Renderer::name), Some("wave"));

        sender.send(Command::ApplyFx("glow".into())).unwrap();
        frame(&mut processor, &mut manager, &mut ctx);
        assert_eq!(manager.active().map(Renderer::name), Some("wave+glow"));
        assert_eq!(processor.current_fx(), Some("glow"));

        sender.send(Command::Quit).unwrap();
        assert_eq!(frame(&mut processor, &mut manager, &mut ctx), ControlFlow::Quit);
        manager.shutdown(&mut ctx);
    }

    #[test]
    fn unknown_visualization_keeps_current() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = setup(dir.path());
        let mut manager = RenderManager::new();
        let (sender, receiver) = command_channel();
        let mut processor = CommandProcessor::new(receiver);
        sender.send(Command::Load("wave".into())).unwrap();
        sender.send(Command::Load("missing".into())).unwrap();
        frame(&mut processor, &mut manager, &mut ctx);
        assert_eq!(processor.current_visualization(), Some("wave"));
        assert_eq!(manager.active().map(Renderer::name), Some("wave"));
        manager.shutdown(&mut ctx);
    }

    #[test]
    fn reload_recompiles_changed_shader() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = setup(dir.path());
        let mut manager = RenderManager::new();
        let (sender, receiver) = command_channel();
        let mut processor = CommandProcessor::new(receiver);
        sender.send(Command::Load("wave".into())).unwrap();
        frame(&mut processor, &mut manager, &mut ctx);
        let compiled = ctx.gpu.compiled_total();

        sender.send(Command::Reload).unwrap();
        frame(&mut processor, &mut manager, &mut ctx);
        assert_eq!(ctx.gpu.compiled_total(), compiled + 1);
        assert_eq!(manager.active().map(Renderer::name), Some("wave"));
        manager.shutdown(&mut ctx);
    }

    #[test]
    fn test_mode_toggles_shader_caching() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = setup(dir.path());
        let mut manager = RenderManager::new();
        let (sender, receiver) = command_channel();
        let mut processor = CommandProcessor::new(receiver);
        sender.send(Command::TestMode(true)).unwrap();
        processor.apply_pending(&mut ctx, &mut manager);
        assert!(ctx.shaders.caching_disabled());
        sender.send(Command::TestMode(false)).unwrap();
        processor.apply_pending(&mut ctx, &mut manager);
        assert!(!ctx.shaders.caching_disabled());
    }

    #[test]
    fn reload_during_crossfade_recompiles_staged_shader() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = setup(dir.path());
        ctx.settings.crossfade = Duration::from_secs(1);
        for name in ["ripple", "pulse"] {
            fs::write(dir.path().join(format!("{name}.frag")), "void main() {}").unwrap();
            fs::write(
                dir.path().join(format!("{name}.toml")),
                format!("[shader]\nfragment_shader = \"{name}.frag\"\n"),
            )
            .unwrap();
        }
        let mut manager = RenderManager::new();
        let (sender, receiver) = command_channel();
        let mut processor = CommandProcessor::new(receiver);
        sender.send(Command::Load("wave".into())).unwrap();
        frame(&mut processor, &mut manager, &mut ctx);
        sender.send(Command::Load("ripple".into())).unwrap();
        frame(&mut processor, &mut manager, &mut ctx);
        sender.send(Command::Load("pulse".into())).unwrap();
        frame(&mut processor, &mut manager, &mut ctx);
        assert_eq!(manager.active().map(Renderer::name), Some("wave -> ripple"));
        assert_eq!(manager.staged_name(), Some("pulse"));
        assert!(manager
            .shader_paths()
            .contains(&dir.path().join("pulse.frag")));

        let compiled = ctx.gpu.compiled_total();
        sender.send(Command::Reload).unwrap();
        processor.apply_pending(&mut ctx, &mut manager);
        assert_eq!(ctx.gpu.compiled_total(), compiled + 1);
        assert_eq!(manager.staged_name(), Some("pulse"));
        manager.shutdown(&mut ctx);
        assert_eq!(ctx.gpu.live_programs(), 0);
    }
}
