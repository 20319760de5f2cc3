use std::io::{self, BufRead};
use std::thread;

use anyhow::{bail, Context, Result};
use crossbeam_channel::Receiver;
use renderer::{
    command_channel, Command, CommandSender, FrameStatus, HeadlessGpu, RenderContext,
    RenderSettings, Resolution, Session, SteppedTimeSource, WindowOptions,
};
use tracing_subscriber::EnvFilter;
use vizconfig::{AppConfig, Library};

use crate::cli::Cli;
use crate::paths::AppPaths;

const DEFAULT_WINDOW_SIZE: Resolution = Resolution::new(1280, 720);
const HEADLESS_FPS: f32 = 60.0;

pub fn initialise_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

/// Settings resolved from the config file with CLI overrides applied.
struct Launch {
    library: Library,
    settings: RenderSettings,
    visualization: String,
    fx: Option<String>,
    size: Resolution,
}

pub fn run(cli: Cli) -> Result<()> {
    let launch = resolve_launch(&cli)?;
    match cli.headless {
        Some(frames) => run_headless(launch, frames),
        None => {
            let (sender, receiver) = command_channel();
            spawn_stdin_reader(sender)?;
            run_windowed(launch, receiver)
        }
    }
}

fn resolve_launch(cli: &Cli) -> Result<Launch> {
    let paths = AppPaths::discover()?;
    let mut config = match &cli.config {
        Some(path) => AppConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => {
            let path = paths.config_file();
            if path.is_file() {
                AppConfig::load(&path)
                    .with_context(|| format!("failed to load config {}", path.display()))?
            } else {
                tracing::debug!(path = %path.display(), "no config file; using defaults");
                AppConfig::default()
            }
        }
    };
    if config.visualizer_paths.is_empty() {
        config.visualizer_paths.push(paths.visualizer_dir());
    }
    if config.fx_paths.is_empty() {
        config.fx_paths.push(paths.fx_dir());
    }
    if let Some(crossfade) = cli.crossfade {
        config.crossfade_duration = crossfade;
    }
    tracing::debug!(
        config_dir = %paths.config_dir().display(),
        visualizers = ?config.visualizer_paths,
        fx = ?config.fx_paths,
        crossfade = ?config.crossfade_duration,
        "resolved vizhat configuration"
    );

    let visualization = match cli
        .visualization
        .clone()
        .or_else(|| config.startup_visualizer.clone())
    {
        Some(name) => name,
        None => bail!("no visualization given and no startup_visualizer configured"),
    };
    let size = cli
        .size
        .or_else(|| config.window_size.map(|[w, h]| Resolution::new(w, h)))
        .unwrap_or(DEFAULT_WINDOW_SIZE);

    Ok(Launch {
        library: Library::from_app(&config),
        settings: RenderSettings::from_app(&config),
        visualization,
        fx: cli.fx.clone(),
        size,
    })
}

/// Forwards stdin lines to the render thread until EOF.
fn spawn_stdin_reader(sender: CommandSender) -> Result<()> {
    thread::Builder::new()
        .name("vizhat-stdin".into())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                let Ok(line) = line else {
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                match line.parse::<Command>() {
                    Ok(command) => {
                        if sender.send(command).is_err() {
                            break;
                        }
                    }
                    Err(err) => tracing::warn!(input = %line.trim(), error = %err, "ignoring command"),
                }
            }
            tracing::debug!("stdin closed; command reader exiting");
        })
        .context("failed to spawn stdin reader")?;
    Ok(())
}

fn run_windowed(launch: Launch, commands: Receiver<Command>) -> Result<()> {
    tracing::info!(
        viz = %launch.visualization,
        fx = ?launch.fx,
        size = %launch.size,
        "starting vizhat window"
    );
    renderer::run_window(
        WindowOptions {
            title: format!("vizhat - {}", launch.visualization),
            size: launch.size,
            library: launch.library,
            settings: launch.settings,
            visualization: launch.visualization,
            fx: launch.fx,
        },
        commands,
    )
}

/// Renders a fixed number of frames on the recording backend and prints
/// the final renderer tree to stdout.
fn run_headless(launch: Launch, frames: u64) -> Result<()> {
    tracing::info!(viz = %launch.visualization, frames, size = %launch.size, "headless run");
    let gpu = HeadlessGpu::new(launch.size).without_recording();
    let ctx = RenderContext::new(gpu, launch.library, launch.settings)
        .with_time_source(Box::new(SteppedTimeSource::at_fps(HEADLESS_FPS)));
    let (_sender, receiver) = command_channel();
    let mut session = Session::new(ctx, receiver);
    session.load(&launch.visualization, launch.fx.as_deref());

    for _ in 0..frames {
        match session.frame().context("headless frame failed")? {
            FrameStatus::Presented | FrameStatus::Skipped => {}
            FrameStatus::Quit => break,
        }
    }

    let info = session.info();
    println!("{info}");
    let loaded = info
        .active
        .as_ref()
        .is_some_and(|active| active.invalid_reason.is_none());
    let ctx = session.shutdown();
    tracing::debug!(
        frames = ctx.gpu.frames_completed(),
        programs = ctx.gpu.live_programs(),
        targets = ctx.gpu.live_render_targets(),
        "headless run finished"
    );
    if !loaded {
        bail!("visualization '{}' failed to load", launch.visualization);
    }
    Ok(())
}
