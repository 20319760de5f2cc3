use std::sync::Arc;

use anyhow::{anyhow, Result};
use crossbeam_channel::Receiver;
use vizconfig::Library;
use winit::dpi::PhysicalSize;
use winit::event::{Event, WindowEvent};
use winit::event_loop::{ControlFlow, EventLoop};
use winit::window::WindowBuilder;

use crate::commands::Command;
use crate::context::{RenderContext, RenderSettings};
use crate::gpu::{GpuError, WgpuGpu};
use crate::session::{FrameStatus, Session};
use crate::types::Resolution;

/// Everything needed to open the visualization window.
#[derive(Debug, Clone)]
pub struct WindowOptions {
    pub title: String,
    pub size: Resolution,
    pub library: Library,
    pub settings: RenderSettings,
    pub visualization: String,
    pub fx: Option<String>,
}

/// Runs the winit event loop on the calling thread until the window closes
/// or a `quit` command arrives.
pub fn run_window(options: WindowOptions, commands: Receiver<Command>) -> Result<()> {
    let event_loop =
        EventLoop::new().map_err(|err| anyhow!("failed to create event loop: {err}"))?;
    let window = WindowBuilder::new()
        .with_title(options.title.as_str())
        .with_inner_size(PhysicalSize::new(options.size.width, options.size.height))
        .build(&event_loop)
        .map_err(|err| anyhow!("failed to create window: {err}"))?;
    let window = Arc::new(window);

    let gpu = WgpuGpu::new(window.clone())
        .map_err(|err| anyhow!("failed to initialise window renderer: {err}"))?;
    let ctx = RenderContext::new(gpu, options.library, options.settings);
    let mut session = Some(Session::new(ctx, commands));
    if let Some(session) = session.as_mut() {
        session.load(&options.visualization, options.fx.as_deref());
    }
    window.request_redraw();

    let mut result = Ok(());
    let run_result = event_loop.run(|event, elwt| match event {
        Event::WindowEvent { window_id, event } if window_id == window.id() => {
            let Some(active) = session.as_mut() else {
                return;
            };
            match event {
                WindowEvent::CloseRequested | WindowEvent::Destroyed => elwt.exit(),
                WindowEvent::Resized(size) => active.resize(size.width, size.height),
                WindowEvent::RedrawRequested => match active.frame() {
                    Ok(FrameStatus::Quit) => elwt.exit(),
                    Ok(FrameStatus::Presented | FrameStatus::Skipped) => {}
                    Err(GpuError::OutOfMemory) => {
                        tracing::error!("GPU out of memory; closing window");
                        result = Err(anyhow!("GPU out of memory"));
                        elwt.exit();
                    }
                    Err(err) => tracing::warn!(error = %err, "frame failed"),
                },
                _ => {}
            }
        }
        Event::AboutToWait => {
            window.request_redraw();
            elwt.set_control_flow(ControlFlow::Wait);
        }
        Event::LoopExiting => {
            if let Some(active) = session.take() {
                active.shutdown();
            }
        }
        _ => {}
    });

    if let Err(err) = run_result {
        result = Err(anyhow!("window event loop error: {err}"));
    }
    result
}
