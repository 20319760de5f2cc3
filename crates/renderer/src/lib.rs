//! Renderer crate for vizhat.
//!
//! Visualizations are described by `vizconfig` files and rendered through a
//! small set of renderers sharing one explicitly passed [`RenderContext`]:
//!
//! ```text
//!   stdin / CLI
//!        │ Command
//!        ▼
//!   Session::frame ──▶ CommandProcessor ──▶ RenderManager ──▶ Renderer::render
//!                                              │                    │
//!                                              └─ crossfade ◀───────┘
//!                                                                   ▼
//!                                                      GpuBackend (wgpu | headless)
//! ```
//!
//! `window` drives a winit event loop over [`WgpuGpu`]; the same session can
//! run on [`HeadlessGpu`] for tests and offline runs.

mod cache;
pub mod commands;
pub(crate) mod compile;
pub mod context;
pub mod gpu;
pub mod graph;
pub mod orchestrator;
pub mod renderers;
pub mod resources;
pub mod runtime;
pub mod session;
pub mod shaders;
pub mod types;
pub mod vertex;
mod window;

pub use commands::{
    command_channel, Command, CommandParseError, CommandProcessor, CommandSender, ControlFlow,
};
pub use context::{RenderContext, RenderSettings};
pub use gpu::{GpuBackend, GpuError, HeadlessGpu, WgpuGpu};
pub use orchestrator::{ManagerInfo, RenderManager};
pub use renderers::{Renderer, RendererInfo};
pub use runtime::{SteppedTimeSource, SystemTimeSource, TimeSource};
pub use session::{FrameStatus, Session};
pub use types::Resolution;
pub use window::{run_window, WindowOptions};
