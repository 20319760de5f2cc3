//! Explicitly owned render state handed to every renderer call.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use vizconfig::Library;

use crate::gpu::{FrameUniforms, GpuBackend, GpuError};
use crate::resources::ResourceManager;
use crate::runtime::{BoxedTimeSource, SystemTimeSource, TimeSample};
use crate::shaders::ShaderCache;
use crate::types::{Resolution, SizePolicy};
use crate::vertex::VertexSourceRegistry;

/// Session-wide rendering knobs.
#[derive(Debug, Clone)]
pub struct RenderSettings {
    /// Global cap on the larger offscreen dimension, overridden per visualization.
    pub resolution_limit: Option<u32>,
    /// Blend time between visualizations; zero swaps immediately.
    pub crossfade: Duration,
    /// Replacement blend fragment shader.
    pub crossfade_shader: Option<PathBuf>,
    pub shader_cache_size: usize,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            resolution_limit: None,
            crossfade: Duration::from_secs(2),
            crossfade_shader: None,
            shader_cache_size: 150,
        }
    }
}

impl RenderSettings {
    pub fn from_app(config: &vizconfig::AppConfig) -> Self {
        Self {
            resolution_limit: config.render_resolution_limit,
            crossfade: config.crossfade_duration,
            crossfade_shader: config.crossfade_shader.clone(),
            shader_cache_size: config.shader_cache_size,
        }
    }
}

/// Everything a renderer needs from its surroundings.
///
/// Owned by the render thread. The shader cache is shared (`Arc`) so the
/// command side can invalidate entries between frames.
pub struct RenderContext<G: GpuBackend> {
    pub gpu: G,
    pub resources: ResourceManager,
    pub shaders: Arc<ShaderCache>,
    pub vertex_sources: VertexSourceRegistry,
    pub library: Library,
    pub settings: RenderSettings,
    time_source: BoxedTimeSource,
    sample: TimeSample,
    rng: StdRng,
}

impl<G: GpuBackend> RenderContext<G> {
    pub fn new(gpu: G, library: Library, settings: RenderSettings) -> Self {
        let resources = ResourceManager::new(gpu.max_texture_units(), gpu.viewport());
        let shaders = Arc::new(ShaderCache::new(settings.shader_cache_size));
        Self {
            gpu,
            resources,
            shaders,
            vertex_sources: VertexSourceRegistry::with_defaults(),
            library,
            settings,
            time_source: Box::new(SystemTimeSource::new()),
            sample: TimeSample::new(0.0, 0),
            rng: StdRng::from_entropy(),
        }
    }

    /// Replaces the frame clock; the new source restarts from zero.
    pub fn with_time_source(mut self, mut source: BoxedTimeSource) -> Self {
        source.reset();
        self.time_source = source;
        self
    }

    /// Makes random uniforms and SnapClock rolls reproducible.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Samples the frame clock, deletes retired programs and opens the frame.
    pub fn begin_frame(&mut self) -> Result<(), GpuError> {
        self.sample = self.time_source.sample();
        self.shaders.collect_retired(&mut self.gpu);
        self.gpu.begin_frame()
    }

    pub fn end_frame(&mut self) -> Result<(), GpuError> {
        self.gpu.end_frame()
    }

    /// Seconds on the session clock at the start of the current frame.
    pub fn now(&self) -> f32 {
        self.sample.seconds
    }

    pub fn frame_index(&self) -> u64 {
        self.sample.frame_index
    }

    pub fn viewport(&self) -> Resolution {
        self.resources.viewport()
    }

    /// Picks the buffer size policy for a visualization-level limit.
    pub fn size_policy(&self, limit: Option<u32>) -> SizePolicy {
        SizePolicy::from_limit(limit.or(self.settings.resolution_limit))
    }

    pub fn random(&mut self) -> f32 {
        self.rng.gen::<f32>()
    }

    /// True with the given probability, clamped to `0..=1`.
    pub fn roll(&mut self, probability: f32) -> bool {
        let probability = probability.clamp(0.0, 1.0) as f64;
        self.rng.gen_bool(probability)
    }

    /// Shared per-draw values for a renderer whose clock reads `time`.
    pub fn frame_uniforms(&mut self, time: f32, random_run: f32) -> FrameUniforms {
        FrameUniforms {
            time,
            frame: self.sample.frame_index,
            random_seed: self.random(),
            random_run,
        }
    }

    /// Resizes the display surface and every offscreen allocation.
    pub fn resize(&mut self, viewport: Resolution) {
        let viewport = viewport.non_zero();
        self.gpu.resize_viewport(viewport);
        self.resources.viewport_resized(&mut self.gpu, viewport);
    }

    /// Drops cached programs and deletes everything that became unreferenced.
    pub fn release_shaders(&mut self) {
        self.shaders.clear();
        self.shaders.collect_retired(&mut self.gpu);
    }
}
