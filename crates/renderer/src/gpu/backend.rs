use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use wgpu::util::{DeviceExt, TextureDataOrder};
use winit::window::Window;

use crate::compile::wrap_program;
use crate::shaders::BuiltinShader;
use crate::types::Resolution;

use super::context::GpuContext;
use super::pipeline::{
    sampler_entries, PipelineLayouts, ProgramPipelines, OFFSCREEN_FORMAT, QUAD_VERTICES,
};
use super::uniforms::VizUniforms;
use super::{
    DrawCall, FrameUniforms, FramebufferHandle, GpuBackend, GpuError, ProgramDesc, ProgramHandle,
    RenderTarget, TextureBinding, TextureHandle, VertexKind,
};

/// Logical texture units advertised per sampled-texture slot of a stage.
///
/// Units only identify buffers; bindings are rebuilt for every draw.
const UNITS_PER_STAGE_SLOT: u32 = 5;

struct RenderTexture {
    _texture: wgpu::Texture,
    view: wgpu::TextureView,
    resolution: Resolution,
}

struct FrameInProgress {
    surface: Option<(wgpu::SurfaceTexture, wgpu::TextureView)>,
    encoder: wgpu::CommandEncoder,
}

/// [`GpuBackend`] on a `wgpu` device presenting to a winit window.
///
/// Every draw is its own render pass recorded into the frame's encoder.
/// Uniform values are staged per draw and copied into the shared uniform
/// buffer ahead of the pass, so passes observe their own values.
pub struct WgpuGpu {
    context: GpuContext,
    layouts: PipelineLayouts,
    uniform_buffer: wgpu::Buffer,
    uniform_bind_group: wgpu::BindGroup,
    sampler: wgpu::Sampler,
    _placeholder_texture: wgpu::Texture,
    placeholder_view: wgpu::TextureView,
    quad_buffer: wgpu::Buffer,
    index_buffer: Option<(wgpu::Buffer, u32)>,
    programs: HashMap<ProgramHandle, ProgramPipelines>,
    textures: HashMap<TextureHandle, RenderTexture>,
    framebuffers: HashMap<FramebufferHandle, TextureHandle>,
    blit_program: ProgramHandle,
    next_id: u32,
    frame: Option<FrameInProgress>,
    // Dropped last: the surface borrows the window's handles.
    _window: Arc<Window>,
}

impl WgpuGpu {
    pub fn new(window: Arc<Window>) -> Result<Self> {
        let size = window.inner_size();
        let context = GpuContext::new(window.as_ref(), Resolution::new(size.width, size.height))?;
        let device = &context.device;
        let layouts = PipelineLayouts::new(device);

        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("viz uniforms"),
            size: std::mem::size_of::<VizUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let uniform_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("viz uniform bind group"),
            layout: &layouts.uniform_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: uniform_buffer.as_entire_binding(),
            }],
        });
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });
        let placeholder_texture = device.create_texture_with_data(
            &context.queue,
            &wgpu::TextureDescriptor {
                label: Some("unbound sampler placeholder"),
                size: wgpu::Extent3d {
                    width: 1,
                    height: 1,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: wgpu::TextureFormat::Rgba8Unorm,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            },
            TextureDataOrder::LayerMajor,
            &[0, 0, 0, 255],
        );
        let placeholder_view =
            placeholder_texture.create_view(&wgpu::TextureViewDescriptor::default());
        let quad_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("quad vertices"),
            contents: bytemuck::cast_slice(&QUAD_VERTICES),
            usage: wgpu::BufferUsages::VERTEX,
        });

        let mut gpu = Self {
            context,
            layouts,
            uniform_buffer,
            uniform_bind_group,
            sampler,
            _placeholder_texture: placeholder_texture,
            placeholder_view,
            quad_buffer,
            index_buffer: None,
            programs: HashMap::new(),
            textures: HashMap::new(),
            framebuffers: HashMap::new(),
            blit_program: ProgramHandle(0),
            next_id: 1,
            frame: None,
            _window: window,
        };
        gpu.blit_program = gpu.compile_program(&ProgramDesc {
            label: "builtin blit".into(),
            vertex_source: BuiltinShader::QuadVertex.source().into(),
            fragment_source: BuiltinShader::BlitFragment.source().into(),
            vertex_kind: VertexKind::Quad,
            samplers: vec!["source".into()],
            uniforms: Vec::new(),
        })?;
        Ok(gpu)
    }

    fn next_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn create_texture(&self, resolution: Resolution) -> RenderTexture {
        let resolution = resolution.non_zero();
        let texture = self.context.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("viz render target"),
            size: wgpu::Extent3d {
                width: resolution.width,
                height: resolution.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: OFFSCREEN_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        RenderTexture {
            _texture: texture,
            view,
            resolution,
        }
    }

    /// Grows the shared `vertexId` buffer to hold at least `count` entries.
    fn ensure_index_buffer(&mut self, count: u32) {
        if matches!(&self.index_buffer, Some((_, capacity)) if *capacity >= count) {
            return;
        }
        let capacity = count.max(1).next_power_of_two();
        let ids: Vec<f32> = (0..capacity).map(|id| id as f32).collect();
        let buffer = self
            .context
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("vertex id buffer"),
                contents: bytemuck::cast_slice(&ids),
                usage: wgpu::BufferUsages::VERTEX,
            });
        self.index_buffer = Some((buffer, capacity));
    }

    fn ensure_encoder(&mut self) {
        if self.frame.is_none() {
            let encoder = self
                .context
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("offscreen encoder"),
                });
            self.frame = Some(FrameInProgress {
                surface: None,
                encoder,
            });
        }
    }
}

fn surface_error(err: wgpu::SurfaceError) -> GpuError {
    match err {
        wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated => GpuError::SurfaceLost,
        wgpu::SurfaceError::Timeout => GpuError::SurfaceTimeout,
        wgpu::SurfaceError::OutOfMemory => GpuError::OutOfMemory,
        other => GpuError::Surface(other.to_string()),
    }
}

impl GpuBackend for WgpuGpu {
    fn max_texture_units(&self) -> u32 {
        self.context.max_sampled_textures * UNITS_PER_STAGE_SLOT
    }

    fn viewport(&self) -> Resolution {
        self.context.resolution()
    }

    fn resize_viewport(&mut self, resolution: Resolution) {
        self.context.resize(resolution);
    }

    fn create_render_target(
        &mut self,
        resolution: Resolution,
    ) -> Result<(FramebufferHandle, TextureHandle), GpuError> {
        let render_texture = self.create_texture(resolution);
        let texture = TextureHandle(self.next_id());
        let framebuffer = FramebufferHandle(self.next_id());
        self.textures.insert(texture, render_texture);
        self.framebuffers.insert(framebuffer, texture);
        Ok((framebuffer, texture))
    }

    fn resize_render_target(
        &mut self,
        framebuffer: FramebufferHandle,
        texture: TextureHandle,
        resolution: Resolution,
    ) -> Result<(), GpuError> {
        if self.framebuffers.get(&framebuffer) != Some(&texture) {
            return Err(GpuError::TargetIncomplete(format!(
                "framebuffer {} is not bound to texture {}",
                framebuffer.0, texture.0
            )));
        }
        let render_texture = self.create_texture(resolution);
        self.textures.insert(texture, render_texture);
        Ok(())
    }

    fn destroy_render_target(&mut self, framebuffer: FramebufferHandle, texture: TextureHandle) {
        self.framebuffers.remove(&framebuffer);
        self.textures.remove(&texture);
    }

    fn compile_program(&mut self, desc: &ProgramDesc) -> Result<ProgramHandle, GpuError> {
        let compile_error = |message: String| GpuError::Compile {
            label: desc.label.clone(),
            message,
        };
        let wrapped = wrap_program(desc).map_err(|err| compile_error(err.to_string()))?;
        let pipelines = ProgramPipelines::new(
            &self.context.device,
            &self.layouts,
            self.context.surface_format,
            &desc.label,
            wrapped,
            desc.vertex_kind,
        )
        .map_err(compile_error)?;
        let handle = ProgramHandle(self.next_id());
        self.programs.insert(handle, pipelines);
        Ok(handle)
    }

    fn delete_program(&mut self, program: ProgramHandle) {
        if program != self.blit_program {
            self.programs.remove(&program);
        }
    }

    fn begin_frame(&mut self) -> Result<(), GpuError> {
        let surface = match self.context.surface.get_current_texture() {
            Ok(surface) => surface,
            Err(err) => {
                if matches!(err, wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) {
                    self.context.reconfigure();
                }
                return Err(surface_error(err));
            }
        };
        let view = surface
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let encoder = self
            .context
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("frame encoder"),
            });
        // Offscreen work recorded between frames goes first.
        if let Some(pending) = self.frame.take() {
            self.context
                .queue
                .submit(std::iter::once(pending.encoder.finish()));
        }
        self.frame = Some(FrameInProgress {
            surface: Some((surface, view)),
            encoder,
        });
        Ok(())
    }

    fn draw(&mut self, call: &DrawCall) {
        self.ensure_encoder();
        if matches!(
            self.programs.get(&call.program).map(|program| program.vertex_kind),
            Some(VertexKind::IntegerArray(_))
        ) {
            self.ensure_index_buffer(call.vertex_count);
        }

        let Self {
            context,
            uniform_buffer,
            uniform_bind_group,
            sampler,
            placeholder_view,
            quad_buffer,
            index_buffer,
            programs,
            textures,
            framebuffers,
            frame,
            ..
        } = self;
        let placeholder_view: &wgpu::TextureView = placeholder_view;
        let textures: &HashMap<TextureHandle, RenderTexture> = textures;
        let Some(FrameInProgress { surface, encoder }) = frame.as_mut() else {
            return;
        };
        let Some(program) = programs.get(&call.program) else {
            tracing::warn!(program = call.program.0, "draw with unknown program");
            return;
        };

        let (view, resolution, offscreen) = match call.target {
            RenderTarget::Display => match surface {
                Some((_, view)) => (&*view, context.resolution(), false),
                None => {
                    tracing::trace!("display draw outside a frame skipped");
                    return;
                }
            },
            RenderTarget::Framebuffer(handle) => {
                let target = framebuffers
                    .get(&handle)
                    .and_then(|texture| textures.get(texture));
                match target {
                    Some(target) => (&target.view, target.resolution, true),
                    None => {
                        tracing::warn!(framebuffer = handle.0, "draw to unknown framebuffer");
                        return;
                    }
                }
            }
        };

        let mut uniforms = VizUniforms::new(resolution, offscreen, &call.frame);
        uniforms.set_user(&program.uniforms, &call.uniforms);
        let staging = context
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("uniform staging"),
                contents: bytemuck::bytes_of(&uniforms),
                usage: wgpu::BufferUsages::COPY_SRC,
            });
        encoder.copy_buffer_to_buffer(
            &staging,
            0,
            uniform_buffer,
            0,
            std::mem::size_of::<VizUniforms>() as u64,
        );

        let texture_bind_group = program.texture_layout.as_ref().map(|layout| {
            let views: Vec<&wgpu::TextureView> = program
                .samplers
                .iter()
                .map(|name| {
                    call.textures
                        .iter()
                        .find(|binding| &binding.uniform == name)
                        .and_then(|binding| textures.get(&binding.texture))
                        .map(|texture| &texture.view)
                        .unwrap_or(placeholder_view)
                })
                .collect();
            context
                .device
                .create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("viz texture bind group"),
                    layout,
                    entries: &sampler_entries(&views, sampler),
                })
        });

        let vertex_buffer = match program.vertex_kind {
            VertexKind::Quad => &*quad_buffer,
            VertexKind::IntegerArray(_) => match index_buffer {
                Some((buffer, _)) => &*buffer,
                None => return,
            },
        };
        let vertex_count = match program.vertex_kind {
            VertexKind::Quad => 4,
            VertexKind::IntegerArray(_) => call.vertex_count,
        };

        let clear = if offscreen {
            wgpu::Color::TRANSPARENT
        } else {
            wgpu::Color::BLACK
        };
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("viz pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view,
                depth_slice: None,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(clear),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            occlusion_query_set: None,
            timestamp_writes: None,
        });
        pass.set_pipeline(program.pipeline(offscreen));
        pass.set_bind_group(0, &*uniform_bind_group, &[]);
        if let Some(bind_group) = &texture_bind_group {
            pass.set_bind_group(1, bind_group, &[]);
        }
        pass.set_vertex_buffer(0, vertex_buffer.slice(..));
        pass.draw(0..vertex_count, 0..1);
    }

    fn blit(&mut self, source: TextureHandle, target: RenderTarget) {
        let call = DrawCall {
            program: self.blit_program,
            target,
            vertex_count: 4,
            textures: vec![TextureBinding {
                uniform: "source".into(),
                texture: source,
                unit: 0,
            }],
            uniforms: Vec::new(),
            frame: FrameUniforms::default(),
        };
        self.draw(&call);
    }

    fn end_frame(&mut self) -> Result<(), GpuError> {
        let Some(FrameInProgress { surface, encoder }) = self.frame.take() else {
            return Ok(());
        };
        self.context.queue.submit(std::iter::once(encoder.finish()));
        if let Some((surface, _)) = surface {
            surface.present();
        }
        Ok(())
    }
}
