use crate::compile::{create_module, WrappedProgram};
use crate::gpu::{Primitive, VertexKind};

use wgpu::naga::ShaderStage;

/// Offscreen render targets store linear colour with headroom for feedback.
pub(crate) const OFFSCREEN_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;

const QUAD_ATTRIBUTES: [wgpu::VertexAttribute; 2] =
    wgpu::vertex_attr_array![0 => Float32x3, 1 => Float32x2];
const INDEX_ATTRIBUTES: [wgpu::VertexAttribute; 1] = wgpu::vertex_attr_array![0 => Float32];

/// Interleaved position + texcoord for the four-vertex strip.
pub(crate) const QUAD_VERTICES: [f32; 20] = [
    -1.0, -1.0, 0.0, 0.0, 0.0, //
    1.0, -1.0, 0.0, 1.0, 0.0, //
    -1.0, 1.0, 0.0, 0.0, 1.0, //
    1.0, 1.0, 0.0, 1.0, 1.0, //
];

pub(crate) struct PipelineLayouts {
    pub uniform_layout: wgpu::BindGroupLayout,
}

impl PipelineLayouts {
    pub fn new(device: &wgpu::Device) -> Self {
        let uniform_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("viz uniform layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });
        Self { uniform_layout }
    }
}

/// One compiled program: a pipeline per target format plus its binding order.
pub(crate) struct ProgramPipelines {
    pub display: wgpu::RenderPipeline,
    pub offscreen: wgpu::RenderPipeline,
    pub texture_layout: Option<wgpu::BindGroupLayout>,
    pub samplers: Vec<String>,
    pub uniforms: Vec<String>,
    pub vertex_kind: VertexKind,
}

impl ProgramPipelines {
    pub fn new(
        device: &wgpu::Device,
        layouts: &PipelineLayouts,
        surface_format: wgpu::TextureFormat,
        label: &str,
        wrapped: WrappedProgram,
        vertex_kind: VertexKind,
    ) -> Result<Self, String> {
        let vertex_module = create_module(
            device,
            &format!("{label} vertex"),
            &wrapped.vertex,
            ShaderStage::Vertex,
        )?;
        let fragment_module = create_module(
            device,
            &format!("{label} fragment"),
            &wrapped.fragment,
            ShaderStage::Fragment,
        )?;

        let texture_layout = (!wrapped.samplers.is_empty()).then(|| {
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("viz texture layout"),
                entries: &sampler_layout_entries(wrapped.samplers.len()),
            })
        });
        let mut bind_group_layouts = vec![&layouts.uniform_layout];
        bind_group_layouts.extend(texture_layout.as_ref());
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(label),
            bind_group_layouts: &bind_group_layouts,
            push_constant_ranges: &[],
        });

        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let build = |format| {
            create_pipeline(
                device,
                &pipeline_layout,
                &vertex_module,
                &fragment_module,
                vertex_kind,
                format,
                label,
            )
        };
        let display = build(surface_format);
        let offscreen = build(OFFSCREEN_FORMAT);
        if let Some(err) = pollster::block_on(device.pop_error_scope()) {
            return Err(err.to_string());
        }

        Ok(Self {
            display,
            offscreen,
            texture_layout,
            samplers: wrapped.samplers,
            uniforms: wrapped.uniforms,
            vertex_kind,
        })
    }

    pub fn pipeline(&self, offscreen: bool) -> &wgpu::RenderPipeline {
        if offscreen {
            &self.offscreen
        } else {
            &self.display
        }
    }
}

fn topology(kind: VertexKind) -> wgpu::PrimitiveTopology {
    match kind {
        VertexKind::Quad => wgpu::PrimitiveTopology::TriangleStrip,
        VertexKind::IntegerArray(Primitive::Points) => wgpu::PrimitiveTopology::PointList,
        VertexKind::IntegerArray(Primitive::Lines) => wgpu::PrimitiveTopology::LineList,
        VertexKind::IntegerArray(Primitive::LineStrip) => wgpu::PrimitiveTopology::LineStrip,
        VertexKind::IntegerArray(Primitive::Triangles) => wgpu::PrimitiveTopology::TriangleList,
        VertexKind::IntegerArray(Primitive::TriangleStrip) => {
            wgpu::PrimitiveTopology::TriangleStrip
        }
    }
}

fn create_pipeline(
    device: &wgpu::Device,
    layout: &wgpu::PipelineLayout,
    vertex_module: &wgpu::ShaderModule,
    fragment_module: &wgpu::ShaderModule,
    vertex_kind: VertexKind,
    format: wgpu::TextureFormat,
    label: &str,
) -> wgpu::RenderPipeline {
    let vertex_buffer = match vertex_kind {
        VertexKind::Quad => wgpu::VertexBufferLayout {
            array_stride: (5 * std::mem::size_of::<f32>()) as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &QUAD_ATTRIBUTES,
        },
        VertexKind::IntegerArray(_) => wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<f32>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &INDEX_ATTRIBUTES,
        },
    };

    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(label),
        layout: Some(layout),
        vertex: wgpu::VertexState {
            module: vertex_module,
            entry_point: Some("main"),
            buffers: &[vertex_buffer],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        },
        primitive: wgpu::PrimitiveState {
            topology: topology(vertex_kind),
            strip_index_format: None,
            front_face: wgpu::FrontFace::Ccw,
            cull_mode: None,
            polygon_mode: wgpu::PolygonMode::Fill,
            unclipped_depth: false,
            conservative: false,
        },
        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        fragment: Some(wgpu::FragmentState {
            module: fragment_module,
            entry_point: Some("main"),
            targets: &[Some(wgpu::ColorTargetState {
                format,
                blend: Some(wgpu::BlendState::REPLACE),
                write_mask: wgpu::ColorWrites::ALL,
            })],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        }),
        multiview: None,
        cache: None,
    })
}

pub(crate) fn sampler_layout_entries(count: usize) -> Vec<wgpu::BindGroupLayoutEntry> {
    let mut entries = Vec::with_capacity(count * 2);
    for index in 0..count as u32 {
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: index * 2,
            visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        });
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: index * 2 + 1,
            visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
            ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
            count: None,
        });
    }
    entries
}

pub(crate) fn sampler_entries<'a>(
    views: &[&'a wgpu::TextureView],
    sampler: &'a wgpu::Sampler,
) -> Vec<wgpu::BindGroupEntry<'a>> {
    let mut entries = Vec::with_capacity(views.len() * 2);
    for (index, view) in views.iter().enumerate() {
        entries.push(wgpu::BindGroupEntry {
            binding: (index as u32) * 2,
            resource: wgpu::BindingResource::TextureView(view),
        });
        entries.push(wgpu::BindGroupEntry {
            binding: (index as u32) * 2 + 1,
            resource: wgpu::BindingResource::Sampler(sampler),
        });
    }
    entries
}
