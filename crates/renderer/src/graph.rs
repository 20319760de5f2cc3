//! Render-graph text format.
//!
//! Each line declares one pass as whitespace separated columns:
//!
//! ```text
//! drawbuffer inputs [shaderspec] [vertex-source] [settings]
//! ```
//!
//! * 3 columns: `0 * plasma` reuses visualization `plasma` for the pass.
//! * 4 columns: `1 0 blur.vert blur.frag` names vertex and fragment files
//!   (`*` as the vertex file picks the built-in quad vertex shader).
//! * 5 columns: adds the vertex source type name.
//! * 6 columns: adds `key=value;key=value` vertex source settings.
//!
//! `inputs` is `*` or a comma list. Integers read a buffer already drawn
//! earlier this frame; letters `A`..`Z` read the previous frame of draw
//! buffer 0..25. Draw buffers are numbered without gaps from 0 (from 1 in FX
//! graphs, where 0 is the wrapped primary visualization).
//!
//! Parsing is pure and produces a [`GraphLayout`]; [`RenderGraph::build`]
//! then turns a layout into live buffers and compiled programs.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use vizconfig::{Library, VizConfig};

use crate::context::RenderContext;
use crate::gpu::{DrawCall, FrameUniforms, GpuBackend, RenderTarget, TextureBinding};
use crate::resources::{OwnerId, ResourceError, ResourceGroup};
use crate::shaders::{BuiltinShader, ShaderError, ShaderKey, ShaderOrigin, ShaderProgram};
use crate::types::SizePolicy;
use crate::vertex::{
    parse_settings, VertexSettings, VertexSource, VertexSourceError, VertexSourceRegistry,
};

/// Highest back-buffer letter ordinal (`Z`).
const MAX_BACK_BUFFER: usize = 25;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GraphMode {
    Visualization,
    /// Draw buffer 0 is the primary visualization's output.
    Fx,
}

/// Name lookups the parser needs from the outside world.
pub trait GraphResolver {
    fn visualization(&self, name: &str) -> Result<VizConfig, String>;
    fn shader(&self, name: &str, relative_to: Option<&Path>) -> Option<PathBuf>;
}

impl GraphResolver for Library {
    fn visualization(&self, name: &str) -> Result<VizConfig, String> {
        self.load_visualizer(name).map_err(|err| err.to_string())
    }

    fn shader(&self, name: &str, relative_to: Option<&Path>) -> Option<PathBuf> {
        self.find_shader(name, relative_to)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("render graph has no passes")]
    Empty,
    #[error("line {line}: expected 3 to 6 columns, found {found}")]
    ColumnCount { line: usize, found: usize },
    #[error("line {line}: draw buffer '{value}' is not a non-negative integer")]
    InvalidDrawBuffer { line: usize, value: String },
    #[error("line {line}: draw buffer {found} skips ahead; the next new draw buffer must be {expected}")]
    DrawBufferGap {
        line: usize,
        found: usize,
        expected: usize,
    },
    #[error("line {line}: draw buffer 0 is reserved for the primary visualization in FX graphs")]
    FxReservedDrawBuffer { line: usize },
    #[error("line {line}: input {input} refers to a draw buffer that has not been drawn yet")]
    FrontBufferNotDrawn { line: usize, input: usize },
    #[error("line {line}: draw buffer {draw_buffer} cannot read its own output")]
    SelfReference { line: usize, draw_buffer: usize },
    #[error("line {line}: invalid input '{token}'")]
    InvalidInput { line: usize, token: String },
    #[error("back buffer {letter} referenced but draw buffer {draw_buffer} is not used")]
    BackBufferNotUsed { letter: char, draw_buffer: usize },
    #[error("line {line}: FX graphs cannot read the previous frame of the primary visualization")]
    FxPrimaryFeedback { line: usize },
    #[error("line {line}: vertex source '{name}' requires settings")]
    VertexSourceSettingsRequired { line: usize, name: String },
    #[error("line {line}: unknown vertex source '{name}'")]
    UnknownVertexSource { line: usize, name: String },
    #[error("line {line}: {reason}")]
    InvalidVertexSettings { line: usize, reason: String },
    #[error("line {line}: the built-in vertex shader only drives the quad vertex source")]
    BuiltinVertexRequiresQuad { line: usize },
    #[error("line {line}: visualization '{name}' could not be used: {reason}")]
    UnknownVisualization {
        line: usize,
        name: String,
        reason: String,
    },
    #[error("line {line}: shader '{name}' not found")]
    ShaderNotFound { line: usize, name: String },
    #[error(transparent)]
    Shader(#[from] ShaderError),
    #[error(transparent)]
    Resources(#[from] ResourceError),
}

/// One input reference within a pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputRef {
    /// Output of a draw buffer earlier in this frame.
    Front(usize),
    /// Previous frame of the draw buffer with this ordinal.
    Back(usize),
}

impl InputRef {
    pub fn uniform_name(self) -> String {
        match self {
            InputRef::Front(draw_buffer) => front_uniform(draw_buffer),
            InputRef::Back(ordinal) => back_uniform(ordinal),
        }
    }
}

pub fn front_uniform(draw_buffer: usize) -> String {
    format!("input{draw_buffer}")
}

pub fn back_uniform(ordinal: usize) -> String {
    format!("input{}", back_letter(ordinal))
}

fn back_letter(ordinal: usize) -> char {
    char::from(b'A' + ordinal.min(MAX_BACK_BUFFER) as u8)
}

/// A parsed pass, before any GPU work.
#[derive(Clone, Debug, PartialEq)]
pub struct PassSpec {
    /// 1-based source line.
    pub line: usize,
    pub draw_buffer: usize,
    pub inputs: Vec<InputRef>,
    pub vertex: ShaderOrigin,
    pub fragment: ShaderOrigin,
    pub vertex_source: VertexSource,
    pub uniforms: BTreeMap<String, f32>,
}

impl PassSpec {
    pub fn shader_key(&self) -> ShaderKey {
        ShaderKey::new(
            self.vertex.clone(),
            self.fragment.clone(),
            self.vertex_source.kind(),
        )
        .with_samplers(self.inputs.iter().map(|input| input.uniform_name()))
        .with_uniforms(self.uniforms.keys().cloned())
    }
}

/// Validated structure of a graph.
#[derive(Clone, Debug, PartialEq)]
pub struct GraphLayout {
    pub mode: GraphMode,
    pub passes: Vec<PassSpec>,
    pub max_draw_buffer: usize,
    /// Back-buffer ordinals in order of first use.
    pub back_buffers: Vec<usize>,
}

impl GraphLayout {
    /// Front buffers to allocate: one per draw buffer `0..=max`.
    pub fn front_count(&self) -> usize {
        self.max_draw_buffer + 1
    }

    pub fn resource_count(&self) -> usize {
        self.front_count() + self.back_buffers.len()
    }

    /// Every shader file the graph reads, for reload invalidation.
    pub fn shader_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self
            .passes
            .iter()
            .flat_map(|pass| [pass.vertex.path(), pass.fragment.path()])
            .flatten()
            .map(Path::to_path_buf)
            .collect();
        paths.sort();
        paths.dedup();
        paths
    }
}

type PassParts = (ShaderOrigin, ShaderOrigin, VertexSource, BTreeMap<String, f32>);

/// Turns graph text into a [`GraphLayout`].
pub struct GraphParser<'a, R: GraphResolver + ?Sized> {
    mode: GraphMode,
    resolver: &'a R,
    registry: &'a VertexSourceRegistry,
    base_dir: Option<PathBuf>,
    uniforms: BTreeMap<String, f32>,
}

impl<'a, R: GraphResolver + ?Sized> GraphParser<'a, R> {
    pub fn new(mode: GraphMode, resolver: &'a R, registry: &'a VertexSourceRegistry) -> Self {
        Self {
            mode,
            resolver,
            registry,
            base_dir: None,
            uniforms: BTreeMap::new(),
        }
    }

    /// Directory tried first when resolving relative shader names.
    pub fn with_base_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.base_dir = dir;
        self
    }

    /// Uniforms applied to every pass.
    pub fn with_uniforms(mut self, uniforms: BTreeMap<String, f32>) -> Self {
        self.uniforms = uniforms;
        self
    }

    pub fn parse<S: AsRef<str>>(&self, lines: &[S]) -> Result<GraphLayout, GraphError> {
        let mut max: Option<usize> = match self.mode {
            GraphMode::Visualization => None,
            GraphMode::Fx => Some(0),
        };
        let mut back_buffers: Vec<usize> = Vec::new();
        let mut passes = Vec::with_capacity(lines.len());

        for (index, text) in lines.iter().enumerate() {
            let line = index + 1;
            let columns: Vec<&str> = text.as_ref().split_whitespace().collect();
            if !(3..=6).contains(&columns.len()) {
                return Err(GraphError::ColumnCount {
                    line,
                    found: columns.len(),
                });
            }

            let draw_buffer =
                columns[0]
                    .parse::<usize>()
                    .map_err(|_| GraphError::InvalidDrawBuffer {
                        line,
                        value: columns[0].to_string(),
                    })?;
            if self.mode == GraphMode::Fx && draw_buffer == 0 {
                return Err(GraphError::FxReservedDrawBuffer { line });
            }
            let expected = max.map_or(0, |max| max + 1);
            if draw_buffer > expected {
                return Err(GraphError::DrawBufferGap {
                    line,
                    found: draw_buffer,
                    expected,
                });
            }

            // Fronts may only read buffers declared before this line.
            let inputs = self.parse_inputs(line, columns[1], draw_buffer, max)?;
            for input in &inputs {
                if let InputRef::Back(ordinal) = *input {
                    if !back_buffers.contains(&ordinal) {
                        back_buffers.push(ordinal);
                    }
                }
            }
            max = Some(max.map_or(draw_buffer, |max| max.max(draw_buffer)));

            let (vertex, fragment, vertex_source, uniforms) = if columns.len() == 3 {
                self.reuse_visualization(line, columns[2])?
            } else {
                self.explicit_shaders(line, &columns[2..])?
            };

            passes.push(PassSpec {
                line,
                draw_buffer,
                inputs,
                vertex,
                fragment,
                vertex_source,
                uniforms,
            });
        }

        let Some(max_draw_buffer) = max.filter(|_| !passes.is_empty()) else {
            return Err(GraphError::Empty);
        };
        if let Some(&ordinal) = back_buffers.iter().max() {
            if ordinal > max_draw_buffer {
                return Err(GraphError::BackBufferNotUsed {
                    letter: back_letter(ordinal),
                    draw_buffer: ordinal,
                });
            }
        }

        Ok(GraphLayout {
            mode: self.mode,
            passes,
            max_draw_buffer,
            back_buffers,
        })
    }

    fn parse_inputs(
        &self,
        line: usize,
        column: &str,
        draw_buffer: usize,
        declared: Option<usize>,
    ) -> Result<Vec<InputRef>, GraphError> {
        if column == "*" {
            return Ok(Vec::new());
        }
        let mut inputs = Vec::new();
        for token in column.split(',') {
            let token = token.trim();
            let input = if let Ok(front) = token.parse::<usize>() {
                if declared.map_or(true, |max| front > max) {
                    return Err(GraphError::FrontBufferNotDrawn { line, input: front });
                }
                if front == draw_buffer {
                    return Err(GraphError::SelfReference { line, draw_buffer });
                }
                InputRef::Front(front)
            } else {
                match token.as_bytes() {
                    [letter @ b'A'..=b'Z'] => {
                        let ordinal = usize::from(letter - b'A');
                        if self.mode == GraphMode::Fx && ordinal == 0 {
                            return Err(GraphError::FxPrimaryFeedback { line });
                        }
                        InputRef::Back(ordinal)
                    }
                    _ => {
                        return Err(GraphError::InvalidInput {
                            line,
                            token: token.to_string(),
                        })
                    }
                }
            };
            if !inputs.contains(&input) {
                inputs.push(input);
            }
        }
        Ok(inputs)
    }

    fn reuse_visualization(
        &self,
        line: usize,
        name: &str,
    ) -> Result<PassParts, GraphError> {
        let viz = self
            .resolver
            .visualization(name)
            .map_err(|reason| GraphError::UnknownVisualization {
                line,
                name: name.to_string(),
                reason,
            })?;
        self.visualization_parts(line, &viz)
    }

    /// Describes a single-shader visualization as one pass drawing buffer 0.
    pub fn single_pass(&self, viz: &VizConfig) -> Result<PassSpec, GraphError> {
        let (vertex, fragment, vertex_source, uniforms) = self.visualization_parts(1, viz)?;
        Ok(PassSpec {
            line: 1,
            draw_buffer: 0,
            inputs: Vec::new(),
            vertex,
            fragment,
            vertex_source,
            uniforms,
        })
    }

    fn visualization_parts(&self, line: usize, viz: &VizConfig) -> Result<PassParts, GraphError> {
        let unusable = |reason: &str| GraphError::UnknownVisualization {
            line,
            name: viz.name.clone(),
            reason: reason.to_string(),
        };
        if viz.is_multipass() {
            return Err(unusable("it is a multipass visualization"));
        }
        let fragment_name = viz
            .shader
            .fragment_shader
            .as_deref()
            .ok_or_else(|| unusable("it names no fragment shader"))?;
        let base_dir = viz.source_dir.as_deref();

        let vertex_source =
            self.vertex_source(line, &viz.shader.vertex_source, &viz.vertex_source)?;
        let vertex = self.vertex_origin(
            line,
            viz.shader.vertex_shader.as_deref(),
            vertex_source,
            base_dir,
        )?;
        let fragment = self.shader_origin(line, fragment_name, base_dir)?;

        let mut uniforms = self.uniforms.clone();
        uniforms.extend(viz.uniforms.iter().map(|(key, value)| (key.clone(), *value)));
        Ok((vertex, fragment, vertex_source, uniforms))
    }

    fn explicit_shaders(&self, line: usize, columns: &[&str]) -> Result<PassParts, GraphError> {
        let type_name = columns.get(2).copied().unwrap_or(crate::vertex::QUAD_SOURCE);
        let settings = match columns.get(3) {
            Some(text) => parse_settings(text)
                .map_err(|reason| GraphError::InvalidVertexSettings { line, reason })?,
            None => VertexSettings::new(),
        };
        let vertex_source = self.vertex_source(line, type_name, &settings)?;
        let base_dir = self.base_dir.as_deref();
        let vertex = self.vertex_origin(line, Some(columns[0]), vertex_source, base_dir)?;
        let fragment = self.shader_origin(line, columns[1], base_dir)?;
        Ok((vertex, fragment, vertex_source, self.uniforms.clone()))
    }

    fn vertex_source(
        &self,
        line: usize,
        name: &str,
        settings: &VertexSettings,
    ) -> Result<VertexSource, GraphError> {
        self.registry
            .create(name, settings)
            .map_err(|err| match err {
                VertexSourceError::Unknown(name) => GraphError::UnknownVertexSource { line, name },
                VertexSourceError::SettingsRequired(name) => {
                    GraphError::VertexSourceSettingsRequired { line, name }
                }
                other @ VertexSourceError::InvalidSettings { .. } => {
                    GraphError::InvalidVertexSettings {
                        line,
                        reason: other.to_string(),
                    }
                }
            })
    }

    fn vertex_origin(
        &self,
        line: usize,
        name: Option<&str>,
        source: VertexSource,
        base_dir: Option<&Path>,
    ) -> Result<ShaderOrigin, GraphError> {
        match name.map(str::trim) {
            None | Some("") | Some("*") => {
                if source != VertexSource::Quad {
                    return Err(GraphError::BuiltinVertexRequiresQuad { line });
                }
                Ok(ShaderOrigin::Builtin(BuiltinShader::QuadVertex))
            }
            Some(name) => self.shader_origin(line, name, base_dir),
        }
    }

    fn shader_origin(
        &self,
        line: usize,
        name: &str,
        base_dir: Option<&Path>,
    ) -> Result<ShaderOrigin, GraphError> {
        self.resolver
            .shader(name, base_dir)
            .map(ShaderOrigin::File)
            .ok_or_else(|| GraphError::ShaderNotFound {
                line,
                name: name.to_string(),
            })
    }
}

/// A front or back buffer read by a pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BufferInput {
    pub draw_buffer: usize,
    pub uniform: String,
}

/// A compiled pass ready to draw.
#[derive(Debug)]
pub struct DrawPass {
    pub draw_buffer: usize,
    pub front_inputs: Vec<BufferInput>,
    pub back_inputs: Vec<BufferInput>,
    pub program: Arc<ShaderProgram>,
    pub vertex_source: VertexSource,
    pub uniforms: Vec<(String, f32)>,
}

/// Live buffers and programs for a parsed graph.
///
/// Buffers sit in a fixed arena. `front[n]` and `back[n]` index the arena
/// slot draw buffer `n` renders into this frame and the slot holding its
/// previous frame; feedback swaps the two indices, never the textures.
#[derive(Debug)]
pub struct RenderGraph {
    owner: OwnerId,
    arena: Vec<ResourceGroup>,
    front: Vec<usize>,
    back: Vec<Option<usize>>,
    passes: Vec<DrawPass>,
    output_buffer: usize,
    /// Arena slot written by the final pass of the latest frame.
    last_output: Option<usize>,
}

impl RenderGraph {
    pub fn build<G: GpuBackend>(
        ctx: &mut RenderContext<G>,
        owner: OwnerId,
        layout: &GraphLayout,
        policy: SizePolicy,
    ) -> Result<Self, GraphError> {
        let mut arena = ctx.resources.create_resource_groups(
            &mut ctx.gpu,
            owner,
            layout.resource_count(),
            policy,
        )?;

        let front_count = layout.front_count();
        let front: Vec<usize> = (0..front_count).collect();
        let mut back = vec![None; front_count];
        for (slot, group) in arena.iter_mut().enumerate() {
            if slot < front_count {
                group.uniform_name = front_uniform(slot);
                group.draw_pass = slot;
            } else {
                let ordinal = layout.back_buffers[slot - front_count];
                group.uniform_name = back_uniform(ordinal);
                group.draw_pass = ordinal;
                back[ordinal] = Some(slot);
            }
        }

        let mut passes = Vec::with_capacity(layout.passes.len());
        for spec in &layout.passes {
            let program = match ctx.shaders.get_or_compile(&mut ctx.gpu, &spec.shader_key()) {
                Ok(program) => program,
                Err(err) => {
                    drop(passes);
                    ctx.resources.destroy_resources(&mut ctx.gpu, owner);
                    return Err(err.into());
                }
            };
            let mut front_inputs = Vec::new();
            let mut back_inputs = Vec::new();
            for input in &spec.inputs {
                match *input {
                    InputRef::Front(draw_buffer) => front_inputs.push(BufferInput {
                        draw_buffer,
                        uniform: input.uniform_name(),
                    }),
                    InputRef::Back(draw_buffer) => back_inputs.push(BufferInput {
                        draw_buffer,
                        uniform: input.uniform_name(),
                    }),
                }
            }
            passes.push(DrawPass {
                draw_buffer: spec.draw_buffer,
                front_inputs,
                back_inputs,
                program,
                vertex_source: spec.vertex_source,
                uniforms: spec
                    .uniforms
                    .iter()
                    .map(|(name, value)| (name.clone(), *value))
                    .collect(),
            });
        }

        let output_buffer = layout
            .passes
            .last()
            .map(|pass| pass.draw_buffer)
            .unwrap_or(layout.max_draw_buffer);
        tracing::debug!(
            %owner,
            passes = passes.len(),
            fronts = front_count,
            backs = layout.back_buffers.len(),
            "built render graph"
        );
        Ok(Self {
            owner,
            arena,
            front,
            back,
            passes,
            output_buffer,
            last_output: None,
        })
    }

    pub fn passes(&self) -> &[DrawPass] {
        &self.passes
    }

    /// Group draw buffer `n` renders into this frame.
    pub fn front_group(&self, draw_buffer: usize) -> Option<&ResourceGroup> {
        self.front.get(draw_buffer).map(|slot| &self.arena[*slot])
    }

    /// Group holding the previous frame of draw buffer `n`, if it is read.
    pub fn back_group(&self, draw_buffer: usize) -> Option<&ResourceGroup> {
        self.back
            .get(draw_buffer)
            .copied()
            .flatten()
            .map(|slot| &self.arena[slot])
    }

    pub fn front_count(&self) -> usize {
        self.front.len()
    }

    pub fn back_count(&self) -> usize {
        self.back.iter().flatten().count()
    }

    /// Runs every pass in order and returns the group holding the output.
    ///
    /// `primary` replaces draw buffer 0 as an input, which FX graphs use to
    /// read a primary visualization's own buffer without copying it.
    pub fn execute<G: GpuBackend>(
        &mut self,
        gpu: &mut G,
        frame: FrameUniforms,
        primary: Option<&ResourceGroup>,
    ) -> ResourceGroup {
        for pass in &self.passes {
            let target = self.arena[self.front[pass.draw_buffer]].framebuffer;
            let mut textures =
                Vec::with_capacity(pass.front_inputs.len() + pass.back_inputs.len());
            for input in &pass.front_inputs {
                let group = match primary {
                    Some(primary) if input.draw_buffer == 0 => primary,
                    _ => &self.arena[self.front[input.draw_buffer]],
                };
                textures.push(binding(&input.uniform, group));
            }
            for input in &pass.back_inputs {
                if let Some(slot) = self.back[input.draw_buffer] {
                    textures.push(binding(&input.uniform, &self.arena[slot]));
                }
            }
            gpu.draw(&DrawCall {
                program: pass.program.handle(),
                target: RenderTarget::Framebuffer(target),
                vertex_count: pass.vertex_source.vertex_count(),
                textures,
                uniforms: pass.uniforms.clone(),
                frame,
            });
        }

        let slot = self.front[self.output_buffer];
        self.last_output = Some(slot);
        self.swap_feedback();
        self.arena[slot].clone()
    }

    /// Group holding the most recent output (the output buffer before any frame).
    pub fn output_group(&self) -> &ResourceGroup {
        let slot = self
            .last_output
            .unwrap_or(self.front[self.output_buffer]);
        &self.arena[slot]
    }

    fn swap_feedback(&mut self) {
        for draw_buffer in 0..self.front.len() {
            let Some(back_slot) = self.back[draw_buffer] else {
                continue;
            };
            let front_slot = self.front[draw_buffer];
            self.front[draw_buffer] = back_slot;
            self.back[draw_buffer] = Some(front_slot);

            let front_name = std::mem::take(&mut self.arena[front_slot].uniform_name);
            let back_name = std::mem::take(&mut self.arena[back_slot].uniform_name);
            self.arena[front_slot].uniform_name = back_name;
            self.arena[back_slot].uniform_name = front_name;
        }
    }

    /// Releases buffers; programs go back to the cache when the graph drops.
    pub fn dispose<G: GpuBackend>(&mut self, ctx: &mut RenderContext<G>) {
        self.passes.clear();
        ctx.resources.destroy_resources(&mut ctx.gpu, self.owner);
    }
}

fn binding(uniform: &str, group: &ResourceGroup) -> TextureBinding {
    TextureBinding {
        uniform: uniform.to_string(),
        texture: group.texture,
        unit: group.texture_unit,
    }
}
