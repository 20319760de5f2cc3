//! Rewrites visualization GLSL into the Vulkan-flavoured GLSL `wgpu` accepts.
//!
//! Visualization shaders are written against plain GLSL 4.50: loose
//! `uniform float` and `uniform sampler2D` declarations, unqualified
//! `in`/`out` variables and the shared names `resolution`, `time`, `frame`,
//! `randomseed` and `randomrun`. Wrapping each stage:
//!
//! 1. Strips `#version`, `precision` and loose uniform declarations.
//! 2. Prepends [`HEADER`], the `VizParams` uniform block mirrored by
//!    `gpu::uniforms::VizUniforms`, plus one texture/sampler pair per sampler.
//! 3. Gives every `in`/`out` an explicit location. Vertex attributes follow
//!    the vertex source layout; varyings are matched between stages by name.
//! 4. Renames the user's `main` and appends a real one that corrects for the
//!    offscreen Y flip.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt::Write as _;

use wgpu::naga::ShaderStage;

use crate::gpu::{ProgramDesc, VertexKind};

/// Float uniform slots in the block (`vec4 _user[8]`).
pub(crate) const MAX_USER_UNIFORMS: usize = 32;
pub(crate) const MAX_SAMPLERS: usize = 16;

const BUILTIN_UNIFORMS: &[&str] = &["resolution", "time", "randomseed", "randomrun", "frame"];
const PRECISION_WORDS: &[&str] = &["highp", "mediump", "lowp"];
const INTERPOLATION_WORDS: &[&str] = &["flat", "smooth", "noperspective"];

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub(crate) enum WrapError {
    #[error("uniform '{name}' has unsupported type '{ty}'; only float and sampler2D are bound")]
    UnsupportedUniform { name: String, ty: String },
    #[error("{count} float uniforms declared, at most 32 are supported")]
    TooManyUniforms { count: usize },
    #[error("{count} samplers declared, at most 16 are supported")]
    TooManySamplers { count: usize },
    #[error("vertex attribute '{name}' is not provided by {source_kind}")]
    UnknownAttribute {
        name: String,
        source_kind: &'static str,
    },
}

/// Both stages rewritten, with the binding order the backend must follow.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct WrappedProgram {
    pub vertex: String,
    pub fragment: String,
    /// Sampler names; sampler `i` lives at bindings `2i` and `2i + 1` of set 1.
    pub samplers: Vec<String>,
    /// Float uniform names; uniform `i` lives in `_user[i / 4]`.
    pub uniforms: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    In,
    Out,
}

#[derive(Debug)]
enum BodyLine {
    Text(String),
    Varying {
        direction: Direction,
        interpolation: String,
        ty: String,
        /// Declared text, array suffix included.
        declarator: String,
    },
}

#[derive(Debug, Default)]
struct StageScan {
    body: Vec<BodyLine>,
    samplers: Vec<String>,
    floats: Vec<String>,
}

fn push_unique(list: &mut Vec<String>, name: &str) {
    if !list.iter().any(|existing| existing == name) {
        list.push(name.to_string());
    }
}

fn base_name(declarator: &str) -> &str {
    declarator
        .split('[')
        .next()
        .unwrap_or(declarator)
        .trim()
}

/// Splits `uniform float a, b;` into its qualifier words, type and names.
fn parse_declaration(line: &str) -> Option<(Vec<&str>, &str, &str, Vec<&str>)> {
    let code = line.split("//").next().unwrap_or(line).trim();
    let code = code.strip_suffix(';')?.trim();
    let mut words = code
        .split_whitespace()
        .filter(|word| !PRECISION_WORDS.contains(word))
        .peekable();

    let mut interpolation = Vec::new();
    while let Some(word) = words.peek() {
        if INTERPOLATION_WORDS.contains(word) {
            interpolation.push(*word);
            words.next();
        } else {
            break;
        }
    }
    let storage = words.next()?;
    if !matches!(storage, "uniform" | "in" | "out") {
        return None;
    }
    let ty = words.next()?;
    let names: Vec<&str> = words
        .flat_map(|word| word.split(','))
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .collect();
    if names.is_empty() {
        return None;
    }
    Some((interpolation, storage, ty, names))
}

fn scan_stage(source: &str) -> Result<StageScan, WrapError> {
    let mut scan = StageScan::default();
    let mut depth = 0i32;
    for line in source.lines() {
        let trimmed = line.trim_start();
        let at_global_scope = depth == 0;
        depth += line.matches('{').count() as i32 - line.matches('}').count() as i32;

        if trimmed.starts_with("#version") || trimmed.starts_with("precision ") {
            continue;
        }
        if !at_global_scope || trimmed.starts_with("layout") {
            scan.body.push(BodyLine::Text(line.to_string()));
            continue;
        }
        let Some((interpolation, storage, ty, names)) = parse_declaration(trimmed) else {
            scan.body.push(BodyLine::Text(line.to_string()));
            continue;
        };

        match storage {
            "uniform" => {
                for declarator in names {
                    let name = base_name(declarator);
                    match ty {
                        "sampler2D" => push_unique(&mut scan.samplers, name),
                        _ if BUILTIN_UNIFORMS.contains(&name) => {}
                        "float" => push_unique(&mut scan.floats, name),
                        other => {
                            return Err(WrapError::UnsupportedUniform {
                                name: name.to_string(),
                                ty: other.to_string(),
                            })
                        }
                    }
                }
            }
            direction => {
                let direction = if direction == "in" {
                    Direction::In
                } else {
                    Direction::Out
                };
                for declarator in names {
                    scan.body.push(BodyLine::Varying {
                        direction,
                        interpolation: interpolation.join(" "),
                        ty: ty.to_string(),
                        declarator: declarator.to_string(),
                    });
                }
            }
        }
    }
    Ok(scan)
}

fn attribute_location(kind: VertexKind, name: &str) -> Result<u32, WrapError> {
    match (kind, name) {
        (VertexKind::Quad, "vertices") => Ok(0),
        (VertexKind::Quad, "vertexTexCoords") => Ok(1),
        (VertexKind::IntegerArray(_), "vertexId") => Ok(0),
        (VertexKind::Quad, _) => Err(WrapError::UnknownAttribute {
            name: name.to_string(),
            source_kind: "the quad vertex source",
        }),
        (VertexKind::IntegerArray(_), _) => Err(WrapError::UnknownAttribute {
            name: name.to_string(),
            source_kind: "the integer array vertex source",
        }),
    }
}

fn write_header(out: &mut String, samplers: &[String], uniforms: &[String]) {
    out.push_str(HEADER);
    for (slot, name) in uniforms.iter().enumerate() {
        let component = ["x", "y", "z", "w"][slot % 4];
        let _ = writeln!(out, "#define {name} ubo._user[{}].{component}", slot / 4);
    }
    for (index, name) in samplers.iter().enumerate() {
        let _ = writeln!(
            out,
            "layout(set = 1, binding = {}) uniform texture2D viz_texture{index};",
            index * 2
        );
        let _ = writeln!(
            out,
            "layout(set = 1, binding = {}) uniform sampler viz_sampler{index};",
            index * 2 + 1
        );
        let _ = writeln!(
            out,
            "#define {name} sampler2D(viz_texture{index}, viz_sampler{index})"
        );
    }
}

fn write_varying(out: &mut String, location: u32, line: &BodyLine) {
    if let BodyLine::Varying {
        direction,
        interpolation,
        ty,
        declarator,
    } = line
    {
        let storage = match direction {
            Direction::In => "in",
            Direction::Out => "out",
        };
        let interpolation = if interpolation.is_empty() {
            String::new()
        } else {
            format!("{interpolation} ")
        };
        let _ = writeln!(
            out,
            "layout(location = {location}) {interpolation}{storage} {ty} {declarator};"
        );
    }
}

/// Rewrites both stages of `desc`.
pub(crate) fn wrap_program(desc: &ProgramDesc) -> Result<WrappedProgram, WrapError> {
    let vertex_scan = scan_stage(&desc.vertex_source)?;
    let fragment_scan = scan_stage(&desc.fragment_source)?;

    let mut samplers = desc.samplers.clone();
    let mut uniforms = desc.uniforms.clone();
    for scan in [&vertex_scan, &fragment_scan] {
        for name in &scan.samplers {
            push_unique(&mut samplers, name);
        }
        for name in &scan.floats {
            push_unique(&mut uniforms, name);
        }
    }
    if samplers.len() > MAX_SAMPLERS {
        return Err(WrapError::TooManySamplers {
            count: samplers.len(),
        });
    }
    if uniforms.len() > MAX_USER_UNIFORMS {
        return Err(WrapError::TooManyUniforms {
            count: uniforms.len(),
        });
    }

    let mut varyings: BTreeMap<String, u32> = BTreeMap::new();

    let mut vertex = String::new();
    write_header(&mut vertex, &samplers, &uniforms);
    vertex.push_str("#define main viz_main\n#line 1\n");
    for line in &vertex_scan.body {
        match line {
            BodyLine::Text(text) => {
                vertex.push_str(text);
                vertex.push('\n');
            }
            BodyLine::Varying {
                direction: Direction::In,
                declarator,
                ..
            } => {
                let location = attribute_location(desc.vertex_kind, base_name(declarator))?;
                write_varying(&mut vertex, location, line);
            }
            BodyLine::Varying {
                direction: Direction::Out,
                declarator,
                ..
            } => {
                let location = varyings.len() as u32;
                varyings.insert(base_name(declarator).to_string(), location);
                write_varying(&mut vertex, location, line);
            }
        }
    }
    vertex.push_str(VERTEX_FOOTER);

    let mut fragment = String::new();
    write_header(&mut fragment, &samplers, &uniforms);
    fragment.push_str(FRAGMENT_PRELUDE);
    fragment.push_str("#define main viz_main\n#line 1\n");
    let mut next_unmatched = varyings.len() as u32;
    let mut next_output = 0u32;
    for line in &fragment_scan.body {
        match line {
            BodyLine::Text(text) => {
                fragment.push_str(text);
                fragment.push('\n');
            }
            BodyLine::Varying {
                direction: Direction::In,
                declarator,
                ..
            } => {
                let location = match varyings.get(base_name(declarator)) {
                    Some(location) => *location,
                    None => {
                        next_unmatched += 1;
                        next_unmatched - 1
                    }
                };
                write_varying(&mut fragment, location, line);
            }
            BodyLine::Varying {
                direction: Direction::Out,
                ..
            } => {
                write_varying(&mut fragment, next_output, line);
                next_output += 1;
            }
        }
    }
    fragment.push_str(FRAGMENT_FOOTER);

    Ok(WrappedProgram {
        vertex,
        fragment,
        samplers,
        uniforms,
    })
}

/// Compiles one wrapped stage, capturing validation errors instead of
/// letting them reach the device's uncaptured error handler.
pub(crate) fn create_module(
    device: &wgpu::Device,
    label: &str,
    source: &str,
    stage: ShaderStage,
) -> Result<wgpu::ShaderModule, String> {
    tracing::trace!(label, ?stage, source, "compiling wrapped shader");
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Glsl {
            shader: Cow::Owned(source.to_string()),
            stage,
            defines: &[],
        },
    });
    match pollster::block_on(device.pop_error_scope()) {
        Some(err) => Err(err.to_string()),
        None => Ok(module),
    }
}

/// Uniform block shared by both stages. Layout must match `VizUniforms`.
const HEADER: &str = r"#version 450
layout(std140, set = 0, binding = 0) uniform VizParams {
    vec2 _resolution;
    float _time;
    float _randomseed;
    float _randomrun;
    int _frame;
    float _flip_y;
    float _padding0;
    vec4 _user[8];
} ubo;

#define resolution ubo._resolution
#define time ubo._time
#define randomseed ubo._randomseed
#define randomrun ubo._randomrun
#define frame ubo._frame
";

/// Offscreen targets are drawn upside down so that sampled buffers keep a
/// bottom-left origin.
const VERTEX_FOOTER: &str = r"
#undef main
void main() {
    viz_main();
    gl_Position = vec4(gl_Position.x, gl_Position.y * ubo._flip_y, gl_Position.zw);
}
";

const FRAGMENT_PRELUDE: &str = r"
vec4 viz_frag_coord;
#define gl_FragCoord viz_frag_coord
";

const FRAGMENT_FOOTER: &str = r"
#undef main
void main() {
    #undef gl_FragCoord
    vec4 builtin_coord = gl_FragCoord;
    #define gl_FragCoord viz_frag_coord
    viz_frag_coord = builtin_coord;
    if (ubo._flip_y > 0.0) {
        viz_frag_coord.y = ubo._resolution.y - builtin_coord.y;
    }
    viz_main();
}
";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::Primitive;
    use crate::shaders::BuiltinShader;

    fn desc(vertex: &str, fragment: &str, kind: VertexKind) -> ProgramDesc {
        ProgramDesc {
            label: "test".into(),
            vertex_source: vertex.into(),
            fragment_source: fragment.into(),
            vertex_kind: kind,
            samplers: Vec::new(),
            uniforms: Vec::new(),
        }
    }

    #[test]
    fn builtin_crossfade_binds_both_buffers_and_fade_level() {
        let mut desc = desc(
            BuiltinShader::QuadVertex.source(),
            BuiltinShader::CrossfadeFragment.source(),
            VertexKind::Quad,
        );
        desc.samplers = vec!["oldBuffer".into(), "newBuffer".into()];
        desc.uniforms = vec!["fadeLevel".into()];
        let wrapped = wrap_program(&desc).unwrap();

        assert_eq!(wrapped.samplers, vec!["oldBuffer", "newBuffer"]);
        assert_eq!(wrapped.uniforms, vec!["fadeLevel"]);
        assert!(wrapped.fragment.contains("#define fadeLevel ubo._user[0].x"));
        assert!(wrapped
            .fragment
            .contains("#define newBuffer sampler2D(viz_texture1, viz_sampler1)"));
        assert!(!wrapped.fragment.contains("uniform sampler2D"));
        assert!(!wrapped.fragment.contains("uniform float fadeLevel"));
        assert!(wrapped
            .vertex
            .contains("layout(location = 0) in vec3 vertices;"));
        assert!(wrapped
            .vertex
            .contains("layout(location = 1) in vec2 vertexTexCoords;"));
        assert!(wrapped
            .fragment
            .contains("layout(location = 0) in vec2 fragCoord;"));
        assert!(wrapped
            .fragment
            .contains("layout(location = 0) out vec4 fragColor;"));
        assert_eq!(wrapped.vertex.matches("#version").count(), 1);
    }

    #[test]
    fn varyings_are_matched_by_name() {
        let vertex = "#version 450\nin float vertexId;\nout float glow;\nout vec2 position;\nvoid main() {\n    gl_Position = vec4(0.0);\n}\n";
        let fragment = "in vec2 position;\nin float glow;\nout vec4 color;\nvoid main() { color = vec4(glow); }\n";
        let wrapped = wrap_program(&desc(
            vertex,
            fragment,
            VertexKind::IntegerArray(Primitive::Points),
        ))
        .unwrap();
        assert!(wrapped
            .vertex
            .contains("layout(location = 0) in float vertexId;"));
        assert!(wrapped
            .fragment
            .contains("layout(location = 1) in vec2 position;"));
        assert!(wrapped
            .fragment
            .contains("layout(location = 0) in float glow;"));
    }

    #[test]
    fn declared_floats_extend_configured_uniforms() {
        let fragment = "uniform float decay, gain;\nuniform float time;\nout vec4 c;\nvoid main() { c = vec4(decay * gain * time); }\n";
        let mut desc = desc(BuiltinShader::QuadVertex.source(), fragment, VertexKind::Quad);
        desc.uniforms = vec!["gain".into()];
        let wrapped = wrap_program(&desc).unwrap();
        assert_eq!(wrapped.uniforms, vec!["gain", "decay"]);
        assert!(wrapped.fragment.contains("#define decay ubo._user[0].y"));
    }

    #[test]
    fn rejects_unknown_attribute_and_unsupported_uniform() {
        let vertex = "in vec3 normals;\nvoid main() {}\n";
        let err = wrap_program(&desc(vertex, "void main() {}", VertexKind::Quad)).unwrap_err();
        assert!(matches!(err, WrapError::UnknownAttribute { ref name, .. } if name == "normals"));

        let fragment = "uniform vec3 tint;\nvoid main() {}\n";
        let err = wrap_program(&desc(
            BuiltinShader::QuadVertex.source(),
            fragment,
            VertexKind::Quad,
        ))
        .unwrap_err();
        assert_eq!(
            err,
            WrapError::UnsupportedUniform {
                name: "tint".into(),
                ty: "vec3".into()
            }
        );
    }

    #[test]
    fn declarations_inside_blocks_are_left_alone() {
        let fragment = "struct Wave {\n    float amplitude;\n};\nout vec4 c;\nvoid main() {\n    float in_value = 1.0;\n    c = vec4(in_value);\n}\n";
        let wrapped = wrap_program(&desc(
            BuiltinShader::QuadVertex.source(),
            fragment,
            VertexKind::Quad,
        ))
        .unwrap();
        assert!(wrapped.fragment.contains("    float amplitude;"));
        assert!(wrapped.uniforms.is_empty());
    }
}
