use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::{deserialize_string_map, validate_uniforms, ConfigError};

/// Vertex source used when a visualization does not name one.
pub const DEFAULT_VERTEX_SOURCE: &str = "VertexQuad";

/// One visualization definition loaded from `<name>.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct VizConfig {
    /// Lookup name (file stem); filled in by the loader.
    #[serde(skip)]
    pub name: String,
    /// Directory the file was loaded from, used to resolve relative shader paths.
    #[serde(skip)]
    pub source_dir: Option<PathBuf>,
    #[serde(default)]
    pub shader: ShaderSection,
    /// Free-form settings handed to the vertex source factory.
    #[serde(default, deserialize_with = "deserialize_string_map")]
    pub vertex_source: BTreeMap<String, String>,
    #[serde(default)]
    pub multipass: Option<MultipassSection>,
    /// Float uniforms applied to every pass of this visualization.
    #[serde(default)]
    pub uniforms: BTreeMap<String, f32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ShaderSection {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_vertex_source_name")]
    pub vertex_source: String,
    /// `None` (or `*`) selects the built-in pass-through vertex shader.
    #[serde(default)]
    pub vertex_shader: Option<String>,
    #[serde(default)]
    pub fragment_shader: Option<String>,
    /// Caps the larger render dimension; `None` renders at viewport size.
    #[serde(default)]
    pub render_resolution_limit: Option<u32>,
}

impl Default for ShaderSection {
    fn default() -> Self {
        Self {
            description: None,
            vertex_source: default_vertex_source_name(),
            vertex_shader: None,
            fragment_shader: None,
            render_resolution_limit: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MultipassSection {
    /// Ordered render-graph lines, one pass per entry.
    pub passes: Vec<String>,
}

fn default_vertex_source_name() -> String {
    DEFAULT_VERTEX_SOURCE.to_string()
}

impl VizConfig {
    pub fn from_toml_str(name: &str, input: &str) -> Result<Self, ConfigError> {
        let mut raw: VizConfig = toml::from_str(input)?;
        raw.name = name.to_string();
        raw.validate()?;
        Ok(raw)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let name = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or_default();
        let mut config = Self::from_toml_str(name, &text)?;
        config.source_dir = path.parent().map(Path::to_path_buf);
        Ok(config)
    }

    /// True when the file describes a render graph instead of a single shader.
    pub fn is_multipass(&self) -> bool {
        self.multipass.is_some()
    }

    pub fn passes(&self) -> &[String] {
        self.multipass
            .as_ref()
            .map(|section| section.passes.as_slice())
            .unwrap_or_default()
    }

    pub fn description(&self) -> &str {
        self.shader.description.as_deref().unwrap_or(&self.name)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let name = &self.name;
        if let Some(multipass) = &self.multipass {
            if multipass.passes.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "visualization '{name}' declares a multipass section without passes"
                )));
            }
            if multipass.passes.iter().any(|line| line.trim().is_empty()) {
                return Err(ConfigError::Invalid(format!(
                    "visualization '{name}' contains an empty multipass line"
                )));
            }
        } else if self
            .shader
            .fragment_shader
            .as_deref()
            .map_or(true, |frag| frag.trim().is_empty())
        {
            return Err(ConfigError::Invalid(format!(
                "visualization '{name}' must name a fragment_shader or declare [multipass] passes"
            )));
        }

        if self.shader.vertex_source.trim().is_empty() {
            return Err(ConfigError::Invalid(format!(
                "visualization '{name}' has an empty vertex_source type name"
            )));
        }

        if self.shader.render_resolution_limit == Some(0) {
            return Err(ConfigError::Invalid(format!(
                "visualization '{name}' render_resolution_limit must be greater than zero"
            )));
        }

        validate_uniforms(&format!("visualization '{name}'"), &self.uniforms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIMPLE: &str = r#"
[shader]
description = "Spiral of points"
vertex_source = "VertexIntegerArray"
vertex_shader = "spiral.vert"
fragment_shader = "spiral.frag"
render_resolution_limit = 1280

[vertex_source]
VertexIntegerCount = 4096
ArrayDrawingMode = "Points"

[uniforms]
speed = 0.5
"#;

    #[test]
    fn parses_single_shader_config() {
        let config = VizConfig::from_toml_str("spiral", SIMPLE).expect("parse config");
        assert_eq!(config.name, "spiral");
        assert!(!config.is_multipass());
        assert_eq!(config.shader.vertex_source, "VertexIntegerArray");
        assert_eq!(config.shader.render_resolution_limit, Some(1280));
        assert_eq!(
            config.vertex_source.get("VertexIntegerCount").map(String::as_str),
            Some("4096")
        );
        assert_eq!(config.uniforms.get("speed"), Some(&0.5));
        assert_eq!(config.description(), "Spiral of points");
    }

    #[test]
    fn parses_multipass_config_in_order() {
        let config = VizConfig::from_toml_str(
            "trails",
            r#"
[multipass]
passes = [
    "0 * A.vert A.frag",
    "1 0 B.vert B.frag",
    "2 1,A C.vert C.frag",
]
"#,
        )
        .unwrap();
        assert!(config.is_multipass());
        assert_eq!(config.passes().len(), 3);
        assert_eq!(config.passes()[2], "2 1,A C.vert C.frag");
        assert_eq!(config.shader.vertex_source, DEFAULT_VERTEX_SOURCE);
    }

    #[test]
    fn rejects_config_without_fragment_or_passes() {
        let err = VizConfig::from_toml_str("empty", "[shader]\ndescription = \"x\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_bad_uniform_names() {
        let err = VizConfig::from_toml_str(
            "bad",
            r#"
[shader]
fragment_shader = "a.frag"

[uniforms]
"2fast" = 1.0
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }
}
