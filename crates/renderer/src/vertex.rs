//! Vertex sources and the name registry used by config files.
//!
//! Visualization files name their vertex source by type (`VertexQuad`,
//! `VertexIntegerArray`); the registry maps those names to factories that
//! turn the accompanying settings into a [`VertexSource`].

use std::collections::{BTreeMap, HashMap};

use crate::gpu::{Primitive, VertexKind};

pub const QUAD_SOURCE: &str = "VertexQuad";
pub const INTEGER_ARRAY_SOURCE: &str = "VertexIntegerArray";

/// Parsed `key=value` settings attached to a vertex source.
pub type VertexSettings = BTreeMap<String, String>;

/// How vertices reach a pass's vertex stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VertexSource {
    /// Two-triangle strip covering the target.
    Quad,
    /// `count` vertices carrying only their index, assembled as `primitive`.
    IntegerArray { count: u32, primitive: Primitive },
}

impl VertexSource {
    pub fn kind(self) -> VertexKind {
        match self {
            VertexSource::Quad => VertexKind::Quad,
            VertexSource::IntegerArray { primitive, .. } => VertexKind::IntegerArray(primitive),
        }
    }

    pub fn vertex_count(self) -> u32 {
        match self {
            VertexSource::Quad => 4,
            VertexSource::IntegerArray { count, .. } => count,
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum VertexSourceError {
    #[error("unknown vertex source type '{0}'")]
    Unknown(String),
    #[error("vertex source '{0}' requires settings")]
    SettingsRequired(String),
    #[error("invalid settings for vertex source '{name}': {reason}")]
    InvalidSettings { name: String, reason: String },
}

type Factory = Box<dyn Fn(&VertexSettings) -> Result<VertexSource, String> + Send + Sync>;

struct Entry {
    requires_settings: bool,
    factory: Factory,
}

/// Startup-built map from vertex-source type names to factories.
pub struct VertexSourceRegistry {
    entries: HashMap<String, Entry>,
}

impl VertexSourceRegistry {
    pub fn empty() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Registry with the quad and integer-array sources.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(QUAD_SOURCE, false, |_| Ok(VertexSource::Quad));
        registry.register(INTEGER_ARRAY_SOURCE, true, integer_array);
        registry
    }

    /// Type names are matched case-insensitively.
    pub fn register<F>(&mut self, name: &str, requires_settings: bool, factory: F)
    where
        F: Fn(&VertexSettings) -> Result<VertexSource, String> + Send + Sync + 'static,
    {
        self.entries.insert(
            name.to_ascii_lowercase(),
            Entry {
                requires_settings,
                factory: Box::new(factory),
            },
        );
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(&name.to_ascii_lowercase())
    }

    pub fn requires_settings(&self, name: &str) -> bool {
        self.entries
            .get(&name.to_ascii_lowercase())
            .is_some_and(|entry| entry.requires_settings)
    }

    pub fn create(
        &self,
        name: &str,
        settings: &VertexSettings,
    ) -> Result<VertexSource, VertexSourceError> {
        let entry = self
            .entries
            .get(&name.to_ascii_lowercase())
            .ok_or_else(|| VertexSourceError::Unknown(name.to_string()))?;
        if entry.requires_settings && settings.is_empty() {
            return Err(VertexSourceError::SettingsRequired(name.to_string()));
        }
        (entry.factory)(settings).map_err(|reason| VertexSourceError::InvalidSettings {
            name: name.to_string(),
            reason,
        })
    }
}

impl Default for VertexSourceRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl std::fmt::Debug for VertexSourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.entries.keys().collect();
        names.sort();
        f.debug_struct("VertexSourceRegistry")
            .field("names", &names)
            .finish()
    }
}

fn integer_array(settings: &VertexSettings) -> Result<VertexSource, String> {
    let count = setting(settings, "VertexIntegerCount")
        .ok_or_else(|| "VertexIntegerCount is missing".to_string())?
        .parse::<u32>()
        .map_err(|err| format!("VertexIntegerCount: {err}"))?;
    if count == 0 {
        return Err("VertexIntegerCount must be at least 1".into());
    }
    let primitive = match setting(settings, "ArrayDrawingMode") {
        Some(mode) => mode.parse::<Primitive>()?,
        None => Primitive::Points,
    };
    Ok(VertexSource::IntegerArray { count, primitive })
}

fn setting<'a>(settings: &'a VertexSettings, key: &str) -> Option<&'a str> {
    settings
        .iter()
        .find(|(candidate, _)| candidate.eq_ignore_ascii_case(key))
        .map(|(_, value)| value.as_str())
}

/// Parses `key=value;key=value`. Blank segments are skipped.
pub fn parse_settings(text: &str) -> Result<VertexSettings, String> {
    let mut settings = VertexSettings::new();
    for segment in text.split(';') {
        let segment = segment.trim();
        if segment.is_empty() {
            continue;
        }
        let (key, value) = segment
            .split_once('=')
            .ok_or_else(|| format!("setting '{segment}' is not key=value"))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(format!("setting '{segment}' has an empty key"));
        }
        settings.insert(key.to_string(), value.trim().to_string());
    }
    Ok(settings)
}
