use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::{deserialize_duration_opt, validate_uniforms, ConfigError};

/// What happens to the wrapped primary visualization once an FX chain runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrimaryPolicy {
    /// Keep rendering the primary every frame.
    #[default]
    Run,
    /// Each elapsed second raises the odds the primary is frozen.
    SnapClock,
    /// Freeze the primary after its first frame.
    Snapshot,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FxConfig {
    #[serde(skip)]
    pub name: String,
    #[serde(skip)]
    pub source_dir: Option<PathBuf>,
    pub fx: FxSection,
    #[serde(default)]
    pub uniforms: BTreeMap<String, f32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FxSection {
    #[serde(default)]
    pub description: Option<String>,
    /// Graph lines; drawbuffer 0 is the primary and may not be declared.
    pub passes: Vec<String>,
    #[serde(default)]
    pub primary_policy: PrimaryPolicy,
    /// Probability added per elapsed second under [`PrimaryPolicy::SnapClock`].
    #[serde(default = "default_snapclock_step")]
    pub snapclock_step: f32,
    /// Overrides the application crossfade when this FX is applied.
    #[serde(default, deserialize_with = "deserialize_duration_opt")]
    pub crossfade: Option<Duration>,
    #[serde(default)]
    pub render_resolution_limit: Option<u32>,
}

fn default_snapclock_step() -> f32 {
    0.1
}

impl FxConfig {
    pub fn from_toml_str(name: &str, input: &str) -> Result<Self, ConfigError> {
        let mut raw: FxConfig = toml::from_str(input)?;
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

    pub fn validate(&self) -> Result<(), ConfigError> {
        let name = &self.name;
        if self.fx.passes.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "fx '{name}' must declare at least one pass"
            )));
        }
        if !(self.fx.snapclock_step > 0.0 && self.fx.snapclock_step <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "fx '{name}' snapclock_step must be within (0, 1]"
            )));
        }
        if self.fx.render_resolution_limit == Some(0) {
            return Err(ConfigError::Invalid(format!(
                "fx '{name}' render_resolution_limit must be greater than zero"
            )));
        }
        validate_uniforms(&format!("fx '{name}'"), &self.uniforms)
    }
}
