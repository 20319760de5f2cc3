use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::{deserialize_duration, ConfigError};

/// Process-wide settings loaded from `vizhat.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub visualizer_paths: Vec<PathBuf>,
    #[serde(default)]
    pub fx_paths: Vec<PathBuf>,
    #[serde(
        default = "default_crossfade",
        deserialize_with = "deserialize_duration"
    )]
    pub crossfade_duration: Duration,
    #[serde(default)]
    pub render_resolution_limit: Option<u32>,
    #[serde(default = "default_shader_cache_size")]
    pub shader_cache_size: usize,
    #[serde(default)]
    pub startup_visualizer: Option<String>,
    #[serde(default)]
    pub window_size: Option<[u32; 2]>,
    /// Replaces the built-in crossfade blend fragment shader.
    #[serde(default)]
    pub crossfade_shader: Option<PathBuf>,
}

fn default_crossfade() -> Duration {
    Duration::from_secs(2)
}

fn default_shader_cache_size() -> usize {
    150
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            visualizer_paths: Vec::new(),
            fx_paths: Vec::new(),
            crossfade_duration: default_crossfade(),
            render_resolution_limit: None,
            shader_cache_size: default_shader_cache_size(),
            startup_visualizer: None,
            window_size: None,
            crossfade_shader: None,
        }
    }
}

impl AppConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let raw: AppConfig = toml::from_str(input)?;
        raw.validate()?;
        Ok(raw)
    }

    /// Loads the file and rebases relative search paths onto its directory.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml_str(&text)?;
        if let Some(base) = path.parent() {
            config.rebase(base);
        }
        Ok(config)
    }

    fn rebase(&mut self, base: &Path) {
        let rebase = |paths: &mut Vec<PathBuf>| {
            for path in paths.iter_mut() {
                if path.is_relative() {
                    *path = base.join(&*path);
                }
            }
        };
        rebase(&mut self.visualizer_paths);
        rebase(&mut self.fx_paths);
        if let Some(shader) = self.crossfade_shader.as_mut() {
            if shader.is_relative() {
                *shader = base.join(&*shader);
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.shader_cache_size == 0 {
            return Err(ConfigError::Invalid(
                "shader_cache_size must be greater than zero".into(),
            ));
        }
        if self.render_resolution_limit == Some(0) {
            return Err(ConfigError::Invalid(
                "render_resolution_limit must be greater than zero".into(),
            ));
        }
        if let Some([width, height]) = self.window_size {
            if width == 0 || height == 0 {
                return Err(ConfigError::Invalid(format!(
                    "window_size {width}x{height} must be non-zero"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_app_config() {
        let config = AppConfig::from_toml_str(
            r#"
visualizer_paths = ["shaders", "/opt/viz"]
fx_paths = ["fx"]
crossfade_duration = "1500ms"
render_resolution_limit = 1920
shader_cache_size = 32
startup_visualizer = "idle"
window_size = [1280, 720]
"#,
        )
        .unwrap();
        assert_eq!(config.visualizer_paths.len(), 2);
        assert_eq!(config.crossfade_duration, Duration::from_millis(1500));
        assert_eq!(config.shader_cache_size, 32);
        assert_eq!(config.window_size, Some([1280, 720]));
    }

    #[test]
    fn numeric_crossfade_is_seconds() {
        let config = AppConfig::from_toml_str("crossfade_duration = 0\n").unwrap();
        assert!(config.crossfade_duration.is_zero());
        assert_eq!(config.shader_cache_size, 150);
    }

    #[test]
    fn rejects_zero_cache() {
        let err = AppConfig::from_toml_str("shader_cache_size = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn load_rebases_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vizhat.toml");
        std::fs::write(&path, "visualizer_paths = [\"viz\", \"/abs\"]\n").unwrap();
        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.visualizer_paths[0], dir.path().join("viz"));
        assert_eq!(config.visualizer_paths[1], PathBuf::from("/abs"));
    }
}
