use std::path::{Path, PathBuf};

use crate::{AppConfig, ConfigError, FxConfig, VizConfig};

/// Resolves names to files across the configured search paths.
///
/// The first directory containing a match wins, so earlier entries shadow
/// later ones.
#[derive(Debug, Clone, Default)]
pub struct Library {
    visualizer_paths: Vec<PathBuf>,
    fx_paths: Vec<PathBuf>,
}

impl Library {
    pub fn new(visualizer_paths: Vec<PathBuf>, fx_paths: Vec<PathBuf>) -> Self {
        Self {
            visualizer_paths,
            fx_paths,
        }
    }

    pub fn from_app(config: &AppConfig) -> Self {
        Self::new(config.visualizer_paths.clone(), config.fx_paths.clone())
    }

    pub fn load_visualizer(&self, name: &str) -> Result<VizConfig, ConfigError> {
        let path = find_config(&self.visualizer_paths, name).ok_or_else(|| {
            ConfigError::NotFound {
                kind: "visualization",
                name: name.to_string(),
            }
        })?;
        tracing::debug!(viz = name, path = %path.display(), "loading visualization config");
        VizConfig::load(&path)
    }

    pub fn load_fx(&self, name: &str) -> Result<FxConfig, ConfigError> {
        let path = find_config(&self.fx_paths, name).ok_or_else(|| ConfigError::NotFound {
            kind: "fx",
            name: name.to_string(),
        })?;
        tracing::debug!(fx = name, path = %path.display(), "loading fx config");
        FxConfig::load(&path)
    }

    /// Locates a shader file. Absolute paths are taken as-is; relative names
    /// are tried against `relative_to` first, then the visualizer and FX paths.
    pub fn find_shader(&self, name: &str, relative_to: Option<&Path>) -> Option<PathBuf> {
        let candidate = Path::new(name);
        if candidate.is_absolute() {
            return candidate.is_file().then(|| candidate.to_path_buf());
        }
        relative_to
            .into_iter()
            .chain(self.visualizer_paths.iter().map(PathBuf::as_path))
            .chain(self.fx_paths.iter().map(PathBuf::as_path))
            .map(|dir| dir.join(candidate))
            .find(|path| path.is_file())
    }
}

fn find_config(roots: &[PathBuf], name: &str) -> Option<PathBuf> {
    let file_name = if name.ends_with(".toml") {
        name.to_string()
    } else {
        format!("{name}.toml")
    };
    roots
        .iter()
        .map(|root| root.join(&file_name))
        .find(|path| path.is_file())
}
