use std::env;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use directories_next::ProjectDirs;

pub const ENV_CONFIG_DIR: &str = "VIZHAT_CONFIG_DIR";

const QUALIFIER: &str = "org";
const ORGANISATION: &str = "vizhat";
const APPLICATION: &str = "vizhat";

/// User directories searched when no explicit config file is given.
#[derive(Debug, Clone)]
pub struct AppPaths {
    config_dir: PathBuf,
}

impl AppPaths {
    pub fn discover() -> Result<Self> {
        if let Some(dir) = env::var_os(ENV_CONFIG_DIR).filter(|value| !value.is_empty()) {
            return Ok(Self {
                config_dir: PathBuf::from(dir),
            });
        }
        let project_dirs = ProjectDirs::from(QUALIFIER, ORGANISATION, APPLICATION)
            .ok_or_else(|| anyhow!("failed to determine user directories"))?;
        Ok(Self {
            config_dir: project_dirs.config_dir().to_path_buf(),
        })
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join("vizhat.toml")
    }

    pub fn visualizer_dir(&self) -> PathBuf {
        self.config_dir.join("visualizers")
    }

    pub fn fx_dir(&self) -> PathBuf {
        self.config_dir.join("fx")
    }
}
