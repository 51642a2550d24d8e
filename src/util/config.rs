//! Configuration file support for Frost.
//!
//! Two configuration file locations are consulted:
//! - Global: `~/.frost/config.toml` - User-wide defaults
//! - Project: `.frost/config.toml` - Project-specific overrides
//!
//! Project config takes precedence over global config.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Frost configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Build settings
    pub build: BuildConfig,

    /// Native loader settings
    pub loader: LoaderConfig,

    /// Hook settings
    pub hooks: HooksConfig,

    /// Python interpreter settings
    pub python: PythonConfig,
}

/// Build-related configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Directory for intermediate artifacts and build records
    pub workpath: Option<PathBuf>,

    /// Directory for final deliverables
    pub distpath: Option<PathBuf>,

    /// Strip binaries by default
    pub strip: bool,

    /// Compress binaries with UPX by default
    pub upx: bool,

    /// Directory containing the UPX executable
    pub upx_dir: Option<PathBuf>,

    /// Number of parallel jobs for binary processing (None = auto-detect)
    pub jobs: Option<usize>,
}

/// Native loader configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Root directory holding `<platform>/run*` stubs and bootstrap modules
    pub dir: Option<PathBuf>,

    /// File name of the Python runtime library the loader must open
    pub python_library: Option<String>,

    /// Python version as `major * 100 + minor` (e.g. 311)
    pub python_version: Option<u32>,
}

/// Hook configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HooksConfig {
    /// Additional hook directories, applied after the built-in hooks
    pub dirs: Vec<PathBuf>,
}

/// Python interpreter configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PythonConfig {
    /// Interpreter used to compile modules on demand
    pub interpreter: Option<PathBuf>,
}

impl Config {
    /// Load configuration from a file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;

        toml::from_str(&contents)
            .with_context(|| format!("failed to parse config file: {}", path.display()))
    }

    /// Load configuration with fallback to defaults if file doesn't exist.
    pub fn load_or_default(path: &Path) -> Self {
        if path.exists() {
            Self::load(path).unwrap_or_else(|e| {
                tracing::warn!("Failed to load config from {}: {}", path.display(), e);
                Self::default()
            })
        } else {
            Self::default()
        }
    }

    /// Merge another config into this one (other takes precedence).
    pub fn merge(&mut self, other: Config) {
        if other.build.workpath.is_some() {
            self.build.workpath = other.build.workpath;
        }
        if other.build.distpath.is_some() {
            self.build.distpath = other.build.distpath;
        }
        if other.build.strip {
            self.build.strip = true;
        }
        if other.build.upx {
            self.build.upx = true;
        }
        if other.build.upx_dir.is_some() {
            self.build.upx_dir = other.build.upx_dir;
        }
        if other.build.jobs.is_some() {
            self.build.jobs = other.build.jobs;
        }

        if other.loader.dir.is_some() {
            self.loader.dir = other.loader.dir;
        }
        if other.loader.python_library.is_some() {
            self.loader.python_library = other.loader.python_library;
        }
        if other.loader.python_version.is_some() {
            self.loader.python_version = other.loader.python_version;
        }

        // Hook directories accumulate: global ones first, project ones after.
        self.hooks.dirs.extend(other.hooks.dirs);

        if other.python.interpreter.is_some() {
            self.python.interpreter = other.python.interpreter;
        }
    }
}

/// Load merged configuration from global and project locations.
///
/// Order of precedence (highest to lowest):
/// 1. Project config (.frost/config.toml)
/// 2. Global config (~/.frost/config.toml)
/// 3. Defaults
pub fn load_config(global_path: &Path, project_path: &Path) -> Config {
    let mut config = Config::default();

    if global_path.exists() {
        config.merge(Config::load_or_default(global_path));
    }

    if project_path.exists() {
        config.merge(Config::load_or_default(project_path));
    }

    config
}
