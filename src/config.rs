use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::clean::CleanOptions;
use crate::sync::SyncError;
use crate::transform::TransformOptions;

pub const DEFAULT_CONFIG_FILE: &str = "scene-sync.toml";

/// Contents of `scene-sync.toml`. Every key is optional.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Editor asset tree being mirrored.
    pub watch_dir: PathBuf,
    /// Destination of the mirror.
    pub output_dir: PathBuf,
    /// Scripts under this subtree are rewritten into scene-bound functions.
    pub conversion_dir: Option<PathBuf>,
    /// Paths containing any of these substrings are neither mirrored nor watched.
    pub exclude_patterns: Vec<String>,
    pub debounce_ms: u64,
    /// Extensions the production cleanup keeps.
    pub keep_extensions: Vec<String>,
    /// Manifest of output-root paths removed by the production cleanup.
    pub manifest_name: String,
    pub transform: TransformOptions,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            watch_dir: PathBuf::from("public/assets"),
            output_dir: PathBuf::from("dist/assets"),
            conversion_dir: None,
            exclude_patterns: Vec::new(),
            debounce_ms: 200,
            keep_extensions: vec!["json".to_string()],
            manifest_name: "publicroot".to_string(),
            transform: TransformOptions::default(),
        }
    }
}

impl SyncConfig {
    pub fn load(path: &Path) -> Result<Self, SyncError> {
        let content = fs::read_to_string(path).map_err(|source| SyncError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: SyncConfig = toml::from_str(&content).map_err(|e| SyncError::Config {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Loads `path` when it exists, defaults otherwise.
    pub fn load_or_default(path: &Path) -> Result<Self, SyncError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Transform options with the top-level conversion directory applied.
    pub fn transform_options(&self) -> TransformOptions {
        let mut options = self.transform.clone();
        if self.conversion_dir.is_some() {
            options.conversion_dir = self.conversion_dir.clone();
        }
        options
    }

    pub fn clean_options(&self) -> CleanOptions {
        CleanOptions {
            keep_extensions: self.keep_extensions.clone(),
            manifest_name: self.manifest_name.clone(),
        }
    }

    pub fn is_excluded(&self, path: &Path) -> bool {
        let path = path.to_string_lossy();
        self.exclude_patterns
            .iter()
            .any(|pattern| !pattern.is_empty() && path.contains(pattern.as_str()))
    }
}
