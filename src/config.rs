//! Mirror configuration, persisted as TOML.

use std::path::{Path, PathBuf};
use std::time::Duration;

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::paths::MirrorPaths;
use crate::reconcile::MirrorSettings;

/// Errors from configuration files.
#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("failed to read config: {path}")]
    #[diagnostic(
        code(map_mirror::config::read),
        help("Ensure the config file exists, or create one with `map-mirror init`.")
    )]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {path}")]
    #[diagnostic(
        code(map_mirror::config::parse),
        help("Check the TOML syntax in the config file.")
    )]
    Parse { path: String, message: String },

    #[error("failed to write config: {path}")]
    #[diagnostic(
        code(map_mirror::config::write),
        help("Ensure you have write permissions to the config directory.")
    )]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Which maps to mirror and how.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MirrorConfig {
    /// Source map identifier.
    pub source_map: String,
    /// Target map identifier.
    pub target_map: String,
    /// JSON snapshot backing the source map.
    pub source_snapshot: PathBuf,
    /// JSON snapshot backing the target map.
    pub target_snapshot: PathBuf,
    /// JSON-lines journal of source events.
    pub journal: PathBuf,
    /// Overrides the default state file under the XDG state directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_file: Option<PathBuf>,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Clip buffer around assignment boundaries, in map units.
    #[serde(default = "default_crop_beyond")]
    pub crop_beyond: f64,
    #[serde(default = "default_boundary_stroke")]
    pub boundary_stroke: String,
    #[serde(default = "default_boundary_width")]
    pub boundary_width: f64,
    #[serde(default = "default_boundary_opacity")]
    pub boundary_opacity: f64,
}

fn default_poll_interval_secs() -> u64 {
    5
}
fn default_crop_beyond() -> f64 {
    MirrorSettings::default().crop_beyond
}
fn default_boundary_stroke() -> String {
    MirrorSettings::default().boundary_stroke
}
fn default_boundary_width() -> f64 {
    MirrorSettings::default().boundary_width
}
fn default_boundary_opacity() -> f64 {
    MirrorSettings::default().boundary_opacity
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            source_map: "source".into(),
            target_map: "target".into(),
            source_snapshot: "source.json".into(),
            target_snapshot: "target.json".into(),
            journal: "events.jsonl".into(),
            state_file: None,
            poll_interval_secs: default_poll_interval_secs(),
            crop_beyond: default_crop_beyond(),
            boundary_stroke: default_boundary_stroke(),
            boundary_width: default_boundary_width(),
            boundary_opacity: default_boundary_opacity(),
        }
    }
}

impl MirrorConfig {
    /// Load from a TOML file.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    /// Save to a TOML file, creating parent directories.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let content = toml::to_string_pretty(self).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.display().to_string(),
                source: e,
            })?;
        }
        std::fs::write(path, content).map_err(|e| ConfigError::Write {
            path: path.display().to_string(),
            source: e,
        })
    }

    /// Drawing and clipping tunables for the engine.
    pub fn settings(&self) -> MirrorSettings {
        MirrorSettings {
            crop_beyond: self.crop_beyond,
            boundary_stroke: self.boundary_stroke.clone(),
            boundary_width: self.boundary_width,
            boundary_opacity: self.boundary_opacity,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// The configured state file, or the per-pairing default under `paths`.
    pub fn state_path(&self, paths: &MirrorPaths) -> PathBuf {
        self.state_file
            .clone()
            .unwrap_or_else(|| paths.state_file(&self.source_map, &self.target_map))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let cfg: MirrorConfig = toml::from_str(
            r#"
            source_map = "SAR-1"
            target_map = "SAR-1-ops"
            source_snapshot = "src.json"
            target_snapshot = "tgt.json"
            journal = "events.jsonl"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.poll_interval(), Duration::from_secs(5));
        assert_eq!(cfg.settings(), MirrorSettings::default());
        assert!(cfg.state_file.is_none());
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let cfg = MirrorConfig {
            crop_beyond: 0.002,
            state_file: Some("state.json".into()),
            ..Default::default()
        };
        cfg.save(&path).unwrap();
        assert_eq!(MirrorConfig::load(&path).unwrap(), cfg);
    }

    #[test]
    fn state_path_defaults_to_pairing() {
        let paths = MirrorPaths::under(Path::new("/x"));
        let cfg = MirrorConfig::default();
        assert_eq!(cfg.state_path(&paths), PathBuf::from("/x/state/source-target.json"));
    }

    #[test]
    fn bad_toml_is_parse_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "source_map = ").unwrap();
        assert!(matches!(MirrorConfig::load(&path), Err(ConfigError::Parse { .. })));
    }
}
