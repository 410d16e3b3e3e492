//! XDG-compliant path resolution for map-mirror.

use std::path::{Path, PathBuf};

use miette::Diagnostic;
use thiserror::Error;

/// Errors from path resolution.
#[derive(Debug, Error, Diagnostic)]
pub enum PathError {
    #[error("cannot determine home directory")]
    #[diagnostic(
        code(map_mirror::paths::no_home),
        help("Set the HOME environment variable or pass --config and a state_file explicitly.")
    )]
    NoHome,

    #[error("failed to create directory: {path}")]
    #[diagnostic(
        code(map_mirror::paths::create_dir),
        help("Check that the parent directory exists and you have write permissions.")
    )]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

pub type PathResult<T> = std::result::Result<T, PathError>;

/// Global directories for map-mirror.
#[derive(Debug, Clone)]
pub struct MirrorPaths {
    /// `$XDG_CONFIG_HOME/map-mirror/`
    pub config_dir: PathBuf,
    /// `$XDG_STATE_HOME/map-mirror/`
    pub state_dir: PathBuf,
}

impl MirrorPaths {
    /// Resolve XDG directories from environment variables with standard fallbacks.
    pub fn resolve() -> PathResult<Self> {
        let home = std::env::var("HOME")
            .map(PathBuf::from)
            .map_err(|_| PathError::NoHome)?;

        let config_dir = std::env::var("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| home.join(".config"))
            .join("map-mirror");

        let state_dir = std::env::var("XDG_STATE_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| home.join(".local/state"))
            .join("map-mirror");

        Ok(Self {
            config_dir,
            state_dir,
        })
    }

    /// Rooted at an explicit directory instead of the environment.
    pub fn under(root: &Path) -> Self {
        Self {
            config_dir: root.join("config"),
            state_dir: root.join("state"),
        }
    }

    /// Create both directories. Idempotent.
    pub fn ensure_dirs(&self) -> PathResult<()> {
        for dir in [&self.config_dir, &self.state_dir] {
            create_dir(dir)?;
        }
        Ok(())
    }

    /// Default config file location.
    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join("config.toml")
    }

    /// Default state file for a source/target pairing.
    pub fn state_file(&self, source_map: &str, target_map: &str) -> PathBuf {
        self.state_dir.join(format!("{source_map}-{target_map}.json"))
    }
}

/// `create_dir_all` with a diagnostic error.
pub fn create_dir(dir: &Path) -> PathResult<()> {
    std::fs::create_dir_all(dir).map_err(|e| PathError::CreateDir {
        path: dir.display().to_string(),
        source: e,
    })
}
