//! Configuration loading

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

/// Tool configuration, loaded from TOML
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Delta build settings
    #[serde(default)]
    pub build: BuildConfig,

    /// Path configuration
    #[serde(default)]
    pub paths: PathsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Number of parallel diff workers
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Attempts per file before a build aborts
    #[serde(default = "default_retries")]
    pub retries: u32,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            retries: default_retries(),
        }
    }
}

/// Path configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Root for scratch trees; system temp when unset
    #[serde(default)]
    pub scratch_dir: Option<PathBuf>,
}

fn default_workers() -> usize {
    worker_count()
}

fn default_retries() -> u32 {
    3
}

/// Default diff parallelism: one core left for the host, capped at 8
pub fn worker_count() -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(4);
    cpus.saturating_sub(1).clamp(1, 8)
}

impl Config {
    /// Load configuration from an explicit path or the default location
    ///
    /// An explicitly named file must exist; the default location is
    /// optional and falls back to built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            if !path.exists() {
                bail!("Config file not found: {}", path.display());
            }
            return Self::read(path);
        }

        match default_config_path() {
            Some(path) if path.exists() => Self::read(&path),
            _ => Ok(Self::default()),
        }
    }

    fn read(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config: {}", path.display()))
    }
}

fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "updelta")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(config.build.workers >= 1);
        assert!(config.build.workers <= 8);
        assert_eq!(config.build.retries, 3);
        assert!(config.paths.scratch_dir.is_none());
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: Config = toml::from_str("[build]\nworkers = 2\n").unwrap();
        assert_eq!(config.build.workers, 2);
        assert_eq!(config.build.retries, 3);
    }

    #[test]
    fn test_load_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "[build]\nretries = 5\n[paths]\nscratch_dir = \"/tmp/updelta-scratch\"\n",
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.build.retries, 5);
        assert_eq!(
            config.paths.scratch_dir.as_deref(),
            Some(Path::new("/tmp/updelta-scratch"))
        );
    }

    #[test]
    fn test_load_explicit_missing_file_fails() {
        assert!(Config::load(Some(Path::new("/nonexistent/updelta.toml"))).is_err());
    }

    #[test]
    fn test_worker_count_bounds() {
        let workers = worker_count();
        assert!((1..=8).contains(&workers));
    }
}
