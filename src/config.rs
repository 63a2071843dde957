use std::fs;
use std::path::{Path, PathBuf};

use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::QimbaError;
use crate::fs_util;
use crate::usearch;

pub const CONFIG_FILE_NAME: &str = "qimba.json";
pub const DEFAULT_THREADS: usize = 4;

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threads: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_output_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tmp_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,
    /// USEARCH executable name or path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usearch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_tab: Option<CheckTabSection>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct CheckTabSection {
    #[serde(default)]
    pub strict: Option<bool>,
}

impl Config {
    /// Values written when no configuration file exists yet.
    pub fn bootstrap_defaults() -> Self {
        Self {
            threads: Some(DEFAULT_THREADS),
            default_output_dir: Some(PathBuf::from(".")),
            tmp_dir: Some(std::env::temp_dir()),
            log_dir: None,
            usearch: None,
            check_tab: None,
        }
    }
}

/// Settings handed explicitly to the workflows and tool adapters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    pub threads: usize,
    pub output_dir: PathBuf,
    pub tmp_dir: PathBuf,
    /// Overrides the per-command log directory when set.
    pub log_dir: Option<PathBuf>,
    pub usearch: String,
    pub check_tab_strict: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            threads: DEFAULT_THREADS,
            output_dir: PathBuf::from("."),
            tmp_dir: std::env::temp_dir(),
            log_dir: None,
            usearch: usearch::DEFAULT_PROGRAM.to_string(),
            check_tab_strict: false,
        }
    }
}

impl RuntimeConfig {
    pub fn with_overrides(mut self, threads: Option<usize>, tmp_dir: Option<PathBuf>) -> Self {
        if let Some(threads) = threads.filter(|threads| *threads > 0) {
            self.threads = threads;
        }
        if let Some(tmp_dir) = tmp_dir {
            self.tmp_dir = tmp_dir;
        }
        self
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// `<user config dir>/qimba/qimba.json`.
    pub fn default_path() -> Result<PathBuf, QimbaError> {
        BaseDirs::new()
            .map(|dirs| dirs.config_dir().join("qimba").join(CONFIG_FILE_NAME))
            .ok_or_else(|| {
                QimbaError::Filesystem("unable to resolve configuration directory".to_string())
            })
    }

    /// Loads the configuration, writing a default file first if none exists.
    pub fn resolve(path: Option<&Path>) -> Result<RuntimeConfig, QimbaError> {
        let config_path = match path {
            Some(path) => path.to_path_buf(),
            None => Self::default_path()?,
        };

        if !config_path.exists() {
            let config = Self::bootstrap(&config_path)?;
            return Self::resolve_config(config);
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| QimbaError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| QimbaError::ConfigParse(err.to_string()))?;
        Self::resolve_config(config)
    }

    pub fn bootstrap(path: &Path) -> Result<Config, QimbaError> {
        let config = Config::bootstrap_defaults();
        let mut content = serde_json::to_vec_pretty(&config)
            .map_err(|err| QimbaError::ConfigParse(err.to_string()))?;
        content.push(b'\n');
        fs_util::write_atomic(path, &content)?;
        info!("created default configuration at {}", path.display());
        Ok(config)
    }

    pub fn resolve_config(config: Config) -> Result<RuntimeConfig, QimbaError> {
        let defaults = RuntimeConfig::default();
        let threads = config.threads.unwrap_or(defaults.threads);
        if threads == 0 {
            return Err(QimbaError::ConfigParse(
                "threads must be at least 1".to_string(),
            ));
        }
        Ok(RuntimeConfig {
            threads,
            output_dir: config.default_output_dir.unwrap_or(defaults.output_dir),
            tmp_dir: config.tmp_dir.unwrap_or(defaults.tmp_dir),
            log_dir: config.log_dir,
            usearch: config.usearch.unwrap_or(defaults.usearch),
            check_tab_strict: config
                .check_tab
                .and_then(|section| section.strict)
                .unwrap_or(false),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_uses_defaults() {
        let config: Config = serde_json::from_str(r#"{"threads": 8}"#).unwrap();
        let resolved = ConfigLoader::resolve_config(config).unwrap();
        assert_eq!(resolved.threads, 8);
        assert_eq!(resolved.output_dir, PathBuf::from("."));
        assert_eq!(resolved.usearch, "usearch");
        assert!(!resolved.check_tab_strict);
    }

    #[test]
    fn zero_threads_rejected() {
        let config = Config {
            threads: Some(0),
            ..Config::default()
        };
        assert!(ConfigLoader::resolve_config(config).is_err());
    }

    #[test]
    fn overrides_win() {
        let resolved = RuntimeConfig::default().with_overrides(Some(2), Some(PathBuf::from("/scratch")));
        assert_eq!(resolved.threads, 2);
        assert_eq!(resolved.tmp_dir, PathBuf::from("/scratch"));
    }
}
