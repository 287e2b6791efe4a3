use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::Deserialize;
use thiserror::Error;

/// Environment variable pointing at a YAML configuration file.
pub const CONFIG_ENV: &str = "WUI_CONFIG";

const DEFAULT_LOG_FILTER: &str = "info";
const DEFAULT_READ_CHUNK: usize = 4096;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read bridge config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("unable to determine data directory")]
    DataDir,
}

/// Where native application logic runs relative to the script host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionModel {
    /// Native logic and the script host share the UI thread.
    #[default]
    CoLocated,
    /// Native logic runs on a worker thread; calls are queued.
    Split,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub execution: ExecutionModel,
    /// Bound for blocking script→native round trips. `None` waits forever.
    pub call_timeout_ms: Option<u64>,
    /// Root directory for `ContentSource::Resource` addressing.
    pub resource_root: Option<PathBuf>,
    pub log_filter: String,
    /// Size of the buffer hosts use when streaming a resource.
    pub read_chunk_size: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            execution: ExecutionModel::default(),
            call_timeout_ms: None,
            resource_root: None,
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            read_chunk_size: DEFAULT_READ_CHUNK,
        }
    }
}

impl BridgeConfig {
    /// Load configuration from `config_path`, falling back to defaults when
    /// no path is given or the file does not exist.
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        match config_path {
            Some(path) if path.exists() => Self::from_file(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load configuration from the file named by `WUI_CONFIG`, if any.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(std::env::var(CONFIG_ENV).ok().map(PathBuf::from))
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        let mut config: BridgeConfig = serde_yaml::from_str(contents)?;
        if config.read_chunk_size == 0 {
            config.read_chunk_size = DEFAULT_READ_CHUNK;
        }
        Ok(config)
    }

    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout_ms.map(Duration::from_millis)
    }

    /// Resource root to use for `Resource`/`Standard` addressing.
    ///
    /// Defaults to a `resources` directory next to the running executable.
    pub fn resource_root(&self) -> PathBuf {
        if let Some(root) = &self.resource_root {
            return root.clone();
        }
        std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(|dir| dir.join("resources")))
            .unwrap_or_else(|| PathBuf::from("resources"))
    }

    /// Per-user data directory for the application named `app_name`.
    pub fn data_dir(app_name: &str) -> Result<PathBuf, ConfigError> {
        let dirs = ProjectDirs::from("", "", app_name).ok_or(ConfigError::DataDir)?;
        Ok(dirs.data_dir().to_path_buf())
    }
}
