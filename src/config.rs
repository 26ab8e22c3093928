use crate::delta::READ_BUFFER_SIZE;
use crate::error::{Result, ZsyncError};
use crate::transport::range::MAX_RANGES_PER_REQUEST;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Smallest read-ahead buffer accepted for candidate scanning
pub const MIN_READ_BUFFER_SIZE: usize = 4096;

/// Settings from `config.toml`
///
/// ```toml
/// [http]
/// user_agent = "rzsync/0.1"
/// timeout_secs = 60
/// max_ranges_per_request = 100
///
/// [scan]
/// read_buffer_size = 1048576
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub http: HttpConfig,
    pub scan: ScanConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HttpConfig {
    pub user_agent: String,
    /// Per-request timeout, 0 disables it
    pub timeout_secs: u64,
    pub max_ranges_per_request: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("rzsync/{}", env!("CARGO_PKG_VERSION")),
            timeout_secs: 60,
            max_ranges_per_request: MAX_RANGES_PER_REQUEST,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScanConfig {
    pub read_buffer_size: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: READ_BUFFER_SIZE,
        }
    }
}

impl Config {
    /// Load from `path`, or from the default location if `path` is `None`
    ///
    /// A missing default file yields the defaults; a missing explicit file is
    /// an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::load_from(path)?,
            None => match Self::config_path() {
                Some(path) if path.exists() => Self::load_from(&path)?,
                _ => Self::default(),
            },
        };
        config.validate()?;
        Ok(config)
    }

    fn load_from(path: &Path) -> Result<Self> {
        tracing::debug!("Loading config from {}", path.display());
        let contents = fs::read_to_string(path).map_err(|e| {
            ZsyncError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        toml::from_str(&contents)
            .map_err(|e| ZsyncError::Config(format!("{}: {}", path.display(), e)))
    }

    /// `$XDG_CONFIG_HOME/rzsync/config.toml` or the platform equivalent
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("rzsync").join("config.toml"))
    }

    fn validate(&self) -> Result<()> {
        if self.http.max_ranges_per_request == 0 {
            return Err(ZsyncError::Config(
                "http.max_ranges_per_request must be at least 1".to_string(),
            ));
        }
        if self.scan.read_buffer_size < MIN_READ_BUFFER_SIZE {
            return Err(ZsyncError::Config(format!(
                "scan.read_buffer_size must be at least {} bytes",
                MIN_READ_BUFFER_SIZE
            )));
        }
        Ok(())
    }
}
