//! Configuration file management for testshare.
//!
//! Provides a TOML-based config file at `~/.config/testshare/config.toml`
//! and a resolution chain: CLI flag > env var > config file > default.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use testshare_core::ShareConfig;

/// Log level used when neither the CLI nor the config file sets one.
pub const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file at {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file at {}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to serialize config")]
    Serialize(#[from] toml::ser::Error),

    #[error("failed to write {}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigFile {
    pub service: ServiceSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSection {
    /// Name the test explorer service is shared under.
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingSection {
    /// `tracing` filter directive, e.g. `info` or `testshare_core=debug`.
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

impl ConfigFile {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service: ServiceSection {
                name: service_name.into(),
            },
            logging: LoggingSection::default(),
        }
    }
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the testshare config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/testshare` or
/// `~/.config/testshare`, also on macOS.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("testshare");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("testshare")
}

pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

// -----------------------------------------------------------------------
// Read / write
// -----------------------------------------------------------------------

/// Load and parse the config file. Returns an error if it does not exist.
pub fn load_config() -> Result<ConfigFile, ConfigError> {
    load_config_from(&config_path())
}

pub fn load_config_from(path: &Path) -> Result<ConfigFile, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Serialize and write the config file, creating parent dirs as needed.
/// Sets file permissions to 0600 on Unix.
pub fn save_config(config: &ConfigFile) -> Result<(), ConfigError> {
    save_config_to(&config_path(), config)
}

pub fn save_config_to(path: &Path, config: &ConfigFile) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Write {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let contents = toml::to_string_pretty(config)?;
    std::fs::write(path, contents).map_err(|source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    })?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(path, perms).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })?;
    }

    Ok(())
}

// -----------------------------------------------------------------------
// Resolved config
// -----------------------------------------------------------------------

/// Fully resolved configuration, ready for use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub share: ShareConfig,
    pub log_level: String,
}

impl AppConfig {
    /// Resolve configuration using the chain: CLI flag > env var > config file > default.
    ///
    /// - Service name: `cli_service_name` > `TESTSHARE_SERVICE_NAME` env >
    ///   `service.name` > `ShareConfig::DEFAULT_SERVICE_NAME`
    /// - Log level: `cli_log_level` > `logging.level` > `info`
    ///
    /// A missing or unreadable config file is treated as absent.
    pub fn resolve(cli_service_name: Option<&str>, cli_log_level: Option<&str>) -> Self {
        let file_config = load_config().ok();
        Self::resolve_with(cli_service_name, cli_log_level, file_config.as_ref())
    }

    fn resolve_with(
        cli_service_name: Option<&str>,
        cli_log_level: Option<&str>,
        file_config: Option<&ConfigFile>,
    ) -> Self {
        let service_name = if let Some(name) = cli_service_name {
            name.to_string()
        } else if let Some(name) = std::env::var(ShareConfig::SERVICE_NAME_ENV)
            .ok()
            .filter(|s| !s.trim().is_empty())
        {
            name
        } else if let Some(cfg) = file_config {
            cfg.service.name.clone()
        } else {
            ShareConfig::DEFAULT_SERVICE_NAME.to_string()
        };

        let log_level = cli_log_level
            .map(str::to_string)
            .or_else(|| file_config.map(|cfg| cfg.logging.level.clone()))
            .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string());

        Self {
            share: ShareConfig::new(service_name),
            log_level,
        }
    }
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------
