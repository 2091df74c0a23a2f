use std::path::{Path, PathBuf};

use super::AppConfig;
use crate::error::{AppError, Result};

/// Default configuration file location
pub const DEFAULT_CONFIG_PATH: &str = "/etc/usbmode/usbmode.toml";

/// Environment variable overriding the configuration file location
pub const CONFIG_ENV: &str = "USBMODE_CONFIG";

/// Resolve which configuration file to read
///
/// An explicit path wins, then `USBMODE_CONFIG`, then the default location.
pub fn config_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    if let Ok(path) = std::env::var(CONFIG_ENV) {
        return PathBuf::from(path);
    }
    PathBuf::from(DEFAULT_CONFIG_PATH)
}

/// Parse configuration from TOML text
pub fn parse(text: &str) -> Result<AppConfig> {
    Ok(toml::from_str(text)?)
}

/// Load configuration from a file
///
/// A missing file yields the defaults; a present but malformed file is an
/// error.
pub fn load(path: &Path) -> Result<AppConfig> {
    match std::fs::read_to_string(path) {
        Ok(text) => parse(&text).map_err(|e| {
            AppError::Config(format!("{}: {}", path.display(), e))
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::info!(
                "Configuration {} not found, using defaults",
                path.display()
            );
            Ok(AppConfig::default())
        }
        Err(e) => Err(AppError::Io(e)),
    }
}
