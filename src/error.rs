use std::path::PathBuf;

use thiserror::Error;

/// Crate-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Sysfs error [{}]: {source}", path.display())]
    Sysfs {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Mount error [{mountpoint}]: {reason}")]
    Mount { mountpoint: String, reason: String },

    #[error("Kernel module error [{module}]: {reason}")]
    Module { module: String, reason: String },

    #[error("Network error [{interface}]: {reason}")]
    Network { interface: String, reason: String },

    #[error("Application sync failed for mode {0}")]
    AppSync(String),

    #[error("No gadget backend is selected")]
    NoBackend,

    #[error("Gadget backend write sequence failed: {0}")]
    Backend(String),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub(crate) fn sysfs(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Sysfs {
            path: path.into(),
            source,
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, AppError>;
