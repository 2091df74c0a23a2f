//! Daemon configuration
//!
//! The static configuration is a TOML file; every section falls back to
//! defaults matching a stock device layout.

mod schema;
pub mod store;

pub use schema::{
    AndroidConfig, AppConfig, BackendKind, GadgetConfig, ModesConfig, NetworkConfig,
    StorageConfig,
};
pub use store::{config_path, load, DEFAULT_CONFIG_PATH};
