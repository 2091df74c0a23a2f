//! USB gadget backends
//!
//! The kernel offers three ways to present a mode to the host. The backend is
//! chosen once at startup and never changes while the daemon runs.

pub mod android;
pub mod configfs;

use std::path::PathBuf;

use serde::Serialize;
use tracing::{error, info};

use crate::config::{AppConfig, BackendKind};
use crate::error::Result;
use crate::modes::ModeDefinition;
use crate::sysfs::SysfsIo;

pub use android::AndroidGadget;
pub use configfs::ConfigFsGadget;

/// Backend name for status output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendName {
    Configfs,
    Android,
    ExternalModule,
}

/// Selected gadget backend
#[derive(Debug, Clone)]
pub enum Backend {
    /// USB gadget ConfigFS
    ConfigFs(ConfigFsGadget),
    /// `android_usb` class driver
    Android(AndroidGadget),
    /// Gadget kernel modules loaded elsewhere
    ExternalModule,
}

impl Backend {
    /// Select the backend for this system
    ///
    /// An explicitly configured backend whose control files are missing
    /// yields `None`.
    pub fn probe(config: &AppConfig) -> Option<Self> {
        let configfs = ConfigFsGadget::is_available(&config.gadget);
        let android = AndroidGadget::is_available(&config.android);

        let backend = match config.gadget.backend {
            BackendKind::Auto if configfs => Self::configfs(config),
            BackendKind::Auto if android => Self::android(config),
            BackendKind::Auto | BackendKind::Modules => Self::ExternalModule,
            BackendKind::Configfs if configfs => Self::configfs(config),
            BackendKind::Android if android => Self::android(config),
            BackendKind::Configfs | BackendKind::Android => {
                error!(
                    "Configured gadget backend {:?} is not available",
                    config.gadget.backend
                );
                return None;
            }
        };

        info!("Using {:?} gadget backend", backend.name());
        Some(backend)
    }

    fn configfs(config: &AppConfig) -> Self {
        Self::ConfigFs(ConfigFsGadget::new(&config.gadget))
    }

    fn android(config: &AppConfig) -> Self {
        Self::Android(AndroidGadget::new(&config.android, &config.gadget.vendor_id))
    }

    pub fn name(&self) -> BackendName {
        match self {
            Self::ConfigFs(_) => BackendName::Configfs,
            Self::Android(_) => BackendName::Android,
            Self::ExternalModule => BackendName::ExternalModule,
        }
    }

    /// Function list attribute whose clearing is expected to fail
    pub fn function_list(&self) -> Option<PathBuf> {
        match self {
            Self::Android(gadget) => Some(gadget.config().functions_path()),
            _ => None,
        }
    }

    /// Program the gadget for a mode
    pub fn activate(&self, mode: &ModeDefinition, sysfs: &mut SysfsIo) -> Result<()> {
        match self {
            Self::ConfigFs(gadget) => gadget.activate(mode, sysfs),
            Self::Android(gadget) => gadget.activate(mode, sysfs),
            // Module already loaded from somewhere else
            Self::ExternalModule => Ok(()),
        }
    }

    /// Undo a mode's programming
    pub fn deactivate(&self, mode: &ModeDefinition, sysfs: &mut SysfsIo) {
        match self {
            // Reprogrammed on the next set
            Self::ConfigFs(_) => {}
            Self::Android(gadget) => gadget.deactivate(mode, sysfs),
            Self::ExternalModule => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn config_in(dir: &std::path::Path) -> AppConfig {
        let mut config = AppConfig::default();
        config.gadget.configfs_root = dir.join("g1");
        config.android.root = dir.join("android0");
        config
    }

    #[test]
    fn test_probe_auto_falls_back_to_modules() {
        let dir = tempdir().unwrap();
        let backend = Backend::probe(&config_in(dir.path())).unwrap();
        assert_eq!(backend.name(), BackendName::ExternalModule);
        assert_eq!(backend.function_list(), None);
    }

    #[test]
    fn test_probe_prefers_configfs() {
        let (_dir, gadget) = configfs::tests::gadget_tree();
        let (_adir, android) = android::tests::android_tree();
        let config = AppConfig {
            gadget,
            android,
            ..Default::default()
        };
        assert_eq!(
            Backend::probe(&config).unwrap().name(),
            BackendName::Configfs
        );
    }

    #[test]
    fn test_probe_android() {
        let dir = tempdir().unwrap();
        let (_adir, android) = android::tests::android_tree();
        let mut config = config_in(dir.path());
        config.android = android.clone();

        let backend = Backend::probe(&config).unwrap();
        assert_eq!(backend.name(), BackendName::Android);
        assert_eq!(backend.function_list(), Some(android.functions_path()));
    }

    #[test]
    fn test_probe_explicit_missing_backend() {
        let dir = tempdir().unwrap();
        let mut config = config_in(dir.path());
        config.gadget.backend = BackendKind::Configfs;
        assert!(Backend::probe(&config).is_none());

        config.gadget.backend = BackendKind::Modules;
        assert_eq!(
            Backend::probe(&config).unwrap().name(),
            BackendName::ExternalModule
        );
    }

    #[test]
    fn test_external_module_writes_nothing() {
        let mut sysfs = SysfsIo::new(None);
        let mode = ModeDefinition {
            name: "pc_suite".to_string(),
            kernel_module: "g_nokia".to_string(),
            ..Default::default()
        };
        Backend::ExternalModule.activate(&mode, &mut sysfs).unwrap();
        Backend::ExternalModule.deactivate(&mode, &mut sysfs);
        assert_eq!(sysfs.history().count(), 0);
    }
}
