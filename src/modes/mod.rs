//! Mode definitions and the mode catalog
//!
//! Each selectable USB mode is described by one key file in a configuration
//! directory. The catalog loads every valid file of a directory, sorted by
//! mode name.

pub mod keyfile;

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::AppConfig;
use keyfile::KeyFile;

/// Module name used by module-less (ConfigFS / android_usb) modes
pub const MODULE_NONE: &str = "none";

/// Name of the mass storage mode
pub const MODE_MASS_STORAGE: &str = "mass_storage";

/// Charging modes impersonate mass storage without exporting anything
pub const MODE_CHARGING: &str = "charging_only";
pub const MODE_CHARGING_FALLBACK: &str = "charging_only_fallback";

const MODE_SECTION: &str = "mode";
const OPTIONS_SECTION: &str = "options";

/// A `(path, value)` write performed by the Android-legacy backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtraWrite {
    pub path: PathBuf,
    pub value: String,
}

/// One selectable USB mode
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ModeDefinition {
    pub name: String,
    pub kernel_module: String,
    pub requires_appsync: bool,
    pub is_mass_storage: bool,
    pub requires_network: bool,
    pub network_interface: Option<String>,
    pub has_nat: bool,
    pub runs_dhcp_server: bool,
    pub sysfs_path: Option<PathBuf>,
    pub sysfs_value: Option<String>,
    pub sysfs_reset_value: Option<String>,
    /// Up to four Android extra writes, in file order (slot 1..4)
    pub extra_writes: [Option<ExtraWrite>; 4],
    pub product_id: Option<String>,
    pub vendor_id_override: Option<String>,
    pub tethering_service: Option<String>,
}

/// Reasons a parsed mode file is rejected
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModeError {
    #[error("mode name or module not defined")]
    MissingIdentity,
    #[error("network not fully defined")]
    NetworkIncomplete,
    #[error("sysfs value not fully defined")]
    SysfsIncomplete,
}

impl ModeDefinition {
    /// Whether the mode runs without a dedicated kernel module
    pub fn is_module_less(&self) -> bool {
        self.kernel_module == MODULE_NONE
    }

    /// Build a definition from a parsed key file, enforcing its invariants
    pub fn from_keyfile(file: &KeyFile) -> Result<Self, ModeError> {
        let opt = |key: &str| file.get_string(OPTIONS_SECTION, key);

        let (name, kernel_module) = match (
            file.get_string(MODE_SECTION, "name"),
            file.get_string(MODE_SECTION, "module"),
        ) {
            (Some(name), Some(module)) => (name, module),
            _ => return Err(ModeError::MissingIdentity),
        };

        let extra = |n: &str| {
            let path = opt(&format!("android_extra_sysfs_path{}", n))?;
            let value = opt(&format!("android_extra_sysfs_value{}", n))?;
            Some(ExtraWrite {
                path: PathBuf::from(path),
                value,
            })
        };

        let mode = Self {
            name,
            kernel_module,
            requires_appsync: file.get_flag(MODE_SECTION, "appsync"),
            is_mass_storage: file.get_flag(MODE_SECTION, "mass_storage"),
            requires_network: file.get_flag(MODE_SECTION, "network"),
            network_interface: file.get_string(MODE_SECTION, "network_interface"),
            has_nat: file.get_flag(OPTIONS_SECTION, "nat"),
            runs_dhcp_server: file.get_flag(OPTIONS_SECTION, "dhcp_server"),
            sysfs_path: opt("sysfs_path").map(PathBuf::from),
            sysfs_value: opt("sysfs_value"),
            sysfs_reset_value: opt("sysfs_reset_value"),
            extra_writes: [extra(""), extra("2"), extra("3"), extra("4")],
            product_id: opt("idProduct"),
            vendor_id_override: opt("idVendorOverride"),
            tethering_service: opt("connman_tethering"),
        };

        mode.validate()?;
        Ok(mode)
    }

    /// Check the cross-field invariants
    pub fn validate(&self) -> Result<(), ModeError> {
        if self.requires_network && self.network_interface.is_none() {
            return Err(ModeError::NetworkIncomplete);
        }
        // sysfs_path implies sysfs_value; sysfs_reset_value implies sysfs_path
        if (self.sysfs_path.is_some() && self.sysfs_value.is_none())
            || (self.sysfs_reset_value.is_some() && self.sysfs_path.is_none())
        {
            return Err(ModeError::SysfsIncomplete);
        }
        Ok(())
    }

    /// Load one mode file
    ///
    /// Returns `Ok(None)` when the file is not a readable key file at all.
    pub fn load(path: &Path) -> Result<Option<Self>, ModeError> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) => {
                debug!("{}: can't read mode configuration file: {}", path.display(), e);
                return Ok(None);
            }
        };
        let file = match KeyFile::parse(&text) {
            Ok(file) => file,
            Err(e) => {
                debug!("{}: not a mode configuration file: {}", path.display(), e);
                return Ok(None);
            }
        };
        Self::from_keyfile(&file).map(Some)
    }
}

/// Sorted, name-unique collection of mode definitions
#[derive(Debug, Clone, Default, Serialize)]
pub struct ModeCatalog {
    modes: Vec<ModeDefinition>,
    diagnostic: bool,
}

impl ModeCatalog {
    /// Load every valid mode file of a directory
    ///
    /// A missing or unreadable directory yields an empty catalog.
    pub fn load(directory: &Path, is_diagnostic: bool) -> Self {
        let entries = match fs::read_dir(directory) {
            Ok(entries) => entries,
            Err(e) => {
                debug!("Mode directory {} not readable: {}", directory.display(), e);
                return Self {
                    modes: Vec::new(),
                    diagnostic: is_diagnostic,
                };
            }
        };

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file())
            .collect();
        paths.sort();

        let mut seen = HashSet::new();
        let mut modes = Vec::new();
        for path in paths {
            debug!("Read file {}", path.display());
            match ModeDefinition::load(&path) {
                Ok(Some(mode)) => {
                    if !seen.insert(mode.name.clone()) {
                        warn!(
                            "{}: duplicate mode '{}' ignored",
                            path.display(),
                            mode.name
                        );
                        continue;
                    }
                    debug!("{}: successfully loaded", path.display());
                    modes.push(mode);
                }
                Ok(None) => {}
                Err(e) => warn!("{}: {}", path.display(), e),
            }
        }

        modes.sort_by(|a, b| a.name.cmp(&b.name));
        Self {
            modes,
            diagnostic: is_diagnostic,
        }
    }

    /// Load from the directory named by the daemon configuration
    pub fn load_configured(config: &AppConfig, is_diagnostic: bool) -> Self {
        let directory = if is_diagnostic {
            &config.modes.diag_dir
        } else {
            &config.modes.mode_dir
        };
        Self::load(directory, is_diagnostic)
    }

    pub fn get(&self, name: &str) -> Option<&ModeDefinition> {
        self.modes
            .binary_search_by(|m| m.name.as_str().cmp(name))
            .ok()
            .map(|i| &self.modes[i])
    }

    pub fn names(&self) -> Vec<&str> {
        self.modes.iter().map(|m| m.name.as_str()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ModeDefinition> {
        self.modes.iter()
    }

    pub fn len(&self) -> usize {
        self.modes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modes.is_empty()
    }

    pub fn is_diagnostic(&self) -> bool {
        self.diagnostic
    }
}
