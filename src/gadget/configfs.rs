//! ConfigFS gadget programming

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::config::GadgetConfig;
use crate::error::{AppError, Result};
use crate::modes::ModeDefinition;
use crate::sysfs::SysfsIo;

/// Find the first available UDC (USB Device Controller)
pub fn find_udc(udc_class_dir: &Path) -> Option<String> {
    let mut names: Vec<String> = fs::read_dir(udc_class_dir)
        .ok()?
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().to_string())
        .collect();
    names.sort();
    names.into_iter().next()
}

/// Existing USB gadget directory inside ConfigFS
#[derive(Debug, Clone)]
pub struct ConfigFsGadget {
    gadget_path: PathBuf,
    config_path: PathBuf,
    udc: Option<String>,
    udc_class_dir: PathBuf,
    vendor_id: String,
}

impl ConfigFsGadget {
    pub fn new(config: &GadgetConfig) -> Self {
        Self {
            gadget_path: config.configfs_root.clone(),
            config_path: config
                .configfs_root
                .join("configs")
                .join(&config.config_name),
            udc: config.udc.clone(),
            udc_class_dir: config.udc_class_dir.clone(),
            vendor_id: config.vendor_id.clone(),
        }
    }

    pub fn is_available(config: &GadgetConfig) -> bool {
        config.configfs_root.join("UDC").exists()
    }

    /// Program the gadget for a mode
    ///
    /// Only the final bind decides the outcome; descriptor and function
    /// failures are logged.
    pub fn activate(&self, mode: &ModeDefinition, sysfs: &mut SysfsIo) -> Result<()> {
        if let Err(e) = self.unbind(sysfs) {
            debug!("Unbind before reprogramming: {}", e);
        }

        if let Some(product_id) = &mode.product_id {
            let _ = sysfs.write(self.gadget_path.join("idProduct"), product_id);
        }
        let vendor_id = mode
            .vendor_id_override
            .as_deref()
            .unwrap_or(&self.vendor_id);
        let _ = sysfs.write(self.gadget_path.join("idVendor"), vendor_id);

        if let Some(functions) = &mode.sysfs_value {
            if let Err(e) = self.set_functions(functions, sysfs) {
                warn!("Failed to set gadget functions '{}': {}", functions, e);
            }
        }

        self.bind(sysfs)
    }

    /// Unbind from the UDC
    pub fn unbind(&self, sysfs: &mut SysfsIo) -> Result<()> {
        sysfs.write(self.gadget_path.join("UDC"), "")
    }

    /// Bind to the configured UDC, or the first one available
    pub fn bind(&self, sysfs: &mut SysfsIo) -> Result<()> {
        let udc = self
            .udc
            .clone()
            .or_else(|| find_udc(&self.udc_class_dir))
            .ok_or_else(|| AppError::Backend("No USB Device Controller (UDC) found".to_string()))?;

        info!("Binding gadget to UDC: {}", udc);
        sysfs.write(self.gadget_path.join("UDC"), &udc)
    }

    /// Replace the function links of the configuration
    ///
    /// `functions` is a comma-separated list of function names. A name
    /// matches a `functions/` entry exactly, as `<name>.<instance>`, or as
    /// `<type>.<name>`.
    pub fn set_functions(&self, functions: &str, sysfs: &mut SysfsIo) -> Result<()> {
        self.remove_function_links()?;

        let functions_dir = self.gadget_path.join("functions");
        for name in functions.split(',').map(str::trim).filter(|n| !n.is_empty()) {
            let resolved = self.resolve_function(&functions_dir, name).ok_or_else(|| {
                AppError::Backend(format!("Gadget function '{}' not found", name))
            })?;

            let src = functions_dir.join(&resolved);
            let dest = self.config_path.join(&resolved);
            std::os::unix::fs::symlink(&src, &dest).map_err(|e| {
                AppError::Backend(format!(
                    "Failed to create symlink {} -> {}: {}",
                    dest.display(),
                    src.display(),
                    e
                ))
            })?;
        }

        sysfs.note_link(&self.config_path, functions);
        Ok(())
    }

    fn resolve_function(&self, functions_dir: &Path, name: &str) -> Option<String> {
        let entries: Vec<String> = fs::read_dir(functions_dir)
            .ok()?
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();

        if entries.iter().any(|e| e == name) {
            return Some(name.to_string());
        }
        let prefix = format!("{}.", name);
        let suffix = format!(".{}", name);
        let mut candidates: Vec<&String> = entries
            .iter()
            .filter(|e| e.starts_with(&prefix))
            .collect();
        if candidates.is_empty() {
            candidates = entries.iter().filter(|e| e.ends_with(&suffix)).collect();
        }
        candidates.sort();
        candidates.first().map(|s| s.to_string())
    }

    fn remove_function_links(&self) -> Result<()> {
        let entries = fs::read_dir(&self.config_path).map_err(|e| {
            AppError::Backend(format!(
                "Failed to read config directory {}: {}",
                self.config_path.display(),
                e
            ))
        })?;

        for entry in entries.flatten() {
            let is_link = entry
                .file_type()
                .map(|t| t.is_symlink())
                .unwrap_or(false);
            if !is_link {
                continue;
            }
            if let Err(e) = fs::remove_file(entry.path()) {
                warn!(
                    "Failed to remove config link {}: {}",
                    entry.path().display(),
                    e
                );
            }
        }
        Ok(())
    }
}
