//! Android-legacy (`android_usb`) gadget programming

use tracing::debug;

use crate::config::AndroidConfig;
use crate::error::Result;
use crate::modes::ModeDefinition;
use crate::sysfs::SysfsIo;

#[derive(Debug, Clone)]
pub struct AndroidGadget {
    config: AndroidConfig,
    vendor_id: String,
}

impl AndroidGadget {
    pub fn new(config: &AndroidConfig, vendor_id: &str) -> Self {
        Self {
            config: config.clone(),
            vendor_id: vendor_id.to_string(),
        }
    }

    pub fn is_available(config: &AndroidConfig) -> bool {
        config.enable_path().exists()
    }

    pub fn config(&self) -> &AndroidConfig {
        &self.config
    }

    /// Write the soft-connect control, if the platform has one
    fn softconnect(&self, sysfs: &mut SysfsIo, connect: bool) -> Result<()> {
        let Some(path) = &self.config.softconnect_path else {
            return Ok(());
        };
        let value = if connect {
            &self.config.softconnect_connect
        } else {
            &self.config.softconnect_disconnect
        };
        sysfs.write(path, value)
    }

    /// Program the gadget for a mode
    ///
    /// The first extra write decides the outcome; the device is only
    /// reconnected when it succeeded.
    pub fn activate(&self, mode: &ModeDefinition, sysfs: &mut SysfsIo) -> Result<()> {
        let _ = self.softconnect(sysfs, false);

        let mut result = Ok(());
        if let Some(extra) = &mode.extra_writes[0] {
            result = sysfs.write(&extra.path, &extra.value);
        }
        if let Some(extra) = &mode.extra_writes[1] {
            let _ = sysfs.write(&extra.path, &extra.value);
        }

        if let Some(product_id) = &mode.product_id {
            let _ = sysfs.write(self.config.product_id_path(), product_id);
        }
        if let Some(vendor_id) = &mode.vendor_id_override {
            let _ = sysfs.write(self.config.vendor_id_path(), vendor_id);
        }

        if let (Some(path), Some(value)) = (&mode.sysfs_path, &mode.sysfs_value) {
            let _ = sysfs.write(path, value);
        }

        if result.is_ok() {
            result = self.softconnect(sysfs, true);
        } else {
            debug!("Leaving {} disconnected", mode.name);
        }
        result
    }

    /// Return the gadget to its idle configuration
    pub fn deactivate(&self, mode: &ModeDefinition, sysfs: &mut SysfsIo) {
        let _ = self.softconnect(sysfs, false);

        if let (Some(path), Some(value)) = (&mode.sysfs_path, &mode.sysfs_reset_value) {
            let _ = sysfs.write(path, value);
        }

        if mode.vendor_id_override.is_some() {
            let _ = sysfs.write(self.config.vendor_id_path(), &self.vendor_id);
        }

        let _ = self.softconnect(sysfs, true);
    }
}
