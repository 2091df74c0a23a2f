use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Main daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// Gadget backend selection and ConfigFS layout
    pub gadget: GadgetConfig,
    /// Android-legacy gadget controls
    pub android: AndroidConfig,
    /// Mass storage export settings
    pub storage: StorageConfig,
    /// Mode definition directories
    pub modes: ModesConfig,
    /// Network helpers (interface control, DHCP server)
    pub network: NetworkConfig,
}

/// Requested gadget backend
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Probe the running kernel
    #[default]
    Auto,
    /// USB gadget ConfigFS
    Configfs,
    /// Android `android_usb` class driver
    Android,
    /// Gadget modules loaded by somebody else
    Modules,
}

/// Gadget configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GadgetConfig {
    /// Backend to use
    pub backend: BackendKind,
    /// Gadget directory inside ConfigFS
    pub configfs_root: PathBuf,
    /// Configuration directory name under `configs/`
    pub config_name: String,
    /// UDC to bind; first entry of `udc_class_dir` when unset
    pub udc: Option<String>,
    /// Directory listing available UDCs
    pub udc_class_dir: PathBuf,
    /// Vendor ID written when a mode has no override
    pub vendor_id: String,
}

impl Default for GadgetConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Auto,
            configfs_root: PathBuf::from("/sys/kernel/config/usb_gadget/g1"),
            config_name: "b.1".to_string(),
            udc: None,
            udc_class_dir: PathBuf::from("/sys/class/udc"),
            vendor_id: "0x2931".to_string(),
        }
    }
}

/// Android-legacy gadget configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AndroidConfig {
    /// `android0` device directory
    pub root: PathBuf,
    /// Soft-connect control; no soft-connect handling when unset
    pub softconnect_path: Option<PathBuf>,
    pub softconnect_connect: String,
    pub softconnect_disconnect: String,
    /// Backing file of the mass storage function's lun
    pub mass_storage_lun_file: PathBuf,
}

impl AndroidConfig {
    pub fn enable_path(&self) -> PathBuf {
        self.root.join("enable")
    }

    pub fn functions_path(&self) -> PathBuf {
        self.root.join("functions")
    }

    pub fn product_id_path(&self) -> PathBuf {
        self.root.join("idProduct")
    }

    pub fn vendor_id_path(&self) -> PathBuf {
        self.root.join("idVendor")
    }
}

impl Default for AndroidConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/sys/class/android_usb/android0"),
            softconnect_path: None,
            softconnect_connect: "connect".to_string(),
            softconnect_disconnect: "disconnect".to_string(),
            mass_storage_lun_file: PathBuf::from("/sys/class/android_usb/f_mass_storage/lun/file"),
        }
    }
}

/// Mass storage configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    /// Comma-separated list of mount points to export
    pub mounts: String,
    /// Keep force-unit-access enabled (sync on write)
    pub sync: bool,
    /// Where to mount a read-only placeholder when remounting fails
    pub alt_mount: Option<PathBuf>,
    /// Directory holding `gadget-lun<N>` slots of the mass storage module
    pub lun_root: PathBuf,
    /// Mass storage kernel module
    pub module: String,
}

impl StorageConfig {
    /// Configured mount points, empty entries dropped
    pub fn mount_points(&self) -> Vec<String> {
        self.mounts
            .split(',')
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Backing file attribute of lun `index`
    pub fn lun_file(&self, index: usize) -> PathBuf {
        self.lun_root.join(format!("gadget-lun{}", index)).join("file")
    }

    /// No-FUA attribute of lun `index`
    pub fn lun_nofua(&self, index: usize) -> PathBuf {
        self.lun_root.join(format!("gadget-lun{}", index)).join("nofua")
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            mounts: String::new(),
            sync: false,
            alt_mount: None,
            lun_root: PathBuf::from("/sys/devices/platform/musb_hdrc/gadget"),
            module: "g_mass_storage".to_string(),
        }
    }
}

/// Mode definition directories
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModesConfig {
    pub mode_dir: PathBuf,
    pub diag_dir: PathBuf,
}

impl Default for ModesConfig {
    fn default() -> Self {
        Self {
            mode_dir: PathBuf::from("/etc/usbmode/dyn-modes"),
            diag_dir: PathBuf::from("/etc/usbmode/diag"),
        }
    }
}

/// Network helper configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address assigned to the USB network interface
    pub address: String,
    /// Netmask handed out by the DHCP server
    pub netmask: String,
    /// DHCP lease range
    pub dhcp_range_start: String,
    pub dhcp_range_end: String,
    /// udhcpd configuration file written before (re)starting the server
    pub dhcpd_config: PathBuf,
    /// Command (program + args) restarting the DHCP server
    pub dhcpd_restart: Vec<String>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            address: "192.168.2.15".to_string(),
            netmask: "255.255.255.0".to_string(),
            dhcp_range_start: "192.168.2.1".to_string(),
            dhcp_range_end: "192.168.2.14".to_string(),
            dhcpd_config: PathBuf::from("/run/usbmode/udhcpd.conf"),
            dhcpd_restart: vec![
                "systemctl".to_string(),
                "restart".to_string(),
                "udhcpd".to_string(),
            ],
        }
    }
}
