//! Host collaborators
//!
//! The engine never shells out or touches services directly; it goes through
//! these traits. Host implementations live in the submodules, recording fakes
//! for tests in `fake`.
//!
//! ```text
//! ModeSettingEngine ──┬── HostOps         (mount, modules, lsof, sleep)
//!                     ├── NetworkControl  (interface up/down, DHCP server)
//!                     ├── AppSync         (applications bound to a mode)
//!                     └── Tethering       (connman tethering)
//! ```

pub mod network;
pub mod services;
pub mod shell;

#[cfg(test)]
pub mod fake;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::modes::ModeDefinition;

pub use network::IpNetwork;
pub use services::{ConnmanTethering, NoAppSync};
pub use shell::ShellHost;

/// Host operations used by the mass storage sub-protocol
pub trait HostOps: Send + Sync {
    /// Whether something is mounted at `mountpoint`
    fn is_mounted(&self, mountpoint: &Path) -> bool;

    /// Mount `mountpoint` using the system mount table
    fn mount(&self, mountpoint: &Path) -> Result<()>;

    /// Mount a small read-only tmpfs at `mountpoint`
    fn mount_placeholder(&self, mountpoint: &Path) -> Result<()>;

    fn unmount(&self, mountpoint: &Path) -> Result<()>;

    fn unload_module(&self, module: &str) -> Result<()>;

    fn load_module(&self, module: &str, params: &[String]) -> Result<()>;

    /// Line oriented listing of processes holding files open under `path`,
    /// first line being a header
    fn list_open_files(&self, path: &Path) -> Result<String>;

    /// Block the control thread
    fn sleep(&self, duration: Duration);
}

/// Network interface and DHCP server control
pub trait NetworkControl: Send + Sync {
    fn up(&self, mode: &ModeDefinition) -> Result<()>;

    fn down(&self, mode: &ModeDefinition);

    fn setup_dhcpd(&self, mode: &ModeDefinition);
}

/// Application synchronization bound to modes
pub trait AppSync: Send + Sync {
    /// Start applications needed before the mode is activated
    fn activate(&self, mode_name: &str) -> Result<()>;

    /// Start applications that need the activated interface
    fn activate_post(&self, mode_name: &str);

    /// Stop applications started for the previous mode
    fn stop(&self, force: bool);
}

/// Tethering through the connection manager
pub trait Tethering: Send + Sync {
    fn set_tethering(&self, service: &str, enabled: bool);
}

/// Bundle of the service collaborators handed to the engine
#[derive(Clone)]
pub struct Services {
    pub host: Arc<dyn HostOps>,
    pub network: Arc<dyn NetworkControl>,
    pub appsync: Arc<dyn AppSync>,
    pub tethering: Arc<dyn Tethering>,
}
