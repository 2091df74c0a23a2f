//! App-sync and tethering collaborators

use std::process::{Command, Stdio};

use tracing::{debug, info, warn};

use super::{AppSync, Tethering};
use crate::error::Result;

/// App-sync stand-in for builds without application synchronization
#[derive(Debug, Default)]
pub struct NoAppSync;

impl AppSync for NoAppSync {
    fn activate(&self, mode_name: &str) -> Result<()> {
        debug!("No app-sync configured, nothing to start for {}", mode_name);
        Ok(())
    }

    fn activate_post(&self, mode_name: &str) {
        debug!("No app-sync configured, nothing to post-start for {}", mode_name);
    }

    fn stop(&self, force: bool) {
        debug!("No app-sync configured, nothing to stop (force={})", force);
    }
}

/// Tethering through `connmanctl`
#[derive(Debug, Default)]
pub struct ConnmanTethering;

impl Tethering for ConnmanTethering {
    fn set_tethering(&self, service: &str, enabled: bool) {
        let state = if enabled { "on" } else { "off" };
        match Command::new("connmanctl")
            .args(["tether", service, state])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .status()
        {
            Ok(status) if status.success() => info!("Tethering {} {}", service, state),
            Ok(status) => warn!("connmanctl tether {} {} exited with {}", service, state, status),
            Err(e) => warn!("Failed to execute connmanctl: {}", e),
        }
    }
}
