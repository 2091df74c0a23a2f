//! Network interface and DHCP server control

use std::fmt::Write as _;
use std::net::Ipv4Addr;
use std::path::Path;
use std::process::{Command, Stdio};

use tracing::{debug, info, warn};

use super::NetworkControl;
use crate::config::NetworkConfig;
use crate::error::{AppError, Result};
use crate::modes::ModeDefinition;

/// `NetworkControl` implementation using `ip` and a udhcpd configuration file
pub struct IpNetwork {
    config: NetworkConfig,
}

impl IpNetwork {
    pub fn new(config: NetworkConfig) -> Self {
        Self { config }
    }

    fn interface<'a>(&self, mode: &'a ModeDefinition) -> Option<&'a str> {
        let interface = mode.network_interface.as_deref();
        if interface.is_none() {
            warn!("Mode {} has no network interface", mode.name);
        }
        interface
    }

    fn ip(&self, interface: &str, args: &[&str]) -> Result<()> {
        debug!("exec: ip {}", args.join(" "));
        let status = Command::new("ip")
            .args(args)
            .stdin(Stdio::null())
            .status()
            .map_err(|e| AppError::Network {
                interface: interface.to_string(),
                reason: format!("failed to execute ip: {}", e),
            })?;
        if !status.success() {
            return Err(AppError::Network {
                interface: interface.to_string(),
                reason: format!("ip {} exited with {}", args.join(" "), status),
            });
        }
        Ok(())
    }

    fn prefix_len(&self) -> u32 {
        self.config
            .netmask
            .parse::<Ipv4Addr>()
            .map(|mask| u32::from(mask).count_ones())
            .unwrap_or(24)
    }

    /// Render the udhcpd configuration for an interface
    pub fn dhcpd_config(&self, interface: &str, nat: bool) -> String {
        let mut text = String::new();
        let _ = writeln!(text, "start\t{}", self.config.dhcp_range_start);
        let _ = writeln!(text, "end\t{}", self.config.dhcp_range_end);
        let _ = writeln!(text, "interface\t{}", interface);
        let _ = writeln!(text, "option\tsubnet\t{}", self.config.netmask);
        let _ = writeln!(text, "option\tlease\t3600");
        let _ = writeln!(text, "max_leases\t15");
        if nat {
            let _ = writeln!(text, "option\trouter\t{}", self.config.address);
            let _ = writeln!(text, "option\tdns\t{}", self.config.address);
        }
        text
    }

    fn write_dhcpd_config(&self, path: &Path, text: &str) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, text)
    }
}

impl NetworkControl for IpNetwork {
    fn up(&self, mode: &ModeDefinition) -> Result<()> {
        let Some(interface) = self.interface(mode) else {
            return Err(AppError::Network {
                interface: String::new(),
                reason: format!("mode {} has no network interface", mode.name),
            });
        };
        let address = format!("{}/{}", self.config.address, self.prefix_len());
        self.ip(interface, &["addr", "replace", &address, "dev", interface])?;
        self.ip(interface, &["link", "set", "dev", interface, "up"])?;
        info!("Network interface {} up ({})", interface, address);
        Ok(())
    }

    fn down(&self, mode: &ModeDefinition) {
        if let Some(interface) = self.interface(mode) {
            if let Err(e) = self.ip(interface, &["link", "set", "dev", interface, "down"]) {
                debug!("Bringing {} down: {}", interface, e);
            }
        }
    }

    fn setup_dhcpd(&self, mode: &ModeDefinition) {
        let Some(interface) = self.interface(mode) else {
            return;
        };
        let text = self.dhcpd_config(interface, mode.has_nat);
        if let Err(e) = self.write_dhcpd_config(&self.config.dhcpd_config, &text) {
            warn!(
                "Failed to write DHCP server config {}: {}",
                self.config.dhcpd_config.display(),
                e
            );
            return;
        }

        let Some((program, args)) = self.config.dhcpd_restart.split_first() else {
            return;
        };
        match Command::new(program).args(args).stdin(Stdio::null()).status() {
            Ok(status) if status.success() => info!("DHCP server configured for {}", interface),
            Ok(status) => warn!("DHCP server restart exited with {}", status),
            Err(e) => warn!("Failed to restart DHCP server: {}", e),
        }
    }
}
