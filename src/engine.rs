//! Mode-setting engine
//!
//! Applies and removes USB modes: dispatches to the gadget backend or the mass
//! storage controller and sequences network, app-sync and tethering around
//! the hardware writes.
//!
//! All operations are synchronous and run on the single control thread. The
//! only deferred work is one network bring-up retry, which runs as a tokio
//! task and is canceled whenever the mode changes.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::AppConfig;
use crate::error::{AppError, Result};
use crate::events::{ErrorReason, EventBus, SystemEvent};
use crate::gadget::Backend;
use crate::host::Services;
use crate::modes::{ModeDefinition, MODE_CHARGING, MODE_CHARGING_FALLBACK, MODE_MASS_STORAGE};
use crate::storage::MassStorageController;
use crate::sysfs::{DriftReport, SysfsIo};

/// Delay before the network bring-up is retried
pub const NETWORK_RETRY_DELAY: Duration = Duration::from_secs(3);

/// Settle time before post-activation app-sync
const POST_SYNC_DELAY: Duration = Duration::from_millis(350);

/// Mass storage modules that may be left loaded by another component
const MASS_STORAGE_MODULES: [&str; 2] = ["g_mass_storage", "g_file_storage"];

/// Engine state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    Idle,
    Setting,
    Set,
    Unsetting,
}

struct PendingRetry {
    mode: String,
    task: JoinHandle<()>,
}

pub struct ModeSettingEngine {
    state: EngineState,
    backend: Option<Backend>,
    sysfs: SysfsIo,
    storage: MassStorageController,
    services: Services,
    events: Arc<EventBus>,
    pending_retry: Option<PendingRetry>,
}

impl ModeSettingEngine {
    pub fn new(
        config: &AppConfig,
        backend: Option<Backend>,
        services: Services,
        events: Arc<EventBus>,
    ) -> Self {
        let sysfs = SysfsIo::new(backend.as_ref().and_then(Backend::function_list));
        let storage = MassStorageController::new(
            config.storage.clone(),
            config.android.clone(),
            services.host.clone(),
            events.clone(),
        );

        Self {
            state: EngineState::Idle,
            backend,
            sysfs,
            storage,
            services,
            events,
            pending_retry: None,
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn backend(&self) -> Option<&Backend> {
        self.backend.as_ref()
    }

    pub fn sysfs(&self) -> &SysfsIo {
        &self.sysfs
    }

    /// Name of the mode whose network retry is still pending
    pub fn pending_retry(&self) -> Option<&str> {
        self.pending_retry
            .as_ref()
            .filter(|retry| !retry.task.is_finished())
            .map(|retry| retry.mode.as_str())
    }

    /// Activate a mode
    pub fn set(&mut self, mode: &ModeDefinition) -> Result<()> {
        info!("Setting USB mode {}", mode.name);
        self.state = EngineState::Setting;

        let result = if mode.is_mass_storage {
            self.storage.activate(mode, &mut self.sysfs)
        } else {
            // A new mode supersedes whatever the previous one left pending
            self.cancel_network_retry();
            let result = self.set_dynamic(mode);
            if let Err(e) = &result {
                error!("Setting mode {} failed: {}", mode.name, e);
                self.events
                    .publish(SystemEvent::error(ErrorReason::ModeSettingFailed));
            }
            result
        };

        self.state = if result.is_ok() {
            EngineState::Set
        } else {
            EngineState::Idle
        };
        result
    }

    fn set_dynamic(&mut self, mode: &ModeDefinition) -> Result<()> {
        if mode.requires_appsync {
            if let Err(e) = self.services.appsync.activate(&mode.name) {
                debug!("App-sync failure: {}", e);
                return Err(e);
            }
        }

        let result = match &self.backend {
            Some(backend) => backend.activate(mode, &mut self.sysfs),
            None => {
                error!("No gadget backend is selected, can't set mode {}", mode.name);
                Err(AppError::NoBackend)
            }
        };

        // Functions are enabled, the interface should exist now
        if mode.requires_network {
            let network = self.services.network.clone();
            network.down(mode);
            if let Err(e) = network.up(mode) {
                debug!("Network setup failed ({}), retrying later", e);
                self.schedule_network_retry(mode);
            }
        }

        // Before post-sync so the DHCP server has the right configuration
        if mode.has_nat || mode.runs_dhcp_server {
            self.services.network.setup_dhcpd(mode);
        }

        if mode.requires_appsync && result.is_ok() {
            self.services.host.sleep(POST_SYNC_DELAY);
            self.services.appsync.activate_post(&mode.name);
        }

        if let Some(service) = &mode.tethering_service {
            self.services.tethering.set_tethering(service, true);
        }

        result
    }

    /// Deactivate the mode last set
    pub fn unset(&mut self, mode: Option<&ModeDefinition>) {
        self.cancel_network_retry();

        let Some(mode) = mode else {
            return;
        };
        info!("Unsetting USB mode {}", mode.name);
        self.state = EngineState::Unsetting;

        if mode.name == MODE_MASS_STORAGE {
            if let Err(e) = self.storage.deactivate(Some(mode), &mut self.sysfs) {
                warn!("Leaving mass storage: {}", e);
            }
            self.state = EngineState::Idle;
            return;
        }

        if let Some(service) = &mode.tethering_service {
            self.services.tethering.set_tethering(service, false);
        }

        if mode.requires_network {
            self.services.network.down(mode);
        }

        match &self.backend {
            Some(backend) => backend.deactivate(mode, &mut self.sysfs),
            None => error!("No gadget backend is selected, can't unset mode {}", mode.name),
        }

        self.state = EngineState::Idle;
    }

    /// Clean up after the previous module before switching modes
    ///
    /// `previous_module` is the kernel module of the mode being left,
    /// `current_mode` the name of the mode that stays selected and
    /// `outgoing` the definition of the mode being left, if it is a dynamic
    /// mode.
    pub fn cleanup(
        &mut self,
        previous_module: Option<&str>,
        current_mode: &str,
        outgoing: Option<&ModeDefinition>,
    ) -> Result<()> {
        self.services.appsync.stop(false);

        let Some(module) = previous_module else {
            warn!("No module found to unload, skipping cleanup");
            return Ok(());
        };

        if MASS_STORAGE_MODULES.contains(&module) {
            // Charging modes keep the storage module without exporting data
            if current_mode == MODE_CHARGING || current_mode == MODE_CHARGING_FALLBACK {
                debug!("Charging mode, leaving {} alone", module);
                return Ok(());
            }
            if let Err(e) = self.storage.deactivate(None, &mut self.sysfs) {
                warn!("Mass storage cleanup: {}", e);
            }
        } else if outgoing.is_some() {
            self.unset(outgoing);
        }

        Ok(())
    }

    /// Check the values written so far and publish drift
    pub fn verify_values(&mut self) -> Vec<DriftReport> {
        let reports = self.sysfs.verify_values();
        for report in &reports {
            self.events.publish(SystemEvent::DriftDetected {
                path: report.path.display().to_string(),
                expected: report.expected.clone(),
                observed: report.observed.clone(),
                benign: report.benign,
            });
        }
        reports
    }

    /// Cancel deferred work
    pub fn shutdown(&mut self) {
        self.cancel_network_retry();
    }

    fn schedule_network_retry(&mut self, mode: &ModeDefinition) {
        self.cancel_network_retry();

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                warn!("No runtime available, not retrying network setup for {}", mode.name);
                return;
            }
        };

        let network = self.services.network.clone();
        let retry_mode = mode.clone();
        let task = runtime.spawn(async move {
            tokio::time::sleep(NETWORK_RETRY_DELAY).await;
            debug!("Retrying network setup for {}", retry_mode.name);
            if let Err(e) = network.up(&retry_mode) {
                warn!("Network setup for {} failed again: {}", retry_mode.name, e);
            }
        });

        self.pending_retry = Some(PendingRetry {
            mode: mode.name.clone(),
            task,
        });
    }

    fn cancel_network_retry(&mut self) {
        if let Some(retry) = self.pending_retry.take() {
            if !retry.task.is_finished() {
                debug!("Canceling network retry for {}", retry.mode);
            }
            retry.task.abort();
        }
    }
}

impl Drop for ModeSettingEngine {
    fn drop(&mut self) {
        self.cancel_network_retry();
    }
}
