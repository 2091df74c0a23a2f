//! Recording collaborator fakes for tests
//!
//! All fakes of one `Fakes` set append to a shared journal so tests can check
//! the relative order of host, network and app-sync calls.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::{AppSync, HostOps, NetworkControl, Services, Tethering};
use crate::error::{AppError, Result};
use crate::modes::ModeDefinition;

/// Ordered record of collaborator calls
#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    pub fn count(&self, entry: &str) -> usize {
        self.0.lock().iter().filter(|e| e.as_str() == entry).count()
    }

    pub fn clear(&self) {
        self.0.lock().clear();
    }
}

#[derive(Default)]
struct HostState {
    mounted: HashSet<PathBuf>,
    unmount_failures: HashMap<PathBuf, usize>,
    mount_fails: bool,
    module_load_fails: bool,
    open_files: String,
    sleeps: Vec<Duration>,
}

pub struct FakeHost {
    journal: Journal,
    state: Mutex<HostState>,
}

impl FakeHost {
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            state: Mutex::new(HostState::default()),
        }
    }

    pub fn set_mounted(&self, mountpoint: impl Into<PathBuf>) {
        self.state.lock().mounted.insert(mountpoint.into());
    }

    /// Make the next `times` unmounts of `mountpoint` fail
    pub fn fail_unmount(&self, mountpoint: impl Into<PathBuf>, times: usize) {
        self.state
            .lock()
            .unmount_failures
            .insert(mountpoint.into(), times);
    }

    pub fn fail_mount(&self) {
        self.state.lock().mount_fails = true;
    }

    pub fn fail_module_load(&self) {
        self.state.lock().module_load_fails = true;
    }

    pub fn set_open_files(&self, listing: &str) {
        self.state.lock().open_files = listing.to_string();
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.state.lock().sleeps.clone()
    }
}

impl HostOps for FakeHost {
    fn is_mounted(&self, mountpoint: &Path) -> bool {
        self.state.lock().mounted.contains(mountpoint)
    }

    fn mount(&self, mountpoint: &Path) -> Result<()> {
        self.journal.push(format!("mount {}", mountpoint.display()));
        let mut state = self.state.lock();
        if state.mount_fails {
            return Err(AppError::Mount {
                mountpoint: mountpoint.display().to_string(),
                reason: "fake failure".to_string(),
            });
        }
        state.mounted.insert(mountpoint.to_path_buf());
        Ok(())
    }

    fn mount_placeholder(&self, mountpoint: &Path) -> Result<()> {
        self.journal
            .push(format!("placeholder {}", mountpoint.display()));
        Ok(())
    }

    fn unmount(&self, mountpoint: &Path) -> Result<()> {
        self.journal.push(format!("umount {}", mountpoint.display()));
        let mut state = self.state.lock();
        if let Some(remaining) = state.unmount_failures.get_mut(mountpoint) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(AppError::Mount {
                    mountpoint: mountpoint.display().to_string(),
                    reason: "target is busy".to_string(),
                });
            }
        }
        state.mounted.remove(mountpoint);
        Ok(())
    }

    fn unload_module(&self, module: &str) -> Result<()> {
        self.journal.push(format!("rmmod {}", module));
        Ok(())
    }

    fn load_module(&self, module: &str, params: &[String]) -> Result<()> {
        self.journal
            .push(format!("modprobe {} {}", module, params.join(" ")));
        if self.state.lock().module_load_fails {
            return Err(AppError::Module {
                module: module.to_string(),
                reason: "fake failure".to_string(),
            });
        }
        Ok(())
    }

    fn list_open_files(&self, path: &Path) -> Result<String> {
        self.journal.push(format!("lsof {}", path.display()));
        Ok(self.state.lock().open_files.clone())
    }

    fn sleep(&self, duration: Duration) {
        self.journal.push(format!("sleep {}ms", duration.as_millis()));
        self.state.lock().sleeps.push(duration);
    }
}

pub struct FakeNetwork {
    journal: Journal,
    up_fails: AtomicBool,
}

impl FakeNetwork {
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            up_fails: AtomicBool::new(false),
        }
    }

    pub fn set_up_fails(&self, fails: bool) {
        self.up_fails.store(fails, Ordering::SeqCst);
    }
}

fn interface(mode: &ModeDefinition) -> &str {
    mode.network_interface.as_deref().unwrap_or("-")
}

impl NetworkControl for FakeNetwork {
    fn up(&self, mode: &ModeDefinition) -> Result<()> {
        self.journal.push(format!("up {}", interface(mode)));
        if self.up_fails.load(Ordering::SeqCst) {
            return Err(AppError::Network {
                interface: interface(mode).to_string(),
                reason: "fake failure".to_string(),
            });
        }
        Ok(())
    }

    fn down(&self, mode: &ModeDefinition) {
        self.journal.push(format!("down {}", interface(mode)));
    }

    fn setup_dhcpd(&self, mode: &ModeDefinition) {
        self.journal.push(format!("dhcpd {}", interface(mode)));
    }
}

pub struct FakeAppSync {
    journal: Journal,
    activate_fails: AtomicBool,
}

impl FakeAppSync {
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            activate_fails: AtomicBool::new(false),
        }
    }

    pub fn set_activate_fails(&self, fails: bool) {
        self.activate_fails.store(fails, Ordering::SeqCst);
    }
}

impl AppSync for FakeAppSync {
    fn activate(&self, mode_name: &str) -> Result<()> {
        self.journal.push(format!("appsync {}", mode_name));
        if self.activate_fails.load(Ordering::SeqCst) {
            return Err(AppError::AppSync(mode_name.to_string()));
        }
        Ok(())
    }

    fn activate_post(&self, mode_name: &str) {
        self.journal.push(format!("appsync-post {}", mode_name));
    }

    fn stop(&self, force: bool) {
        self.journal.push(format!("appsync-stop {}", force));
    }
}

pub struct FakeTethering {
    journal: Journal,
}

impl Tethering for FakeTethering {
    fn set_tethering(&self, service: &str, enabled: bool) {
        let state = if enabled { "on" } else { "off" };
        self.journal.push(format!("tether {} {}", service, state));
    }
}

/// One set of fakes sharing a journal
pub struct Fakes {
    pub journal: Journal,
    pub host: Arc<FakeHost>,
    pub network: Arc<FakeNetwork>,
    pub appsync: Arc<FakeAppSync>,
    pub tethering: Arc<FakeTethering>,
}

impl Fakes {
    pub fn new() -> Self {
        let journal = Journal::default();
        Self {
            host: Arc::new(FakeHost::new(journal.clone())),
            network: Arc::new(FakeNetwork::new(journal.clone())),
            appsync: Arc::new(FakeAppSync::new(journal.clone())),
            tethering: Arc::new(FakeTethering {
                journal: journal.clone(),
            }),
            journal,
        }
    }

    pub fn services(&self) -> Services {
        Services {
            host: self.host.clone(),
            network: self.network.clone(),
            appsync: self.appsync.clone(),
            tethering: self.tethering.clone(),
        }
    }
}

impl Default for Fakes {
    fn default() -> Self {
        Self::new()
    }
}
