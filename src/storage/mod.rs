//! Mass storage export
//!
//! Exporting a filesystem to the USB host requires taking it away from the
//! device first: every configured mount point is unmounted, then handed to a
//! lun of the mass storage function. Deactivation reverses this.

pub mod blockers;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::config::{AndroidConfig, StorageConfig};
use crate::error::{AppError, Result};
use crate::events::{ErrorReason, EventBus, SystemEvent, UsbState};
use crate::host::HostOps;
use crate::modes::ModeDefinition;
use crate::sysfs::SysfsIo;

pub use blockers::report_blockers;

/// Unmount attempts per mount point
const UNMOUNT_ATTEMPTS: usize = 4;

/// Pause between unmount attempts
const UNMOUNT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Pause before handing the filesystems to the host, so that enumeration
/// finishes first
const SETTLE_DELAY: Duration = Duration::from_secs(1);

/// Function list value selecting mass storage on the Android backend
const ANDROID_MASS_STORAGE: &str = "mass_storage";

pub struct MassStorageController {
    config: StorageConfig,
    android: AndroidConfig,
    host: Arc<dyn HostOps>,
    events: Arc<EventBus>,
}

impl MassStorageController {
    pub fn new(
        config: StorageConfig,
        android: AndroidConfig,
        host: Arc<dyn HostOps>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            config,
            android,
            host,
            events,
        }
    }

    /// Export the configured mount points
    pub fn activate(&self, mode: &ModeDefinition, sysfs: &mut SysfsIo) -> Result<()> {
        // Give applications the chance to release the filesystems
        self.events.publish(SystemEvent::state(UsbState::PreUnmount));

        let mounts = self.config.mount_points();
        if mounts.is_empty() {
            debug!("No mount points configured for mass storage");
            self.events.publish(SystemEvent::state(UsbState::DataInUse));
            return Ok(());
        }

        if !mode.is_module_less() {
            self.ensure_luns(mounts.len())?;
        }

        for mount in &mounts {
            let mountpoint = resolve(mount);
            self.unmount_with_retry(&mountpoint)?;
        }

        self.host.sleep(SETTLE_DELAY);

        // Sync keeps force-unit-access on, so nofua is its negation
        let nofua = if self.config.sync { "0" } else { "1" };
        for (i, mount) in mounts.iter().enumerate() {
            if mode.is_module_less() {
                let _ = sysfs.write(self.android.enable_path(), "0");
                let _ = sysfs.write(self.android.functions_path(), ANDROID_MASS_STORAGE);
                let _ = sysfs.write(&self.android.mass_storage_lun_file, mount);
                let _ = sysfs.write(self.android.enable_path(), "1");
            } else {
                let _ = sysfs.write(self.config.lun_nofua(i), nofua);
                let _ = sysfs.write(self.config.lun_file(i), mount);
            }
            info!("Lun {} exports {}", i, mount);
        }

        self.events.publish(SystemEvent::state(UsbState::DataInUse));
        Ok(())
    }

    /// Give the exported filesystems back to the device
    ///
    /// `mode` is the mass storage mode being left, or `None` when cleaning up
    /// after an externally loaded mass storage module.
    pub fn deactivate(&self, mode: Option<&ModeDefinition>, sysfs: &mut SysfsIo) -> Result<()> {
        let mut remount_failed = false;

        for (i, mount) in self.config.mount_points().iter().enumerate() {
            let mountpoint = resolve(mount);
            if !self.host.is_mounted(&mountpoint) {
                if let Err(e) = self.host.mount(&mountpoint) {
                    error!("Mounting {} failed: {}", mountpoint.display(), e);
                    remount_failed = true;
                    self.mount_placeholder();
                    self.events
                        .publish(SystemEvent::error(ErrorReason::RemountFailed));
                }
            }

            match mode {
                Some(mode) if mode.is_module_less() => {
                    debug!("Disable android mass storage");
                    let _ = sysfs.write(&self.android.mass_storage_lun_file, "");
                    let _ = sysfs.write(self.android.enable_path(), "0");
                }
                Some(_) => {}
                None => {
                    let _ = sysfs.write(self.config.lun_file(i), "");
                }
            }
        }

        if remount_failed {
            return Err(AppError::Mount {
                mountpoint: self.config.mounts.clone(),
                reason: "remounting after mass storage failed".to_string(),
            });
        }
        Ok(())
    }

    /// Reload the mass storage module when it has fewer luns than mounts
    fn ensure_luns(&self, count: usize) -> Result<()> {
        let last = self.config.lun_file(count - 1);
        if std::fs::File::open(&last).is_ok() {
            return Ok(());
        }

        debug!(
            "{} does not exist, reloading {}",
            last.display(),
            self.config.module
        );
        if let Err(e) = self.host.unload_module(&self.config.module) {
            debug!("Unloading {}: {}", self.config.module, e);
        }
        self.host
            .load_module(&self.config.module, &[format!("luns={}", count)])
    }

    fn unmount_with_retry(&self, mountpoint: &Path) -> Result<()> {
        // The attempt budget is per mount point, not shared across them
        for attempt in 1..=UNMOUNT_ATTEMPTS {
            if !self.host.is_mounted(mountpoint) {
                return Ok(());
            }

            let err = match self.host.unmount(mountpoint) {
                Ok(()) => return Ok(()),
                Err(e) => e,
            };

            if attempt < UNMOUNT_ATTEMPTS {
                warn!(
                    "Unmounting {} failed ({}), retrying",
                    mountpoint.display(),
                    err
                );
                self.host.sleep(UNMOUNT_RETRY_DELAY);
                report_blockers(self.host.as_ref(), &self.events, mountpoint, attempt, false);
            } else {
                error!("Unmounting {} failed: {}", mountpoint.display(), err);
                report_blockers(self.host.as_ref(), &self.events, mountpoint, attempt, true);
                self.events
                    .publish(SystemEvent::error(ErrorReason::UnmountFailed));
                return Err(err);
            }
        }
        Ok(())
    }

    fn mount_placeholder(&self) {
        let Some(alt_mount) = &self.config.alt_mount else {
            return;
        };
        warn!(
            "Mounting read-only placeholder at {}",
            alt_mount.display()
        );
        if let Err(e) = self.host.mount_placeholder(alt_mount) {
            error!("Placeholder mount failed: {}", e);
        }
    }
}

/// Canonical form of a mount point, or the literal path when it cannot be
/// resolved
fn resolve(mount: &str) -> PathBuf {
    std::fs::canonicalize(mount).unwrap_or_else(|_| PathBuf::from(mount))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::drain;
    use crate::host::fake::Fakes;
    use std::fs;
    use tempfile::{tempdir, TempDir};
    use tokio_test::assert_err;

    const MYDOCS: &str = "/home/user/MyDocs";
    const CARD: &str = "/media/sdcard";

    struct Setup {
        _dir: TempDir,
        _android_dir: TempDir,
        fakes: Fakes,
        events: Arc<EventBus>,
        controller: MassStorageController,
        config: StorageConfig,
        android: AndroidConfig,
    }

    fn setup(mounts: &str, luns: usize) -> Setup {
        let dir = tempdir().unwrap();
        let lun_root = dir.path().join("gadget");
        for i in 0..luns {
            fs::create_dir_all(lun_root.join(format!("gadget-lun{}", i))).unwrap();
            fs::write(lun_root.join(format!("gadget-lun{}/file", i)), "\n").unwrap();
            fs::write(lun_root.join(format!("gadget-lun{}/nofua", i)), "0\n").unwrap();
        }
        let (android_dir, android) = crate::gadget::android::tests::android_tree();
        let alt = dir.path().join("alt");

        let config = StorageConfig {
            mounts: mounts.to_string(),
            sync: false,
            alt_mount: Some(alt),
            lun_root,
            ..Default::default()
        };

        let fakes = Fakes::new();
        let events = Arc::new(EventBus::new());
        let controller = MassStorageController::new(
            config.clone(),
            android.clone(),
            fakes.host.clone(),
            events.clone(),
        );
        Setup {
            _dir: dir,
            _android_dir: android_dir,
            fakes,
            events,
            controller,
            config,
            android,
        }
    }

    fn mass_storage(module: &str) -> ModeDefinition {
        ModeDefinition {
            name: "mass_storage".to_string(),
            kernel_module: module.to_string(),
            is_mass_storage: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_activate_two_mount_points() {
        let s = setup(&format!("{},{}", MYDOCS, CARD), 2);
        s.fakes.host.set_mounted(MYDOCS);
        s.fakes.host.set_mounted(CARD);
        let mut rx = s.events.subscribe();
        let mut sysfs = SysfsIo::new(None);

        s.controller
            .activate(&mass_storage("g_mass_storage"), &mut sysfs)
            .unwrap();

        assert_eq!(
            s.fakes.journal.entries(),
            vec![
                format!("umount {}", MYDOCS),
                format!("umount {}", CARD),
                "sleep 1000ms".to_string(),
            ]
        );
        assert_eq!(s.fakes.host.sleeps(), vec![SETTLE_DELAY]);

        let writes: Vec<(PathBuf, String)> = sysfs
            .history()
            .map(|r| (r.path.clone(), r.value.clone()))
            .collect();
        assert_eq!(
            writes,
            // sync = false: the gadget may skip force-unit-access
            vec![
                (s.config.lun_nofua(0), "1".to_string()),
                (s.config.lun_file(0), MYDOCS.to_string()),
                (s.config.lun_nofua(1), "1".to_string()),
                (s.config.lun_file(1), CARD.to_string()),
            ]
        );

        assert_eq!(
            drain(&mut rx),
            vec![
                SystemEvent::state(UsbState::PreUnmount),
                SystemEvent::state(UsbState::DataInUse),
            ]
        );
    }

    #[test]
    fn test_sync_keeps_force_unit_access() {
        let mut s = setup(MYDOCS, 1);
        s.config.sync = true;
        let controller = MassStorageController::new(
            s.config.clone(),
            s.android.clone(),
            s.fakes.host.clone(),
            s.events.clone(),
        );
        let mut sysfs = SysfsIo::new(None);

        controller
            .activate(&mass_storage("g_mass_storage"), &mut sysfs)
            .unwrap();

        let first = sysfs.history().next().unwrap();
        assert_eq!(first.path, s.config.lun_nofua(0));
        assert_eq!(first.value, "0");
    }

    #[test]
    fn test_unmount_retries_then_gives_up() {
        let s = setup(MYDOCS, 1);
        s.fakes.host.set_mounted(MYDOCS);
        s.fakes.host.fail_unmount(MYDOCS, usize::MAX);
        s.fakes
            .host
            .set_open_files("COMMAND PID\ntracker 1234\n");
        let mut rx = s.events.subscribe();
        let mut sysfs = SysfsIo::new(None);

        let result = s
            .controller
            .activate(&mass_storage("g_mass_storage"), &mut sysfs);
        assert!(matches!(result, Err(AppError::Mount { .. })));

        let journal = s.fakes.journal.entries();
        assert_eq!(s.fakes.journal.count(&format!("umount {}", MYDOCS)), 4);
        assert_eq!(s.fakes.journal.count(&format!("lsof {}", MYDOCS)), 4);
        assert_eq!(s.fakes.host.sleeps(), vec![UNMOUNT_RETRY_DELAY; 3]);
        assert_eq!(journal.last().unwrap(), &format!("lsof {}", MYDOCS));
        assert_eq!(sysfs.history().count(), 0);

        let events = drain(&mut rx);
        let blocked = SystemEvent::error(ErrorReason::BlockedBy("tracker".to_string()));
        assert_eq!(events.iter().filter(|e| **e == blocked).count(), 4);
        assert_eq!(
            events.last().unwrap(),
            &SystemEvent::error(ErrorReason::UnmountFailed)
        );
        assert!(!events.contains(&SystemEvent::state(UsbState::DataInUse)));
    }

    #[test]
    fn test_unmount_succeeds_on_retry() {
        let s = setup(MYDOCS, 1);
        s.fakes.host.set_mounted(MYDOCS);
        s.fakes.host.fail_unmount(MYDOCS, 2);
        let mut sysfs = SysfsIo::new(None);

        s.controller
            .activate(&mass_storage("g_mass_storage"), &mut sysfs)
            .unwrap();
        assert_eq!(s.fakes.journal.count(&format!("umount {}", MYDOCS)), 3);
        assert_eq!(
            s.fakes.host.sleeps(),
            vec![UNMOUNT_RETRY_DELAY, UNMOUNT_RETRY_DELAY, SETTLE_DELAY]
        );
    }

    #[test]
    fn test_no_mounts_configured() {
        let s = setup("", 0);
        let mut rx = s.events.subscribe();
        let mut sysfs = SysfsIo::new(None);

        s.controller
            .activate(&mass_storage("g_mass_storage"), &mut sysfs)
            .unwrap();
        assert!(s.fakes.host.sleeps().is_empty());
        assert_eq!(
            drain(&mut rx),
            vec![
                SystemEvent::state(UsbState::PreUnmount),
                SystemEvent::state(UsbState::DataInUse),
            ]
        );
    }

    #[test]
    fn test_module_reloaded_for_missing_luns() {
        let s = setup(&format!("{},{}", MYDOCS, CARD), 1);
        let mut sysfs = SysfsIo::new(None);

        s.controller
            .activate(&mass_storage("g_mass_storage"), &mut sysfs)
            .unwrap();
        let journal = s.fakes.journal.entries();
        assert_eq!(journal[0], "rmmod g_mass_storage");
        assert_eq!(journal[1], "modprobe g_mass_storage luns=2");
    }

    #[test]
    fn test_module_reload_failure_aborts() {
        let s = setup(MYDOCS, 0);
        s.fakes.host.fail_module_load();
        s.fakes.host.set_mounted(MYDOCS);
        let mut sysfs = SysfsIo::new(None);

        assert_err!(s
            .controller
            .activate(&mass_storage("g_mass_storage"), &mut sysfs));
        assert_eq!(s.fakes.journal.count(&format!("umount {}", MYDOCS)), 0);
    }

    #[test]
    fn test_module_less_activation() {
        let s = setup(MYDOCS, 0);
        let mut sysfs = SysfsIo::new(Some(s.android.functions_path()));

        s.controller
            .activate(&mass_storage("none"), &mut sysfs)
            .unwrap();
        // No module reload for the module-less backend
        assert!(!s
            .fakes
            .journal
            .entries()
            .iter()
            .any(|e| e.starts_with("modprobe")));

        let writes: Vec<(PathBuf, String)> = sysfs
            .history()
            .map(|r| (r.path.clone(), r.value.clone()))
            .collect();
        assert_eq!(
            writes,
            vec![
                (s.android.enable_path(), "0".to_string()),
                (s.android.functions_path(), "mass_storage".to_string()),
                (s.android.mass_storage_lun_file.clone(), MYDOCS.to_string()),
                (s.android.enable_path(), "1".to_string()),
            ]
        );
    }

    #[test]
    fn test_deactivate_remounts_and_clears_luns() {
        let s = setup(&format!("{},{}", MYDOCS, CARD), 2);
        s.fakes.host.set_mounted(CARD);
        let mut sysfs = SysfsIo::new(None);

        s.controller.deactivate(None, &mut sysfs).unwrap();
        assert_eq!(s.fakes.journal.entries(), vec![format!("mount {}", MYDOCS)]);
        let cleared: Vec<PathBuf> = sysfs.history().map(|r| r.path.clone()).collect();
        assert_eq!(cleared, vec![s.config.lun_file(0), s.config.lun_file(1)]);
    }

    #[test]
    fn test_deactivate_remount_failure() {
        let s = setup(MYDOCS, 1);
        s.fakes.host.fail_mount();
        let mut rx = s.events.subscribe();
        let mut sysfs = SysfsIo::new(None);

        let mode = mass_storage("none");
        assert_err!(s.controller.deactivate(Some(&mode), &mut sysfs));

        let alt = s.config.alt_mount.clone().unwrap();
        assert_eq!(
            s.fakes.journal.entries(),
            vec![
                format!("mount {}", MYDOCS),
                format!("placeholder {}", alt.display()),
            ]
        );
        assert_eq!(
            drain(&mut rx),
            vec![SystemEvent::error(ErrorReason::RemountFailed)]
        );
        let writes: Vec<PathBuf> = sysfs.history().map(|r| r.path.clone()).collect();
        assert_eq!(
            writes,
            vec![s.android.mass_storage_lun_file.clone(), s.android.enable_path()]
        );
    }
}
