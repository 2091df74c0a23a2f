//! Host operations backed by system utilities

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use procfs::process::Process;
use tracing::debug;

use super::HostOps;
use crate::error::{AppError, Result};

/// `HostOps` implementation running `mount`, `umount`, `modprobe` and `lsof`
#[derive(Debug, Default)]
pub struct ShellHost;

impl ShellHost {
    pub fn new() -> Self {
        Self
    }
}

/// Run a command and map a non-zero exit status to an error message
fn run(program: &str, args: &[&str]) -> std::result::Result<(), String> {
    debug!("exec: {} {}", program, args.join(" "));
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .map_err(|e| format!("failed to execute {}: {}", program, e))?;

    if output.status.success() {
        Ok(())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(format!(
            "{} exited with {}: {}",
            program,
            output.status,
            stderr.trim()
        ))
    }
}

/// Whether `mountpoint` is one of the listed mount targets
pub(crate) fn is_mount_target<'a>(
    targets: impl IntoIterator<Item = &'a Path>,
    mountpoint: &Path,
) -> bool {
    // Path equality ignores a trailing slash
    targets.into_iter().any(|target| target == mountpoint)
}

impl HostOps for ShellHost {
    fn is_mounted(&self, mountpoint: &Path) -> bool {
        match Process::myself().and_then(|process| process.mountinfo()) {
            Ok(mountinfo) => {
                let targets: Vec<PathBuf> =
                    mountinfo.into_iter().map(|m| m.mount_point).collect();
                is_mount_target(targets.iter().map(PathBuf::as_path), mountpoint)
            }
            Err(e) => {
                debug!("mountinfo: {}", e);
                false
            }
        }
    }

    fn mount(&self, mountpoint: &Path) -> Result<()> {
        let target = mountpoint.to_string_lossy();
        run("mount", &[&target]).map_err(|reason| AppError::Mount {
            mountpoint: target.to_string(),
            reason,
        })
    }

    fn mount_placeholder(&self, mountpoint: &Path) -> Result<()> {
        let target = mountpoint.to_string_lossy();
        run(
            "mount",
            &["-t", "tmpfs", "tmpfs", "-o", "ro,size=512K", &target],
        )
        .map_err(|reason| AppError::Mount {
            mountpoint: target.to_string(),
            reason,
        })
    }

    fn unmount(&self, mountpoint: &Path) -> Result<()> {
        let target = mountpoint.to_string_lossy();
        run("umount", &[&target]).map_err(|reason| AppError::Mount {
            mountpoint: target.to_string(),
            reason,
        })
    }

    fn unload_module(&self, module: &str) -> Result<()> {
        run("modprobe", &["-r", module]).map_err(|reason| AppError::Module {
            module: module.to_string(),
            reason,
        })
    }

    fn load_module(&self, module: &str, params: &[String]) -> Result<()> {
        let mut args = vec![module];
        args.extend(params.iter().map(String::as_str));
        run("modprobe", &args).map_err(|reason| AppError::Module {
            module: module.to_string(),
            reason,
        })
    }

    fn list_open_files(&self, path: &Path) -> Result<String> {
        let output = Command::new("lsof")
            .arg(path)
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output()?;
        // lsof exits non-zero when nothing is open; the listing is still valid
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}
