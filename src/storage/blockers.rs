//! Diagnostics for mounts that refuse to unmount

use std::path::Path;

use tracing::{error, warn};

use crate::events::{ErrorReason, EventBus, SystemEvent};
use crate::host::HostOps;

/// Process identifiers from an `lsof` style listing
///
/// The first line is a header; the first field of every other non-empty
/// line identifies the process.
pub fn parse_blockers(listing: &str) -> Vec<String> {
    listing
        .lines()
        .skip(1)
        .filter_map(|line| line.split_whitespace().next())
        .map(str::to_string)
        .collect()
}

/// Log and publish the processes keeping `mountpoint` busy
pub fn report_blockers(
    host: &dyn HostOps,
    events: &EventBus,
    mountpoint: &Path,
    attempt: usize,
    terminal: bool,
) {
    let listing = match host.list_open_files(mountpoint) {
        Ok(listing) => listing,
        Err(e) => {
            warn!("Listing open files of {}: {}", mountpoint.display(), e);
            return;
        }
    };

    for blocker in parse_blockers(&listing) {
        error!(
            "{} blocks unmounting {} (attempt {})",
            blocker,
            mountpoint.display(),
            attempt
        );
        events.publish(SystemEvent::error(ErrorReason::BlockedBy(blocker)));
    }

    if terminal {
        error!("Giving up on unmounting {}", mountpoint.display());
    }
}
