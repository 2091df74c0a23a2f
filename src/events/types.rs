//! Notification types
//!
//! Defines the coarse, categorized notifications the engine emits. External
//! observers (D-Bus bridge, UI) receive these instead of raw error detail.

use serde::{Deserialize, Serialize};

/// USB state notifications emitted around mass-storage transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsbState {
    /// Filesystems are about to be unmounted; release open handles
    PreUnmount,
    /// Storage is exported to the host
    DataInUse,
}

/// Reason codes carried by error notifications
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "code", content = "detail")]
pub enum ErrorReason {
    /// Unmounting a shared filesystem failed permanently
    UnmountFailed,
    /// Remounting a filesystem after mass storage failed
    RemountFailed,
    /// A mode could not be activated
    ModeSettingFailed,
    /// A process (identified by its listing field) keeps a mount busy
    BlockedBy(String),
}

/// System event enumeration
///
/// Serialized as `{"event": "...", "data": {...}}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum SystemEvent {
    #[serde(rename = "usb.state")]
    UsbState { state: UsbState },

    #[serde(rename = "usb.error")]
    Error { reason: ErrorReason },

    /// A tracked kernel value changed behind the daemon's back
    #[serde(rename = "sysfs.drift")]
    DriftDetected {
        path: String,
        expected: String,
        observed: Option<String>,
        benign: bool,
    },
}

impl SystemEvent {
    pub fn state(state: UsbState) -> Self {
        Self::UsbState { state }
    }

    pub fn error(reason: ErrorReason) -> Self {
        Self::Error { reason }
    }

    /// Get the event name (for logging)
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::UsbState { .. } => "usb.state",
            Self::Error { .. } => "usb.error",
            Self::DriftDetected { .. } => "sysfs.drift",
        }
    }
}
