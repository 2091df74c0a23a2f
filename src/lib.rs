//! usbmode - USB gadget mode-setting engine
//!
//! This crate switches a device's USB gadget between modes (MTP, mass
//! storage, networking, ...) described by mode definition files, using
//! ConfigFS, the Android `android_usb` driver or externally loaded gadget
//! modules.

pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod gadget;
pub mod host;
pub mod modes;
pub mod storage;
pub mod sysfs;

pub use error::{AppError, Result};
