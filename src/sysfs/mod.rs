//! Kernel interface file access
//!
//! All reads and writes of sysfs/ConfigFS attributes go through this module so
//! that every write is logged, remembered for drift detection and recorded in
//! a short history.

pub mod tracker;

use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use nix::errno::Errno;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{AppError, Result};
pub use tracker::{DriftReport, ValueTracker};

/// Maximum number of bytes read back from an attribute
pub const READ_LIMIT: usize = 0x1000;

/// Number of writes kept in the history
const HISTORY_CAPACITY: usize = 64;

/// Value written to clear a gadget function list
const FUNCTIONS_NONE: &str = "none";

/// Read an attribute and normalize its whitespace
///
/// Missing and unreadable (permission denied) files are expected and yield
/// `None` silently; other failures are logged.
pub fn read_value(path: &Path, max_bytes: usize) -> Option<String> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) => {
            if !matches!(
                e.kind(),
                io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied
            ) {
                warn!("{}: open: {}", path.display(), e);
            }
            return None;
        }
    };

    let mut data = Vec::with_capacity(max_bytes.min(256));
    if let Err(e) = file.take(max_bytes as u64).read_to_end(&mut data) {
        warn!("{}: read: {}", path.display(), e);
        return None;
    }

    Some(normalize(&String::from_utf8_lossy(&data)))
}

/// Strip leading/trailing whitespace and control characters, collapsing
/// internal runs into a single space
pub fn normalize(text: &str) -> String {
    text.split(|c: char| c <= ' ')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// One entry of the write history
#[derive(Debug, Clone, Serialize)]
pub struct WriteRecord {
    pub at: DateTime<Utc>,
    pub path: PathBuf,
    pub value: String,
    pub ok: bool,
}

/// Sysfs reader/writer owning the value tracker
#[derive(Debug)]
pub struct SysfsIo {
    tracker: ValueTracker,
    /// Function list control whose clearing is allowed to fail
    function_list: Option<PathBuf>,
    history: VecDeque<WriteRecord>,
}

impl SysfsIo {
    /// Create a writer; `function_list` is the multi-function gadget's
    /// function list attribute, if the platform has one
    pub fn new(function_list: Option<PathBuf>) -> Self {
        Self {
            tracker: ValueTracker::new(),
            function_list,
            history: VecDeque::with_capacity(HISTORY_CAPACITY),
        }
    }

    /// Write `text` to an existing attribute
    pub fn write(&mut self, path: impl AsRef<Path>, text: &str) -> Result<()> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Err(AppError::Internal("empty sysfs path".to_string()));
        }

        // Clearing the function list only works by writing an unknown
        // function name, which the kernel rejects with EINVAL.
        let clear = self.function_list.as_deref() == Some(path)
            && (text.is_empty() || text == FUNCTIONS_NONE);
        let text = if clear { FUNCTIONS_NONE } else { text };

        let previous = read_value(path, READ_LIMIT);
        if previous.is_some() {
            self.tracker
                .remember(path, Some(if clear { "" } else { text }));
        }

        debug!(
            "WRITE '{}' : '{}' --> '{}'",
            path.display(),
            previous.as_deref().unwrap_or("???"),
            text
        );

        let result = write_attribute(path, text);
        self.record(path, text, result.is_ok());

        match result {
            Ok(()) => Ok(()),
            Err(e) if clear => {
                if e.raw_os_error() == Some(Errno::EINVAL as i32) {
                    debug!("write({}): {} (expected failure)", path.display(), e);
                } else {
                    warn!("write({}): {}", path.display(), e);
                }
                Ok(())
            }
            Err(e) => {
                warn!("write({}): {}", path.display(), e);
                Err(AppError::sysfs(path, e))
            }
        }
    }

    /// Record a non-write gadget operation (function linking) in the history
    pub fn note_link(&mut self, path: &Path, value: &str) {
        debug!("LINK '{}' --> '{}'", path.display(), value);
        self.record(path, value, true);
    }

    /// Check tracked attributes for external changes
    pub fn verify_values(&mut self) -> Vec<DriftReport> {
        self.tracker.verify_all()
    }

    pub fn tracker(&self) -> &ValueTracker {
        &self.tracker
    }

    /// Most recent writes, oldest first
    pub fn history(&self) -> impl Iterator<Item = &WriteRecord> {
        self.history.iter()
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    fn record(&mut self, path: &Path, value: &str, ok: bool) {
        if self.history.len() == HISTORY_CAPACITY {
            self.history.pop_front();
        }
        self.history.push_back(WriteRecord {
            at: Utc::now(),
            path: path.to_path_buf(),
            value: value.to_string(),
            ok,
        });
    }
}

/// Open without creating and write the payload in one buffer
///
/// sysfs processes the value on the first write(), so the newline-terminated
/// payload is built up front.
fn write_attribute(path: &Path, text: &str) -> io::Result<()> {
    let mut file = loop {
        match OpenOptions::new().write(true).open(path) {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            other => break other?,
        }
    };

    let mut data = text.as_bytes().to_vec();
    if !text.ends_with('\n') {
        data.push(b'\n');
    }

    // write_all retries on EINTR
    file.write_all(&data)?;
    file.flush()
}
