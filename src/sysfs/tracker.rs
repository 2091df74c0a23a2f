//! Tracking of values written to kernel interfaces
//!
//! Every readable attribute the daemon writes is remembered here together
//! with the value it should hold. `verify_all` later re-reads those paths and
//! reports values that changed behind the daemon's back.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{info, warn};

use super::{read_value, READ_LIMIT};

/// One observed deviation from a remembered value
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DriftReport {
    pub path: PathBuf,
    pub expected: String,
    /// `None` when the path can no longer be read
    pub observed: Option<String>,
    /// Only the ASCII case differs (hex digit formatting)
    pub benign: bool,
}

/// Remembered `path -> value` associations
#[derive(Debug, Default)]
pub struct ValueTracker {
    values: BTreeMap<PathBuf, String>,
}

impl ValueTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert (`Some`) or forget (`None`) the expected value of a path
    pub fn remember(&mut self, path: &Path, value: Option<&str>) {
        match value {
            Some(value) => {
                self.values.insert(path.to_path_buf(), value.to_string());
            }
            None => {
                self.values.remove(path);
            }
        }
    }

    pub fn get(&self, path: &Path) -> Option<&str> {
        self.values.get(path).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Re-read every tracked path and report the ones that changed
    ///
    /// The remembered value always converges to what was observed, so a
    /// single external change is reported exactly once.
    pub fn verify_all(&mut self) -> Vec<DriftReport> {
        let tracked: Vec<(PathBuf, String)> = self
            .values
            .iter()
            .map(|(path, value)| (path.clone(), value.clone()))
            .collect();

        let mut reports = Vec::new();
        for (path, expected) in tracked {
            let observed = read_value(&path, READ_LIMIT);
            if observed.as_deref() == Some(expected.as_str()) {
                continue;
            }

            let benign = observed
                .as_deref()
                .is_some_and(|current| current.eq_ignore_ascii_case(&expected));

            if benign {
                info!(
                    "unexpected change '{}' : '{}' -> '{}' (case diff only)",
                    path.display(),
                    expected,
                    observed.as_deref().unwrap_or("???")
                );
            } else {
                warn!(
                    "unexpected change '{}' : '{}' -> '{}'",
                    path.display(),
                    expected,
                    observed.as_deref().unwrap_or("???")
                );
            }

            self.remember(&path, observed.as_deref());
            reports.push(DriftReport {
                path,
                expected,
                observed,
                benign,
            });
        }
        reports
    }
}
