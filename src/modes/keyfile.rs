//! Minimal key file reader
//!
//! Understands the subset of the GLib key file format used by mode
//! definitions: `[section]` headers, `key=value` entries, `#`/`;` comments.

use std::collections::HashMap;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyFileError {
    #[error("line {0}: entry outside of any section")]
    NoSection(usize),
    #[error("line {0}: malformed line")]
    Malformed(usize),
    #[error("line {0}: empty key")]
    EmptyKey(usize),
}

/// Parsed key file: section -> key -> raw value
#[derive(Debug, Default)]
pub struct KeyFile {
    sections: HashMap<String, HashMap<String, String>>,
}

impl KeyFile {
    pub fn parse(text: &str) -> Result<Self, KeyFileError> {
        let mut sections: HashMap<String, HashMap<String, String>> = HashMap::new();
        let mut current: Option<String> = None;

        for (index, raw) in text.lines().enumerate() {
            let lineno = index + 1;
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }

            if let Some(rest) = line.strip_prefix('[') {
                let name = rest
                    .strip_suffix(']')
                    .ok_or(KeyFileError::Malformed(lineno))?;
                sections.entry(name.to_string()).or_default();
                current = Some(name.to_string());
                continue;
            }

            let (key, value) = line
                .split_once('=')
                .ok_or(KeyFileError::Malformed(lineno))?;
            let key = key.trim();
            if key.is_empty() {
                return Err(KeyFileError::EmptyKey(lineno));
            }
            let section = current.as_ref().ok_or(KeyFileError::NoSection(lineno))?;
            sections
                .entry(section.clone())
                .or_default()
                .insert(key.to_string(), value.trim().to_string());
        }

        Ok(Self { sections })
    }

    pub fn get_string(&self, section: &str, key: &str) -> Option<String> {
        self.sections.get(section)?.get(key).cloned()
    }

    /// Integer value; missing or non-numeric entries read as 0
    pub fn get_integer(&self, section: &str, key: &str) -> i64 {
        self.sections
            .get(section)
            .and_then(|s| s.get(key))
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }

    pub fn get_flag(&self, section: &str, key: &str) -> bool {
        self.get_integer(section, key) != 0
    }
}
