//! Command Policy - the allowlist of everything kioskd may execute
//!
//! The allowlist is the only gate between a caller and a subprocess:
//! - Commands are looked up by exact program name
//! - Arguments arrive already tokenized and are checked one by one
//! - Nothing is ever joined into a shell string
//!
//! An entry with an empty argument set accepts no arguments at all.

use crate::error::{ControlError, ControlResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Default thermal zone read for the temperature probe
pub const DEFAULT_THERMAL_PATH: &str = "/sys/class/thermal/thermal_zone0/temp";

/// One permitted program and the argument tokens it may receive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowlistEntry {
    pub command: String,
    pub permitted_args: BTreeSet<String>,
}

impl AllowlistEntry {
    pub fn new(command: &str, permitted_args: &[&str]) -> Self {
        Self {
            command: command.to_string(),
            permitted_args: permitted_args.iter().map(|a| a.to_string()).collect(),
        }
    }

    fn permits(&self, args: &[String]) -> bool {
        if self.permitted_args.is_empty() {
            return args.is_empty();
        }
        args.iter().all(|arg| self.permitted_args.contains(arg))
    }
}

/// Immutable allowlist, built once at startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandPolicy {
    entries: BTreeMap<String, AllowlistEntry>,
}

impl CommandPolicy {
    /// The production allowlist, with the given thermal zone as the only
    /// file `cat` may read.
    pub fn standard(thermal_path: &str) -> Self {
        Self::from_entries(vec![
            AllowlistEntry::new("shutdown", &["-h", "-r", "-c", "now"]),
            AllowlistEntry::new("systemctl", &["suspend"]),
            AllowlistEntry::new("pm-suspend", &[]),
            AllowlistEntry::new("which", &["systemctl", "pm-suspend"]),
            AllowlistEntry::new("top", &["-bn1"]),
            AllowlistEntry::new("df", &["/", "--output=size,used,avail"]),
            AllowlistEntry::new("cat", &[thermal_path]),
        ])
    }

    /// Build a policy from explicit entries. A later entry for the same
    /// command replaces an earlier one.
    pub fn from_entries(entries: Vec<AllowlistEntry>) -> Self {
        Self {
            entries: entries
                .into_iter()
                .map(|e| (e.command.clone(), e))
                .collect(),
        }
    }

    /// Check a command and its argv against the allowlist
    pub fn validate(&self, command: &str, args: &[String]) -> ControlResult<()> {
        let entry = self
            .entries
            .get(command)
            .ok_or_else(|| ControlError::CommandNotAllowed {
                command: command.to_string(),
            })?;

        if !entry.permits(args) {
            return Err(ControlError::CommandArgsNotAllowed {
                command: command.to_string(),
                args: args.to_vec(),
            });
        }

        Ok(())
    }

    pub fn get(&self, command: &str) -> Option<&AllowlistEntry> {
        self.entries.get(command)
    }

    pub fn entries(&self) -> impl Iterator<Item = &AllowlistEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for CommandPolicy {
    fn default() -> Self {
        Self::standard(DEFAULT_THERMAL_PATH)
    }
}
