//! Core data types shared between the control service and its callers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Load averages over 1, 5 and 15 minutes
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LoadAverage {
    pub one: f64,
    pub five: f64,
    pub fifteen: f64,
}

/// Root filesystem usage in bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DiskSpace {
    pub total: u64,
    pub used: u64,
    pub free: u64,
}

impl DiskSpace {
    /// Used space as a percentage of total, `None` for a zero-sized disk
    pub fn percentage_used(&self) -> Option<f64> {
        if self.total == 0 {
            return None;
        }
        Some(self.used as f64 * 100.0 / self.total as f64)
    }
}

/// Point-in-time snapshot of machine metrics. Never cached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemStatus {
    /// Seconds since boot
    pub uptime: u64,
    pub load_average: LoadAverage,
    /// Bytes
    pub total_memory: u64,
    /// Bytes
    pub free_memory: u64,
    /// Percent, 0-100
    pub cpu_usage: f64,
    /// Degrees Celsius; absent when the device has no readable sensor
    pub temperature: Option<f64>,
    pub disk_space: DiskSpace,
    pub collected_at: DateTime<Utc>,
}

/// Component covered by the health check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    Disk,
    Memory,
    Cpu,
}

impl Component {
    pub fn as_str(&self) -> &'static str {
        match self {
            Component::Disk => "disk",
            Component::Memory => "memory",
            Component::Cpu => "cpu",
        }
    }
}

impl std::fmt::Display for Component {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Verdict for a single component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheck {
    pub component: Component,
    pub healthy: bool,
    /// e.g. `percentage_used`, `cpu_usage`, or `error` when the probe failed
    pub details: BTreeMap<String, serde_json::Value>,
}

/// Aggregate verdict over disk, memory and cpu, in that order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub healthy: bool,
    pub message: String,
    pub checks: Vec<HealthCheck>,
    pub checked_at: DateTime<Utc>,
}

impl HealthCheckResult {
    pub fn check(&self, component: Component) -> Option<&HealthCheck> {
        self.checks.iter().find(|c| c.component == component)
    }
}
