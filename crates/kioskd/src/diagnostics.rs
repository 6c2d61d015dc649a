//! System diagnostics collection
//!
//! Uptime, load and memory come straight from the host. Temperature, disk
//! space and CPU usage each need an allowlisted subprocess and are collected
//! concurrently. A failed temperature read means "no sensor" and is
//! reported as absent; disk and CPU failures are errors.

use crate::executor::BoundedExecutor;
use chrono::Utc;
use kiosk_common::{ControlError, ControlResult, DiskSpace, LoadAverage, SystemStatus};
use std::sync::{Arc, Mutex};
use sysinfo::System;
use tracing::{debug, error};

/// Total and free memory, in bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemorySnapshot {
    pub total: u64,
    pub free: u64,
}

impl MemorySnapshot {
    /// Used memory as a percentage of total, `None` if total is zero
    pub fn percentage_used(&self) -> Option<f64> {
        if self.total == 0 {
            return None;
        }
        let used = self.total.saturating_sub(self.free);
        Some(used as f64 * 100.0 / self.total as f64)
    }
}

/// Cheap, always-available host metrics
pub trait HostIntrospection: Send + Sync {
    /// Seconds since boot
    fn uptime(&self) -> u64;
    fn load_average(&self) -> LoadAverage;
    fn memory(&self) -> MemorySnapshot;
}

/// Host metrics from `sysinfo`
pub struct SysinfoHost {
    sys: Mutex<System>,
}

impl SysinfoHost {
    pub fn new() -> Self {
        Self {
            sys: Mutex::new(System::new()),
        }
    }
}

impl Default for SysinfoHost {
    fn default() -> Self {
        Self::new()
    }
}

impl HostIntrospection for SysinfoHost {
    fn uptime(&self) -> u64 {
        System::uptime()
    }

    fn load_average(&self) -> LoadAverage {
        let load = System::load_average();
        LoadAverage {
            one: load.one,
            five: load.five,
            fifteen: load.fifteen,
        }
    }

    fn memory(&self) -> MemorySnapshot {
        let mut sys = self.sys.lock().unwrap_or_else(|p| p.into_inner());
        sys.refresh_memory();
        // "free" here is what the kernel can hand out without swapping
        MemorySnapshot {
            total: sys.total_memory(),
            free: sys.available_memory(),
        }
    }
}

/// Collects a fresh [`SystemStatus`] on every call
pub struct DiagnosticsCollector {
    executor: Arc<BoundedExecutor>,
    host: Arc<dyn HostIntrospection>,
    thermal_path: String,
}

impl DiagnosticsCollector {
    pub fn new(
        executor: Arc<BoundedExecutor>,
        host: Arc<dyn HostIntrospection>,
        thermal_path: impl Into<String>,
    ) -> Self {
        Self {
            executor,
            host,
            thermal_path: thermal_path.into(),
        }
    }

    pub async fn status(&self) -> ControlResult<SystemStatus> {
        let (temperature, disk_space, cpu_usage) =
            tokio::join!(self.temperature(), self.disk_space(), self.cpu_usage());

        let (disk_space, cpu_usage) = match (disk_space, cpu_usage) {
            (Ok(disk), Ok(cpu)) => (disk, cpu),
            (Err(e), _) | (_, Err(e)) => {
                error!(code = e.code(), error = %e, "Failed to get system status");
                return Err(e);
            }
        };

        let memory = self.host.memory();

        Ok(SystemStatus {
            uptime: self.host.uptime(),
            load_average: self.host.load_average(),
            total_memory: memory.total,
            free_memory: memory.free,
            cpu_usage,
            temperature,
            disk_space,
            collected_at: Utc::now(),
        })
    }

    /// Degrees Celsius, or `None` when the sensor cannot be read
    pub async fn temperature(&self) -> Option<f64> {
        match self.executor.run("cat", &[self.thermal_path.as_str()]).await {
            Ok(raw) => {
                let celsius = parse_millidegrees(&raw);
                if celsius.is_none() {
                    debug!(raw = %raw, "Unreadable thermal zone value");
                }
                celsius
            }
            Err(e) => {
                debug!(code = e.code(), error = %e, "Temperature unavailable");
                None
            }
        }
    }

    pub async fn disk_space(&self) -> ControlResult<DiskSpace> {
        let output = self
            .executor
            .run("df", &["/", "--output=size,used,avail"])
            .await?;
        parse_df_output(&output)
    }

    pub async fn cpu_usage(&self) -> ControlResult<f64> {
        let output = self.executor.run("top", &["-bn1"]).await?;
        parse_top_cpu(&output)
    }

    pub fn memory(&self) -> MemorySnapshot {
        self.host.memory()
    }
}

// ============================================================================
// Output parsers
// ============================================================================

/// Parse `df / --output=size,used,avail`, whose figures are 1K blocks
pub fn parse_df_output(output: &str) -> ControlResult<DiskSpace> {
    let parse_error = |detail: &str| ControlError::ParseError {
        what: "disk space".to_string(),
        detail: detail.to_string(),
    };

    let row = output
        .lines()
        .skip(1)
        .find(|line| !line.trim().is_empty())
        .ok_or_else(|| parse_error("no data row in df output"))?;

    let blocks: Vec<u64> = row
        .split_whitespace()
        .map(|field| field.parse::<u64>())
        .collect::<Result<_, _>>()
        .map_err(|_| parse_error(&format!("non-numeric df row: {}", row.trim())))?;

    match blocks.as_slice() {
        [total, used, free] => Ok(DiskSpace {
            total: total.saturating_mul(1024),
            used: used.saturating_mul(1024),
            free: free.saturating_mul(1024),
        }),
        _ => Err(parse_error(&format!(
            "expected 3 columns, found {}",
            blocks.len()
        ))),
    }
}

/// Parse the `Cpu(s)` summary line of `top -bn1`.
///
/// Usage is total busy time, `100 - idle`, so system, iowait and steal
/// time count against the CPU threshold along with user time. Only when
/// the idle field is missing does it fall back to the first (user) field,
/// which understates load on a busy machine.
pub fn parse_top_cpu(output: &str) -> ControlResult<f64> {
    let parse_error = |detail: &str| ControlError::ParseError {
        what: "cpu usage".to_string(),
        detail: detail.to_string(),
    };

    let line = output
        .lines()
        .find(|line| line.contains("Cpu(s)"))
        .ok_or_else(|| parse_error("no Cpu(s) line in top output"))?;

    let (_, fields) = line
        .split_once(':')
        .ok_or_else(|| parse_error("malformed Cpu(s) line"))?;

    let fields: Vec<(f64, String)> = fields.split(',').filter_map(split_cpu_field).collect();

    if let Some((idle, _)) = fields.iter().find(|(_, label)| label == "id") {
        return Ok((100.0 - *idle).clamp(0.0, 100.0));
    }

    fields
        .first()
        .map(|(value, _)| (*value).clamp(0.0, 100.0))
        .ok_or_else(|| parse_error(&format!("no numeric field in: {}", line.trim())))
}

/// `" 3.1 us"` or `" 3.1%us"` into `(3.1, "us")`
fn split_cpu_field(field: &str) -> Option<(f64, String)> {
    let field = field.trim();
    let end = field
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(field.len());
    let value = field[..end].parse::<f64>().ok()?;
    let label = field[end..].trim().trim_start_matches('%').trim().to_string();
    Some((value, label))
}

/// Thermal zone files hold millidegrees Celsius
pub fn parse_millidegrees(raw: &str) -> Option<f64> {
    raw.trim().parse::<i64>().ok().map(|m| m as f64 / 1000.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOP_PROCPS: &str = "top - 10:02:11 up 3 days,  2:01,  1 user,  load average: 0.08, 0.10, 0.09
Tasks: 211 total,   1 running, 210 sleeping,   0 stopped,   0 zombie
%Cpu(s):  6.2 us,  3.1 sy,  0.0 ni, 87.5 id,  3.1 wa,  0.0 hi,  0.0 si,  0.0 st
MiB Mem :  15842.1 total,   9012.3 free,   3120.5 used,   3709.3 buff/cache";

    #[test]
    fn test_parse_top_uses_idle() {
        let usage = parse_top_cpu(TOP_PROCPS).unwrap();
        assert!((usage - 12.5).abs() < 1e-9);
    }

    #[test]
    fn test_parse_top_legacy_percent_labels() {
        let out = "Cpu(s):  2.0%us,  1.0%sy,  0.0%ni, 96.0%id,  1.0%wa";
        let usage = parse_top_cpu(out).unwrap();
        assert!((usage - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_parse_top_without_idle_uses_first_field() {
        let out = "%Cpu(s): 42.5 us";
        assert_eq!(parse_top_cpu(out).unwrap(), 42.5);
    }

    #[test]
    fn test_parse_top_missing_line() {
        let err = parse_top_cpu("CPU:  2% usr  1% sys 96% idle").unwrap_err();
        assert!(matches!(err, ControlError::ParseError { .. }));
    }

    #[test]
    fn test_parse_df() {
        let out = " 1K-blocks     Used    Avail\n 41152736 12345678 26693450";
        let disk = parse_df_output(out).unwrap();
        assert_eq!(disk.total, 41152736 * 1024);
        assert_eq!(disk.used, 12345678 * 1024);
        assert_eq!(disk.free, 26693450 * 1024);
    }

    #[test]
    fn test_parse_df_header_only() {
        let err = parse_df_output(" 1K-blocks     Used    Avail").unwrap_err();
        assert!(matches!(err, ControlError::ParseError { .. }));
    }

    #[test]
    fn test_parse_df_garbage_row() {
        let err = parse_df_output("header\nfoo bar baz").unwrap_err();
        assert!(matches!(err, ControlError::ParseError { .. }));
    }

    #[test]
    fn test_parse_millidegrees() {
        assert_eq!(parse_millidegrees("48500\n"), Some(48.5));
        assert_eq!(parse_millidegrees("-2000"), Some(-2.0));
        assert_eq!(parse_millidegrees(""), None);
    }

    #[test]
    fn test_memory_percentage() {
        let mem = MemorySnapshot {
            total: 1000,
            free: 250,
        };
        assert_eq!(mem.percentage_used(), Some(75.0));
        assert_eq!(MemorySnapshot::default().percentage_used(), None);
    }
}
