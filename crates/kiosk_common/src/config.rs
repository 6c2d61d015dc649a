//! Configuration management for kioskd.
//!
//! Loads settings from /etc/kiosk-control/config.toml or uses defaults.
//! The file is read once at startup; nothing here is reloaded at runtime.

use crate::policy::{CommandPolicy, DEFAULT_THERMAL_PATH};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Config file path
pub const CONFIG_PATH: &str = "/etc/kiosk-control/config.toml";

/// Fallback config file path
pub const DEFAULT_CONFIG_PATH: &str = "/var/lib/kiosk-control/config.toml";

/// Subprocess execution settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Hard deadline applied to every subprocess, in milliseconds
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
}

fn default_command_timeout_ms() -> u64 {
    5000
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            command_timeout_ms: default_command_timeout_ms(),
        }
    }
}

impl ExecutorConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

/// Diagnostics collection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticsConfig {
    /// Thermal zone file holding millidegrees Celsius
    #[serde(default = "default_thermal_path")]
    pub thermal_path: String,
}

fn default_thermal_path() -> String {
    DEFAULT_THERMAL_PATH.to_string()
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            thermal_path: default_thermal_path(),
        }
    }
}

/// Health thresholds, in percent. A component at or above its threshold
/// is unhealthy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HealthThresholds {
    #[serde(default = "default_disk_usage")]
    pub disk_usage_percent: f64,

    #[serde(default = "default_memory_usage")]
    pub memory_usage_percent: f64,

    #[serde(default = "default_cpu_usage")]
    pub cpu_usage_percent: f64,
}

fn default_disk_usage() -> f64 {
    90.0
}

fn default_memory_usage() -> f64 {
    95.0
}

fn default_cpu_usage() -> f64 {
    90.0
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            disk_usage_percent: default_disk_usage(),
            memory_usage_percent: default_memory_usage(),
            cpu_usage_percent: default_cpu_usage(),
        }
    }
}

/// Caller-side retry settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the second attempt; grows linearly after that
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

/// Process-level settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Refuse to start unless running as root
    #[serde(default = "default_require_root")]
    pub require_root: bool,

    /// Log filter used when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_require_root() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            require_root: default_require_root(),
            log_level: default_log_level(),
        }
    }
}

/// Full kioskd configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub executor: ExecutorConfig,

    #[serde(default)]
    pub diagnostics: DiagnosticsConfig,

    #[serde(default)]
    pub health: HealthThresholds,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub service: ServiceConfig,
}

impl Config {
    /// Load config from the standard locations, falling back to defaults
    pub fn load() -> Self {
        Self::load_first(&[CONFIG_PATH, DEFAULT_CONFIG_PATH])
    }

    /// First config in `paths` that reads and parses, defaults if none does.
    /// Every skipped path is logged with its error.
    pub fn load_first<P: AsRef<Path>>(paths: &[P]) -> Self {
        for path in paths {
            match Self::load_from_path(path) {
                Ok(config) => return config,
                Err(e) => warn!("Skipping config {}: {:#}", path.as_ref().display(), e),
            }
        }
        warn!("No usable config found, using defaults");
        Config::default()
    }

    /// Load config from a specific path
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// The allowlist this configuration implies
    pub fn command_policy(&self) -> CommandPolicy {
        CommandPolicy::standard(&self.diagnostics.thermal_path)
    }
}
