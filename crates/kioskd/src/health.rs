//! Health evaluation - fixed thresholds over diagnostics
//!
//! Disk, memory and CPU are checked concurrently. A check whose probe
//! fails is reported unhealthy with the error in its details; it never
//! aborts the other two.

use crate::diagnostics::DiagnosticsCollector;
use chrono::Utc;
use kiosk_common::config::HealthThresholds;
use kiosk_common::{Component, ControlError, HealthCheck, HealthCheckResult};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

pub struct HealthEvaluator {
    diagnostics: Arc<DiagnosticsCollector>,
    thresholds: HealthThresholds,
}

impl HealthEvaluator {
    pub fn new(diagnostics: Arc<DiagnosticsCollector>, thresholds: HealthThresholds) -> Self {
        Self {
            diagnostics,
            thresholds,
        }
    }

    pub fn thresholds(&self) -> &HealthThresholds {
        &self.thresholds
    }

    pub async fn health_check(&self) -> HealthCheckResult {
        let (disk, memory, cpu) = tokio::join!(
            self.check_disk(),
            async { self.check_memory() },
            self.check_cpu()
        );

        let checks = vec![disk, memory, cpu];
        let failing: Vec<&str> = checks
            .iter()
            .filter(|c| !c.healthy)
            .map(|c| c.component.as_str())
            .collect();
        let healthy = failing.is_empty();

        let message = if healthy {
            info!("System is healthy");
            "System is healthy".to_string()
        } else {
            warn!(components = ?failing, "System health check failed");
            format!("System health check failed: {}", failing.join(", "))
        };

        HealthCheckResult {
            healthy,
            message,
            checks,
            checked_at: Utc::now(),
        }
    }

    async fn check_disk(&self) -> HealthCheck {
        match self.diagnostics.disk_space().await {
            Ok(disk) => match disk.percentage_used() {
                Some(pct) => usage_check(
                    Component::Disk,
                    "percentage_used",
                    pct,
                    self.thresholds.disk_usage_percent,
                ),
                None => unavailable(Component::Disk, "disk reported zero total size"),
            },
            Err(e) => failed_check(Component::Disk, &e),
        }
    }

    fn check_memory(&self) -> HealthCheck {
        match self.diagnostics.memory().percentage_used() {
            Some(pct) => usage_check(
                Component::Memory,
                "percentage_used",
                pct,
                self.thresholds.memory_usage_percent,
            ),
            None => unavailable(Component::Memory, "host reported zero total memory"),
        }
    }

    async fn check_cpu(&self) -> HealthCheck {
        match self.diagnostics.cpu_usage().await {
            Ok(usage) => usage_check(
                Component::Cpu,
                "cpu_usage",
                usage,
                self.thresholds.cpu_usage_percent,
            ),
            Err(e) => failed_check(Component::Cpu, &e),
        }
    }
}

/// A usage at or above the threshold is unhealthy
pub fn is_within_threshold(usage_percent: f64, threshold_percent: f64) -> bool {
    usage_percent < threshold_percent
}

/// Build the verdict for a measured usage
pub fn usage_check(component: Component, key: &str, usage: f64, threshold: f64) -> HealthCheck {
    let mut details = BTreeMap::new();
    details.insert(key.to_string(), json!(usage));
    details.insert("threshold".to_string(), json!(threshold));
    HealthCheck {
        component,
        healthy: is_within_threshold(usage, threshold),
        details,
    }
}

fn failed_check(component: Component, error: &ControlError) -> HealthCheck {
    warn!(component = component.as_str(), code = error.code(), error = %error, "Health probe failed");
    let mut details = BTreeMap::new();
    details.insert("error".to_string(), json!(error.to_string()));
    details.insert("code".to_string(), json!(error.code()));
    HealthCheck {
        component,
        healthy: false,
        details,
    }
}

fn unavailable(component: Component, reason: &str) -> HealthCheck {
    let mut details = BTreeMap::new();
    details.insert("error".to_string(), json!(reason));
    HealthCheck {
        component,
        healthy: false,
        details,
    }
}
