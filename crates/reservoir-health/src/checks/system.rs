//! Host resource checks: disk space with a write probe, memory and CPU.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use reservoir_core::{ComponentHealth, ComponentType, HealthStatus};
use sysinfo::{Disks, MINIMUM_CPU_UPDATE_INTERVAL, System};

use crate::check::{ComponentCheck, classify_percentage};
use crate::config::Thresholds;
use crate::error::HealthCheckError;

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

#[derive(Debug, Clone, Copy)]
struct DiskUsage {
    total_bytes: u64,
    available_bytes: u64,
}

impl DiskUsage {
    fn used_percent(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        let used = self.total_bytes.saturating_sub(self.available_bytes);
        used as f64 / self.total_bytes as f64 * 100.0
    }
}

/// Usage of the disk holding `path`: the mount point with the longest
/// matching prefix.
fn disk_usage_for(path: &Path) -> Option<DiskUsage> {
    let disks = Disks::new_with_refreshed_list();
    disks
        .list()
        .iter()
        .filter(|disk| path.starts_with(disk.mount_point()))
        .max_by_key(|disk| disk.mount_point().as_os_str().len())
        .map(|disk| DiskUsage {
            total_bytes: disk.total_space(),
            available_bytes: disk.available_space(),
        })
}

/// Disk usage of the volume holding the probe directory plus a small
/// write-and-delete test in that directory
pub struct FileSystemCheck {
    thresholds: Thresholds,
    probe_dir: PathBuf,
}

impl FileSystemCheck {
    pub fn new(thresholds: Thresholds, probe_dir: impl Into<PathBuf>) -> Self {
        Self {
            thresholds,
            probe_dir: probe_dir.into(),
        }
    }

    async fn write_probe(&self) -> Result<(), std::io::Error> {
        let path = self
            .probe_dir
            .join(format!("reservoir_health_{}.tmp", uuid::Uuid::new_v4()));
        tokio::fs::write(&path, b"reservoir health check").await?;
        tokio::fs::remove_file(&path).await
    }
}

#[async_trait]
impl ComponentCheck for FileSystemCheck {
    fn name(&self) -> &str {
        "file_system"
    }

    fn component_type(&self) -> ComponentType {
        ComponentType::FileSystem
    }

    async fn check(&self) -> Result<ComponentHealth, HealthCheckError> {
        let dir = self.probe_dir.clone();
        let usage = tokio::task::spawn_blocking(move || {
            let absolute = std::fs::canonicalize(&dir).unwrap_or(dir);
            disk_usage_for(&absolute)
        })
        .await
        .map_err(|e| HealthCheckError::failed(self.name(), e))?;

        let (mut status, mut message, mut health_meta) = match usage {
            Some(usage) => {
                let percent = usage.used_percent();
                let status = classify_percentage(percent, &self.thresholds);
                let message = match status {
                    HealthStatus::Unhealthy => format!("disk space critically low: {percent:.1}% used"),
                    HealthStatus::Degraded => format!("disk space getting low: {percent:.1}% used"),
                    _ => format!("disk space ok: {percent:.1}% used"),
                };
                let meta = vec![
                    ("disk_usage_percent", serde_json::json!((percent * 100.0).round() / 100.0)),
                    (
                        "disk_free_gb",
                        serde_json::json!(usage.available_bytes as f64 / GIB),
                    ),
                ];
                (status, message, meta)
            }
            None => (
                HealthStatus::Healthy,
                "disk usage unavailable for probe directory".to_string(),
                Vec::new(),
            ),
        };

        let write_test = match self.write_probe().await {
            Ok(()) => "passed".to_string(),
            Err(e) => {
                if status == HealthStatus::Healthy {
                    status = HealthStatus::Degraded;
                }
                message.push_str(&format!(", write test failed: {e}"));
                format!("failed: {e}")
            }
        };
        health_meta.push(("write_test", serde_json::json!(write_test)));

        let mut health = ComponentHealth::new(self.name(), self.component_type(), status, message)
            .with_metadata("probe_dir", self.probe_dir.display().to_string());
        for (key, value) in health_meta {
            health = health.with_metadata(key, value);
        }
        Ok(health)
    }
}

/// System memory usage
pub struct MemoryCheck {
    thresholds: Thresholds,
}

impl MemoryCheck {
    pub fn new(thresholds: Thresholds) -> Self {
        Self { thresholds }
    }
}

#[async_trait]
impl ComponentCheck for MemoryCheck {
    fn name(&self) -> &str {
        "memory"
    }

    fn component_type(&self) -> ComponentType {
        ComponentType::Memory
    }

    async fn check(&self) -> Result<ComponentHealth, HealthCheckError> {
        let (total, used, available) = tokio::task::spawn_blocking(|| {
            let mut system = System::new();
            system.refresh_memory();
            (
                system.total_memory(),
                system.used_memory(),
                system.available_memory(),
            )
        })
        .await
        .map_err(|e| HealthCheckError::failed(self.name(), e))?;

        if total == 0 {
            return Err(HealthCheckError::failed(
                self.name(),
                "total memory reported as 0",
            ));
        }

        let percent = used as f64 / total as f64 * 100.0;
        let status = classify_percentage(percent, &self.thresholds);
        let message = match status {
            HealthStatus::Unhealthy => format!("memory usage critically high: {percent:.1}%"),
            HealthStatus::Degraded => format!("memory usage high: {percent:.1}%"),
            _ => format!("memory usage normal: {percent:.1}%"),
        };

        Ok(
            ComponentHealth::new(self.name(), self.component_type(), status, message)
                .with_metadata("memory_usage_percent", (percent * 100.0).round() / 100.0)
                .with_metadata("memory_available_gb", available as f64 / GIB)
                .with_metadata("memory_total_gb", total as f64 / GIB),
        )
    }
}

/// Global CPU usage sampled over a short window
pub struct CpuCheck {
    thresholds: Thresholds,
    sample_window: Duration,
}

impl CpuCheck {
    pub fn new(thresholds: Thresholds) -> Self {
        Self {
            thresholds,
            sample_window: MINIMUM_CPU_UPDATE_INTERVAL,
        }
    }

    /// Sample over a longer window; shorter than the sysinfo minimum is ignored.
    pub fn with_sample_window(mut self, window: Duration) -> Self {
        self.sample_window = window.max(MINIMUM_CPU_UPDATE_INTERVAL);
        self
    }
}

#[async_trait]
impl ComponentCheck for CpuCheck {
    fn name(&self) -> &str {
        "cpu"
    }

    fn component_type(&self) -> ComponentType {
        ComponentType::Cpu
    }

    async fn check(&self) -> Result<ComponentHealth, HealthCheckError> {
        // Usage is a delta between two refreshes
        let mut system = System::new();
        system.refresh_cpu_usage();
        tokio::time::sleep(self.sample_window).await;
        system.refresh_cpu_usage();

        let percent = f64::from(system.global_cpu_usage());
        let status = classify_percentage(percent, &self.thresholds);
        let message = match status {
            HealthStatus::Unhealthy => format!("cpu usage critically high: {percent:.1}%"),
            HealthStatus::Degraded => format!("cpu usage high: {percent:.1}%"),
            _ => format!("cpu usage normal: {percent:.1}%"),
        };

        Ok(
            ComponentHealth::new(self.name(), self.component_type(), status, message)
                .with_metadata("cpu_usage_percent", (percent * 100.0).round() / 100.0)
                .with_metadata("cpu_count", system.cpus().len()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disk_usage_percent() {
        let usage = DiskUsage {
            total_bytes: 1000,
            available_bytes: 100,
        };
        assert!((usage.used_percent() - 90.0).abs() < f64::EPSILON);

        let empty = DiskUsage {
            total_bytes: 0,
            available_bytes: 0,
        };
        assert_eq!(empty.used_percent(), 0.0);
    }

    #[tokio::test]
    async fn test_file_system_check_writes_probe() {
        let dir = tempfile::tempdir().unwrap();
        let check = FileSystemCheck::new(Thresholds::new(100.0, 100.0), dir.path());

        let health = check.check().await.unwrap();
        assert_eq!(health.status, HealthStatus::Healthy);
        assert_eq!(health.metadata["write_test"], "passed");
        // The probe file is removed again
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_file_system_check_degrades_when_write_fails() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("does-not-exist");
        let check = FileSystemCheck::new(Thresholds::new(100.0, 100.0), &missing);

        let health = check.check().await.unwrap();
        assert_eq!(health.status, HealthStatus::Degraded);
        assert!(health.message.contains("write test failed"));
    }

    #[tokio::test]
    async fn test_memory_check_reports_usage() {
        let health = MemoryCheck::new(Thresholds::new(100.0, 100.0))
            .check()
            .await
            .unwrap();
        assert_eq!(health.component_type, ComponentType::Memory);
        assert_eq!(health.status, HealthStatus::Healthy);
        assert!(health.metadata.contains_key("memory_usage_percent"));
    }

    #[tokio::test]
    async fn test_cpu_check_reports_usage() {
        let health = CpuCheck::new(Thresholds::new(100.0, 100.0))
            .check()
            .await
            .unwrap();
        assert_eq!(health.name, "cpu");
        assert_eq!(health.status, HealthStatus::Healthy);
        assert!(health.metadata.contains_key("cpu_count"));
    }
}
