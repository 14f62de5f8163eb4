//! Host CPU, memory and disk readings.
//!
//! The disk figures describe the filesystem holding the tracker database,
//! which is also where backups usually land.

use crate::tracker_store::SystemSample;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use sysinfo::{Disk, Disks, System};

pub const CPU_PERCENT: &str = "system.cpu_percent";
pub const MEMORY_PERCENT: &str = "system.memory_percent";
pub const DISK_PERCENT: &str = "system.disk_percent";

const BYTES_PER_GB: f64 = 1_073_741_824.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemMetrics {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub memory_available_gb: f64,
    /// `None` when no mounted filesystem holds the data directory.
    pub disk_percent: Option<f64>,
    pub disk_free_gb: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl SystemMetrics {
    /// The readings kept as samples in the store.
    pub fn samples(&self) -> Vec<SystemSample> {
        let mut samples = vec![
            SystemSample {
                metric: CPU_PERCENT.to_string(),
                timestamp: self.timestamp,
                value: self.cpu_percent,
            },
            SystemSample {
                metric: MEMORY_PERCENT.to_string(),
                timestamp: self.timestamp,
                value: self.memory_percent,
            },
        ];
        if let Some(disk_percent) = self.disk_percent {
            samples.push(SystemSample {
                metric: DISK_PERCENT.to_string(),
                timestamp: self.timestamp,
                value: disk_percent,
            });
        }
        samples
    }
}

fn safe_percent(numerator: u64, denominator: u64) -> f64 {
    if denominator > 0 {
        ((numerator as f64 / denominator as f64) * 100.0).clamp(0.0, 100.0)
    } else {
        0.0
    }
}

/// Keeps `sysinfo` handles between cycles. CPU usage is measured between two
/// refreshes, so the first reading after construction is only a baseline.
pub struct SystemMetricsCollector {
    sys: Mutex<System>,
    disks: Mutex<Disks>,
    data_dir: PathBuf,
}

impl SystemMetricsCollector {
    pub fn new(data_dir: PathBuf) -> Self {
        let mut sys = System::new();
        sys.refresh_memory();
        sys.refresh_cpu_usage();
        Self {
            sys: Mutex::new(sys),
            disks: Mutex::new(Disks::new_with_refreshed_list()),
            data_dir,
        }
    }

    pub fn collect(&self) -> SystemMetrics {
        let (cpu_percent, memory_percent, memory_available_gb) = {
            let mut sys = self.sys.lock().unwrap();
            sys.refresh_memory();
            sys.refresh_cpu_usage();
            let cpus = sys.cpus();
            let cpu_percent = if cpus.is_empty() {
                0.0
            } else {
                cpus.iter().map(|c| c.cpu_usage() as f64).sum::<f64>() / cpus.len() as f64
            };
            (
                cpu_percent,
                safe_percent(sys.used_memory(), sys.total_memory()),
                sys.available_memory() as f64 / BYTES_PER_GB,
            )
        };

        let (disk_percent, disk_free_gb) = {
            let mut disks = self.disks.lock().unwrap();
            disks.refresh();
            match disk_for(&disks, &self.data_dir) {
                Some(disk) => {
                    let total = disk.total_space();
                    let available = disk.available_space();
                    (
                        Some(safe_percent(total.saturating_sub(available), total)),
                        Some(available as f64 / BYTES_PER_GB),
                    )
                }
                None => (None, None),
            }
        };

        SystemMetrics {
            cpu_percent,
            memory_percent,
            memory_available_gb,
            disk_percent,
            disk_free_gb,
            timestamp: Utc::now(),
        }
    }
}

/// Resolves `path` through its nearest existing ancestor, so directories
/// that are yet to be created still map to a filesystem.
fn resolve(path: &Path) -> Option<PathBuf> {
    path.ancestors()
        .find_map(|ancestor| ancestor.canonicalize().ok())
}

/// The mounted filesystem with the longest mount point containing `path`.
fn disk_for<'a>(disks: &'a Disks, path: &Path) -> Option<&'a Disk> {
    let resolved = resolve(path)?;
    disks
        .iter()
        .filter(|d| d.total_space() > 0 && resolved.starts_with(d.mount_point()))
        .max_by_key(|d| d.mount_point().as_os_str().len())
}

/// Free bytes on the filesystem holding `path`, if one can be found.
pub fn available_space(path: &Path) -> Option<u64> {
    let disks = Disks::new_with_refreshed_list();
    disk_for(&disks, path).map(Disk::available_space)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn percentages_stay_in_range() {
        let dir = TempDir::new().unwrap();
        let collector = SystemMetricsCollector::new(dir.path().to_path_buf());
        let metrics = collector.collect();

        assert!((0.0..=100.0).contains(&metrics.cpu_percent));
        assert!((0.0..=100.0).contains(&metrics.memory_percent));
        assert!(metrics.memory_available_gb >= 0.0);
        if let Some(disk_percent) = metrics.disk_percent {
            assert!((0.0..=100.0).contains(&disk_percent));
            assert!(metrics.disk_free_gb.unwrap() >= 0.0);
        }
    }

    #[test]
    fn samples_skip_unknown_disk() {
        let metrics = SystemMetrics {
            cpu_percent: 12.0,
            memory_percent: 40.0,
            memory_available_gb: 3.5,
            disk_percent: None,
            disk_free_gb: None,
            timestamp: Utc::now(),
        };
        let names: Vec<String> = metrics.samples().into_iter().map(|s| s.metric).collect();
        assert_eq!(names, vec![CPU_PERCENT, MEMORY_PERCENT]);

        let with_disk = SystemMetrics {
            disk_percent: Some(71.0),
            disk_free_gb: Some(20.0),
            ..metrics
        };
        let samples = with_disk.samples();
        assert_eq!(samples.len(), 3);
        assert_eq!(samples[2].metric, DISK_PERCENT);
        assert_eq!(samples[2].value, 71.0);
    }

    #[test]
    fn missing_directory_resolves_through_its_parent() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("not").join("yet");
        assert_eq!(resolve(&missing), Some(dir.path().canonicalize().unwrap()));
    }

    #[test]
    fn safe_percent_handles_empty_totals() {
        assert_eq!(safe_percent(5, 0), 0.0);
        assert_eq!(safe_percent(1, 4), 25.0);
        assert_eq!(safe_percent(9, 4), 100.0);
    }
}
