//! Host resource sampling and the pressure gate run before each iteration.

use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use anyhow::{Result, anyhow};
use sysinfo::{Disks, System};
use tracing::{debug, info, warn};

use crate::core::types::{Health, Pressure};
use crate::io::config::ResourceConfig;

/// One reading of host resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceSample {
    pub disk_used_percent: u8,
    pub available_memory_bytes: u64,
}

/// Source of resource samples.
pub trait ResourceProbe {
    fn sample(&mut self) -> Result<ResourceSample>;
}

/// Probe backed by `sysinfo`, sampling the filesystem that holds `disk_path`.
pub struct SystemProbe {
    system: System,
    disk_path: PathBuf,
}

impl SystemProbe {
    pub fn new(disk_path: impl Into<PathBuf>) -> Self {
        Self {
            system: System::new(),
            disk_path: disk_path.into(),
        }
    }
}

impl ResourceProbe for SystemProbe {
    fn sample(&mut self) -> Result<ResourceSample> {
        self.system.refresh_memory();
        let available_memory_bytes = self.system.available_memory();

        let target = self
            .disk_path
            .canonicalize()
            .unwrap_or_else(|_| self.disk_path.clone());
        let disks = Disks::new_with_refreshed_list();
        let disk = disks
            .list()
            .iter()
            .filter(|d| target.starts_with(d.mount_point()))
            .max_by_key(|d| d.mount_point().as_os_str().len())
            .ok_or_else(|| anyhow!("no mounted filesystem holds {}", target.display()))?;

        let disk_used_percent = used_percent(disk.total_space(), disk.available_space());
        debug!(
            mount = %disk.mount_point().display(),
            disk_used_percent,
            available_memory_bytes,
            "sampled resources"
        );
        Ok(ResourceSample {
            disk_used_percent,
            available_memory_bytes,
        })
    }
}

fn used_percent(total: u64, available: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    let used = total.saturating_sub(available);
    ((used as u128 * 100) / total as u128).min(100) as u8
}

/// Fixed pressure thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    pub max_disk_percent: u8,
    pub min_available_memory_bytes: u64,
}

impl Thresholds {
    pub fn from_config(config: &ResourceConfig) -> Self {
        Self {
            max_disk_percent: config.max_disk_percent,
            min_available_memory_bytes: config.min_available_memory_bytes(),
        }
    }

    /// Classify a sample. Disk pressure wins when both thresholds are crossed.
    pub fn evaluate(&self, sample: &ResourceSample) -> Health {
        if sample.disk_used_percent > self.max_disk_percent {
            return Health::Pressure(Pressure::Disk {
                used_percent: sample.disk_used_percent,
                max_percent: self.max_disk_percent,
            });
        }
        if sample.available_memory_bytes < self.min_available_memory_bytes {
            return Health::Pressure(Pressure::Memory {
                available_mb: sample.available_memory_bytes / (1024 * 1024),
                min_mb: self.min_available_memory_bytes / (1024 * 1024),
            });
        }
        Health::Healthy
    }
}

/// Decision of the resource gate for the pending iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Proceed,
    /// Two consecutive pressure readings; the second reason is reported.
    Abort(Pressure),
}

/// Applies the pause-then-abort policy on top of a probe.
pub struct ResourceGovernor<P> {
    probe: P,
    thresholds: Thresholds,
    pause: Duration,
}

impl<P: ResourceProbe> ResourceGovernor<P> {
    pub fn new(probe: P, thresholds: Thresholds, pause: Duration) -> Self {
        Self {
            probe,
            thresholds,
            pause,
        }
    }

    pub fn from_config(probe: P, config: &ResourceConfig) -> Self {
        Self::new(probe, Thresholds::from_config(config), config.pause())
    }

    /// Sample once. A probe failure counts as healthy: without a reading there
    /// is no evidence of pressure.
    pub fn check(&mut self) -> Health {
        match self.probe.sample() {
            Ok(sample) => self.thresholds.evaluate(&sample),
            Err(err) => {
                warn!(err = %format!("{err:#}"), "resource sample failed, treating as healthy");
                Health::Healthy
            }
        }
    }

    /// First pressure pauses and re-checks; a second consecutive pressure aborts.
    pub fn gate(&mut self) -> GateDecision {
        let first = match self.check() {
            Health::Healthy => return GateDecision::Proceed,
            Health::Pressure(reason) => reason,
        };
        warn!(reason = %first, pause_secs = self.pause.as_secs(), "resource pressure, pausing");
        if !self.pause.is_zero() {
            thread::sleep(self.pause);
        }
        match self.check() {
            Health::Healthy => {
                info!("resource pressure cleared");
                GateDecision::Proceed
            }
            Health::Pressure(reason) => {
                warn!(reason = %reason, "resource pressure persisted");
                GateDecision::Abort(reason)
            }
        }
    }
}

/// Resolve the disk sampling path against the workspace.
pub fn disk_path(workdir: &Path, config: &ResourceConfig) -> PathBuf {
    workdir.join(&config.disk_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedProbe;

    const MB: u64 = 1024 * 1024;

    fn thresholds() -> Thresholds {
        Thresholds {
            max_disk_percent: 90,
            min_available_memory_bytes: 500 * MB,
        }
    }

    fn healthy() -> ResourceSample {
        ResourceSample {
            disk_used_percent: 40,
            available_memory_bytes: 4096 * MB,
        }
    }

    fn full_disk() -> ResourceSample {
        ResourceSample {
            disk_used_percent: 95,
            ..healthy()
        }
    }

    #[test]
    fn evaluate_reports_each_threshold() {
        let t = thresholds();
        assert_eq!(t.evaluate(&healthy()), Health::Healthy);
        assert_eq!(
            t.evaluate(&full_disk()),
            Health::Pressure(Pressure::Disk {
                used_percent: 95,
                max_percent: 90
            })
        );
        let low_mem = ResourceSample {
            available_memory_bytes: 100 * MB,
            ..healthy()
        };
        assert_eq!(
            t.evaluate(&low_mem),
            Health::Pressure(Pressure::Memory {
                available_mb: 100,
                min_mb: 500
            })
        );
    }

    #[test]
    fn exactly_at_disk_threshold_is_healthy() {
        let sample = ResourceSample {
            disk_used_percent: 90,
            ..healthy()
        };
        assert_eq!(thresholds().evaluate(&sample), Health::Healthy);
    }

    #[test]
    fn single_pressure_reading_recovers() {
        let probe = ScriptedProbe::new(vec![full_disk(), healthy()]);
        let mut governor = ResourceGovernor::new(probe, thresholds(), Duration::ZERO);
        assert_eq!(governor.gate(), GateDecision::Proceed);
    }

    #[test]
    fn two_consecutive_pressure_readings_abort() {
        let probe = ScriptedProbe::new(vec![full_disk(), full_disk()]);
        let mut governor = ResourceGovernor::new(probe, thresholds(), Duration::ZERO);
        assert!(matches!(
            governor.gate(),
            GateDecision::Abort(Pressure::Disk { .. })
        ));
    }

    #[test]
    fn probe_failure_is_healthy() {
        let probe = ScriptedProbe::failing();
        let mut governor = ResourceGovernor::new(probe, thresholds(), Duration::ZERO);
        assert_eq!(governor.check(), Health::Healthy);
    }

    #[test]
    fn used_percent_handles_empty_disk() {
        assert_eq!(used_percent(0, 0), 0);
        assert_eq!(used_percent(200, 50), 75);
    }
}
