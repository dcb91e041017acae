//! System resource sampling and concurrency recommendation.
//!
//! The monitor keeps a persistent [`sysinfo::System`] and refreshes it on
//! each [`ResourceMonitor::status`] call, so sampling stays cheap and
//! bounded. Sampling never fails: when the platform reports no CPUs the
//! status falls back to Normal levels and a conservative recommendation.

use parking_lot::Mutex;
use serde::Serialize;
use sysinfo::{CpuRefreshKind, MemoryRefreshKind, RefreshKind, System};

use vp_core::config::MonitorConfig;

/// Recommendation used when sampling data is unavailable.
pub const FALLBACK_CONCURRENCY: usize = 2;

/// Utilization below this percentage classifies as [`ResourceLevel::Low`].
const LOW_THRESHOLD: f32 = 30.0;

/// Coarse classification of a utilization percentage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceLevel {
    Low,
    Normal,
    High,
    Critical,
}

/// Point-in-time utilization snapshot with a concurrency recommendation.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceStatus {
    pub cpu_percent: f32,
    pub memory_percent: f32,
    pub cpu_level: ResourceLevel,
    pub memory_level: ResourceLevel,
    /// Always at least 1.
    pub recommended_concurrency: usize,
}

/// Read-only sampler of system CPU and memory utilization.
pub struct ResourceMonitor {
    config: MonitorConfig,
    system: Mutex<System>,
}

impl ResourceMonitor {
    /// Create a monitor with the given thresholds.
    pub fn new(config: MonitorConfig) -> Self {
        let system = System::new_with_specifics(
            RefreshKind::new()
                .with_cpu(CpuRefreshKind::new().with_cpu_usage())
                .with_memory(MemoryRefreshKind::everything()),
        );
        Self {
            config,
            system: Mutex::new(system),
        }
    }

    /// Sample current utilization and derive a concurrency recommendation.
    ///
    /// Never fails; see the module docs for the fallback behavior.
    pub fn status(&self) -> ResourceStatus {
        let mut system = self.system.lock();
        system.refresh_cpu();
        system.refresh_memory();

        if system.cpus().is_empty() {
            tracing::debug!("no CPU data available; using fallback status");
            return ResourceStatus {
                cpu_percent: 0.0,
                memory_percent: 0.0,
                cpu_level: ResourceLevel::Normal,
                memory_level: ResourceLevel::Normal,
                recommended_concurrency: FALLBACK_CONCURRENCY,
            };
        }

        let cpu_percent = system.global_cpu_info().cpu_usage();
        let total_memory = system.total_memory();
        let memory_percent = if total_memory == 0 {
            0.0
        } else {
            system.used_memory() as f32 / total_memory as f32 * 100.0
        };

        let cpu_level = classify(cpu_percent, self.config.cpu_high, self.config.cpu_critical);
        let memory_level = classify(
            memory_percent,
            self.config.memory_high,
            self.config.memory_critical,
        );
        let recommended_concurrency = recommend(cpu_level, memory_level, self.base_concurrency());

        ResourceStatus {
            cpu_percent,
            memory_percent,
            cpu_level,
            memory_level,
            recommended_concurrency,
        }
    }

    /// Base concurrency: detected CPU count, capped by config.
    fn base_concurrency(&self) -> usize {
        num_cpus::get()
            .min(self.config.max_base_concurrency.max(1))
            .max(1)
    }
}

impl Default for ResourceMonitor {
    fn default() -> Self {
        Self::new(MonitorConfig::default())
    }
}

/// Classify a percentage against the high/critical thresholds.
fn classify(percent: f32, high: f32, critical: f32) -> ResourceLevel {
    if percent >= critical {
        ResourceLevel::Critical
    } else if percent >= high {
        ResourceLevel::High
    } else if percent < LOW_THRESHOLD {
        ResourceLevel::Low
    } else {
        ResourceLevel::Normal
    }
}

/// Derive the recommendation from the two levels and the base concurrency.
fn recommend(cpu: ResourceLevel, memory: ResourceLevel, base: usize) -> usize {
    if cpu == ResourceLevel::Critical || memory == ResourceLevel::Critical {
        1
    } else if cpu == ResourceLevel::High || memory == ResourceLevel::High {
        (base / 2).max(1)
    } else {
        base.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_boundaries() {
        assert_eq!(classify(0.0, 80.0, 95.0), ResourceLevel::Low);
        assert_eq!(classify(29.9, 80.0, 95.0), ResourceLevel::Low);
        assert_eq!(classify(30.0, 80.0, 95.0), ResourceLevel::Normal);
        assert_eq!(classify(79.9, 80.0, 95.0), ResourceLevel::Normal);
        assert_eq!(classify(80.0, 80.0, 95.0), ResourceLevel::High);
        assert_eq!(classify(94.9, 80.0, 95.0), ResourceLevel::High);
        assert_eq!(classify(95.0, 80.0, 95.0), ResourceLevel::Critical);
        assert_eq!(classify(100.0, 80.0, 95.0), ResourceLevel::Critical);
    }

    #[test]
    fn critical_always_recommends_one() {
        for other in [
            ResourceLevel::Low,
            ResourceLevel::Normal,
            ResourceLevel::High,
            ResourceLevel::Critical,
        ] {
            assert_eq!(recommend(ResourceLevel::Critical, other, 4), 1);
            assert_eq!(recommend(other, ResourceLevel::Critical, 4), 1);
        }
    }

    #[test]
    fn high_halves_the_base() {
        assert_eq!(recommend(ResourceLevel::High, ResourceLevel::Low, 4), 2);
        assert_eq!(recommend(ResourceLevel::Normal, ResourceLevel::High, 4), 2);
        // Integer division never drops below 1.
        assert_eq!(recommend(ResourceLevel::High, ResourceLevel::Low, 1), 1);
        assert_eq!(recommend(ResourceLevel::High, ResourceLevel::Low, 3), 1);
    }

    #[test]
    fn normal_keeps_the_base() {
        assert_eq!(recommend(ResourceLevel::Low, ResourceLevel::Normal, 4), 4);
        assert_eq!(recommend(ResourceLevel::Normal, ResourceLevel::Normal, 2), 2);
    }

    #[test]
    fn status_never_panics_and_recommends_at_least_one() {
        let monitor = ResourceMonitor::default();
        // Two samples back to back; the first may report 0% CPU.
        let first = monitor.status();
        let second = monitor.status();

        for status in [first, second] {
            assert!(status.recommended_concurrency >= 1);
            assert!(status.cpu_percent.is_finite());
            assert!(status.memory_percent.is_finite());
            assert!(status.memory_percent >= 0.0);
        }
    }

    #[test]
    fn base_concurrency_respects_cap() {
        let monitor = ResourceMonitor::new(MonitorConfig {
            max_base_concurrency: 1,
            ..MonitorConfig::default()
        });
        assert_eq!(monitor.base_concurrency(), 1);
    }
}
