//! Application configuration types.
//!
//! The top-level [`Config`] struct is deserialized from JSON and carries the
//! sub-configs for the scheduler, resource monitor, conversion behavior, and
//! encoder paths. Every section defaults sensibly so a completely empty `{}`
//! file is valid.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::Error;

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub scheduler: SchedulerConfig,
    pub monitor: MonitorConfig,
    pub conversion: ConversionConfig,
    pub tools: ToolsConfig,
}

impl Config {
    /// Deserialize a `Config` from a JSON string.
    ///
    /// This is intentionally string-based so the caller can read the file
    /// however it sees fit (async, embedded, etc.).
    pub fn from_json(json_str: &str) -> Result<Self> {
        serde_json::from_str(json_str)
            .map_err(|e| Error::Validation(format!("config parse error: {e}")))
    }

    /// Load configuration from a file path, falling back to defaults if the
    /// path is `None` or the file does not exist.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };

        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_json(&contents).unwrap_or_else(|e| {
                tracing::warn!("Failed to parse config file {}: {e}", path.display());
                Self::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No config file at {}; using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                tracing::warn!("Failed to read config file {}: {e}", path.display());
                Self::default()
            }
        }
    }

    /// Return a list of validation warnings (non-fatal issues).
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.scheduler.max_concurrent == 0 {
            warnings.push("scheduler.max_concurrent is 0; it will be clamped to 1".into());
        }

        if self.monitor.cpu_high >= self.monitor.cpu_critical {
            warnings.push(format!(
                "monitor.cpu_high ({}) is not below monitor.cpu_critical ({})",
                self.monitor.cpu_high, self.monitor.cpu_critical
            ));
        }

        if self.monitor.memory_high >= self.monitor.memory_critical {
            warnings.push(format!(
                "monitor.memory_high ({}) is not below monitor.memory_critical ({})",
                self.monitor.memory_high, self.monitor.memory_critical
            ));
        }

        if self.monitor.max_base_concurrency == 0 {
            warnings.push("monitor.max_base_concurrency is 0; it will be clamped to 1".into());
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// Batch scheduler settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Upper bound on simultaneously running jobs.
    pub max_concurrent: usize,
    /// When true, the effective limit is `min(max_concurrent, recommended)`
    /// where the recommendation comes from the resource monitor, sampled
    /// once at batch start.
    pub adaptive: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 2,
            adaptive: true,
        }
    }
}

/// Resource monitor thresholds.
///
/// Percentages at or above `*_high` classify as High; at or above
/// `*_critical` as Critical.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub cpu_high: f32,
    pub cpu_critical: f32,
    pub memory_high: f32,
    pub memory_critical: f32,
    /// Cap on the CPU-count-derived base concurrency.
    pub max_base_concurrency: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            cpu_high: 80.0,
            cpu_critical: 95.0,
            memory_high: 75.0,
            memory_critical: 90.0,
            max_base_concurrency: 4,
        }
    }
}

/// Per-job conversion behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversionConfig {
    /// Minimum time between two progress callback invocations for one job.
    pub min_callback_interval_ms: u64,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            min_callback_interval_ms: 100,
        }
    }
}

/// Optional explicit paths for external encoder binaries.
///
/// Unset entries are resolved from `PATH` during discovery.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub ffmpeg_path: Option<PathBuf>,
    pub ffprobe_path: Option<PathBuf>,
    pub handbrake_path: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        assert_eq!(config.scheduler.max_concurrent, 2);
        assert!(config.scheduler.adaptive);
        assert_eq!(config.monitor.cpu_high, 80.0);
        assert_eq!(config.monitor.cpu_critical, 95.0);
        assert_eq!(config.monitor.memory_high, 75.0);
        assert_eq!(config.monitor.memory_critical, 90.0);
        assert_eq!(config.conversion.min_callback_interval_ms, 100);
        assert!(config.validate().is_empty());
    }

    #[test]
    fn empty_json_is_valid() {
        let config = Config::from_json("{}").unwrap();
        assert_eq!(config.scheduler.max_concurrent, 2);
        assert_eq!(config.monitor.max_base_concurrency, 4);
    }

    #[test]
    fn partial_json_overrides() {
        let config =
            Config::from_json(r#"{"scheduler": {"max_concurrent": 8, "adaptive": false}}"#)
                .unwrap();
        assert_eq!(config.scheduler.max_concurrent, 8);
        assert!(!config.scheduler.adaptive);
        // Untouched sections keep their defaults.
        assert_eq!(config.conversion.min_callback_interval_ms, 100);
    }

    #[test]
    fn invalid_json_is_error() {
        assert!(Config::from_json("not json").is_err());
    }

    #[test]
    fn load_or_default_missing_file() {
        let config = Config::load_or_default(Some(Path::new("/nonexistent/vidpress.json")));
        assert_eq!(config.scheduler.max_concurrent, 2);
    }

    #[test]
    fn validate_flags_zero_concurrency() {
        let mut config = Config::default();
        config.scheduler.max_concurrent = 0;
        let warnings = config.validate();
        assert!(warnings.iter().any(|w| w.contains("max_concurrent")));
    }

    #[test]
    fn validate_flags_inverted_thresholds() {
        let mut config = Config::default();
        config.monitor.cpu_high = 96.0;
        let warnings = config.validate();
        assert!(warnings.iter().any(|w| w.contains("cpu_high")));
    }

    #[test]
    fn config_roundtrip() {
        let config = Config::default();
        let json = serde_json::to_string(&config).unwrap();
        let back = Config::from_json(&json).unwrap();
        assert_eq!(back.scheduler.max_concurrent, config.scheduler.max_concurrent);
    }
}
