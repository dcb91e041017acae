//! External encoder discovery.
//!
//! The [`ToolRegistry`] discovers and caches the locations of external
//! encoder binaries (ffmpeg, ffprobe, HandBrakeCLI) and answers the
//! availability checks the executor performs before spawning anything.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Serialize;

use vp_core::{Error, Result};

/// Known encoder names that the registry manages.
const KNOWN_ENCODERS: &[&str] = &["ffmpeg", "ffprobe", "HandBrakeCLI"];

/// Availability information for one encoder, returned by
/// [`ToolRegistry::check_all`].
#[derive(Debug, Clone, Serialize)]
pub struct EncoderInfo {
    /// Encoder name.
    pub name: String,
    /// Whether the binary was found.
    pub available: bool,
    /// Version string (first line of the version output), if available.
    pub version: Option<String>,
    /// Resolved path to the executable.
    pub path: Option<PathBuf>,
}

/// Registry holding discovered encoder paths.
#[derive(Debug, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, PathBuf>,
}

impl ToolRegistry {
    /// Discover encoders by searching `PATH` (or using overrides from
    /// config).
    ///
    /// For each known encoder, if the config supplies a custom path **and**
    /// that path exists, it is used directly. Otherwise [`which::which`]
    /// locates the binary in `PATH`. Encoders that are not found are
    /// silently omitted from the registry.
    pub fn discover(tools_config: &vp_core::config::ToolsConfig) -> Self {
        let mut tools = HashMap::new();

        for &name in KNOWN_ENCODERS {
            let custom_path = match name {
                "ffmpeg" => tools_config.ffmpeg_path.as_deref(),
                "ffprobe" => tools_config.ffprobe_path.as_deref(),
                "HandBrakeCLI" => tools_config.handbrake_path.as_deref(),
                _ => None,
            };

            let resolved = if let Some(p) = custom_path {
                if p.exists() {
                    Some(p.to_path_buf())
                } else {
                    // Custom path does not exist; fall back to PATH.
                    which::which(name).ok()
                }
            } else {
                which::which(name).ok()
            };

            if let Some(path) = resolved {
                tools.insert(name.to_string(), path);
            }
        }

        Self { tools }
    }

    /// Whether the named encoder was found during discovery.
    pub fn is_available(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Resolved path for the named encoder, or an
    /// [`Error::EncoderNotAvailable`] if it was not found.
    pub fn require(&self, name: &str) -> Result<&Path> {
        self.tools
            .get(name)
            .map(PathBuf::as_path)
            .ok_or_else(|| Error::encoder_not_available(name))
    }

    /// Check all known encoders and return availability information.
    pub fn check_all(&self) -> Vec<EncoderInfo> {
        KNOWN_ENCODERS
            .iter()
            .map(|&name| {
                if let Some(path) = self.tools.get(name) {
                    EncoderInfo {
                        name: name.to_string(),
                        available: true,
                        version: detect_version(name, path),
                        path: Some(path.clone()),
                    }
                } else {
                    EncoderInfo {
                        name: name.to_string(),
                        available: false,
                        version: None,
                        path: None,
                    }
                }
            })
            .collect()
    }
}

/// Run `<encoder> --version` (or `-version` for ffmpeg/ffprobe) and return
/// the first line of stdout.
fn detect_version(name: &str, path: &Path) -> Option<String> {
    let version_arg = match name {
        "ffmpeg" | "ffprobe" => "-version",
        _ => "--version",
    };

    let output = std::process::Command::new(path)
        .arg(version_arg)
        .output()
        .ok()?;

    if !output.status.success() {
        return None;
    }

    String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use vp_core::config::ToolsConfig;

    #[test]
    fn discover_with_default_config() {
        let registry = ToolRegistry::discover(&ToolsConfig::default());
        // We cannot guarantee any encoder is installed in CI,
        // but the call itself must not panic.
        let _ = registry.check_all();
    }

    #[test]
    fn require_missing_encoder_returns_error() {
        let registry = ToolRegistry::discover(&ToolsConfig::default());
        let result = registry.require("nonexistent_encoder_xyz");
        assert!(matches!(result, Err(Error::EncoderNotAvailable { .. })));
    }

    #[test]
    fn missing_encoder_is_not_available() {
        let registry = ToolRegistry::discover(&ToolsConfig::default());
        assert!(!registry.is_available("nonexistent_encoder_xyz"));
    }

    #[test]
    fn check_all_reports_known_encoders() {
        let registry = ToolRegistry::discover(&ToolsConfig::default());
        let infos = registry.check_all();
        let names: Vec<&str> = infos.iter().map(|i| i.name.as_str()).collect();
        assert!(names.contains(&"ffmpeg"));
        assert!(names.contains(&"ffprobe"));
        assert!(names.contains(&"HandBrakeCLI"));
    }

    #[test]
    fn bogus_custom_path_falls_back_to_path_lookup() {
        let config = ToolsConfig {
            ffmpeg_path: Some(PathBuf::from("/nonexistent/ffmpeg")),
            ..ToolsConfig::default()
        };
        let registry = ToolRegistry::discover(&config);
        // Either PATH has ffmpeg or it is simply absent; the bogus
        // override must not be kept.
        if let Ok(path) = registry.require("ffmpeg") {
            assert_ne!(path, Path::new("/nonexistent/ffmpeg"));
        }
    }
}
