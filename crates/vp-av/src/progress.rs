//! Parsing of encoder status lines into structured progress samples.
//!
//! ffmpeg-style status output rewrites a single line in place:
//!
//! ```text
//! frame=  720 fps=180 q=32.0 size=   15360kB time=00:00:24.00 bitrate=5242.9kbits/s speed=6.0x
//! ```
//!
//! Each field is matched independently so partially formed lines still
//! yield whatever signal they carry. A line only counts as a progress line
//! when both the frame counter and the time position are present.

use std::sync::OnceLock;

use regex::Regex;

/// Compiled per-field patterns. One small pattern per field keeps
/// partial-match behavior correct when the encoder omits fields.
struct Patterns {
    frame: Regex,
    fps: Regex,
    quality: Regex,
    size: Regex,
    time: Regex,
    bitrate: Regex,
    speed: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        frame: compile(r"frame=\s*(\d+)"),
        fps: compile(r"fps=\s*(\d+(?:\.\d+)?)"),
        quality: compile(r"q=\s*(-?\d+(?:\.\d+)?)"),
        size: compile(r"size=\s*(\d+)\s*(?:kB|KiB)"),
        time: compile(r"time=\s*(\d+):(\d{2}):(\d{2})\.(\d{2})"),
        bitrate: compile(r"bitrate=\s*(\d+(?:\.\d+)?)\s*kbits/s"),
        speed: compile(r"speed=\s*(\d+(?:\.\d+)?)x"),
    })
}

fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("field pattern is a valid literal")
}

/// One parsed snapshot of encoder status.
///
/// Fields absent from the source line stay at their zero default; values
/// are never carried over from a previous sample.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressSample {
    pub frame: u64,
    pub fps: f64,
    pub quality: f64,
    /// Output size so far, in bytes (the encoder reports kB).
    pub size_bytes: u64,
    /// Position in the source, in seconds.
    pub time_seconds: f64,
    /// Total source duration in seconds, as configured on the parser.
    pub total_seconds: f64,
    pub bitrate_kbps: f64,
    /// Encode speed relative to realtime.
    pub speed: f64,
}

impl ProgressSample {
    /// Completion percentage, clamped to `[0, 100]`. Zero when the total
    /// duration is unknown.
    pub fn percentage(&self) -> f64 {
        if self.total_seconds <= 0.0 {
            return 0.0;
        }
        (self.time_seconds / self.total_seconds * 100.0).clamp(0.0, 100.0)
    }

    /// Estimated seconds remaining. Infinite while the speed is unknown
    /// or zero; never negative.
    pub fn eta_seconds(&self) -> f64 {
        if self.speed <= 0.0 {
            return f64::INFINITY;
        }
        ((self.total_seconds - self.time_seconds) / self.speed).max(0.0)
    }
}

/// Converts encoder status lines into [`ProgressSample`]s.
///
/// Stateless per call apart from remembering the most recent good sample.
#[derive(Debug)]
pub struct ProgressParser {
    total_seconds: f64,
    last: Option<ProgressSample>,
}

impl ProgressParser {
    /// Create a parser for a source of the given duration. Pass 0 when
    /// the duration is unknown; percentages will derive to 0.
    pub fn new(total_seconds: f64) -> Self {
        Self {
            total_seconds,
            last: None,
        }
    }

    /// Parse one status line.
    ///
    /// Returns `None` unless the line carries at least the frame counter
    /// and time position markers.
    pub fn parse(&mut self, line: &str) -> Option<ProgressSample> {
        let p = patterns();

        let frame = capture_u64(&p.frame, line)?;
        let time_seconds = capture_time(&p.time, line)?;

        let sample = ProgressSample {
            frame,
            fps: capture_f64(&p.fps, line).unwrap_or(0.0),
            quality: capture_f64(&p.quality, line).unwrap_or(0.0),
            size_bytes: capture_u64(&p.size, line).map(|kb| kb * 1024).unwrap_or(0),
            time_seconds,
            total_seconds: self.total_seconds,
            bitrate_kbps: capture_f64(&p.bitrate, line).unwrap_or(0.0),
            speed: capture_f64(&p.speed, line).unwrap_or(0.0),
        };

        self.last = Some(sample.clone());
        Some(sample)
    }

    /// The most recent successfully parsed sample, if any.
    pub fn last_sample(&self) -> Option<&ProgressSample> {
        self.last.as_ref()
    }
}

fn capture_u64(re: &Regex, line: &str) -> Option<u64> {
    re.captures(line)?.get(1)?.as_str().parse().ok()
}

fn capture_f64(re: &Regex, line: &str) -> Option<f64> {
    re.captures(line)?.get(1)?.as_str().parse().ok()
}

/// Parse `H:MM:SS.hh` into total seconds.
fn capture_time(re: &Regex, line: &str) -> Option<f64> {
    let caps = re.captures(line)?;
    let hours: f64 = caps.get(1)?.as_str().parse().ok()?;
    let minutes: f64 = caps.get(2)?.as_str().parse().ok()?;
    let seconds: f64 = caps.get(3)?.as_str().parse().ok()?;
    let hundredths: f64 = caps.get(4)?.as_str().parse().ok()?;
    Some(hours * 3600.0 + minutes * 60.0 + seconds + hundredths / 100.0)
}
