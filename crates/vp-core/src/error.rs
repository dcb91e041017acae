//! Unified error type for the vidpress crates.
//!
//! Per-job failures are captured into these variants and surfaced through
//! the scheduler's result slots; only construction-time problems are meant
//! to propagate out of a batch.

/// Unified error type covering all failure modes in vidpress.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The availability predicate rejected the job's encoder before any
    /// process was spawned.
    #[error("encoder not available: {encoder}")]
    EncoderNotAvailable {
        /// Name of the encoder that was requested.
        encoder: String,
    },

    /// Spawning the encoder failed because the binary is missing.
    #[error("encoder binary not found: {encoder}")]
    EncoderNotFound {
        /// Name of the encoder that could not be spawned.
        encoder: String,
    },

    /// The encoder process exited with a nonzero status.
    #[error("encoder {encoder} failed (exit code {code:?}): {stderr_tail}")]
    ProcessFailed {
        /// Name of the encoder that failed.
        encoder: String,
        /// Exit code, if the process was not killed by a signal.
        code: Option<i32>,
        /// Truncated tail of the encoder's status stream.
        stderr_tail: String,
    },

    /// The encoder reported success but the expected output file is missing.
    #[error("output not created: {}", path.display())]
    OutputNotCreated {
        /// The output path that was expected to exist.
        path: std::path::PathBuf,
    },

    /// A cooperative cancellation request was honored.
    #[error("cancelled")]
    Cancelled,

    /// An I/O operation failed.
    #[error("IO error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Input data failed validation.
    #[error("validation error: {0}")]
    Validation(String),

    /// Catch-all for unexpected internal errors.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True when this error represents an honored cancellation rather
    /// than a real failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// Convenience constructor for [`Error::EncoderNotAvailable`].
    pub fn encoder_not_available(encoder: impl Into<String>) -> Self {
        Error::EncoderNotAvailable {
            encoder: encoder.into(),
        }
    }

    /// Convenience constructor for [`Error::EncoderNotFound`].
    pub fn encoder_not_found(encoder: impl Into<String>) -> Self {
        Error::EncoderNotFound {
            encoder: encoder.into(),
        }
    }

    /// Convenience constructor for [`Error::ProcessFailed`].
    pub fn process_failed(
        encoder: impl Into<String>,
        code: Option<i32>,
        stderr_tail: impl Into<String>,
    ) -> Self {
        Error::ProcessFailed {
            encoder: encoder.into(),
            code,
            stderr_tail: stderr_tail.into(),
        }
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoder_not_available_display() {
        let err = Error::encoder_not_available("ffmpeg");
        assert_eq!(err.to_string(), "encoder not available: ffmpeg");
        assert!(!err.is_cancelled());
    }

    #[test]
    fn encoder_not_found_display() {
        let err = Error::encoder_not_found("HandBrakeCLI");
        assert_eq!(err.to_string(), "encoder binary not found: HandBrakeCLI");
    }

    #[test]
    fn process_failed_display() {
        let err = Error::process_failed("ffmpeg", Some(1), "Conversion failed!");
        let text = err.to_string();
        assert!(text.contains("ffmpeg"));
        assert!(text.contains("Conversion failed!"));
    }

    #[test]
    fn output_not_created_display() {
        let err = Error::OutputNotCreated {
            path: std::path::PathBuf::from("/tmp/out.mp4"),
        };
        assert_eq!(err.to_string(), "output not created: /tmp/out.mp4");
    }

    #[test]
    fn cancelled_is_cancelled() {
        assert!(Error::Cancelled.is_cancelled());
        assert_eq!(Error::Cancelled.to_string(), "cancelled");
    }

    #[test]
    fn io_from_std() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
        let err = Error::from(io_err);
        assert!(matches!(err, Error::Io { .. }));
    }

    #[test]
    fn result_alias() {
        fn ok_fn() -> Result<i32> {
            Ok(42)
        }
        assert_eq!(ok_fn().unwrap(), 42);
    }
}
