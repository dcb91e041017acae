//! Per-job conversion lifecycle: spawn, stream, wait, classify, clean up.
//!
//! A [`ConversionExecutor`] runs exactly one job through the state machine
//! NotStarted → Running → {Completed, Failed, Cancelled}. The encoder
//! command line and availability check come from the caller through the
//! [`EncoderBackend`] seam; the executor owns everything around the
//! process: progress parsing, callback throttling, outcome classification,
//! and deletion of partial output on the failure and cancellation paths.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use vp_core::{Error, Result};

use crate::command::EncoderCommand;
use crate::progress::{ProgressParser, ProgressSample};

/// Default minimum interval between progress callback invocations.
pub const DEFAULT_CALLBACK_INTERVAL: Duration = Duration::from_millis(100);

/// Seam to the caller: builds the encoder command line for a job and
/// answers whether that encoder is installed. The executor treats both
/// as opaque.
pub trait EncoderBackend: Send + Sync {
    /// Full command line for this job; the first element is the program.
    fn build_argv(&self, spec: &JobSpec) -> Vec<String>;

    /// Whether the encoder needed for this job is available.
    fn is_available(&self, spec: &JobSpec) -> bool;
}

/// One unit of conversion work.
#[derive(Debug, Clone)]
pub struct JobSpec {
    /// Source file.
    pub input: PathBuf,
    /// Expected output file. Deleted if the job fails or is cancelled.
    pub output: PathBuf,
    /// Encoder name, used for availability checks and diagnostics.
    pub encoder: String,
    /// Source duration in seconds; 0 when unknown.
    pub duration_seconds: f64,
}

impl JobSpec {
    /// Short display name derived from the input file name.
    pub fn display_name(&self) -> String {
        self.input
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.input.to_string_lossy().to_string())
    }
}

/// Lifecycle state of a [`ConversionExecutor`]. Terminal states are never
/// left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorState {
    NotStarted,
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// Statistics for a completed conversion.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversionStats {
    /// Input size in bytes, captured before the encoder ran.
    pub original_size: u64,
    /// Output size in bytes.
    pub converted_size: u64,
    /// Wall-clock time the encoder ran for.
    pub duration: Duration,
    /// `1 - converted/original`; 0 when the input size is unknown.
    pub compression_ratio: f64,
}

/// Error type observers may return from a progress callback. Such errors
/// are logged and discarded; they never abort the conversion.
pub type CallbackError = Box<dyn std::error::Error + Send + Sync>;

/// Runs one conversion job against an external encoder.
pub struct ConversionExecutor {
    backend: Arc<dyn EncoderBackend>,
    state: Mutex<ExecutorState>,
    cancel: CancellationToken,
}

impl ConversionExecutor {
    /// Create an executor for a single job.
    pub fn new(backend: Arc<dyn EncoderBackend>) -> Self {
        Self {
            backend,
            state: Mutex::new(ExecutorState::NotStarted),
            cancel: CancellationToken::new(),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ExecutorState {
        *self.state.lock()
    }

    /// Request cooperative cancellation. Safe to call from any task at any
    /// time; if the encoder is running it is asked to terminate
    /// (best effort — a process that exits just before the kill is fine).
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Run the job to completion.
    ///
    /// Parsed progress samples are delivered to `on_progress`, throttled so
    /// that at least `min_callback_interval` elapses between invocations.
    /// Callback errors are logged and swallowed.
    ///
    /// # Errors
    ///
    /// - [`Error::EncoderNotAvailable`] when the backend's availability
    ///   predicate rejects the job (nothing is spawned).
    /// - [`Error::Validation`] when the input file is not readable.
    /// - [`Error::EncoderNotFound`] when spawning fails because the binary
    ///   is missing.
    /// - [`Error::Cancelled`] when a cancellation request was honored; the
    ///   output file is removed first.
    /// - [`Error::ProcessFailed`] on nonzero exit, carrying a bounded tail
    ///   of the status stream; the output file is removed first.
    /// - [`Error::OutputNotCreated`] on zero exit without an output file.
    pub async fn execute<F>(
        &self,
        spec: &JobSpec,
        mut on_progress: F,
        min_callback_interval: Duration,
    ) -> Result<ConversionStats>
    where
        F: FnMut(&ProgressSample) -> std::result::Result<(), CallbackError>,
    {
        {
            let mut state = self.state.lock();
            if *state != ExecutorState::NotStarted {
                return Err(Error::Internal(format!(
                    "executor already used (state {:?})",
                    *state
                )));
            }
            *state = ExecutorState::Running;
        }

        match self.run(spec, &mut on_progress, min_callback_interval).await {
            Ok(stats) => {
                *self.state.lock() = ExecutorState::Completed;
                Ok(stats)
            }
            Err(e) => {
                *self.state.lock() = if e.is_cancelled() {
                    ExecutorState::Cancelled
                } else {
                    ExecutorState::Failed
                };
                Err(e)
            }
        }
    }

    async fn run<F>(
        &self,
        spec: &JobSpec,
        on_progress: &mut F,
        min_callback_interval: Duration,
    ) -> Result<ConversionStats>
    where
        F: FnMut(&ProgressSample) -> std::result::Result<(), CallbackError>,
    {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        if !self.backend.is_available(spec) {
            return Err(Error::encoder_not_available(spec.encoder.clone()));
        }

        let original_size = tokio::fs::metadata(&spec.input)
            .await
            .map_err(|e| {
                Error::Validation(format!(
                    "input {} is not readable: {e}",
                    spec.input.display()
                ))
            })?
            .len();

        let command = EncoderCommand::from_argv(self.backend.build_argv(spec))?;
        tracing::info!(
            "starting {} for {} -> {}",
            spec.encoder,
            spec.input.display(),
            spec.output.display()
        );
        tracing::debug!("encoder command: {command:?}");

        let started = Instant::now();
        let mut parser = ProgressParser::new(spec.duration_seconds);
        let mut last_emit: Option<Instant> = None;

        let exit = command
            .execute_streaming(
                |line| {
                    let Some(sample) = parser.parse(line) else {
                        return;
                    };
                    let due = last_emit.map_or(true, |t| t.elapsed() >= min_callback_interval);
                    if due {
                        if let Err(e) = on_progress(&sample) {
                            tracing::warn!("progress callback error ignored: {e}");
                        }
                        last_emit = Some(Instant::now());
                    }
                },
                &self.cancel,
            )
            .await?;

        if exit.cancelled {
            tracing::info!("conversion of {} cancelled", spec.input.display());
            remove_partial_output(&spec.output).await;
            return Err(Error::Cancelled);
        }

        if !exit.status.success() {
            remove_partial_output(&spec.output).await;
            return Err(Error::process_failed(
                spec.encoder.clone(),
                exit.status.code(),
                exit.tail,
            ));
        }

        let converted_size = match tokio::fs::metadata(&spec.output).await {
            Ok(meta) => meta.len(),
            Err(_) => {
                return Err(Error::OutputNotCreated {
                    path: spec.output.clone(),
                })
            }
        };

        let compression_ratio = if original_size > 0 {
            1.0 - converted_size as f64 / original_size as f64
        } else {
            0.0
        };
        let duration = started.elapsed();

        tracing::info!(
            "completed {} in {:.1}s ({} -> {} bytes, {:.1}% smaller)",
            spec.input.display(),
            duration.as_secs_f64(),
            original_size,
            converted_size,
            compression_ratio * 100.0
        );

        Ok(ConversionStats {
            original_size,
            converted_size,
            duration,
            compression_ratio,
        })
    }
}

/// Delete a partial output file. Absence is fine; other failures are only
/// logged since the job outcome is already decided.
async fn remove_partial_output(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => tracing::debug!("removed partial output {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("could not remove partial output {}: {e}", path.display()),
    }
}
