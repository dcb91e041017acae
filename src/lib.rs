//! vidpress - bounded-concurrency batch video conversion.
//!
//! Drives an external encoder process per file under a configurable or
//! adaptive concurrency limit, with live per-job and aggregate progress
//! and cooperative two-tier cancellation. The encoder command line itself
//! is supplied by the caller through the [`EncoderBackend`] seam.

pub mod converter;
pub mod monitor;
pub mod scheduler;

pub use converter::BatchConverter;
pub use monitor::{ResourceLevel, ResourceMonitor, ResourceStatus};
pub use scheduler::{
    AggregatedProgress, BatchItem, JobProgress, JobScheduler, JobSnapshot, JobStatus,
    ProgressObserver,
};
pub use vp_av::{
    ConversionExecutor, ConversionStats, EncoderBackend, JobSpec, ProgressParser, ProgressSample,
    ToolRegistry,
};
pub use vp_core::{config, Error, Result};
