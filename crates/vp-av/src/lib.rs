//! vp-av: encoder subprocess plumbing.
//!
//! Status-line parsing, streaming command execution with cancellation,
//! encoder discovery, and the per-job conversion executor.

pub mod command;
pub mod executor;
pub mod progress;
pub mod tools;

pub use command::{EncoderCommand, StreamedExit, STATUS_TAIL_LIMIT};
pub use executor::{
    ConversionExecutor, ConversionStats, EncoderBackend, ExecutorState, JobSpec,
    DEFAULT_CALLBACK_INTERVAL,
};
pub use progress::{ProgressParser, ProgressSample};
pub use tools::{EncoderInfo, ToolRegistry};
