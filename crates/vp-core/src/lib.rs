//! vp-core: shared foundation for vidpress.
//!
//! This crate is the base dependency for the other vp-* crates, providing
//! the unified error type and application configuration.

pub mod config;
pub mod error;

// Re-export the most commonly used items at the crate root.
pub use error::{Error, Result};
